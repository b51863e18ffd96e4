//! Builder for emitting bytecode.
//!
//! `CodeBuilder` is the writer half of the descriptor format: it encodes
//! opcodes and operands, picks register-prefix widths, manages forward
//! jumps with patching, records exception ranges and source lines, and
//! tracks stack depth for the descriptor's size hint. The compiler front
//! end drives it during compilation; tests drive it directly to assemble
//! descriptors by hand.
//!
//! # Usage
//!
//! ```
//! # use kestrel::{CodeBuilder, Opcode, Program};
//! let mut program = Program::new();
//! let url = program.intern("demo.js");
//! let mut b = CodeBuilder::new();
//! b.load_int(2);
//! b.load_int(3);
//! b.emit(Opcode::Add);
//! b.emit(Opcode::Return);
//! let code = b.build(url);
//! let root = program.add_function(code);
//! # let _ = root;
//! ```

use crate::intern::{BigIntId, FunctionId, StaticStrings, StringId};

use super::{
    code::{Code, CodeFlags, ExceptionEntry, LineEntry},
    op::Opcode,
};

/// Position of an unpatched forward jump operand.
#[derive(Debug, Clone, Copy)]
#[must_use = "forward jumps must be patched"]
pub struct JumpPatch(usize);

/// Builder for one descriptor.
#[derive(Debug)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    numbers: Vec<f64>,
    exception_table: Vec<ExceptionEntry>,
    line_table: Vec<LineEntry>,
    params: Vec<StringId>,
    vars: Vec<StringId>,
    nested: Vec<FunctionId>,
    flags: CodeFlags,
    name: StringId,
    current_line: u32,
    /// True when the current line has not yet been recorded against a pc.
    line_pending: bool,
    current_stack: i32,
    max_stack: i32,
    local_count: u16,
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            numbers: Vec::new(),
            exception_table: Vec::new(),
            line_table: Vec::new(),
            params: Vec::new(),
            vars: Vec::new(),
            nested: Vec::new(),
            flags: CodeFlags::default(),
            name: StringId::from(StaticStrings::EmptyString),
            current_line: 0,
            line_pending: false,
            current_stack: 0,
            max_stack: 0,
            local_count: 0,
        }
    }

    pub fn set_name(&mut self, name: StringId) {
        self.name = name;
    }

    pub fn flags_mut(&mut self) -> &mut CodeFlags {
        &mut self.flags
    }

    /// Declares a formal parameter; order defines binding order and
    /// `length`.
    pub fn add_param(&mut self, name: StringId) {
        self.params.push(name);
    }

    /// Declares a hoisted `var` name bound to `undefined` at entry.
    pub fn add_var(&mut self, name: StringId) {
        self.vars.push(name);
    }

    /// Reserves a frame-local slot (exception temporary, finally return
    /// address).
    pub fn alloc_local(&mut self) -> u16 {
        let slot = self.local_count;
        self.local_count += 1;
        slot
    }

    /// Registers a nested descriptor for `MakeFunction`/`ClassDef`.
    pub fn add_nested(&mut self, id: FunctionId) {
        self.nested.push(id);
    }

    /// Sets the source line recorded for subsequently emitted
    /// instructions.
    pub fn set_line(&mut self, line: u32) {
        if line != self.current_line {
            self.current_line = line;
            self.line_pending = true;
        }
    }

    /// Current pc (the offset the next instruction will land at).
    pub fn here(&self) -> usize {
        self.bytecode.len()
    }

    fn start_instruction(&mut self) {
        if self.line_pending {
            self.line_table.push(LineEntry {
                pc: self.bytecode.len() as u32,
                line: self.current_line,
            });
            self.line_pending = false;
        }
    }

    fn adjust_stack(&mut self, effect: i32) {
        self.current_stack += effect;
        if self.current_stack > self.max_stack {
            self.max_stack = self.current_stack;
        }
        // Depth can dip below zero across unreachable joins; clamp so one
        // branch's accounting does not poison the next.
        if self.current_stack < 0 {
            self.current_stack = 0;
        }
    }

    fn track_fixed(&mut self, op: Opcode) {
        match op {
            // [fn, this, args_array] -> [result]
            Opcode::CallSpread => self.adjust_stack(-2),
            // [ctor, args_array] -> [instance]
            Opcode::NewSpread => self.adjust_stack(-1),
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(i32::from(effect));
                }
            }
        }
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.track_fixed(op);
    }

    /// Emits an instruction with a u8 operand, tracking operand-dependent
    /// stack effects for the call family.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
        match op {
            // [fn, this, args..] -> [result]
            Opcode::Call | Opcode::CallSpecial | Opcode::TailCall => {
                self.adjust_stack(-1 - i32::from(operand));
            }
            // [ctor, args..] -> [instance]; [fn, args..] -> [result]
            Opcode::New | Opcode::CallOnSuper => self.adjust_stack(-i32::from(operand)),
            // [args..] -> []
            Opcode::SuperCall => self.adjust_stack(-i32::from(operand)),
            // heritage popped when derived, constructor pushed
            Opcode::ClassDef => {
                if operand & super::op::classdef::DERIVED != 0 {
                    self.adjust_stack(0);
                } else {
                    self.adjust_stack(1);
                }
            }
            // [ctor, key, fn] -> [ctor]
            Opcode::ClassMethod => self.adjust_stack(-2),
            _ => self.track_fixed(op),
        }
    }

    pub fn emit_i8(&mut self, op: Opcode, operand: i8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand.to_ne_bytes()[0]);
        self.track_fixed(op);
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        self.track_fixed(op);
    }

    pub fn emit_i32(&mut self, op: Opcode, operand: i32) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        self.track_fixed(op);
    }

    pub fn emit_u32(&mut self, op: Opcode, operand: u32) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        self.track_fixed(op);
    }

    /// Loads the string register, choosing the narrowest prefix that fits
    /// the id.
    pub fn str_reg(&mut self, id: StringId) {
        let raw = id.operand();
        if let Ok(b) = u8::try_from(raw) {
            self.emit_u8(Opcode::StrReg1, b);
        } else if let Ok(w) = u16::try_from(raw) {
            self.emit_u16(Opcode::StrReg2, w);
        } else {
            self.emit_u32(Opcode::StrReg4, raw);
        }
    }

    /// Loads the index register; small indices use the compact forms.
    pub fn ind_reg(&mut self, value: u32) {
        match value {
            0 => self.emit(Opcode::IndRegC0),
            1 => self.emit(Opcode::IndRegC1),
            2 => self.emit(Opcode::IndRegC2),
            3 => self.emit(Opcode::IndRegC3),
            4 => self.emit(Opcode::IndRegC4),
            5 => self.emit(Opcode::IndRegC5),
            _ => {
                if let Ok(b) = u8::try_from(value) {
                    self.emit_u8(Opcode::IndReg1, b);
                } else if let Ok(w) = u16::try_from(value) {
                    self.emit_u16(Opcode::IndReg2, w);
                } else {
                    self.emit_u32(Opcode::IndReg4, value);
                }
            }
        }
    }

    /// Loads the bigint register.
    pub fn bigint_reg(&mut self, id: BigIntId) {
        let raw = id.operand();
        if let Ok(b) = u8::try_from(raw) {
            self.emit_u8(Opcode::BigIntReg1, b);
        } else if let Ok(w) = u16::try_from(raw) {
            self.emit_u16(Opcode::BigIntReg2, w);
        } else {
            self.emit_u32(Opcode::BigIntReg4, raw);
        }
    }

    /// Pushes an integer constant using the narrowest encoding.
    pub fn load_int(&mut self, value: i32) {
        match value {
            0 => self.emit(Opcode::Zero),
            1 => self.emit(Opcode::One),
            _ => {
                if let Ok(b) = i8::try_from(value) {
                    self.emit_i8(Opcode::ShortInt, b);
                } else {
                    self.emit_i32(Opcode::Int32, value);
                }
            }
        }
    }

    /// Pushes a float constant through the pool.
    pub fn load_number(&mut self, value: f64) {
        let index = self
            .numbers
            .iter()
            .position(|&n| n.to_bits() == value.to_bits())
            .unwrap_or_else(|| {
                self.numbers.push(value);
                self.numbers.len() - 1
            });
        self.ind_reg(index as u32);
        self.emit(Opcode::LoadNum);
    }

    /// Pushes an interned string constant.
    pub fn load_string(&mut self, id: StringId) {
        self.str_reg(id);
        self.emit(Opcode::LoadStr);
    }

    /// Pushes an interned `BigInt` constant.
    pub fn load_bigint(&mut self, id: BigIntId) {
        self.bigint_reg(id);
        self.emit(Opcode::LoadBigInt);
    }

    /// `str_reg(name)` + a name-family opcode.
    pub fn name_op(&mut self, op: Opcode, name: StringId) {
        self.str_reg(name);
        self.emit(op);
    }

    pub fn get_var(&mut self, name: StringId) {
        self.name_op(Opcode::GetVar, name);
    }

    pub fn set_var(&mut self, name: StringId) {
        self.name_op(Opcode::SetVar, name);
    }

    pub fn get_prop(&mut self, name: StringId) {
        self.name_op(Opcode::GetProp, name);
    }

    pub fn set_prop(&mut self, name: StringId) {
        self.name_op(Opcode::SetProp, name);
    }

    pub fn call(&mut self, argc: u8) {
        self.emit_u8(Opcode::Call, argc);
    }

    /// Emits a forward jump; patch with [`Self::patch_jump`] once the
    /// target is known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpPatch {
        self.start_instruction();
        self.bytecode.push(op as u8);
        let at = self.bytecode.len();
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        self.track_fixed(op);
        JumpPatch(at)
    }

    /// Patches a forward jump to land at the current pc.
    ///
    /// # Panics
    /// Panics if the displacement overflows i16; descriptors that large
    /// must be split by the compiler.
    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.bytecode.len();
        let offset = i16::try_from(target as i64 - (patch.0 as i64 + 2)).expect("jump displacement overflows i16");
        self.bytecode[patch.0..patch.0 + 2].copy_from_slice(&offset.to_le_bytes());
    }

    /// Emits a backward jump to an already-emitted pc.
    pub fn jump_back(&mut self, op: Opcode, target: usize) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        let after = self.bytecode.len() + 2;
        let offset = i16::try_from(target as i64 - after as i64).expect("jump displacement overflows i16");
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
        self.track_fixed(op);
    }

    /// Records an exception-handler range. `start`/`end` come from
    /// [`Self::here`] around the protected region; targets are pcs of the
    /// catch/finally blocks.
    pub fn add_exception_entry(
        &mut self,
        start: usize,
        end: usize,
        handler: Option<usize>,
        finally: Option<usize>,
        slot: u16,
    ) {
        self.exception_table.push(ExceptionEntry {
            start: start as u32,
            end: end as u32,
            handler: handler.map(|pc| pc as u32),
            finally: finally.map(|pc| pc as u32),
            slot,
        });
    }

    /// Finalizes the descriptor.
    pub fn build(self, source_url: StringId) -> Code {
        let mut line_table = self.line_table;
        line_table.sort_by_key(|entry| entry.pc);
        Code {
            name: self.name,
            source_url,
            bytecode: self.bytecode,
            numbers: self.numbers,
            exception_table: self.exception_table,
            line_table,
            params: self.params,
            vars: self.vars,
            max_stack: u16::try_from(self.max_stack.max(0)).unwrap_or(u16::MAX),
            local_count: self.local_count,
            flags: self.flags,
            nested: self.nested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;

    #[test]
    fn forward_jump_patching() {
        let mut interns = Interns::new();
        let url = interns.intern("test.js");
        let mut b = CodeBuilder::new();
        b.emit(Opcode::True);
        let jump = b.emit_jump(Opcode::IfFalse);
        b.emit(Opcode::One);
        b.patch_jump(jump);
        b.emit(Opcode::Return);
        let code = b.build(url);
        assert!(code.validate(&interns).is_ok());
        // IfFalse at pc 1, operand at 2..4, next instruction at 4, One at
        // 4, Return at 5. The patched offset must land on Return.
        let listing = code.disassemble(&interns);
        assert!(listing.contains("IfFalse -> 5"), "listing was:\n{listing}");
    }

    #[test]
    fn register_prefix_width_selection() {
        let mut interns = Interns::new();
        let url = interns.intern("test.js");
        let mut b = CodeBuilder::new();
        // ASCII id fits one byte, a dynamic id needs two.
        b.str_reg(interns.intern("a"));
        b.emit(Opcode::GetVar);
        b.str_reg(interns.intern("somewhatLongerName"));
        b.emit(Opcode::GetVar);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
        let code = b.build(url);
        let listing = code.disassemble(&interns);
        assert!(listing.contains("StrReg1"));
        assert!(listing.contains("StrReg2"));
    }

    #[test]
    fn number_pool_deduplicates() {
        let mut interns = Interns::new();
        let url = interns.intern("test.js");
        let mut b = CodeBuilder::new();
        b.load_number(2.5);
        b.load_number(2.5);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
        let code = b.build(url);
        assert_eq!(code.numbers, vec![2.5]);
    }

    #[test]
    fn stack_depth_tracks_calls() {
        let mut interns = Interns::new();
        let url = interns.intern("test.js");
        let mut b = CodeBuilder::new();
        let f = interns.intern("f");
        b.name_op(Opcode::GetVarThis, f);
        b.load_int(10);
        b.load_int(20);
        b.call(2);
        b.emit(Opcode::Return);
        let code = b.build(url);
        // Deepest point: callable + this + two arguments.
        assert_eq!(code.max_stack, 4);
    }
}
