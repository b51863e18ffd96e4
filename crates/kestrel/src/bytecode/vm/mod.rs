//! The interpreter engine.
//!
//! A stack-based dispatch loop over validated descriptors. Each
//! [`CallFrame`] owns its pc, its frame-local slots, and its region of the
//! shared operand stack. Script-to-script calls push frames into the same
//! loop; protocol work that must observe a result (accessors, `@@`-method
//! lookups, construction, natives calling back into script, generator
//! resumption) runs a *nested* loop bounded by the current frame depth.
//!
//! Errors travel as `Result` values: no host unwinding crosses a frame.
//! The loop polls the host interrupt hook and the collector on an opcode
//! budget, so cancellation enters the same throw/finally machinery as any
//! script error.
//!
//! # Module structure
//!
//! - `call` - call/construct sequences, activations, closures
//! - `natives` - built-in function dispatch
//! - `property_ops` - property access, name resolution, iteration
//! - `numeric` - coercion wrappers and operator bodies
//! - `unwind` - exception-table search, finally transfer, completions
//! - `generator_exec` - generator/async suspension and promise plumbing
//! - `class_ops` - class definition and private-member opcodes

pub(crate) mod call;
pub(crate) mod class_ops;
pub(crate) mod generator_exec;
pub(crate) mod natives;
pub(crate) mod numeric;
pub(crate) mod property_ops;
pub(crate) mod unwind;

use std::sync::Arc;

use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{BigIntId, FunctionId, StringId},
    realm::Realm,
    resource::ResourceTracker,
    scope::{Binding, Scope, ScopeKind},
    tracer::VmTracer,
    value::Value,
};

use super::{
    code::Code,
    op::Opcode,
};

/// Evaluates a fallible operation inside the dispatch loop; on error,
/// transfers to a handler in the current frame chain or propagates out of
/// `run_until`.
macro_rules! vm_try {
    ($self:expr, $base:expr, $expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => match $self.handle_throw(err.into(), $base) {
                Ok(None) => continue,
                Ok(Some(value)) => return Ok(value),
                Err(err) => return Err(err),
            },
        }
    };
}


/// A single activation record of the dispatch loop.
#[derive(Debug)]
pub(crate) struct CallFrame {
    /// Shared descriptor; cloning the `Arc` keeps the interns table free
    /// for mutation while the frame runs.
    pub code: Arc<Code>,
    pub descriptor: FunctionId,
    pub pc: usize,
    /// First operand-stack index owned by this frame.
    pub stack_base: usize,
    /// Frame-local slots: exception temporaries and finally return
    /// addresses.
    pub locals: Vec<Value>,
    /// Innermost scope the frame currently executes in.
    pub scope: HeapId,
    pub this: Value,
    /// The callee object; `None` for top-level scripts and module roots.
    pub function: Option<HeapId>,
    /// Generator whose body this frame runs.
    pub generator: Option<HeapId>,
    /// Async-function state whose body this frame runs.
    pub async_state: Option<HeapId>,
    /// `new.target` of a construct invocation; `Undefined` for plain
    /// calls. Seeds instance prototypes through `super(...)` chains.
    pub new_target: Value,
    /// Completion-value register (`PopResult`).
    pub result: Value,
}

impl CallFrame {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        push(self.scope);
        for value in &self.locals {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
        if let Some(id) = self.this.ref_id() {
            push(id);
        }
        for id in [self.function, self.generator, self.async_state].into_iter().flatten() {
            push(id);
        }
        for value in [&self.new_target, &self.result] {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
    }
}

/// The bytecode virtual machine, borrowing the realm it executes against.
pub(crate) struct Vm<'a, T: ResourceTracker, Tr: VmTracer> {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) realm: &'a mut Realm<T>,
    pub(crate) tracer: &'a mut Tr,
    /// Interned name preloaded by the `StrReg*` prefixes.
    pub(crate) string_reg: StringId,
    /// Index preloaded by the `IndReg*` prefixes.
    pub(crate) index_reg: u32,
    /// `BigInt` pool id preloaded by the `BigIntReg*` prefixes.
    pub(crate) bigint_reg: BigIntId,
    /// pc of the instruction currently executing (exception-table lookup
    /// and line mapping).
    pub(crate) instruction_pc: usize,
    /// Opcodes until the next interrupt/collection safepoint.
    interrupt_countdown: u32,
    /// Resource/internal error parked while a finally block runs on the
    /// way out.
    pub(crate) pending_uncatchable: Option<RunError>,
}

impl<'a, T: ResourceTracker, Tr: VmTracer> Vm<'a, T, Tr> {
    pub fn new(realm: &'a mut Realm<T>, tracer: &'a mut Tr) -> Self {
        let budget = realm.heap.tracker().interrupt_budget().max(1);
        Self {
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(8),
            realm,
            tracer,
            string_reg: StringId::default(),
            index_reg: 0,
            bigint_reg: BigIntId::from_operand(0),
            instruction_pc: 0,
            interrupt_countdown: budget,
            pending_uncatchable: None,
        }
    }

    // ---- small accessors -------------------------------------------------

    pub(crate) fn frame(&self) -> &CallFrame {
        self.frames.last().expect("dispatch loop requires a frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("dispatch loop requires a frame")
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    pub(crate) fn peek(&self) -> &Value {
        self.stack.last().expect("operand stack underflow")
    }

    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        Ok(self.realm.heap.allocate(data)?)
    }

    /// Current scope of the running frame.
    pub(crate) fn current_scope(&self) -> HeapId {
        self.frame().scope
    }

    // ---- fetch helpers ---------------------------------------------------

    fn fetch_op(&mut self) -> Opcode {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let byte = frame.code.bytecode()[frame.pc];
        frame.pc += 1;
        Opcode::from_repr(byte).expect("descriptor was validated")
    }

    fn fetch_u8(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let byte = frame.code.bytecode()[frame.pc];
        frame.pc += 1;
        byte
    }

    fn fetch_i8(&mut self) -> i8 {
        i8::from_ne_bytes([self.fetch_u8()])
    }

    fn fetch_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let code = frame.code.bytecode();
        let value = u16::from_le_bytes([code[frame.pc], code[frame.pc + 1]]);
        frame.pc += 2;
        value
    }

    fn fetch_i16(&mut self) -> i16 {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let code = frame.code.bytecode();
        let value = i16::from_le_bytes([code[frame.pc], code[frame.pc + 1]]);
        frame.pc += 2;
        value
    }

    fn fetch_u32(&mut self) -> u32 {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let code = frame.code.bytecode();
        let value = u32::from_le_bytes([
            code[frame.pc],
            code[frame.pc + 1],
            code[frame.pc + 2],
            code[frame.pc + 3],
        ]);
        frame.pc += 4;
        value
    }

    fn fetch_i32(&mut self) -> i32 {
        self.fetch_u32() as i32
    }

    fn jump_relative(&mut self, offset: i16) {
        let frame = self.frames.last_mut().expect("dispatch loop requires a frame");
        let target = i64::try_from(frame.pc).expect("pc fits i64") + i64::from(offset);
        frame.pc = usize::try_from(target).expect("jump target was validated");
    }

    // ---- frame management ------------------------------------------------

    pub(crate) fn push_frame(&mut self, frame: CallFrame) -> RunResult<()> {
        self.realm.heap.tracker().check_recursion_depth(self.frames.len())?;
        self.frames.push(frame);
        self.tracer.on_frame(self.frames.len(), true);
        Ok(())
    }

    /// Pops the running frame with a normal return completion.
    ///
    /// Settles async promises, marks generators complete, and either
    /// pushes the result for the caller or, when the pop reaches `base`,
    /// hands the value back to `run_until`.
    pub(crate) fn return_from_frame(&mut self, value: Value, base: usize) -> RunResult<Option<Value>> {
        let frame = self.frames.pop().expect("return without a frame");
        self.tracer.on_frame(self.frames.len(), false);
        self.stack.truncate(frame.stack_base);

        let mut result = value;
        if let Some(gen_id) = frame.generator {
            self.finish_generator(gen_id, true);
        }
        if let Some(state_id) = frame.async_state {
            let promise = match self.realm.heap.object(state_id).kind {
                crate::property::ObjectKind::AsyncState(ref state) => state.promise,
                _ => return Err(RunError::internal("async frame without async state")),
            };
            self.settle_promise(promise, true, result)?;
            result = Value::Ref(promise);
        }

        if self.frames.len() == base {
            Ok(Some(result))
        } else {
            self.push(result);
            Ok(None)
        }
    }

    // ---- safepoint -------------------------------------------------------

    /// Interrupt poll and collection point, reached every N opcodes.
    fn safepoint(&mut self) -> RunResult<()> {
        if let Some(hook) = self.realm.interrupt_hook.as_mut()
            && let Err(reason) = hook()
        {
            return Err(RunError::Resource(crate::resource::ResourceError::Interrupted { reason }));
        }
        if self.realm.heap.wants_collect() {
            self.collect_garbage();
        }
        Ok(())
    }

    /// Mark-and-sweep with the full root set: realm globals, operand
    /// stack, frames, jobs, and module records.
    pub(crate) fn collect_garbage(&mut self) {
        let mut roots: Vec<HeapId> = Vec::with_capacity(64);
        self.realm.push_roots(&mut roots);
        for value in &self.stack {
            if let Some(id) = value.ref_id() {
                roots.push(id);
            }
        }
        for frame in &self.frames {
            frame.trace(&mut |id| roots.push(id));
        }
        self.realm.heap.collect(roots);
    }

    // ---- entry points ----------------------------------------------------

    /// Executes a descriptor as top-level code in the given scope.
    pub fn run_root(&mut self, descriptor: FunctionId, scope: HeapId, this: Value) -> RunResult<Value> {
        let code = Arc::clone(self.realm.interns.code(descriptor));
        let locals = vec![Value::Undefined; usize::from(code.local_count)];
        let frame = CallFrame {
            code,
            descriptor,
            pc: 0,
            stack_base: self.stack.len(),
            locals,
            scope,
            this,
            function: None,
            generator: None,
            async_state: None,
            new_target: Value::Undefined,
            result: Value::Undefined,
        };
        let base = self.frames.len();
        self.push_frame(frame)?;
        self.run_until(base)
    }

    /// Runs until the frame stack shrinks back to `base`, returning the
    /// value produced by the frame that closed the gap (a return, a yield,
    /// or an await suspension).
    pub(crate) fn run_until(&mut self, base: usize) -> RunResult<Value> {
        debug_assert!(self.frames.len() > base);
        loop {
            self.interrupt_countdown -= 1;
            if self.interrupt_countdown == 0 {
                self.interrupt_countdown = self.realm.heap.tracker().interrupt_budget().max(1);
                vm_try!(self, base, self.safepoint());
            }

            {
                let frame = self.frame();
                if frame.pc >= frame.code.bytecode().len() {
                    // Validated descriptors end with Return; tolerate a
                    // fall-off by completing with the result register.
                    let result = frame.result.clone();
                    if let Some(value) = vm_try!(self, base, self.return_from_frame(result, base)) {
                        return Ok(value);
                    }
                    continue;
                }
            }
            self.instruction_pc = self.frame().pc;
            let op = self.fetch_op();
            self.tracer.on_op(op, self.instruction_pc, self.frames.len());

            match op {
                Opcode::Nop => {}

                // ---- stack shape ----
                Opcode::Dup => {
                    let top = self.peek().clone();
                    self.push(top);
                }
                Opcode::Dup2 => {
                    let len = self.stack.len();
                    let a = self.stack[len - 2].clone();
                    let b = self.stack[len - 1].clone();
                    self.push(a);
                    self.push(b);
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::PopResult => {
                    let value = self.pop();
                    self.frame_mut().result = value;
                }

                // ---- constants ----
                Opcode::Undef => self.push(Value::Undefined),
                Opcode::LoadNull => self.push(Value::Null),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Zero => self.push(Value::Int(0)),
                Opcode::One => self.push(Value::Int(1)),
                Opcode::LoadTdz => self.push(Value::Uninit),
                Opcode::ShortInt => {
                    let value = self.fetch_i8();
                    self.push(Value::Int(i32::from(value)));
                }
                Opcode::Int32 => {
                    let value = self.fetch_i32();
                    self.push(Value::Int(value));
                }
                Opcode::LoadNum => {
                    let value = self.frame().code.numbers[self.index_reg as usize];
                    self.push(Value::number(value));
                }
                Opcode::LoadStr => self.push(Value::Str(self.string_reg)),
                Opcode::LoadBigInt => {
                    let value = self.realm.interns.get_bigint(self.bigint_reg).clone();
                    let id = vm_try!(self, base, self.alloc(HeapData::BigInt(value)));
                    self.push(Value::Ref(id));
                }

                // ---- registers ----
                Opcode::StrReg1 => {
                    let raw = self.fetch_u8();
                    self.string_reg = StringId::from_operand(u32::from(raw));
                }
                Opcode::StrReg2 => {
                    let raw = self.fetch_u16();
                    self.string_reg = StringId::from_operand(u32::from(raw));
                }
                Opcode::StrReg4 => {
                    let raw = self.fetch_u32();
                    self.string_reg = StringId::from_operand(raw);
                }
                Opcode::IndRegC0 => self.index_reg = 0,
                Opcode::IndRegC1 => self.index_reg = 1,
                Opcode::IndRegC2 => self.index_reg = 2,
                Opcode::IndRegC3 => self.index_reg = 3,
                Opcode::IndRegC4 => self.index_reg = 4,
                Opcode::IndRegC5 => self.index_reg = 5,
                Opcode::IndReg1 => self.index_reg = u32::from(self.fetch_u8()),
                Opcode::IndReg2 => self.index_reg = u32::from(self.fetch_u16()),
                Opcode::IndReg4 => self.index_reg = self.fetch_u32(),
                Opcode::BigIntReg1 => {
                    let raw = self.fetch_u8();
                    self.bigint_reg = BigIntId::from_operand(u32::from(raw));
                }
                Opcode::BigIntReg2 => {
                    let raw = self.fetch_u16();
                    self.bigint_reg = BigIntId::from_operand(u32::from(raw));
                }
                Opcode::BigIntReg4 => {
                    let raw = self.fetch_u32();
                    self.bigint_reg = BigIntId::from_operand(raw);
                }

                // ---- arithmetic / logic / comparison ----
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Exp
                | Opcode::ShL
                | Opcode::ShR
                | Opcode::UShR
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor
                | Opcode::Eq
                | Opcode::Ne
                | Opcode::StrictEq
                | Opcode::StrictNe
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = vm_try!(self, base, self.binary_op(op, left, right));
                    self.push(result);
                }
                Opcode::Neg | Opcode::Pos | Opcode::BitNot => {
                    let operand = self.pop();
                    let result = vm_try!(self, base, self.unary_numeric_op(op, operand));
                    self.push(result);
                }
                Opcode::Not => {
                    let operand = self.pop();
                    let truthy = operand.to_boolean(&self.realm.heap, &self.realm.interns);
                    self.push(Value::Bool(!truthy));
                }
                Opcode::In => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = vm_try!(self, base, self.op_in(left, right));
                    self.push(Value::Bool(result));
                }
                Opcode::InstanceOf => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = vm_try!(self, base, self.op_instanceof(left, right));
                    self.push(Value::Bool(result));
                }
                Opcode::Typeof => {
                    let operand = self.pop();
                    let name = operand.js_type(&self.realm.heap).typeof_str();
                    let id = self.realm.interns.intern(name);
                    self.push(Value::Str(id));
                }
                Opcode::TypeofName => {
                    let name = self.string_reg;
                    let result = vm_try!(self, base, self.op_typeof_name(name));
                    self.push(result);
                }

                // ---- name operations ----
                Opcode::GetVar | Opcode::GetVarTdz => {
                    let name = self.string_reg;
                    let value = vm_try!(self, base, self.lookup_name(name));
                    self.push(value);
                }
                Opcode::GetVarThis => {
                    let name = self.string_reg;
                    let (value, this) = vm_try!(self, base, self.lookup_name_for_call(name));
                    self.push(value);
                    self.push(this);
                }
                Opcode::SetVar => {
                    let name = self.string_reg;
                    let value = self.peek().clone();
                    vm_try!(self, base, self.set_name(name, value));
                }
                Opcode::SetLetInit => {
                    let name = self.string_reg;
                    let value = self.peek().clone();
                    vm_try!(self, base, self.set_let(name, value, true));
                }
                Opcode::SetLetVar => {
                    let name = self.string_reg;
                    let value = self.peek().clone();
                    vm_try!(self, base, self.set_let(name, value, false));
                }
                Opcode::SetConstVar => {
                    let name = self.string_reg;
                    let value = self.peek().clone();
                    vm_try!(self, base, self.set_const(name, value));
                }
                Opcode::DeleteVar => {
                    let name = self.string_reg;
                    let result = vm_try!(self, base, self.delete_name(name));
                    self.push(Value::Bool(result));
                }
                Opcode::DeclareVar => {
                    let name = self.string_reg;
                    vm_try!(self, base, self.declare_var(name));
                }
                Opcode::DeclareLet => {
                    let name = self.string_reg;
                    let scope = self.current_scope();
                    self.realm.heap.scope_mut(scope).declare(name, Binding::uninit_let());
                }
                Opcode::DeclareConst => {
                    let name = self.string_reg;
                    let scope = self.current_scope();
                    self.realm.heap.scope_mut(scope).declare(name, Binding::uninit_const());
                }
                Opcode::IncDecVar => {
                    let flags = self.fetch_u8();
                    let name = self.string_reg;
                    let result = vm_try!(self, base, self.op_incdec_var(name, flags));
                    self.push(result);
                }

                // ---- property operations ----
                Opcode::GetProp => {
                    let obj = self.pop();
                    let name = self.string_reg;
                    let value = vm_try!(self, base, self.get_named_property(obj, name));
                    self.push(value);
                }
                Opcode::GetPropThis => {
                    let obj = self.pop();
                    let name = self.string_reg;
                    let value = vm_try!(self, base, self.get_named_property(obj.clone(), name));
                    self.push(value);
                    self.push(obj);
                }
                Opcode::SetProp => {
                    let value = self.pop();
                    let obj = self.pop();
                    let name = self.string_reg;
                    vm_try!(self, base, self.set_named_property(obj, name, value.clone()));
                    self.push(value);
                }
                Opcode::DeleteProp => {
                    let obj = self.pop();
                    let name = self.string_reg;
                    let result = vm_try!(self, base, self.delete_named_property(obj, name));
                    self.push(Value::Bool(result));
                }
                Opcode::GetElem => {
                    let key = self.pop();
                    let obj = self.pop();
                    let value = vm_try!(self, base, self.get_element(obj, key));
                    self.push(value);
                }
                Opcode::GetElemThis => {
                    let key = self.pop();
                    let obj = self.pop();
                    let value = vm_try!(self, base, self.get_element(obj.clone(), key));
                    self.push(value);
                    self.push(obj);
                }
                Opcode::SetElem => {
                    let value = self.pop();
                    let key = self.pop();
                    let obj = self.pop();
                    vm_try!(self, base, self.set_element(obj, key, value.clone()));
                    self.push(value);
                }
                Opcode::DeleteElem => {
                    let key = self.pop();
                    let obj = self.pop();
                    let result = vm_try!(self, base, self.delete_element(obj, key));
                    self.push(Value::Bool(result));
                }
                Opcode::GetPropSuper | Opcode::SetPropSuper | Opcode::GetElemSuper | Opcode::SetElemSuper => {
                    vm_try!(self, base, self.op_super_property(op));
                }
                Opcode::IncDecProp => {
                    let flags = self.fetch_u8();
                    let obj = self.pop();
                    let name = self.string_reg;
                    let result = vm_try!(self, base, self.op_incdec_prop(obj, name, flags));
                    self.push(result);
                }
                Opcode::IncDecElem => {
                    let flags = self.fetch_u8();
                    let key = self.pop();
                    let obj = self.pop();
                    let result = vm_try!(self, base, self.op_incdec_elem(obj, key, flags));
                    self.push(result);
                }

                // ---- scopes ----
                Opcode::EnterWith | Opcode::EnterWithConst => {
                    let target = self.pop();
                    vm_try!(self, base, self.op_enter_with(target, op == Opcode::EnterWithConst));
                }
                Opcode::LeaveWith | Opcode::PopBlockScope => {
                    let scope = self.current_scope();
                    let parent = self
                        .realm
                        .heap
                        .scope(scope)
                        .parent
                        .expect("scope chain underflow");
                    self.frame_mut().scope = parent;
                }
                Opcode::NewBlockScope => {
                    let scope = self.current_scope();
                    let id = vm_try!(self, base, self.alloc(HeapData::Scope(Scope::block(scope))));
                    self.frame_mut().scope = id;
                }
                Opcode::CopyPerIterScope => {
                    vm_try!(self, base, self.op_copy_per_iter_scope());
                }

                // ---- control flow ----
                Opcode::Jump => {
                    let offset = self.fetch_i16();
                    self.jump_relative(offset);
                }
                Opcode::IfTrue => {
                    let offset = self.fetch_i16();
                    let condition = self.pop();
                    if condition.to_boolean(&self.realm.heap, &self.realm.interns) {
                        self.jump_relative(offset);
                    }
                }
                Opcode::IfFalse => {
                    let offset = self.fetch_i16();
                    let condition = self.pop();
                    if !condition.to_boolean(&self.realm.heap, &self.realm.interns) {
                        self.jump_relative(offset);
                    }
                }
                Opcode::IfEqPop => {
                    let offset = self.fetch_i16();
                    let condition = self.pop();
                    if !condition.to_boolean(&self.realm.heap, &self.realm.interns) {
                        self.pop();
                        self.jump_relative(offset);
                    }
                }
                Opcode::IfNullUndef => {
                    let offset = self.fetch_i16();
                    let value = self.pop();
                    if value.is_nullish() {
                        self.push(Value::Undefined);
                        self.jump_relative(offset);
                    } else {
                        self.push(value);
                    }
                }
                Opcode::IfNotNullUndef => {
                    let offset = self.fetch_i16();
                    let value = self.pop();
                    if value.is_nullish() {
                        // fall through to the right-hand side
                    } else {
                        self.push(value);
                        self.jump_relative(offset);
                    }
                }
                Opcode::Return => {
                    let value = self.pop();
                    if let Some(result) = vm_try!(self, base, self.return_from_frame(value, base)) {
                        return Ok(result);
                    }
                }
                Opcode::ReturnUndef => {
                    if let Some(result) = vm_try!(self, base, self.return_from_frame(Value::Undefined, base)) {
                        return Ok(result);
                    }
                }

                // ---- calls ----
                Opcode::Call | Opcode::CallSpecial => {
                    let argc = self.fetch_u8();
                    vm_try!(self, base, self.op_call(argc, false));
                }
                Opcode::TailCall => {
                    let argc = self.fetch_u8();
                    vm_try!(self, base, self.op_call(argc, true));
                }
                Opcode::New => {
                    let argc = self.fetch_u8();
                    vm_try!(self, base, self.op_new(argc));
                }
                Opcode::CallSpread => {
                    vm_try!(self, base, self.op_call_spread());
                }
                Opcode::NewSpread => {
                    vm_try!(self, base, self.op_new_spread());
                }
                Opcode::CallOnSuper => {
                    let argc = self.fetch_u8();
                    vm_try!(self, base, self.op_call_on_super(argc));
                }
                Opcode::MakeFunction => {
                    let descriptor = FunctionId::from_operand(self.index_reg);
                    let value = vm_try!(self, base, self.make_function(descriptor));
                    self.push(value);
                }

                // ---- literals ----
                Opcode::NewObjectLit => {
                    let id = vm_try!(self, base, self.realm.new_plain_object());
                    self.push(Value::Ref(id));
                }
                Opcode::NewArrayLit => {
                    let capacity = self.index_reg;
                    let id = vm_try!(self, base, self.realm.new_array(capacity));
                    self.push(Value::Ref(id));
                }
                Opcode::LiteralSet => {
                    vm_try!(self, base, self.op_literal_set());
                }
                Opcode::SparseArrayLit => {
                    let next_index = self.index_reg;
                    vm_try!(self, base, self.op_sparse_array_lit(next_index));
                }
                Opcode::LiteralKeySet => {
                    vm_try!(self, base, self.op_literal_key_set());
                }
                Opcode::LiteralGetter => {
                    vm_try!(self, base, self.op_literal_accessor(false));
                }
                Opcode::LiteralSetter => {
                    vm_try!(self, base, self.op_literal_accessor(true));
                }
                Opcode::Spread => {
                    vm_try!(self, base, self.op_spread());
                }
                Opcode::NewRegExp => {
                    vm_try!(self, base, self.op_new_regexp());
                }

                // ---- exceptions ----
                Opcode::Throw => {
                    let value = self.pop();
                    vm_try!(self, base, Err::<(), _>(RunError::thrown(value)));
                }
                Opcode::Gosub => {
                    let offset = self.fetch_i16();
                    let return_pc = self.frame().pc;
                    self.push(Value::Int(i32::try_from(return_pc).expect("pc fits i32")));
                    self.jump_relative(offset);
                }
                Opcode::StartSub => {
                    let slot = self.fetch_u16();
                    let value = self.pop();
                    self.frame_mut().locals[usize::from(slot)] = value;
                }
                Opcode::RetSub => {
                    let slot = self.fetch_u16();
                    match std::mem::replace(&mut self.frame_mut().locals[usize::from(slot)], Value::Undefined) {
                        Value::Int(pc) => {
                            self.frame_mut().pc = usize::try_from(pc).expect("stored pc is valid");
                        }
                        Value::NotFound => {
                            // Entered by throw unwinding: re-raise.
                            if let Some(err) = self.pending_uncatchable.take() {
                                vm_try!(self, base, Err::<(), _>(err));
                            }
                            let exception = self.pop();
                            vm_try!(self, base, Err::<(), _>(RunError::thrown(exception)));
                        }
                        Value::Uninit => {
                            // Entered by return unwinding: continue the
                            // return completion.
                            let value = self.pop();
                            if let Some(result) = vm_try!(self, base, self.unwind_return(value, base)) {
                                return Ok(result);
                            }
                        }
                        other => {
                            let _ = other;
                            vm_try!(
                                self,
                                base,
                                Err::<(), _>(RunError::internal("RetSub slot holds no completion"))
                            );
                        }
                    }
                }

                // ---- iteration ----
                Opcode::CallIterator => {
                    let target = self.pop();
                    let iterator = vm_try!(self, base, self.call_iterator(target));
                    self.push(iterator);
                }
                Opcode::IterNext => {
                    let iterator = self.peek().clone();
                    let (value, done) = vm_try!(self, base, self.iter_next(iterator, None));
                    self.push(value);
                    self.push(Value::Bool(done));
                }
                Opcode::IterClose => {
                    let iterator = self.pop();
                    vm_try!(self, base, self.iter_close(iterator));
                }

                // ---- generators / async ----
                Opcode::MakeGenerator => {
                    let value = vm_try!(self, base, self.op_make_generator());
                    if self.frames.len() == base {
                        return Ok(value);
                    }
                    self.push(value);
                }
                Opcode::Yield => {
                    let value = self.pop();
                    vm_try!(self, base, self.op_yield(value.clone()));
                    if self.frames.len() == base {
                        return Ok(value);
                    }
                    return Err(RunError::internal("yield outside a generator resumption"));
                }
                Opcode::YieldStar => {
                    let iterable = self.pop();
                    match vm_try!(self, base, self.op_yield_star(iterable)) {
                        Some(yielded) => {
                            if self.frames.len() == base {
                                return Ok(yielded);
                            }
                            return Err(RunError::internal("yield* outside a generator resumption"));
                        }
                        // Delegate was exhausted without suspending; its
                        // final value is already pushed.
                        None => {}
                    }
                }
                Opcode::GeneratorEnd => {
                    if let Some(result) = vm_try!(self, base, self.return_from_frame(Value::Undefined, base)) {
                        return Ok(result);
                    }
                }
                Opcode::GeneratorReturn => {
                    let value = self.pop();
                    if let Some(result) = vm_try!(self, base, self.unwind_return(value, base)) {
                        return Ok(result);
                    }
                }
                Opcode::Await => {
                    let awaited = self.pop();
                    let result = vm_try!(self, base, self.op_await(awaited));
                    if self.frames.len() == base {
                        return Ok(result);
                    }
                    self.push(result);
                }

                // ---- classes ----
                Opcode::ClassDef => {
                    let flags = self.fetch_u8();
                    let descriptor = FunctionId::from_operand(self.index_reg);
                    vm_try!(self, base, self.op_class_def(descriptor, flags));
                }
                Opcode::ClassMethod => {
                    let flags = self.fetch_u8();
                    vm_try!(self, base, self.op_class_method(flags));
                }
                Opcode::ClassFieldInit => {
                    let descriptor = FunctionId::from_operand(self.index_reg);
                    vm_try!(self, base, self.op_class_field_init(descriptor));
                }
                Opcode::ClassStorage => {
                    let storage = vm_try!(self, base, self.op_class_storage());
                    self.push(storage);
                }
                Opcode::GetPrivate => {
                    let name = self.string_reg;
                    vm_try!(self, base, self.op_get_private(name));
                }
                Opcode::SetPrivate => {
                    let name = self.string_reg;
                    vm_try!(self, base, self.op_set_private(name));
                }
                Opcode::DefinePrivate => {
                    let flags = self.fetch_u8();
                    let name = self.string_reg;
                    vm_try!(self, base, self.op_define_private(name, flags));
                }
                Opcode::SuperCall => {
                    let argc = self.fetch_u8();
                    vm_try!(self, base, self.op_super_call(argc));
                }
                Opcode::DefaultCtorSuperCall => {
                    vm_try!(self, base, self.op_default_ctor_super_call());
                }
                Opcode::CheckThisTdz => {
                    vm_try!(self, base, self.check_this_initialized());
                }
                Opcode::LoadThis => {
                    let this = vm_try!(self, base, self.resolve_this());
                    self.push(this);
                }
                Opcode::LocalLoad => {
                    let slot = self.fetch_u16();
                    let value = self.frame().locals[usize::from(slot)].clone();
                    self.push(value);
                }
            }
        }
    }

    /// Resolves `this` for the running frame, walking out of arrow
    /// activations, raising `ReferenceError` while a derived constructor's
    /// `this` is still unbound.
    pub(crate) fn resolve_this(&mut self) -> RunResult<Value> {
        let mut cursor = Some(self.current_scope());
        while let Some(id) = cursor {
            let scope = self.realm.heap.scope(id);
            match &scope.kind {
                ScopeKind::Activation(activation) if !activation.arrow => {
                    return match &activation.this {
                        Value::Uninit => Err(RunError::reference_error(
                            "must call super constructor before accessing 'this'",
                        )),
                        this => Ok(this.clone()),
                    };
                }
                ScopeKind::Global { object } => return Ok(Value::Ref(*object)),
                ScopeKind::Module { .. } => return Ok(Value::Undefined),
                _ => {}
            }
            cursor = scope.parent;
        }
        Ok(Value::Undefined)
    }

    /// `CheckThisTdz`: raise unless the nearest non-arrow activation has a
    /// bound `this`.
    pub(crate) fn check_this_initialized(&mut self) -> RunResult<()> {
        self.resolve_this().map(|_| ())
    }

    /// Marks a generator complete, dropping its saved frame.
    pub(crate) fn finish_generator(&mut self, gen_id: HeapId, natural: bool) {
        if let crate::property::ObjectKind::Generator(record) = &mut self.realm.heap.object_mut(gen_id).kind {
            record.state = crate::types::generator::GeneratorState::Completed;
            record.frame = None;
            record.delegate = None;
            if natural {
                record.done_naturally = true;
            }
        }
    }
}
