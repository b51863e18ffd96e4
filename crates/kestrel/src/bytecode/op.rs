//! Opcode set.
//!
//! One byte per opcode, followed by a fixed-width operand region described
//! by [`Opcode::operand_kind`]. Three registers thread extra operands
//! through the instruction stream: a *string register* (interned name), an
//! *index register* (pool index / function id / capacity), and a *bigint
//! register*. Register-prefix opcodes load a register in 1/2/4-byte widths
//! (plus compact zero-operand forms for small indices); the next opcode
//! that needs the register consumes it.
//!
//! Call-form callee evaluation uses the `*This` variants, which push the
//! callable and then the receiver, so `Call` always finds
//! `[callable, this, args..]` on the stack.

use serde::{Deserialize, Serialize};
use strum::{EnumCount, FromRepr, IntoStaticStr};

/// Width and interpretation of an opcode's operand region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl OperandKind {
    /// Operand size in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
        }
    }
}

/// Flag bits for the `IncDec*` opcode family.
pub mod incdec {
    /// Set: decrement. Clear: increment.
    pub const DEC: u8 = 0b01;
    /// Set: postfix (push the old value). Clear: prefix.
    pub const POST: u8 = 0b10;
}

/// Flag bits for `ClassDef`.
pub mod classdef {
    /// The class has an `extends` clause; the heritage value is on the
    /// stack (possibly `null`).
    pub const DERIVED: u8 = 0b1;
}

/// Flag bits for `DefinePrivate`.
pub mod privatedef {
    /// Read-only member (private method).
    pub const METHOD: u8 = 0b001;
    pub const GETTER: u8 = 0b010;
    pub const SETTER: u8 = 0b100;
}

/// Flag bits for `ClassMethod`.
pub mod classmethod {
    /// Define on the constructor instead of the prototype.
    pub const STATIC: u8 = 0b001;
    pub const GETTER: u8 = 0b010;
    pub const SETTER: u8 = 0b100;
}

/// The opcode set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, EnumCount, IntoStaticStr, Serialize, Deserialize)]
pub enum Opcode {
    Nop = 0,

    // ---- stack shape ----
    Dup,
    /// Duplicate the top pair: `[a, b]` -> `[a, b, a, b]`.
    Dup2,
    Swap,
    Pop,
    /// Pop into the frame's completion-value register (statement results).
    PopResult,

    // ---- constants ----
    Undef,
    LoadNull,
    True,
    False,
    Zero,
    One,
    /// Push the TDZ sentinel (block-scope initialization sequences).
    LoadTdz,
    /// i8 immediate integer.
    ShortInt,
    /// i32 immediate integer.
    Int32,
    /// Push `numbers[index_reg]` from the descriptor's float pool.
    LoadNum,
    /// Push the interned string in the string register.
    LoadStr,
    /// Allocate the interned `BigInt` in the bigint register.
    LoadBigInt,

    // ---- register prefixes ----
    StrReg1,
    StrReg2,
    StrReg4,
    IndRegC0,
    IndRegC1,
    IndRegC2,
    IndRegC3,
    IndRegC4,
    IndRegC5,
    IndReg1,
    IndReg2,
    IndReg4,
    BigIntReg1,
    BigIntReg2,
    BigIntReg4,

    // ---- arithmetic / logic ----
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Neg,
    /// Unary plus: ToNumber.
    Pos,
    BitNot,
    Not,
    ShL,
    ShR,
    /// Unsigned right shift; raises `TypeError` on BigInt operands.
    UShR,
    BitAnd,
    BitOr,
    BitXor,

    // ---- comparison ----
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    InstanceOf,

    // ---- typeof / delete ----
    /// `typeof` of a stack value.
    Typeof,
    /// `typeof name`: resolves the string-register name without raising on
    /// unbound names.
    TypeofName,

    // ---- name operations (name in the string register) ----
    GetVar,
    /// Checked read used where the compiler knows the binding may still be
    /// in its dead zone (self-referential initializers).
    GetVarTdz,
    /// Push callable then receiver for a bare-name call.
    GetVarThis,
    SetVar,
    /// Declaring write to a `let` binding: clears the TDZ.
    SetLetInit,
    /// Ordinary write to a `let` binding: TDZ write is an error.
    SetLetVar,
    /// Initialize a `const` binding; later writes raise `TypeError`.
    SetConstVar,
    DeleteVar,
    /// Hoisted `var` declaration on the current variable scope.
    DeclareVar,
    /// `let` declaration in the current block scope (enters TDZ).
    DeclareLet,
    /// `const` declaration in the current block scope (enters TDZ).
    DeclareConst,
    /// u8 flags, see [`incdec`].
    IncDecVar,

    // ---- property operations ----
    /// `[obj]` -> `[value]`, name in the string register.
    GetProp,
    /// `[obj]` -> `[fn, this]` for the call form `obj.m(...)`.
    GetPropThis,
    /// `[obj, value]` -> `[value]`.
    SetProp,
    /// `[obj]` -> `[bool]`.
    DeleteProp,
    /// `[obj, key]` -> `[value]`.
    GetElem,
    /// `[obj, key]` -> `[fn, this]`.
    GetElemThis,
    /// `[obj, key, value]` -> `[value]`.
    SetElem,
    /// `[obj, key]` -> `[bool]`.
    DeleteElem,
    /// `[this]` -> `[value]`; base is the home object's prototype.
    GetPropSuper,
    /// `[this, value]` -> `[value]`; writes go to the receiver.
    SetPropSuper,
    /// `[this, key]` -> `[value]`.
    GetElemSuper,
    /// `[this, key, value]` -> `[value]`.
    SetElemSuper,
    /// u8 flags, see [`incdec`].
    IncDecProp,
    /// u8 flags, see [`incdec`].
    IncDecElem,

    // ---- scope operations ----
    /// `[obj]` -> `[]`; pushes a `with` scope.
    EnterWith,
    /// Like `EnterWith` but the named properties become read-only
    /// bindings.
    EnterWithConst,
    LeaveWith,
    NewBlockScope,
    PopBlockScope,
    /// Clone the current block scope for the next loop iteration so
    /// closures capture per-iteration bindings.
    CopyPerIterScope,

    // ---- control flow (i16 relative offsets) ----
    Jump,
    IfTrue,
    IfFalse,
    /// Branch if falsy, popping the condition and one extra value.
    IfEqPop,
    /// Optional chaining: pop; if nullish push `undefined` and branch.
    IfNullUndef,
    /// Nullish coalescing: pop; if not nullish push it back and branch.
    IfNotNullUndef,
    Return,
    ReturnUndef,

    // ---- calls (u8 argument count unless noted) ----
    /// `[fn, this, args..]` -> `[result]`.
    Call,
    /// Call with `eval`/`with` bookkeeping; otherwise as `Call`.
    CallSpecial,
    /// `[ctor, args..]` -> `[instance]`.
    New,
    /// `[fn, this, args_array]` -> `[result]`.
    CallSpread,
    /// `[ctor, args_array]` -> `[instance]`.
    NewSpread,
    /// Reuses the current frame.
    TailCall,
    /// `[fn, args..]` -> `[result]` with the current `this`.
    CallOnSuper,
    /// Create a closure from the descriptor in the index register.
    MakeFunction,

    // ---- literals ----
    NewObjectLit,
    /// Capacity hint in the index register.
    NewArrayLit,
    /// `[arr, value]` -> `[arr]`; append at the array's length.
    LiteralSet,
    /// Advance the next literal index to the index register (array holes).
    SparseArrayLit,
    /// `[obj, key, value]` -> `[obj]`; define with literal attributes.
    LiteralKeySet,
    /// `[obj, key, fn]` -> `[obj]`.
    LiteralGetter,
    /// `[obj, key, fn]` -> `[obj]`.
    LiteralSetter,
    /// `[arr, iterable]` -> `[arr]`; append all elements.
    Spread,
    /// `[source, flags]` -> `[regexp]` via the realm's `RegExpProxy`.
    NewRegExp,

    // ---- exceptions ----
    Throw,
    /// i16 offset: push the return address and jump to a finally block.
    Gosub,
    /// u16 local slot: store the subroutine return address (or unwind
    /// marker) popped from the stack.
    StartSub,
    /// u16 local slot: return from a finally block, or re-dispatch the
    /// pending completion stored by the unwinder.
    RetSub,

    // ---- iteration ----
    /// `[obj]` -> `[iterator]` via `@@iterator`.
    CallIterator,
    /// `[iterator]` -> `[iterator, value, done]`.
    IterNext,
    /// `[iterator]` -> `[]`; calls `return()` if present, used on abrupt
    /// loop exit.
    IterClose,

    // ---- generators / async ----
    /// Capture the fresh frame into a generator object and return it to
    /// the caller. First opcode of every generator body.
    MakeGenerator,
    /// `[value]`: suspend, delivering the value to the resumer.
    Yield,
    /// `[iterable]`: delegate until the inner iterator completes.
    YieldStar,
    /// Terminal return of a generator body (natural exhaustion).
    GeneratorEnd,
    /// `[value]`: return completion that marks the generator done.
    GeneratorReturn,
    /// `[value]`: suspend until the awaited value settles.
    Await,

    // ---- classes ----
    /// Constructor descriptor in the index register; u8 flags, see
    /// [`classdef`]. Heritage on the stack when `DERIVED`.
    ClassDef,
    /// `[ctor, key, fn]` -> `[ctor]`; u8 flags, see [`classmethod`].
    ClassMethod,
    /// Register an instance-field initializer descriptor (index register)
    /// on the class: `[ctor]` -> `[ctor]`.
    ClassFieldInit,
    /// Push the running function's class-storage object (private-member
    /// identity).
    ClassStorage,
    /// `[storage, obj]` -> `[value]`; name in the string register.
    GetPrivate,
    /// `[storage, obj, value]` -> `[value]`.
    SetPrivate,
    /// `[storage, obj, value]` -> `[]`; define without a brand check.
    /// u8 flags, see [`privatedef`].
    DefinePrivate,
    /// `[args..]` -> `[]`; u8 argument count. Calls the super constructor
    /// and binds `this`.
    SuperCall,
    /// Implicit `constructor(...args) { super(...args); }` body.
    DefaultCtorSuperCall,
    /// Raise `ReferenceError` if `this` is still unbound.
    CheckThisTdz,
    /// Push `this` (walking out of arrow activations), checking the TDZ.
    LoadThis,
    /// u16 slot: push a frame-local (the caught exception bound by a
    /// handler entry).
    LocalLoad,
}

impl Opcode {
    /// Operand layout of this opcode.
    pub fn operand_kind(self) -> OperandKind {
        use OperandKind::{I8, I16, I32, None as N, U8, U16, U32};
        match self {
            Self::ShortInt => I8,
            Self::Int32 => I32,
            Self::StrReg1 | Self::IndReg1 | Self::BigIntReg1 => U8,
            Self::StrReg2 | Self::IndReg2 | Self::BigIntReg2 | Self::LocalLoad => U16,
            Self::StrReg4 | Self::IndReg4 | Self::BigIntReg4 => U32,
            Self::Jump
            | Self::IfTrue
            | Self::IfFalse
            | Self::IfEqPop
            | Self::IfNullUndef
            | Self::IfNotNullUndef
            | Self::Gosub => I16,
            Self::StartSub | Self::RetSub => U16,
            Self::Call
            | Self::CallSpecial
            | Self::New
            | Self::TailCall
            | Self::CallOnSuper
            | Self::SuperCall
            | Self::IncDecVar
            | Self::IncDecProp
            | Self::IncDecElem
            | Self::ClassDef
            | Self::ClassMethod
            | Self::DefinePrivate => U8,
            _ => N,
        }
    }

    /// Net stack effect when it is fixed; `None` for calls and other
    /// operand-dependent opcodes.
    pub fn stack_effect(self) -> Option<i16> {
        Some(match self {
            Self::Nop
            | Self::Swap
            | Self::StrReg1
            | Self::StrReg2
            | Self::StrReg4
            | Self::IndRegC0
            | Self::IndRegC1
            | Self::IndRegC2
            | Self::IndRegC3
            | Self::IndRegC4
            | Self::IndRegC5
            | Self::IndReg1
            | Self::IndReg2
            | Self::IndReg4
            | Self::BigIntReg1
            | Self::BigIntReg2
            | Self::BigIntReg4
            | Self::Neg
            | Self::Pos
            | Self::BitNot
            | Self::Not
            | Self::Typeof
            | Self::SetVar
            | Self::SetLetInit
            | Self::SetLetVar
            | Self::SetConstVar
            | Self::GetProp
            | Self::DeleteProp
            | Self::GetPropSuper
            | Self::IncDecProp
            | Self::LeaveWith
            | Self::NewBlockScope
            | Self::PopBlockScope
            | Self::CopyPerIterScope
            | Self::Jump
            | Self::DeclareVar
            | Self::DeclareLet
            | Self::DeclareConst
            | Self::SparseArrayLit
            | Self::MakeGenerator
            | Self::Yield
            | Self::YieldStar
            | Self::Await
            | Self::GeneratorEnd
            | Self::CheckThisTdz
            | Self::DefaultCtorSuperCall
            | Self::RetSub => 0,
            Self::Dup
            | Self::Undef
            | Self::LoadNull
            | Self::True
            | Self::False
            | Self::Zero
            | Self::One
            | Self::LoadTdz
            | Self::ShortInt
            | Self::Int32
            | Self::LoadNum
            | Self::LoadStr
            | Self::LoadBigInt
            | Self::GetVar
            | Self::GetVarTdz
            | Self::TypeofName
            | Self::DeleteVar
            | Self::IncDecVar
            | Self::NewObjectLit
            | Self::NewArrayLit
            | Self::MakeFunction
            | Self::ClassStorage
            | Self::LoadThis
            | Self::LocalLoad
            | Self::Gosub => 1,
            Self::ReturnUndef => 0,
            Self::Dup2 | Self::GetVarThis => 2,
            Self::Pop
            | Self::PopResult
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Exp
            | Self::ShL
            | Self::ShR
            | Self::UShR
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Eq
            | Self::Ne
            | Self::StrictEq
            | Self::StrictNe
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::In
            | Self::InstanceOf
            | Self::SetProp
            | Self::GetElem
            | Self::DeleteElem
            | Self::SetPropSuper
            | Self::GetElemSuper
            | Self::GetPrivate
            | Self::IncDecElem
            | Self::EnterWith
            | Self::EnterWithConst
            | Self::IfTrue
            | Self::IfFalse
            | Self::IfNullUndef
            | Self::IfNotNullUndef
            | Self::Throw
            | Self::Return
            | Self::GeneratorReturn
            | Self::StartSub
            | Self::LiteralSet
            | Self::Spread
            | Self::NewRegExp => -1,
            Self::IfEqPop | Self::SetElem | Self::SetElemSuper | Self::SetPrivate | Self::LiteralKeySet
            | Self::LiteralGetter | Self::LiteralSetter => -2,
            Self::DefinePrivate => -3,
            Self::CallIterator => 0,
            Self::IterNext => 2,
            Self::IterClose => -1,
            Self::GetPropThis => 1,
            Self::GetElemThis => 0,
            Self::ClassFieldInit => 0,
            Self::Call | Self::CallSpecial | Self::New | Self::CallSpread | Self::NewSpread | Self::TailCall
            | Self::CallOnSuper | Self::SuperCall | Self::ClassDef | Self::ClassMethod => return None,
        })
    }

    /// Static mnemonic for the disassembler.
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;

    #[test]
    fn opcodes_round_trip_through_repr() {
        for raw in 0..Opcode::COUNT {
            let op = Opcode::from_repr(raw as u8).expect("dense discriminants");
            assert_eq!(op as usize, raw);
        }
        assert!(Opcode::from_repr(Opcode::COUNT as u8).is_none());
    }

    #[test]
    fn operand_widths_are_consistent() {
        assert_eq!(Opcode::ShortInt.operand_kind().width(), 1);
        assert_eq!(Opcode::Jump.operand_kind().width(), 2);
        assert_eq!(Opcode::Int32.operand_kind().width(), 4);
        assert_eq!(Opcode::Add.operand_kind().width(), 0);
    }

    #[test]
    fn fixed_stack_effects() {
        assert_eq!(Opcode::Add.stack_effect(), Some(-1));
        assert_eq!(Opcode::Dup.stack_effect(), Some(1));
        assert_eq!(Opcode::Call.stack_effect(), None);
        assert_eq!(Opcode::SetElem.stack_effect(), Some(-2));
    }
}
