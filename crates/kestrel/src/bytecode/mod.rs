//! Bytecode format and interpreter engine.
//!
//! # Module structure
//!
//! - `op` - opcode definitions and operand layout
//! - `code` - the descriptor (`Code`): bytecode plus metadata
//! - `builder` - `CodeBuilder` for emitting bytecode
//! - `vm` - the dispatch loop and its semantic operations
//!
//! A [`Program`] bundles the interns table (the shared constant pool) with
//! the descriptors registered in it; it is the unit of serialization and
//! the input to [`Runner`](crate::Runner).

pub use builder::{CodeBuilder, JumpPatch};
pub use code::{Code, CodeFlags, ExceptionEntry, LineEntry};
pub use op::{OperandKind, Opcode, classdef, classmethod, incdec, privatedef};

pub(crate) mod builder;
pub(crate) mod code;
pub(crate) mod op;
pub(crate) mod vm;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::intern::{BigIntId, FunctionId, Interns, StringId};

/// A compiled program: the interns table plus its registered descriptors.
///
/// The compiler front end (or a test assembling descriptors by hand)
/// populates a `Program`, which then round-trips exactly through postcard.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Program {
    pub(crate) interns: Interns,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interns: Interns::new(),
        }
    }

    /// Interns a string for use as a name or literal.
    pub fn intern(&mut self, s: &str) -> StringId {
        self.interns.intern(s)
    }

    /// Interns a `BigInt` literal.
    pub fn add_bigint(&mut self, value: BigInt) -> BigIntId {
        self.interns.add_bigint(value)
    }

    /// Registers a finished descriptor.
    pub fn add_function(&mut self, code: Code) -> FunctionId {
        self.interns.add_function(code)
    }

    /// Reads a registered descriptor.
    #[must_use]
    pub fn code(&self, id: FunctionId) -> &Code {
        self.interns.code(id).as_ref()
    }

    /// Renders one descriptor's bytecode, one instruction per line.
    #[must_use]
    pub fn disassemble(&self, id: FunctionId) -> String {
        self.interns.code(id).disassemble(&self.interns)
    }

    /// Validates every registered descriptor's bytecode bounds.
    pub fn validate(&self) -> Result<(), String> {
        for index in 0..self.interns.function_count() {
            let id = FunctionId::from_operand(index as u32);
            self.interns
                .code(id)
                .validate(&self.interns)
                .map_err(|e| format!("function {index}: {e}"))?;
        }
        Ok(())
    }

    /// Serializes to postcard bytes. The round trip is exact.
    pub fn to_postcard(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("program serialization should not fail")
    }

    /// Deserializes from postcard bytes, rebuilding the interner's lookup
    /// index.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, postcard::Error> {
        let mut program: Self = postcard::from_bytes(bytes)?;
        program.interns.rebuild_lookup();
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_round_trips_through_postcard() {
        let mut program = Program::new();
        let url = program.intern("demo.js");
        let big = program.add_bigint(BigInt::from(7) << 100);
        let mut b = CodeBuilder::new();
        b.load_bigint(big);
        b.emit(Opcode::Return);
        let root = program.add_function(b.build(url));

        let bytes = program.to_postcard();
        let restored = Program::from_postcard(&bytes).unwrap();
        assert_eq!(
            restored.code(root).bytecode(),
            program.code(root).bytecode(),
            "bytecode must round-trip exactly"
        );
        assert_eq!(restored.to_postcard(), bytes, "round trip is byte-stable");
    }
}
