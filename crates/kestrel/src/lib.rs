#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "two's-complement casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors ToInt32")]
#![expect(clippy::float_cmp, reason = "numeric semantics require exact comparison")]
#![expect(clippy::needless_pass_by_value, reason = "value plumbing keeps call APIs uniform")]
#![expect(clippy::struct_excessive_bools, reason = "descriptor flags mirror the wire format")]
// first so the arena is available to everything else
mod heap;

mod bytecode;
mod coerce;
mod error;
mod exception;
mod intern;
mod module;
mod object;
mod property;
mod realm;
mod regexp;
mod resource;
mod run;
mod scope;
mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{
        Code, CodeBuilder, CodeFlags, ExceptionEntry, JumpPatch, LineEntry, OperandKind, Opcode, Program, classdef,
        classmethod, incdec, privatedef,
    },
    exception::{CodeLoc, ErrorKind, Exception, StackFrame},
    heap::HeapStats,
    intern::{BigIntId, FunctionId, StringId, SymbolId, WellKnownSymbol},
    module::{
        ExportTables, ImportEntry, InMemoryLoader, ModuleId, ModuleLoader, ModuleSource, ModuleStatus,
    },
    object::HostValue,
    realm::{InterruptHook, LanguageVersion, RejectionHook},
    regexp::{FancyRegexProxy, RegExpFlags, RegExpHandle, RegExpMatch, RegExpProxy},
    resource::{
        DEFAULT_INTERRUPT_BUDGET, DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError,
        ResourceLimits, ResourceTracker,
    },
    run::Runner,
    tracer::{CountingTracer, NoopTracer, RecordingTracer, VmTracer},
};
