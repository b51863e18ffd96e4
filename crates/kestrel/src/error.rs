//! Engine-internal error model.
//!
//! Every fallible runtime operation returns [`RunResult`]. A [`RunError`] is
//! either a script-visible throw (a runtime-raised error kind or an arbitrary
//! thrown value), a resource-limit failure, or an internal invariant
//! violation. Only the first two are catchable by script handlers; resource
//! and internal errors unwind `finally` blocks and surface to the host.
//!
//! Runtime-raised errors stay in *unmaterialized* form ([`ErrorRaise`]) while
//! they propagate: kind, message, and captured frames, but no heap object.
//! They are materialized into a real error object (with the right prototype)
//! only when a `catch` handler binds them or when they cross the host
//! boundary as a public [`Exception`](crate::Exception).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    intern::StringId,
    resource::ResourceError,
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Error kinds raised by the runtime.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>`; the string form matches the script-visible
/// constructor name exactly (`TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Base error class, reachable from script as `Error`.
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
    /// Engine-detected inconsistencies surfaced to script (e.g. too much
    /// recursion in legacy embeddings).
    InternalError,
    #[strum(serialize = "URIError")]
    UriError,
    EvalError,
    AggregateError,
    /// Wrapper kind for non-script host failures surfaced into the error
    /// reporter. Never constructible from script.
    HostError,
}

impl ErrorKind {
    /// Returns the script-visible constructor name for this kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A source position within a compiled script (1-based line, 0-based column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One frame of context captured while an error unwinds the frame stack.
///
/// Function and URL names are interned ids; they are resolved against the
/// interns table when the error is converted to a public `Exception`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStackFrame {
    /// Name of the running function, or the empty string for top-level code.
    pub function: StringId,
    /// Source URL of the descriptor the frame was executing.
    pub url: StringId,
    /// Position of the faulting or calling instruction.
    pub pos: SourcePos,
}

/// A runtime-raised error in unmaterialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRaise {
    pub kind: ErrorKind,
    pub message: Option<String>,
    /// Frames captured innermost-first while unwinding.
    pub frames: Vec<RawStackFrame>,
}

impl ErrorRaise {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            frames: Vec::new(),
        }
    }

    /// Appends an unwound frame. Frames accumulate innermost-first as the
    /// dispatch loop pops frames looking for a handler.
    pub fn push_frame(&mut self, frame: RawStackFrame) {
        self.frames.push(frame);
    }
}

/// A value thrown by script (`throw expr`), plus unwind context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrownValue {
    pub value: Value,
    pub frames: Vec<RawStackFrame>,
}

/// An error propagating through the dispatch loop.
#[derive(Debug)]
pub enum RunError {
    /// Runtime-raised error (TypeError and friends). Catchable.
    Raise(Box<ErrorRaise>),
    /// Arbitrary value thrown by script. Catchable.
    Thrown(Box<ThrownValue>),
    /// Resource-limit failure or host interrupt. Runs `finally` blocks but
    /// skips `catch` handlers.
    Resource(ResourceError),
    /// Engine invariant violation (malformed descriptor, impossible state).
    /// Never catchable; indicates a bug in the compiler or the engine.
    Internal(String),
}

impl RunError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Raise(Box::new(ErrorRaise::new(ErrorKind::TypeError, msg)))
    }

    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::Raise(Box::new(ErrorRaise::new(ErrorKind::RangeError, msg)))
    }

    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::Raise(Box::new(ErrorRaise::new(ErrorKind::ReferenceError, msg)))
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::Raise(Box::new(ErrorRaise::new(ErrorKind::SyntaxError, msg)))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wraps a script-thrown value.
    pub fn thrown(value: Value) -> Self {
        Self::Thrown(Box::new(ThrownValue {
            value,
            frames: Vec::new(),
        }))
    }

    /// Returns true when a script `catch` clause may bind this error.
    ///
    /// Resource and internal failures still run `finally` blocks on their
    /// way out, but no handler can observe them.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Raise(_) | Self::Thrown(_))
    }

    /// Appends an unwound frame to catchable errors; resource and internal
    /// errors keep no script context.
    pub fn push_frame(&mut self, frame: RawStackFrame) {
        match self {
            Self::Raise(raise) => raise.push_frame(frame),
            Self::Thrown(thrown) => thrown.frames.push(frame),
            Self::Resource(_) | Self::Internal(_) => {}
        }
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_script_constructors() {
        assert_eq!(ErrorKind::TypeError.name(), "TypeError");
        assert_eq!(ErrorKind::UriError.name(), "URIError");
        assert_eq!(ErrorKind::ReferenceError.to_string(), "ReferenceError");
        assert_eq!("RangeError".parse::<ErrorKind>().unwrap(), ErrorKind::RangeError);
    }

    #[test]
    fn catchability_split() {
        assert!(RunError::type_error("x").is_catchable());
        assert!(RunError::thrown(Value::Int(3)).is_catchable());
        assert!(!RunError::internal("bug").is_catchable());
    }
}
