//! Public, host-facing exception form.
//!
//! Inside the engine errors travel as [`RunError`](crate::error::RunError);
//! at the host boundary they are resolved against the interns table into an
//! owned [`Exception`] with kind, message, source location, and the stack
//! captured at throw time.

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::error::ErrorKind;

use crate::{
    coerce::to_string_primitive,
    error::RunError,
    heap::Heap,
    intern::{Interns, StaticStrings, StringId},
    resource::ResourceTracker,
    value::Value,
};

/// Source location of a throw or call site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeLoc {
    /// Source URL of the descriptor.
    pub url: String,
    /// 1-based line; 0 when unknown.
    pub line: u32,
    /// 0-based column; 0 when unknown.
    pub column: u32,
}

/// One script frame of a captured stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name, or `<top-level>`.
    pub function: String,
    pub loc: CodeLoc,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} ({}:{})", self.function, self.loc.url, self.loc.line)
    }
}

/// An error surfaced across the host boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub kind: ErrorKind,
    pub message: String,
    /// Location of the original throw, when known.
    pub loc: Option<CodeLoc>,
    /// Script frames, innermost first.
    pub stack: Vec<StackFrame>,
}

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            stack: Vec::new(),
        }
    }

    /// Public form of a script-thrown value without frame context (used
    /// for unhandled rejection reports).
    pub(crate) fn from_thrown_value<T: ResourceTracker>(value: &Value, heap: &Heap<T>, interns: &Interns) -> Self {
        let (kind, message) = thrown_summary(value, heap, interns);
        Self::new(kind, message)
    }

    /// Resolves an engine error into its public form.
    ///
    /// Thrown error objects contribute their own `name`/`message`
    /// properties; other thrown values stringify as the message of a
    /// generic `Error`.
    pub(crate) fn from_run_error<T: ResourceTracker>(
        error: RunError,
        heap: &Heap<T>,
        interns: &Interns,
    ) -> Self {
        match error {
            RunError::Raise(raise) => {
                let mut exception = Self::new(raise.kind, raise.message.unwrap_or_default());
                exception.stack = raise
                    .frames
                    .iter()
                    .map(|frame| StackFrame {
                        function: interns.get_str(frame.function).to_owned(),
                        loc: CodeLoc {
                            url: interns.get_str(frame.url).to_owned(),
                            line: frame.pos.line,
                            column: frame.pos.column,
                        },
                    })
                    .collect();
                exception.loc = exception.stack.first().map(|frame| frame.loc.clone());
                exception
            }
            RunError::Thrown(thrown) => {
                let (kind, message) = thrown_summary(&thrown.value, heap, interns);
                let mut exception = Self::new(kind, message);
                exception.stack = thrown
                    .frames
                    .iter()
                    .map(|frame| StackFrame {
                        function: interns.get_str(frame.function).to_owned(),
                        loc: CodeLoc {
                            url: interns.get_str(frame.url).to_owned(),
                            line: frame.pos.line,
                            column: frame.pos.column,
                        },
                    })
                    .collect();
                exception.loc = exception.stack.first().map(|frame| frame.loc.clone());
                exception
            }
            RunError::Resource(resource) => Self::new(ErrorKind::HostError, resource.to_string()),
            RunError::Internal(message) => Self::new(ErrorKind::InternalError, message),
        }
    }
}

/// Extracts (kind, message) from a thrown value: error objects report
/// their kind and `message` property, other values stringify.
fn thrown_summary<T: ResourceTracker>(value: &Value, heap: &Heap<T>, interns: &Interns) -> (ErrorKind, String) {
    use crate::property::{ObjectKind, PropertyKey};

    if let Some(id) = value.ref_id()
        && let crate::heap::HeapData::Object(obj) = heap.get(id)
        && let ObjectKind::Error(kind) = &obj.kind
    {
        let message_key = PropertyKey::Str(StringId::from(StaticStrings::Message));
        let message = obj
            .get_data(&message_key)
            .and_then(|v| to_string_primitive(v, heap, interns).ok())
            .unwrap_or_default();
        return (*kind, message);
    }
    let rendered = to_string_primitive(value, heap, interns).unwrap_or_else(|_| value.repr(heap, interns));
    (ErrorKind::Error, rendered)
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind.name())?;
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)?;
        }
        for frame in &self.stack {
            write!(f, "\n{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}
