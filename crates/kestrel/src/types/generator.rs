//! Generator and async-function suspension state.
//!
//! A suspended generator is a data record: the captured frame (pc, operand
//! stack, locals, scope, `this`) plus a state tag. Resumption is a pure
//! function of `(frame, resume kind, value)` driven by the VM; no host
//! coroutine facility is involved.

use serde::{Deserialize, Serialize};

use crate::{heap::HeapId, intern::FunctionId, value::Value};

/// Generator execution state.
///
/// ```text
///         create -> SuspendedStart
/// SuspendedStart --next-> Executing --yield-> SuspendedYield
/// SuspendedYield --next/throw/return-> Executing
/// Executing --return/normal-end-> Completed
/// Executing --exception-> Completed
/// SuspendedStart --return/throw-> Completed
/// ```
///
/// Resuming an `Executing` generator raises `TypeError`; `Completed` is
/// terminal and further `next()` calls yield `{value: undefined, done: true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum GeneratorState {
    /// Created but not yet started; the body has not run at all.
    SuspendedStart,
    /// Suspended at a `yield` expression.
    SuspendedYield,
    /// Currently running; guards against reentrant resumption.
    Executing,
    /// Finished (returned, threw, or was closed).
    Completed,
}

/// A captured execution frame, sufficient to resume exactly where the
/// function suspended.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FrameSnapshot {
    /// Descriptor the frame executes.
    pub descriptor: FunctionId,
    /// Instruction offset to resume at.
    pub pc: u32,
    /// This frame's segment of the operand stack.
    pub stack: Vec<Value>,
    /// Local slots (exception temporaries, finally return addresses).
    pub locals: Vec<Value>,
    /// Current scope at the suspension point.
    pub scope: HeapId,
    /// The frame's `this` binding.
    pub this: Value,
}

impl FrameSnapshot {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        for value in self.stack.iter().chain(self.locals.iter()) {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
        push(self.scope);
        if let Some(id) = self.this.ref_id() {
            push(id);
        }
    }
}

/// How a suspended frame is being resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ResumeKind {
    /// `next(value)`: the value becomes the result of the suspended
    /// `yield`/`await` expression.
    Next,
    /// `throw(value)`: the value is thrown at the suspension point.
    Throw,
    /// `return(value)`: a return completion is injected at the suspension
    /// point, running intervening `finally` blocks.
    Return,
}

/// Internal slots of a generator object (sync or async).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GeneratorRecord {
    /// The generator function this object was created from.
    pub function: HeapId,
    pub state: GeneratorState,
    /// Captured frame; present iff state is one of the suspended states.
    pub frame: Option<FrameSnapshot>,
    /// Active `yield*` delegate iterator, if any.
    pub delegate: Option<Value>,
    /// Distinguishes natural exhaustion (`done` from the body returning)
    /// from external close via `return()`.
    pub done_naturally: bool,
    /// True for async generators: resumption results are delivered through
    /// promises and delegates are wrapped when they lack `@@asyncIterator`.
    pub is_async: bool,
    /// Async generators: the promise for the in-flight `next()`/`return()`
    /// /`throw()` call, settled when the resume yields or finishes.
    pub pending_next: Option<HeapId>,
    /// Async generators: set while suspended at an `await` rather than a
    /// `yield`, so the resume machinery knows not to settle `pending_next`.
    pub awaiting: bool,
}

impl GeneratorRecord {
    pub fn new(function: HeapId, frame: FrameSnapshot, is_async: bool) -> Self {
        Self {
            function,
            state: GeneratorState::SuspendedStart,
            frame: Some(frame),
            delegate: None,
            done_naturally: false,
            is_async,
            pending_next: None,
            awaiting: false,
        }
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        push(self.function);
        if let Some(frame) = &self.frame {
            frame.trace(push);
        }
        if let Some(delegate) = &self.delegate
            && let Some(id) = delegate.ref_id()
        {
            push(id);
        }
        if let Some(pending) = self.pending_next {
            push(pending);
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.frame
            .as_ref()
            .map_or(0, |f| (f.stack.len() + f.locals.len()) * std::mem::size_of::<Value>())
    }
}

/// Internal slots of a suspended async function.
///
/// Unlike generators, async state is not script-visible; the object exists
/// only so the suspension survives on the heap between microtasks.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AsyncState {
    /// Captured frame; `None` while the function is running or after it
    /// settled its promise.
    pub frame: Option<FrameSnapshot>,
    /// The promise returned from the async call, settled when the body
    /// completes.
    pub promise: HeapId,
}

impl AsyncState {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        if let Some(frame) = &self.frame {
            frame.trace(push);
        }
        push(self.promise);
    }

    pub fn estimate_size(&self) -> usize {
        self.frame
            .as_ref()
            .map_or(0, |f| (f.stack.len() + f.locals.len()) * std::mem::size_of::<Value>())
    }
}
