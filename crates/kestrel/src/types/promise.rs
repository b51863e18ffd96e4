//! Promise state, reactions, and microtask jobs.
//!
//! Promise settlement never runs handlers inline: settling queues one job
//! per reaction onto the realm's FIFO microtask queue, which the host
//! surface drains after each top-level call completes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    heap::HeapId,
    types::generator::ResumeKind,
    value::Value,
};

/// Settlement state of a promise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// A registered reaction: what to call (or resume) when the promise
/// settles.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PromiseReaction {
    /// Handler for fulfillment; `None` passes the value through.
    pub on_fulfilled: Option<Value>,
    /// Handler for rejection; `None` re-throws into the derived promise.
    pub on_rejected: Option<Value>,
    /// Derived promise settled from the handler's result.
    pub derived: Option<HeapId>,
    /// Async-function state to resume instead of calling a handler.
    pub resume: Option<HeapId>,
}

impl PromiseReaction {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        for handler in [&self.on_fulfilled, &self.on_rejected].into_iter().flatten() {
            if let Some(id) = handler.ref_id() {
                push(id);
            }
        }
        if let Some(derived) = self.derived {
            push(derived);
        }
        if let Some(resume) = self.resume {
            push(resume);
        }
    }
}

/// Internal slots of a promise object.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PromiseData {
    pub state: PromiseState,
    /// Reactions registered while pending; drained into jobs on settlement.
    pub reactions: Vec<PromiseReaction>,
    /// True once any rejection handler was attached; unhandled rejections
    /// are reported to the host hook.
    pub handled: bool,
}

impl PromiseData {
    pub fn pending() -> Self {
        Self {
            state: PromiseState::Pending,
            reactions: Vec::new(),
            handled: false,
        }
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        match &self.state {
            PromiseState::Pending => {}
            PromiseState::Fulfilled(value) | PromiseState::Rejected(value) => {
                if let Some(id) = value.ref_id() {
                    push(id);
                }
            }
        }
        for reaction in &self.reactions {
            reaction.trace(push);
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.reactions.len() * std::mem::size_of::<PromiseReaction>()
    }
}

/// A queued microtask.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Job {
    /// Call a reaction handler with the settled value, then settle the
    /// derived promise from the result.
    Reaction {
        /// Handler to call; `None` passes through / re-throws.
        handler: Option<Value>,
        argument: Value,
        derived: Option<HeapId>,
        /// True when the settling promise rejected and no handler exists,
        /// so the derived promise rejects with the same reason.
        rejected: bool,
    },
    /// Resume a suspended async function with a settled value.
    ResumeAsync {
        state: HeapId,
        kind: ResumeKind,
        value: Value,
    },
}

impl Job {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        match self {
            Self::Reaction {
                handler,
                argument,
                derived,
                ..
            } => {
                if let Some(handler) = handler
                    && let Some(id) = handler.ref_id()
                {
                    push(id);
                }
                if let Some(id) = argument.ref_id() {
                    push(id);
                }
                if let Some(derived) = derived {
                    push(*derived);
                }
            }
            Self::ResumeAsync { state, value, .. } => {
                push(*state);
                if let Some(id) = value.ref_id() {
                    push(id);
                }
            }
        }
    }
}

/// FIFO microtask queue owned by the realm.
pub(crate) type JobQueue = VecDeque<Job>;
