//! Generator and async suspension, resumption, and promise plumbing.
//!
//! Suspension captures the running frame into a heap record; resumption is
//! a pure function of `(saved frame, resume kind, value)` that restores
//! the frame into a nested run. Async functions park their frame in an
//! [`AsyncState`] and are resumed by microtask jobs when the awaited
//! promise settles; async generators combine both records and settle the
//! promise of the in-flight `next()` when the resume reaches a `yield` or
//! completes.

use std::sync::Arc;

use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId, WellKnownSymbol},
    property::{ClassTag, JsObject, ObjectKind, PropertyKey, PropertySlot},
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        generator::{FrameSnapshot, GeneratorRecord, GeneratorState, ResumeKind},
        promise::{Job, PromiseReaction, PromiseState},
    },
    value::Value,
};

use super::{CallFrame, Vm};

/// How a generator resume ended.
#[derive(Debug)]
pub(crate) enum ResumeOutcome {
    /// Suspended at a `yield` with this value.
    Yielded(Value),
    /// The body finished (returned or was closed) with this value.
    Returned(Value),
    /// Suspended at an `await`; a microtask will resume it.
    Awaited,
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    fn generator_record(&self, gen_id: HeapId) -> RunResult<&GeneratorRecord> {
        match &self.realm.heap.object(gen_id).kind {
            ObjectKind::Generator(record) => Ok(record),
            _ => Err(RunError::type_error("receiver is not a generator")),
        }
    }

    fn generator_record_mut(&mut self, gen_id: HeapId) -> RunResult<&mut GeneratorRecord> {
        match &mut self.realm.heap.object_mut(gen_id).kind {
            ObjectKind::Generator(record) => Ok(record),
            _ => Err(RunError::type_error("receiver is not a generator")),
        }
    }

    /// Captures the top frame as a snapshot, popping it. The stack segment
    /// above the frame's base travels with the snapshot.
    fn capture_top_frame(&mut self) -> FrameSnapshot {
        let frame = self.frames.pop().expect("capture without a frame");
        self.tracer.on_frame(self.frames.len(), false);
        let stack = self.stack.split_off(frame.stack_base);
        FrameSnapshot {
            descriptor: frame.descriptor,
            pc: frame.pc as u32,
            stack,
            locals: frame.locals,
            scope: frame.scope,
            this: frame.this,
        }
    }

    /// Restores a snapshot as the running frame.
    fn restore_snapshot(
        &mut self,
        snapshot: FrameSnapshot,
        function: Option<HeapId>,
        generator: Option<HeapId>,
        async_state: Option<HeapId>,
    ) -> RunResult<()> {
        let code = Arc::clone(self.realm.interns.code(snapshot.descriptor));
        let stack_base = self.stack.len();
        self.stack.extend(snapshot.stack);
        let frame = CallFrame {
            code,
            descriptor: snapshot.descriptor,
            pc: snapshot.pc as usize,
            stack_base,
            locals: snapshot.locals,
            scope: snapshot.scope,
            this: snapshot.this,
            function,
            generator,
            async_state,
            new_target: Value::Undefined,
            result: Value::Undefined,
        };
        self.push_frame(frame)
    }

    // ---- generator creation and suspension -------------------------------

    /// `MakeGenerator`: the first opcode of every generator body. Captures
    /// the freshly pushed frame into a new generator object; the caller
    /// receives the object instead of running the body.
    pub(crate) fn op_make_generator(&mut self) -> RunResult<Value> {
        let function = self
            .frame()
            .function
            .ok_or_else(|| RunError::internal("MakeGenerator outside a function"))?;
        let is_async = self.frame().code.flags().is_async;
        let snapshot = self.capture_top_frame();

        // The instance prototype comes from the function's `prototype`
        // property, falling back to the intrinsic generator prototype.
        let proto_key = PropertyKey::Str(StringId::from(StaticStrings::Prototype));
        let proto = self
            .realm
            .heap
            .object(function)
            .get_data(&proto_key)
            .and_then(Value::ref_id)
            .unwrap_or(self.realm.intrinsics.generator_proto);

        let tag = if is_async { ClassTag::AsyncGenerator } else { ClassTag::Generator };
        let record = GeneratorRecord::new(function, snapshot, is_async);
        let obj = JsObject::with_kind(Some(proto), tag, ObjectKind::Generator(Box::new(record)));
        let id = self.alloc(HeapData::Object(obj))?;
        Ok(Value::Ref(id))
    }

    /// `Yield`: capture the generator frame and hand the value to the
    /// resumer.
    pub(crate) fn op_yield(&mut self, _value: Value) -> RunResult<()> {
        let gen_id = self
            .frame()
            .generator
            .ok_or_else(|| RunError::internal("yield outside a generator body"))?;
        let snapshot = self.capture_top_frame();
        let record = self.generator_record_mut(gen_id)?;
        record.state = GeneratorState::SuspendedYield;
        record.awaiting = false;
        record.frame = Some(snapshot);
        Ok(())
    }

    /// `Await` in a plain async function: park the frame in its
    /// [`AsyncState`] and resume when the promise settles. Returns the
    /// async function's promise so the initial synchronous segment can
    /// hand it to the caller.
    pub(crate) fn op_await(&mut self, awaited: Value) -> RunResult<Value> {
        if let Some(gen_id) = self.frame().generator {
            return self.op_await_in_generator(awaited, gen_id);
        }
        let state_id = self
            .frame()
            .async_state
            .ok_or_else(|| RunError::internal("await outside an async function"))?;

        let promise = self.promise_of_value(awaited)?;
        self.add_reaction(
            promise,
            PromiseReaction {
                on_fulfilled: None,
                on_rejected: None,
                derived: None,
                resume: Some(state_id),
            },
        )?;

        let snapshot = self.capture_top_frame();
        let result_promise = match &mut self.realm.heap.object_mut(state_id).kind {
            ObjectKind::AsyncState(state) => {
                state.frame = Some(snapshot);
                state.promise
            }
            _ => return Err(RunError::internal("async frame without async state")),
        };
        Ok(Value::Ref(result_promise))
    }

    /// `Await` inside an async generator: suspend the generator frame with
    /// the awaiting flag so the in-flight `next()` promise stays pending.
    fn op_await_in_generator(&mut self, awaited: Value, gen_id: HeapId) -> RunResult<Value> {
        let promise = self.promise_of_value(awaited)?;
        self.add_reaction(
            promise,
            PromiseReaction {
                on_fulfilled: None,
                on_rejected: None,
                derived: None,
                resume: Some(gen_id),
            },
        )?;
        let snapshot = self.capture_top_frame();
        let record = self.generator_record_mut(gen_id)?;
        record.state = GeneratorState::SuspendedYield;
        record.awaiting = true;
        record.frame = Some(snapshot);
        Ok(Value::Undefined)
    }

    // ---- resumption ------------------------------------------------------

    /// Resumes a generator with `(kind, value)`, driving delegation and
    /// the saved frame. This is the single entry point behind
    /// `next`/`return`/`throw` and the async-generator step machinery.
    pub(crate) fn resume_generator(
        &mut self,
        gen_id: HeapId,
        kind: ResumeKind,
        value: Value,
    ) -> RunResult<ResumeOutcome> {
        let state = self.generator_record(gen_id)?.state;
        match state {
            GeneratorState::Executing => {
                return Err(RunError::type_error("generator is already running"));
            }
            GeneratorState::Completed => {
                return match kind {
                    ResumeKind::Next => Ok(ResumeOutcome::Returned(Value::Undefined)),
                    ResumeKind::Return => Ok(ResumeOutcome::Returned(value)),
                    ResumeKind::Throw => Err(RunError::thrown(value)),
                };
            }
            GeneratorState::SuspendedStart => match kind {
                ResumeKind::Return => {
                    self.finish_generator(gen_id, false);
                    return Ok(ResumeOutcome::Returned(value));
                }
                ResumeKind::Throw => {
                    self.finish_generator(gen_id, false);
                    return Err(RunError::thrown(value));
                }
                ResumeKind::Next => {}
            },
            GeneratorState::SuspendedYield => {}
        }

        // An active yield* delegate intercepts the resumption.
        let has_delegate = self.generator_record(gen_id)?.delegate.is_some();
        if has_delegate && state == GeneratorState::SuspendedYield {
            return self.resume_into_delegate(gen_id, kind, value);
        }

        self.restore_generator_frame(gen_id, state, kind, value)
    }

    /// Restores the saved frame and runs it to the next suspension point.
    fn restore_generator_frame(
        &mut self,
        gen_id: HeapId,
        state: GeneratorState,
        kind: ResumeKind,
        value: Value,
    ) -> RunResult<ResumeOutcome> {
        let (snapshot, function) = {
            let record = self.generator_record_mut(gen_id)?;
            let snapshot = record
                .frame
                .take()
                .ok_or_else(|| RunError::internal("suspended generator lost its frame"))?;
            record.state = GeneratorState::Executing;
            record.awaiting = false;
            (snapshot, record.function)
        };

        let base = self.frames.len();
        self.restore_snapshot(snapshot, Some(function), Some(gen_id), None)?;

        match kind {
            ResumeKind::Next => {
                // The resumed value becomes the result of the suspended
                // yield/await; a fresh body has no pending expression.
                if state == GeneratorState::SuspendedYield {
                    self.push(value);
                }
            }
            ResumeKind::Throw => {
                match self.handle_throw(RunError::thrown(value), base) {
                    Ok(None) => {}
                    Ok(Some(result)) => return Ok(ResumeOutcome::Returned(result)),
                    Err(err) => return Err(err),
                }
            }
            ResumeKind::Return => match self.unwind_return(value, base) {
                Ok(None) => {}
                Ok(Some(result)) => return Ok(ResumeOutcome::Returned(result)),
                Err(err) => return Err(err),
            },
        }

        let result = self.run_until(base)?;
        self.classify_resume(gen_id, result)
    }

    fn classify_resume(&mut self, gen_id: HeapId, result: Value) -> RunResult<ResumeOutcome> {
        let record = self.generator_record(gen_id)?;
        Ok(match record.state {
            GeneratorState::Completed => ResumeOutcome::Returned(result),
            _ if record.awaiting => ResumeOutcome::Awaited,
            _ => ResumeOutcome::Yielded(result),
        })
    }

    // ---- yield* delegation -----------------------------------------------

    /// `YieldStar`: start delegating to an iterable. `Ok(Some(v))` means
    /// the delegate yielded and the generator suspended; `Ok(None)` means
    /// the delegate finished immediately and its completion value is on
    /// the stack.
    pub(crate) fn op_yield_star(&mut self, iterable: Value) -> RunResult<Option<Value>> {
        let gen_id = self
            .frame()
            .generator
            .ok_or_else(|| RunError::internal("yield* outside a generator body"))?;
        let is_async = self.generator_record(gen_id)?.is_async;

        let iterator = if is_async {
            self.async_iterator_of(iterable)?
        } else {
            self.call_iterator(iterable)?
        };

        let (value, done) = self.delegate_next(iterator.clone(), ResumeKind::Next, Value::Undefined)?;
        if done {
            self.push(value);
            return Ok(None);
        }

        // Suspend with the delegate recorded; resumes route through it.
        let snapshot = self.capture_top_frame();
        let record = self.generator_record_mut(gen_id)?;
        record.delegate = Some(iterator);
        record.state = GeneratorState::SuspendedYield;
        record.frame = Some(snapshot);
        Ok(Some(value))
    }

    /// Routes a resumption into the active delegate. A `done` result ends
    /// the delegation and resumes the generator body with the completion
    /// value.
    fn resume_into_delegate(&mut self, gen_id: HeapId, kind: ResumeKind, value: Value) -> RunResult<ResumeOutcome> {
        let delegate = self
            .generator_record(gen_id)?
            .delegate
            .clone()
            .ok_or_else(|| RunError::internal("delegate resumption without a delegate"))?;

        let step = self.delegate_next(delegate.clone(), kind, value);
        match step {
            Ok((value, false)) => Ok(ResumeOutcome::Yielded(value)),
            Ok((value, true)) => {
                self.generator_record_mut(gen_id)?.delegate = None;
                match kind {
                    // A delegate finished by `return()` forwards the
                    // return completion through the generator's finallys.
                    ResumeKind::Return => self.restore_generator_frame(
                        gen_id,
                        GeneratorState::SuspendedYield,
                        ResumeKind::Return,
                        value,
                    ),
                    _ => self.restore_generator_frame(gen_id, GeneratorState::SuspendedYield, ResumeKind::Next, value),
                }
            }
            Err(err) => {
                self.generator_record_mut(gen_id)?.delegate = None;
                if err.is_catchable() {
                    // Deliver the failure at the yield* site so the body's
                    // try/catch can observe it.
                    let thrown = self.error_to_value(err)?;
                    self.restore_generator_frame(gen_id, GeneratorState::SuspendedYield, ResumeKind::Throw, thrown)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// One protocol step against a delegate iterator.
    fn delegate_next(&mut self, iterator: Value, kind: ResumeKind, value: Value) -> RunResult<(Value, bool)> {
        match kind {
            ResumeKind::Next => self.iter_next(iterator, Some(value)),
            ResumeKind::Throw => {
                let throw_fn = self.get_named_property(iterator.clone(), StringId::from(StaticStrings::Throw))?;
                if throw_fn.is_callable(&self.realm.heap) {
                    let result = self.call_value(throw_fn, iterator, &[value])?;
                    self.iter_result_parts(result)
                } else {
                    // Close the delegate, then report the protocol breach.
                    self.iter_close(iterator)?;
                    Err(RunError::type_error("iterator delegate has no throw method"))
                }
            }
            ResumeKind::Return => {
                let return_fn = self.get_named_property(iterator.clone(), StringId::from(StaticStrings::Return))?;
                if return_fn.is_callable(&self.realm.heap) {
                    let result = self.call_value(return_fn, iterator, &[value])?;
                    self.iter_result_parts(result)
                } else {
                    // No return method: the delegate just ends.
                    Ok((value, true))
                }
            }
        }
    }

    /// `@@asyncIterator`, wrapping sync iterators when the delegate lacks
    /// one.
    fn async_iterator_of(&mut self, iterable: Value) -> RunResult<Value> {
        let key = PropertyKey::Sym(WellKnownSymbol::AsyncIterator.id());
        let method = self.get_property_value(iterable.clone(), &key)?;
        if method.is_callable(&self.realm.heap) {
            let iterator = self.call_value(method, iterable, &[])?;
            if !self.is_object_value(&iterator) {
                return Err(RunError::type_error("@@asyncIterator returned a non-object"));
            }
            return Ok(iterator);
        }
        let sync = self.call_iterator(iterable)?;
        let obj = JsObject::with_kind(
            Some(self.realm.intrinsics.async_from_sync_proto),
            ClassTag::Object,
            ObjectKind::AsyncFromSync { inner: sync },
        );
        let id = self.alloc(HeapData::Object(obj))?;
        Ok(Value::Ref(id))
    }

    // ---- async state resumption ------------------------------------------

    /// Resumes a suspended async function from a settled promise.
    pub(crate) fn resume_async(&mut self, state_id: HeapId, kind: ResumeKind, value: Value) -> RunResult<()> {
        let snapshot = match &mut self.realm.heap.object_mut(state_id).kind {
            ObjectKind::AsyncState(state) => state.frame.take(),
            _ => return Err(RunError::internal("resume_async on a non-async state")),
        };
        let Some(snapshot) = snapshot else {
            // Already settled or never suspended; nothing to do.
            return Ok(());
        };

        let base = self.frames.len();
        self.restore_snapshot(snapshot, None, None, Some(state_id))?;
        match kind {
            ResumeKind::Next => self.push(value),
            ResumeKind::Throw => match self.handle_throw(RunError::thrown(value), base) {
                Ok(None) => {}
                Ok(Some(_)) => return Ok(()),
                Err(err) => return Err(err),
            },
            ResumeKind::Return => {
                return Err(RunError::internal("async functions are not resumed with return"));
            }
        }
        self.run_until(base)?;
        Ok(())
    }

    /// One resume step of an async generator, settling the in-flight
    /// `next()` promise when the step yields or finishes.
    pub(crate) fn async_generator_step(&mut self, gen_id: HeapId, kind: ResumeKind, value: Value) -> RunResult<()> {
        let pending = self.generator_record(gen_id)?.pending_next;
        match self.resume_generator(gen_id, kind, value) {
            Ok(ResumeOutcome::Yielded(v)) => {
                if let Some(promise) = pending {
                    self.generator_record_mut(gen_id)?.pending_next = None;
                    let result = self.make_iter_result(v, false)?;
                    self.settle_promise(promise, true, result)?;
                }
                Ok(())
            }
            Ok(ResumeOutcome::Returned(v)) => {
                if let Some(promise) = pending {
                    self.generator_record_mut(gen_id)?.pending_next = None;
                    let result = self.make_iter_result(v, true)?;
                    self.settle_promise(promise, true, result)?;
                }
                Ok(())
            }
            Ok(ResumeOutcome::Awaited) => Ok(()),
            Err(err) if err.is_catchable() => {
                if let Some(promise) = pending {
                    self.generator_record_mut(gen_id)?.pending_next = None;
                    let reason = self.error_to_value(err)?;
                    self.settle_promise(promise, false, reason)?;
                    Ok(())
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// `{value, done}` result object.
    pub(crate) fn make_iter_result(&mut self, value: Value, done: bool) -> RunResult<Value> {
        let mut obj = JsObject::plain(Some(self.realm.intrinsics.object_proto));
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Value)),
            PropertySlot::data(value),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Done)),
            PropertySlot::data(Value::Bool(done)),
        );
        let id = self.alloc(HeapData::Object(obj))?;
        Ok(Value::Ref(id))
    }

    // ---- promises ---------------------------------------------------------

    /// The promise for a value: promises pass through, anything else
    /// becomes an already-fulfilled promise. (Reactions on settled
    /// promises still go through the job queue, preserving ordering.)
    pub(crate) fn promise_of_value(&mut self, value: Value) -> RunResult<HeapId> {
        if let Some(id) = value.ref_id()
            && matches!(self.realm.heap.get(id), HeapData::Object(_))
            && matches!(self.realm.heap.object(id).kind, ObjectKind::Promise(_))
        {
            return Ok(id);
        }
        let promise = self.realm.new_promise()?;
        self.settle_promise(promise, true, value)?;
        Ok(promise)
    }

    /// Registers a reaction; settled promises queue the job immediately.
    pub(crate) fn add_reaction(&mut self, promise: HeapId, reaction: PromiseReaction) -> RunResult<()> {
        let handles_rejection = reaction.on_rejected.is_some() || reaction.resume.is_some();
        let job = {
            let ObjectKind::Promise(data) = &mut self.realm.heap.object_mut(promise).kind else {
                return Err(RunError::type_error("receiver is not a promise"));
            };
            if handles_rejection {
                data.handled = true;
            }
            match &data.state {
                PromiseState::Pending => {
                    data.reactions.push(reaction);
                    None
                }
                PromiseState::Fulfilled(value) => Some(reaction_to_job(reaction, value.clone(), false)),
                PromiseState::Rejected(value) => Some(reaction_to_job(reaction, value.clone(), true)),
            }
        };
        if handles_rejection {
            self.realm.pending_rejections.retain(|&id| id != promise);
        }
        if let Some(job) = job {
            self.realm.jobs.push_back(job);
        }
        Ok(())
    }

    /// Settles a promise (idempotent) and queues one job per registered
    /// reaction, FIFO.
    pub(crate) fn settle_promise(&mut self, promise: HeapId, fulfilled: bool, value: Value) -> RunResult<()> {
        let (reactions, handled) = {
            let ObjectKind::Promise(data) = &mut self.realm.heap.object_mut(promise).kind else {
                return Err(RunError::internal("settle on a non-promise"));
            };
            if !matches!(data.state, PromiseState::Pending) {
                return Ok(());
            }
            data.state = if fulfilled {
                PromiseState::Fulfilled(value.clone())
            } else {
                PromiseState::Rejected(value.clone())
            };
            (std::mem::take(&mut data.reactions), data.handled)
        };

        if !fulfilled && reactions.is_empty() && !handled {
            // Reported at drain end if no handler is attached by then.
            self.realm.pending_rejections.push(promise);
        }
        for reaction in reactions {
            let job = reaction_to_job(reaction, value.clone(), !fulfilled);
            self.realm.jobs.push_back(job);
        }
        Ok(())
    }

    /// Settles a derived promise from a handler result, chaining when the
    /// handler returned another promise.
    pub(crate) fn settle_derived(&mut self, derived: HeapId, result: Value) -> RunResult<()> {
        if let Some(id) = result.ref_id()
            && matches!(self.realm.heap.get(id), HeapData::Object(_))
            && matches!(self.realm.heap.object(id).kind, ObjectKind::Promise(_))
            && id != derived
        {
            return self.add_reaction(
                id,
                PromiseReaction {
                    on_fulfilled: None,
                    on_rejected: None,
                    derived: Some(derived),
                    resume: None,
                },
            );
        }
        self.settle_promise(derived, true, result)
    }

    /// Drains the realm's microtask queue to empty, FIFO, then reports
    /// rejections that never gained a handler. Called by the host surface
    /// after each top-level run completes.
    pub(crate) fn drain_jobs(&mut self) -> RunResult<()> {
        let result = self.drain_jobs_inner();
        self.report_pending_rejections();
        result
    }

    fn report_pending_rejections(&mut self) {
        for promise in std::mem::take(&mut self.realm.pending_rejections) {
            let reason = match &self.realm.heap.object(promise).kind {
                ObjectKind::Promise(data) => match (&data.state, data.handled) {
                    (PromiseState::Rejected(reason), false) => Some(reason.clone()),
                    _ => None,
                },
                _ => None,
            };
            if let Some(reason) = reason {
                self.realm.report_unhandled_rejection(&reason);
            }
        }
    }

    fn drain_jobs_inner(&mut self) -> RunResult<()> {
        while let Some(job) = self.realm.jobs.pop_front() {
            match job {
                Job::Reaction {
                    handler,
                    argument,
                    derived,
                    rejected,
                } => match handler {
                    Some(handler) => {
                        match self.call_value(handler, Value::Undefined, &[argument]) {
                            Ok(result) => {
                                if let Some(derived) = derived {
                                    self.settle_derived(derived, result)?;
                                }
                            }
                            Err(err) if err.is_catchable() => {
                                let reason = self.error_to_value(err)?;
                                match derived {
                                    Some(derived) => self.settle_promise(derived, false, reason)?,
                                    None => self.realm.report_unhandled_rejection(&reason),
                                }
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    None => {
                        // Pass-through reaction: forward the settlement.
                        if let Some(derived) = derived {
                            self.settle_promise(derived, !rejected, argument)?;
                        }
                    }
                },
                Job::ResumeAsync { state, kind, value } => {
                    let is_generator = matches!(self.realm.heap.object(state).kind, ObjectKind::Generator(_));
                    if is_generator {
                        self.async_generator_step(state, kind, value)?;
                    } else {
                        self.resume_async(state, kind, value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Converts a stored reaction into a queued job for a settlement.
fn reaction_to_job(reaction: PromiseReaction, value: Value, rejected: bool) -> Job {
    if let Some(state) = reaction.resume {
        return Job::ResumeAsync {
            state,
            kind: if rejected { ResumeKind::Throw } else { ResumeKind::Next },
            value,
        };
    }
    let handler = if rejected {
        reaction.on_rejected
    } else {
        reaction.on_fulfilled
    };
    Job::Reaction {
        handler,
        argument: value,
        derived: reaction.derived,
        rejected,
    }
}
