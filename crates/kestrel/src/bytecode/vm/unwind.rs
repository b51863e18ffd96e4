//! Exception unwinding and completion transfer.
//!
//! A throw searches the running frame's exception table for the innermost
//! range covering the faulting pc. Catch targets receive the materialized
//! exception in a frame-local slot; finally targets receive an *unwind
//! marker* on the operand stack (consumed by `StartSub`) so `RetSub` can
//! re-dispatch the pending completion - rethrow, or continue a return -
//! after the finally body runs. Frames without a matching range pop,
//! contributing a stack-trace entry, until the error leaves `run_until`.
//!
//! Uncatchable errors (host interrupts, resource exhaustion) run finally
//! blocks but skip catch handlers; the original error is parked in
//! `pending_uncatchable` while the finally body executes.

use crate::{
    error::{RawStackFrame, RunError, RunResult, SourcePos},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    property::{ClassTag, JsObject, ObjectKind, PropertyKey, PropertySlot},
    resource::ResourceTracker,
    exception::ErrorKind,
    tracer::VmTracer,
    value::Value,
};

use super::Vm;

/// What a handled throw left behind.
enum Transfer {
    /// Transfer to a catch handler: bind the exception in a local slot.
    Catch { target: u32, slot: u16 },
    /// Transfer to a finally block with an unwind marker.
    Finally { target: u32 },
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Dispatches an in-flight error.
    ///
    /// `Ok(None)`: a handler took over, continue the loop. `Ok(Some(v))`:
    /// the unwind settled an async frame sitting exactly at `base`; the
    /// nested run returns `v`. `Err`: no handler below `base`, propagate.
    pub(crate) fn handle_throw(&mut self, mut err: RunError, base: usize) -> RunResult<Option<Value>> {
        let mut first = true;
        loop {
            if self.frames.len() == base {
                return Err(err);
            }

            let pc = if first {
                self.instruction_pc as u32
            } else {
                // Outer frames sit just past their call instruction.
                (self.frame().pc.saturating_sub(1)) as u32
            };
            first = false;

            if let Some(transfer) = self.find_transfer(pc, err.is_catchable()) {
                let stack_base = self.frame().stack_base;
                self.stack.truncate(stack_base);
                match transfer {
                    Transfer::Catch { target, slot } => {
                        let exception = self.error_to_value(err)?;
                        self.frame_mut().locals[usize::from(slot)] = exception;
                        self.frame_mut().pc = target as usize;
                    }
                    Transfer::Finally { target } => {
                        if err.is_catchable() {
                            let exception = self.error_to_value(err)?;
                            self.push(exception);
                        } else {
                            self.pending_uncatchable = Some(err);
                            self.push(Value::Undefined);
                        }
                        // StartSub at the finally entry stores this marker
                        // in the designated slot; RetSub rethrows.
                        self.push(Value::NotFound);
                        self.frame_mut().pc = target as usize;
                    }
                }
                return Ok(None);
            }

            // No handler in this frame: record it and pop.
            err.push_frame(self.raw_frame_at(pc));
            let frame = self.frames.pop().expect("unwind without a frame");
            self.tracer.on_frame(self.frames.len(), false);
            self.stack.truncate(frame.stack_base);

            if let Some(gen_id) = frame.generator {
                self.finish_generator(gen_id, false);
            }
            if let Some(state_id) = frame.async_state
                && err.is_catchable()
            {
                // Async bodies convert throws into promise rejections.
                let promise = match &self.realm.heap.object(state_id).kind {
                    ObjectKind::AsyncState(state) => state.promise,
                    _ => return Err(RunError::internal("async frame without async state")),
                };
                let reason = self.error_to_value(err)?;
                self.settle_promise(promise, false, reason)?;
                if self.frames.len() == base {
                    return Ok(Some(Value::Ref(promise)));
                }
                self.push(Value::Ref(promise));
                return Ok(None);
            }
        }
    }

    /// Innermost exception entry for `pc` compatible with the error's
    /// catchability: uncatchable errors only ever transfer to finally
    /// blocks.
    fn find_transfer(&self, pc: u32, catchable: bool) -> Option<Transfer> {
        let code = &self.frame().code;
        let mut best: Option<(u32, Transfer)> = None;
        for entry in &code.exception_table {
            if !(entry.start <= pc && pc < entry.end) {
                continue;
            }
            let transfer = if catchable && entry.handler.is_some() {
                Transfer::Catch {
                    target: entry.handler.expect("just checked"),
                    slot: entry.slot,
                }
            } else if let Some(finally) = entry.finally {
                Transfer::Finally { target: finally }
            } else {
                continue;
            };
            if best.as_ref().is_none_or(|(start, _)| entry.start >= *start) {
                best = Some((entry.start, transfer));
            }
        }
        best.map(|(_, transfer)| transfer)
    }

    /// Injects a return completion at the current pc: intervening finally
    /// blocks run first, then the frame pops with `value`.
    pub(crate) fn unwind_return(&mut self, value: Value, base: usize) -> RunResult<Option<Value>> {
        let pc = self.instruction_pc as u32;
        let code = &self.frame().code;
        let mut best: Option<(u32, u32)> = None;
        for entry in &code.exception_table {
            if entry.start <= pc && pc < entry.end
                && let Some(finally) = entry.finally
                && best.as_ref().is_none_or(|(start, _)| entry.start >= *start)
            {
                best = Some((entry.start, finally));
            }
        }
        if let Some((_, target)) = best {
            let stack_base = self.frame().stack_base;
            self.stack.truncate(stack_base);
            self.push(value);
            // The TDZ sentinel doubles as the return-completion marker;
            // RetSub resumes the return when it finds it in the slot.
            self.push(Value::Uninit);
            self.frame_mut().pc = target as usize;
            return Ok(None);
        }
        self.return_from_frame(value, base)
    }

    // ---- error materialization -------------------------------------------

    /// Stack-trace entry for the running frame at `pc`.
    fn raw_frame_at(&self, pc: u32) -> RawStackFrame {
        let code = &self.frame().code;
        RawStackFrame {
            function: code.display_name(),
            url: code.source_url(),
            pos: SourcePos::new(code.line_for_pc(pc), 0),
        }
    }

    /// Converts a catchable error into the value a `catch` clause binds:
    /// thrown values pass through, runtime raises materialize into error
    /// objects with a captured stack.
    pub(crate) fn error_to_value(&mut self, err: RunError) -> RunResult<Value> {
        match err {
            RunError::Thrown(thrown) => Ok(thrown.value),
            RunError::Raise(raise) => {
                let message = raise.message.clone().unwrap_or_default();
                let id = self.new_error_object(raise.kind, &message, &raise.frames)?;
                Ok(Value::Ref(id))
            }
            other => Err(other),
        }
    }

    /// Builds a script-visible error object: kind prototype, `message`,
    /// and a `stack` string from the recorded and live frames.
    pub(crate) fn new_error_object(
        &mut self,
        kind: ErrorKind,
        message: &str,
        recorded: &[RawStackFrame],
    ) -> RunResult<HeapId> {
        let proto = self.realm.intrinsics.error_proto_for(kind);
        let mut obj = JsObject::with_kind(Some(proto), ClassTag::Error, ObjectKind::Error(kind));

        if !message.is_empty() {
            let message_value = self.realm.heap.alloc_string(message.to_owned())?;
            obj.insert_slot(
                PropertyKey::Str(StringId::from(StaticStrings::Message)),
                PropertySlot::method(Value::Ref(message_value)),
            );
        }

        let stack_text = self.build_stack_string(kind, message, recorded);
        let stack_value = self.realm.heap.alloc_string(stack_text)?;
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Stack)),
            PropertySlot::method(Value::Ref(stack_value)),
        );

        self.alloc(HeapData::Object(obj))
    }

    /// `Kind: message` followed by one `    at fn (url:line)` line per
    /// frame, innermost first: frames recorded while unwinding, then the
    /// live frame chain.
    fn build_stack_string(&self, kind: ErrorKind, message: &str, recorded: &[RawStackFrame]) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        if message.is_empty() {
            let _ = write!(out, "{}", kind.name());
        } else {
            let _ = write!(out, "{}: {message}", kind.name());
        }
        for frame in recorded {
            let _ = write!(
                out,
                "\n    at {} ({}:{})",
                self.realm.interns.get_str(frame.function),
                self.realm.interns.get_str(frame.url),
                frame.pos.line,
            );
        }
        for frame in self.frames.iter().rev() {
            let line = frame.code.line_for_pc(frame.pc as u32);
            let _ = write!(
                out,
                "\n    at {} ({}:{})",
                self.realm.interns.get_str(frame.code.display_name()),
                self.realm.interns.get_str(frame.code.source_url()),
                line,
            );
        }
        out
    }
}
