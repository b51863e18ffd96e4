//! Call and construct sequences.
//!
//! Script-to-script calls push a frame into the running loop. Everything
//! that must observe a completed result before continuing - natives,
//! bound-function unwrapping, proxy `apply`/`construct` traps, and object
//! construction with its return-value rules - runs the callee to
//! completion in a nested loop via [`Vm::call_value`].

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{FunctionId, StaticStrings, StringId},
    property::{ClassTag, JsObject, ObjectKind, PropertyKey, PropertySlot},
    regexp::{RegExpData, RegExpFlags},
    resource::ResourceTracker,
    scope::{Activation, Binding, Scope, ScopeKind},
    tracer::VmTracer,
    types::{
        function::{BoundFunction, FunctionData, NativeFunction},
        generator::AsyncState,
    },
    value::Value,
};

use super::{CallFrame, Vm};

/// Argument vector for call paths; most calls carry a handful of values.
pub(crate) type Args = SmallVec<[Value; 4]>;

/// Owned summary of a callee, extracted before any mutation so the heap
/// borrow ends ahead of the dispatch.
enum CallTarget {
    Script { fn_id: HeapId, is_ctor: bool },
    Native(NativeFunction),
    Bound {
        target: HeapId,
        bound_this: Value,
        bound_args: Vec<Value>,
    },
    CallableProxy(HeapId),
    NotCallable,
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    fn pop_args(&mut self, argc: u8) -> Args {
        let count = usize::from(argc);
        let start = self.stack.len() - count;
        self.stack.drain(start..).collect()
    }

    /// `Call`/`CallSpecial`/`TailCall`: `[fn, this, args..]` on the stack.
    pub(crate) fn op_call(&mut self, argc: u8, tail: bool) -> RunResult<()> {
        let args = self.pop_args(argc);
        let this = self.pop();
        let callee = self.pop();
        self.call_with_stack_result(callee, this, &args, tail)
    }

    /// `CallSpread`: `[fn, this, args_array]`.
    pub(crate) fn op_call_spread(&mut self) -> RunResult<()> {
        let spread = self.pop();
        let this = self.pop();
        let callee = self.pop();
        let args = self.array_to_args(spread)?;
        self.call_with_stack_result(callee, this, &args, false)
    }

    /// `CallOnSuper`: `[fn, args..]` with the frame's `this`.
    pub(crate) fn op_call_on_super(&mut self, argc: u8) -> RunResult<()> {
        let args = self.pop_args(argc);
        let callee = self.pop();
        let this = self.resolve_this()?;
        self.call_with_stack_result(callee, this, &args, false)
    }

    /// Shared body of the call opcodes: script callees enter the running
    /// loop as a pushed frame; everything else completes here and pushes
    /// its result.
    fn call_with_stack_result(&mut self, callee: Value, this: Value, args: &[Value], tail: bool) -> RunResult<()> {
        match self.call_target(&callee) {
            CallTarget::Script { is_ctor: true, .. } => Err(RunError::type_error(
                "class constructor cannot be invoked without 'new'",
            )),
            CallTarget::Script { fn_id, .. } => {
                if tail {
                    // The frame being replaced has already consumed its
                    // operands; drop it before pushing the replacement.
                    let old = self.frames.pop().expect("tail call without a frame");
                    self.tracer.on_frame(self.frames.len(), false);
                    self.stack.truncate(old.stack_base);
                }
                self.push_script_frame(fn_id, this, args, false)
            }
            CallTarget::NotCallable => self.not_a_function(&callee),
            _ => {
                let result = self.call_value(callee, this, args)?;
                self.push(result);
                Ok(())
            }
        }
    }

    /// Extracts an owned dispatch summary for a callee value.
    fn call_target(&self, callee: &Value) -> CallTarget {
        let Some(id) = callee.ref_id() else {
            return CallTarget::NotCallable;
        };
        if !matches!(self.realm.heap.get(id), HeapData::Object(_)) {
            return CallTarget::NotCallable;
        }
        match &self.realm.heap.object(id).kind {
            ObjectKind::Function(data) => CallTarget::Script {
                fn_id: id,
                is_ctor: self.realm.interns.code(data.descriptor).flags().is_ctor,
            },
            ObjectKind::Native(native) => CallTarget::Native(*native),
            ObjectKind::Bound(bound) => CallTarget::Bound {
                target: bound.target,
                bound_this: bound.bound_this.clone(),
                bound_args: bound.bound_args.clone(),
            },
            ObjectKind::Proxy { callable: true, .. } => CallTarget::CallableProxy(id),
            _ => CallTarget::NotCallable,
        }
    }

    fn not_a_function<R>(&self, callee: &Value) -> RunResult<R> {
        Err(RunError::type_error(format!(
            "{} is not a function",
            callee.repr(&self.realm.heap, &self.realm.interns)
        )))
    }

    /// Calls any callable and runs it to completion, returning its result.
    ///
    /// This is the protocol entry point used by accessors, coercions,
    /// iteration, promise reactions, and natives that call back into
    /// script.
    pub(crate) fn call_value(&mut self, callee: Value, this: Value, args: &[Value]) -> RunResult<Value> {
        match self.call_target(&callee) {
            CallTarget::Script { is_ctor: true, .. } => Err(RunError::type_error(
                "class constructor cannot be invoked without 'new'",
            )),
            CallTarget::Script { fn_id, .. } => {
                let base = self.frames.len();
                self.push_script_frame(fn_id, this, args, false)?;
                self.run_until(base)
            }
            CallTarget::Native(native) => self.dispatch_native(native, this, args, false),
            CallTarget::Bound {
                target,
                bound_this,
                mut bound_args,
            } => {
                bound_args.extend_from_slice(args);
                self.call_value(Value::Ref(target), bound_this, &bound_args)
            }
            CallTarget::CallableProxy(id) => self.proxy_apply(id, this, args),
            CallTarget::NotCallable => self.not_a_function(&callee),
        }
    }

    fn proxy_apply(&mut self, proxy_id: HeapId, this: Value, args: &[Value]) -> RunResult<Value> {
        let (target, handler) = match &self.realm.heap.object(proxy_id).kind {
            ObjectKind::Proxy {
                target,
                handler,
                revoked,
                ..
            } => {
                if *revoked {
                    return Err(RunError::type_error("cannot call a revoked proxy"));
                }
                (*target, *handler)
            }
            _ => return Err(RunError::internal("proxy apply on a non-proxy")),
        };
        let trap_name = self.realm.interns.intern("apply");
        let trap = self.get_named_property(Value::Ref(handler), trap_name)?;
        if trap.is_nullish() {
            return self.call_value(Value::Ref(target), this, args);
        }
        if !trap.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("proxy trap 'apply' is not a function"));
        }
        let args_array = self.args_to_array(args)?;
        self.call_value(trap, Value::Ref(handler), &[Value::Ref(target), this, args_array])
    }

    // ---- activation setup ------------------------------------------------

    /// Creates the activation scope and pushes the frame for a script
    /// function.
    pub(crate) fn push_script_frame(
        &mut self,
        fn_id: HeapId,
        this: Value,
        args: &[Value],
        construct_this_uninit: bool,
    ) -> RunResult<()> {
        self.push_script_frame_with_target(fn_id, this, args, construct_this_uninit, Value::Undefined)
    }

    /// As [`Self::push_script_frame`], threading `new.target` for
    /// construct invocations.
    pub(crate) fn push_script_frame_with_target(
        &mut self,
        fn_id: HeapId,
        this: Value,
        args: &[Value],
        construct_this_uninit: bool,
        new_target: Value,
    ) -> RunResult<()> {
        let (descriptor, parent_scope) = match &self.realm.heap.object(fn_id).kind {
            ObjectKind::Function(data) => (data.descriptor, data.scope),
            _ => return Err(RunError::internal("push_script_frame on a non-function")),
        };
        let code = Arc::clone(self.realm.interns.code(descriptor));
        let flags = code.flags();

        // `this` coercion: strict and arrow functions take it as passed;
        // sloppy functions replace a nullish receiver with the global
        // object.
        let bound_this = if construct_this_uninit {
            Value::Uninit
        } else if flags.arrow {
            Value::Undefined
        } else if !flags.strict && this.is_nullish() {
            Value::Ref(self.realm.global_object)
        } else {
            this
        };

        let mut activation = Activation {
            function: fn_id,
            args: args.to_vec(),
            bindings: indexmap::IndexMap::new(),
            strict: flags.strict,
            arrow: flags.arrow,
            this: bound_this,
            arguments_object: None,
        };

        // Bind formals; the rest parameter collects the overflow.
        let named = if flags.has_rest {
            code.params.len() - 1
        } else {
            code.params.len()
        };
        for (index, &param) in code.params.iter().take(named).enumerate() {
            let value = args.get(index).cloned().unwrap_or(Value::Undefined);
            activation.bindings.insert(param, Binding::param(value));
        }
        if flags.has_rest {
            let rest_name = *code.params.last().expect("rest flag implies a parameter");
            let rest: Vec<Value> = args.iter().skip(named).cloned().collect();
            let rest_array = self.realm.new_array_with(rest)?;
            activation.bindings.insert(rest_name, Binding::param(Value::Ref(rest_array)));
        }
        for &var in &code.vars {
            activation.bindings.entry(var).or_insert_with(|| Binding::var(Value::Undefined));
        }

        let scope = self.alloc(HeapData::Scope(Scope::activation(parent_scope, activation)))?;
        let locals = vec![Value::Undefined; usize::from(code.local_count)];

        // Plain async functions get their promise and suspension state up
        // front; async generators go through the generator object instead.
        let async_state = if flags.is_async && !flags.generator {
            let promise = self.realm.new_promise()?;
            let state = JsObject::with_kind(
                None,
                ClassTag::Object,
                ObjectKind::AsyncState(Box::new(AsyncState { frame: None, promise })),
            );
            Some(self.alloc(HeapData::Object(state))?)
        } else {
            None
        };

        let frame = CallFrame {
            code,
            descriptor,
            pc: 0,
            stack_base: self.stack.len(),
            locals,
            scope,
            this: Value::Undefined,
            function: Some(fn_id),
            generator: None,
            async_state,
            new_target,
            result: Value::Undefined,
        };
        self.push_frame(frame)
    }

    // ---- construction ----------------------------------------------------

    /// `New`: `[ctor, args..]`.
    pub(crate) fn op_new(&mut self, argc: u8) -> RunResult<()> {
        let args = self.pop_args(argc);
        let ctor = self.pop();
        let result = self.construct(ctor.clone(), &args, ctor)?;
        self.push(result);
        Ok(())
    }

    /// `NewSpread`: `[ctor, args_array]`.
    pub(crate) fn op_new_spread(&mut self) -> RunResult<()> {
        let spread = self.pop();
        let ctor = self.pop();
        let args = self.array_to_args(spread)?;
        let result = self.construct(ctor.clone(), &args, ctor)?;
        self.push(result);
        Ok(())
    }

    /// `[[Construct]]`. `new_target` carries the constructor whose
    /// `prototype` seeds the instance (differs from `ctor` under
    /// `super(...)`).
    pub(crate) fn construct(&mut self, ctor: Value, args: &[Value], new_target: Value) -> RunResult<Value> {
        let Some(ctor_id) = ctor.ref_id() else {
            return Err(RunError::type_error("value is not a constructor"));
        };
        if !matches!(self.realm.heap.get(ctor_id), HeapData::Object(_)) {
            return Err(RunError::type_error("value is not a constructor"));
        }

        // Copy out the dispatch summary before any mutation.
        enum ConstructKind {
            Bound { target: HeapId, bound_args: Vec<Value> },
            Proxy,
            Native(NativeFunction),
            Script { descriptor: FunctionId, has_class_info: bool },
            NotConstructible,
        }
        let kind = match &self.realm.heap.object(ctor_id).kind {
            ObjectKind::Bound(bound) => ConstructKind::Bound {
                target: bound.target,
                bound_args: bound.bound_args.clone(),
            },
            ObjectKind::Proxy { .. } => ConstructKind::Proxy,
            ObjectKind::Native(native) => ConstructKind::Native(*native),
            ObjectKind::Function(data) => ConstructKind::Script {
                descriptor: data.descriptor,
                has_class_info: data.class_info.is_some(),
            },
            _ => ConstructKind::NotConstructible,
        };

        match kind {
            ConstructKind::Bound { target, mut bound_args } => {
                // Bound functions construct iff their target does, with the
                // bound args pre-pended and the bound `this` ignored.
                bound_args.extend_from_slice(args);
                let new_target = if new_target.ref_id() == Some(ctor_id) {
                    Value::Ref(target)
                } else {
                    new_target
                };
                self.construct(Value::Ref(target), &bound_args, new_target)
            }
            ConstructKind::Proxy => self.proxy_construct(ctor_id, args, new_target),
            ConstructKind::Native(native) => self.dispatch_native(native, Value::Undefined, args, true),
            ConstructKind::Script { descriptor, has_class_info } => {
                let flags = self.realm.interns.code(descriptor).flags();
                if flags.arrow || flags.generator || flags.is_async {
                    return Err(RunError::type_error("value is not a constructor"));
                }
                let derived = flags.derived_ctor;

                // Derived constructors leave `this` unbound until
                // `super(...)`; everyone else gets a fresh instance now.
                let instance = if derived {
                    None
                } else {
                    let instance = self.ordinary_create_from_constructor(new_target.clone())?;
                    Some(instance)
                };

                if let (Some(instance), true) = (instance, has_class_info) {
                    self.initialize_instance(ctor_id, instance)?;
                }

                let base = self.frames.len();
                self.push_script_frame_with_target(
                    ctor_id,
                    instance.map_or(Value::Undefined, Value::Ref),
                    args,
                    derived,
                    new_target.clone(),
                )?;
                // The activation scope is the frame's scope; keep it to
                // read the final `this` after the body runs.
                let activation_scope = self.frame().scope;
                let result = self.run_until(base)?;

                let bound_this = match &self.realm.heap.scope(activation_scope).kind {
                    ScopeKind::Activation(activation) => activation.this.clone(),
                    _ => return Err(RunError::internal("constructor frame lost its activation")),
                };

                if self.is_object_value(&result) {
                    return Ok(result);
                }
                if derived {
                    // The this-binding check fires before the return-value
                    // check, so a derived constructor that returned a
                    // primitive without calling super reports the missing
                    // super call.
                    if matches!(bound_this, Value::Uninit) {
                        return Err(RunError::reference_error(
                            "derived constructor returned before calling super",
                        ));
                    }
                    if !matches!(result, Value::Undefined) {
                        return Err(RunError::type_error(
                            "derived constructors may only return an object or undefined",
                        ));
                    }
                    return Ok(bound_this);
                }
                // Ordinary constructor semantics: primitive returns are
                // discarded in favor of `this`.
                Ok(bound_this)
            }
            ConstructKind::NotConstructible => Err(RunError::type_error("value is not a constructor")),
        }
    }

    /// Creates the instance object with `new_target.prototype` (falling
    /// back to `Object.prototype`).
    pub(crate) fn ordinary_create_from_constructor(&mut self, new_target: Value) -> RunResult<HeapId> {
        let proto_key = PropertyKey::Str(StringId::from(StaticStrings::Prototype));
        let proto = self.get_property_value(new_target, &proto_key)?;
        let proto_id = proto.ref_id().filter(|id| matches!(self.realm.heap.get(*id), HeapData::Object(_)));
        let proto_id = proto_id.unwrap_or(self.realm.intrinsics.object_proto);
        self.alloc(HeapData::Object(JsObject::plain(Some(proto_id))))
    }

    fn proxy_construct(&mut self, proxy_id: HeapId, args: &[Value], new_target: Value) -> RunResult<Value> {
        let (target, handler) = match &self.realm.heap.object(proxy_id).kind {
            ObjectKind::Proxy {
                target,
                handler,
                revoked,
                ..
            } => {
                if *revoked {
                    return Err(RunError::type_error("cannot construct a revoked proxy"));
                }
                (*target, *handler)
            }
            _ => return Err(RunError::internal("proxy construct on a non-proxy")),
        };
        let trap_name = self.realm.interns.intern("construct");
        let trap = self.get_named_property(Value::Ref(handler), trap_name)?;
        if trap.is_nullish() {
            return self.construct(Value::Ref(target), args, new_target);
        }
        if !trap.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("proxy trap 'construct' is not a function"));
        }
        let args_array = self.args_to_array(args)?;
        let result = self.call_value(trap, Value::Ref(handler), &[Value::Ref(target), args_array, new_target])?;
        if !self.is_object_value(&result) {
            return Err(RunError::type_error("proxy construct trap returned a non-object"));
        }
        Ok(result)
    }

    // ---- closures --------------------------------------------------------

    /// `MakeFunction`: creates a closure over the current scope.
    pub(crate) fn make_function(&mut self, descriptor: FunctionId) -> RunResult<Value> {
        let scope = self.current_scope();
        self.instantiate_function(descriptor, scope)
    }

    /// Builds a function object for a descriptor and a captured scope.
    pub(crate) fn instantiate_function(&mut self, descriptor: FunctionId, scope: HeapId) -> RunResult<Value> {
        let code = Arc::clone(self.realm.interns.code(descriptor));
        let flags = code.flags();
        let function_proto = self.realm.intrinsics.function_proto;

        let mut obj = JsObject::with_kind(
            Some(function_proto),
            ClassTag::Function,
            ObjectKind::Function(Box::new(FunctionData::new(descriptor, scope))),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Name)),
            PropertySlot::data_with_attrs(Value::Str(code.name()), false, false, true),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Length)),
            PropertySlot::data_with_attrs(
                Value::Int(i32::try_from(code.param_count()).unwrap_or(i32::MAX)),
                false,
                false,
                true,
            ),
        );
        let fn_id = self.alloc(HeapData::Object(obj))?;

        // Non-arrow functions carry a `prototype` object; generators get
        // the generator prototype chain and no constructor backlink.
        if !flags.arrow {
            let proto = if flags.generator {
                JsObject::plain(Some(self.realm.intrinsics.generator_proto))
            } else {
                let mut proto = JsObject::plain(Some(self.realm.intrinsics.object_proto));
                proto.insert_slot(
                    PropertyKey::Str(StringId::from(StaticStrings::Constructor)),
                    PropertySlot::method(Value::Ref(fn_id)),
                );
                proto
            };
            let proto_id = self.alloc(HeapData::Object(proto))?;
            self.realm.heap.object_mut(fn_id).insert_slot(
                PropertyKey::Str(StringId::from(StaticStrings::Prototype)),
                PropertySlot::data_with_attrs(Value::Ref(proto_id), true, false, false),
            );
        }
        Ok(Value::Ref(fn_id))
    }

    /// `Function.prototype.bind`.
    pub(crate) fn bind_function(&mut self, target: Value, bound_this: Value, bound_args: &[Value]) -> RunResult<Value> {
        let Some(target_id) = target.ref_id() else {
            return self.not_a_function(&target);
        };
        if !target.is_callable(&self.realm.heap) {
            return self.not_a_function(&target);
        }

        // length = max(0, target.length - bound argument count)
        let length_key = PropertyKey::Str(StringId::from(StaticStrings::Length));
        let target_length = self.get_property_value(target.clone(), &length_key)?;
        let target_length = target_length.as_number().unwrap_or(0.0);
        let bound_length = (target_length - bound_args.len() as f64).max(0.0);

        // name = "bound " + target.name
        let name_key = PropertyKey::Str(StringId::from(StaticStrings::Name));
        let target_name = self.get_property_value(target, &name_key)?;
        let target_name = match target_name.as_str(&self.realm.heap, &self.realm.interns) {
            Some(s) => s.to_owned(),
            None => String::new(),
        };
        let bound_name = format!(
            "{}{}",
            self.realm.interns.get_str(StringId::from(StaticStrings::BoundPrefix)),
            target_name
        );
        let bound_name = self.make_string(bound_name)?;

        let mut obj = JsObject::with_kind(
            Some(self.realm.intrinsics.function_proto),
            ClassTag::Function,
            ObjectKind::Bound(Box::new(BoundFunction {
                target: target_id,
                bound_this,
                bound_args: bound_args.to_vec(),
            })),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Length)),
            PropertySlot::data_with_attrs(Value::number(bound_length), false, false, true),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Name)),
            PropertySlot::data_with_attrs(bound_name, false, false, true),
        );
        let id = self.alloc(HeapData::Object(obj))?;
        Ok(Value::Ref(id))
    }

    // ---- regexp literals -------------------------------------------------

    /// `NewRegExp`: `[source, flags]` through the realm's proxy.
    pub(crate) fn op_new_regexp(&mut self) -> RunResult<()> {
        let flags_value = self.pop();
        let source_value = self.pop();
        let source = self.to_rust_string(source_value)?;
        let flags_text = self.to_rust_string(flags_value)?;
        let flags = RegExpFlags::parse(&flags_text)
            .ok_or_else(|| RunError::syntax_error(format!("invalid regular expression flags '{flags_text}'")))?;
        let handle = self
            .realm
            .regexp_proxy
            .compile(&source, flags)
            .map_err(RunError::syntax_error)?;

        let source_id = self.realm.interns.intern(&source);
        let flags_id = self.realm.interns.intern(&flags_text);
        let mut obj = JsObject::with_kind(
            Some(self.realm.intrinsics.regexp_proto),
            ClassTag::RegExp,
            ObjectKind::RegExp(Box::new(RegExpData {
                handle,
                source: source_id,
                flags,
                last_index: 0,
            })),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Source)),
            PropertySlot::data_with_attrs(Value::Str(source_id), false, false, false),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Flags)),
            PropertySlot::data_with_attrs(Value::Str(flags_id), false, false, false),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::LastIndex)),
            PropertySlot::data_with_attrs(Value::Int(0), true, false, false),
        );
        let id = self.alloc(HeapData::Object(obj))?;
        self.push(Value::Ref(id));
        Ok(())
    }

    // ---- argument plumbing -----------------------------------------------

    /// Reads an arguments array (engine-built, dense) into a vector.
    pub(crate) fn array_to_args(&mut self, array: Value) -> RunResult<Args> {
        let Some(id) = array.ref_id() else {
            return Err(RunError::internal("spread arguments are not an array"));
        };
        let length = match &self.realm.heap.object(id).kind {
            ObjectKind::Array(storage) => storage.length(),
            _ => return Err(RunError::internal("spread arguments are not an array")),
        };
        let mut args = Args::new();
        for index in 0..length {
            let value = match &self.realm.heap.object(id).kind {
                ObjectKind::Array(storage) => storage.get(index).cloned().unwrap_or(Value::Undefined),
                _ => Value::Undefined,
            };
            args.push(value);
        }
        Ok(args)
    }

    /// Packs arguments into a fresh array (proxy trap calls).
    pub(crate) fn args_to_array(&mut self, args: &[Value]) -> RunResult<Value> {
        let id = self.realm.new_array_with(args.to_vec())?;
        Ok(Value::Ref(id))
    }
}
