//! Built-in function dispatch.
//!
//! Natives are enum variants, not code objects; the call path routes them
//! here with the receiver and argument slice. Anything a native needs from
//! script (iterator protocols, accessors, executor callbacks) goes back
//! through the ordinary call machinery.

use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{
    coerce,
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId, WellKnownSymbol},
    property::{
        ClassTag, JsObject, ObjectKind, PropertyDescriptor, PropertyKey, PropertySlot,
        define_own_property,
    },
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        function::NativeFunction,
        generator::ResumeKind,
        promise::PromiseReaction,
    },
    value::Value,
};

use super::{Vm, generator_exec::ResumeOutcome};

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Runs one native. `construct` distinguishes `new F(...)` from a
    /// plain call for the natives that care.
    pub(crate) fn dispatch_native(
        &mut self,
        native: NativeFunction,
        this: Value,
        args: &[Value],
        construct: bool,
    ) -> RunResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);

        match native {
            // ---- Object ----
            NativeFunction::ObjectCtor => {
                let target = arg(0);
                if self.is_object_value(&target) {
                    Ok(target)
                } else {
                    let id = self.realm.new_plain_object()?;
                    Ok(Value::Ref(id))
                }
            }
            NativeFunction::ObjectFreeze => self.freeze_or_seal(arg(0), true),
            NativeFunction::ObjectSeal => self.freeze_or_seal(arg(0), false),
            NativeFunction::ObjectPreventExtensions => {
                let target = arg(0);
                if let Some(id) = self.object_id(&target) {
                    self.realm.heap.object_mut(id).extensible = false;
                }
                Ok(target)
            }
            NativeFunction::ObjectIsFrozen => {
                let target = arg(0);
                Ok(Value::Bool(match self.object_id(&target) {
                    Some(id) => {
                        let obj = self.realm.heap.object(id);
                        let elements_frozen = match &obj.kind {
                            ObjectKind::Array(storage) => storage.frozen,
                            _ => true,
                        };
                        obj.is_frozen() && elements_frozen
                    }
                    None => true,
                }))
            }
            NativeFunction::ObjectIsSealed => {
                let target = arg(0);
                Ok(Value::Bool(match self.object_id(&target) {
                    Some(id) => {
                        let obj = self.realm.heap.object(id);
                        let elements_sealed = match &obj.kind {
                            ObjectKind::Array(storage) => storage.sealed || storage.frozen,
                            _ => true,
                        };
                        obj.is_sealed() && elements_sealed
                    }
                    None => true,
                }))
            }
            NativeFunction::ObjectIsExtensible => {
                let target = arg(0);
                Ok(Value::Bool(
                    self.object_id(&target)
                        .is_some_and(|id| self.realm.heap.object(id).extensible),
                ))
            }
            NativeFunction::ObjectGetPrototypeOf => {
                let target = arg(0);
                let id = self
                    .object_id(&target)
                    .ok_or_else(|| RunError::type_error("Object.getPrototypeOf requires an object"))?;
                Ok(match self.realm.heap.object(id).prototype {
                    Some(proto) => Value::Ref(proto),
                    None => Value::Null,
                })
            }
            NativeFunction::ObjectSetPrototypeOf => {
                let target = arg(0);
                let proto = arg(1);
                let id = self
                    .object_id(&target)
                    .ok_or_else(|| RunError::type_error("Object.setPrototypeOf requires an object"))?;
                let proto_id = match &proto {
                    Value::Null => None,
                    value => Some(self.object_id(value).ok_or_else(|| {
                        RunError::type_error("prototype must be an object or null")
                    })?),
                };
                self.set_prototype(id, proto_id)?;
                Ok(target)
            }
            NativeFunction::ObjectDefineProperty => {
                let target = arg(0);
                let id = self
                    .object_id(&target)
                    .ok_or_else(|| RunError::type_error("Object.defineProperty requires an object"))?;
                let key = self.to_property_key(arg(1))?;
                let descriptor = self.to_property_descriptor(arg(2))?;
                define_own_property(&mut self.realm.heap, &self.realm.interns, id, key, &descriptor, true)?;
                Ok(target)
            }
            NativeFunction::ObjectKeys => {
                let id = self
                    .object_id(&arg(0))
                    .ok_or_else(|| RunError::type_error("Object.keys requires an object"))?;
                self.keys_array(id, false)
            }
            NativeFunction::ObjectGetOwnPropertyNames => {
                let id = self
                    .object_id(&arg(0))
                    .ok_or_else(|| RunError::type_error("Object.getOwnPropertyNames requires an object"))?;
                self.keys_array(id, true)
            }

            // ---- Object.prototype ----
            NativeFunction::ObjectProtoHasOwnProperty => {
                let key = self.to_property_key(arg(0))?;
                let Some(id) = self.object_id(&this) else {
                    return Ok(Value::Bool(false));
                };
                let owned = match (&self.realm.heap.object(id).kind, &key) {
                    (ObjectKind::Array(storage), PropertyKey::Index(i)) => storage.has(*i),
                    (ObjectKind::Array(_), PropertyKey::Str(s))
                        if *s == StringId::from(StaticStrings::Length) =>
                    {
                        true
                    }
                    _ => self.realm.heap.object(id).has_own(&key),
                };
                Ok(Value::Bool(owned))
            }
            NativeFunction::ObjectProtoToString => {
                let tag = match &this {
                    Value::Undefined => "Undefined",
                    Value::Null => "Null",
                    value => match self.object_id(value) {
                        Some(id) => self.realm.heap.object(id).class_tag.name(),
                        None => "Object",
                    },
                };
                self.make_string(format!("[object {tag}]"))
            }
            NativeFunction::ObjectProtoValueOf => Ok(this),

            // ---- Function.prototype ----
            NativeFunction::FunctionProtoCall => {
                let this_arg = arg(0);
                let rest = if args.is_empty() { &[][..] } else { &args[1..] };
                self.call_value(this, this_arg, rest)
            }
            NativeFunction::FunctionProtoApply => {
                let this_arg = arg(0);
                let list = match arg(1) {
                    Value::Undefined | Value::Null => Vec::new(),
                    other => self.list_from_array_like(other)?,
                };
                self.call_value(this, this_arg, &list)
            }
            NativeFunction::FunctionProtoBind => {
                let bound_this = arg(0);
                let rest = if args.is_empty() { &[][..] } else { &args[1..] };
                self.bind_function(this, bound_this, rest)
            }
            NativeFunction::FunctionProtoToString => {
                let name_key = PropertyKey::Str(StringId::from(StaticStrings::Name));
                let name = self.get_property_value(this, &name_key)?;
                let name = self.to_rust_string(name)?;
                self.make_string(format!("function {name}() {{ [native code] }}"))
            }

            // ---- Array ----
            NativeFunction::ArrayCtor => {
                if args.len() == 1
                    && let Some(n) = arg(0).as_number()
                {
                    let length = coerce::to_uint32(n);
                    if f64::from(length) != n {
                        return Err(RunError::range_error("invalid array length"));
                    }
                    let id = self.realm.new_array(length)?;
                    if let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(id).kind {
                        storage.set_length(length);
                    }
                    return Ok(Value::Ref(id));
                }
                let id = self.realm.new_array_with(args.to_vec())?;
                Ok(Value::Ref(id))
            }
            NativeFunction::ArrayFrom => self.array_from(arg(0), arg(1)),
            NativeFunction::ArrayIsArray => {
                let target = arg(0);
                Ok(Value::Bool(self.object_id(&target).is_some_and(|id| {
                    matches!(self.realm.heap.object(id).kind, ObjectKind::Array(_))
                })))
            }
            NativeFunction::ArrayProtoPush => {
                let id = self
                    .object_id(&this)
                    .ok_or_else(|| RunError::type_error("push requires an array receiver"))?;
                for value in args {
                    let length = match &self.realm.heap.object(id).kind {
                        ObjectKind::Array(storage) => storage.length(),
                        _ => return Err(RunError::type_error("push requires an array receiver")),
                    };
                    let ok = self.object_set(id, PropertyKey::Index(length), value.clone(), Value::Ref(id))?;
                    if !ok {
                        return Err(RunError::type_error("cannot add elements to this array"));
                    }
                }
                match &self.realm.heap.object(id).kind {
                    ObjectKind::Array(storage) => Ok(Value::number(f64::from(storage.length()))),
                    _ => Err(RunError::type_error("push requires an array receiver")),
                }
            }
            NativeFunction::ArrayProtoJoin => {
                let id = self
                    .object_id(&this)
                    .ok_or_else(|| RunError::type_error("join requires an array receiver"))?;
                let separator = match arg(0) {
                    Value::Undefined => ",".to_owned(),
                    other => self.to_rust_string(other)?,
                };
                let length = match &self.realm.heap.object(id).kind {
                    ObjectKind::Array(storage) => storage.length(),
                    _ => return Err(RunError::type_error("join requires an array receiver")),
                };
                let mut out = String::new();
                for index in 0..length {
                    if index > 0 {
                        out.push_str(&separator);
                    }
                    let element = self.get_property_value(Value::Ref(id), &PropertyKey::Index(index))?;
                    if !element.is_nullish() {
                        out.push_str(&self.to_rust_string(element)?);
                    }
                }
                self.make_string(out)
            }
            NativeFunction::ArrayProtoIndexOf => {
                let id = self
                    .object_id(&this)
                    .ok_or_else(|| RunError::type_error("indexOf requires an array receiver"))?;
                let needle = arg(0);
                let length = match &self.realm.heap.object(id).kind {
                    ObjectKind::Array(storage) => storage.length(),
                    _ => return Err(RunError::type_error("indexOf requires an array receiver")),
                };
                for index in 0..length {
                    let element = self.get_property_value(Value::Ref(id), &PropertyKey::Index(index))?;
                    // indexOf compares with strict equality, so NaN is
                    // never found.
                    if element.strict_eq(&needle, &self.realm.heap, &self.realm.interns) {
                        return Ok(Value::number(f64::from(index)));
                    }
                }
                Ok(Value::Int(-1))
            }
            NativeFunction::ArrayProtoIncludes => {
                let id = self
                    .object_id(&this)
                    .ok_or_else(|| RunError::type_error("includes requires an array receiver"))?;
                let needle = arg(0);
                let length = match &self.realm.heap.object(id).kind {
                    ObjectKind::Array(storage) => storage.length(),
                    _ => return Err(RunError::type_error("includes requires an array receiver")),
                };
                for index in 0..length {
                    let element = self.get_property_value(Value::Ref(id), &PropertyKey::Index(index))?;
                    // includes uses SameValueZero, so NaN finds NaN.
                    if element.same_value_zero(&needle, &self.realm.heap, &self.realm.interns) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            NativeFunction::ArrayProtoValues => {
                let id = self
                    .object_id(&this)
                    .ok_or_else(|| RunError::type_error("values requires an array receiver"))?;
                let iterator = JsObject::with_kind(
                    Some(self.realm.intrinsics.array_iterator_proto),
                    ClassTag::Object,
                    ObjectKind::ArrayIterator {
                        array: id,
                        next_index: 0,
                        done: false,
                    },
                );
                let iter_id = self.alloc(HeapData::Object(iterator))?;
                Ok(Value::Ref(iter_id))
            }
            NativeFunction::ArrayIteratorNext => {
                let Some(id) = self.object_id(&this) else {
                    return Err(RunError::type_error("receiver is not an array iterator"));
                };
                let step = match &self.realm.heap.object(id).kind {
                    ObjectKind::ArrayIterator { array, next_index, done } => {
                        if *done {
                            None
                        } else {
                            let length = match &self.realm.heap.object(*array).kind {
                                ObjectKind::Array(storage) => storage.length(),
                                _ => 0,
                            };
                            if *next_index < length {
                                Some((*array, *next_index))
                            } else {
                                None
                            }
                        }
                    }
                    _ => return Err(RunError::type_error("receiver is not an array iterator")),
                };
                match step {
                    None => {
                        if let ObjectKind::ArrayIterator { done, .. } = &mut self.realm.heap.object_mut(id).kind {
                            *done = true;
                        }
                        self.make_iter_result(Value::Undefined, true)
                    }
                    Some((array, index)) => {
                        if let ObjectKind::ArrayIterator { next_index, .. } =
                            &mut self.realm.heap.object_mut(id).kind
                        {
                            *next_index = index + 1;
                        }
                        let value = self.get_property_value(Value::Ref(array), &PropertyKey::Index(index))?;
                        self.make_iter_result(value, false)
                    }
                }
            }

            // ---- Symbol ----
            NativeFunction::SymbolCtor => {
                if construct {
                    return Err(RunError::type_error("Symbol is not a constructor"));
                }
                let description = match arg(0) {
                    Value::Undefined => None,
                    other => {
                        let text = self.to_rust_string(other)?;
                        Some(self.realm.interns.intern(&text))
                    }
                };
                Ok(Value::Symbol(self.realm.interns.new_symbol(description)))
            }
            NativeFunction::SymbolFor => {
                let key_text = self.to_rust_string(arg(0))?;
                let key = self.realm.interns.intern(&key_text);
                Ok(Value::Symbol(self.realm.interns.symbol_for(key)))
            }
            NativeFunction::SymbolKeyFor => match arg(0) {
                Value::Symbol(id) => Ok(match self.realm.interns.symbol(id).registry_key {
                    Some(key) => Value::Str(key),
                    None => Value::Undefined,
                }),
                _ => Err(RunError::type_error("Symbol.keyFor requires a symbol")),
            },

            // ---- BigInt ----
            NativeFunction::BigIntCtor => {
                if construct {
                    return Err(RunError::type_error("BigInt is not a constructor"));
                }
                match arg(0) {
                    value @ (Value::Int(_) | Value::Float(_)) => {
                        let n = value.as_number().expect("number value");
                        if n.trunc() != n || !n.is_finite() {
                            return Err(RunError::range_error(
                                "cannot convert a non-integral number to a BigInt",
                            ));
                        }
                        let big = BigInt::from_f64(n)
                            .ok_or_else(|| RunError::range_error("number out of BigInt range"))?;
                        self.make_bigint(big)
                    }
                    other => {
                        let big = self.to_big_int(other)?;
                        self.make_bigint(big)
                    }
                }
            }

            // ---- Errors ----
            NativeFunction::ErrorCtor(kind) => self.construct_error(kind, args),

            // ---- Proxy ----
            NativeFunction::ProxyCtor => {
                if !construct {
                    return Err(RunError::type_error("Proxy constructor requires 'new'"));
                }
                let target = self
                    .object_id(&arg(0))
                    .ok_or_else(|| RunError::type_error("Proxy target must be an object"))?;
                let handler = self
                    .object_id(&arg(1))
                    .ok_or_else(|| RunError::type_error("Proxy handler must be an object"))?;
                let callable = arg(0).is_callable(&self.realm.heap);
                let proxy = JsObject::with_kind(
                    None,
                    ClassTag::Object,
                    ObjectKind::Proxy {
                        target,
                        handler,
                        callable,
                        revoked: false,
                    },
                );
                let id = self.alloc(HeapData::Object(proxy))?;
                Ok(Value::Ref(id))
            }

            // ---- Promise ----
            NativeFunction::PromiseCtor => {
                if !construct {
                    return Err(RunError::type_error("Promise constructor requires 'new'"));
                }
                let executor = arg(0);
                if !executor.is_callable(&self.realm.heap) {
                    return Err(RunError::type_error("Promise executor is not a function"));
                }
                let promise = self.realm.new_promise()?;
                let resolve = self.realm.new_native(NativeFunction::PromiseResolveFn(promise))?;
                let reject = self.realm.new_native(NativeFunction::PromiseRejectFn(promise))?;
                match self.call_value(executor, Value::Undefined, &[Value::Ref(resolve), Value::Ref(reject)]) {
                    Ok(_) => {}
                    Err(err) if err.is_catchable() => {
                        let reason = self.error_to_value(err)?;
                        self.settle_promise(promise, false, reason)?;
                    }
                    Err(err) => return Err(err),
                }
                Ok(Value::Ref(promise))
            }
            NativeFunction::PromiseResolve => {
                let promise = self.promise_of_value(arg(0))?;
                Ok(Value::Ref(promise))
            }
            NativeFunction::PromiseReject => {
                let promise = self.realm.new_promise()?;
                self.settle_promise(promise, false, arg(0))?;
                Ok(Value::Ref(promise))
            }
            NativeFunction::PromiseProtoThen => self.promise_then(this, arg(0), arg(1)),
            NativeFunction::PromiseProtoCatch => self.promise_then(this, Value::Undefined, arg(0)),
            NativeFunction::PromiseResolveFn(promise) => {
                self.settle_derived(promise, arg(0))?;
                Ok(Value::Undefined)
            }
            NativeFunction::PromiseRejectFn(promise) => {
                self.settle_promise(promise, false, arg(0))?;
                Ok(Value::Undefined)
            }

            // ---- Generator.prototype ----
            NativeFunction::GeneratorProtoNext => self.generator_request(this, ResumeKind::Next, arg(0)),
            NativeFunction::GeneratorProtoReturn => self.generator_request(this, ResumeKind::Return, arg(0)),
            NativeFunction::GeneratorProtoThrow => self.generator_request(this, ResumeKind::Throw, arg(0)),

            // ---- %AsyncFromSyncIterator%.prototype ----
            NativeFunction::AsyncFromSyncNext => {
                let Some(id) = self.object_id(&this) else {
                    return Err(RunError::type_error("receiver is not an async-from-sync iterator"));
                };
                let inner = match &self.realm.heap.object(id).kind {
                    ObjectKind::AsyncFromSync { inner } => inner.clone(),
                    _ => return Err(RunError::type_error("receiver is not an async-from-sync iterator")),
                };
                let (value, done) = self.iter_next(inner, args.first().cloned())?;
                let result = self.make_iter_result(value, done)?;
                let promise = self.promise_of_value(result)?;
                Ok(Value::Ref(promise))
            }
        }
    }

    // ---- shared helpers ---------------------------------------------------

    /// Heap id when the value is a real object.
    pub(crate) fn object_id(&self, value: &Value) -> Option<HeapId> {
        value
            .ref_id()
            .filter(|id| matches!(self.realm.heap.get(*id), HeapData::Object(_)))
    }

    fn freeze_or_seal(&mut self, target: Value, freeze: bool) -> RunResult<Value> {
        if let Some(id) = self.object_id(&target) {
            let obj = self.realm.heap.object_mut(id);
            obj.seal_slots(freeze);
            if let ObjectKind::Array(storage) = &mut obj.kind {
                storage.sealed = true;
                if freeze {
                    storage.frozen = true;
                }
            }
        }
        Ok(target)
    }

    fn keys_array(&mut self, id: HeapId, include_non_enumerable: bool) -> RunResult<Value> {
        let keys = self.own_keys_of(id, false, include_non_enumerable)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let text = key.display(&self.realm.interns);
            values.push(self.make_string(text)?);
        }
        let array = self.realm.new_array_with(values)?;
        Ok(Value::Ref(array))
    }

    /// Reads `value`, `get`, `set`, and the attribute fields out of a
    /// descriptor argument.
    fn to_property_descriptor(&mut self, descriptor: Value) -> RunResult<PropertyDescriptor> {
        if !self.is_object_value(&descriptor) {
            return Err(RunError::type_error("property descriptor must be an object"));
        }
        let mut parsed = PropertyDescriptor::default();
        let read = |vm: &mut Self, name: StaticStrings, descriptor: &Value| -> RunResult<Option<Value>> {
            let key = PropertyKey::Str(StringId::from(name));
            let id = vm.object_id(descriptor).expect("checked object above");
            if vm.object_has(id, &key)? {
                Ok(Some(vm.get_property_value(descriptor.clone(), &key)?))
            } else {
                Ok(None)
            }
        };
        if let Some(value) = read(self, StaticStrings::Value, &descriptor)? {
            parsed.value = Some(value);
        }
        if let Some(get) = read(self, StaticStrings::Get, &descriptor)? {
            if !get.is_nullish() && !get.is_callable(&self.realm.heap) {
                return Err(RunError::type_error("getter must be callable"));
            }
            parsed.get = (!get.is_nullish()).then_some(get);
        }
        if let Some(set) = read(self, StaticStrings::Set, &descriptor)? {
            if !set.is_nullish() && !set.is_callable(&self.realm.heap) {
                return Err(RunError::type_error("setter must be callable"));
            }
            parsed.set = (!set.is_nullish()).then_some(set);
        }
        if let Some(writable) = read(self, StaticStrings::Writable, &descriptor)? {
            parsed.writable = Some(writable.to_boolean(&self.realm.heap, &self.realm.interns));
        }
        if let Some(enumerable) = read(self, StaticStrings::Enumerable, &descriptor)? {
            parsed.enumerable = Some(enumerable.to_boolean(&self.realm.heap, &self.realm.interns));
        }
        if let Some(configurable) = read(self, StaticStrings::Configurable, &descriptor)? {
            parsed.configurable = Some(configurable.to_boolean(&self.realm.heap, &self.realm.interns));
        }
        if parsed.is_accessor() && parsed.is_data() {
            return Err(RunError::type_error(
                "property descriptor cannot be both a data and an accessor descriptor",
            ));
        }
        Ok(parsed)
    }

    /// CreateListFromArrayLike: arrays fast-path, anything else reads
    /// `length` and indexes.
    pub(crate) fn list_from_array_like(&mut self, value: Value) -> RunResult<Vec<Value>> {
        let Some(id) = self.object_id(&value) else {
            return Err(RunError::type_error("expected an array-like object"));
        };
        if let ObjectKind::Array(storage) = &self.realm.heap.object(id).kind {
            let length = storage.length();
            let mut list = Vec::with_capacity(length as usize);
            for index in 0..length {
                list.push(
                    match &self.realm.heap.object(id).kind {
                        ObjectKind::Array(storage) => storage.get(index).cloned().unwrap_or(Value::Undefined),
                        _ => Value::Undefined,
                    },
                );
            }
            return Ok(list);
        }
        let length_key = PropertyKey::Str(StringId::from(StaticStrings::Length));
        let length = self.get_property_value(value.clone(), &length_key)?;
        let length = coerce::to_length(self.to_number(length)?);
        let mut list = Vec::with_capacity(length.min(4_096) as usize);
        for index in 0..length {
            let key = PropertyKey::Index(u32::try_from(index).map_err(|_| {
                RunError::range_error("array-like is too long")
            })?);
            list.push(self.get_property_value(value.clone(), &key)?);
        }
        Ok(list)
    }

    /// `Array.from`: iterables first, array-likes second, with an
    /// optional map function.
    fn array_from(&mut self, items: Value, map_fn: Value) -> RunResult<Value> {
        let use_map = !map_fn.is_nullish();
        if use_map && !map_fn.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("Array.from map function is not callable"));
        }

        let iterator_key = PropertyKey::Sym(WellKnownSymbol::Iterator.id());
        let iterator_method = match &items {
            Value::Undefined | Value::Null => {
                return Err(RunError::type_error("Array.from requires an array-like or iterable"));
            }
            other => self.get_property_value(other.clone(), &iterator_key)?,
        };

        let mut values = Vec::new();
        if iterator_method.is_callable(&self.realm.heap) {
            let iterator = self.call_iterator(items)?;
            loop {
                let (value, done) = self.iter_next(iterator.clone(), None)?;
                if done {
                    break;
                }
                values.push(value);
            }
        } else {
            values = self.list_from_array_like(items)?;
        }

        if use_map {
            for (index, value) in values.iter_mut().enumerate() {
                let mapped = self.call_value(
                    map_fn.clone(),
                    Value::Undefined,
                    &[value.clone(), Value::number(index as f64)],
                )?;
                *value = mapped;
            }
        }
        let array = self.realm.new_array_with(values)?;
        Ok(Value::Ref(array))
    }

    fn construct_error(&mut self, kind: ErrorKind, args: &[Value]) -> RunResult<Value> {
        // AggregateError takes (errors, message); the rest take (message).
        let (errors, message_arg) = if kind == ErrorKind::AggregateError {
            (args.first().cloned(), args.get(1).cloned())
        } else {
            (None, args.first().cloned())
        };
        let message = match message_arg {
            Some(Value::Undefined) | None => String::new(),
            Some(other) => self.to_rust_string(other)?,
        };
        let id = self.new_error_object(kind, &message, &[])?;
        if let Some(errors) = errors {
            let list = match &errors {
                Value::Undefined => Vec::new(),
                other => {
                    let iterator = self.call_iterator(other.clone())?;
                    let mut list = Vec::new();
                    loop {
                        let (value, done) = self.iter_next(iterator.clone(), None)?;
                        if done {
                            break;
                        }
                        list.push(value);
                    }
                    list
                }
            };
            let array = self.realm.new_array_with(list)?;
            let errors_key = self.realm.interns.intern("errors");
            self.realm.heap.object_mut(id).insert_slot(
                PropertyKey::Str(errors_key),
                PropertySlot::method(Value::Ref(array)),
            );
        }
        Ok(Value::Ref(id))
    }

    fn promise_then(&mut self, this: Value, on_fulfilled: Value, on_rejected: Value) -> RunResult<Value> {
        let Some(promise) = self.object_id(&this) else {
            return Err(RunError::type_error("then requires a promise receiver"));
        };
        if !matches!(self.realm.heap.object(promise).kind, ObjectKind::Promise(_)) {
            return Err(RunError::type_error("then requires a promise receiver"));
        }
        let derived = self.realm.new_promise()?;
        let reaction = PromiseReaction {
            on_fulfilled: on_fulfilled.is_callable(&self.realm.heap).then_some(on_fulfilled),
            on_rejected: on_rejected.is_callable(&self.realm.heap).then_some(on_rejected),
            derived: Some(derived),
            resume: None,
        };
        self.add_reaction(promise, reaction)?;
        Ok(Value::Ref(derived))
    }

    /// Shared body of `next`/`return`/`throw` on generator objects. Sync
    /// generators answer an iterator result; async generators answer a
    /// promise of one.
    fn generator_request(&mut self, this: Value, kind: ResumeKind, value: Value) -> RunResult<Value> {
        let Some(gen_id) = self.object_id(&this) else {
            return Err(RunError::type_error("receiver is not a generator"));
        };
        let is_async = match &self.realm.heap.object(gen_id).kind {
            ObjectKind::Generator(record) => record.is_async,
            _ => return Err(RunError::type_error("receiver is not a generator")),
        };

        if is_async {
            let already_pending = match &self.realm.heap.object(gen_id).kind {
                ObjectKind::Generator(record) => record.pending_next.is_some(),
                _ => false,
            };
            if already_pending {
                return Err(RunError::type_error("generator is already running"));
            }
            let promise = self.realm.new_promise()?;
            if let ObjectKind::Generator(record) = &mut self.realm.heap.object_mut(gen_id).kind {
                record.pending_next = Some(promise);
            }
            self.async_generator_step(gen_id, kind, value)?;
            return Ok(Value::Ref(promise));
        }

        match self.resume_generator(gen_id, kind, value)? {
            ResumeOutcome::Yielded(value) => self.make_iter_result(value, false),
            ResumeOutcome::Returned(value) => self.make_iter_result(value, true),
            ResumeOutcome::Awaited => Err(RunError::internal("sync generator reported an await")),
        }
    }
}
