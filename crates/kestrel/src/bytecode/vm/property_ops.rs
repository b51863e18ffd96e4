//! Property access, name resolution, iteration, and literal construction.
//!
//! The entry points here implement the object model's script-facing
//! operations: prototype-chain walks with accessor invocation, the exotic
//! behaviors (array storage and magic `length`, module namespaces, proxy
//! traps with invariant checks), scope-chain name resolution with TDZ
//! enforcement, and the iterator protocol.

use crate::{
    bytecode::op::{Opcode, incdec},
    coerce,
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId, WellKnownSymbol},
    module::{ExportResolution, ModuleId, resolve_export},
    property::{
        ClassTag, JsObject, ObjectKind, PropertyDescriptor, PropertyKey, PropertySlot, SlotData,
        define_own_property, prototype_would_cycle,
    },
    resource::ResourceTracker,
    scope::{Binding, BindingKind, ImportTarget, Scope, ScopeKind},
    tracer::VmTracer,
    value::Value,
};

use super::Vm;

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    // ---- keys ------------------------------------------------------------

    /// ToPropertyKey: symbols pass through, everything else stringifies
    /// and canonicalizes numeric form.
    pub(crate) fn to_property_key(&mut self, value: Value) -> RunResult<PropertyKey> {
        match value {
            Value::Symbol(id) => Ok(PropertyKey::Sym(id)),
            Value::Int(i) if i >= 0 => Ok(PropertyKey::Index(i as u32)),
            other => {
                let prim = self.to_primitive(other, super::numeric::PrimitiveHint::String)?;
                if let Value::Symbol(id) = prim {
                    return Ok(PropertyKey::Sym(id));
                }
                let text = coerce::to_string_primitive(&prim, &self.realm.heap, &self.realm.interns)?;
                Ok(PropertyKey::from_str(&text, &mut self.realm.interns))
            }
        }
    }

    /// A property key as the value proxy traps receive: index and string
    /// keys become strings, symbols stay symbols.
    fn key_to_value(&mut self, key: &PropertyKey) -> RunResult<Value> {
        match key {
            PropertyKey::Index(i) => self.make_string(i.to_string()),
            PropertyKey::Str(id) => Ok(Value::Str(*id)),
            PropertyKey::Sym(id) => Ok(Value::Symbol(*id)),
        }
    }

    // ---- generic get -----------------------------------------------------

    /// `base[key]` for any base value. Nullish bases raise `TypeError`;
    /// string primitives answer `length` and indexing; other primitives
    /// read as absent (no wrapper prototypes are modeled).
    pub(crate) fn get_property_value(&mut self, base: Value, key: &PropertyKey) -> RunResult<Value> {
        match &base {
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "cannot read properties of {} (reading '{}')",
                if matches!(base, Value::Null) { "null" } else { "undefined" },
                key.display(&self.realm.interns),
            ))),
            Value::Str(id) => {
                let text = self.realm.interns.get_str(*id).to_owned();
                self.string_property(&text, key)
            }
            Value::Ref(id) => match self.realm.heap.get(*id) {
                HeapData::Str(s) => {
                    let text = s.clone();
                    self.string_property(&text, key)
                }
                HeapData::Object(_) => self.object_get(*id, key, base.clone()),
                _ => Ok(Value::Undefined),
            },
            _ => Ok(Value::Undefined),
        }
    }

    pub(crate) fn get_named_property(&mut self, base: Value, name: StringId) -> RunResult<Value> {
        let key = PropertyKey::from_string_id(name, &self.realm.interns);
        self.get_property_value(base, &key)
    }

    fn string_property(&mut self, text: &str, key: &PropertyKey) -> RunResult<Value> {
        match key {
            PropertyKey::Str(id) if *id == StringId::from(StaticStrings::Length) => {
                Ok(Value::Int(i32::try_from(coerce::utf16_len(text)).unwrap_or(i32::MAX)))
            }
            PropertyKey::Index(i) => {
                match text.encode_utf16().nth(*i as usize) {
                    Some(unit) => {
                        let s = String::from_utf16_lossy(&[unit]);
                        self.make_string(s)
                    }
                    None => Ok(Value::Undefined),
                }
            }
            _ => Ok(Value::Undefined),
        }
    }

    /// `[[Get]]` on an object, walking the prototype chain and invoking
    /// accessors with the original receiver.
    pub(crate) fn object_get(&mut self, obj_id: HeapId, key: &PropertyKey, receiver: Value) -> RunResult<Value> {
        // Exotic receivers divert before the ordinary walk.
        match &self.realm.heap.object(obj_id).kind {
            ObjectKind::Proxy { .. } => return self.proxy_get(obj_id, key, receiver),
            ObjectKind::Namespace(module) => {
                let module = *module;
                return self.namespace_get(module, key);
            }
            _ => {}
        }

        let mut cursor = Some(obj_id);
        while let Some(current) = cursor {
            let obj = self.realm.heap.object(current);

            if let ObjectKind::Array(storage) = &obj.kind {
                match key {
                    PropertyKey::Index(i) => {
                        if let Some(value) = storage.get(*i) {
                            return Ok(value.clone());
                        }
                    }
                    PropertyKey::Str(id) if *id == StringId::from(StaticStrings::Length) => {
                        return Ok(Value::number(f64::from(storage.length())));
                    }
                    _ => {}
                }
            }

            if let Some(slot) = obj.own_slot(key) {
                match &slot.data {
                    SlotData::Data(value) => return Ok(value.clone()),
                    SlotData::Accessor { get, .. } => {
                        return match get.clone() {
                            Some(getter) => self.call_value(getter, receiver, &[]),
                            None => Ok(Value::Undefined),
                        };
                    }
                }
            }
            cursor = obj.prototype;
        }
        Ok(Value::Undefined)
    }

    // ---- generic set -----------------------------------------------------

    /// `base[key] = value` for any base. Nullish bases raise `TypeError`;
    /// other primitive bases ignore the write in sloppy mode and raise in
    /// strict mode.
    pub(crate) fn set_property_value(&mut self, base: Value, key: PropertyKey, value: Value) -> RunResult<()> {
        let strict = self.frame().code.flags().strict;
        match &base {
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "cannot set properties of {}",
                if matches!(base, Value::Null) { "null" } else { "undefined" },
            ))),
            Value::Ref(id) if matches!(self.realm.heap.get(*id), HeapData::Object(_)) => {
                let ok = self.object_set(*id, key.clone(), value, base.clone())?;
                if !ok && strict {
                    return Err(RunError::type_error(format!(
                        "cannot assign to property '{}'",
                        key.display(&self.realm.interns)
                    )));
                }
                Ok(())
            }
            _ => {
                if strict {
                    Err(RunError::type_error("cannot create properties on a primitive"))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn set_named_property(&mut self, base: Value, name: StringId, value: Value) -> RunResult<()> {
        let key = PropertyKey::from_string_id(name, &self.realm.interns);
        self.set_property_value(base, key, value)
    }

    /// `[[Set]]` on an object. Setters run against `receiver`; data
    /// writes land on `receiver` when it differs from the holder (the
    /// `super.x = v` rule).
    pub(crate) fn object_set(
        &mut self,
        obj_id: HeapId,
        key: PropertyKey,
        value: Value,
        receiver: Value,
    ) -> RunResult<bool> {
        match &self.realm.heap.object(obj_id).kind {
            ObjectKind::Proxy { .. } => return self.proxy_set(obj_id, key, value, receiver),
            // Module namespaces reject every write.
            ObjectKind::Namespace(_) => return Ok(false),
            _ => {}
        }

        // Array magic: length writes truncate, index writes go to storage.
        if let ObjectKind::Array(_) = &self.realm.heap.object(obj_id).kind {
            match &key {
                PropertyKey::Str(id) if *id == StringId::from(StaticStrings::Length) => {
                    return self.array_set_length(obj_id, value);
                }
                PropertyKey::Index(i) => {
                    let index = *i;
                    return self.array_set_index(obj_id, index, value);
                }
                _ => {}
            }
        }

        let mut cursor = Some(obj_id);
        while let Some(current) = cursor {
            let obj = self.realm.heap.object(current);
            if let Some(slot) = obj.own_slot(&key) {
                match &slot.data {
                    SlotData::Accessor { set, .. } => {
                        return match set.clone() {
                            Some(setter) => {
                                self.call_value(setter, receiver, &[value])?;
                                Ok(true)
                            }
                            None => Ok(false),
                        };
                    }
                    SlotData::Data(_) => {
                        if slot.const_binding && !slot.const_uninitialized {
                            return Err(RunError::type_error("assignment to constant variable"));
                        }
                        if !slot.writable {
                            return Ok(false);
                        }
                        if current == obj_id || receiver.ref_id() == Some(current) {
                            let slot = self
                                .realm
                                .heap
                                .object_mut(current)
                                .own_slot_mut(&key)
                                .expect("slot disappeared during set");
                            slot.data = SlotData::Data(value);
                            slot.const_uninitialized = false;
                            return Ok(true);
                        }
                        // Writable data on the prototype: create an own
                        // property on the receiver.
                        break;
                    }
                }
            }
            cursor = obj.prototype;
        }

        // Create an own data property on the receiver.
        let Some(receiver_id) = receiver.ref_id() else {
            return Ok(false);
        };
        if !matches!(self.realm.heap.get(receiver_id), HeapData::Object(_)) {
            return Ok(false);
        }
        if let ObjectKind::Array(_) = &self.realm.heap.object(receiver_id).kind
            && let PropertyKey::Index(i) = key
        {
            return self.array_set_index(receiver_id, i, value);
        }
        if !self.realm.heap.object(receiver_id).extensible {
            return Ok(false);
        }
        self.realm
            .heap
            .object_mut(receiver_id)
            .insert_slot(key, PropertySlot::data(value));
        Ok(true)
    }

    fn array_set_index(&mut self, obj_id: HeapId, index: u32, value: Value) -> RunResult<bool> {
        let obj = self.realm.heap.object(obj_id);
        let ObjectKind::Array(storage) = &obj.kind else {
            return Err(RunError::internal("array_set_index on a non-array"));
        };
        if storage.frozen {
            return Ok(false);
        }
        let is_new = !storage.has(index);
        if is_new && (!obj.extensible || storage.sealed) && index >= storage.length() {
            return Ok(false);
        }
        if is_new && storage.sealed {
            return Ok(false);
        }
        let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
            unreachable!("kind checked above");
        };
        storage.set(index, value);
        Ok(true)
    }

    fn array_set_length(&mut self, obj_id: HeapId, value: Value) -> RunResult<bool> {
        let n = self.to_number(value)?;
        let new_length = coerce::to_uint32(n);
        if f64::from(new_length) != n {
            return Err(RunError::range_error("invalid array length"));
        }
        let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
            return Err(RunError::internal("array_set_length on a non-array"));
        };
        if storage.frozen || (storage.sealed && new_length != storage.length()) {
            return Ok(false);
        }
        storage.set_length(new_length);
        Ok(true)
    }

    // ---- delete / has ----------------------------------------------------

    pub(crate) fn delete_named_property(&mut self, base: Value, name: StringId) -> RunResult<bool> {
        let key = PropertyKey::from_string_id(name, &self.realm.interns);
        self.delete_property_value(base, key)
    }

    pub(crate) fn delete_element(&mut self, base: Value, key: Value) -> RunResult<bool> {
        let key = self.to_property_key(key)?;
        self.delete_property_value(base, key)
    }

    pub(crate) fn delete_property_value(&mut self, base: Value, key: PropertyKey) -> RunResult<bool> {
        let strict = self.frame().code.flags().strict;
        let Some(obj_id) = base.ref_id() else {
            return Ok(true);
        };
        if !matches!(self.realm.heap.get(obj_id), HeapData::Object(_)) {
            return Ok(true);
        }
        let ok = self.object_delete(obj_id, &key)?;
        if !ok && strict {
            return Err(RunError::type_error(format!(
                "cannot delete property '{}'",
                key.display(&self.realm.interns)
            )));
        }
        Ok(ok)
    }

    pub(crate) fn object_delete(&mut self, obj_id: HeapId, key: &PropertyKey) -> RunResult<bool> {
        match &self.realm.heap.object(obj_id).kind {
            ObjectKind::Proxy { .. } => return self.proxy_delete(obj_id, key),
            ObjectKind::Namespace(_) => return Ok(false),
            ObjectKind::Array(storage) => {
                if let PropertyKey::Index(i) = key {
                    if storage.frozen || storage.sealed {
                        return Ok(false);
                    }
                    let index = *i;
                    let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
                        unreachable!("kind checked above");
                    };
                    return Ok(storage.delete(index));
                }
                if let PropertyKey::Str(id) = key
                    && *id == StringId::from(StaticStrings::Length)
                {
                    return Ok(false);
                }
            }
            _ => {}
        }

        let obj = self.realm.heap.object_mut(obj_id);
        match obj.own_slot(key) {
            None => Ok(true),
            Some(slot) if !slot.configurable => Ok(false),
            Some(_) => {
                obj.properties.shift_remove(key);
                Ok(true)
            }
        }
    }

    /// `[[HasProperty]]`, prototype chain included.
    pub(crate) fn object_has(&mut self, obj_id: HeapId, key: &PropertyKey) -> RunResult<bool> {
        match &self.realm.heap.object(obj_id).kind {
            ObjectKind::Proxy { .. } => return self.proxy_has(obj_id, key),
            ObjectKind::Namespace(module) => {
                let module = *module;
                if let PropertyKey::Str(name) = key {
                    let mut seen = Vec::new();
                    return Ok(!matches!(
                        resolve_export(&self.realm.modules, module, *name, &mut seen),
                        ExportResolution::NotFound
                    ));
                }
                return Ok(matches!(key, PropertyKey::Sym(s) if *s == WellKnownSymbol::ToStringTag.id()));
            }
            _ => {}
        }

        let mut cursor = Some(obj_id);
        while let Some(current) = cursor {
            let obj = self.realm.heap.object(current);
            if let ObjectKind::Array(storage) = &obj.kind {
                match key {
                    PropertyKey::Index(i) if storage.has(*i) => return Ok(true),
                    PropertyKey::Str(id) if *id == StringId::from(StaticStrings::Length) => return Ok(true),
                    _ => {}
                }
            }
            if obj.has_own(key) {
                return Ok(true);
            }
            cursor = obj.prototype;
        }
        Ok(false)
    }

    /// Own-key enumeration with the exotic kinds folded in.
    pub(crate) fn own_keys_of(
        &mut self,
        obj_id: HeapId,
        include_symbols: bool,
        include_non_enumerable: bool,
    ) -> RunResult<Vec<PropertyKey>> {
        match &self.realm.heap.object(obj_id).kind {
            ObjectKind::Array(storage) => {
                let mut keys: Vec<PropertyKey> = storage.own_indices().into_iter().map(PropertyKey::Index).collect();
                if include_non_enumerable {
                    keys.push(PropertyKey::Str(StringId::from(StaticStrings::Length)));
                }
                keys.extend(
                    self.realm
                        .heap
                        .object(obj_id)
                        .own_keys(include_symbols, include_non_enumerable),
                );
                Ok(keys)
            }
            ObjectKind::Namespace(module) => {
                let module = *module;
                let mut seen = Vec::new();
                let mut names = crate::module::export_names(&self.realm.modules, module, &mut seen);
                names.sort_by(|a, b| {
                    coerce::cmp_strings_code_units(self.realm.interns.get_str(*a), self.realm.interns.get_str(*b))
                });
                Ok(names.into_iter().map(PropertyKey::Str).collect())
            }
            ObjectKind::Proxy { target, .. } => {
                // Trap-less enumeration: forward to the target.
                let target = *target;
                self.own_keys_of(target, include_symbols, include_non_enumerable)
            }
            _ => Ok(self
                .realm
                .heap
                .object(obj_id)
                .own_keys(include_symbols, include_non_enumerable)),
        }
    }

    // ---- element (computed-key) forms ------------------------------------

    pub(crate) fn get_element(&mut self, base: Value, key: Value) -> RunResult<Value> {
        let key = self.to_property_key(key)?;
        self.get_property_value(base, &key)
    }

    pub(crate) fn set_element(&mut self, base: Value, key: Value, value: Value) -> RunResult<()> {
        let key = self.to_property_key(key)?;
        self.set_property_value(base, key, value)
    }

    // ---- in / instanceof -------------------------------------------------

    pub(crate) fn op_in(&mut self, key: Value, target: Value) -> RunResult<bool> {
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::type_error("'in' requires an object"));
        };
        if !matches!(self.realm.heap.get(obj_id), HeapData::Object(_)) {
            return Err(RunError::type_error("'in' requires an object"));
        }
        let key = self.to_property_key(key)?;
        self.object_has(obj_id, &key)
    }

    pub(crate) fn op_instanceof(&mut self, value: Value, target: Value) -> RunResult<bool> {
        if !self.is_object_value(&target) {
            return Err(RunError::type_error("right-hand side of 'instanceof' is not an object"));
        }
        // @@hasInstance wins over the ordinary protocol.
        let has_instance_key = PropertyKey::Sym(WellKnownSymbol::HasInstance.id());
        let has_instance = self.get_property_value(target.clone(), &has_instance_key)?;
        if !has_instance.is_nullish() && has_instance.is_callable(&self.realm.heap) {
            let result = self.call_value(has_instance, target, &[value])?;
            return Ok(result.to_boolean(&self.realm.heap, &self.realm.interns));
        }
        if !target.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("right-hand side of 'instanceof' is not callable"));
        }

        // Bound functions delegate to their target.
        let mut ctor = target.ref_id().expect("callable values are objects");
        while let ObjectKind::Bound(bound) = &self.realm.heap.object(ctor).kind {
            ctor = bound.target;
        }
        let proto_key = PropertyKey::Str(StringId::from(StaticStrings::Prototype));
        let expected = self.object_get(ctor, &proto_key, Value::Ref(ctor))?;
        let Some(expected_id) = expected.ref_id() else {
            return Err(RunError::type_error("constructor prototype is not an object"));
        };

        let Some(mut cursor) = value.ref_id() else {
            return Ok(false);
        };
        if !matches!(self.realm.heap.get(cursor), HeapData::Object(_)) {
            return Ok(false);
        }
        while let Some(proto) = self.realm.heap.object(cursor).prototype {
            if proto == expected_id {
                return Ok(true);
            }
            cursor = proto;
        }
        Ok(false)
    }

    // ---- name resolution -------------------------------------------------

    fn tdz_check(&self, name: StringId) -> RunResult<()> {
        // Names starting with '$' are compiler-internal and may observe
        // the sentinel.
        if self.realm.interns.get_str(name).starts_with('$') {
            return Ok(());
        }
        Err(RunError::reference_error(format!(
            "cannot access '{}' before initialization",
            self.realm.interns.get_str(name)
        )))
    }

    /// Resolves a name along the scope chain.
    pub(crate) fn lookup_name(&mut self, name: StringId) -> RunResult<Value> {
        match self.try_lookup_name(name, false)? {
            Some((value, _)) => Ok(value),
            None => Err(RunError::reference_error(format!(
                "{} is not defined",
                self.realm.interns.get_str(name)
            ))),
        }
    }

    /// Resolves a name and the implicit `this` for a bare-name call:
    /// `with`-object receivers are remembered, everything else gets
    /// `undefined` (strict) or the global object (sloppy).
    pub(crate) fn lookup_name_for_call(&mut self, name: StringId) -> RunResult<(Value, Value)> {
        let Some((value, with_this)) = self.try_lookup_name(name, true)? else {
            return Err(RunError::reference_error(format!(
                "{} is not defined",
                self.realm.interns.get_str(name)
            )));
        };
        let this = match with_this {
            Some(receiver) => receiver,
            None => {
                if self.frame().code.flags().strict {
                    Value::Undefined
                } else {
                    Value::Ref(self.realm.global_object)
                }
            }
        };
        Ok((value, this))
    }

    /// Walks the scope chain; `Ok(None)` means the name is unbound (the
    /// callers decide between `ReferenceError` and `typeof`'s answer).
    fn try_lookup_name(&mut self, name: StringId, for_call: bool) -> RunResult<Option<(Value, Option<Value>)>> {
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            let scope = self.realm.heap.scope(scope_id);
            let parent = scope.parent;
            match &scope.kind {
                ScopeKind::Activation(activation) => {
                    if let Some(binding) = activation.bindings.get(&name) {
                        if matches!(binding.value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        return Ok(Some((binding.value.clone(), None)));
                    }
                    // Lazy `arguments` in non-arrow activations without an
                    // explicit binding of that name.
                    if !activation.arrow && name == StringId::from(StaticStrings::Arguments) {
                        let value = self.materialize_arguments(scope_id)?;
                        return Ok(Some((value, None)));
                    }
                }
                ScopeKind::Block { bindings } => {
                    if let Some(binding) = bindings.get(&name) {
                        if matches!(binding.value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        return Ok(Some((binding.value.clone(), None)));
                    }
                }
                ScopeKind::Module { bindings, imports } => {
                    if let Some(binding) = bindings.get(&name) {
                        if matches!(binding.value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        return Ok(Some((binding.value.clone(), None)));
                    }
                    if let Some(target) = imports.get(&name).copied() {
                        let value = self.read_import(target, name)?;
                        return Ok(Some((value, None)));
                    }
                }
                ScopeKind::With { object, .. } => {
                    let object = *object;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if self.object_has(object, &key)? {
                        let value = self.object_get(object, &key, Value::Ref(object))?;
                        if matches!(value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        let receiver = for_call.then_some(Value::Ref(object));
                        return Ok(Some((value, receiver)));
                    }
                }
                ScopeKind::Global { object } => {
                    let object = *object;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if self.object_has(object, &key)? {
                        let value = self.object_get(object, &key, Value::Ref(object))?;
                        if matches!(value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        return Ok(Some((value, None)));
                    }
                }
            }
            cursor = parent;
        }
        Ok(None)
    }

    /// Reads through an import indirection, TDZ-checking the source
    /// binding.
    fn read_import(&mut self, target: ImportTarget, name: StringId) -> RunResult<Value> {
        match target {
            ImportTarget::Binding(module, local) => {
                let scope = self.realm.modules[module.index()]
                    .scope
                    .ok_or_else(|| RunError::internal("imported module has no environment"))?;
                match self.realm.heap.scope(scope).find_binding(local) {
                    Some(binding) => {
                        if matches!(binding.value, Value::Uninit) {
                            self.tdz_check(name)?;
                        }
                        Ok(binding.value.clone())
                    }
                    None => Err(RunError::reference_error(format!(
                        "{} is not defined",
                        self.realm.interns.get_str(name)
                    ))),
                }
            }
            ImportTarget::Namespace(module) => {
                let ns = self.get_or_create_namespace(module)?;
                Ok(Value::Ref(ns))
            }
        }
    }

    /// `typeof name`: unresolved names answer `"undefined"` instead of
    /// raising; a dead-zone read still raises.
    pub(crate) fn op_typeof_name(&mut self, name: StringId) -> RunResult<Value> {
        match self.try_lookup_name(name, false)? {
            Some((value, _)) => {
                let type_name = value.js_type(&self.realm.heap).typeof_str();
                Ok(Value::Str(self.realm.interns.intern(type_name)))
            }
            None => Ok(Value::Str(StringId::from(StaticStrings::Undefined))),
        }
    }

    /// Assignment to a resolved name.
    pub(crate) fn set_name(&mut self, name: StringId, value: Value) -> RunResult<()> {
        let strict = self.frame().code.flags().strict;
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            let scope = self.realm.heap.scope(scope_id);
            let parent = scope.parent;
            match &scope.kind {
                ScopeKind::Module { imports, .. } if imports.contains_key(&name) => {
                    return Err(RunError::type_error("assignment to imported binding"));
                }
                ScopeKind::Activation(_) | ScopeKind::Block { .. } | ScopeKind::Module { .. } => {
                    if let Some(binding) = self.realm.heap.scope(scope_id).find_binding(name) {
                        match binding.kind {
                            BindingKind::Const => {
                                return Err(RunError::type_error("assignment to constant variable"));
                            }
                            BindingKind::Let if matches!(binding.value, Value::Uninit) => {
                                return self.tdz_check(name);
                            }
                            _ => {}
                        }
                        self.realm
                            .heap
                            .scope_mut(scope_id)
                            .find_binding_mut(name)
                            .expect("binding disappeared during set")
                            .value = value;
                        return Ok(());
                    }
                }
                ScopeKind::With { object, const_bindings } => {
                    let object = *object;
                    let const_bindings = *const_bindings;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if self.object_has(object, &key)? {
                        if const_bindings {
                            return Err(RunError::type_error("assignment to constant variable"));
                        }
                        let ok = self.object_set(object, key, value, Value::Ref(object))?;
                        if !ok && strict {
                            return Err(RunError::type_error(format!(
                                "cannot assign to '{}'",
                                self.realm.interns.get_str(name)
                            )));
                        }
                        return Ok(());
                    }
                }
                ScopeKind::Global { object } => {
                    let object = *object;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if self.object_has(object, &key)? {
                        let ok = self.object_set(object, key, value, Value::Ref(object))?;
                        if !ok && strict {
                            return Err(RunError::type_error(format!(
                                "cannot assign to '{}'",
                                self.realm.interns.get_str(name)
                            )));
                        }
                        return Ok(());
                    }
                    // Unresolved: implicit global in sloppy mode only.
                    if strict {
                        return Err(RunError::reference_error(format!(
                            "{} is not defined",
                            self.realm.interns.get_str(name)
                        )));
                    }
                    self.realm
                        .heap
                        .object_mut(object)
                        .insert_slot(key, PropertySlot::data(value));
                    return Ok(());
                }
            }
            cursor = parent;
        }
        Err(RunError::reference_error(format!(
            "{} is not defined",
            self.realm.interns.get_str(name)
        )))
    }

    /// `let` writes. The declaring initializer clears the dead zone;
    /// ordinary writes into the dead zone raise.
    pub(crate) fn set_let(&mut self, name: StringId, value: Value, init: bool) -> RunResult<()> {
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            if self.realm.heap.scope(scope_id).find_binding(name).is_some() {
                let binding = self
                    .realm
                    .heap
                    .scope(scope_id)
                    .find_binding(name)
                    .expect("just checked");
                if !init && matches!(binding.value, Value::Uninit) {
                    return self.tdz_check(name);
                }
                self.realm
                    .heap
                    .scope_mut(scope_id)
                    .find_binding_mut(name)
                    .expect("just checked")
                    .value = value;
                return Ok(());
            }
            cursor = self.realm.heap.scope(scope_id).parent;
        }
        Err(RunError::internal("SetLet on an undeclared binding"))
    }

    /// `const` initialization; later writes raise `TypeError`.
    pub(crate) fn set_const(&mut self, name: StringId, value: Value) -> RunResult<()> {
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            if let Some(binding) = self.realm.heap.scope(scope_id).find_binding(name) {
                if !matches!(binding.value, Value::Uninit) {
                    return Err(RunError::type_error("assignment to constant variable"));
                }
                self.realm
                    .heap
                    .scope_mut(scope_id)
                    .find_binding_mut(name)
                    .expect("just checked")
                    .value = value;
                return Ok(());
            }
            cursor = self.realm.heap.scope(scope_id).parent;
        }
        Err(RunError::internal("SetConst on an undeclared binding"))
    }

    /// Hoisted `var` declaration on the nearest variable scope.
    pub(crate) fn declare_var(&mut self, name: StringId) -> RunResult<()> {
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            let scope = self.realm.heap.scope(scope_id);
            let parent = scope.parent;
            match &scope.kind {
                ScopeKind::Activation(_) | ScopeKind::Module { .. } => {
                    if self.realm.heap.scope(scope_id).find_binding(name).is_none() {
                        self.realm
                            .heap
                            .scope_mut(scope_id)
                            .declare(name, Binding::var(Value::Undefined));
                    }
                    return Ok(());
                }
                ScopeKind::Global { object } => {
                    let object = *object;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if !self.realm.heap.object(object).has_own(&key) {
                        self.realm.heap.object_mut(object).insert_slot(
                            key,
                            PropertySlot::data_with_attrs(Value::Undefined, true, true, false),
                        );
                    }
                    return Ok(());
                }
                _ => {}
            }
            cursor = parent;
        }
        Err(RunError::internal("no variable scope on the chain"))
    }

    /// `delete name`: scope bindings refuse, `with`/global objects
    /// delegate to property deletion.
    pub(crate) fn delete_name(&mut self, name: StringId) -> RunResult<bool> {
        let mut cursor = Some(self.current_scope());
        while let Some(scope_id) = cursor {
            let scope = self.realm.heap.scope(scope_id);
            let parent = scope.parent;
            match &scope.kind {
                ScopeKind::Activation(_) | ScopeKind::Block { .. } | ScopeKind::Module { .. } => {
                    if scope.find_binding(name).is_some() {
                        return Ok(false);
                    }
                }
                ScopeKind::With { object, .. } | ScopeKind::Global { object } => {
                    let object = *object;
                    let key = PropertyKey::from_string_id(name, &self.realm.interns);
                    if self.object_has(object, &key)? {
                        return self.object_delete(object, &key);
                    }
                }
            }
            cursor = parent;
        }
        Ok(true)
    }

    // ---- increment / decrement -------------------------------------------

    fn incdec_value(&mut self, old: Value, flags: u8) -> RunResult<(Value, Value)> {
        use super::numeric::Numeric;
        let (new_value, old_numeric) = match self.to_numeric(old)? {
            Numeric::Number(n) => {
                let delta = if flags & incdec::DEC != 0 { -1.0 } else { 1.0 };
                (Value::number(n + delta), Value::number(n))
            }
            Numeric::BigInt(b) => {
                let one = num_bigint::BigInt::from(1);
                let new = if flags & incdec::DEC != 0 { b.clone() - one } else { b.clone() + one };
                (self.make_bigint(new)?, self.make_bigint(b)?)
            }
        };
        let pushed = if flags & incdec::POST != 0 {
            old_numeric
        } else {
            new_value.clone()
        };
        Ok((new_value, pushed))
    }

    pub(crate) fn op_incdec_var(&mut self, name: StringId, flags: u8) -> RunResult<Value> {
        let old = self.lookup_name(name)?;
        let (new_value, pushed) = self.incdec_value(old, flags)?;
        self.set_name(name, new_value)?;
        Ok(pushed)
    }

    pub(crate) fn op_incdec_prop(&mut self, obj: Value, name: StringId, flags: u8) -> RunResult<Value> {
        let old = self.get_named_property(obj.clone(), name)?;
        let (new_value, pushed) = self.incdec_value(old, flags)?;
        self.set_named_property(obj, name, new_value)?;
        Ok(pushed)
    }

    pub(crate) fn op_incdec_elem(&mut self, obj: Value, key: Value, flags: u8) -> RunResult<Value> {
        let key = self.to_property_key(key)?;
        let old = self.get_property_value(obj.clone(), &key)?;
        let (new_value, pushed) = self.incdec_value(old, flags)?;
        self.set_property_value(obj, key, new_value)?;
        Ok(pushed)
    }

    // ---- super properties ------------------------------------------------

    /// Base object for `super` lookups: the prototype of the running
    /// method's home object.
    fn super_base(&mut self) -> RunResult<HeapId> {
        let function = self
            .frame()
            .function
            .ok_or_else(|| RunError::syntax_error("'super' outside a method"))?;
        let home = match &self.realm.heap.object(function).kind {
            ObjectKind::Function(data) => data.home_object,
            _ => None,
        }
        .ok_or_else(|| RunError::syntax_error("'super' outside a method"))?;
        self.realm
            .heap
            .object(home)
            .prototype
            .ok_or_else(|| RunError::type_error("'super' has a null prototype"))
    }

    pub(crate) fn op_super_property(&mut self, op: Opcode) -> RunResult<()> {
        let base = self.super_base()?;
        match op {
            Opcode::GetPropSuper => {
                let this = self.pop();
                let key = PropertyKey::from_string_id(self.string_reg, &self.realm.interns);
                let value = self.object_get(base, &key, this)?;
                self.push(value);
            }
            Opcode::SetPropSuper => {
                let value = self.pop();
                let this = self.pop();
                let key = PropertyKey::from_string_id(self.string_reg, &self.realm.interns);
                // Writes on super land on the receiver, never the home
                // object's prototype.
                self.object_set(base, key, value.clone(), this)?;
                self.push(value);
            }
            Opcode::GetElemSuper => {
                let key = self.pop();
                let this = self.pop();
                let key = self.to_property_key(key)?;
                let value = self.object_get(base, &key, this)?;
                self.push(value);
            }
            Opcode::SetElemSuper => {
                let value = self.pop();
                let key = self.pop();
                let this = self.pop();
                let key = self.to_property_key(key)?;
                self.object_set(base, key, value.clone(), this)?;
                self.push(value);
            }
            _ => return Err(RunError::internal("super dispatch")),
        }
        Ok(())
    }

    // ---- with / per-iteration scopes --------------------------------------

    pub(crate) fn op_enter_with(&mut self, target: Value, const_bindings: bool) -> RunResult<()> {
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::type_error("'with' requires an object"));
        };
        if !matches!(self.realm.heap.get(obj_id), HeapData::Object(_)) {
            return Err(RunError::type_error("'with' requires an object"));
        }
        let current = self.current_scope();
        let scope = Scope::with(current, obj_id, const_bindings);
        let id = self.alloc(HeapData::Scope(scope))?;
        self.frame_mut().scope = id;
        Ok(())
    }

    /// Clones the current block scope so each loop iteration captures its
    /// own copies of the per-iteration bindings.
    pub(crate) fn op_copy_per_iter_scope(&mut self) -> RunResult<()> {
        let current = self.current_scope();
        let scope = self.realm.heap.scope(current);
        let ScopeKind::Block { bindings } = &scope.kind else {
            return Err(RunError::internal("CopyPerIterScope outside a block scope"));
        };
        let parent = scope.parent.expect("block scopes have parents");
        let copied = Scope {
            parent: Some(parent),
            kind: ScopeKind::Block {
                bindings: bindings.clone(),
            },
        };
        let id = self.alloc(HeapData::Scope(copied))?;
        self.frame_mut().scope = id;
        Ok(())
    }

    // ---- iteration --------------------------------------------------------

    /// GetIterator: looks up `@@iterator`, calls it, checks the result is
    /// an object.
    pub(crate) fn call_iterator(&mut self, target: Value) -> RunResult<Value> {
        let key = PropertyKey::Sym(WellKnownSymbol::Iterator.id());
        let method = self.get_property_value(target.clone(), &key)?;
        if !method.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("value is not iterable"));
        }
        let iterator = self.call_value(method, target, &[])?;
        if !self.is_object_value(&iterator) {
            return Err(RunError::type_error("@@iterator returned a non-object"));
        }
        Ok(iterator)
    }

    /// IteratorNext: `(value, done)` from one `next()` call.
    pub(crate) fn iter_next(&mut self, iterator: Value, argument: Option<Value>) -> RunResult<(Value, bool)> {
        let next = self.get_named_property(iterator.clone(), StringId::from(StaticStrings::Next))?;
        if !next.is_callable(&self.realm.heap) {
            return Err(RunError::type_error("iterator has no next method"));
        }
        let args: &[Value] = match &argument {
            Some(value) => std::slice::from_ref(value),
            None => &[],
        };
        let result = self.call_value(next, iterator, args)?;
        self.iter_result_parts(result)
    }

    /// Splits an iterator-result object into `(value, done)`.
    pub(crate) fn iter_result_parts(&mut self, result: Value) -> RunResult<(Value, bool)> {
        if !self.is_object_value(&result) {
            return Err(RunError::type_error("iterator result is not an object"));
        }
        let done = self.get_named_property(result.clone(), StringId::from(StaticStrings::Done))?;
        let done = done.to_boolean(&self.realm.heap, &self.realm.interns);
        let value = self.get_named_property(result, StringId::from(StaticStrings::Value))?;
        Ok((value, done))
    }

    /// IteratorClose on abrupt loop exit: call `return()` when present,
    /// swallowing its errors (the original abrupt completion wins).
    pub(crate) fn iter_close(&mut self, iterator: Value) -> RunResult<()> {
        let return_fn = match self.get_named_property(iterator.clone(), StringId::from(StaticStrings::Return)) {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        if return_fn.is_callable(&self.realm.heap) {
            let _ = self.call_value(return_fn, iterator, &[]);
        }
        Ok(())
    }

    // ---- literals ---------------------------------------------------------

    pub(crate) fn op_literal_set(&mut self) -> RunResult<()> {
        let value = self.pop();
        let target = self.peek().clone();
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::internal("LiteralSet on a non-array"));
        };
        let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
            return Err(RunError::internal("LiteralSet on a non-array"));
        };
        storage.push(value);
        Ok(())
    }

    pub(crate) fn op_sparse_array_lit(&mut self, next_index: u32) -> RunResult<()> {
        let target = self.peek().clone();
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::internal("SparseArrayLit on a non-array"));
        };
        let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
            return Err(RunError::internal("SparseArrayLit on a non-array"));
        };
        if next_index > storage.length() {
            storage.set_length(next_index);
        }
        Ok(())
    }

    pub(crate) fn op_literal_key_set(&mut self) -> RunResult<()> {
        let value = self.pop();
        let key = self.pop();
        let target = self.peek().clone();
        let key = self.to_property_key(key)?;
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::internal("LiteralKeySet on a non-object"));
        };
        if let ObjectKind::Array(_) = &self.realm.heap.object(obj_id).kind
            && let PropertyKey::Index(i) = key
        {
            self.array_set_index(obj_id, i, value)?;
            return Ok(());
        }
        self.realm.heap.object_mut(obj_id).insert_slot(key, PropertySlot::data(value));
        Ok(())
    }

    /// Literal getter/setter definition; the function's home object is the
    /// literal so `super` works in its body.
    pub(crate) fn op_literal_accessor(&mut self, is_setter: bool) -> RunResult<()> {
        let function = self.pop();
        let key = self.pop();
        let target = self.peek().clone();
        let key = self.to_property_key(key)?;
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::internal("accessor literal on a non-object"));
        };
        if let Some(function_id) = function.ref_id()
            && let ObjectKind::Function(data) = &mut self.realm.heap.object_mut(function_id).kind
        {
            data.home_object = Some(obj_id);
        }
        let descriptor = if is_setter {
            PropertyDescriptor {
                set: Some(function),
                enumerable: Some(true),
                configurable: Some(true),
                ..PropertyDescriptor::default()
            }
        } else {
            PropertyDescriptor {
                get: Some(function),
                enumerable: Some(true),
                configurable: Some(true),
                ..PropertyDescriptor::default()
            }
        };
        define_own_property(&mut self.realm.heap, &self.realm.interns, obj_id, key, &descriptor, false)?;
        Ok(())
    }

    /// Appends every element of an iterable to the array under the top of
    /// stack.
    pub(crate) fn op_spread(&mut self) -> RunResult<()> {
        let iterable = self.pop();
        let target = self.peek().clone();
        let Some(obj_id) = target.ref_id() else {
            return Err(RunError::internal("Spread target is not an array"));
        };
        let iterator = self.call_iterator(iterable)?;
        loop {
            let (value, done) = self.iter_next(iterator.clone(), None)?;
            if done {
                break;
            }
            let ObjectKind::Array(storage) = &mut self.realm.heap.object_mut(obj_id).kind else {
                return Err(RunError::internal("Spread target is not an array"));
            };
            storage.push(value);
        }
        Ok(())
    }

    // ---- prototype mutation ----------------------------------------------

    /// `[[SetPrototypeOf]]` with cycle rejection.
    pub(crate) fn set_prototype(&mut self, obj_id: HeapId, proto: Option<HeapId>) -> RunResult<()> {
        if let Some(proto_id) = proto
            && prototype_would_cycle(&self.realm.heap, obj_id, proto_id)
        {
            return Err(RunError::type_error("cyclic prototype chain"));
        }
        let obj = self.realm.heap.object(obj_id);
        if !obj.extensible && obj.prototype != proto {
            return Err(RunError::type_error("cannot change the prototype of a non-extensible object"));
        }
        self.realm.heap.object_mut(obj_id).prototype = proto;
        Ok(())
    }

    // ---- proxies ----------------------------------------------------------

    fn proxy_parts(&self, proxy_id: HeapId) -> RunResult<(HeapId, HeapId)> {
        match &self.realm.heap.object(proxy_id).kind {
            ObjectKind::Proxy {
                target,
                handler,
                revoked,
                ..
            } => {
                if *revoked {
                    Err(RunError::type_error("cannot perform operation on a revoked proxy"))
                } else {
                    Ok((*target, *handler))
                }
            }
            _ => Err(RunError::internal("proxy operation on a non-proxy")),
        }
    }

    fn proxy_trap(&mut self, handler: HeapId, name: &str) -> RunResult<Value> {
        let name_id = self.realm.interns.intern(name);
        let key = PropertyKey::from_string_id(name_id, &self.realm.interns);
        let trap = self.object_get(handler, &key, Value::Ref(handler))?;
        if trap.is_nullish() {
            return Ok(Value::Undefined);
        }
        if !trap.is_callable(&self.realm.heap) {
            return Err(RunError::type_error(format!("proxy trap '{name}' is not a function")));
        }
        Ok(trap)
    }

    fn proxy_get(&mut self, proxy_id: HeapId, key: &PropertyKey, receiver: Value) -> RunResult<Value> {
        let (target, handler) = self.proxy_parts(proxy_id)?;
        let trap = self.proxy_trap(handler, "get")?;
        if trap.is_nullish() {
            return self.object_get(target, key, receiver);
        }
        let key_value = self.key_to_value(key)?;
        let result = self.call_value(trap, Value::Ref(handler), &[Value::Ref(target), key_value, receiver])?;

        // Invariant: a non-configurable non-writable data property must be
        // reported with its actual value.
        if let Some(slot) = self.realm.heap.object(target).own_slot(key)
            && !slot.configurable
            && !slot.is_accessor()
            && !slot.writable
            && let Some(expected) = slot.value()
        {
            let expected = expected.clone();
            if !result.same_value(&expected, &self.realm.heap, &self.realm.interns) {
                return Err(RunError::type_error(
                    "proxy get trap reported a different value for a non-configurable property",
                ));
            }
        }
        Ok(result)
    }

    fn proxy_set(&mut self, proxy_id: HeapId, key: PropertyKey, value: Value, receiver: Value) -> RunResult<bool> {
        let (target, handler) = self.proxy_parts(proxy_id)?;
        let trap = self.proxy_trap(handler, "set")?;
        if trap.is_nullish() {
            return self.object_set(target, key, value, receiver);
        }
        let key_value = self.key_to_value(&key)?;
        let result = self.call_value(
            trap,
            Value::Ref(handler),
            &[Value::Ref(target), key_value, value.clone(), receiver],
        )?;
        let accepted = result.to_boolean(&self.realm.heap, &self.realm.interns);
        if accepted
            && let Some(slot) = self.realm.heap.object(target).own_slot(&key)
            && !slot.configurable
            && !slot.is_accessor()
            && !slot.writable
            && let Some(expected) = slot.value()
        {
            let expected = expected.clone();
            if !value.same_value(&expected, &self.realm.heap, &self.realm.interns) {
                return Err(RunError::type_error(
                    "proxy set trap changed a non-configurable non-writable property",
                ));
            }
        }
        Ok(accepted)
    }

    fn proxy_has(&mut self, proxy_id: HeapId, key: &PropertyKey) -> RunResult<bool> {
        let (target, handler) = self.proxy_parts(proxy_id)?;
        let trap = self.proxy_trap(handler, "has")?;
        if trap.is_nullish() {
            return self.object_has(target, key);
        }
        let key_value = self.key_to_value(key)?;
        let result = self.call_value(trap, Value::Ref(handler), &[Value::Ref(target), key_value])?;
        let reported = result.to_boolean(&self.realm.heap, &self.realm.interns);
        if !reported
            && let Some(slot) = self.realm.heap.object(target).own_slot(key)
            && !slot.configurable
        {
            return Err(RunError::type_error(
                "proxy has trap hid a non-configurable property",
            ));
        }
        Ok(reported)
    }

    fn proxy_delete(&mut self, proxy_id: HeapId, key: &PropertyKey) -> RunResult<bool> {
        let (target, handler) = self.proxy_parts(proxy_id)?;
        let trap = self.proxy_trap(handler, "deleteProperty")?;
        if trap.is_nullish() {
            return self.object_delete(target, key);
        }
        let key_value = self.key_to_value(key)?;
        let result = self.call_value(trap, Value::Ref(handler), &[Value::Ref(target), key_value])?;
        Ok(result.to_boolean(&self.realm.heap, &self.realm.interns))
    }

    // ---- module namespaces -------------------------------------------------

    /// `[[Get]]` on a module namespace: resolves the export and reads the
    /// live binding, TDZ included.
    fn namespace_get(&mut self, module: ModuleId, key: &PropertyKey) -> RunResult<Value> {
        match key {
            PropertyKey::Sym(s) if *s == WellKnownSymbol::ToStringTag.id() => {
                Ok(Value::Str(self.realm.interns.intern("Module")))
            }
            PropertyKey::Str(name) => {
                let mut seen = Vec::new();
                match resolve_export(&self.realm.modules, module, *name, &mut seen) {
                    ExportResolution::Binding(source, local) => {
                        let scope = self.realm.modules[source.index()]
                            .scope
                            .ok_or_else(|| RunError::internal("module environment missing"))?;
                        match self.realm.heap.scope(scope).find_binding(local) {
                            Some(binding) => {
                                if matches!(binding.value, Value::Uninit) {
                                    return Err(RunError::reference_error(format!(
                                        "cannot access '{}' before initialization",
                                        self.realm.interns.get_str(*name)
                                    )));
                                }
                                Ok(binding.value.clone())
                            }
                            None => Ok(Value::Undefined),
                        }
                    }
                    ExportResolution::Namespace(source) => {
                        let ns = self.get_or_create_namespace(source)?;
                        Ok(Value::Ref(ns))
                    }
                    ExportResolution::NotFound | ExportResolution::Ambiguous => Ok(Value::Undefined),
                }
            }
            PropertyKey::Index(_) | PropertyKey::Sym(_) => Ok(Value::Undefined),
        }
    }

    /// Builds (or returns the cached) namespace exotic object of a module.
    pub(crate) fn get_or_create_namespace(&mut self, module: ModuleId) -> RunResult<HeapId> {
        if let Some(ns) = self.realm.modules[module.index()].namespace {
            return Ok(ns);
        }
        let mut ns = JsObject::with_kind(None, ClassTag::Module, ObjectKind::Namespace(module));
        ns.extensible = false;
        let id = self.alloc(HeapData::Object(ns))?;
        self.realm.modules[module.index()].namespace = Some(id);
        Ok(id)
    }

    // ---- arguments object --------------------------------------------------

    /// Materializes the `arguments` array-like for an activation on first
    /// read and caches it on the activation.
    fn materialize_arguments(&mut self, scope_id: HeapId) -> RunResult<Value> {
        let (cached, args, callee) = {
            let ScopeKind::Activation(activation) = &self.realm.heap.scope(scope_id).kind else {
                return Err(RunError::internal("arguments outside an activation"));
            };
            (activation.arguments_object, activation.args.clone(), activation.function)
        };
        if let Some(id) = cached {
            return Ok(Value::Ref(id));
        }

        let mut obj = JsObject::with_kind(
            Some(self.realm.intrinsics.object_proto),
            ClassTag::Arguments,
            ObjectKind::Plain,
        );
        for (index, value) in args.iter().enumerate() {
            obj.insert_slot(PropertyKey::Index(index as u32), PropertySlot::data(value.clone()));
        }
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Length)),
            PropertySlot::method(Value::Int(i32::try_from(args.len()).unwrap_or(i32::MAX))),
        );
        obj.insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Callee)),
            PropertySlot::method(Value::Ref(callee)),
        );
        let id = self.alloc(HeapData::Object(obj))?;
        if let ScopeKind::Activation(activation) = &mut self.realm.heap.scope_mut(scope_id).kind {
            activation.arguments_object = Some(id);
        }
        Ok(Value::Ref(id))
    }
}
