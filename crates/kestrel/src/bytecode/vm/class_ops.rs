//! Class definition, construction protocol, and private members.
//!
//! `ClassDef` assembles a constructor function: a prototype object with a
//! constructor backpointer, the heritage wiring (`extends` links both the
//! prototype chain and the constructor chain; `extends null` keeps a
//! derived protocol with no super constructor), a class-storage identity
//! object for private members, and field-initializer registration.
//!
//! Private members are per-object associated values keyed by the storage
//! identity plus the member name; the brand entry proves the constructor
//! ran for the instance, and every access checks it first.

use crate::{
    bytecode::op::{classdef, classmethod, privatedef},
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{FunctionId, StaticStrings, StringId},
    property::{AssocKey, ObjectKind, PropertyKey, PropertySlot, SlotData},
    resource::ResourceTracker,
    scope::ScopeKind,
    tracer::VmTracer,
    types::function::ClassInfo,
    value::Value,
};

use super::Vm;

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    fn function_data_mut(
        &mut self,
        fn_id: HeapId,
    ) -> RunResult<&mut crate::types::function::FunctionData> {
        match &mut self.realm.heap.object_mut(fn_id).kind {
            ObjectKind::Function(data) => Ok(data),
            _ => Err(RunError::internal("expected a script function")),
        }
    }

    /// `ClassDef`: assemble the constructor for a class body.
    pub(crate) fn op_class_def(&mut self, descriptor: FunctionId, flags: u8) -> RunResult<()> {
        let derived = flags & classdef::DERIVED != 0;

        // Heritage is on the stack for `extends` clauses; `null` is legal
        // and keeps the derived protocol with no super constructor.
        let super_ctor = if derived {
            let heritage = self.pop();
            match &heritage {
                Value::Null => None,
                value if value.is_callable(&self.realm.heap) => value.ref_id(),
                _ => {
                    return Err(RunError::type_error("class heritage is not a constructor"));
                }
            }
        } else {
            None
        };

        let ctor_value = self.make_function(descriptor)?;
        let ctor_id = ctor_value.ref_id().expect("make_function returns an object");

        // Class `prototype` is non-writable; rewrite the slot the plain
        // function path created.
        let proto_key = PropertyKey::Str(StringId::from(StaticStrings::Prototype));
        let proto_id = {
            let slot = self
                .realm
                .heap
                .object_mut(ctor_id)
                .own_slot_mut(&proto_key)
                .expect("functions carry a prototype slot");
            slot.writable = false;
            match &slot.data {
                SlotData::Data(Value::Ref(id)) => *id,
                _ => return Err(RunError::internal("class prototype slot is not an object")),
            }
        };

        // Heritage wiring: the prototype chain and the constructor chain
        // both follow `extends`.
        if derived {
            let parent_proto = match super_ctor {
                None => None,
                Some(super_id) => {
                    let super_proto = self.object_get(super_id, &proto_key, Value::Ref(super_id))?;
                    match &super_proto {
                        Value::Null => None,
                        Value::Ref(id) => Some(*id),
                        _ => {
                            return Err(RunError::type_error(
                                "class heritage has a non-object prototype property",
                            ));
                        }
                    }
                }
            };
            self.realm.heap.object_mut(proto_id).prototype = parent_proto;
            if let Some(super_id) = super_ctor {
                self.realm.heap.object_mut(ctor_id).prototype = Some(super_id);
            }
        }

        // Private-member identity.
        let storage = self.alloc(HeapData::Object(crate::property::JsObject::plain(None)))?;

        let data = self.function_data_mut(ctor_id)?;
        data.home_object = Some(proto_id);
        data.class_storage = Some(storage);
        data.class_info = Some(Box::new(ClassInfo {
            super_ctor,
            derived,
            storage,
            field_inits: Vec::new(),
        }));

        self.push(ctor_value);
        Ok(())
    }

    /// `ClassMethod`: `[ctor, key, fn]` -> `[ctor]`.
    pub(crate) fn op_class_method(&mut self, flags: u8) -> RunResult<()> {
        let function = self.pop();
        let key = self.pop();
        let ctor = self.peek().clone();
        let key = self.to_property_key(key)?;

        let ctor_id = ctor
            .ref_id()
            .ok_or_else(|| RunError::internal("ClassMethod without a constructor"))?;
        let is_static = flags & classmethod::STATIC != 0;

        // A static member named "prototype" would shadow the class's own.
        if is_static
            && key == PropertyKey::Str(StringId::from(StaticStrings::Prototype))
        {
            return Err(RunError::type_error(
                "classes may not have a static property named 'prototype'",
            ));
        }

        let proto_key = PropertyKey::Str(StringId::from(StaticStrings::Prototype));
        let target = if is_static {
            ctor_id
        } else {
            match self.realm.heap.object(ctor_id).get_data(&proto_key) {
                Some(Value::Ref(id)) => *id,
                _ => return Err(RunError::internal("class constructor lost its prototype")),
            }
        };

        // Wire the method for `super` and private access.
        let storage = self.function_data_mut(ctor_id)?.class_storage;
        if let Some(fn_id) = function.ref_id()
            && let ObjectKind::Function(data) = &mut self.realm.heap.object_mut(fn_id).kind
        {
            data.home_object = Some(target);
            data.class_storage = storage;
        }

        let target_obj = self.realm.heap.object_mut(target);
        if flags & (classmethod::GETTER | classmethod::SETTER) != 0 {
            let (get, set) = if flags & classmethod::GETTER != 0 {
                (Some(function), None)
            } else {
                (None, Some(function))
            };
            // Merge with an existing accessor pair for get/set siblings.
            match target_obj.own_slot_mut(&key) {
                Some(slot) if slot.is_accessor() => {
                    if let SlotData::Accessor {
                        get: old_get,
                        set: old_set,
                    } = &mut slot.data
                    {
                        if let Some(get) = get {
                            *old_get = Some(get);
                        }
                        if let Some(set) = set {
                            *old_set = Some(set);
                        }
                    }
                }
                _ => {
                    target_obj.insert_slot(
                        key,
                        PropertySlot {
                            data: SlotData::Accessor { get, set },
                            writable: false,
                            enumerable: false,
                            configurable: true,
                            const_binding: false,
                            const_uninitialized: false,
                        },
                    );
                }
            }
        } else {
            target_obj.insert_slot(key, PropertySlot::method(function));
        }
        Ok(())
    }

    /// `ClassFieldInit`: register an instance-field initializer on the
    /// class under construction.
    pub(crate) fn op_class_field_init(&mut self, descriptor: FunctionId) -> RunResult<()> {
        let ctor = self.peek().clone();
        let ctor_id = ctor
            .ref_id()
            .ok_or_else(|| RunError::internal("ClassFieldInit without a constructor"))?;
        match self.function_data_mut(ctor_id)?.class_info.as_mut() {
            Some(info) => {
                info.field_inits.push(descriptor);
                Ok(())
            }
            None => Err(RunError::internal("ClassFieldInit on a non-class function")),
        }
    }

    /// `ClassStorage`: the running function's private-member identity.
    pub(crate) fn op_class_storage(&mut self) -> RunResult<Value> {
        let function = self
            .frame()
            .function
            .ok_or_else(|| RunError::syntax_error("private members outside a class"))?;
        match &self.realm.heap.object(function).kind {
            ObjectKind::Function(data) => data
                .class_storage
                .map(Value::Ref)
                .ok_or_else(|| RunError::syntax_error("private members outside a class")),
            _ => Err(RunError::internal("running frame is not a script function")),
        }
    }

    // ---- private member access --------------------------------------------

    fn private_target(&mut self, obj: &Value, storage: &Value) -> RunResult<(HeapId, HeapId)> {
        let storage_id = storage
            .ref_id()
            .ok_or_else(|| RunError::internal("private access without a class storage"))?;
        let obj_id = obj
            .ref_id()
            .filter(|id| matches!(self.realm.heap.get(*id), HeapData::Object(_)))
            .ok_or_else(|| {
                RunError::type_error("cannot access private members of a non-object")
            })?;
        // Brand check: the constructor must have initialized this object.
        if self
            .realm
            .heap
            .object(obj_id)
            .associated_get(&AssocKey::Brand(storage_id))
            .is_none()
        {
            return Err(RunError::type_error(
                "cannot access private member on an object of a different class",
            ));
        }
        Ok((obj_id, storage_id))
    }

    /// `GetPrivate`: `[storage, obj]` -> `[value]`.
    pub(crate) fn op_get_private(&mut self, name: StringId) -> RunResult<()> {
        let obj = self.pop();
        let storage = self.pop();
        let (obj_id, storage_id) = self.private_target(&obj, &storage)?;

        let object = self.realm.heap.object(obj_id);
        if let Some(value) = object.associated_get(&AssocKey::Private(storage_id, name)) {
            let value = value.clone();
            self.push(value);
            return Ok(());
        }
        if let Some(value) = object.associated_get(&AssocKey::PrivateMethod(storage_id, name)) {
            let value = value.clone();
            self.push(value);
            return Ok(());
        }
        if let Some(getter) = object.associated_get(&AssocKey::PrivateGetter(storage_id, name)) {
            let getter = getter.clone();
            let result = self.call_value(getter, obj, &[])?;
            self.push(result);
            return Ok(());
        }
        if object
            .associated_get(&AssocKey::PrivateSetter(storage_id, name))
            .is_some()
        {
            return Err(RunError::type_error(format!(
                "private member '#{}' has only a setter",
                self.realm.interns.get_str(name)
            )));
        }
        Err(RunError::type_error(format!(
            "private member '#{}' is not defined",
            self.realm.interns.get_str(name)
        )))
    }

    /// `SetPrivate`: `[storage, obj, value]` -> `[value]`.
    pub(crate) fn op_set_private(&mut self, name: StringId) -> RunResult<()> {
        let value = self.pop();
        let obj = self.pop();
        let storage = self.pop();
        let (obj_id, storage_id) = self.private_target(&obj, &storage)?;

        let object = self.realm.heap.object(obj_id);
        if object.associated_get(&AssocKey::Private(storage_id, name)).is_some() {
            self.realm
                .heap
                .object_mut(obj_id)
                .associated_set(AssocKey::Private(storage_id, name), value.clone());
            self.push(value);
            return Ok(());
        }
        if object
            .associated_get(&AssocKey::PrivateMethod(storage_id, name))
            .is_some()
        {
            return Err(RunError::type_error(format!(
                "cannot assign to private method '#{}'",
                self.realm.interns.get_str(name)
            )));
        }
        if let Some(setter) = object.associated_get(&AssocKey::PrivateSetter(storage_id, name)) {
            let setter = setter.clone();
            self.call_value(setter, obj, &[value.clone()])?;
            self.push(value);
            return Ok(());
        }
        if object
            .associated_get(&AssocKey::PrivateGetter(storage_id, name))
            .is_some()
        {
            return Err(RunError::type_error(format!(
                "private member '#{}' has only a getter",
                self.realm.interns.get_str(name)
            )));
        }
        Err(RunError::type_error(format!(
            "private member '#{}' is not defined",
            self.realm.interns.get_str(name)
        )))
    }

    /// `DefinePrivate`: `[storage, obj, value]` -> `[]`; runs inside the
    /// constructor, before brand checks apply to the instance.
    pub(crate) fn op_define_private(&mut self, name: StringId, flags: u8) -> RunResult<()> {
        let value = self.pop();
        let obj = self.pop();
        let storage = self.pop();
        let storage_id = storage
            .ref_id()
            .ok_or_else(|| RunError::internal("private definition without a class storage"))?;
        let obj_id = obj
            .ref_id()
            .ok_or_else(|| RunError::type_error("cannot define private members on a primitive"))?;

        let key = if flags & privatedef::GETTER != 0 {
            AssocKey::PrivateGetter(storage_id, name)
        } else if flags & privatedef::SETTER != 0 {
            AssocKey::PrivateSetter(storage_id, name)
        } else if flags & privatedef::METHOD != 0 {
            AssocKey::PrivateMethod(storage_id, name)
        } else {
            AssocKey::Private(storage_id, name)
        };
        self.realm.heap.object_mut(obj_id).associated_set(key, value);
        Ok(())
    }

    // ---- super() ----------------------------------------------------------

    /// The innermost activation scope of the running frame.
    fn innermost_activation(&self) -> RunResult<HeapId> {
        let mut cursor = Some(self.current_scope());
        while let Some(id) = cursor {
            let scope = self.realm.heap.scope(id);
            if matches!(scope.kind, ScopeKind::Activation(_)) {
                return Ok(id);
            }
            cursor = scope.parent;
        }
        Err(RunError::internal("no activation on the scope chain"))
    }

    /// `SuperCall`: `[args..]` -> `[]`.
    pub(crate) fn op_super_call(&mut self, argc: u8) -> RunResult<()> {
        let count = usize::from(argc);
        let start = self.stack.len() - count;
        let args: Vec<Value> = self.stack.drain(start..).collect();
        self.super_call_with(&args)
    }

    /// `DefaultCtorSuperCall`: forward the activation's original argument
    /// vector (the implicit derived constructor body).
    pub(crate) fn op_default_ctor_super_call(&mut self) -> RunResult<()> {
        let activation = self.innermost_activation()?;
        let args = match &self.realm.heap.scope(activation).kind {
            ScopeKind::Activation(activation) => activation.args.clone(),
            _ => unreachable!("innermost_activation returns activations"),
        };
        self.super_call_with(&args)
    }

    fn super_call_with(&mut self, args: &[Value]) -> RunResult<()> {
        let function = self
            .frame()
            .function
            .ok_or_else(|| RunError::syntax_error("'super' outside a constructor"))?;
        let (super_ctor, derived) = match &self.realm.heap.object(function).kind {
            ObjectKind::Function(data) => match &data.class_info {
                Some(info) => (info.super_ctor, info.derived),
                None => return Err(RunError::syntax_error("'super' outside a constructor")),
            },
            _ => return Err(RunError::internal("running frame is not a script function")),
        };
        if !derived {
            return Err(RunError::syntax_error("'super' in a base-class constructor"));
        }

        let activation = self.innermost_activation()?;
        let already_bound = match &self.realm.heap.scope(activation).kind {
            ScopeKind::Activation(record) => !matches!(record.this, Value::Uninit),
            _ => unreachable!("innermost_activation returns activations"),
        };
        if already_bound {
            return Err(RunError::reference_error("super constructor may only be called once"));
        }

        // `extends null`: the call itself fails, after argument evaluation.
        let Some(super_ctor) = super_ctor else {
            return Err(RunError::type_error("super constructor is not a constructor"));
        };

        // new.target flows through so the instance gets the prototype of
        // the constructor `new` was originally applied to.
        let new_target = match &self.frame().new_target {
            Value::Undefined => Value::Ref(function),
            other => other.clone(),
        };
        let instance = self.construct(Value::Ref(super_ctor), args, new_target)?;

        if let ScopeKind::Activation(record) = &mut self.realm.heap.scope_mut(activation).kind {
            record.this = instance.clone();
        }
        let instance_id = instance
            .ref_id()
            .ok_or_else(|| RunError::internal("construct returned a primitive"))?;
        self.initialize_instance(function, instance_id)?;
        Ok(())
    }

    /// Brands an instance and runs the class's field initializers against
    /// it.
    pub(crate) fn initialize_instance(&mut self, ctor_id: HeapId, instance: HeapId) -> RunResult<()> {
        let (storage, field_inits, scope, proto) = match &self.realm.heap.object(ctor_id).kind {
            ObjectKind::Function(data) => match &data.class_info {
                Some(info) => (info.storage, info.field_inits.clone(), data.scope, data.home_object),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        self.realm
            .heap
            .object_mut(instance)
            .associated_set(AssocKey::Brand(storage), Value::Bool(true));

        for descriptor in field_inits {
            let init = self.instantiate_function(descriptor, scope)?;
            if let Some(init_id) = init.ref_id()
                && let ObjectKind::Function(data) = &mut self.realm.heap.object_mut(init_id).kind
            {
                data.home_object = proto;
                data.class_storage = Some(storage);
            }
            self.call_value(init, Value::Ref(instance), &[])?;
        }
        Ok(())
    }
}
