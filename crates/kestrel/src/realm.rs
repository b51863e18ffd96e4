//! The execution context: heap, interns, intrinsics, globals, and jobs.
//!
//! A realm owns everything the spec calls per-context state: the arena
//! heap, the interns table (shared constant pool plus runtime interning),
//! the intrinsic prototype objects, the global object and scope, the FIFO
//! microtask queue, the module registry, and the host hooks (interrupt,
//! unhandled-rejection, regexp proxy, module loader). One realm is owned
//! by one host thread at a time; nothing here is shared.

use ahash::AHashMap;

use crate::{
    bytecode::Program,
    error::ErrorKind,
    exception::Exception,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings, StringId, WellKnownSymbol},
    module::{ModuleId, ModuleLoader, ModuleRecord},
    property::{ClassTag, JsObject, ObjectKind, PropertyKey, PropertySlot},
    regexp::{FancyRegexProxy, RegExpProxy},
    resource::{ResourceError, ResourceTracker},
    scope::Scope,
    types::{array::ArrayStorage, function::NativeFunction, promise::{JobQueue, PromiseData}},
    value::Value,
};

/// Language-version behavior switch (spec-level variants, not syntax).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageVersion {
    /// ES2022 semantics.
    #[default]
    Es2022,
    /// Pre-ES5 compatibility: legacy octal in string-to-number.
    Legacy,
}

/// Host hook polled between opcode bursts; an `Err` cancels execution.
pub type InterruptHook = Box<dyn FnMut() -> Result<(), String>>;

/// Host hook receiving unhandled promise rejections.
pub type RejectionHook = Box<dyn FnMut(Exception)>;

/// Per-realm intrinsic objects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Intrinsics {
    pub object_proto: HeapId,
    pub function_proto: HeapId,
    pub array_proto: HeapId,
    pub array_iterator_proto: HeapId,
    pub generator_proto: HeapId,
    pub promise_proto: HeapId,
    pub regexp_proto: HeapId,
    pub async_from_sync_proto: HeapId,
    /// The scriptable undefined wrapper consumed by legacy this-binding
    /// paths.
    pub scriptable_undefined: HeapId,
    pub error_proto: HeapId,
    pub type_error_proto: HeapId,
    pub range_error_proto: HeapId,
    pub reference_error_proto: HeapId,
    pub syntax_error_proto: HeapId,
    pub internal_error_proto: HeapId,
    pub uri_error_proto: HeapId,
    pub eval_error_proto: HeapId,
    pub aggregate_error_proto: HeapId,
}

impl Intrinsics {
    pub fn error_proto_for(&self, kind: ErrorKind) -> HeapId {
        match kind {
            ErrorKind::TypeError => self.type_error_proto,
            ErrorKind::RangeError => self.range_error_proto,
            ErrorKind::ReferenceError => self.reference_error_proto,
            ErrorKind::SyntaxError => self.syntax_error_proto,
            ErrorKind::InternalError => self.internal_error_proto,
            ErrorKind::UriError => self.uri_error_proto,
            ErrorKind::EvalError => self.eval_error_proto,
            ErrorKind::AggregateError => self.aggregate_error_proto,
            ErrorKind::Error | ErrorKind::HostError => self.error_proto,
        }
    }

    pub fn push_roots(&self, roots: &mut Vec<HeapId>) {
        roots.extend([
            self.object_proto,
            self.function_proto,
            self.array_proto,
            self.array_iterator_proto,
            self.generator_proto,
            self.promise_proto,
            self.regexp_proto,
            self.async_from_sync_proto,
            self.scriptable_undefined,
            self.error_proto,
            self.type_error_proto,
            self.range_error_proto,
            self.reference_error_proto,
            self.syntax_error_proto,
            self.internal_error_proto,
            self.uri_error_proto,
            self.eval_error_proto,
            self.aggregate_error_proto,
        ]);
    }
}

/// One execution context.
pub(crate) struct Realm<T: ResourceTracker> {
    pub heap: Heap<T>,
    pub interns: Interns,
    pub intrinsics: Intrinsics,
    pub global_object: HeapId,
    pub global_scope: HeapId,
    pub jobs: JobQueue,
    pub modules: Vec<ModuleRecord>,
    /// Canonical specifier -> registry index.
    pub module_index: AHashMap<StringId, ModuleId>,
    pub regexp_proxy: Box<dyn RegExpProxy>,
    pub module_loader: Option<Box<dyn ModuleLoader>>,
    pub language_version: LanguageVersion,
    pub interrupt_hook: Option<InterruptHook>,
    pub rejection_hook: Option<RejectionHook>,
    /// Unhandled rejections collected when no hook is set.
    pub unhandled_rejections: Vec<Exception>,
    /// Promises that rejected with no handler yet; reported when the
    /// microtask queue drains if still unhandled.
    pub pending_rejections: Vec<HeapId>,
}

impl<T: ResourceTracker> Realm<T> {
    /// Builds a realm around a compiled program: intrinsics, the global
    /// object, and the standard globals.
    pub fn new(program: Program, tracker: T) -> Result<Self, ResourceError> {
        let mut heap = Heap::new(tracker);
        let mut interns = program.interns;

        let intrinsics = install_intrinsics(&mut heap, &mut interns)?;
        let global_object = {
            let mut global = JsObject::with_kind(Some(intrinsics.object_proto), ClassTag::Global, ObjectKind::Plain);
            global.extensible = true;
            heap.allocate(HeapData::Object(global))?
        };
        let global_scope = heap.allocate(HeapData::Scope(Scope::global(global_object)))?;

        let mut realm = Self {
            heap,
            interns,
            intrinsics,
            global_object,
            global_scope,
            jobs: JobQueue::new(),
            modules: Vec::new(),
            module_index: AHashMap::new(),
            regexp_proxy: Box::new(FancyRegexProxy::new()),
            module_loader: None,
            language_version: LanguageVersion::default(),
            interrupt_hook: None,
            rejection_hook: None,
            unhandled_rejections: Vec::new(),
            pending_rejections: Vec::new(),
        };
        realm.install_globals()?;
        Ok(realm)
    }

    pub fn legacy_octal(&self) -> bool {
        self.language_version == LanguageVersion::Legacy
    }

    // ---- allocation helpers ----------------------------------------------

    pub fn new_plain_object(&mut self) -> Result<HeapId, ResourceError> {
        self.heap
            .allocate(HeapData::Object(JsObject::plain(Some(self.intrinsics.object_proto))))
    }

    pub fn new_array(&mut self, capacity: u32) -> Result<HeapId, ResourceError> {
        let obj = JsObject::with_kind(
            Some(self.intrinsics.array_proto),
            ClassTag::Array,
            ObjectKind::Array(ArrayStorage::with_capacity(capacity)),
        );
        self.heap.allocate(HeapData::Object(obj))
    }

    pub fn new_array_with(&mut self, values: Vec<Value>) -> Result<HeapId, ResourceError> {
        let mut storage = ArrayStorage::with_capacity(values.len() as u32);
        for value in values {
            storage.push(value);
        }
        let obj = JsObject::with_kind(
            Some(self.intrinsics.array_proto),
            ClassTag::Array,
            ObjectKind::Array(storage),
        );
        self.heap.allocate(HeapData::Object(obj))
    }

    pub fn new_promise(&mut self) -> Result<HeapId, ResourceError> {
        let obj = JsObject::with_kind(
            Some(self.intrinsics.promise_proto),
            ClassTag::Promise,
            ObjectKind::Promise(Box::new(PromiseData::pending())),
        );
        self.heap.allocate(HeapData::Object(obj))
    }

    /// A native function object with its `name` and `length` properties.
    pub fn new_native(&mut self, native: NativeFunction) -> Result<HeapId, ResourceError> {
        new_native_on(&mut self.heap, &mut self.interns, self.intrinsics.function_proto, native)
    }

    // ---- host reporting ---------------------------------------------------

    /// Routes an unhandled rejection to the host hook or the collected
    /// report list; never crashes the process.
    pub fn report_unhandled_rejection(&mut self, reason: &Value) {
        let exception = Exception::from_thrown_value(reason, &self.heap, &self.interns);
        match self.rejection_hook.as_mut() {
            Some(hook) => hook(exception),
            None => self.unhandled_rejections.push(exception),
        }
    }

    /// Roots for garbage collection that live on the realm itself.
    pub fn push_roots(&self, roots: &mut Vec<HeapId>) {
        roots.push(self.global_object);
        roots.push(self.global_scope);
        self.intrinsics.push_roots(roots);
        for module in &self.modules {
            module.trace(&mut |id| roots.push(id));
        }
        for job in &self.jobs {
            job.trace(&mut |id| roots.push(id));
        }
        roots.extend(self.pending_rejections.iter().copied());
    }

    // ---- global installation ----------------------------------------------

    fn install_globals(&mut self) -> Result<(), ResourceError> {
        let global = self.global_object;

        self.define_global(StaticStrings::GlobalThis, Value::Ref(global), true)?;
        self.define_global(StaticStrings::Undefined, Value::Undefined, false)?;
        self.define_global(StaticStrings::NaN, Value::Float(f64::NAN), false)?;
        self.define_global(StaticStrings::Infinity, Value::Float(f64::INFINITY), false)?;

        // Object
        let object_statics = [
            NativeFunction::ObjectFreeze,
            NativeFunction::ObjectSeal,
            NativeFunction::ObjectPreventExtensions,
            NativeFunction::ObjectIsFrozen,
            NativeFunction::ObjectIsSealed,
            NativeFunction::ObjectIsExtensible,
            NativeFunction::ObjectGetPrototypeOf,
            NativeFunction::ObjectSetPrototypeOf,
            NativeFunction::ObjectDefineProperty,
            NativeFunction::ObjectKeys,
            NativeFunction::ObjectGetOwnPropertyNames,
        ];
        self.install_ctor(
            StaticStrings::ObjectCtor,
            NativeFunction::ObjectCtor,
            self.intrinsics.object_proto,
            &object_statics,
        )?;

        // Function: only the prototype is reachable; source compilation is
        // a front-end concern.
        let function_holder = {
            let mut obj = JsObject::plain(Some(self.intrinsics.object_proto));
            obj.insert_slot(
                PropertyKey::Str(StringId::from(StaticStrings::Prototype)),
                PropertySlot::data_with_attrs(Value::Ref(self.intrinsics.function_proto), false, false, false),
            );
            self.heap.allocate(HeapData::Object(obj))?
        };
        self.define_global(StaticStrings::FunctionCtor, Value::Ref(function_holder), true)?;

        // Array
        let array_statics = [NativeFunction::ArrayFrom, NativeFunction::ArrayIsArray];
        self.install_ctor(
            StaticStrings::ArrayCtor,
            NativeFunction::ArrayCtor,
            self.intrinsics.array_proto,
            &array_statics,
        )?;

        // Symbol, with the well-known symbols as data properties.
        let symbol_ctor = self.install_ctor(
            StaticStrings::SymbolCtor,
            NativeFunction::SymbolCtor,
            self.intrinsics.object_proto,
            &[NativeFunction::SymbolFor, NativeFunction::SymbolKeyFor],
        )?;
        let well_knowns = [
            ("iterator", WellKnownSymbol::Iterator),
            ("asyncIterator", WellKnownSymbol::AsyncIterator),
            ("toPrimitive", WellKnownSymbol::ToPrimitive),
            ("hasInstance", WellKnownSymbol::HasInstance),
            ("toStringTag", WellKnownSymbol::ToStringTag),
        ];
        for (name, symbol) in well_knowns {
            let key = self.interns.intern(name);
            self.heap.object_mut(symbol_ctor).insert_slot(
                PropertyKey::Str(key),
                PropertySlot::data_with_attrs(Value::Symbol(symbol.id()), false, false, false),
            );
        }

        // BigInt / Proxy / Promise
        self.install_ctor(
            StaticStrings::BigIntCtor,
            NativeFunction::BigIntCtor,
            self.intrinsics.object_proto,
            &[],
        )?;
        let proxy_ctor = self.new_native(NativeFunction::ProxyCtor)?;
        let proxy_name = self.interns.intern("Proxy");
        self.heap.object_mut(self.global_object).insert_slot(
            PropertyKey::Str(proxy_name),
            PropertySlot::data_with_attrs(Value::Ref(proxy_ctor), true, false, true),
        );
        self.install_ctor(
            StaticStrings::PromiseCtor,
            NativeFunction::PromiseCtor,
            self.intrinsics.promise_proto,
            &[NativeFunction::PromiseResolve, NativeFunction::PromiseReject],
        )?;

        // Error constructors
        let error_ctors = [
            (StaticStrings::ErrorCtor, ErrorKind::Error),
            (StaticStrings::TypeErrorCtor, ErrorKind::TypeError),
            (StaticStrings::RangeErrorCtor, ErrorKind::RangeError),
            (StaticStrings::ReferenceErrorCtor, ErrorKind::ReferenceError),
            (StaticStrings::SyntaxErrorCtor, ErrorKind::SyntaxError),
            (StaticStrings::InternalErrorCtor, ErrorKind::InternalError),
            (StaticStrings::UriErrorCtor, ErrorKind::UriError),
            (StaticStrings::EvalErrorCtor, ErrorKind::EvalError),
            (StaticStrings::AggregateErrorCtor, ErrorKind::AggregateError),
        ];
        for (name, kind) in error_ctors {
            let proto = self.intrinsics.error_proto_for(kind);
            self.install_ctor(name, NativeFunction::ErrorCtor(kind), proto, &[])?;
        }

        Ok(())
    }

    fn define_global(&mut self, name: StaticStrings, value: Value, writable: bool) -> Result<(), ResourceError> {
        self.heap.object_mut(self.global_object).insert_slot(
            PropertyKey::Str(StringId::from(name)),
            PropertySlot::data_with_attrs(value, writable, false, writable),
        );
        Ok(())
    }

    /// Installs a constructor global: native function object, `prototype`
    /// slot, `constructor` backlink, and static methods.
    fn install_ctor(
        &mut self,
        name: StaticStrings,
        ctor: NativeFunction,
        proto: HeapId,
        statics: &[NativeFunction],
    ) -> Result<HeapId, ResourceError> {
        let ctor_id = self.new_native(ctor)?;
        self.heap.object_mut(ctor_id).insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Prototype)),
            PropertySlot::data_with_attrs(Value::Ref(proto), false, false, false),
        );
        self.heap.object_mut(proto).insert_slot(
            PropertyKey::Str(StringId::from(StaticStrings::Constructor)),
            PropertySlot::method(Value::Ref(ctor_id)),
        );
        for &native in statics {
            let static_id = self.new_native(native)?;
            let key = self.interns.intern(native.name());
            self.heap
                .object_mut(ctor_id)
                .insert_slot(PropertyKey::Str(key), PropertySlot::method(Value::Ref(static_id)));
        }
        self.define_global(name, Value::Ref(ctor_id), true)?;
        Ok(ctor_id)
    }
}

/// Builds a native function object on a raw heap (used during intrinsic
/// bootstrap before the realm exists).
fn new_native_on<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &mut Interns,
    function_proto: HeapId,
    native: NativeFunction,
) -> Result<HeapId, ResourceError> {
    let name = interns.intern(native.name());
    let mut obj = JsObject::with_kind(Some(function_proto), ClassTag::Function, ObjectKind::Native(native));
    obj.insert_slot(
        PropertyKey::Str(StringId::from(StaticStrings::Name)),
        PropertySlot::data_with_attrs(Value::Str(name), false, false, true),
    );
    obj.insert_slot(
        PropertyKey::Str(StringId::from(StaticStrings::Length)),
        PropertySlot::data_with_attrs(
            Value::Int(i32::try_from(native.param_count()).unwrap_or(0)),
            false,
            false,
            true,
        ),
    );
    heap.allocate(HeapData::Object(obj))
}

/// Adds one native method to a prototype object.
fn add_method<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &mut Interns,
    function_proto: HeapId,
    target: HeapId,
    native: NativeFunction,
) -> Result<HeapId, ResourceError> {
    let fn_id = new_native_on(heap, interns, function_proto, native)?;
    let key = interns.intern(native.name());
    heap.object_mut(target)
        .insert_slot(PropertyKey::Str(key), PropertySlot::method(Value::Ref(fn_id)));
    Ok(fn_id)
}

/// One error-kind prototype: `name`, empty `message`, chained through the
/// base error prototype.
fn error_proto_for<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &mut Interns,
    parent: HeapId,
    kind: ErrorKind,
) -> Result<HeapId, ResourceError> {
    let proto = heap.allocate(HeapData::Object(JsObject::with_kind(
        Some(parent),
        ClassTag::Error,
        ObjectKind::Plain,
    )))?;
    let name = interns.intern(kind.name());
    heap.object_mut(proto).insert_slot(
        PropertyKey::Str(StringId::from(StaticStrings::Name)),
        PropertySlot::method(Value::Str(name)),
    );
    heap.object_mut(proto).insert_slot(
        PropertyKey::Str(StringId::from(StaticStrings::Message)),
        PropertySlot::method(Value::Str(StringId::from(StaticStrings::EmptyString))),
    );
    Ok(proto)
}

/// Creates the intrinsic prototype objects and wires their methods.
fn install_intrinsics<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &mut Interns,
) -> Result<Intrinsics, ResourceError> {
    let object_proto = heap.allocate(HeapData::Object(JsObject::plain(None)))?;
    let function_proto = heap.allocate(HeapData::Object(JsObject::with_kind(
        Some(object_proto),
        ClassTag::Function,
        ObjectKind::Plain,
    )))?;

    add_method(heap, interns, function_proto, object_proto, NativeFunction::ObjectProtoHasOwnProperty)?;
    add_method(heap, interns, function_proto, object_proto, NativeFunction::ObjectProtoToString)?;
    add_method(heap, interns, function_proto, object_proto, NativeFunction::ObjectProtoValueOf)?;

    add_method(heap, interns, function_proto, function_proto, NativeFunction::FunctionProtoCall)?;
    add_method(heap, interns, function_proto, function_proto, NativeFunction::FunctionProtoApply)?;
    add_method(heap, interns, function_proto, function_proto, NativeFunction::FunctionProtoBind)?;
    add_method(heap, interns, function_proto, function_proto, NativeFunction::FunctionProtoToString)?;

    let array_proto = heap.allocate(HeapData::Object(JsObject::with_kind(
        Some(object_proto),
        ClassTag::Array,
        ObjectKind::Array(ArrayStorage::new()),
    )))?;
    add_method(heap, interns, function_proto, array_proto, NativeFunction::ArrayProtoPush)?;
    add_method(heap, interns, function_proto, array_proto, NativeFunction::ArrayProtoJoin)?;
    add_method(heap, interns, function_proto, array_proto, NativeFunction::ArrayProtoIndexOf)?;
    add_method(heap, interns, function_proto, array_proto, NativeFunction::ArrayProtoIncludes)?;
    // `values` doubles as @@iterator.
    let values_fn = add_method(heap, interns, function_proto, array_proto, NativeFunction::ArrayProtoValues)?;
    heap.object_mut(array_proto).insert_slot(
        PropertyKey::Sym(WellKnownSymbol::Iterator.id()),
        PropertySlot::method(Value::Ref(values_fn)),
    );

    let array_iterator_proto = heap.allocate(HeapData::Object(JsObject::plain(Some(object_proto))))?;
    add_method(heap, interns, function_proto, array_iterator_proto, NativeFunction::ArrayIteratorNext)?;

    let generator_proto = heap.allocate(HeapData::Object(JsObject::plain(Some(object_proto))))?;
    add_method(heap, interns, function_proto, generator_proto, NativeFunction::GeneratorProtoNext)?;
    add_method(heap, interns, function_proto, generator_proto, NativeFunction::GeneratorProtoReturn)?;
    add_method(heap, interns, function_proto, generator_proto, NativeFunction::GeneratorProtoThrow)?;
    // Generators are iterable: @@iterator returns the receiver.
    let identity = new_native_on(heap, interns, function_proto, NativeFunction::ObjectProtoValueOf)?;
    heap.object_mut(generator_proto).insert_slot(
        PropertyKey::Sym(WellKnownSymbol::Iterator.id()),
        PropertySlot::method(Value::Ref(identity)),
    );

    let promise_proto = heap.allocate(HeapData::Object(JsObject::with_kind(
        Some(object_proto),
        ClassTag::Promise,
        ObjectKind::Plain,
    )))?;
    add_method(heap, interns, function_proto, promise_proto, NativeFunction::PromiseProtoThen)?;
    add_method(heap, interns, function_proto, promise_proto, NativeFunction::PromiseProtoCatch)?;

    let regexp_proto = heap.allocate(HeapData::Object(JsObject::with_kind(
        Some(object_proto),
        ClassTag::RegExp,
        ObjectKind::Plain,
    )))?;

    let async_from_sync_proto = heap.allocate(HeapData::Object(JsObject::plain(Some(object_proto))))?;
    add_method(heap, interns, function_proto, async_from_sync_proto, NativeFunction::AsyncFromSyncNext)?;

    // The scriptable undefined wrapper: frozen, empty, classed Undefined.
    let scriptable_undefined = {
        let mut obj = JsObject::with_kind(None, ClassTag::Undefined, ObjectKind::Plain);
        obj.seal_slots(true);
        heap.allocate(HeapData::Object(obj))?
    };

    let error_proto = error_proto_for(heap, interns, object_proto, ErrorKind::Error)?;
    let type_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::TypeError)?;
    let range_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::RangeError)?;
    let reference_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::ReferenceError)?;
    let syntax_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::SyntaxError)?;
    let internal_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::InternalError)?;
    let uri_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::UriError)?;
    let eval_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::EvalError)?;
    let aggregate_error_proto = error_proto_for(heap, interns, error_proto, ErrorKind::AggregateError)?;

    Ok(Intrinsics {
        object_proto,
        function_proto,
        array_proto,
        array_iterator_proto,
        generator_proto,
        promise_proto,
        regexp_proto,
        async_from_sync_proto,
        scriptable_undefined,
        error_proto,
        type_error_proto,
        range_error_proto,
        reference_error_proto,
        syntax_error_proto,
        internal_error_proto,
        uri_error_proto,
        eval_error_proto,
        aggregate_error_proto,
    })
}
