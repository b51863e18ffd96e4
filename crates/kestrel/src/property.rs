//! Object and property-map model.
//!
//! Every object owns an insertion-ordered property map from [`PropertyKey`]
//! to [`PropertySlot`], a prototype link, a class tag, an extensibility
//! flag, kind-specific internal slots ([`ObjectKind`]), and an optional
//! associated-value table used for private members and brand checks.
//!
//! Plain data operations (own lookup, define-own validation, enumeration
//! order, freeze/seal) live here; operations that can run script (accessor
//! getters, proxy traps, prototype-chain walks that hit a `With` scope) are
//! driven by the VM in `bytecode::vm::property_ops`.

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapId},
    intern::{Interns, StringId, SymbolId},
    module::ModuleId,
    regexp::RegExpData,
    resource::ResourceTracker,
    types::{
        array::ArrayStorage,
        function::{BoundFunction, FunctionData, NativeFunction},
        generator::{AsyncState, GeneratorRecord},
        promise::PromiseData,
    },
    value::Value,
};

/// A property key: canonical integer index, interned string, or symbol.
///
/// Numeric strings canonicalize to `Index` so that `obj["7"]` and `obj[7]`
/// address the same slot and enumerate in numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum PropertyKey {
    Index(u32),
    Str(StringId),
    Sym(SymbolId),
}

impl PropertyKey {
    /// Builds a key from string content, canonicalizing numeric form.
    pub fn from_str(s: &str, interns: &mut Interns) -> Self {
        match canonical_index(s) {
            Some(i) => Self::Index(i),
            None => Self::Str(interns.intern(s)),
        }
    }

    /// Builds a key from an already-interned name, canonicalizing numeric
    /// form by content.
    pub fn from_string_id(id: StringId, interns: &Interns) -> Self {
        match canonical_index(interns.get_str(id)) {
            Some(i) => Self::Index(i),
            None => Self::Str(id),
        }
    }

    /// Renders the key the way error messages and `ownKeys` need it.
    pub fn display(&self, interns: &Interns) -> String {
        match self {
            Self::Index(i) => i.to_string(),
            Self::Str(id) => interns.get_str(*id).to_owned(),
            Self::Sym(id) => interns.symbol_to_string(*id),
        }
    }
}

/// Parses a canonical array-index string: digits only, no superfluous
/// leading zero, value below 2^32-1.
pub(crate) fn canonical_index(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 10 {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = s.parse().ok()?;
    // 2^32-1 is the maximum array length, not a valid index.
    if value < u64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Payload of a property slot: plain data or an accessor pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum SlotData {
    Data(Value),
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
    },
}

/// One property slot: payload plus attributes.
///
/// `const_binding` and `const_uninitialized` are implementation-private
/// flags used when the global object doubles as a scope: a global `const`
/// is a non-writable slot whose first (declaring) write is still allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PropertySlot {
    pub data: SlotData,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    pub const_binding: bool,
    pub const_uninitialized: bool,
}

impl PropertySlot {
    /// Standard data slot, fully mutable and enumerable.
    pub fn data(value: Value) -> Self {
        Self {
            data: SlotData::Data(value),
            writable: true,
            enumerable: true,
            configurable: true,
            const_binding: false,
            const_uninitialized: false,
        }
    }

    /// Data slot with explicit attributes.
    pub fn data_with_attrs(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            data: SlotData::Data(value),
            writable,
            enumerable,
            configurable,
            const_binding: false,
            const_uninitialized: false,
        }
    }

    /// The `{writable, non-enumerable, configurable}` shape used for methods
    /// and built-ins.
    pub fn method(value: Value) -> Self {
        Self::data_with_attrs(value, true, false, true)
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.data, SlotData::Accessor { .. })
    }

    /// Reads the data payload; `None` for accessors.
    pub fn value(&self) -> Option<&Value> {
        match &self.data {
            SlotData::Data(v) => Some(v),
            SlotData::Accessor { .. } => None,
        }
    }
}

/// Parsed form of a property descriptor argument.
///
/// Absent fields stay `None`; `define_own_property` promotes them to
/// defaults on creation and leaves them untouched on update.
#[derive(Debug, Clone, Default)]
pub(crate) struct PropertyDescriptor {
    pub value: Option<Value>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub writable: Option<bool>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }
}

/// Class tag stamped on every object, reported by `Object.prototype.toString`
/// and consulted by a handful of semantic special cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
pub(crate) enum ClassTag {
    Object,
    Function,
    Array,
    Arguments,
    Error,
    Boolean,
    Number,
    String,
    Symbol,
    BigInt,
    Generator,
    AsyncGenerator,
    Promise,
    RegExp,
    Module,
    Global,
    /// The scriptable undefined wrapper: reports `typeof` "undefined",
    /// is falsy, and compares loosely equal to `undefined`.
    Undefined,
}

impl ClassTag {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Key into an object's associated-value table.
///
/// Private members are keyed by the identity of the class-storage object
/// plus the member name; the brand entry alone proves the constructor ran
/// for this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum AssocKey {
    /// A writable private field: (class storage identity, name).
    Private(HeapId, StringId),
    /// A read-only private method.
    PrivateMethod(HeapId, StringId),
    /// A private getter.
    PrivateGetter(HeapId, StringId),
    /// A private setter.
    PrivateSetter(HeapId, StringId),
    /// The brand sentinel for a class storage identity.
    Brand(HeapId),
}

/// Kind-specific internal slots.
///
/// This is the closed union the spec's design notes call for: built-in
/// kinds are variants with their own payload, and the property-model entry
/// points dispatch on the variant instead of a class hierarchy.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum ObjectKind {
    Plain,
    Array(ArrayStorage),
    Function(Box<FunctionData>),
    Native(NativeFunction),
    Bound(Box<BoundFunction>),
    Error(ErrorKind),
    Generator(Box<GeneratorRecord>),
    AsyncState(Box<AsyncState>),
    Promise(Box<PromiseData>),
    Namespace(ModuleId),
    Proxy {
        target: HeapId,
        handler: HeapId,
        /// Cached callability of the target; proxies of callables are
        /// callable themselves.
        callable: bool,
        revoked: bool,
    },
    RegExp(Box<RegExpData>),
    /// Iterator over an array's elements (`Array.prototype.values`, and the
    /// default array `@@iterator`).
    ArrayIterator { array: HeapId, next_index: u32, done: bool },
    /// Async wrapper over a sync iterator, used by `yield*` in async
    /// generators when the delegate lacks `@@asyncIterator`.
    AsyncFromSync { inner: Value },
}

impl ObjectKind {
    /// Enumerates every heap id this kind's payload references.
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        match self {
            Self::Plain | Self::Error(_) | Self::Namespace(_) => {}
            Self::Array(storage) => storage.trace(push),
            Self::Function(data) => data.trace(push),
            Self::Native(native) => native.trace(push),
            Self::Bound(bound) => bound.trace(push),
            Self::Generator(generator) => generator.trace(push),
            Self::AsyncState(state) => state.trace(push),
            Self::Promise(promise) => promise.trace(push),
            Self::Proxy { target, handler, .. } => {
                push(*target);
                push(*handler);
            }
            Self::RegExp(regexp) => regexp.trace(push),
            Self::ArrayIterator { array, .. } => push(*array),
            Self::AsyncFromSync { inner } => {
                if let Some(id) = inner.ref_id() {
                    push(id);
                }
            }
        }
    }

    /// Rough payload size for resource accounting.
    pub fn estimate_size(&self) -> usize {
        match self {
            Self::Array(storage) => storage.estimate_size(),
            Self::Generator(generator) => generator.estimate_size(),
            Self::AsyncState(state) => state.estimate_size(),
            Self::Promise(promise) => promise.estimate_size(),
            Self::Bound(bound) => bound.bound_args.len() * std::mem::size_of::<Value>(),
            _ => 0,
        }
    }
}

/// A script object.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsObject {
    /// Own properties in insertion order. Integer keys are enumerated in
    /// numeric order ahead of string keys regardless of insertion position.
    pub properties: IndexMap<PropertyKey, PropertySlot>,
    /// Prototype link; `None` is a null prototype.
    pub prototype: Option<HeapId>,
    pub class_tag: ClassTag,
    pub extensible: bool,
    pub kind: ObjectKind,
    /// Non-enumerable internal table for private members, brands, and
    /// per-object annotations. Boxed because most objects never carry one.
    pub associated: Option<Box<AHashMap<AssocKey, Value>>>,
}

impl JsObject {
    /// Creates an ordinary object with the given prototype.
    pub fn plain(prototype: Option<HeapId>) -> Self {
        Self {
            properties: IndexMap::new(),
            prototype,
            class_tag: ClassTag::Object,
            extensible: true,
            kind: ObjectKind::Plain,
            associated: None,
        }
    }

    /// Creates an object with an explicit kind and class tag.
    pub fn with_kind(prototype: Option<HeapId>, class_tag: ClassTag, kind: ObjectKind) -> Self {
        Self {
            properties: IndexMap::new(),
            prototype,
            class_tag,
            extensible: true,
            kind,
            associated: None,
        }
    }

    pub fn own_slot(&self, key: &PropertyKey) -> Option<&PropertySlot> {
        self.properties.get(key)
    }

    pub fn own_slot_mut(&mut self, key: &PropertyKey) -> Option<&mut PropertySlot> {
        self.properties.get_mut(key)
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// Inserts or replaces a slot without descriptor validation. Used by
    /// intrinsic setup and literal construction, where attributes are under
    /// engine control.
    pub fn insert_slot(&mut self, key: PropertyKey, slot: PropertySlot) {
        self.properties.insert(key, slot);
    }

    /// Convenience for reading an own data property, skipping accessors.
    pub fn get_data(&self, key: &PropertyKey) -> Option<&Value> {
        self.own_slot(key).and_then(PropertySlot::value)
    }

    /// Own keys in specification order: integer indices ascending, then
    /// string keys in insertion order, then symbol keys in insertion order.
    pub fn own_keys(&self, include_symbols: bool, include_non_enumerable: bool) -> Vec<PropertyKey> {
        let mut indices: Vec<u32> = Vec::new();
        let mut strings: Vec<PropertyKey> = Vec::new();
        let mut symbols: Vec<PropertyKey> = Vec::new();
        for (key, slot) in &self.properties {
            if !include_non_enumerable && !slot.enumerable {
                continue;
            }
            match key {
                PropertyKey::Index(i) => indices.push(*i),
                PropertyKey::Str(_) => strings.push(*key),
                PropertyKey::Sym(_) => {
                    if include_symbols {
                        symbols.push(*key);
                    }
                }
            }
        }
        indices.sort_unstable();
        let mut keys: Vec<PropertyKey> = indices.into_iter().map(PropertyKey::Index).collect();
        keys.extend(strings);
        keys.extend(symbols);
        keys
    }

    /// Reads an associated value.
    pub fn associated_get(&self, key: &AssocKey) -> Option<&Value> {
        self.associated.as_ref().and_then(|table| table.get(key))
    }

    /// Writes an associated value, creating the table on first use.
    pub fn associated_set(&mut self, key: AssocKey, value: Value) {
        self.associated
            .get_or_insert_with(|| Box::new(AHashMap::new()))
            .insert(key, value);
    }

    /// Marks every own slot non-configurable; with `freeze`, data slots
    /// also become non-writable.
    pub fn seal_slots(&mut self, freeze: bool) {
        for slot in self.properties.values_mut() {
            slot.configurable = false;
            if freeze && !slot.is_accessor() {
                slot.writable = false;
            }
        }
        self.extensible = false;
    }

    pub fn is_sealed(&self) -> bool {
        !self.extensible && self.properties.values().all(|slot| !slot.configurable)
    }

    pub fn is_frozen(&self) -> bool {
        !self.extensible
            && self
                .properties
                .values()
                .all(|slot| !slot.configurable && (slot.is_accessor() || !slot.writable))
    }

    /// Payload size of the kind-specific internal slots.
    pub fn estimate_kind_size(&self) -> usize {
        self.kind.estimate_size()
    }
}

/// Validate-then-apply for `defineOwnProperty` on ordinary objects.
///
/// Implements the standard compatibility rules: creation on extensible
/// objects promotes absent attributes to `false` defaults; updates on
/// non-configurable slots reject attribute widening, data/accessor flips,
/// value changes on non-writable data slots, and accessor retargeting.
///
/// With `checked`, a rejected definition raises `TypeError`; otherwise it
/// reports `false` (sloppy-mode assignment semantics).
pub(crate) fn define_own_property<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &Interns,
    obj_id: HeapId,
    key: PropertyKey,
    desc: &PropertyDescriptor,
    checked: bool,
) -> RunResult<bool> {
    let reject = |what: &str| -> RunResult<bool> {
        if checked {
            Err(RunError::type_error(format!("cannot redefine property: {what}")))
        } else {
            Ok(false)
        }
    };

    let current = heap.object(obj_id).own_slot(&key).cloned();

    let Some(current) = current else {
        if !heap.object(obj_id).extensible {
            return reject("object is not extensible");
        }
        let slot = if desc.is_accessor() {
            PropertySlot {
                data: SlotData::Accessor {
                    get: desc.get.clone(),
                    set: desc.set.clone(),
                },
                writable: false,
                enumerable: desc.enumerable.unwrap_or(false),
                configurable: desc.configurable.unwrap_or(false),
                const_binding: false,
                const_uninitialized: false,
            }
        } else {
            PropertySlot {
                data: SlotData::Data(desc.value.clone().unwrap_or(Value::Undefined)),
                writable: desc.writable.unwrap_or(false),
                enumerable: desc.enumerable.unwrap_or(false),
                configurable: desc.configurable.unwrap_or(false),
                const_binding: false,
                const_uninitialized: false,
            }
        };
        heap.object_mut(obj_id).insert_slot(key, slot);
        return Ok(true);
    };

    // Every absent field keeps the current setting, so an empty descriptor
    // always succeeds.
    if desc.value.is_none()
        && desc.get.is_none()
        && desc.set.is_none()
        && desc.writable.is_none()
        && desc.enumerable.is_none()
        && desc.configurable.is_none()
    {
        return Ok(true);
    }

    if !current.configurable {
        if desc.configurable == Some(true) {
            return reject("property is non-configurable");
        }
        if let Some(enumerable) = desc.enumerable
            && enumerable != current.enumerable
        {
            return reject("property is non-configurable");
        }
        let flips_shape = (current.is_accessor() && desc.is_data()) || (!current.is_accessor() && desc.is_accessor());
        if flips_shape {
            return reject("property is non-configurable");
        }
        match &current.data {
            SlotData::Data(current_value) => {
                if !current.writable {
                    if desc.writable == Some(true) {
                        return reject("property is non-writable");
                    }
                    if let Some(new_value) = &desc.value
                        && !new_value.same_value(current_value, heap, interns)
                    {
                        return reject("property is non-writable");
                    }
                }
            }
            SlotData::Accessor { get, set } => {
                let same_accessor = |old: &Option<Value>, new: &Option<Value>| match (old, new) {
                    (_, None) => true,
                    (Some(o), Some(n)) => n.same_value(o, heap, interns),
                    (None, Some(_)) => false,
                };
                if !same_accessor(get, &desc.get) || !same_accessor(set, &desc.set) {
                    return reject("property is non-configurable");
                }
            }
        }
    }

    let slot = heap
        .object_mut(obj_id)
        .own_slot_mut(&key)
        .expect("slot disappeared during define");
    if desc.is_accessor() {
        let (old_get, old_set) = match &slot.data {
            SlotData::Accessor { get, set } => (get.clone(), set.clone()),
            SlotData::Data(_) => (None, None),
        };
        slot.data = SlotData::Accessor {
            get: desc.get.clone().or(old_get),
            set: desc.set.clone().or(old_set),
        };
        slot.writable = false;
    } else if let Some(value) = &desc.value {
        slot.data = SlotData::Data(value.clone());
    } else if desc.is_data() && slot.is_accessor() {
        slot.data = SlotData::Data(Value::Undefined);
    }
    if let Some(writable) = desc.writable {
        slot.writable = writable;
    }
    if let Some(enumerable) = desc.enumerable {
        slot.enumerable = enumerable;
    }
    if let Some(configurable) = desc.configurable {
        slot.configurable = configurable;
    }
    Ok(true)
}

/// Checks whether setting `proto` as the prototype of `obj` would create a
/// cycle, walking existing prototype links from `proto`.
pub(crate) fn prototype_would_cycle<T: ResourceTracker>(heap: &Heap<T>, obj: HeapId, proto: HeapId) -> bool {
    let mut cursor = Some(proto);
    while let Some(id) = cursor {
        if id == obj {
            return true;
        }
        cursor = heap.object(id).prototype;
    }
    false
}
