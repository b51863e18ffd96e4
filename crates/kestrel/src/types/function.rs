//! Function-object records: script functions, natives, and bound functions.

use serde::{Deserialize, Serialize};

use crate::{
    error::ErrorKind,
    heap::HeapId,
    intern::FunctionId,
    property::ObjectKind,
    value::Value,
};

/// Internal slots of a script function.
///
/// The descriptor is immutable compiled bytecode; the scope is the lexical
/// chain captured at creation. Methods carry a home object for `super`
/// lookups; class constructors additionally carry [`ClassInfo`].
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FunctionData {
    pub descriptor: FunctionId,
    /// Declaration scope captured when the function object was created.
    pub scope: HeapId,
    /// Base object for `super` property lookups (the prototype or the
    /// constructor the method was defined on).
    pub home_object: Option<HeapId>,
    /// Present iff this function is a class constructor.
    pub class_info: Option<Box<ClassInfo>>,
    /// Private-member identity of the class this function belongs to
    /// (constructors and methods); consulted by `ClassStorage`.
    pub class_storage: Option<HeapId>,
}

impl FunctionData {
    pub fn new(descriptor: FunctionId, scope: HeapId) -> Self {
        Self {
            descriptor,
            scope,
            home_object: None,
            class_info: None,
            class_storage: None,
        }
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        push(self.scope);
        if let Some(home) = self.home_object {
            push(home);
        }
        if let Some(info) = &self.class_info {
            info.trace(push);
        }
        if let Some(storage) = self.class_storage {
            push(storage);
        }
    }
}

/// Class-constructor extras: super link, private-member identity, and field
/// initializers.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClassInfo {
    /// The `extends` target constructor. `None` for base classes and for
    /// `extends null` (which is still `derived`).
    pub super_ctor: Option<HeapId>,
    /// True when the class has an `extends` clause; controls `this` TDZ and
    /// the `super(...)` protocol.
    pub derived: bool,
    /// Identity object for private-member keys and brand checks.
    pub storage: HeapId,
    /// Instance-field initializer descriptors, run when construction binds
    /// `this`.
    pub field_inits: Vec<FunctionId>,
}

impl ClassInfo {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        if let Some(super_ctor) = self.super_ctor {
            push(super_ctor);
        }
        push(self.storage);
    }
}

/// Built-in functions, dispatched by variant in the engine's call path.
///
/// Variants with a `HeapId` payload are per-object closures (a promise's
/// resolve/reject pair, an iterator's backing state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum NativeFunction {
    // Object namespace
    ObjectCtor,
    ObjectFreeze,
    ObjectSeal,
    ObjectPreventExtensions,
    ObjectIsFrozen,
    ObjectIsSealed,
    ObjectIsExtensible,
    ObjectGetPrototypeOf,
    ObjectSetPrototypeOf,
    ObjectDefineProperty,
    ObjectKeys,
    ObjectGetOwnPropertyNames,
    // Object.prototype
    ObjectProtoHasOwnProperty,
    ObjectProtoToString,
    ObjectProtoValueOf,
    // Function.prototype
    FunctionProtoCall,
    FunctionProtoApply,
    FunctionProtoBind,
    FunctionProtoToString,
    // Array
    ArrayCtor,
    ArrayFrom,
    ArrayIsArray,
    ArrayProtoPush,
    ArrayProtoJoin,
    ArrayProtoIndexOf,
    ArrayProtoIncludes,
    ArrayProtoValues,
    /// `next` on array iterators created by `ArrayProtoValues`.
    ArrayIteratorNext,
    // Symbol
    SymbolCtor,
    SymbolFor,
    SymbolKeyFor,
    // BigInt
    BigIntCtor,
    // Errors
    ErrorCtor(ErrorKind),
    // Proxy
    ProxyCtor,
    // Promise
    PromiseCtor,
    PromiseResolve,
    PromiseReject,
    PromiseProtoThen,
    PromiseProtoCatch,
    /// Per-promise resolve closure handed to the executor.
    PromiseResolveFn(HeapId),
    /// Per-promise reject closure handed to the executor.
    PromiseRejectFn(HeapId),
    // Generator.prototype
    GeneratorProtoNext,
    GeneratorProtoReturn,
    GeneratorProtoThrow,
    // %AsyncFromSyncIterator%.prototype
    AsyncFromSyncNext,
}

impl NativeFunction {
    /// The `name` property value.
    pub fn name(self) -> &'static str {
        match self {
            Self::ObjectCtor => "Object",
            Self::ObjectFreeze => "freeze",
            Self::ObjectSeal => "seal",
            Self::ObjectPreventExtensions => "preventExtensions",
            Self::ObjectIsFrozen => "isFrozen",
            Self::ObjectIsSealed => "isSealed",
            Self::ObjectIsExtensible => "isExtensible",
            Self::ObjectGetPrototypeOf => "getPrototypeOf",
            Self::ObjectSetPrototypeOf => "setPrototypeOf",
            Self::ObjectDefineProperty => "defineProperty",
            Self::ObjectKeys => "keys",
            Self::ObjectGetOwnPropertyNames => "getOwnPropertyNames",
            Self::ObjectProtoHasOwnProperty => "hasOwnProperty",
            Self::ObjectProtoToString => "toString",
            Self::ObjectProtoValueOf => "valueOf",
            Self::FunctionProtoCall => "call",
            Self::FunctionProtoApply => "apply",
            Self::FunctionProtoBind => "bind",
            Self::FunctionProtoToString => "toString",
            Self::ArrayCtor => "Array",
            Self::ArrayFrom => "from",
            Self::ArrayIsArray => "isArray",
            Self::ArrayProtoPush => "push",
            Self::ArrayProtoJoin => "join",
            Self::ArrayProtoIndexOf => "indexOf",
            Self::ArrayProtoIncludes => "includes",
            Self::ArrayProtoValues => "values",
            Self::ArrayIteratorNext => "next",
            Self::SymbolCtor => "Symbol",
            Self::SymbolFor => "for",
            Self::SymbolKeyFor => "keyFor",
            Self::BigIntCtor => "BigInt",
            Self::ErrorCtor(kind) => kind.name(),
            Self::ProxyCtor => "Proxy",
            Self::PromiseCtor => "Promise",
            Self::PromiseResolve => "resolve",
            Self::PromiseReject => "reject",
            Self::PromiseProtoThen => "then",
            Self::PromiseProtoCatch => "catch",
            Self::PromiseResolveFn(_) => "resolve",
            Self::PromiseRejectFn(_) => "reject",
            Self::GeneratorProtoNext => "next",
            Self::GeneratorProtoReturn => "return",
            Self::GeneratorProtoThrow => "throw",
            Self::AsyncFromSyncNext => "next",
        }
    }

    /// The `length` property value (declared parameter count).
    pub fn param_count(self) -> u32 {
        match self {
            Self::ObjectCtor
            | Self::ObjectProtoToString
            | Self::ObjectProtoValueOf
            | Self::FunctionProtoToString
            | Self::ArrayProtoValues
            | Self::ArrayIteratorNext
            | Self::AsyncFromSyncNext => 0,
            Self::ObjectSetPrototypeOf | Self::ProxyCtor => 2,
            Self::ObjectDefineProperty => 3,
            Self::FunctionProtoCall | Self::FunctionProtoApply | Self::FunctionProtoBind => 1,
            Self::PromiseProtoThen => 2,
            _ => 1,
        }
    }

    pub fn trace(self, push: &mut impl FnMut(HeapId)) {
        match self {
            Self::PromiseResolveFn(id) | Self::PromiseRejectFn(id) => push(id),
            _ => {}
        }
    }
}

/// Internal slots of a bound function.
///
/// Delegates `call`/`construct` to the target with the bound receiver and
/// pre-pended bound arguments. `length` and `name` are computed from the
/// target when the bound function is created.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BoundFunction {
    pub target: HeapId,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}

impl BoundFunction {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        push(self.target);
        if let Some(id) = self.bound_this.ref_id() {
            push(id);
        }
        for arg in &self.bound_args {
            if let Some(id) = arg.ref_id() {
                push(id);
            }
        }
    }
}

/// True when an object kind is invocable.
///
/// Proxy callability is cached at proxy creation from its target, so no
/// heap access is needed here.
pub(crate) fn callable_kind(kind: &ObjectKind) -> bool {
    matches!(
        kind,
        ObjectKind::Function(_) | ObjectKind::Native(_) | ObjectKind::Bound(_) | ObjectKind::Proxy { callable: true, .. }
    )
}
