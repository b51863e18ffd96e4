//! Lexical scope chain records.
//!
//! Four scope kinds cooperate via parent links, leaf to root: block scopes
//! for `let`/`const`, function activations, `with` scopes reading through
//! an object, and the global scope backed by the global object. Scopes are
//! heap-resident ([`HeapData::Scope`](crate::heap::HeapData)) because
//! closures and suspended generators keep them alive past the dynamic
//! extent of the call that created them.
//!
//! Pure binding storage lives here. Chain walking that can touch objects
//! (global reads, `with` scopes, lazy `arguments`) is driven by the VM.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    heap::HeapId,
    intern::StringId,
    module::ModuleId,
    value::Value,
};

/// Declaration kind of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum BindingKind {
    Param,
    Var,
    Let,
    Const,
}

/// One name binding in an activation or block scope.
///
/// A `Let`/`Const` binding holds the `Uninit` sentinel until its declaring
/// initializer runs; every read of that sentinel raises `ReferenceError`
/// upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Binding {
    pub value: Value,
    pub kind: BindingKind,
}

impl Binding {
    pub fn var(value: Value) -> Self {
        Self {
            value,
            kind: BindingKind::Var,
        }
    }

    pub fn param(value: Value) -> Self {
        Self {
            value,
            kind: BindingKind::Param,
        }
    }

    /// A `let` binding in its temporal dead zone.
    pub fn uninit_let() -> Self {
        Self {
            value: Value::Uninit,
            kind: BindingKind::Let,
        }
    }

    /// A `const` binding in its temporal dead zone.
    pub fn uninit_const() -> Self {
        Self {
            value: Value::Uninit,
            kind: BindingKind::Const,
        }
    }
}

/// A function activation: parameters, `var` declarations, the receiver,
/// and the lazy `arguments` object.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Activation {
    /// The callee function object.
    pub function: HeapId,
    /// Original argument vector, kept for `arguments` materialization.
    pub args: Vec<Value>,
    /// Parameter and `var` bindings in declaration order.
    pub bindings: IndexMap<StringId, Binding>,
    pub strict: bool,
    /// Arrow activations have no own `this`/`arguments`; reads walk out to
    /// the enclosing non-arrow activation.
    pub arrow: bool,
    /// The receiver. Derived-constructor activations start at `Uninit`
    /// until `super(...)` binds it.
    pub this: Value,
    /// Lazily materialized `arguments` object.
    pub arguments_object: Option<HeapId>,
}

impl Activation {
    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        push(self.function);
        for value in &self.args {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
        for binding in self.bindings.values() {
            if let Some(id) = binding.value.ref_id() {
                push(id);
            }
        }
        if let Some(id) = self.this.ref_id() {
            push(id);
        }
        if let Some(id) = self.arguments_object {
            push(id);
        }
    }
}

/// Kind-specific payload of a scope record.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum ScopeKind {
    /// Chain root: resolution falls through to the global object's
    /// properties (prototype chain included).
    Global { object: HeapId },
    /// Function activation. Does not read through any prototype chain.
    Activation(Box<Activation>),
    /// `with (obj)`: resolution reads through the object, getters included.
    /// `const_bindings` marks names made read-only by `EnterWithConst`.
    With { object: HeapId, const_bindings: bool },
    /// Block scope for `let`/`const`; entries hold `Uninit` until their
    /// declaration runs.
    Block { bindings: IndexMap<StringId, Binding> },
    /// Module environment: local bindings plus indirections into other
    /// modules' environments for imported names.
    Module {
        bindings: IndexMap<StringId, Binding>,
        imports: IndexMap<StringId, ImportTarget>,
    },
}

/// Where an imported name reads from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) enum ImportTarget {
    /// A binding in the defining module's environment; reads follow the
    /// indirection live and TDZ-check the source binding.
    Binding(ModuleId, StringId),
    /// The namespace object of the requested module.
    Namespace(ModuleId),
}

/// One link in the scope chain.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Scope {
    /// Enclosing scope; `None` only for the global scope.
    pub parent: Option<HeapId>,
    pub kind: ScopeKind,
}

impl Scope {
    pub fn global(object: HeapId) -> Self {
        Self {
            parent: None,
            kind: ScopeKind::Global { object },
        }
    }

    pub fn block(parent: HeapId) -> Self {
        Self {
            parent: Some(parent),
            kind: ScopeKind::Block {
                bindings: IndexMap::new(),
            },
        }
    }

    pub fn with(parent: HeapId, object: HeapId, const_bindings: bool) -> Self {
        Self {
            parent: Some(parent),
            kind: ScopeKind::With { object, const_bindings },
        }
    }

    pub fn activation(parent: HeapId, activation: Activation) -> Self {
        Self {
            parent: Some(parent),
            kind: ScopeKind::Activation(Box::new(activation)),
        }
    }

    /// Direct binding lookup for scopes that own bindings; `None` for
    /// global and `with` scopes (those resolve through objects).
    pub fn find_binding(&self, name: StringId) -> Option<&Binding> {
        match &self.kind {
            ScopeKind::Activation(activation) => activation.bindings.get(&name),
            ScopeKind::Block { bindings } | ScopeKind::Module { bindings, .. } => bindings.get(&name),
            ScopeKind::Global { .. } | ScopeKind::With { .. } => None,
        }
    }

    pub fn find_binding_mut(&mut self, name: StringId) -> Option<&mut Binding> {
        match &mut self.kind {
            ScopeKind::Activation(activation) => activation.bindings.get_mut(&name),
            ScopeKind::Block { bindings } | ScopeKind::Module { bindings, .. } => bindings.get_mut(&name),
            ScopeKind::Global { .. } | ScopeKind::With { .. } => None,
        }
    }

    /// Declares a binding on an activation or block scope.
    ///
    /// # Panics
    /// Panics when called on a global or `with` scope; declarations on the
    /// global scope go through the global object.
    pub fn declare(&mut self, name: StringId, binding: Binding) {
        match &mut self.kind {
            ScopeKind::Activation(activation) => {
                activation.bindings.insert(name, binding);
            }
            ScopeKind::Block { bindings } | ScopeKind::Module { bindings, .. } => {
                bindings.insert(name, binding);
            }
            ScopeKind::Global { .. } | ScopeKind::With { .. } => {
                panic!("declare on a scope without own bindings")
            }
        }
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        if let Some(parent) = self.parent {
            push(parent);
        }
        match &self.kind {
            ScopeKind::Global { object } | ScopeKind::With { object, .. } => push(*object),
            ScopeKind::Activation(activation) => activation.trace(push),
            ScopeKind::Block { bindings } | ScopeKind::Module { bindings, .. } => {
                for binding in bindings.values() {
                    if let Some(id) = binding.value.ref_id() {
                        push(id);
                    }
                }
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        match &self.kind {
            ScopeKind::Activation(activation) => {
                (activation.args.len() + activation.bindings.len()) * std::mem::size_of::<Value>()
            }
            ScopeKind::Block { bindings } | ScopeKind::Module { bindings, .. } => {
                bindings.len() * std::mem::size_of::<Value>()
            }
            ScopeKind::Global { .. } | ScopeKind::With { .. } => 0,
        }
    }
}
