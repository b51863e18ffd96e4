//! Host embedding surface.
//!
//! A [`Runner`] owns a realm built from a compiled [`Program`] and drives
//! execution: run the root descriptor in the global scope, drain the
//! microtask queue, convert the completion value into a [`HostValue`], and
//! collect garbage between runs. Module linking and evaluation live here
//! too, because they execute bytecode.

use crate::{
    bytecode::Program,
    error::{RunError, RunResult},
    exception::Exception,
    heap::HeapStats,
    intern::FunctionId,
    module::{ModuleId, ModuleLoader, ModuleRecord, ModuleStatus},
    object::{HostValue, to_host_value},
    property::{PropertyKey, PropertySlot},
    realm::{InterruptHook, LanguageVersion, Realm, RejectionHook},
    regexp::RegExpProxy,
    resource::{NoLimitTracker, ResourceTracker},
    scope::{Binding, ImportTarget, Scope, ScopeKind},
    tracer::{NoopTracer, VmTracer},
    bytecode::vm::Vm,
    value::Value,
};

use indexmap::IndexMap;

/// Executes compiled programs against one realm.
pub struct Runner<T: ResourceTracker = NoLimitTracker> {
    realm: Realm<T>,
    root: FunctionId,
}

impl Runner<NoLimitTracker> {
    /// Builds an unlimited runner for a program and its root descriptor.
    #[must_use]
    pub fn new(program: Program, root: FunctionId) -> Self {
        Self::with_tracker(program, root, NoLimitTracker).expect("unlimited realm construction cannot fail")
    }
}

impl<T: ResourceTracker> Runner<T> {
    /// Builds a runner with a resource tracker enforcing limits.
    pub fn with_tracker(program: Program, root: FunctionId, tracker: T) -> Result<Self, Exception> {
        let realm = Realm::new(program, tracker)
            .map_err(|err| Exception::new(crate::error::ErrorKind::HostError, err.to_string()))?;
        Ok(Self { realm, root })
    }

    // ---- configuration ----------------------------------------------------

    pub fn set_language_version(&mut self, version: LanguageVersion) {
        self.realm.language_version = version;
    }

    /// Installs the host interrupt hook polled every opcode burst.
    pub fn set_interrupt_hook(&mut self, hook: InterruptHook) {
        self.realm.interrupt_hook = Some(hook);
    }

    /// Installs the unhandled-rejection hook.
    pub fn set_rejection_hook(&mut self, hook: RejectionHook) {
        self.realm.rejection_hook = Some(hook);
    }

    /// Replaces the regular-expression collaborator.
    pub fn set_regexp_proxy(&mut self, proxy: Box<dyn RegExpProxy>) {
        self.realm.regexp_proxy = proxy;
    }

    /// Installs the module loader used by [`Self::evaluate_module`].
    pub fn set_module_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.realm.module_loader = Some(loader);
    }

    // ---- execution --------------------------------------------------------

    /// Runs the root descriptor in the global scope, drains microtasks,
    /// and returns the completion value.
    pub fn run(&mut self) -> Result<HostValue, Exception> {
        self.run_function(self.root)
    }

    /// Runs any registered descriptor as top-level code.
    pub fn run_function(&mut self, id: FunctionId) -> Result<HostValue, Exception> {
        let mut tracer = NoopTracer;
        self.run_function_traced(id, &mut tracer)
    }

    /// As [`Self::run_function`], reporting execution to a tracer.
    pub fn run_function_traced(&mut self, id: FunctionId, tracer: &mut impl VmTracer) -> Result<HostValue, Exception> {
        let result = self.execute(id, tracer);
        self.finish(result)
    }

    fn execute(&mut self, id: FunctionId, tracer: &mut impl VmTracer) -> RunResult<Value> {
        let scope = self.realm.global_scope;
        let this = Value::Ref(self.realm.global_object);
        let mut vm = Vm::new(&mut self.realm, tracer);
        let result = vm.run_root(id, scope, this)?;
        // Micro-tasks drain after the top-level call completes, FIFO.
        vm.drain_jobs()?;
        Ok(result)
    }

    fn finish(&mut self, result: RunResult<Value>) -> Result<HostValue, Exception> {
        match result {
            Ok(value) => {
                let host = to_host_value(&value, &self.realm.heap, &self.realm.interns);
                self.collect_garbage();
                Ok(host)
            }
            Err(err) => Err(Exception::from_run_error(err, &self.realm.heap, &self.realm.interns)),
        }
    }

    /// Calls a global function by name with host arguments.
    pub fn call_global(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue, Exception> {
        let result = self.call_global_inner(name, args);
        self.finish(result)
    }

    fn call_global_inner(&mut self, name: &str, args: &[HostValue]) -> RunResult<Value> {
        let converted: Vec<Value> = args
            .iter()
            .map(|arg| self.value_from_host(arg))
            .collect::<RunResult<_>>()?;
        let name_id = self.realm.interns.intern(name);
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(&mut self.realm, &mut tracer);
        let global = Value::Ref(vm.realm.global_object);
        let callee = vm.get_named_property(global.clone(), name_id)?;
        let result = vm.call_value(callee, global, &converted)?;
        vm.drain_jobs()?;
        Ok(result)
    }

    // ---- globals ----------------------------------------------------------

    /// Defines a global variable from a host value.
    pub fn set_global(&mut self, name: &str, value: HostValue) -> Result<(), Exception> {
        let converted = self
            .value_from_host(&value)
            .map_err(|err| Exception::from_run_error(err, &self.realm.heap, &self.realm.interns))?;
        let name_id = self.realm.interns.intern(name);
        let key = PropertyKey::from_string_id(name_id, &self.realm.interns);
        self.realm
            .heap
            .object_mut(self.realm.global_object)
            .insert_slot(key, PropertySlot::data(converted));
        Ok(())
    }

    /// Reads a global data property (accessors are not run).
    #[must_use]
    pub fn global(&self, name: &str) -> Option<HostValue> {
        let text = name.to_owned();
        let global = self.realm.heap.object(self.realm.global_object);
        // Without interning access we scan the own keys by display text;
        // globals are few and this path is host-side only.
        for key in global.own_keys(false, true) {
            if key.display(&self.realm.interns) == text {
                return global
                    .get_data(&key)
                    .map(|value| to_host_value(value, &self.realm.heap, &self.realm.interns));
            }
        }
        None
    }

    fn value_from_host(&mut self, value: &HostValue) -> RunResult<Value> {
        Ok(match value {
            HostValue::Undefined => Value::Undefined,
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Int(i) => Value::number(*i as f64),
            HostValue::Float(f) => Value::number(*f),
            HostValue::BigInt(b) => {
                let id = self.realm.heap.alloc_bigint(b.clone())?;
                Value::Ref(id)
            }
            HostValue::String(s) => {
                let id = self.realm.heap.alloc_string(s.clone())?;
                Value::Ref(id)
            }
            HostValue::Symbol { description } => {
                let description = description.as_deref().map(|d| self.realm.interns.intern(d));
                Value::Symbol(self.realm.interns.new_symbol(description))
            }
            HostValue::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.value_from_host(item)?);
                }
                let id = self.realm.new_array_with(values)?;
                Value::Ref(id)
            }
            HostValue::Object(pairs) => {
                let id = self.realm.new_plain_object()?;
                for (key, value) in pairs {
                    let converted = self.value_from_host(value)?;
                    let key = PropertyKey::from_str(key, &mut self.realm.interns);
                    self.realm.heap.object_mut(id).insert_slot(key, PropertySlot::data(converted));
                }
                Value::Ref(id)
            }
            HostValue::Error { kind, message } => {
                let mut tracer = NoopTracer;
                let mut vm = Vm::new(&mut self.realm, &mut tracer);
                let id = vm.new_error_object(*kind, message, &[])?;
                Value::Ref(id)
            }
            HostValue::Function { .. } | HostValue::Repr(_) => {
                return Err(RunError::internal("host value has no runtime form"));
            }
        })
    }

    // ---- inspection -------------------------------------------------------

    /// Heap statistics snapshot.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.realm.heap.stats(self.realm.interns.interned_strings())
    }

    /// Drains unhandled rejections collected since the last call (only
    /// populated when no rejection hook is installed).
    pub fn take_unhandled_rejections(&mut self) -> Vec<Exception> {
        std::mem::take(&mut self.realm.unhandled_rejections)
    }

    /// Runs a collection cycle from the realm roots.
    pub fn collect_garbage(&mut self) {
        let mut roots = Vec::with_capacity(64);
        self.realm.push_roots(&mut roots);
        self.realm.heap.collect(roots);
    }

    // ---- modules ----------------------------------------------------------

    /// Resolves, loads, links, and evaluates a module graph rooted at the
    /// specifier. Idempotent; evaluation errors are cached and re-thrown.
    pub fn evaluate_module(&mut self, specifier: &str) -> Result<(), Exception> {
        let result = self.evaluate_module_inner(specifier);
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(Exception::from_run_error(err, &self.realm.heap, &self.realm.interns)),
        }
    }

    fn evaluate_module_inner(&mut self, specifier: &str) -> RunResult<()> {
        let id = self.ensure_module(specifier, None)?;
        self.link_module(id)?;
        let result = self.evaluate_module_by_id(id);
        // Module evaluation is a top-level call; drain its microtasks.
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(&mut self.realm, &mut tracer);
        vm.drain_jobs()?;
        result
    }

    /// Reads one export of an evaluated module.
    pub fn module_export(&mut self, specifier: &str, export: &str) -> Result<HostValue, Exception> {
        let result = self.module_export_inner(specifier, export);
        match result {
            Ok(value) => Ok(to_host_value(&value, &self.realm.heap, &self.realm.interns)),
            Err(err) => Err(Exception::from_run_error(err, &self.realm.heap, &self.realm.interns)),
        }
    }

    fn module_export_inner(&mut self, specifier: &str, export: &str) -> RunResult<Value> {
        let id = self.ensure_module(specifier, None)?;
        let export_id = self.realm.interns.intern(export);
        let mut seen = Vec::new();
        match crate::module::resolve_export(&self.realm.modules, id, export_id, &mut seen) {
            crate::module::ExportResolution::Binding(source, local) => {
                let scope = self.realm.modules[source.index()]
                    .scope
                    .ok_or_else(|| RunError::internal("module not linked"))?;
                match self.realm.heap.scope(scope).find_binding(local) {
                    Some(binding) if !matches!(binding.value, Value::Uninit) => Ok(binding.value.clone()),
                    _ => Err(RunError::reference_error(format!(
                        "cannot access '{export}' before initialization"
                    ))),
                }
            }
            crate::module::ExportResolution::Namespace(source) => {
                let mut tracer = NoopTracer;
                let mut vm = Vm::new(&mut self.realm, &mut tracer);
                let ns = vm.get_or_create_namespace(source)?;
                Ok(Value::Ref(ns))
            }
            _ => Err(RunError::syntax_error(format!(
                "module \"{specifier}\" does not provide an export named \"{export}\""
            ))),
        }
    }

    /// Resolves and registers a module (without linking it).
    fn ensure_module(&mut self, specifier: &str, referrer: Option<&str>) -> RunResult<ModuleId> {
        let canonical = {
            let loader = self
                .realm
                .module_loader
                .as_mut()
                .ok_or_else(|| RunError::internal("no module loader installed"))?;
            loader.resolve(specifier, referrer).map_err(RunError::syntax_error)?
        };
        let canonical_id = self.realm.interns.intern(&canonical);
        if let Some(&existing) = self.realm.module_index.get(&canonical_id) {
            return Ok(existing);
        }

        // The loader compiles against the program form of the interns
        // table; move it out and back around the call.
        let mut program = Program {
            interns: std::mem::take(&mut self.realm.interns),
        };
        let loaded = {
            let loader = self
                .realm
                .module_loader
                .as_mut()
                .expect("checked above");
            loader.load(&canonical, &mut program)
        };
        self.realm.interns = program.interns;
        let source = loaded.map_err(RunError::syntax_error)?;

        let id = ModuleId(u32::try_from(self.realm.modules.len()).expect("module registry overflow"));
        self.realm.modules.push(ModuleRecord::new(canonical_id, source));
        self.realm.module_index.insert(canonical_id, id);
        Ok(id)
    }

    /// Links a module graph: resolves requests, creates environments, and
    /// wires import indirections. Cycles are tolerated (a module being
    /// linked counts as linked for its dependents).
    fn link_module(&mut self, id: ModuleId) -> RunResult<()> {
        if self.realm.modules[id.index()].status >= ModuleStatus::Linking {
            return Ok(());
        }
        self.realm.modules[id.index()].status = ModuleStatus::Linking;

        let specifier_id = self.realm.modules[id.index()].specifier;
        let specifier = self.realm.interns.get_str(specifier_id).to_owned();
        let requests = self.realm.modules[id.index()].requests.clone();
        let mut resolved = Vec::with_capacity(requests.len());
        for request in &requests {
            let request_text = self.realm.interns.get_str(*request).to_owned();
            let child = self.ensure_module(&request_text, Some(&specifier))?;
            resolved.push(child);
        }
        self.realm.modules[id.index()].resolved_requests = resolved.clone();
        for child in resolved {
            self.link_module(child)?;
        }

        // Environment: local export bindings enter their dead zone now so
        // namespace reads before evaluation raise ReferenceError.
        let mut bindings = IndexMap::new();
        for (_, local) in &self.realm.modules[id.index()].exports.local {
            bindings.insert(*local, Binding::uninit_let());
        }
        let mut imports = IndexMap::new();
        let record = &self.realm.modules[id.index()];
        let import_entries = record.imports.clone();
        let resolved_requests = record.resolved_requests.clone();
        let requests = record.requests.clone();
        for entry in &import_entries {
            let target = requests
                .iter()
                .position(|r| *r == entry.request)
                .and_then(|index| resolved_requests.get(index).copied())
                .ok_or_else(|| RunError::internal("unresolved module request"))?;
            let target_binding = match entry.import_name {
                None => ImportTarget::Namespace(target),
                Some(import_name) => {
                    let mut seen = Vec::new();
                    match crate::module::resolve_export(&self.realm.modules, target, import_name, &mut seen) {
                        crate::module::ExportResolution::Binding(source, local) => {
                            ImportTarget::Binding(source, local)
                        }
                        crate::module::ExportResolution::Namespace(source) => ImportTarget::Namespace(source),
                        _ => {
                            return Err(RunError::syntax_error(format!(
                                "requested module does not provide an export named \"{}\"",
                                self.realm.interns.get_str(import_name)
                            )));
                        }
                    }
                }
            };
            imports.insert(entry.local_name, target_binding);
        }

        let scope = Scope {
            parent: Some(self.realm.global_scope),
            kind: ScopeKind::Module { bindings, imports },
        };
        let scope_id = self.realm.heap.allocate(crate::heap::HeapData::Scope(scope))?;
        let record = &mut self.realm.modules[id.index()];
        record.scope = Some(scope_id);
        record.status = ModuleStatus::Linked;
        Ok(())
    }

    /// Evaluates a linked module graph depth-first. `EvaluatedError` is
    /// terminal: later imports re-throw the cached error.
    fn evaluate_module_by_id(&mut self, id: ModuleId) -> RunResult<()> {
        match self.realm.modules[id.index()].status {
            ModuleStatus::Evaluated | ModuleStatus::Evaluating => return Ok(()),
            ModuleStatus::EvaluatedError => {
                let message = self.realm.modules[id.index()]
                    .eval_error
                    .clone()
                    .unwrap_or_else(|| "module evaluation failed".to_owned());
                return Err(RunError::syntax_error(message));
            }
            ModuleStatus::Linked => {}
            ModuleStatus::Unlinked | ModuleStatus::Linking => {
                return Err(RunError::internal("module evaluated before linking"));
            }
        }
        self.realm.modules[id.index()].status = ModuleStatus::Evaluating;

        for child in self.realm.modules[id.index()].resolved_requests.clone() {
            self.evaluate_module_by_id(child)?;
        }

        let root = self.realm.modules[id.index()].root;
        let scope = self.realm.modules[id.index()]
            .scope
            .ok_or_else(|| RunError::internal("module has no environment"))?;
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(&mut self.realm, &mut tracer);
        match vm.run_root(root, scope, Value::Undefined) {
            Ok(_) => {
                self.realm.modules[id.index()].status = ModuleStatus::Evaluated;
                Ok(())
            }
            Err(err) => {
                let record = &mut self.realm.modules[id.index()];
                record.status = ModuleStatus::EvaluatedError;
                if let RunError::Raise(raise) = &err {
                    record.eval_error = raise.message.clone();
                }
                Err(err)
            }
        }
    }
}
