//! Module records, export resolution, and the host loader seam.
//!
//! A [`ModuleRecord`] carries a compiled module's specifier, root
//! descriptor, status, requested modules, and import/export tables. Status
//! advances monotonically (`Unlinked` through `Evaluated`), except that
//! `EvaluatedError` is terminal. Linking and evaluation walk the request
//! graph depth-first and are driven by the realm (they execute bytecode);
//! the pure pieces - record bookkeeping and export-name resolution - live
//! here.
//!
//! The host supplies modules through [`ModuleLoader`]: `resolve` maps a
//! specifier + referrer to a canonical id, `load` compiles the module into
//! the program and returns its [`ModuleSource`] tables.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::Program,
    heap::HeapId,
    intern::{FunctionId, StringId},
};

/// Index of a module record in the realm's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle status of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleStatus {
    Unlinked,
    Linking,
    Linked,
    Evaluating,
    Evaluated,
    /// Evaluation threw; the error is cached and re-surfaced on every
    /// later import. Terminal.
    EvaluatedError,
}

/// One `import` binding: which request it comes from and the names on
/// both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Specifier as written in the import declaration.
    pub request: StringId,
    /// Name exported by the requested module; `None` imports the
    /// namespace object (`import * as ns`).
    pub import_name: Option<StringId>,
    /// Local binding name in the importing module.
    pub local_name: StringId,
}

/// Export tables of a module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportTables {
    /// `export const x` / `export function f`: export name -> local
    /// binding name.
    pub local: Vec<(StringId, StringId)>,
    /// `export { a as b } from "m"`: export name -> (request, name in the
    /// requested module).
    pub indirect: Vec<(StringId, StringId, StringId)>,
    /// `export * from "m"`: requests re-exported wholesale.
    pub star: Vec<StringId>,
}

/// Compiled form of one module, as produced by the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSource {
    /// Root descriptor executed once at evaluation.
    pub root: FunctionId,
    /// Specifiers this module requests, in declaration order.
    pub requests: Vec<StringId>,
    pub imports: Vec<ImportEntry>,
    pub exports: ExportTables,
}

/// A module registered in the realm.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ModuleRecord {
    /// Canonical specifier.
    pub specifier: StringId,
    pub status: ModuleStatus,
    pub root: FunctionId,
    pub requests: Vec<StringId>,
    pub imports: Vec<ImportEntry>,
    pub exports: ExportTables,
    /// Canonical ids of the requested modules, resolved during linking
    /// (parallel to `requests`).
    pub resolved_requests: Vec<ModuleId>,
    /// Module environment, created during linking.
    pub scope: Option<HeapId>,
    /// Namespace exotic object, built lazily.
    pub namespace: Option<HeapId>,
    /// Cached evaluation error, re-thrown on later imports.
    pub eval_error: Option<String>,
}

impl ModuleRecord {
    pub fn new(specifier: StringId, source: ModuleSource) -> Self {
        Self {
            specifier,
            status: ModuleStatus::Unlinked,
            root: source.root,
            requests: source.requests,
            imports: source.imports,
            exports: source.exports,
            resolved_requests: Vec::new(),
            scope: None,
            namespace: None,
            eval_error: None,
        }
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        if let Some(scope) = self.scope {
            push(scope);
        }
        if let Some(namespace) = self.namespace {
            push(namespace);
        }
    }
}

/// Host seam for module resolution and loading.
pub trait ModuleLoader: std::fmt::Debug {
    /// Maps a specifier (plus the referrer's canonical id, when the import
    /// is nested) to a canonical id. The error string surfaces as a
    /// `SyntaxError`.
    fn resolve(&mut self, specifier: &str, referrer: Option<&str>) -> Result<String, String>;

    /// Compiles the module with the given canonical id, registering its
    /// descriptors in `program`.
    fn load(&mut self, canonical: &str, program: &mut Program) -> Result<ModuleSource, String>;
}

/// Resolution of an exported name to the module and local binding that
/// defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExportResolution {
    /// (defining module, local binding name).
    Binding(ModuleId, StringId),
    /// The export is the namespace of another module.
    Namespace(ModuleId),
    NotFound,
    /// Multiple star exports provide the name (a linking error).
    Ambiguous,
}

/// Resolves `name` exported by `module` across indirect and star exports.
///
/// `registry` is the realm's record table; `seen` breaks cycles through
/// circular star exports.
pub(crate) fn resolve_export(
    registry: &[ModuleRecord],
    module: ModuleId,
    name: StringId,
    seen: &mut Vec<(ModuleId, StringId)>,
) -> ExportResolution {
    if seen.contains(&(module, name)) {
        return ExportResolution::NotFound;
    }
    seen.push((module, name));
    let record = &registry[module.index()];

    for (export_name, local_name) in &record.exports.local {
        if *export_name == name {
            return ExportResolution::Binding(module, *local_name);
        }
    }
    for (export_name, request, import_name) in &record.exports.indirect {
        if *export_name == name {
            let Some(target) = resolved_request(record, *request) else {
                return ExportResolution::NotFound;
            };
            return resolve_export(registry, target, *import_name, seen);
        }
    }

    let mut star_resolution = ExportResolution::NotFound;
    for request in &record.exports.star {
        let Some(target) = resolved_request(record, *request) else {
            continue;
        };
        match resolve_export(registry, target, name, seen) {
            ExportResolution::NotFound => {}
            ExportResolution::Ambiguous => return ExportResolution::Ambiguous,
            found => match star_resolution {
                ExportResolution::NotFound => star_resolution = found,
                ref existing if *existing == found => {}
                _ => return ExportResolution::Ambiguous,
            },
        }
    }
    star_resolution
}

fn resolved_request(record: &ModuleRecord, request: StringId) -> Option<ModuleId> {
    record
        .requests
        .iter()
        .position(|r| *r == request)
        .and_then(|index| record.resolved_requests.get(index).copied())
}

/// Every export name a module exposes (for namespace objects), sorted by
/// code-unit order of the name text by the caller.
pub(crate) fn export_names(registry: &[ModuleRecord], module: ModuleId, seen: &mut Vec<ModuleId>) -> Vec<StringId> {
    if seen.contains(&module) {
        return Vec::new();
    }
    seen.push(module);
    let record = &registry[module.index()];
    let mut names: Vec<StringId> = record.exports.local.iter().map(|(name, _)| *name).collect();
    names.extend(record.exports.indirect.iter().map(|(name, _, _)| *name));
    for request in &record.exports.star {
        if let Some(target) = resolved_request(record, *request) {
            names.extend(export_names(registry, target, seen));
        }
    }
    names.sort_unstable();
    names.dedup();
    names
}

/// In-memory loader for tests and embedders with pre-compiled modules.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    modules: Vec<(String, ModuleSource)>,
}

impl InMemoryLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-compiled module under its canonical id.
    pub fn insert(&mut self, canonical: impl Into<String>, source: ModuleSource) {
        self.modules.push((canonical.into(), source));
    }
}

impl ModuleLoader for InMemoryLoader {
    fn resolve(&mut self, specifier: &str, _referrer: Option<&str>) -> Result<String, String> {
        // Specifiers are already canonical in the in-memory registry.
        if self.modules.iter().any(|(id, _)| id == specifier) {
            Ok(specifier.to_owned())
        } else {
            Err(format!("cannot resolve module \"{specifier}\""))
        }
    }

    fn load(&mut self, canonical: &str, _program: &mut Program) -> Result<ModuleSource, String> {
        self.modules
            .iter()
            .find(|(id, _)| id == canonical)
            .map(|(_, source)| source.clone())
            .ok_or_else(|| format!("module \"{canonical}\" not registered"))
    }
}
