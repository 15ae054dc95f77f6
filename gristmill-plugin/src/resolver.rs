//! Module resolution: turning a module id into an export
//!
//! Resolution starts from the build's working directory and falls back to
//! globally configured locations. Resolvers compose: an in-process registry
//! is usually consulted before the dynamic-library loader.

use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::processor::ModuleExport;

/// Produces a fresh export for each import of a module.
pub type ModuleConstructor = Arc<dyn Fn() -> ModuleExport + Send + Sync>;

/// Entry symbol every Gristmill module library exports.
pub type ModuleEntry = fn() -> ModuleExport;

const MODULE_ENTRY_SYMBOL: &[u8] = b"gristmill_module";

/// Environment variable listing global module search paths.
pub const MODULE_PATH_ENV: &str = "GRISTMILL_MODULE_PATH";

/// Resolves module ids to their exports.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// Resolve `module_id` starting from `cwd`.
    async fn resolve(&self, module_id: &str, cwd: &str) -> PluginResult<ModuleExport>;

    /// Whether this resolver recognizes `module_id`.
    fn can_resolve(&self, module_id: &str, cwd: &str) -> bool;

    /// Resolver name for diagnostics.
    fn resolver_type(&self) -> &'static str;
}

/// Import a module, wrapping any resolution failure.
///
/// The wrapper message is prefixed `Error importing module: <module_id>` and
/// the inner error kind is preserved as the source.
pub async fn import(
    resolver: &dyn ModuleResolver,
    module_id: &str,
    cwd: &str,
) -> PluginResult<ModuleExport> {
    resolver
        .resolve(module_id, cwd)
        .await
        .map_err(|source| PluginError::import_failed(module_id, source))
}

/// In-process registry of modules keyed by id.
#[derive(Default, Clone)]
pub struct StaticModuleResolver {
    modules: HashMap<String, ModuleConstructor>,
}

impl StaticModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `module_id`.
    pub fn register<F>(&mut self, module_id: impl Into<String>, constructor: F)
    where
        F: Fn() -> ModuleExport + Send + Sync + 'static,
    {
        self.modules
            .insert(module_id.into(), Arc::new(constructor));
    }

    /// Builder-style registration.
    pub fn with_module<F>(mut self, module_id: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> ModuleExport + Send + Sync + 'static,
    {
        self.register(module_id, constructor);
        self
    }
}

#[async_trait]
impl ModuleResolver for StaticModuleResolver {
    async fn resolve(&self, module_id: &str, _cwd: &str) -> PluginResult<ModuleExport> {
        self.modules
            .get(module_id)
            .map(|constructor| constructor())
            .ok_or_else(|| PluginError::module_not_found(module_id))
    }

    fn can_resolve(&self, module_id: &str, _cwd: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    fn resolver_type(&self) -> &'static str {
        "static"
    }
}

/// Loads modules from dynamic libraries.
///
/// A module id resolves first relative to the build's working directory and
/// then across the global search paths ([`MODULE_PATH_ENV`] plus paths added
/// with [`LibraryResolver::with_search_path`]). Loaded libraries are kept
/// alive for the life of the resolver.
pub struct LibraryResolver {
    search_paths: Vec<PathBuf>,
    libraries: Mutex<Vec<libloading::Library>>,
}

impl LibraryResolver {
    pub fn new() -> Self {
        let search_paths = env::var_os(MODULE_PATH_ENV)
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();
        Self {
            search_paths,
            libraries: Mutex::new(Vec::new()),
        }
    }

    /// Add a global search path consulted after the working directory.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Candidate library files for `module_id`, in resolution order.
    fn candidate_paths(&self, module_id: &str, cwd: &str) -> Vec<PathBuf> {
        let id_path = Path::new(module_id);
        if id_path.is_absolute() {
            return vec![id_path.to_path_buf()];
        }

        let file_name = if matches!(
            id_path.extension().and_then(|ext| ext.to_str()),
            Some("so" | "dll" | "dylib")
        ) {
            module_id.to_string()
        } else {
            format!(
                "{}{}{}",
                env::consts::DLL_PREFIX,
                module_id,
                env::consts::DLL_SUFFIX
            )
        };

        let mut candidates = vec![Path::new(cwd).join(&file_name)];
        candidates.extend(self.search_paths.iter().map(|path| path.join(&file_name)));
        candidates
    }

    fn load(&self, path: &Path) -> PluginResult<ModuleExport> {
        unsafe {
            let library = libloading::Library::new(path)?;
            let entry: libloading::Symbol<ModuleEntry> = library.get(MODULE_ENTRY_SYMBOL)?;
            let export = entry();
            self.libraries
                .lock()
                .expect("library list poisoned")
                .push(library);
            Ok(export)
        }
    }
}

impl Default for LibraryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleResolver for LibraryResolver {
    async fn resolve(&self, module_id: &str, cwd: &str) -> PluginResult<ModuleExport> {
        for path in self.candidate_paths(module_id, cwd) {
            if path.exists() {
                debug!(module_id, path = %path.display(), "Loading module library");
                return self.load(&path);
            }
        }
        Err(PluginError::module_not_found(module_id))
    }

    fn can_resolve(&self, module_id: &str, cwd: &str) -> bool {
        self.candidate_paths(module_id, cwd)
            .iter()
            .any(|path| path.exists())
    }

    fn resolver_type(&self) -> &'static str {
        "library"
    }
}

/// Tries resolvers in order; the first that recognizes the id wins.
#[derive(Default)]
pub struct CompositeResolver {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
}

impl CompositeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resolver: Arc<dyn ModuleResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.push(resolver);
        self
    }
}

#[async_trait]
impl ModuleResolver for CompositeResolver {
    async fn resolve(&self, module_id: &str, cwd: &str) -> PluginResult<ModuleExport> {
        for resolver in &self.resolvers {
            if !resolver.can_resolve(module_id, cwd) {
                continue;
            }
            match resolver.resolve(module_id, cwd).await {
                Ok(export) => return Ok(export),
                Err(error) => {
                    debug!(
                        resolver_type = resolver.resolver_type(),
                        module_id,
                        %error,
                        "Module resolution failed, trying next resolver"
                    );
                    continue;
                }
            }
        }
        Err(PluginError::module_not_found(module_id))
    }

    fn can_resolve(&self, module_id: &str, cwd: &str) -> bool {
        self.resolvers
            .iter()
            .any(|resolver| resolver.can_resolve(module_id, cwd))
    }

    fn resolver_type(&self) -> &'static str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{processor_fn, ProcessorOutput};
    use gristmill_core::FileInfo;
    use serde_json::json;

    fn noop_module() -> ModuleExport {
        ModuleExport::Processor(processor_fn("noop", |file, _run| async move {
            Ok(ProcessorOutput::Single(FileInfo::new(file.path)))
        }))
    }

    #[tokio::test]
    async fn test_static_resolver_round_trip() {
        let resolver = StaticModuleResolver::new().with_module("noop", noop_module);

        assert!(resolver.can_resolve("noop", "/build"));
        assert!(!resolver.can_resolve("other", "/build"));

        match resolver.resolve("noop", "/build").await.unwrap() {
            ModuleExport::Processor(processor) => assert_eq!(processor.name(), "noop"),
            other => panic!("unexpected export: {:?}", other),
        }

        let error = resolver.resolve("other", "/build").await.unwrap_err();
        assert!(matches!(error, PluginError::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_import_wraps_resolution_failures() {
        let resolver = StaticModuleResolver::new();

        let error = import(&resolver, "non-existent", "/build")
            .await
            .unwrap_err();
        assert!(error
            .to_string()
            .starts_with("Error importing module: non-existent"));
        match error {
            PluginError::ImportFailed { source, .. } => {
                assert!(matches!(*source, PluginError::ModuleNotFound { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_composite_tries_resolvers_in_order() {
        let first = StaticModuleResolver::new().with_module("noop", noop_module);
        let second = StaticModuleResolver::new()
            .with_module("noop", || ModuleExport::Value(json!("shadowed")))
            .with_module("data", || ModuleExport::Value(json!(42)));

        let composite = CompositeResolver::new()
            .with_resolver(Arc::new(first))
            .with_resolver(Arc::new(second));

        // "noop" is found by the first resolver, shadowing the second.
        assert!(matches!(
            composite.resolve("noop", "/build").await.unwrap(),
            ModuleExport::Processor(_)
        ));
        // "data" falls through to the second.
        assert!(matches!(
            composite.resolve("data", "/build").await.unwrap(),
            ModuleExport::Value(_)
        ));
        assert!(matches!(
            composite.resolve("missing", "/build").await.unwrap_err(),
            PluginError::ModuleNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_library_resolver_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = LibraryResolver::new();

        let cwd = dir.path().to_string_lossy().to_string();
        assert!(!resolver.can_resolve("markdown", &cwd));
        let error = resolver.resolve("markdown", &cwd).await.unwrap_err();
        assert!(matches!(error, PluginError::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_library_resolver_candidate_order() {
        let cwd_dir = tempfile::tempdir().unwrap();
        let global_dir = tempfile::tempdir().unwrap();
        let resolver = LibraryResolver::new().with_search_path(global_dir.path());

        let candidates = resolver.candidate_paths("markdown", &cwd_dir.path().to_string_lossy());
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].starts_with(cwd_dir.path()));
        assert!(candidates[1].starts_with(global_dir.path()));

        let file_name = candidates[0].file_name().unwrap().to_string_lossy();
        assert!(file_name.contains("markdown"));
    }

    #[tokio::test]
    async fn test_library_resolver_rejects_invalid_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!(
            "{}broken{}",
            env::consts::DLL_PREFIX,
            env::consts::DLL_SUFFIX
        ));
        std::fs::write(&path, b"not a library").unwrap();

        let resolver = LibraryResolver::new();
        let cwd = dir.path().to_string_lossy().to_string();
        assert!(resolver.can_resolve("broken", &cwd));
        let error = resolver.resolve("broken", &cwd).await.unwrap_err();
        assert!(matches!(error, PluginError::Library(_)));
    }
}
