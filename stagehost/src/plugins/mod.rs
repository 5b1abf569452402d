//! Module loading.
//!
//! Stages come from three places: the bundled core module, native shared
//! libraries speaking the C ABI in [`abi`], and rhai scripts. All three end up
//! as [`StageFactory`] values in the [`StageRegistry`]; the loader remembers
//! which module supplied which stage so modules can be listed and removed.

pub mod abi;
mod native;
mod script;
mod search;

pub use native::NativeModule;
pub use script::{ScriptModule, SCRIPT_EXTENSION, SCRIPT_RUNTIME_CODE, SCRIPT_STAGE_BASE};
pub use search::{candidates, classify, search_paths, search_paths_with, CandidateKind, PLUGIN_PATH_ENV, PLUGIN_SUBDIR};

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::PluginError;
use crate::registry::StageRegistry;
use crate::stages::builtin::{core_factories, CORE_MODULE};
use crate::stages::{Parameter, ParameterError, StageFactory};

/// Name, version and vendor of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Unique module name.
    pub name: String,
    /// Module version.
    pub version: String,
    /// Vendor.
    pub vendor: String,
    /// Free-form description.
    pub description: String,
}

/// Where a module came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleKind {
    /// Compiled into the host.
    Builtin,
    /// Shared library.
    Native,
    /// Rhai script.
    Script,
}

/// Introspection record for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginInfo {
    /// Module name.
    #[serde(rename = "PluginName")]
    pub name: String,
    /// Module version.
    pub version: String,
    /// Vendor.
    pub vendor: String,
    /// Description.
    pub description: String,
    /// File the module was loaded from.
    pub location: String,
    /// Module kind.
    pub kind: ModuleKind,
    /// False once the module has been unloaded.
    pub loaded: bool,
    /// Class names of the stages the module registered.
    pub filters: Vec<String>,
}

/// Outcome of [`ModuleLoader::load_from_paths`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Stages added to the registry.
    pub stages_loaded: usize,
    /// Modules that loaded.
    pub modules_loaded: usize,
    /// Files skipped because a file with the same name already loaded.
    pub skipped: Vec<PathBuf>,
    /// Per-file failures.
    pub errors: Vec<(PathBuf, PluginError)>,
}

impl LoadReport {
    /// Returns true if no file failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fills missing defaults and checks every default against its declaration.
pub(crate) fn normalize_parameters(mut parameters: Vec<Parameter>) -> Result<Vec<Parameter>, ParameterError> {
    for parameter in &mut parameters {
        if parameter.default.is_null() {
            parameter.default = parameter.kind.zero_value();
        }
        parameter.check(&parameter.default)?;
    }
    Ok(parameters)
}

#[derive(Debug)]
struct LoadedModule {
    metadata: ModuleMetadata,
    kind: ModuleKind,
    location: PathBuf,
    stages: Vec<String>,
    loaded: bool,
}

impl LoadedModule {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            vendor: self.metadata.vendor.clone(),
            description: self.metadata.description.clone(),
            location: self.location.display().to_string(),
            kind: self.kind,
            loaded: self.loaded,
            filters: self.stages.clone(),
        }
    }
}

/// Loads modules into a registry and tracks their provenance.
pub struct ModuleLoader {
    registry: Arc<StageRegistry>,
    modules: RwLock<Vec<LoadedModule>>,
    loaded_files: RwLock<HashSet<String>>,
}

impl ModuleLoader {
    /// Creates a loader feeding `registry`.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            modules: RwLock::new(Vec::new()),
            loaded_files: RwLock::new(HashSet::new()),
        }
    }

    /// The registry this loader feeds.
    #[must_use]
    pub const fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Registers the bundled stages as the `Core` module.
    pub fn register_builtin(&self) -> Result<usize, PluginError> {
        let metadata = ModuleMetadata {
            name: CORE_MODULE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            vendor: "Stagehost".to_string(),
            description: "Stages bundled with the host".to_string(),
        };
        let (count, mut errors) =
            self.register_module(metadata, ModuleKind::Builtin, Path::new("<builtin>"), &core_factories())?;
        match errors.pop() {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    /// Scans `paths` in order and loads every module file found.
    ///
    /// A failing file is recorded in the report and the scan continues.
    pub fn load_from_paths(&self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();

        for dir in paths {
            for (path, kind) in candidates(dir) {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.loaded_files.read().contains(&file_name) {
                    report.skipped.push(path);
                    continue;
                }

                let loaded = match kind {
                    CandidateKind::Native => {
                        NativeModule::load(&path).map(|m| (m.metadata().clone(), m.factories().to_vec()))
                    }
                    CandidateKind::Script => {
                        ScriptModule::load(&path).map(|m| (m.metadata().clone(), m.factories().to_vec()))
                    }
                };
                let (metadata, factories) = match loaded {
                    Ok(module) => module,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Failed to load module");
                        report.errors.push((path, err));
                        continue;
                    }
                };

                let module_kind = match kind {
                    CandidateKind::Native => ModuleKind::Native,
                    CandidateKind::Script => ModuleKind::Script,
                };
                match self.register_module(metadata, module_kind, &path, &factories) {
                    Ok((count, errors)) => {
                        self.loaded_files.write().insert(file_name);
                        report.modules_loaded += 1;
                        report.stages_loaded += count;
                        report.errors.extend(errors.into_iter().map(|e| (path.clone(), e)));
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Rejected module");
                        report.errors.push((path, err));
                    }
                }
            }
        }

        info!(
            modules = report.modules_loaded,
            stages = report.stages_loaded,
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Module scan finished"
        );
        report
    }

    /// Registers each factory individually. Returns the number registered and
    /// the per-stage failures; fails outright only on a duplicate module name.
    fn register_module(
        &self,
        metadata: ModuleMetadata,
        kind: ModuleKind,
        location: &Path,
        factories: &[Arc<dyn StageFactory>],
    ) -> Result<(usize, Vec<PluginError>), PluginError> {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.loaded && m.metadata.name == metadata.name) {
            return Err(PluginError::DuplicateModule { name: metadata.name });
        }

        let mut stages = Vec::with_capacity(factories.len());
        let mut errors = Vec::new();
        for factory in factories {
            match self.registry.register_factory(factory.clone()) {
                Ok(()) => stages.push(factory.descriptor().class_name.clone()),
                Err(source) => errors.push(PluginError::Registration {
                    path: location.to_path_buf(),
                    source,
                }),
            }
        }

        info!(module = %metadata.name, stages = stages.len(), "Registered module");
        let count = stages.len();
        modules.retain(|m| m.metadata.name != metadata.name);
        modules.push(LoadedModule {
            metadata,
            kind,
            location: location.to_path_buf(),
            stages,
            loaded: true,
        });
        Ok((count, errors))
    }

    /// Records for every module seen, in load order.
    #[must_use]
    pub fn loaded_modules(&self) -> Vec<PluginInfo> {
        self.modules.read().iter().map(LoadedModule::info).collect()
    }

    /// Record for one module.
    #[must_use]
    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.modules
            .read()
            .iter()
            .find(|m| m.metadata.name == name)
            .map(LoadedModule::info)
    }

    /// Removes a module's stages from the registry. Returns false if no loaded
    /// module has that name.
    pub fn unload(&self, name: &str) -> bool {
        let mut modules = self.modules.write();
        let Some(module) = modules.iter_mut().find(|m| m.loaded && m.metadata.name == name) else {
            return false;
        };
        self.registry.unregister_module(name);
        module.loaded = false;
        if let Some(file_name) = module.location.file_name() {
            self.loaded_files.write().remove(&*file_name.to_string_lossy());
        }
        true
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("module_count", &self.modules.read().len())
            .field("stage_count", &self.registry.len())
            .finish()
    }
}
