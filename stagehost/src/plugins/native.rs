//! Native shared-library modules.
//!
//! Everything unsafe in the crate lives here: opening libraries, reading the
//! descriptor table and crossing the C boundary on each stage call.

#![allow(unsafe_code)]

use libloading::Library;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::abi::{
    HostApi, NativeStageDescriptor, PluginDescriptor, PluginEntryFn, MESSAGE_ERROR, MESSAGE_PROGRESS,
    MESSAGE_STATUS, MESSAGE_WARNING, PLUGIN_ABI_VERSION, PLUGIN_ENTRY_SYMBOL,
};
use super::{normalize_parameters, ModuleMetadata};
use crate::errors::PluginError;
use crate::stages::{
    Parameter, ParameterSet, Stage, StageContext, StageDescriptor, StageError, StageFactory, StageResult,
};

/// A loaded native module and the factories it exports.
pub struct NativeModule {
    metadata: ModuleMetadata,
    factories: Vec<Arc<dyn StageFactory>>,
    library: Option<Arc<Library>>,
}

impl NativeModule {
    /// Opens a shared library and reads its descriptor table.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        // SAFETY: opening a library runs its initializers. Only files found on
        // the configured plugin search path are loaded.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let library = Arc::new(library);

        // SAFETY: the symbol type matches the documented entry point signature.
        let entry: PluginEntryFn = unsafe {
            *library
                .get::<PluginEntryFn>(PLUGIN_ENTRY_SYMBOL.as_bytes())
                .map_err(|_| PluginError::MissingEntryPoint {
                    path: path.to_path_buf(),
                    symbol: PLUGIN_ENTRY_SYMBOL.to_string(),
                })?
        };

        // SAFETY: the entry point takes no arguments and returns a pointer to
        // a table owned by the library, which `library` keeps loaded.
        let table = unsafe { entry() };
        if table.is_null() {
            return Err(invalid(path, "entry point returned a null descriptor"));
        }
        // SAFETY: non-null and valid while `library` is loaded; every factory
        // and stage holds a clone of it.
        let module = unsafe { Self::build(path, &*table, Some(library))? };
        debug!(path = %path.display(), module = %module.metadata.name, "Loaded native module");
        Ok(module)
    }

    /// Builds a module from a descriptor table that is already in memory, such
    /// as one exported by a statically linked plugin.
    ///
    /// # Safety
    ///
    /// Every pointer in `table` must be valid as documented in
    /// [`super::abi`] for as long as the returned module and its stages live.
    pub unsafe fn from_descriptor(location: &Path, table: &PluginDescriptor) -> Result<Self, PluginError> {
        Self::build(location, table, None)
    }

    unsafe fn build(
        location: &Path,
        table: &PluginDescriptor,
        library: Option<Arc<Library>>,
    ) -> Result<Self, PluginError> {
        if table.abi_version != PLUGIN_ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                path: location.to_path_buf(),
                found: table.abi_version,
                expected: PLUGIN_ABI_VERSION,
            });
        }
        let name = read_str(table.name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid(location, "module name is missing"))?;
        let metadata = ModuleMetadata {
            name,
            version: read_str(table.version).unwrap_or_default(),
            vendor: read_str(table.vendor).unwrap_or_default(),
            description: read_str(table.description).unwrap_or_default(),
        };

        let stages: &[NativeStageDescriptor] = if table.stage_count == 0 {
            &[]
        } else if table.stages.is_null() {
            return Err(invalid(location, "stage table is null"));
        } else {
            std::slice::from_raw_parts(table.stages, table.stage_count)
        };

        let mut factories: Vec<Arc<dyn StageFactory>> = Vec::with_capacity(stages.len());
        for raw in stages {
            factories.push(Arc::new(NativeStageFactory::from_raw(
                location,
                &metadata,
                raw,
                library.clone(),
            )?));
        }

        Ok(Self {
            metadata,
            factories,
            library,
        })
    }

    /// Module name, version and vendor.
    #[must_use]
    pub const fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Factories for every exported stage.
    #[must_use]
    pub fn factories(&self) -> &[Arc<dyn StageFactory>] {
        &self.factories
    }

    /// Returns true if the module came from a shared library.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModule")
            .field("metadata", &self.metadata)
            .field("stage_count", &self.factories.len())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

fn invalid(path: &Path, message: &str) -> PluginError {
    PluginError::InvalidDescriptor {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Copies a NUL-terminated string; `None` for null pointers.
unsafe fn read_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

#[derive(Clone, Copy)]
struct Callbacks {
    create: unsafe extern "C" fn() -> *mut c_void,
    destroy: unsafe extern "C" fn(*mut c_void),
    validate: unsafe extern "C" fn(*mut c_void, *const c_char, *const HostApi) -> i32,
    execute: unsafe extern "C" fn(*mut c_void, *const c_char, *const HostApi) -> i32,
}

/// Factory adapter for one native stage class.
struct NativeStageFactory {
    descriptor: StageDescriptor,
    parameters: Vec<Parameter>,
    callbacks: Callbacks,
    location: PathBuf,
    library: Option<Arc<Library>>,
}

impl NativeStageFactory {
    unsafe fn from_raw(
        location: &Path,
        module: &ModuleMetadata,
        raw: &NativeStageDescriptor,
        library: Option<Arc<Library>>,
    ) -> Result<Self, PluginError> {
        let class_name = read_str(raw.class_name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid(location, "stage class name is missing"))?;
        let human_label = read_str(raw.human_label).unwrap_or_else(|| class_name.clone());

        let mut descriptor = StageDescriptor::new(class_name, Uuid::from_bytes(raw.uuid), human_label)
            .with_module(module.name.clone());
        if let Some(group) = read_str(raw.group) {
            descriptor.group = group;
        }
        if let Some(subgroup) = read_str(raw.subgroup) {
            descriptor.subgroup = subgroup;
        }
        descriptor.version = read_str(raw.version).unwrap_or_else(|| module.version.clone());

        let parameters = match read_str(raw.parameters_json) {
            None => Vec::new(),
            Some(json) => parse_parameters(&json).map_err(|e| PluginError::InvalidDescriptor {
                path: location.to_path_buf(),
                message: format!("{}: {e}", descriptor.class_name),
            })?,
        };

        Ok(Self {
            descriptor,
            parameters,
            callbacks: Callbacks {
                create: raw.create,
                destroy: raw.destroy,
                validate: raw.validate,
                execute: raw.execute,
            },
            location: location.to_path_buf(),
            library,
        })
    }
}

fn parse_parameters(json: &str) -> Result<Vec<Parameter>, String> {
    let parameters: Vec<Parameter> = serde_json::from_str(json).map_err(|e| e.to_string())?;
    normalize_parameters(parameters).map_err(|e| e.to_string())
}

impl StageFactory for NativeStageFactory {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn create(&self) -> Result<Box<dyn Stage>, StageError> {
        // SAFETY: `create` comes from a validated descriptor table whose
        // library is kept alive by `self.library`.
        let instance = unsafe { (self.callbacks.create)() };
        Ok(Box::new(NativeStage {
            descriptor: self.descriptor.clone(),
            params: ParameterSet::new(self.parameters.clone()),
            instance,
            callbacks: self.callbacks,
            _library: self.library.clone(),
        }))
    }
}

impl std::fmt::Debug for NativeStageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStageFactory")
            .field("class_name", &self.descriptor.class_name)
            .field("location", &self.location)
            .finish()
    }
}

/// A native stage instance.
struct NativeStage {
    descriptor: StageDescriptor,
    params: ParameterSet,
    instance: *mut c_void,
    callbacks: Callbacks,
    _library: Option<Arc<Library>>,
}

// SAFETY: the instance pointer is only dereferenced by the plugin during
// calls made from the single thread that currently owns the stage.
unsafe impl Send for NativeStage {}

#[derive(Clone, Copy)]
enum Phase {
    Validate,
    Execute,
}

impl NativeStage {
    fn invoke(&mut self, ctx: &mut StageContext<'_>, phase: Phase) -> StageResult {
        let values = serde_json::to_string(&self.params.to_json_map())
            .map_err(|e| StageError::new(-11100, format!("Encoding parameters: {e}")))?;
        let values = CString::new(values)
            .map_err(|_| StageError::new(-11101, "Parameter values contain a NUL byte"))?;

        let raw_ctx: *mut StageContext<'_> = ctx;
        let host = HostApi {
            context: raw_ctx.cast::<c_void>(),
            emit: host_emit,
            is_cancelled: host_is_cancelled,
        };
        let callback = match phase {
            Phase::Validate => self.callbacks.validate,
            Phase::Execute => self.callbacks.execute,
        };

        // SAFETY: `host` and `values` outlive the call; the context pointer is
        // only used by the host callbacks while the call is running.
        let code = unsafe { callback(self.instance, values.as_ptr(), &host) };

        if code < 0 && ctx.error_code() >= 0 {
            return Err(StageError::new(
                code,
                format!("{} returned error code {code}", self.descriptor.class_name),
            ));
        }
        Ok(())
    }
}

impl Drop for NativeStage {
    fn drop(&mut self) {
        if !self.instance.is_null() {
            // SAFETY: `instance` came from this class's `create`.
            unsafe { (self.callbacks.destroy)(self.instance) };
        }
    }
}

impl std::fmt::Debug for NativeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStage")
            .field("class_name", &self.descriptor.class_name)
            .field("has_instance", &!self.instance.is_null())
            .finish()
    }
}

impl Stage for NativeStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        self.invoke(ctx, Phase::Validate)
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        self.invoke(ctx, Phase::Execute)
    }
}

extern "C" fn host_emit(context: *mut c_void, kind: u32, code: i32, text: *const c_char) {
    if context.is_null() {
        return;
    }
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: `context` is the `StageContext` set up by `NativeStage::invoke`
        // and the plugin only calls back while that call is running.
        let ctx = unsafe { &mut *context.cast::<StageContext<'_>>() };
        // SAFETY: the plugin passes a NUL-terminated string or null.
        let text = unsafe { read_str(text) }.unwrap_or_default();
        match kind {
            MESSAGE_ERROR => ctx.error(code, text),
            MESSAGE_WARNING => ctx.warning(code, text),
            MESSAGE_STATUS => ctx.status(text),
            MESSAGE_PROGRESS => ctx.progress(code, text),
            other => ctx.warning(-11102, format!("Unknown message kind {other}: {text}")),
        }
    }));
}

extern "C" fn host_is_cancelled(context: *mut c_void) -> bool {
    if context.is_null() {
        return false;
    }
    // SAFETY: see `host_emit`.
    let ctx = unsafe { &*context.cast::<StageContext<'_>>() };
    ctx.is_cancelled()
}
