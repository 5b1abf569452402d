//! C-compatible plugin interface.
//!
//! A native module is a shared library exporting
//!
//! ```c
//! const StagehostPluginDescriptor* stagehost_plugin_entry(void);
//! ```
//!
//! The returned table and every string it points to must stay valid until the
//! library is unloaded. Strings are NUL-terminated UTF-8. Parameter
//! declarations and parameter values cross the boundary as JSON text; the
//! declaration format is the serde form of [`crate::stages::Parameter`]:
//!
//! ```json
//! [{"property_name": "Factor", "human_label": "Factor", "kind": "double", "default": 1.0}]
//! ```
//!
//! `validate` and `execute` return 0 on success or a negative error code.
//! Messages go through the [`HostApi`] passed to each call; that pointer is
//! only valid for the duration of the call.

use std::ffi::{c_char, c_void};

/// ABI version this host understands.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Symbol every native module must export.
pub const PLUGIN_ENTRY_SYMBOL: &str = "stagehost_plugin_entry";

/// `HostApi::emit` kind for errors.
pub const MESSAGE_ERROR: u32 = 0;
/// `HostApi::emit` kind for warnings.
pub const MESSAGE_WARNING: u32 = 1;
/// `HostApi::emit` kind for status lines; `code` is ignored.
pub const MESSAGE_STATUS: u32 = 2;
/// `HostApi::emit` kind for progress; `code` is the percentage.
pub const MESSAGE_PROGRESS: u32 = 3;

/// Callbacks the host hands to `validate` and `execute`.
#[repr(C)]
pub struct HostApi {
    /// Opaque host state; pass it back unchanged.
    pub context: *mut c_void,
    /// Publishes a stage-scoped message.
    pub emit: unsafe extern "C" fn(context: *mut c_void, kind: u32, code: i32, text: *const c_char),
    /// Returns true once the run has been cancelled.
    pub is_cancelled: unsafe extern "C" fn(context: *mut c_void) -> bool,
}

/// One stage class exported by a module.
#[repr(C)]
pub struct NativeStageDescriptor {
    /// Unique class name.
    pub class_name: *const c_char,
    /// Uuid bytes in big-endian order.
    pub uuid: [u8; 16],
    /// Label shown to users.
    pub human_label: *const c_char,
    /// Group name; may be null.
    pub group: *const c_char,
    /// Subgroup name; may be null.
    pub subgroup: *const c_char,
    /// Stage version; may be null.
    pub version: *const c_char,
    /// JSON array of parameter declarations; may be null for none.
    pub parameters_json: *const c_char,
    /// Allocates per-instance state; may return null for stateless stages.
    pub create: unsafe extern "C" fn() -> *mut c_void,
    /// Frees what `create` returned.
    pub destroy: unsafe extern "C" fn(instance: *mut c_void),
    /// Checks parameters; `parameters` is a JSON object of current values.
    pub validate: unsafe extern "C" fn(
        instance: *mut c_void,
        parameters: *const c_char,
        host: *const HostApi,
    ) -> i32,
    /// Does the work; same arguments as `validate`.
    pub execute: unsafe extern "C" fn(
        instance: *mut c_void,
        parameters: *const c_char,
        host: *const HostApi,
    ) -> i32,
}

/// Table returned by the module entry point.
#[repr(C)]
pub struct PluginDescriptor {
    /// Must equal [`PLUGIN_ABI_VERSION`].
    pub abi_version: u32,
    /// Module name, unique per host.
    pub name: *const c_char,
    /// Module version; may be null.
    pub version: *const c_char,
    /// Vendor; may be null.
    pub vendor: *const c_char,
    /// Free-form description; may be null.
    pub description: *const c_char,
    /// Number of entries in `stages`.
    pub stage_count: usize,
    /// Stage classes.
    pub stages: *const NativeStageDescriptor,
}

/// Signature of the module entry point.
pub type PluginEntryFn = unsafe extern "C" fn() -> *const PluginDescriptor;
