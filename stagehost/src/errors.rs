//! Error types for the stagehost framework.
//!
//! Each layer owns a focused error enum; [`StagehostError`] wraps them for
//! callers that drive more than one layer at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::stages::ParameterError;

/// The main error type for stagehost operations.
#[derive(Debug, Error)]
pub enum StagehostError {
    /// A stage could not be registered.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A plugin module failed to load.
    #[error("{0}")]
    Plugin(#[from] PluginError),

    /// The pipeline engine rejected an operation.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A pipeline could not be built from its JSON description.
    #[error("{0}")]
    Build(#[from] PipelineBuildError),

    /// The settings file could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised synchronously by the stage registry.
///
/// A failed registration never leaves a partial entry behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another stage already owns this class name.
    #[error("A stage named '{name}' is already registered")]
    DuplicateName {
        /// The conflicting class name.
        name: String,
    },

    /// Another stage already owns this uuid.
    #[error("Stage uuid {uuid} is already registered by '{existing}'")]
    DuplicateUuid {
        /// The conflicting uuid.
        uuid: Uuid,
        /// Class name of the stage that owns the uuid.
        existing: String,
    },

    /// The name is empty or the uuid is nil.
    #[error("Invalid stage identity: {reason}")]
    InvalidIdentity {
        /// What is wrong with the identity.
        reason: String,
    },
}

impl RegistryError {
    /// Creates an invalid identity error.
    #[must_use]
    pub fn invalid_identity(reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let kind = match self {
            Self::DuplicateName { .. } => "duplicate_name",
            Self::DuplicateUuid { .. } => "duplicate_uuid",
            Self::InvalidIdentity { .. } => "invalid_identity",
        };
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::Value::String(kind.to_string()));
        map.insert("message".to_string(), serde_json::Value::String(self.to_string()));
        map
    }
}

/// Per-file failures collected by the module loader.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The shared library could not be opened.
    #[error("Failed to load '{}': {message}", path.display())]
    Load {
        /// Module file.
        path: PathBuf,
        /// Loader message.
        message: String,
    },

    /// The module does not export the plugin entry point.
    #[error("'{}' does not export '{symbol}'", path.display())]
    MissingEntryPoint {
        /// Module file.
        path: PathBuf,
        /// Expected symbol name.
        symbol: String,
    },

    /// The module was built against another plugin ABI.
    #[error("'{}' uses plugin ABI {found}, expected {expected}", path.display())]
    AbiMismatch {
        /// Module file.
        path: PathBuf,
        /// ABI version reported by the module.
        found: u32,
        /// ABI version supported by this host.
        expected: u32,
    },

    /// The module exposed a malformed stage descriptor.
    #[error("Invalid stage descriptor in '{}': {message}", path.display())]
    InvalidDescriptor {
        /// Module file.
        path: PathBuf,
        /// What is wrong.
        message: String,
    },

    /// A script failed to compile or evaluate.
    #[error("Script error in '{}': {message}", path.display())]
    Script {
        /// Script file.
        path: PathBuf,
        /// Interpreter message.
        message: String,
    },

    /// A stage supplied by the module collided with a registered one.
    #[error("'{}': {source}", path.display())]
    Registration {
        /// Module file.
        path: PathBuf,
        /// The registry failure.
        #[source]
        source: RegistryError,
    },

    /// A module with the same name is already loaded.
    #[error("A module named '{name}' is already loaded")]
    DuplicateModule {
        /// Module name.
        name: String,
    },
}

impl PluginError {
    /// Returns the file this error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Load { path, .. }
            | Self::MissingEntryPoint { path, .. }
            | Self::AbiMismatch { path, .. }
            | Self::InvalidDescriptor { path, .. }
            | Self::Script { path, .. }
            | Self::Registration { path, .. } => Some(path),
            Self::DuplicateModule { .. } => None,
        }
    }
}

/// Operations the pipeline engine refuses in its current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// `execute` was called while the pipeline is already running.
    #[error("Pipeline is already executing")]
    AlreadyExecuting,

    /// `cancel` was called while nothing is running.
    #[error("Pipeline is not executing")]
    NotExecuting,

    /// The stage list was mutated while a pass is in progress.
    #[error("Pipeline cannot be modified while it is running")]
    MutationWhileBusy,

    /// `preflight` was called while a pass is in progress.
    #[error("Pipeline is already preflighting or executing")]
    PreflightWhileBusy,

    /// A stage index is out of range.
    #[error("Stage index {index} is out of range for a pipeline of {len} stages")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of stages.
        len: usize,
    },
}

impl EngineError {
    /// Stable negative code reported through the message bus.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::AlreadyExecuting => -200,
            Self::NotExecuting => -201,
            Self::MutationWhileBusy => -202,
            Self::PreflightWhileBusy => -203,
            Self::IndexOutOfRange { .. } => -204,
        }
    }
}

/// Failures while turning pipeline JSON into a [`crate::pipeline::Pipeline`].
#[derive(Debug, Error)]
pub enum PipelineBuildError {
    /// The pipeline text is not valid JSON.
    #[error("Pipeline JSON could not be parsed: {0}")]
    Parse(String),

    /// The pipeline description is not a JSON object.
    #[error("Pipeline description must be a JSON object")]
    NotAnObject,

    /// The `PipelineBuilder` header is malformed.
    #[error("Invalid PipelineBuilder header: {0}")]
    InvalidHeader(String),

    /// An index listed in the header has no stage object.
    #[error("Stage {index} is missing or not an object")]
    MissingStage {
        /// Pipeline index.
        index: usize,
    },

    /// A stage object has no class name.
    #[error("Stage {index} has no Filter_Name")]
    MissingClassName {
        /// Pipeline index.
        index: usize,
    },

    /// No registered factory matches the class name or uuid.
    #[error("Stage {index}: unknown stage class '{class_name}'")]
    UnknownStage {
        /// Pipeline index.
        index: usize,
        /// Requested class name.
        class_name: String,
    },

    /// A parameter value does not fit its declaration.
    #[error("Stage {index} ({class_name}): {source}")]
    Parameter {
        /// Pipeline index.
        index: usize,
        /// Class name of the stage.
        class_name: String,
        /// The parameter failure.
        #[source]
        source: ParameterError,
    },

    /// The pipeline refused to take the stage.
    #[error("Stage {index} could not be added: {source}")]
    Engine {
        /// Pipeline index.
        index: usize,
        /// The engine failure.
        #[source]
        source: EngineError,
    },
}

/// Failures while loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file does not exist.
    #[error("Settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The settings file could not be read.
    #[error("Failed to read settings file {}: {source}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`crate::config::ServiceConfig`].
    #[error("Failed to parse settings file {}: {message}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}
