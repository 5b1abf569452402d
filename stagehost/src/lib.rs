//! # Stagehost
//!
//! An extensible pipeline orchestrator.
//!
//! Stagehost runs ordered pipelines of stages that come from separately built
//! modules, with support for:
//!
//! - **Dynamic stages**: native shared libraries and rhai scripts register
//!   stage classes in a registry keyed by name and uuid
//! - **Two-phase runs**: a side-effect-free preflight over every stage, then
//!   fail-fast execution
//! - **Typed messages**: errors, warnings, status and progress delivered to
//!   any number of listeners
//! - **Remote execution**: an HTTP service running each request in its own
//!   session directory
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagehost::prelude::*;
//!
//! let registry = Arc::new(StageRegistry::new());
//! let loader = ModuleLoader::new(registry.clone());
//! loader.register_builtin()?;
//!
//! let mut pipeline = PipelineReader::new(&registry).read_str(&json_text)?;
//! if pipeline.preflight() >= 0 {
//!     let outcome = pipeline.execute();
//!     assert!(outcome.is_completed());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod messages;
pub mod observability;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod runner;
pub mod service;
pub mod stages;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ServiceConfig;
    pub use crate::core::{PipelineState, StageStatus};
    pub use crate::errors::{
        ConfigError, EngineError, PipelineBuildError, PluginError, RegistryError, StagehostError,
    };
    pub use crate::messages::{
        Message, MessageBus, MessageCollector, MessageHandler, MessageKind, MessageOrigin, Severity,
    };
    pub use crate::pipeline::{ExecutionOutcome, Pipeline, PipelineHandle, PipelineReader};
    pub use crate::plugins::{LoadReport, ModuleLoader};
    pub use crate::registry::StageRegistry;
    pub use crate::stages::{
        Parameter, ParameterKind, ParameterSet, Stage, StageContext, StageDescriptor, StageError,
        StageFactory, StageResult,
    };
    pub use std::sync::Arc;
}
