//! Core domain model types for stagehost.
//!
//! This module contains the state enums shared by the engine, the service
//! and the runner.

mod status;

pub use status::{PipelineState, StageStatus};
