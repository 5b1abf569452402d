//! Pipeline building and execution.
//!
//! This module provides:
//! - The [`Pipeline`] engine with preflight and fail-fast execution
//! - Cross-thread cancellation through [`PipelineHandle`]
//! - The pipeline JSON reader and writer

mod engine;
mod json;


pub use engine::{
    ExecutionOutcome, Pipeline, PipelineHandle, StageReport, PIPELINE_CANCELED, PIPELINE_COMPLETE,
};
pub use json::{
    to_json, PipelineReader, UnknownStagePolicy, FILTER_ENABLED_KEY, FILTER_HUMAN_LABEL_KEY,
    FILTER_NAME_KEY, FILTER_UUID_KEY, NUMBER_FILTERS_KEY, PIPELINE_BUILDER_KEY, PIPELINE_FORMAT_VERSION,
    PIPELINE_NAME_KEY, VERSION_KEY,
};
