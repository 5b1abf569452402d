//! Pipeline state machine and per-stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a pipeline.
///
/// ```text
/// Built -> Preflighting -> {PreflightFailed, PreflightOk} -> Executing -> {Completed, Failed, Cancelled}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Freshly built or modified; no pass has run since.
    #[default]
    Built,
    /// `validate` is running on each stage.
    Preflighting,
    /// At least one stage failed validation.
    PreflightFailed,
    /// Every enabled stage validated.
    PreflightOk,
    /// `execute` is running on each stage.
    Executing,
    /// Every enabled stage executed.
    Completed,
    /// A stage reported an execution error.
    Failed,
    /// Execution stopped at a cancellation point.
    Cancelled,
}

impl PipelineState {
    /// Returns true while a preflight or execute pass is in progress.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Preflighting | Self::Executing)
    }

    /// Returns true if the state ends an execute pass.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "built"),
            Self::Preflighting => write!(f, "preflighting"),
            Self::PreflightFailed => write!(f, "preflight_failed"),
            Self::PreflightOk => write!(f, "preflight_ok"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of a single stage slot within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not run in the current pass.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Ok,
    /// Stage is disabled and was skipped.
    Skipped,
    /// Stage returned after observing cancellation.
    Cancelled,
    /// Stage reported an error.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "ok"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped | Self::Cancelled | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}
