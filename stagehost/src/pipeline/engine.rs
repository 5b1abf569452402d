//! Ordered stage execution with preflight and fail-fast semantics.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::core::{PipelineState, StageStatus};
use crate::errors::EngineError;
use crate::messages::{Message, MessageBus, MessageOrigin, StageOrigin};
use crate::stages::{Stage, StageContext, StageResult};

/// Status text published when every stage has executed.
pub const PIPELINE_COMPLETE: &str = "Pipeline Complete";

/// Status text published when execution stops at a cancellation point.
pub const PIPELINE_CANCELED: &str = "Pipeline Canceled";

const DEFAULT_NAME: &str = "Untitled Pipeline";

struct StageSlot {
    stage: Box<dyn Stage>,
    label: String,
    enabled: bool,
    status: StageStatus,
    error_code: i32,
    warning_code: i32,
    duration_ms: f64,
}

impl StageSlot {
    fn new(stage: Box<dyn Stage>) -> Self {
        let label = stage.descriptor().human_label.clone();
        Self {
            stage,
            label,
            enabled: true,
            status: StageStatus::Pending,
            error_code: 0,
            warning_code: 0,
            duration_ms: 0.0,
        }
    }

    fn reset(&mut self) {
        self.status = StageStatus::Pending;
        self.error_code = 0;
        self.warning_code = 0;
        self.duration_ms = 0.0;
    }
}

/// Outcome of one stage in the most recent pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Pipeline index.
    pub index: usize,
    /// Registered class name.
    pub class_name: String,
    /// Label shown in messages.
    pub human_label: String,
    /// Whether the stage takes part in runs.
    pub enabled: bool,
    /// Status after the pass.
    pub status: StageStatus,
    /// First negative code the stage reported, or 0.
    pub error_code: i32,
    /// First warning code the stage reported, or 0.
    pub warning_code: i32,
    /// Wall time spent in the stage.
    pub duration_ms: f64,
}

/// Result of [`Pipeline::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// State the pipeline ended in.
    pub state: PipelineState,
    /// Pipeline error code: the failing stage's code, or 0.
    pub error_code: i32,
    /// Per-stage results.
    pub stages: Vec<StageReport>,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass ended.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// Returns true if every enabled stage executed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Report of the stage that stopped the run, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

/// Thread-safe view of a pipeline used to observe or cancel a run from
/// another thread.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    state: Arc<RwLock<PipelineState>>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Requests cancellation of the running pass.
    pub fn cancel(&self) -> Result<(), EngineError> {
        if !self.state().is_busy() {
            return Err(EngineError::NotExecuting);
        }
        self.cancel.cancel("cancelled by request");
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validate,
    Execute,
}

/// An ordered list of stages and the state of its last pass.
pub struct Pipeline {
    name: String,
    slots: Vec<StageSlot>,
    state: Arc<RwLock<PipelineState>>,
    error_code: i32,
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_NAME)
    }
}

impl Pipeline {
    /// Creates an empty pipeline with its own message bus.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
            state: Arc::new(RwLock::new(PipelineState::Built)),
            error_code: 0,
            bus: Arc::new(MessageBus::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Publishes through `bus` instead of a private one.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the pipeline.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The bus every stage and engine message goes through.
    #[must_use]
    pub const fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Code of the last pass: the first negative stage code, or 0.
    #[must_use]
    pub const fn error_code(&self) -> i32 {
        self.error_code
    }

    /// Number of stages, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stage at `index`.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&dyn Stage> {
        self.slots.get(index).map(|s| s.stage.as_ref())
    }

    /// Mutable stage at `index`, for parameter edits.
    pub fn stage_mut(&mut self, index: usize) -> Option<&mut (dyn Stage + 'static)> {
        self.slots.get_mut(index).map(|s| s.stage.as_mut())
    }

    /// All stages in order.
    pub fn stages(&self) -> impl Iterator<Item = &dyn Stage> {
        self.slots.iter().map(|s| s.stage.as_ref())
    }

    /// All stages in order, mutably.
    pub fn stages_mut(&mut self) -> impl Iterator<Item = &mut (dyn Stage + 'static)> {
        self.slots.iter_mut().map(|s| s.stage.as_mut())
    }

    /// Label used for the stage at `index` in messages.
    #[must_use]
    pub fn label(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(|s| s.label.as_str())
    }

    /// Whether the stage at `index` takes part in runs.
    #[must_use]
    pub fn is_enabled(&self, index: usize) -> Option<bool> {
        self.slots.get(index).map(|s| s.enabled)
    }

    /// Per-stage results of the last pass.
    #[must_use]
    pub fn reports(&self) -> Vec<StageReport> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| StageReport {
                index,
                class_name: slot.stage.class_name().to_string(),
                human_label: slot.label.clone(),
                enabled: slot.enabled,
                status: slot.status,
                error_code: slot.error_code,
                warning_code: slot.warning_code,
                duration_ms: slot.duration_ms,
            })
            .collect()
    }

    /// Handle for observing or cancelling from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> PipelineHandle {
        PipelineHandle {
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Requests cancellation of the running pass.
    pub fn cancel(&self) -> Result<(), EngineError> {
        self.cancel_handle().cancel()
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.state().is_busy() {
            return Err(EngineError::MutationWhileBusy);
        }
        Ok(())
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), EngineError> {
        if index >= len {
            return Err(EngineError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        Ok(())
    }

    fn mark_modified(&mut self) {
        self.set_state(PipelineState::Built);
        self.error_code = 0;
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.write() = state;
    }

    /// Appends a stage.
    pub fn push_back(&mut self, stage: Box<dyn Stage>) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.slots.push(StageSlot::new(stage));
        self.mark_modified();
        Ok(())
    }

    /// Prepends a stage.
    pub fn push_front(&mut self, stage: Box<dyn Stage>) -> Result<(), EngineError> {
        self.insert(0, stage)
    }

    /// Inserts a stage before `index`; `index == len` appends.
    pub fn insert(&mut self, index: usize, stage: Box<dyn Stage>) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.check_index(index, self.slots.len() + 1)?;
        self.slots.insert(index, StageSlot::new(stage));
        self.mark_modified();
        Ok(())
    }

    /// Removes and returns the stage at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Box<dyn Stage>, EngineError> {
        self.ensure_idle()?;
        self.check_index(index, self.slots.len())?;
        let slot = self.slots.remove(index);
        self.mark_modified();
        Ok(slot.stage)
    }

    /// Removes every stage.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.slots.clear();
        self.mark_modified();
        Ok(())
    }

    /// Enables or disables the stage at `index`.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.check_index(index, self.slots.len())?;
        self.slots[index].enabled = enabled;
        self.mark_modified();
        Ok(())
    }

    /// Overrides the label of the stage at `index`.
    pub fn set_label(&mut self, index: usize, label: impl Into<String>) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.check_index(index, self.slots.len())?;
        self.slots[index].label = label.into();
        Ok(())
    }

    fn pipeline_origin(&self) -> MessageOrigin {
        MessageOrigin::Pipeline {
            name: self.name.clone(),
        }
    }

    fn publish_engine_error(&self, err: &EngineError) {
        warn!(pipeline = %self.name, code = err.code(), "{err}");
        self.bus
            .publish(&Message::error(self.pipeline_origin(), err.code(), err.to_string()));
    }

    /// Validates every enabled stage in order without side effects.
    ///
    /// All stages are checked even after a failure; each failure is published
    /// by the stage. Returns the first negative stage code, or 0.
    pub fn preflight(&mut self) -> i32 {
        if self.state().is_busy() {
            let err = EngineError::PreflightWhileBusy;
            self.publish_engine_error(&err);
            return err.code();
        }

        self.cancel.reset();
        self.set_state(PipelineState::Preflighting);
        self.error_code = 0;
        debug!(pipeline = %self.name, stages = self.slots.len(), "Preflight started");

        let bus = self.bus.clone();
        let mut first_error = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.reset();
            if !slot.enabled {
                slot.status = StageStatus::Skipped;
                continue;
            }
            run_stage(slot, index, &bus, &self.cancel, Phase::Validate);
            if slot.error_code < 0 && first_error == 0 {
                first_error = slot.error_code;
            }
        }

        self.error_code = first_error;
        let state = if first_error < 0 {
            PipelineState::PreflightFailed
        } else {
            PipelineState::PreflightOk
        };
        self.set_state(state);
        debug!(pipeline = %self.name, code = first_error, "Preflight finished");
        first_error
    }

    /// Runs every enabled stage in order, stopping at the first failure.
    ///
    /// Preflights first unless the last pass was a successful preflight, and
    /// refuses to execute if that preflight fails.
    pub fn execute(&mut self) -> ExecutionOutcome {
        let started_at = Utc::now();

        if self.state().is_busy() {
            let err = EngineError::AlreadyExecuting;
            self.publish_engine_error(&err);
            return self.outcome_with(self.state(), err.code(), started_at);
        }
        if self.state() != PipelineState::PreflightOk && self.preflight() < 0 {
            return self.outcome(started_at);
        }

        self.set_state(PipelineState::Executing);
        info!(pipeline = %self.name, stages = self.slots.len(), "Pipeline started");

        let bus = self.bus.clone();
        let origin = self.pipeline_origin();
        let total = self.slots.len();
        let mut final_state = PipelineState::Completed;

        for index in 0..total {
            let slot = &mut self.slots[index];
            if !slot.enabled {
                slot.status = StageStatus::Skipped;
                continue;
            }
            if self.cancel.is_cancelled() {
                final_state = PipelineState::Cancelled;
                break;
            }

            let percent = i32::try_from(index * 100 / total).unwrap_or(100);
            let step = format!("[{}/{total}] {}", index + 1, slot.label);
            bus.publish(&Message::progress(origin.clone(), percent, step.clone()));
            bus.publish(&Message::status(origin.clone(), step));

            run_stage(slot, index, &bus, &self.cancel, Phase::Execute);

            if slot.error_code < 0 {
                self.error_code = slot.error_code;
                bus.publish(&Message::error(
                    origin.clone(),
                    slot.error_code,
                    format!(
                        "[{}/{total}] {} caused an error during execution.",
                        index + 1,
                        slot.label
                    ),
                ));
                final_state = PipelineState::Failed;
                break;
            }
            if self.cancel.is_cancelled() {
                slot.status = StageStatus::Cancelled;
                final_state = PipelineState::Cancelled;
                break;
            }
        }

        match final_state {
            PipelineState::Cancelled => {
                for slot in self.slots.iter_mut().filter(|s| s.status == StageStatus::Pending) {
                    slot.status = StageStatus::Cancelled;
                }
                bus.publish(&Message::status(origin, PIPELINE_CANCELED));
                info!(pipeline = %self.name, "Pipeline cancelled");
            }
            PipelineState::Failed => {
                warn!(pipeline = %self.name, code = self.error_code, "Pipeline failed");
            }
            _ => {
                bus.publish(&Message::progress(origin.clone(), 100, PIPELINE_COMPLETE));
                bus.publish(&Message::status(origin, PIPELINE_COMPLETE));
                info!(pipeline = %self.name, "Pipeline complete");
            }
        }

        self.set_state(final_state);
        self.outcome(started_at)
    }

    fn outcome(&self, started_at: DateTime<Utc>) -> ExecutionOutcome {
        self.outcome_with(self.state(), self.error_code, started_at)
    }

    fn outcome_with(&self, state: PipelineState, error_code: i32, started_at: DateTime<Utc>) -> ExecutionOutcome {
        ExecutionOutcome {
            state,
            error_code,
            stages: self.reports(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Runs one phase of one stage and records its codes on the slot.
fn run_stage(slot: &mut StageSlot, index: usize, bus: &MessageBus, cancel: &CancellationToken, phase: Phase) {
    let origin = StageOrigin::new(slot.stage.class_name(), slot.label.clone(), index);
    let mut ctx = StageContext::new(bus, cancel, origin);

    slot.status = StageStatus::Running;
    let started = Instant::now();
    let result: StageResult = match phase {
        Phase::Validate => slot.stage.validate(&mut ctx),
        Phase::Execute => slot.stage.execute(&mut ctx),
    };
    slot.duration_ms += started.elapsed().as_secs_f64() * 1000.0;

    if let Err(err) = result {
        if ctx.error_code() != err.code {
            ctx.error(err.code, err.message);
        }
    }

    slot.error_code = ctx.error_code();
    if slot.warning_code == 0 {
        slot.warning_code = ctx.warning_code();
    }
    slot.status = if slot.error_code < 0 {
        StageStatus::Failed
    } else {
        StageStatus::Ok
    };
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stage_count", &self.slots.len())
            .field("state", &self.state())
            .field("error_code", &self.error_code)
            .finish()
    }
}
