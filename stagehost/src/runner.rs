//! Headless pipeline runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::messages::MessageBus;
use crate::pipeline::{PipelineReader, UnknownStagePolicy};
use crate::plugins::{search_paths, LoadReport, ModuleLoader};
use crate::registry::StageRegistry;

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The pipeline completed.
    Success,
    /// The pipeline file does not exist.
    MissingInput,
    /// The pipeline file is not `.json`.
    UnsupportedExtension,
    /// The file could not be read or built into a pipeline.
    BuildFailed,
    /// Preflight reported an error.
    PreflightFailed,
    /// A stage failed or the run was cancelled.
    ExecutionFailed,
}

impl RunStatus {
    /// Exit code for the process.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::MissingInput => 1,
            Self::UnsupportedExtension => 2,
            Self::BuildFailed => 3,
            Self::PreflightFailed => 4,
            Self::ExecutionFailed => 5,
        }
    }
}

/// Result of [`Runner::run_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit status.
    pub status: RunStatus,
    /// Human-readable summary.
    pub message: String,
}

impl RunOutcome {
    fn new(status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Creates a loader with the core stages and every module on the search path.
pub fn bootstrap_loader(app_dir: &Path, plugins: &PluginConfig) -> Result<(Arc<ModuleLoader>, LoadReport), PluginError> {
    let loader = Arc::new(ModuleLoader::new(Arc::new(StageRegistry::new())));
    loader.register_builtin()?;
    let paths = search_paths(app_dir, &plugins.paths);
    let report = loader.load_from_paths(&paths);
    for (path, error) in &report.errors {
        warn!(path = %path.display(), "Module not loaded: {error}");
    }
    info!(
        modules = report.modules_loaded,
        stages = report.stages_loaded,
        "Modules loaded"
    );
    Ok((loader, report))
}

/// Directory of the running executable, or the working directory.
#[must_use]
pub fn application_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Runs pipeline files against a registry.
///
/// Unknown stage classes become placeholders, so a pipeline naming a missing
/// plugin fails preflight with a message instead of failing to build.
#[derive(Debug, Clone)]
pub struct Runner {
    registry: Arc<StageRegistry>,
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub const fn new(registry: Arc<StageRegistry>) -> Self {
        Self { registry }
    }

    /// Reads, preflights and executes the pipeline in `path`.
    pub fn run_file(&self, path: &Path, bus: Arc<MessageBus>) -> RunOutcome {
        if !path.is_file() {
            return RunOutcome::new(
                RunStatus::MissingInput,
                format!("Pipeline file '{}' does not exist", path.display()),
            );
        }
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            return RunOutcome::new(
                RunStatus::UnsupportedExtension,
                format!("Unsupported pipeline file '{}': only .json is accepted", path.display()),
            );
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                return RunOutcome::new(
                    RunStatus::BuildFailed,
                    format!("Failed to read '{}': {e}", path.display()),
                )
            }
        };
        let reader = PipelineReader::new(&self.registry)
            .with_policy(UnknownStagePolicy::Placeholder)
            .with_bus(bus);
        let mut pipeline = match reader.read_str(&text) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                return RunOutcome::new(
                    RunStatus::BuildFailed,
                    format!("Failed to build pipeline from '{}': {e}", path.display()),
                )
            }
        };

        let code = pipeline.preflight();
        if code < 0 {
            return RunOutcome::new(
                RunStatus::PreflightFailed,
                format!("Preflight of '{}' failed with code {code}", pipeline.name()),
            );
        }

        let outcome = pipeline.execute();
        if outcome.is_completed() {
            RunOutcome::new(
                RunStatus::Success,
                format!("Pipeline '{}' completed ({} stages)", pipeline.name(), pipeline.len()),
            )
        } else {
            let detail = outcome.failed_stage().map_or_else(
                || format!("ended in state {}", outcome.state),
                |stage| format!("failed at stage {} ({}) with code {}", stage.index, stage.human_label, stage.error_code),
            );
            RunOutcome::new(
                RunStatus::ExecutionFailed,
                format!("Pipeline '{}' {detail}", pipeline.name()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageCollector;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runner() -> Runner {
        let (loader, _) = bootstrap_loader(Path::new("/nonexistent-stagehost-app"), &PluginConfig::default()).unwrap();
        Runner::new(Arc::clone(loader.registry()))
    }

    fn write(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn test_exit_codes() {
        let codes: Vec<i32> = [
            RunStatus::Success,
            RunStatus::MissingInput,
            RunStatus::UnsupportedExtension,
            RunStatus::BuildFailed,
            RunStatus::PreflightFailed,
            RunStatus::ExecutionFailed,
        ]
        .iter()
        .map(|s| s.exit_code())
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let bus = Arc::new(MessageBus::new());
        assert_eq!(
            runner.run_file(&dir.path().join("nope.json"), bus.clone()).status,
            RunStatus::MissingInput
        );
        let txt = dir.path().join("pipeline.txt");
        std::fs::write(&txt, "{}").unwrap();
        assert_eq!(runner.run_file(&txt, bus).status, RunStatus::UnsupportedExtension);
    }

    #[test]
    fn test_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let outcome = runner().run_file(&path, Arc::new(MessageBus::new()));
        assert_eq!(outcome.status, RunStatus::BuildFailed);
    }

    #[test]
    fn test_unknown_stage_fails_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "p.json",
            &json!({
                "PipelineBuilder": {"Name": "Missing", "Number_Filters": 1, "Version": 6},
                "0": {"Filter_Name": "FromAbsentPlugin"}
            }),
        );
        let bus = Arc::new(MessageBus::new());
        let collector = Arc::new(MessageCollector::new());
        bus.subscribe(collector.clone());

        let outcome = runner().run_file(&path, bus);
        assert_eq!(outcome.status, RunStatus::PreflightFailed);
        assert!(collector.has_errors());
    }

    #[test]
    fn test_execution_failure_and_success() {
        let dir = tempfile::tempdir().unwrap();
        let failing = write(
            dir.path(),
            "fail.json",
            &json!({
                "PipelineBuilder": {"Name": "Fail", "Number_Filters": 1, "Version": 6},
                "0": {"Filter_Name": "ErrorWarningStage", "ExecuteError": true}
            }),
        );
        let outcome = runner().run_file(&failing, Arc::new(MessageBus::new()));
        assert_eq!(outcome.status, RunStatus::ExecutionFailed);
        assert!(outcome.message.contains("-666001"));

        let out = dir.path().join("out.txt");
        let ok = write(
            dir.path(),
            "ok.JSON",
            &json!({
                "PipelineBuilder": {"Name": "Ok", "Number_Filters": 1, "Version": 6},
                "0": {"Filter_Name": "WriteTextFile", "OutputFile": out.to_string_lossy(), "Text": "done"}
            }),
        );
        let outcome = runner().run_file(&ok, Arc::new(MessageBus::new()));
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "done");
    }
}
