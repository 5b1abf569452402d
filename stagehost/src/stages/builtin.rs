//! Stages bundled with the host.
//!
//! They are registered as the `Core` module and are what the service offers
//! when no plugins are installed.

use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{
    FnStageFactory, Parameter, ParameterKind, ParameterSet, Stage, StageContext, StageDescriptor,
    StageError, StageFactory, StageResult,
};

/// Module name of the bundled stages.
pub const CORE_MODULE: &str = "Core";

/// Code reported by placeholders for stages that are not registered.
pub const UNKNOWN_STAGE_CODE: i32 = -66066;

const EMPTY_STAGE_UUID: Uuid = Uuid::from_u128(0x5d6f_2b1e_8a0c_4b3e_9d2f_0e7a_61c4_aa01);
const ERROR_WARNING_UUID: Uuid = Uuid::from_u128(0x5d6f_2b1e_8a0c_4b3e_9d2f_0e7a_61c4_aa02);
const WRITE_TEXT_UUID: Uuid = Uuid::from_u128(0x5d6f_2b1e_8a0c_4b3e_9d2f_0e7a_61c4_aa03);
const COPY_FILE_UUID: Uuid = Uuid::from_u128(0x5d6f_2b1e_8a0c_4b3e_9d2f_0e7a_61c4_aa04);
const DELAY_UUID: Uuid = Uuid::from_u128(0x5d6f_2b1e_8a0c_4b3e_9d2f_0e7a_61c4_aa05);

fn core_descriptor(class_name: &str, uuid: Uuid, label: &str, subgroup: &str) -> StageDescriptor {
    StageDescriptor::new(class_name, uuid, label)
        .with_group(CORE_MODULE, subgroup)
        .with_module(CORE_MODULE)
}

/// Factories for every bundled stage.
#[must_use]
pub fn core_factories() -> Vec<Arc<dyn StageFactory>> {
    vec![
        Arc::new(FnStageFactory::new(EmptyStage::descriptor(), |_| {
            Box::new(EmptyStage::new())
        })),
        Arc::new(FnStageFactory::new(ErrorWarningStage::descriptor(), |_| {
            Box::new(ErrorWarningStage::new())
        })),
        Arc::new(FnStageFactory::new(WriteTextFile::descriptor(), |_| {
            Box::new(WriteTextFile::new())
        })),
        Arc::new(FnStageFactory::new(CopyFile::descriptor(), |_| {
            Box::new(CopyFile::new())
        })),
        Arc::new(FnStageFactory::new(Delay::descriptor(), |_| Box::new(Delay::new()))),
    ]
}

/// A stage that does nothing and always fails validation.
///
/// The pipeline reader inserts one in place of a stage class it cannot find,
/// so the rest of the pipeline keeps its indices.
#[derive(Debug, Clone)]
pub struct EmptyStage {
    descriptor: StageDescriptor,
    params: ParameterSet,
    missing_class: Option<String>,
}

impl EmptyStage {
    /// Class descriptor.
    #[must_use]
    pub fn descriptor() -> StageDescriptor {
        core_descriptor("EmptyStage", EMPTY_STAGE_UUID, "Empty Stage", "Misc")
    }

    /// Creates an empty stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::descriptor(),
            params: ParameterSet::default(),
            missing_class: None,
        }
    }

    /// Creates a placeholder for an unregistered class.
    #[must_use]
    pub fn placeholder(missing_class: impl Into<String>) -> Self {
        let missing_class = missing_class.into();
        let mut descriptor = Self::descriptor();
        descriptor.human_label = format!("UNKNOWN STAGE: {missing_class}");
        Self {
            descriptor,
            params: ParameterSet::default(),
            missing_class: Some(missing_class),
        }
    }

    /// The class this placeholder stands in for.
    #[must_use]
    pub fn missing_class(&self) -> Option<&str> {
        self.missing_class.as_deref()
    }

    fn failure(&self) -> StageError {
        match &self.missing_class {
            Some(class) => StageError::new(
                UNKNOWN_STAGE_CODE,
                format!("The stage '{class}' is not registered with this host"),
            ),
            None => StageError::new(-9999, "This stage is a placeholder and does nothing"),
        }
    }
}

impl Default for EmptyStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for EmptyStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        Err(self.failure())
    }

    fn execute(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        Err(self.failure())
    }
}

/// Raises errors and warnings on demand. Used to exercise error paths.
#[derive(Debug, Clone)]
pub struct ErrorWarningStage {
    descriptor: StageDescriptor,
    params: ParameterSet,
}

impl ErrorWarningStage {
    /// Warning code.
    pub const WARNING_CODE: i32 = -666_000;
    /// Error code.
    pub const ERROR_CODE: i32 = -666_001;

    /// Class descriptor.
    #[must_use]
    pub fn descriptor() -> StageDescriptor {
        core_descriptor("ErrorWarningStage", ERROR_WARNING_UUID, "Error Warning", "Testing")
    }

    /// Creates the stage with every flag off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::descriptor(),
            params: ParameterSet::new(vec![
                Parameter::new("PreflightWarning", "Preflight Warning", ParameterKind::Bool),
                Parameter::new("PreflightError", "Preflight Error", ParameterKind::Bool),
                Parameter::new("ExecuteWarning", "Execute Warning", ParameterKind::Bool),
                Parameter::new("ExecuteError", "Execute Error", ParameterKind::Bool),
            ]),
        }
    }

    fn raise(&self, ctx: &mut StageContext<'_>, warning: &str, error: &str, phase: &str) -> StageResult {
        if self.params.bool(warning) {
            ctx.warning(Self::WARNING_CODE, format!("{phase} warning requested"));
        }
        if self.params.bool(error) {
            return Err(StageError::new(Self::ERROR_CODE, format!("{phase} error requested")));
        }
        Ok(())
    }
}

impl Default for ErrorWarningStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ErrorWarningStage {
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
        self.raise(ctx, "PreflightWarning", "PreflightError", "Preflight")
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        self.raise(ctx, "ExecuteWarning", "ExecuteError", "Execute")
    }
}

/// Writes a string to an output file.
#[derive(Debug, Clone)]
pub struct WriteTextFile {
    descriptor: StageDescriptor,
    params: ParameterSet,
}

impl WriteTextFile {
    /// Class descriptor.
    #[must_use]
    pub fn descriptor() -> StageDescriptor {
        core_descriptor("WriteTextFile", WRITE_TEXT_UUID, "Write Text File", "Output")
    }

    /// Creates the stage with an empty output path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::descriptor(),
            params: ParameterSet::new(vec![
                Parameter::new("OutputFile", "Output File", ParameterKind::OutputFile),
                Parameter::new("Text", "Text", ParameterKind::String),
                Parameter::new("Append", "Append", ParameterKind::Bool),
            ]),
        }
    }
}

impl Default for WriteTextFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for WriteTextFile {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        if self.params.path("OutputFile").is_none() {
            return Err(StageError::missing_parameter("OutputFile"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let path = self
            .params
            .path("OutputFile")
            .ok_or_else(|| StageError::missing_parameter("OutputFile"))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StageError::io(-11010, "Creating output directory", &e))?;
        }
        let text = self.params.str("Text");
        let result = if self.params.bool("Append") {
            use std::io::Write;
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| f.write_all(text.as_bytes()))
        } else {
            fs::write(&path, text)
        };
        result.map_err(|e| StageError::io(-11011, "Writing output file", &e))?;
        ctx.status(format!("Wrote {} bytes", text.len()));
        Ok(())
    }
}

/// Copies an input file to an output file.
#[derive(Debug, Clone)]
pub struct CopyFile {
    descriptor: StageDescriptor,
    params: ParameterSet,
}

impl CopyFile {
    /// Class descriptor.
    #[must_use]
    pub fn descriptor() -> StageDescriptor {
        core_descriptor("CopyFile", COPY_FILE_UUID, "Copy File", "Output")
    }

    /// Creates the stage with empty paths.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::descriptor(),
            params: ParameterSet::new(vec![
                Parameter::new("InputFile", "Input File", ParameterKind::InputFile),
                Parameter::new("OutputFile", "Output File", ParameterKind::OutputFile),
            ]),
        }
    }
}

impl Default for CopyFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for CopyFile {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        let input = self
            .params
            .path("InputFile")
            .ok_or_else(|| StageError::missing_parameter("InputFile"))?;
        if !input.is_file() {
            return Err(StageError::new(
                -11001,
                format!("Input file '{}' does not exist", input.display()),
            ));
        }
        if self.params.path("OutputFile").is_none() {
            return Err(StageError::missing_parameter("OutputFile"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let (Some(input), Some(output)) = (self.params.path("InputFile"), self.params.path("OutputFile")) else {
            return Err(StageError::missing_parameter("InputFile"));
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StageError::io(-11010, "Creating output directory", &e))?;
        }
        let bytes = fs::copy(&input, &output)
            .map_err(|e| StageError::io(-11012, "Copying file", &e))?;
        ctx.status(format!("Copied {bytes} bytes"));
        Ok(())
    }
}

/// Waits for a number of milliseconds, polling for cancellation.
#[derive(Debug, Clone)]
pub struct Delay {
    descriptor: StageDescriptor,
    params: ParameterSet,
}

impl Delay {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Class descriptor.
    #[must_use]
    pub fn descriptor() -> StageDescriptor {
        core_descriptor("Delay", DELAY_UUID, "Delay", "Misc")
    }

    /// Creates the stage with a 100 ms wait.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::descriptor(),
            params: ParameterSet::new(vec![
                Parameter::new("Milliseconds", "Milliseconds", ParameterKind::Integer).with_default(json!(100)),
            ]),
        }
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Delay {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        if self.params.i64("Milliseconds") < 0 {
            return Err(StageError::new(-11020, "Milliseconds must not be negative"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let total = Duration::from_millis(u64::try_from(self.params.i64("Milliseconds")).unwrap_or(0));
        let start = Instant::now();
        while start.elapsed() < total {
            if ctx.is_cancelled() {
                ctx.status("Delay interrupted");
                return Ok(());
            }
            std::thread::sleep(Self::POLL_INTERVAL.min(total.saturating_sub(start.elapsed())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::messages::{MessageBus, MessageCollector, StageOrigin};

    fn run<F>(stage: &mut dyn Stage, f: F) -> (StageResult, Arc<MessageCollector>)
    where
        F: FnOnce(&mut dyn Stage, &mut StageContext<'_>) -> StageResult,
    {
        let bus = MessageBus::new();
        let collector = Arc::new(MessageCollector::new());
        bus.subscribe(collector.clone());
        let cancel = CancellationToken::new();
        let origin = StageOrigin::new(stage.class_name().to_string(), "test", 0);
        let mut ctx = StageContext::new(&bus, &cancel, origin);
        let result = f(stage, &mut ctx);
        (result, collector)
    }

    #[test]
    fn test_core_factories_have_unique_identities() {
        let factories = core_factories();
        let mut names: Vec<_> = factories.iter().map(|f| f.descriptor().class_name.clone()).collect();
        let mut uuids: Vec<_> = factories.iter().map(|f| f.descriptor().uuid).collect();
        names.sort();
        names.dedup();
        uuids.sort();
        uuids.dedup();
        assert_eq!(names.len(), factories.len());
        assert_eq!(uuids.len(), factories.len());
        assert!(factories.iter().all(|f| f.descriptor().module == CORE_MODULE));
    }

    #[test]
    fn test_placeholder_fails_with_unknown_code() {
        let mut stage = EmptyStage::placeholder("Missing");
        assert_eq!(stage.descriptor().human_label, "UNKNOWN STAGE: Missing");
        let (result, _) = run(&mut stage, |s, ctx| s.validate(ctx));
        assert_eq!(result.unwrap_err().code, UNKNOWN_STAGE_CODE);
    }

    #[test]
    fn test_error_warning_stage() {
        let mut stage = ErrorWarningStage::new();
        let (result, collector) = run(&mut stage, |s, ctx| s.validate(ctx));
        assert!(result.is_ok());
        assert!(collector.is_empty());

        stage.set_parameter("PreflightWarning", json!(true)).unwrap();
        stage.set_parameter("PreflightError", json!(true)).unwrap();
        let (result, collector) = run(&mut stage, |s, ctx| s.validate(ctx));
        assert_eq!(result.unwrap_err().code, ErrorWarningStage::ERROR_CODE);
        assert_eq!(collector.warnings().len(), 1);

        let (result, _) = run(&mut stage, |s, ctx| s.execute(ctx));
        assert!(result.is_ok());
    }

    #[test]
    fn test_write_then_copy() {
        let dir = tempfile::tempdir().unwrap();
        let written = dir.path().join("out").join("a.txt");
        let copied = dir.path().join("b.txt");

        let mut write = WriteTextFile::new();
        let (result, _) = run(&mut write, |s, ctx| s.validate(ctx));
        assert!(result.is_err());
        write
            .set_parameter("OutputFile", json!(written.to_string_lossy()))
            .unwrap();
        write.set_parameter("Text", json!("hello")).unwrap();
        let (result, _) = run(&mut write, |s, ctx| s.execute(ctx));
        result.unwrap();

        let mut copy = CopyFile::new();
        copy.set_parameter("InputFile", json!(written.to_string_lossy()))
            .unwrap();
        copy.set_parameter("OutputFile", json!(copied.to_string_lossy()))
            .unwrap();
        let (result, _) = run(&mut copy, |s, ctx| s.validate(ctx));
        result.unwrap();
        let (result, _) = run(&mut copy, |s, ctx| s.execute(ctx));
        result.unwrap();

        assert_eq!(fs::read_to_string(copied).unwrap(), "hello");
    }

    #[test]
    fn test_copy_rejects_missing_input() {
        let mut copy = CopyFile::new();
        copy.set_parameter("InputFile", json!("/definitely/not/here.txt"))
            .unwrap();
        copy.set_parameter("OutputFile", json!("/tmp/x.txt")).unwrap();
        let (result, _) = run(&mut copy, |s, ctx| s.validate(ctx));
        assert_eq!(result.unwrap_err().code, -11001);
    }

    #[test]
    fn test_delay_stops_when_cancelled() {
        let mut delay = Delay::new();
        delay.set_parameter("Milliseconds", json!(10_000)).unwrap();

        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        cancel.cancel("test");
        let mut ctx = StageContext::new(&bus, &cancel, StageOrigin::new("Delay", "Delay", 0));

        let start = Instant::now();
        delay.execute(&mut ctx).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
