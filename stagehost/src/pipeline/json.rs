//! Pipeline JSON reading and writing.
//!
//! ```json
//! {
//!   "PipelineBuilder": {"Name": "Demo", "Number_Filters": 1, "Version": 6},
//!   "0": {"Filter_Name": "WriteTextFile", "Filter_Human_Label": "Write", "OutputFile": "out.txt"}
//! }
//! ```

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::Pipeline;
use crate::errors::PipelineBuildError;
use crate::messages::{Message, MessageBus, MessageOrigin};
use crate::registry::StageRegistry;
use crate::stages::builtin::{EmptyStage, UNKNOWN_STAGE_CODE};
use crate::stages::Stage;

/// Key of the pipeline header object.
pub const PIPELINE_BUILDER_KEY: &str = "PipelineBuilder";
/// Header field holding the pipeline name.
pub const PIPELINE_NAME_KEY: &str = "Name";
/// Header field holding the stage count.
pub const NUMBER_FILTERS_KEY: &str = "Number_Filters";
/// Header field holding the format version.
pub const VERSION_KEY: &str = "Version";
/// Stage field holding the class name.
pub const FILTER_NAME_KEY: &str = "Filter_Name";
/// Stage field holding the class uuid.
pub const FILTER_UUID_KEY: &str = "Filter_Uuid";
/// Stage field holding the enabled flag.
pub const FILTER_ENABLED_KEY: &str = "Filter_Enabled";
/// Stage field holding the display label.
pub const FILTER_HUMAN_LABEL_KEY: &str = "Filter_Human_Label";

/// Format version written by [`to_json`].
pub const PIPELINE_FORMAT_VERSION: i64 = 6;

/// What to do with a stage class the registry does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownStagePolicy {
    /// Fail the build.
    #[default]
    Reject,
    /// Insert an [`EmptyStage`] placeholder that fails preflight.
    Placeholder,
}

/// Builds pipelines from JSON using a registry.
#[derive(Debug)]
pub struct PipelineReader<'a> {
    registry: &'a StageRegistry,
    policy: UnknownStagePolicy,
    bus: Option<Arc<MessageBus>>,
}

impl<'a> PipelineReader<'a> {
    /// Creates a reader that rejects unknown stages.
    #[must_use]
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self {
            registry,
            policy: UnknownStagePolicy::Reject,
            bus: None,
        }
    }

    /// Sets the unknown-stage policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: UnknownStagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds pipelines on `bus`; placeholder notices are published there.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Parses text and builds a pipeline.
    pub fn read_str(&self, text: &str) -> Result<Pipeline, PipelineBuildError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| PipelineBuildError::Parse(e.to_string()))?;
        self.read(&value)
    }

    /// Builds a pipeline from a parsed description.
    pub fn read(&self, value: &Value) -> Result<Pipeline, PipelineBuildError> {
        let root = value.as_object().ok_or(PipelineBuildError::NotAnObject)?;

        let (name, count) = match root.get(PIPELINE_BUILDER_KEY) {
            None => (None, None),
            Some(header) => {
                let header = header
                    .as_object()
                    .ok_or_else(|| PipelineBuildError::InvalidHeader("expected an object".into()))?;
                let count = header
                    .get(NUMBER_FILTERS_KEY)
                    .and_then(Value::as_u64)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        PipelineBuildError::InvalidHeader(format!("{NUMBER_FILTERS_KEY} must be a non-negative number"))
                    })?;
                let name = header.get(PIPELINE_NAME_KEY).and_then(Value::as_str).map(str::to_string);
                (name, Some(count))
            }
        };

        let mut pipeline = match name {
            Some(name) => Pipeline::new(name),
            None => Pipeline::default(),
        };
        if let Some(bus) = &self.bus {
            pipeline = pipeline.with_bus(bus.clone());
        }

        let mut index = 0;
        loop {
            if count.is_some_and(|n| index >= n) {
                break;
            }
            let entry = match root.get(&index.to_string()) {
                Some(Value::Object(entry)) => entry,
                Some(_) => return Err(PipelineBuildError::MissingStage { index }),
                None if count.is_some() => return Err(PipelineBuildError::MissingStage { index }),
                None => break,
            };
            self.read_stage(&mut pipeline, index, entry)?;
            index += 1;
        }

        Ok(pipeline)
    }

    fn read_stage(
        &self,
        pipeline: &mut Pipeline,
        index: usize,
        entry: &Map<String, Value>,
    ) -> Result<(), PipelineBuildError> {
        let class_name = entry.get(FILTER_NAME_KEY).and_then(Value::as_str);
        let by_uuid = entry
            .get(FILTER_UUID_KEY)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .filter(|u| !u.is_nil())
            .and_then(|u| self.registry.lookup_by_uuid(u));
        let factory = by_uuid.or_else(|| class_name.and_then(|n| self.registry.lookup_by_name(n)));

        let mut placeholder = false;
        let mut stage: Box<dyn Stage> = match factory {
            Some(factory) => factory.create().map_err(|e| PipelineBuildError::UnknownStage {
                index,
                class_name: format!("{} ({e})", factory.descriptor().class_name),
            })?,
            None => {
                let class_name = class_name.ok_or(PipelineBuildError::MissingClassName { index })?;
                if self.policy == UnknownStagePolicy::Reject {
                    return Err(PipelineBuildError::UnknownStage {
                        index,
                        class_name: class_name.to_string(),
                    });
                }
                warn!(index, class_name, "Inserting placeholder for unknown stage");
                pipeline.bus().publish(&Message::error(
                    MessageOrigin::Pipeline {
                        name: pipeline.name().to_string(),
                    },
                    UNKNOWN_STAGE_CODE,
                    format!(
                        "Stage {index} could not be created: '{class_name}' is not registered. \
                         A blank stage has been inserted in its place."
                    ),
                ));
                placeholder = true;
                Box::new(EmptyStage::placeholder(class_name))
            }
        };

        let settable: Vec<String> = stage
            .parameters()
            .iter()
            .filter(|p| !p.read_only)
            .map(|p| p.property_name.clone())
            .collect();
        for property in settable {
            if let Some(value) = entry.get(&property) {
                stage
                    .set_parameter(&property, value.clone())
                    .map_err(|source| PipelineBuildError::Parameter {
                        index,
                        class_name: stage.class_name().to_string(),
                        source,
                    })?;
            }
        }

        let enabled = entry.get(FILTER_ENABLED_KEY).and_then(Value::as_bool).unwrap_or(true);
        let label = entry.get(FILTER_HUMAN_LABEL_KEY).and_then(Value::as_str).map(str::to_string);

        let position = pipeline.len();
        let engine_error = |source| PipelineBuildError::Engine { index, source };
        pipeline.push_back(stage).map_err(engine_error)?;
        pipeline.set_enabled(position, enabled).map_err(engine_error)?;
        if let Some(label) = label.filter(|l| !l.is_empty() && !placeholder) {
            pipeline.set_label(position, label).map_err(engine_error)?;
        }
        Ok(())
    }
}

/// Writes `pipeline` in the format [`PipelineReader`] reads.
#[must_use]
pub fn to_json(pipeline: &Pipeline) -> Value {
    let mut root = Map::new();
    root.insert(
        PIPELINE_BUILDER_KEY.to_string(),
        json!({
            PIPELINE_NAME_KEY: pipeline.name(),
            NUMBER_FILTERS_KEY: pipeline.len(),
            VERSION_KEY: PIPELINE_FORMAT_VERSION,
        }),
    );

    for (index, stage) in pipeline.stages().enumerate() {
        let mut entry = Map::new();
        entry.insert(FILTER_NAME_KEY.to_string(), json!(stage.class_name()));
        entry.insert(FILTER_UUID_KEY.to_string(), json!(stage.uuid().braced().to_string()));
        entry.insert(
            FILTER_ENABLED_KEY.to_string(),
            json!(pipeline.is_enabled(index).unwrap_or(true)),
        );
        entry.insert(
            FILTER_HUMAN_LABEL_KEY.to_string(),
            json!(pipeline.label(index).unwrap_or_default()),
        );
        entry.extend(stage.parameter_set().to_json_map());
        root.insert(index.to_string(), Value::Object(entry));
    }

    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineBuildError;
    use crate::messages::MessageCollector;
    use crate::plugins::ModuleLoader;
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<StageRegistry> {
        let registry = Arc::new(StageRegistry::new());
        ModuleLoader::new(registry.clone()).register_builtin().unwrap();
        registry
    }

    #[test]
    fn test_read_with_header() {
        let registry = registry();
        let pipeline = PipelineReader::new(&registry)
            .read(&json!({
                "PipelineBuilder": {"Name": "Demo", "Number_Filters": 2, "Version": 6},
                "0": {"Filter_Name": "Delay", "Milliseconds": 5},
                "1": {"Filter_Name": "EmptyStage", "Filter_Enabled": false, "Filter_Human_Label": "Nothing"},
                "2": {"Filter_Name": "Ignored"}
            }))
            .unwrap();

        assert_eq!(pipeline.name(), "Demo");
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stage(0).unwrap().parameter("Milliseconds"), Some(json!(5)));
        assert_eq!(pipeline.is_enabled(1), Some(false));
        assert_eq!(pipeline.label(1), Some("Nothing"));
    }

    #[test]
    fn test_read_without_header_stops_at_gap() {
        let registry = registry();
        let pipeline = PipelineReader::new(&registry)
            .read(&json!({
                "0": {"Filter_Name": "Delay"},
                "1": {"Filter_Name": "Delay"},
                "3": {"Filter_Name": "Delay"}
            }))
            .unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_uuid_preferred_over_name() {
        let registry = registry();
        let delay = registry.lookup_by_name("Delay").unwrap().descriptor().uuid;
        let pipeline = PipelineReader::new(&registry)
            .read(&json!({"0": {"Filter_Name": "Renamed", "Filter_Uuid": delay.braced().to_string()}}))
            .unwrap();
        assert_eq!(pipeline.stage(0).unwrap().class_name(), "Delay");
    }

    #[test]
    fn test_header_errors() {
        let registry = registry();
        let reader = PipelineReader::new(&registry);
        assert!(matches!(reader.read(&json!([])), Err(PipelineBuildError::NotAnObject)));
        assert!(matches!(
            reader.read(&json!({"PipelineBuilder": {"Number_Filters": "two"}})),
            Err(PipelineBuildError::InvalidHeader(_))
        ));
        assert!(matches!(
            reader.read(&json!({"PipelineBuilder": {"Number_Filters": 2}, "0": {"Filter_Name": "Delay"}})),
            Err(PipelineBuildError::MissingStage { index: 1 })
        ));
        assert!(matches!(
            reader.read(&json!({"0": {"Milliseconds": 1}})),
            Err(PipelineBuildError::MissingClassName { index: 0 })
        ));
        assert!(matches!(
            reader.read(&json!({"0": {"Filter_Name": "Delay", "Milliseconds": "soon"}})),
            Err(PipelineBuildError::Parameter { index: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_stage_policies() {
        let registry = registry();
        let description = json!({"0": {"Filter_Name": "Vanished"}});

        let strict = PipelineReader::new(&registry).read(&description);
        assert!(matches!(strict, Err(PipelineBuildError::UnknownStage { .. })));

        let bus = Arc::new(MessageBus::new());
        let collector = Arc::new(MessageCollector::new());
        bus.subscribe(collector.clone());
        let mut pipeline = PipelineReader::new(&registry)
            .with_policy(UnknownStagePolicy::Placeholder)
            .with_bus(bus)
            .read(&description)
            .unwrap();

        assert_eq!(pipeline.label(0), Some("UNKNOWN STAGE: Vanished"));
        assert_eq!(collector.errors()[0].code(), Some(UNKNOWN_STAGE_CODE));
        assert_eq!(pipeline.preflight(), UNKNOWN_STAGE_CODE);
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let original = PipelineReader::new(&registry)
            .read(&json!({
                "PipelineBuilder": {"Name": "Round", "Number_Filters": 3},
                "0": {"Filter_Name": "WriteTextFile", "OutputFile": "a.txt", "Text": "hi", "Append": true},
                "1": {"Filter_Name": "Delay", "Filter_Enabled": false, "Milliseconds": 0},
                "2": {"Filter_Name": "CopyFile", "InputFile": "a.txt", "OutputFile": "b.txt"}
            }))
            .unwrap();

        let written = to_json(&original);
        let copy = PipelineReader::new(&registry).read(&written).unwrap();

        assert_eq!(copy.name(), "Round");
        assert_eq!(to_json(&copy), written);
        let names: Vec<_> = copy.stages().map(|s| s.class_name().to_string()).collect();
        assert_eq!(names, vec!["WriteTextFile", "Delay", "CopyFile"]);
        assert_eq!(copy.is_enabled(1), Some(false));
        assert_eq!(copy.stage(0).unwrap().parameter("Append"), Some(json!(true)));
    }
}
