//! Stage descriptors and factories.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Stage, StageError};

/// Serializable identity and provenance of a stage class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique class name.
    #[serde(rename = "ClassName")]
    pub class_name: String,
    /// Unique, version-independent identity.
    #[serde(rename = "Uuid")]
    pub uuid: Uuid,
    /// Label shown to users.
    #[serde(rename = "Name")]
    pub human_label: String,
    /// Top-level group.
    #[serde(rename = "GroupName")]
    pub group: String,
    /// Group within `group`.
    #[serde(rename = "SubGroupName")]
    pub subgroup: String,
    /// Stage version.
    #[serde(rename = "Version")]
    pub version: String,
    /// Name of the module that supplied the stage.
    #[serde(rename = "PluginName")]
    pub module: String,
}

impl StageDescriptor {
    /// Creates a descriptor in the `Misc` group.
    #[must_use]
    pub fn new(class_name: impl Into<String>, uuid: Uuid, human_label: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            uuid,
            human_label: human_label.into(),
            group: "Misc".to_string(),
            subgroup: "Misc".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            module: String::new(),
        }
    }

    /// Sets group and subgroup.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>, subgroup: impl Into<String>) -> Self {
        self.group = group.into();
        self.subgroup = subgroup.into();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the owning module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }
}

/// Creates stage instances of one class.
///
/// Native modules, scripts and built-in stages all sit behind this trait, so
/// the registry and engine never distinguish them.
pub trait StageFactory: Send + Sync {
    /// Identity of the class this factory creates.
    fn descriptor(&self) -> &StageDescriptor;

    /// Creates a fresh instance with default parameter values.
    fn create(&self) -> Result<Box<dyn Stage>, StageError>;
}

impl fmt::Debug for dyn StageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageFactory")
            .field("class_name", &self.descriptor().class_name)
            .field("uuid", &self.descriptor().uuid)
            .finish()
    }
}

/// Factory type for closures that build a stage.
pub type StageConstructor = Box<dyn Fn(&StageDescriptor) -> Box<dyn Stage> + Send + Sync>;

/// A factory backed by a closure.
pub struct FnStageFactory {
    descriptor: StageDescriptor,
    constructor: StageConstructor,
}

impl FnStageFactory {
    /// Creates a factory from a descriptor and a constructor closure.
    pub fn new<F>(descriptor: StageDescriptor, constructor: F) -> Self
    where
        F: Fn(&StageDescriptor) -> Box<dyn Stage> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            constructor: Box::new(constructor),
        }
    }
}

impl StageFactory for FnStageFactory {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn create(&self) -> Result<Box<dyn Stage>, StageError> {
        Ok((self.constructor)(&self.descriptor))
    }
}

impl fmt::Debug for FnStageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStageFactory")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::FnStage;

    #[test]
    fn test_descriptor_builder() {
        let uuid = Uuid::new_v4();
        let descriptor = StageDescriptor::new("Threshold", uuid, "Threshold Values")
            .with_group("Processing", "Cleanup")
            .with_version("2.1.0")
            .with_module("Imaging");

        assert_eq!(descriptor.class_name, "Threshold");
        assert_eq!(descriptor.group, "Processing");
        assert_eq!(descriptor.subgroup, "Cleanup");
        assert_eq!(descriptor.module, "Imaging");
    }

    #[test]
    fn test_descriptor_serializes_with_wire_names() {
        let descriptor = StageDescriptor::new("A", Uuid::nil(), "Label").with_module("Core");
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["ClassName"], "A");
        assert_eq!(value["Name"], "Label");
        assert_eq!(value["PluginName"], "Core");
        assert_eq!(value["GroupName"], "Misc");
    }

    #[test]
    fn test_fn_factory_creates_fresh_instances() {
        let descriptor = StageDescriptor::new("Noop", Uuid::new_v4(), "No-op");
        let factory = FnStageFactory::new(descriptor, |d| Box::new(FnStage::noop(d.clone())));

        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert_eq!(a.class_name(), "Noop");
        assert_eq!(b.uuid(), factory.descriptor().uuid);
    }
}
