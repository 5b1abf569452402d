//! Stage registry keyed by class name and uuid.
//!
//! Both key spaces live behind one lock, so a registration is either fully
//! visible under both keys or not at all.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::RegistryError;
use crate::stages::{StageDescriptor, StageFactory};

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Arc<dyn StageFactory>>,
    by_uuid: HashMap<Uuid, String>,
}

/// Catalog of available stage factories.
#[derive(Default)]
pub struct StageRegistry {
    entries: RwLock<Entries>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name` and the factory's uuid.
    ///
    /// `name` must be non-empty and equal to the descriptor's class name; the
    /// uuid must not be nil. Fails without side effects if either key is taken.
    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn StageFactory>) -> Result<(), RegistryError> {
        let name = name.into();
        let uuid = factory.descriptor().uuid;
        if name.trim().is_empty() {
            return Err(RegistryError::invalid_identity("stage name is empty"));
        }
        if uuid.is_nil() {
            return Err(RegistryError::invalid_identity(format!("stage '{name}' has a nil uuid")));
        }
        if factory.descriptor().class_name != name {
            return Err(RegistryError::invalid_identity(format!(
                "stage '{name}' describes itself as '{}'",
                factory.descriptor().class_name
            )));
        }

        let mut entries = self.entries.write();
        if entries.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        if let Some(existing) = entries.by_uuid.get(&uuid) {
            return Err(RegistryError::DuplicateUuid {
                uuid,
                existing: existing.clone(),
            });
        }
        entries.by_uuid.insert(uuid, name.clone());
        entries.by_name.insert(name.clone(), factory);
        drop(entries);

        debug!(stage = %name, %uuid, "Registered stage");
        Ok(())
    }

    /// Registers a factory under its descriptor's class name.
    pub fn register_factory(&self, factory: Arc<dyn StageFactory>) -> Result<(), RegistryError> {
        let name = factory.descriptor().class_name.clone();
        self.register(name, factory)
    }

    /// Removes the stage with `uuid`. Returns whether it was registered.
    pub fn unregister(&self, uuid: Uuid) -> bool {
        let mut entries = self.entries.write();
        let Some(name) = entries.by_uuid.remove(&uuid) else {
            return false;
        };
        entries.by_name.remove(&name);
        drop(entries);

        debug!(stage = %name, %uuid, "Unregistered stage");
        true
    }

    /// Removes every stage supplied by `module` and returns their descriptors.
    pub fn unregister_module(&self, module: &str) -> Vec<StageDescriptor> {
        let mut entries = self.entries.write();
        let doomed: Vec<StageDescriptor> = entries
            .by_name
            .values()
            .filter(|f| f.descriptor().module == module)
            .map(|f| f.descriptor().clone())
            .collect();
        for descriptor in &doomed {
            entries.by_name.remove(&descriptor.class_name);
            entries.by_uuid.remove(&descriptor.uuid);
        }
        drop(entries);

        if !doomed.is_empty() {
            info!(module = %module, count = doomed.len(), "Unregistered module stages");
        }
        doomed
    }

    /// Looks up a factory by class name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<dyn StageFactory>> {
        self.entries.read().by_name.get(name).cloned()
    }

    /// Looks up a factory by uuid.
    #[must_use]
    pub fn lookup_by_uuid(&self, uuid: Uuid) -> Option<Arc<dyn StageFactory>> {
        let entries = self.entries.read();
        entries
            .by_uuid
            .get(&uuid)
            .and_then(|name| entries.by_name.get(name))
            .cloned()
    }

    /// Looks up a factory by its human label.
    #[must_use]
    pub fn lookup_by_human_label(&self, label: &str) -> Option<Arc<dyn StageFactory>> {
        self.entries
            .read()
            .by_name
            .values()
            .find(|f| f.descriptor().human_label == label)
            .cloned()
    }

    /// Snapshot of all factories, sorted by class name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn StageFactory>> {
        self.filtered(|_| true)
    }

    /// Snapshot of the factories in `group`.
    #[must_use]
    pub fn list_by_group(&self, group: &str) -> Vec<Arc<dyn StageFactory>> {
        self.filtered(|d| d.group == group)
    }

    /// Snapshot of the factories in `group`/`subgroup`.
    #[must_use]
    pub fn list_by_subgroup(&self, group: &str, subgroup: &str) -> Vec<Arc<dyn StageFactory>> {
        self.filtered(|d| d.group == group && d.subgroup == subgroup)
    }

    /// Sorted distinct group names.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        let entries = self.entries.read();
        let groups: BTreeSet<&str> = entries
            .by_name
            .values()
            .map(|f| f.descriptor().group.as_str())
            .collect();
        groups.into_iter().map(String::from).collect()
    }

    /// Sorted distinct subgroup names within `group`.
    #[must_use]
    pub fn subgroup_names(&self, group: &str) -> Vec<String> {
        let entries = self.entries.read();
        let subgroups: BTreeSet<&str> = entries
            .by_name
            .values()
            .map(|f| f.descriptor())
            .filter(|d| d.group == group)
            .map(|d| d.subgroup.as_str())
            .collect();
        subgroups.into_iter().map(String::from).collect()
    }

    /// Serializable summary of every registered stage, sorted by class name.
    #[must_use]
    pub fn to_descriptor_array(&self) -> Vec<StageDescriptor> {
        self.list().iter().map(|f| f.descriptor().clone()).collect()
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().by_name.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().by_name.is_empty()
    }

    fn filtered<P>(&self, predicate: P) -> Vec<Arc<dyn StageFactory>>
    where
        P: Fn(&StageDescriptor) -> bool,
    {
        let mut factories: Vec<Arc<dyn StageFactory>> = self
            .entries
            .read()
            .by_name
            .values()
            .filter(|f| predicate(f.descriptor()))
            .cloned()
            .collect();
        factories.sort_by(|a, b| a.descriptor().class_name.cmp(&b.descriptor().class_name));
        factories
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("StageRegistry")
            .field("stage_count", &entries.by_name.len())
            .field("uuid_count", &entries.by_uuid.len())
            .finish()
    }
}
