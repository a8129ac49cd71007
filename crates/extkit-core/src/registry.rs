//! Extension catalogue populated by the host before the manager starts.
//!
//! The host's composition root creates an [`ExtensionRegistry`], registers
//! every extension factory into a group, then moves the registry into
//! [`ExtensionManager::new`](crate::manager::ExtensionManager::new). Once
//! moved it can no longer be mutated.
//!
//! Duplicate names are accepted here; the registry cannot know which group
//! will win, so duplicates surface as a configuration error when the manager
//! resolves dependencies.

use crate::extension::Extension;

/// Well-known group names.
pub mod groups {
    pub const CORE: &str = "core";
    pub const BUSINESS: &str = "business";
    pub const PLUGIN: &str = "plugin";
}

/// Builds a fresh extension instance.
pub type ExtensionFactory = Box<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// A factory and the group it was registered into.
pub struct RegisteredExtension {
    pub group: String,
    pub factory: ExtensionFactory,
}

impl std::fmt::Debug for RegisteredExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredExtension")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Catalogue of extension factories, grouped by category.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    entries: Vec<RegisteredExtension>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension factory to `group`.
    pub fn register_to_group<F>(&mut self, group: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let group = group.into();
        tracing::debug!(group = %group, position = self.entries.len(), "Extension factory registered");
        self.entries.push(RegisteredExtension {
            group,
            factory: Box::new(factory),
        });
        self
    }

    /// Group names in first-registration order.
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !groups.contains(&entry.group.as_str()) {
                groups.push(&entry.group);
            }
        }
        groups
    }

    /// Number of factories registered into `group`.
    pub fn count_in_group(&self, group: &str) -> usize {
        self.entries.iter().filter(|e| e.group == group).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate every registered extension in registration order.
    pub(crate) fn instantiate(self) -> Vec<(String, Box<dyn Extension>)> {
        self.entries
            .into_iter()
            .map(|entry| {
                let extension = (entry.factory)();
                (entry.group, extension)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubExtension;

    #[test]
    fn test_registry_groups_keep_order() {
        let mut registry = ExtensionRegistry::new();
        registry
            .register_to_group(groups::BUSINESS, || Box::new(StubExtension::new("task", &[])))
            .register_to_group(groups::CORE, || Box::new(StubExtension::new("user", &[])))
            .register_to_group(groups::BUSINESS, || Box::new(StubExtension::new("comment", &[])));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.groups(), vec!["business", "core"]);
        assert_eq!(registry.count_in_group(groups::BUSINESS), 2);
        assert_eq!(registry.count_in_group(groups::PLUGIN), 0);
    }

    #[test]
    fn test_registry_accepts_duplicates() {
        let mut registry = ExtensionRegistry::new();
        registry
            .register_to_group(groups::CORE, || Box::new(StubExtension::new("user", &[])))
            .register_to_group(groups::CORE, || Box::new(StubExtension::new("user", &[])));

        let instances = registry.instantiate();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|(_, ext)| ext.name() == "user"));
    }
}
