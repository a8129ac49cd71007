//! Extension contract.
//!
//! An extension is an independently built unit the [`ExtensionManager`]
//! orchestrates. The manager only ever sees this trait, never a concrete type.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive ──pre_init/init──▶ Initializing ──post_init──▶ Active
//!                  │                              │
//!                  └──────────── error ───────────┴──▶ Error
//!
//! Active ◀──▶ Disabled | Maintenance   (administrative overrides)
//! ```
//!
//! Required methods cover identity, the three lifecycle hooks, routes and
//! the handler/service handles. Everything else has a no-op default so an
//! extension only overrides what it uses.
//!
//! [`ExtensionManager`]: crate::manager::ExtensionManager

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::manager::ManagerInterface;

/// Opaque, shareable handle to a handler set or a service object.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Type alias for a shared extension instance
pub type DynExtension = Arc<tokio::sync::RwLock<Box<dyn Extension>>>;

// ============================================================================
// Metadata
// ============================================================================

/// Extension category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionType {
    Core,
    Business,
    #[default]
    Plugin,
    Module,
}

impl std::fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Business => write!(f, "business"),
            Self::Plugin => write!(f, "plugin"),
            Self::Module => write!(f, "module"),
        }
    }
}

/// Extension metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    /// Unique extension name
    pub name: String,
    /// Extension version
    pub version: semver::Version,
    /// Names of extensions that must initialize first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub extension_type: ExtensionType,
    /// Route group the extension mounts under
    #[serde(default)]
    pub group: String,
}

impl ExtensionMetadata {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            dependencies: Vec::new(),
            description: String::new(),
            extension_type: ExtensionType::default(),
            group: String::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_type(mut self, extension_type: ExtensionType) -> Self {
        self.extension_type = extension_type;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

// ============================================================================
// Status
// ============================================================================

/// Extension status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    #[default]
    Inactive,
    Initializing,
    Active,
    Error,
    Disabled,
    Maintenance,
}

impl ExtensionStatus {
    /// Whether the extension serves requests in this state.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Administrative overrides that may only be applied to a running extension.
    pub fn is_override(&self) -> bool {
        matches!(self, Self::Disabled | Self::Maintenance)
    }
}

impl std::fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "Inactive"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Active => write!(f, "Active"),
            Self::Error => write!(f, "Error"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Maintenance => write!(f, "Maintenance"),
        }
    }
}

/// Registration an extension publishes for external service discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

// ============================================================================
// Extension Trait
// ============================================================================

/// The Extension trait.
#[async_trait::async_trait]
pub trait Extension: Send + Sync {
    /// Get extension metadata
    fn metadata(&self) -> &ExtensionMetadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn version(&self) -> &semver::Version {
        &self.metadata().version
    }

    fn dependencies(&self) -> &[String] {
        &self.metadata().dependencies
    }

    /// Initialize the extension.
    ///
    /// `config` is the extension's own settings table (`Null` when none is
    /// configured). Services published here are visible to every
    /// extension's `post_init`.
    async fn init(&mut self, config: &serde_json::Value, manager: Arc<dyn ManagerInterface>)
        -> Result<()>;

    /// Called once every extension in the batch has finished `init`.
    async fn post_init(&mut self) -> Result<()>;

    /// Release resources. Runs in reverse initialization order.
    async fn cleanup(&mut self) -> Result<()>;

    /// Mount the extension's routes onto `router`.
    fn register_routes(&self, router: axum::Router) -> axum::Router;

    /// Handler set exposed to the host, if any.
    fn handlers(&self) -> Option<ServiceHandle>;

    /// Service object exposed to the host, if any.
    fn services(&self) -> Option<ServiceHandle>;

    /// Optional: runs right before `init`
    async fn pre_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Optional: runs right before `cleanup`
    async fn pre_cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Optional: whether [`Extension::service_info`] should be published
    fn need_service_discovery(&self) -> bool {
        false
    }

    /// Optional: service discovery registration
    fn service_info(&self) -> Option<ServiceInfo> {
        None
    }

    /// Optional: self-reported status, consulted while the manager considers
    /// the extension active
    fn status(&self) -> ExtensionStatus {
        ExtensionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = ExtensionMetadata::new("task", semver::Version::new(1, 2, 0))
            .with_dependencies(["user", "space"])
            .with_description("Task tracking")
            .with_type(ExtensionType::Business)
            .with_group("biz");

        assert_eq!(meta.name, "task");
        assert_eq!(meta.dependencies, vec!["user", "space"]);
        assert_eq!(meta.extension_type, ExtensionType::Business);
        assert_eq!(meta.group, "biz");
    }

    #[test]
    fn test_metadata_json_shape() {
        let meta = ExtensionMetadata::new("user", semver::Version::new(0, 3, 1))
            .with_description("Accounts")
            .with_type(ExtensionType::Core)
            .with_group("sys");

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "user",
                "version": "0.3.1",
                "dependencies": [],
                "description": "Accounts",
                "type": "core",
                "group": "sys",
            })
        );
    }

    #[test]
    fn test_metadata_deserialize_defaults() {
        let meta: ExtensionMetadata =
            serde_json::from_str(r#"{"name":"comment","version":"1.0.0"}"#).unwrap();
        assert!(meta.dependencies.is_empty());
        assert_eq!(meta.extension_type, ExtensionType::Plugin);
        assert_eq!(meta.group, "");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ExtensionStatus::Active.to_string(), "Active");
        assert_eq!(ExtensionStatus::Maintenance.to_string(), "Maintenance");
        assert!(ExtensionStatus::Disabled.is_override());
        assert!(!ExtensionStatus::Error.is_serving());
    }
}
