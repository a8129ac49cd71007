//! In-process extension runtime.
//!
//! Hosts register extensions into an [`ExtensionRegistry`], hand it to an
//! [`ExtensionManager`] and let the manager resolve dependencies, run the
//! two-phase startup, share services between extensions and tear everything
//! down in reverse order. Plugins loaded after startup pass through the
//! [`Sandbox`] and the [`ResourceMonitor`] first.

pub mod config;
pub mod error;
pub mod extension;
pub mod loader;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::{ManagerConfig, PerformanceConfig, SecurityConfig};
pub use error::{ErrorCategory, ExtensionError, LifecyclePhase, Result};
pub use extension::{
    DynExtension, Extension, ExtensionMetadata, ExtensionStatus, ExtensionType, ServiceHandle,
    ServiceInfo,
};
pub use loader::{NativePluginLoader, PluginLoader, ABI_VERSION};
pub use manager::{CleanupReport, ExtensionInfo, ExtensionManager, ExtensionOrigin, ManagerInterface};
pub use monitor::{PluginMetrics, ResourceMonitor};
pub use registry::{groups, ExtensionRegistry};
pub use sandbox::{sign_plugin, Sandbox};
pub use service::CrossServiceRegistry;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::error::{ExtensionError, Result};
    pub use crate::extension::{
        Extension, ExtensionMetadata, ExtensionStatus, ExtensionType, ServiceHandle,
    };
    pub use crate::manager::{ExtensionManager, ManagerInterface};
    pub use crate::registry::{groups, ExtensionRegistry};
    pub use async_trait::async_trait;
}
