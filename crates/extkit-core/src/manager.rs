//! Extension manager.
//!
//! The manager takes the host's [`ExtensionRegistry`], resolves a
//! dependency-respecting order and drives every extension through its
//! lifecycle:
//!
//! ```text
//! resolve ──▶ pre_init + init (each, in order) ──▶ post_init (each, in order) ──▶ Active
//!                      │ error                            │ error
//!                      └──────▶ roll back initialized ◀───┘
//!
//! cleanup: pre_cleanup + cleanup in reverse order, bounded per extension
//!          and overall by the shutdown deadline
//! ```
//!
//! No `post_init` runs until every `init` in the batch has returned `Ok`.
//! The manager also hosts the cross-service registry, mounts extension
//! routes and hot-loads sandboxed plugins after startup.

use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::{ExtensionError, LifecyclePhase, MissingDependency, Result};
use crate::extension::{
    DynExtension, Extension, ExtensionMetadata, ExtensionStatus, ServiceHandle, ServiceInfo,
};
use crate::loader::{NativePluginLoader, PluginLoader};
use crate::monitor::{PluginMetrics, ResourceMonitor};
use crate::registry::ExtensionRegistry;
use crate::resolver::{resolve_order, ResolveNode};
use crate::sandbox::Sandbox;
use crate::service::CrossServiceRegistry;

// ============================================================================
// Manager interface handed to extensions
// ============================================================================

/// What an extension can ask of the manager.
pub trait ManagerInterface: Send + Sync {
    /// Publish a type-erased service under a composite key. Last writer wins.
    fn register_cross_service_handle(&self, key: &str, service: ServiceHandle);

    /// Look up `namespace.name`.
    fn get_cross_service_handle(&self, namespace: &str, name: &str) -> Result<ServiceHandle>;

    fn get_extension_by_name(&self, name: &str) -> Result<DynExtension>;

    /// Settings configured for extension `name`.
    fn extension_config(&self, name: &str) -> serde_json::Value;
}

impl dyn ManagerInterface {
    /// Publish `service` under `key`.
    pub fn register_cross_service<T>(&self, key: &str, service: T)
    where
        T: Any + Send + Sync,
    {
        self.register_cross_service_handle(key, Arc::new(service));
    }

    /// Look up `namespace.name` as a `T`; a wrong type is an error, not a panic.
    pub fn get_cross_service<T>(&self, namespace: &str, name: &str) -> Result<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let handle = self.get_cross_service_handle(namespace, name)?;
        handle
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ExtensionError::ServiceTypeMismatch {
                key: crate::service::service_key(namespace, name),
                expected: std::any::type_name::<T>(),
            })
    }
}

// ============================================================================
// Bookkeeping types
// ============================================================================

/// Where an extension came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExtensionOrigin {
    /// Registered by the host before startup.
    Static,
    /// Hot-loaded from a plugin artifact.
    Dynamic { path: PathBuf, source: String },
}

/// Snapshot of a managed extension.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub metadata: ExtensionMetadata,
    pub status: ExtensionStatus,
    pub origin: ExtensionOrigin,
    pub registered_at: DateTime<Utc>,
}

/// Outcome of a shutdown cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

struct ExtensionEntry {
    extension: DynExtension,
    metadata: ExtensionMetadata,
    status: ExtensionStatus,
    origin: ExtensionOrigin,
    registered_at: DateTime<Utc>,
    /// A cleanup overran its allotment and may still hold the write lock
    wedged: bool,
}

impl ExtensionEntry {
    fn new(extension: Box<dyn Extension>, metadata: ExtensionMetadata, origin: ExtensionOrigin) -> Self {
        Self {
            extension: Arc::new(tokio::sync::RwLock::new(extension)),
            metadata,
            status: ExtensionStatus::Inactive,
            origin,
            registered_at: Utc::now(),
            wedged: false,
        }
    }

    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            metadata: self.metadata.clone(),
            status: self.status,
            origin: self.origin.clone(),
            registered_at: self.registered_at,
        }
    }

    /// Initialized and not torn down, whatever the administrative status.
    fn is_running(&self) -> bool {
        matches!(
            self.status,
            ExtensionStatus::Active | ExtensionStatus::Disabled | ExtensionStatus::Maintenance
        )
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Orchestrates extension startup, service discovery and shutdown.
pub struct ExtensionManager {
    config: ManagerConfig,
    /// Registry contents waiting for `init_extensions`
    pending: Mutex<Vec<(String, Box<dyn Extension>)>>,
    extensions: RwLock<HashMap<String, ExtensionEntry>>,
    /// Names that completed `init`, in order
    init_order: RwLock<Vec<String>>,
    services: CrossServiceRegistry,
    sandbox: Sandbox,
    monitor: ResourceMonitor,
    loader: Box<dyn PluginLoader>,
    /// Serializes startup, hot load, unload and shutdown
    lifecycle: tokio::sync::Mutex<()>,
    /// Set by the first `init_extensions` call, successful or not
    attempted: AtomicBool,
    started: AtomicBool,
}

impl ExtensionManager {
    /// Create a manager that loads native plugins.
    pub fn new(config: ManagerConfig, registry: ExtensionRegistry) -> Arc<Self> {
        Self::with_loader(config, registry, NativePluginLoader::new())
    }

    /// Create a manager with a custom plugin loader.
    pub fn with_loader(
        config: ManagerConfig,
        registry: ExtensionRegistry,
        loader: impl PluginLoader + 'static,
    ) -> Arc<Self> {
        let config = config.sanitized();
        let mut pending = Vec::with_capacity(registry.len());
        for (group, extension) in registry.instantiate() {
            let name = &extension.metadata().name;
            if config.is_selected(name) {
                pending.push((group, extension));
            } else {
                info!(extension = %name, group = %group, "Extension excluded by configuration");
            }
        }

        Arc::new(Self {
            sandbox: Sandbox::new(config.security.clone()),
            monitor: ResourceMonitor::new(config.performance.clone()),
            config,
            pending: Mutex::new(pending),
            extensions: RwLock::new(HashMap::new()),
            init_order: RwLock::new(Vec::new()),
            services: CrossServiceRegistry::new(),
            loader: Box::new(loader),
            lifecycle: tokio::sync::Mutex::new(()),
            attempted: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn cross_services(&self) -> &CrossServiceRegistry {
        &self.services
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Resolve, initialize and post-initialize every registered extension.
    ///
    /// Configuration errors are returned before any extension is touched.
    /// The first `init` or `post_init` failure aborts the batch and rolls
    /// back the extensions that had already initialized.
    ///
    /// Only the first call does anything; later calls, including retries
    /// after a failure or a shutdown, return `InvalidState`.
    pub async fn init_extensions(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.attempted.swap(true, Ordering::SeqCst) {
            return Err(ExtensionError::InvalidState(
                "extensions can only be initialized once".into(),
            ));
        }

        let pending = std::mem::take(&mut *self.pending.lock());
        let nodes: Vec<ResolveNode> = pending
            .iter()
            .map(|(_, ext)| {
                let metadata = ext.metadata();
                ResolveNode::new(metadata.name.as_str(), metadata.dependencies.iter().cloned())
            })
            .collect();

        let order = resolve_order(&nodes).map_err(|e| {
            error!(category = "config", error = %e, "Extension dependency resolution failed");
            e
        })?;
        info!(count = order.len(), order = ?order, "Extension order resolved");

        {
            let mut table = self.extensions.write();
            for (group, extension) in pending {
                let mut metadata = extension.metadata().clone();
                if metadata.group.is_empty() {
                    metadata.group = group;
                }
                table.insert(
                    metadata.name.clone(),
                    ExtensionEntry::new(extension, metadata, ExtensionOrigin::Static),
                );
            }
        }

        for name in &order {
            let started = Instant::now();
            if let Err(e) = self.init_one(name).await {
                error!(extension = %name, error = %e, "Extension init failed, aborting startup");
                self.set_status(name, ExtensionStatus::Error);
                self.rollback().await;
                return Err(e);
            }
            self.init_order.write().push(name.clone());
            debug!(extension = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Extension initialized");
        }

        for name in &order {
            if let Err(e) = self.post_init_one(name).await {
                error!(extension = %name, error = %e, "Extension post_init failed, aborting startup");
                self.set_status(name, ExtensionStatus::Error);
                self.rollback().await;
                return Err(e);
            }
        }

        for name in &order {
            self.set_status(name, ExtensionStatus::Active);
        }
        self.started.store(true, Ordering::SeqCst);
        info!(count = order.len(), services = self.services.len(), "Extensions started");
        Ok(())
    }

    async fn init_one(self: &Arc<Self>, name: &str) -> Result<()> {
        let extension = self.extension_handle(name)?;
        self.set_status(name, ExtensionStatus::Initializing);

        let settings = self.config.extension_settings(name);
        let manager: Arc<dyn ManagerInterface> = self.clone();

        let mut ext = extension.write().await;
        ext.pre_init()
            .await
            .map_err(|e| ExtensionError::lifecycle(name, LifecyclePhase::PreInit, e))?;
        ext.init(&settings, manager)
            .await
            .map_err(|e| ExtensionError::lifecycle(name, LifecyclePhase::Init, e))
    }

    async fn post_init_one(&self, name: &str) -> Result<()> {
        let extension = self.extension_handle(name)?;
        let mut ext = extension.write().await;
        ext.post_init()
            .await
            .map_err(|e| ExtensionError::lifecycle(name, LifecyclePhase::PostInit, e))
    }

    /// Undo a failed startup: clean up initialized extensions in reverse.
    async fn rollback(&self) {
        let initialized = std::mem::take(&mut *self.init_order.write());
        for name in initialized.iter().rev() {
            let Ok(extension) = self.extension_handle(name) else {
                continue;
            };
            match run_cleanup(name, extension, self.config.cleanup_timeout()).await {
                Ok(()) => {}
                Err(ExtensionError::Timeout(msg)) => {
                    warn!(extension = %name, "{}", msg);
                    self.mark_wedged(name);
                }
                Err(e) => warn!(extension = %name, error = %e, "Rollback cleanup failed"),
            }
            let mut table = self.extensions.write();
            if let Some(entry) = table.get_mut(name) {
                if entry.status != ExtensionStatus::Error {
                    entry.status = ExtensionStatus::Inactive;
                }
            }
        }
        self.services.clear();
        warn!(rolled_back = initialized.len(), "Extension startup rolled back");
    }

    // ------------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------------

    /// Mount the routes of every active extension onto `router`.
    ///
    /// Routers of the same group are merged and nested once under
    /// `/<group>`; extensions without a group are merged at the root.
    pub async fn register_routes(&self, router: Router) -> Router {
        let mut grouped: Vec<(String, Router)> = Vec::new();

        for (name, extension, group) in self.serving_in_order() {
            let sub = extension.read().await.register_routes(Router::new());
            debug!(extension = %name, group = %group, "Extension routes registered");
            match grouped.iter_mut().find(|(g, _)| *g == group) {
                Some((_, existing)) => {
                    *existing = std::mem::replace(existing, Router::new()).merge(sub)
                }
                None => grouped.push((group, sub)),
            }
        }

        grouped
            .into_iter()
            .fold(router, |router, (group, sub)| {
                let group = group.trim_matches('/');
                if group.is_empty() {
                    router.merge(sub)
                } else {
                    router.nest(&format!("/{}", group), sub)
                }
            })
    }

    fn serving_in_order(&self) -> Vec<(String, DynExtension, String)> {
        let order = self.init_order.read().clone();
        let table = self.extensions.read();
        order
            .into_iter()
            .filter_map(|name| {
                let entry = table.get(&name)?;
                (entry.status.is_serving() && !entry.wedged).then(|| {
                    (name, entry.extension.clone(), entry.metadata.group.clone())
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Clean up every extension in reverse initialization order.
    ///
    /// Each extension gets at most `cleanup_timeout_secs`, and never more than
    /// what is left of `shutdown_timeout_secs`. An extension that overruns is
    /// logged and skipped. Cross services are cleared afterwards.
    pub async fn cleanup(&self) -> CleanupReport {
        let _lifecycle = self.lifecycle.lock().await;
        let order = std::mem::take(&mut *self.init_order.write());
        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut report = CleanupReport::default();

        for name in order.iter().rev() {
            let Ok(extension) = self.extension_handle(name) else {
                continue;
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(extension = %name, "Shutdown deadline reached, cleanup skipped");
                report.timed_out.push(name.clone());
            } else {
                let allotted = remaining.min(self.config.cleanup_timeout());
                match run_cleanup(name, extension, allotted).await {
                    Ok(()) => report.completed.push(name.clone()),
                    Err(ExtensionError::Timeout(msg)) => {
                        warn!(extension = %name, "{}", msg);
                        self.mark_wedged(name);
                        report.timed_out.push(name.clone());
                    }
                    Err(e) => {
                        warn!(extension = %name, error = %e, "Extension cleanup failed");
                        report.failed.push((name.clone(), e.to_string()));
                    }
                }
            }

            self.set_status(name, ExtensionStatus::Inactive);
            self.monitor.cleanup(name);
        }

        self.services.clear();
        self.started.store(false, Ordering::SeqCst);
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "Extensions cleaned up"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Hot loading
    // ------------------------------------------------------------------------

    /// Validate, load and start a plugin after startup.
    ///
    /// Security and resource failures refuse this load only. Every
    /// dependency must already be running. The extension table is locked
    /// only while the entry is inserted or updated, never during `init`.
    pub async fn load_plugin(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
        source: &str,
    ) -> Result<ExtensionMetadata> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.started.load(Ordering::SeqCst) {
            return Err(ExtensionError::InvalidState(
                "plugins can only be loaded after startup".into(),
            ));
        }

        let path = self.sandbox.validate(path.as_ref(), source).map_err(|e| {
            warn!(category = "security", path = %path.as_ref().display(), error = %e, "Plugin refused");
            e
        })?;
        self.monitor.check_resource_limits()?;

        let load_started = Instant::now();
        let extension = self.loader.load(&path)?;
        let load_time = load_started.elapsed();

        let metadata = extension.metadata().clone();
        let name = metadata.name.clone();
        let memory_estimate_mb = std::fs::metadata(&path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        {
            let mut table = self.extensions.write();
            if table.contains_key(&name) {
                return Err(ExtensionError::AlreadyRegistered(name));
            }
            let missing: Vec<MissingDependency> = metadata
                .dependencies
                .iter()
                .filter(|dep| !table.get(dep.as_str()).is_some_and(ExtensionEntry::is_running))
                .map(|dep| MissingDependency {
                    extension: name.clone(),
                    dependency: dep.clone(),
                })
                .collect();
            if !missing.is_empty() {
                return Err(ExtensionError::MissingDependencies(missing));
            }
            table.insert(
                name.clone(),
                ExtensionEntry::new(
                    extension,
                    metadata.clone(),
                    ExtensionOrigin::Dynamic {
                        path: path.clone(),
                        source: source.to_string(),
                    },
                ),
            );
        }

        let services_before = self.services.keys();
        let init_started = Instant::now();
        if let Err(e) = self.init_one(&name).await {
            error!(extension = %name, error = %e, "Plugin init failed");
            self.extensions.write().remove(&name);
            self.discard_services_since(&services_before, &name);
            return Err(e);
        }
        if let Err(e) = self.post_init_one(&name).await {
            error!(extension = %name, error = %e, "Plugin post_init failed");
            if let Ok(extension) = self.extension_handle(&name) {
                if let Err(cleanup_err) =
                    run_cleanup(&name, extension, self.config.cleanup_timeout()).await
                {
                    warn!(extension = %name, error = %cleanup_err, "Cleanup of failed plugin failed");
                }
            }
            self.extensions.write().remove(&name);
            self.discard_services_since(&services_before, &name);
            return Err(e);
        }
        let init_time = init_started.elapsed();

        self.set_status(&name, ExtensionStatus::Active);
        self.init_order.write().push(name.clone());
        self.monitor
            .record_load(name.clone(), memory_estimate_mb, load_time, init_time);
        info!(
            extension = %name,
            path = %path.display(),
            load_ms = load_time.as_millis() as u64,
            init_ms = init_time.as_millis() as u64,
            "Plugin loaded"
        );
        Ok(metadata)
    }

    /// Drop cross services published after `before` was taken.
    ///
    /// A key the failed plugin overwrote keeps the plugin's value; only new
    /// keys can be told apart.
    fn discard_services_since(&self, before: &[String], owner: &str) {
        for key in self.services.keys() {
            if before.binary_search(&key).is_err() && self.services.remove(&key) {
                debug!(extension = %owner, key = %key, "Cross service of failed plugin removed");
            }
        }
    }

    /// Stop and remove a running extension.
    ///
    /// Refused while another running extension depends on it. Cleanup
    /// failures are logged; the extension is removed regardless.
    pub async fn unload_extension(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let extension = {
            let table = self.extensions.read();
            let entry = table
                .get(name)
                .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
            let mut dependents: Vec<String> = table
                .values()
                .filter(|e| e.is_running() && e.metadata.dependencies.iter().any(|d| d == name))
                .map(|e| e.metadata.name.clone())
                .collect();
            if !dependents.is_empty() {
                dependents.sort();
                return Err(ExtensionError::DependentsActive {
                    extension: name.to_string(),
                    dependents,
                });
            }
            entry.extension.clone()
        };

        if let Err(e) = run_cleanup(name, extension, self.config.cleanup_timeout()).await {
            warn!(extension = %name, error = %e, "Cleanup during unload failed");
        }

        self.extensions.write().remove(name);
        self.init_order.write().retain(|n| n != name);
        self.monitor.cleanup(name);
        info!(extension = %name, "Extension unloaded");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Apply an administrative override.
    ///
    /// `Disabled` and `Maintenance` may be set on a running extension;
    /// `Active` restores one of those.
    pub fn set_extension_status(&self, name: &str, status: ExtensionStatus) -> Result<()> {
        let mut table = self.extensions.write();
        let entry = table
            .get_mut(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;

        let allowed = entry.is_running()
            && (status.is_override() || status == ExtensionStatus::Active);
        if !allowed {
            return Err(ExtensionError::InvalidState(format!(
                "cannot change '{}' from {} to {}",
                name, entry.status, status
            )));
        }

        info!(extension = %name, from = %entry.status, to = %status, "Extension status changed");
        entry.status = status;
        Ok(())
    }

    /// Current status. While the manager considers an extension active, the
    /// extension's own report takes precedence.
    pub async fn extension_status(&self, name: &str) -> Result<ExtensionStatus> {
        let (status, extension, wedged) = {
            let table = self.extensions.read();
            let entry = table
                .get(name)
                .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
            (entry.status, entry.extension.clone(), entry.wedged)
        };
        if status == ExtensionStatus::Active && !wedged {
            return Ok(extension.read().await.status());
        }
        Ok(status)
    }

    fn set_status(&self, name: &str, status: ExtensionStatus) {
        if let Some(entry) = self.extensions.write().get_mut(name) {
            entry.status = status;
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    fn extension_handle(&self, name: &str) -> Result<DynExtension> {
        self.extensions
            .read()
            .get(name)
            .map(|e| e.extension.clone())
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))
    }

    /// Handle for callers outside the lifecycle. Refused while a timed-out
    /// cleanup still holds the extension's lock, so lookups never block on it.
    fn live_handle(&self, name: &str) -> Result<DynExtension> {
        let table = self.extensions.read();
        let entry = table
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        if entry.wedged && entry.extension.try_read().is_err() {
            return Err(ExtensionError::InvalidState(format!(
                "'{}' is still finishing a timed-out cleanup",
                name
            )));
        }
        Ok(entry.extension.clone())
    }

    fn mark_wedged(&self, name: &str) {
        if let Some(entry) = self.extensions.write().get_mut(name) {
            entry.wedged = true;
        }
    }

    /// Names that completed `init`, in order.
    pub fn init_order(&self) -> Vec<String> {
        self.init_order.read().clone()
    }

    /// All managed extensions: initialized ones in order, then the rest by name.
    pub fn list_extensions(&self) -> Vec<ExtensionInfo> {
        let order = self.init_order.read().clone();
        let table = self.extensions.read();

        let mut infos: Vec<ExtensionInfo> =
            order.iter().filter_map(|n| table.get(n)).map(ExtensionEntry::info).collect();
        let mut rest: Vec<ExtensionInfo> = table
            .iter()
            .filter(|(n, _)| !order.contains(*n))
            .map(|(_, e)| e.info())
            .collect();
        rest.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        infos.extend(rest);
        infos
    }

    pub fn list_metadata(&self) -> Vec<ExtensionMetadata> {
        self.list_extensions()
            .into_iter()
            .map(|info| info.metadata)
            .collect()
    }

    pub fn get_metadata(&self, name: &str) -> Result<ExtensionMetadata> {
        self.extensions
            .read()
            .get(name)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))
    }

    pub fn get_extension(&self, name: &str) -> Result<DynExtension> {
        self.live_handle(name)
    }

    pub async fn get_handlers(&self, name: &str) -> Result<Option<ServiceHandle>> {
        let extension = self.live_handle(name)?;
        let handlers = extension.read().await.handlers();
        Ok(handlers)
    }

    pub async fn get_services(&self, name: &str) -> Result<Option<ServiceHandle>> {
        let extension = self.live_handle(name)?;
        let services = extension.read().await.services();
        Ok(services)
    }

    /// Discovery registrations of active extensions that asked for one.
    pub async fn service_registrations(&self) -> Vec<ServiceInfo> {
        let mut registrations = Vec::new();
        for (name, extension, _) in self.serving_in_order() {
            let ext = extension.read().await;
            if !ext.need_service_discovery() {
                continue;
            }
            match ext.service_info() {
                Some(info) => registrations.push(info),
                None => warn!(extension = %name, "Service discovery requested without service info"),
            }
        }
        registrations
    }

    pub fn plugin_metrics(&self, name: &str) -> Option<PluginMetrics> {
        self.monitor.metrics(name)
    }

    // ------------------------------------------------------------------------
    // Cross services
    // ------------------------------------------------------------------------

    pub fn register_cross_service<T>(&self, key: &str, service: T)
    where
        T: Any + Send + Sync,
    {
        self.services.register(key, service);
    }

    pub fn get_cross_service<T>(&self, namespace: &str, name: &str) -> Result<T>
    where
        T: Any + Clone + Send + Sync,
    {
        self.services.get(namespace, name)
    }
}

impl ManagerInterface for ExtensionManager {
    fn register_cross_service_handle(&self, key: &str, service: ServiceHandle) {
        self.services.register_handle(key, service);
    }

    fn get_cross_service_handle(&self, namespace: &str, name: &str) -> Result<ServiceHandle> {
        self.services.get_handle(namespace, name)
    }

    fn get_extension_by_name(&self, name: &str) -> Result<DynExtension> {
        self.live_handle(name)
    }

    fn extension_config(&self, name: &str) -> serde_json::Value {
        self.config.extension_settings(name)
    }
}

/// Run `pre_cleanup` + `cleanup` on its own task and wait at most `allotted`.
///
/// An overrunning cleanup keeps running detached; the caller moves on.
async fn run_cleanup(name: &str, extension: DynExtension, allotted: Duration) -> Result<()> {
    let task_name = name.to_string();
    let task = tokio::spawn(async move {
        let mut ext = extension.write().await;
        if let Err(e) = ext.pre_cleanup().await {
            warn!(extension = %task_name, error = %e, "pre_cleanup failed");
        }
        ext.cleanup()
            .await
            .map_err(|e| ExtensionError::lifecycle(task_name, LifecyclePhase::Cleanup, e))
    });

    match tokio::time::timeout(allotted, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ExtensionError::lifecycle(
            name,
            LifecyclePhase::Cleanup,
            ExtensionError::Other(format!("cleanup task failed: {}", join_error)),
        )),
        Err(_) => Err(ExtensionError::Timeout(format!(
            "cleanup of '{}' exceeded {:?}",
            name, allotted
        ))),
    }
}
