//! Shared test extensions and helpers.

#![allow(dead_code)]

use axum::routing::get;
use axum::Router;
use extkit_core::prelude::*;
use extkit_core::{PluginLoader, ServiceInfo};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Ordered record of lifecycle calls across extensions.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Calls for one hook, in order, as extension names.
    pub fn names_for(&self, hook: &str) -> Vec<String> {
        let suffix = format!(".{}", hook);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }
}

/// Service published by test extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Greeter {
    pub greeting: String,
}

/// Configurable extension for lifecycle scenarios.
#[derive(Clone)]
pub struct TestExtension {
    metadata: ExtensionMetadata,
    log: CallLog,
    fail_init: bool,
    cleanup_delay: Option<Duration>,
    route: Option<&'static str>,
    publish: Option<(String, Greeter)>,
    consume_in_init: Option<(String, String)>,
    consume_in_post_init: Option<(String, String)>,
    consumed: Arc<Mutex<Vec<Greeter>>>,
    seen_config: Arc<Mutex<Option<serde_json::Value>>>,
    discovery: Option<ServiceInfo>,
    manager: Option<Arc<dyn ManagerInterface>>,
}

impl TestExtension {
    pub fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            metadata: ExtensionMetadata::new(name, semver::Version::new(1, 0, 0))
                .with_dependencies(dependencies.iter().copied()),
            log: CallLog::default(),
            fail_init: false,
            cleanup_delay: None,
            route: None,
            publish: None,
            consume_in_init: None,
            consume_in_post_init: None,
            consumed: Arc::default(),
            seen_config: Arc::default(),
            discovery: None,
            manager: None,
        }
    }

    pub fn logging_to(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.metadata.group = group.to_string();
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn slow_cleanup(mut self, delay: Duration) -> Self {
        self.cleanup_delay = Some(delay);
        self
    }

    /// Serve `GET <path>` answering with the extension name.
    pub fn serving(mut self, path: &'static str) -> Self {
        self.route = Some(path);
        self
    }

    pub fn publishing(mut self, key: &str, greeting: &str) -> Self {
        self.publish = Some((
            key.to_string(),
            Greeter {
                greeting: greeting.to_string(),
            },
        ));
        self
    }

    pub fn consuming_in_init(mut self, namespace: &str, name: &str) -> Self {
        self.consume_in_init = Some((namespace.to_string(), name.to_string()));
        self
    }

    pub fn consuming_in_post_init(mut self, namespace: &str, name: &str) -> Self {
        self.consume_in_post_init = Some((namespace.to_string(), name.to_string()));
        self
    }

    pub fn discoverable(mut self, address: &str) -> Self {
        self.discovery = Some(ServiceInfo {
            name: self.metadata.name.clone(),
            address: address.to_string(),
            ..Default::default()
        });
        self
    }

    /// Services this extension looked up, shared across clones.
    pub fn consumed(&self) -> Arc<Mutex<Vec<Greeter>>> {
        self.consumed.clone()
    }

    /// Settings passed to `init`, shared across clones.
    pub fn seen_config(&self) -> Arc<Mutex<Option<serde_json::Value>>> {
        self.seen_config.clone()
    }

    fn record(&self, hook: &str) {
        self.log.record(format!("{}.{}", self.metadata.name, hook));
    }
}

#[async_trait]
impl Extension for TestExtension {
    fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    async fn init(
        &mut self,
        config: &serde_json::Value,
        manager: Arc<dyn ManagerInterface>,
    ) -> Result<()> {
        self.record("init");
        *self.seen_config.lock() = Some(config.clone());
        if let Some((key, greeter)) = &self.publish {
            manager.register_cross_service(key, greeter.clone());
        }
        if self.fail_init {
            return Err(ExtensionError::Other(format!(
                "{} refused to start",
                self.metadata.name
            )));
        }
        if let Some((namespace, name)) = &self.consume_in_init {
            let greeter = manager.get_cross_service::<Greeter>(namespace, name)?;
            self.consumed.lock().push(greeter);
        }
        // Held for post_init lookups.
        self.manager = Some(manager);
        Ok(())
    }

    async fn post_init(&mut self) -> Result<()> {
        self.record("post_init");
        if let (Some((namespace, name)), Some(manager)) =
            (&self.consume_in_post_init, &self.manager)
        {
            let greeter = manager.get_cross_service::<Greeter>(namespace, name)?;
            self.consumed.lock().push(greeter);
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if let Some(delay) = self.cleanup_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("cleanup");
        Ok(())
    }

    fn register_routes(&self, router: Router) -> Router {
        match self.route {
            Some(path) => {
                let name = self.metadata.name.clone();
                router.route(path, get(move || async move { name }))
            }
            None => router,
        }
    }

    fn handlers(&self) -> Option<ServiceHandle> {
        self.route.map(|path| Arc::new(path) as ServiceHandle)
    }

    fn services(&self) -> Option<ServiceHandle> {
        self.publish
            .as_ref()
            .map(|(_, greeter)| Arc::new(greeter.clone()) as ServiceHandle)
    }

    fn need_service_discovery(&self) -> bool {
        self.discovery.is_some()
    }

    fn service_info(&self) -> Option<ServiceInfo> {
        self.discovery.clone()
    }
}

/// Register each extension into `group` in the given order.
pub fn registry_of(group: &str, extensions: Vec<TestExtension>) -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    for extension in extensions {
        registry.register_to_group(group, move || Box::new(extension.clone()));
    }
    registry
}

/// Loader that ignores the artifact contents and hands out a prepared
/// extension, so hot-load tests need no compiled library.
pub struct FakeLoader {
    extension: Mutex<Option<TestExtension>>,
}

impl FakeLoader {
    pub fn new(extension: TestExtension) -> Self {
        Self {
            extension: Mutex::new(Some(extension)),
        }
    }
}

impl PluginLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Extension>> {
        self.extension
            .lock()
            .take()
            .map(|ext| Box::new(ext) as Box<dyn Extension>)
            .ok_or_else(|| ExtensionError::LoadFailed(format!("nothing to load at {}", path.display())))
    }
}

/// Configuration with short timeouts for tests.
pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        shutdown_timeout_secs: 5,
        cleanup_timeout_secs: 1,
        ..Default::default()
    }
}
