//! Stub extensions for unit tests.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{ExtensionError, Result};
use crate::extension::{Extension, ExtensionMetadata, ExtensionStatus, ServiceHandle};
use crate::manager::ManagerInterface;

/// Shared, ordered record of lifecycle calls across stubs.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Debug, Clone)]
pub struct StubExtension {
    metadata: ExtensionMetadata,
    log: CallLog,
    fail_post_init: bool,
    reported: ExtensionStatus,
}

impl StubExtension {
    pub fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            metadata: ExtensionMetadata::new(name, semver::Version::new(0, 1, 0))
                .with_dependencies(dependencies.iter().copied()),
            log: CallLog::default(),
            fail_post_init: false,
            reported: ExtensionStatus::Active,
        }
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn failing_post_init(mut self) -> Self {
        self.fail_post_init = true;
        self
    }

    pub fn reporting(mut self, status: ExtensionStatus) -> Self {
        self.reported = status;
        self
    }

    fn record(&self, hook: &str) {
        self.log.record(format!("{}.{}", self.metadata.name, hook));
    }
}

#[async_trait::async_trait]
impl Extension for StubExtension {
    fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    async fn init(
        &mut self,
        _config: &serde_json::Value,
        _manager: Arc<dyn ManagerInterface>,
    ) -> Result<()> {
        self.record("init");
        Ok(())
    }

    async fn post_init(&mut self) -> Result<()> {
        self.record("post_init");
        if self.fail_post_init {
            return Err(ExtensionError::Other("post_init failed".into()));
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.record("cleanup");
        Ok(())
    }

    fn register_routes(&self, router: axum::Router) -> axum::Router {
        router
    }

    fn handlers(&self) -> Option<ServiceHandle> {
        None
    }

    fn services(&self) -> Option<ServiceHandle> {
        None
    }

    fn status(&self) -> ExtensionStatus {
        self.reported
    }
}
