//! Advisory resource accounting for loaded plugins.
//!
//! Each loaded plugin gets one [`PluginMetrics`] record. The host refreshes
//! the usage figures; the monitor only sums them. Before a new load,
//! [`ResourceMonitor::check_resource_limits`] adds a fixed safety margin to
//! the current totals and refuses the load if a ceiling would be crossed.
//! Nothing here is enforced at the OS level.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::PerformanceConfig;
use crate::error::{ExtensionError, Result};

/// Memory headroom assumed for the plugin about to load.
pub const MEMORY_SAFETY_MARGIN_MB: f64 = 50.0;
/// CPU headroom assumed for the plugin about to load.
pub const CPU_SAFETY_MARGIN_PERCENT: f64 = 10.0;

/// Usage record for one loaded plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginMetrics {
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub load_time: Duration,
    pub init_time: Duration,
    pub last_access: DateTime<Utc>,
}

/// Aggregate usage across all loaded plugins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceTotals {
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub plugins: usize,
}

/// Tracks per-plugin usage estimates against configured ceilings.
#[derive(Debug)]
pub struct ResourceMonitor {
    config: PerformanceConfig,
    metrics: RwLock<HashMap<String, PluginMetrics>>,
}

impl ResourceMonitor {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Refuse a new load if current usage plus the safety margin would
    /// exceed a ceiling.
    pub fn check_resource_limits(&self) -> Result<()> {
        let totals = self.totals();

        if self.config.max_memory_mb > 0 {
            let projected = totals.memory_usage_mb + MEMORY_SAFETY_MARGIN_MB;
            let limit = self.config.max_memory_mb as f64;
            if projected > limit {
                tracing::warn!(category = "resource", projected, limit, "Memory ceiling would be exceeded");
                return Err(ExtensionError::ResourceLimitExceeded {
                    resource: "memory_mb",
                    projected,
                    limit,
                });
            }
        }

        if self.config.max_cpu_percent > 0 {
            let projected = totals.cpu_usage_percent + CPU_SAFETY_MARGIN_PERCENT;
            let limit = self.config.max_cpu_percent as f64;
            if projected > limit {
                tracing::warn!(category = "resource", projected, limit, "CPU ceiling would be exceeded");
                return Err(ExtensionError::ResourceLimitExceeded {
                    resource: "cpu_percent",
                    projected,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Create the record for a freshly loaded plugin.
    pub fn record_load(
        &self,
        name: impl Into<String>,
        memory_estimate_mb: f64,
        load_time: Duration,
        init_time: Duration,
    ) {
        let name = name.into();
        tracing::debug!(
            category = "resource",
            extension = %name,
            memory_estimate_mb,
            load_ms = load_time.as_millis() as u64,
            init_ms = init_time.as_millis() as u64,
            "Plugin metrics recorded"
        );
        self.metrics.write().insert(
            name,
            PluginMetrics {
                memory_usage_mb: memory_estimate_mb.max(0.0),
                cpu_usage_percent: 0.0,
                load_time,
                init_time,
                last_access: Utc::now(),
            },
        );
    }

    /// Refresh usage figures for a loaded plugin.
    pub fn update_usage(&self, name: &str, memory_usage_mb: f64, cpu_usage_percent: f64) -> Result<()> {
        let mut metrics = self.metrics.write();
        let record = metrics
            .get_mut(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        record.memory_usage_mb = memory_usage_mb.max(0.0);
        record.cpu_usage_percent = cpu_usage_percent.max(0.0);
        record.last_access = Utc::now();
        Ok(())
    }

    /// Mark a plugin as accessed now.
    pub fn touch(&self, name: &str) {
        if let Some(record) = self.metrics.write().get_mut(name) {
            record.last_access = Utc::now();
        }
    }

    /// Drop a plugin's record on unload.
    pub fn cleanup(&self, name: &str) {
        if self.metrics.write().remove(name).is_some() {
            tracing::debug!(category = "resource", extension = %name, "Plugin metrics removed");
        }
    }

    pub fn totals(&self) -> ResourceTotals {
        let metrics = self.metrics.read();
        metrics.values().fold(
            ResourceTotals {
                plugins: metrics.len(),
                ..Default::default()
            },
            |mut acc, m| {
                acc.memory_usage_mb += m.memory_usage_mb;
                acc.cpu_usage_percent += m.cpu_usage_percent;
                acc
            },
        )
    }

    pub fn metrics(&self, name: &str) -> Option<PluginMetrics> {
        self.metrics.read().get(name).cloned()
    }

    pub fn all_metrics(&self) -> HashMap<String, PluginMetrics> {
        self.metrics.read().clone()
    }

    pub fn clear(&self) {
        self.metrics.write().clear();
    }
}
