//! Runtime configuration.
//!
//! Loaded from TOML with every field optional:
//!
//! ```toml
//! includes = []
//! excludes = ["legacy"]
//! shutdown_timeout_secs = 30
//! cleanup_timeout_secs = 10
//!
//! [security]
//! enable_sandbox = true
//! require_signature = true
//! allowed_paths = ["/var/lib/extkit/plugins"]
//! trusted_sources = ["registry.internal"]
//!
//! [performance]
//! max_memory_mb = 512
//! max_cpu_percent = 80
//!
//! [extensions.user]
//! default_role = "member"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExtensionError, Result};

/// Environment variable names
pub mod env_vars {
    /// Extra directory appended to `security.allowed_paths`
    pub const PLUGIN_DIR: &str = "EXTKIT_PLUGIN_DIR";
    /// Overrides `shutdown_timeout_secs`
    pub const SHUTDOWN_TIMEOUT_SECS: &str = "EXTKIT_SHUTDOWN_TIMEOUT_SECS";
}

/// Defaults
pub mod defaults {
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
    pub const CLEANUP_TIMEOUT_SECS: u64 = 10;
    pub const MAX_MEMORY_MB: u64 = 512;
    pub const MAX_CPU_PERCENT: u64 = 80;
    pub const BLOCKED_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "sh", "ps1"];
}

/// Policy input to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_sandbox: bool,
    pub require_signature: bool,
    /// Skips signature checks. Development only.
    pub allow_unsafe: bool,
    pub allowed_paths: Vec<PathBuf>,
    pub blocked_extensions: Vec<String>,
    pub trusted_sources: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_sandbox: true,
            require_signature: true,
            allow_unsafe: false,
            allowed_paths: Vec::new(),
            blocked_extensions: defaults::BLOCKED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trusted_sources: Vec::new(),
        }
    }
}

impl SecurityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allowed_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.allowed_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_sandbox(mut self, enable: bool) -> Self {
        self.enable_sandbox = enable;
        self
    }

    pub fn with_signature_required(mut self, require: bool) -> Self {
        self.require_signature = require;
        self
    }

    pub fn with_allow_unsafe(mut self, allow: bool) -> Self {
        self.allow_unsafe = allow;
        self
    }

    pub fn with_allowed_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.allowed_paths = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    pub fn with_blocked_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trusted_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_sources = sources.into_iter().map(Into::into).collect();
        self
    }
}

/// Policy input to the resource monitor. A ceiling of 0 disables that check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_memory_mb: u64,
    pub max_cpu_percent: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: defaults::MAX_MEMORY_MB,
            max_cpu_percent: defaults::MAX_CPU_PERCENT,
        }
    }
}

impl PerformanceConfig {
    pub fn new(max_memory_mb: u64, max_cpu_percent: u64) -> Self {
        Self {
            max_memory_mb,
            max_cpu_percent,
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Extensions to take from the registry. Empty means all.
    pub includes: Vec<String>,
    /// Extensions to leave out. Wins over `includes`.
    pub excludes: Vec<String>,
    /// Overall deadline for shutdown cleanup.
    pub shutdown_timeout_secs: u64,
    /// Bounded wait for a single extension's cleanup.
    pub cleanup_timeout_secs: u64,
    pub security: SecurityConfig,
    pub performance: PerformanceConfig,
    /// Per-extension settings passed to `Extension::init`.
    pub extensions: HashMap<String, serde_json::Value>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            shutdown_timeout_secs: defaults::SHUTDOWN_TIMEOUT_SECS,
            cleanup_timeout_secs: defaults::CLEANUP_TIMEOUT_SECS,
            security: SecurityConfig::default(),
            performance: PerformanceConfig::default(),
            extensions: HashMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ExtensionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtensionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::info!(category = "config", path = %path.display(), "Loading extension config");
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(env_vars::PLUGIN_DIR) {
            tracing::info!(category = "config", dir = %dir, "Plugin directory from environment");
            self.security.allowed_paths.push(PathBuf::from(dir));
        }
        if let Some(secs) = lookup(env_vars::SHUTDOWN_TIMEOUT_SECS) {
            self.shutdown_timeout_secs = secs.trim().parse().map_err(|_| {
                ExtensionError::Config(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    env_vars::SHUTDOWN_TIMEOUT_SECS,
                    secs
                ))
            })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.shutdown_timeout_secs == 0 {
            return Err(ExtensionError::Config(
                "shutdown_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.cleanup_timeout_secs == 0 {
            return Err(ExtensionError::Config(
                "cleanup_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.performance.max_cpu_percent > 100 {
            return Err(ExtensionError::Config(format!(
                "max_cpu_percent must be at most 100, got {}",
                self.performance.max_cpu_percent
            )));
        }
        Ok(())
    }

    /// Replace values the runtime cannot work with, logging each change.
    ///
    /// Configs built in code skip [`ManagerConfig::from_toml_str`]'s
    /// validation; the manager runs this on whatever it is given.
    pub fn sanitized(mut self) -> Self {
        if self.shutdown_timeout_secs == 0 {
            tracing::warn!(category = "config", "shutdown_timeout_secs is 0, using default");
            self.shutdown_timeout_secs = defaults::SHUTDOWN_TIMEOUT_SECS;
        }
        if self.cleanup_timeout_secs == 0 {
            tracing::warn!(category = "config", "cleanup_timeout_secs is 0, using default");
            self.cleanup_timeout_secs = defaults::CLEANUP_TIMEOUT_SECS;
        }
        if self.performance.max_cpu_percent > 100 {
            tracing::warn!(
                category = "config",
                max_cpu_percent = self.performance.max_cpu_percent,
                "max_cpu_percent above 100, capped"
            );
            self.performance.max_cpu_percent = 100;
        }
        self
    }

    /// Whether the registry entry `name` should be managed.
    pub fn is_selected(&self, name: &str) -> bool {
        if self.excludes.iter().any(|e| e == name) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|i| i == name)
    }

    /// Settings for one extension, `Null` when none are configured.
    pub fn extension_settings(&self, name: &str) -> serde_json::Value {
        self.extensions
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}
