//! Error types for the extension runtime.
//!
//! Every failure the runtime can report is a distinct variant so callers can
//! match on it. [`ExtensionError::category`] groups the variants into the
//! handling classes the manager cares about (abort startup, refuse a single
//! load, report to the caller).

use std::path::PathBuf;

/// Broad handling class of an [`ExtensionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Duplicate names, unresolved dependencies, cycles, bad config.
    Configuration,
    /// An extension's `init`/`post_init` failed.
    Lifecycle,
    /// Path, source or signature validation failed.
    Security,
    /// A resource ceiling would be exceeded.
    Resource,
    /// Extension or cross-service lookup failed.
    Lookup,
    /// Cleanup failed or ran out of time.
    Cleanup,
    /// Anything else (I/O, loader, serialization).
    Other,
}

/// Lifecycle phase an extension was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    PreInit,
    Init,
    PostInit,
    PreCleanup,
    Cleanup,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreInit => write!(f, "pre_init"),
            Self::Init => write!(f, "init"),
            Self::PostInit => write!(f, "post_init"),
            Self::PreCleanup => write!(f, "pre_cleanup"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// A dependency named by an extension that no registered extension provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub extension: String,
    pub dependency: String,
}

impl std::fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.extension, self.dependency)
    }
}

/// Extension runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Extension already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Missing dependencies: {}", join(.0))]
    MissingDependencies(Vec<MissingDependency>),

    #[error("Dependency cycle detected among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Extension '{extension}' failed during {phase}: {source}")]
    Lifecycle {
        extension: String,
        phase: LifecyclePhase,
        #[source]
        source: Box<ExtensionError>,
    },

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Cross service not found: {0}")]
    ServiceNotFound(String),

    #[error("Cross service '{key}' is not a {expected}")]
    ServiceTypeMismatch { key: String, expected: &'static str },

    #[error("Plugin path not allowed: {0}")]
    PathNotAllowed(PathBuf),

    #[error("Plugin file extension is blocked: {0}")]
    BlockedExtension(String),

    #[error("Plugin source is not trusted: {0}")]
    UntrustedSource(String),

    #[error("Signature not found: {0}")]
    SignatureNotFound(PathBuf),

    #[error("Invalid signature file {path}: {reason}")]
    InvalidSignature { path: PathBuf, reason: String },

    #[error("Signature mismatch for {path}: expected {expected}, got {actual}")]
    SignatureMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Resource limit exceeded: {resource} would reach {projected:.1} (limit {limit})")]
    ResourceLimitExceeded {
        resource: &'static str,
        projected: f64,
        limit: f64,
    },

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Incompatible ABI version: expected {expected}, got {got}")]
    IncompatibleVersion { expected: u32, got: u32 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Extension '{extension}' is required by active extensions: {}", .dependents.join(", "))]
    DependentsActive {
        extension: String,
        dependents: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other: {0}")]
    Other(String),
}

/// Result type for extension operations
pub type Result<T> = std::result::Result<T, ExtensionError>;

impl ExtensionError {
    /// Wrap an error returned by an extension hook with the extension's name.
    pub fn lifecycle(extension: impl Into<String>, phase: LifecyclePhase, source: Self) -> Self {
        Self::Lifecycle {
            extension: extension.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Map the error onto its handling class.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyRegistered(_)
            | Self::MissingDependencies(_)
            | Self::DependencyCycle(_)
            | Self::DependentsActive { .. }
            | Self::Config(_) => ErrorCategory::Configuration,
            Self::Lifecycle { phase, .. } => match phase {
                LifecyclePhase::PreCleanup | LifecyclePhase::Cleanup => ErrorCategory::Cleanup,
                _ => ErrorCategory::Lifecycle,
            },
            Self::PathNotAllowed(_)
            | Self::BlockedExtension(_)
            | Self::UntrustedSource(_)
            | Self::SignatureNotFound(_)
            | Self::InvalidSignature { .. }
            | Self::SignatureMismatch { .. } => ErrorCategory::Security,
            Self::ResourceLimitExceeded { .. } => ErrorCategory::Resource,
            Self::NotFound(_) | Self::ServiceNotFound(_) | Self::ServiceTypeMismatch { .. } => {
                ErrorCategory::Lookup
            }
            Self::Timeout(_) => ErrorCategory::Cleanup,
            Self::LoadFailed(_)
            | Self::IncompatibleVersion { .. }
            | Self::InvalidState(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error refuses a load without affecting running extensions.
    pub fn is_security(&self) -> bool {
        self.category() == ErrorCategory::Security
    }
}

fn join(missing: &[MissingDependency]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
