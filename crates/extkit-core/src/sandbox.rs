//! Pre-load validation for dynamically loaded plugins.
//!
//! Checks run in a fixed order and the first failure refuses the load:
//!
//! 1. path: absolute, normalised, not a blocked file type, inside an
//!    allowed directory when any are configured
//! 2. source: contains one of the trusted source markers when any are
//!    configured
//! 3. signature: `<artifact>.sig` holds the SHA-256 of the artifact
//!
//! A signature file is plain text containing exactly one 64 character
//! lowercase hex digest, optionally surrounded by whitespace.

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use crate::config::SecurityConfig;
use crate::error::{ExtensionError, Result};

/// Suffix appended to an artifact's file name to find its signature.
pub const SIGNATURE_SUFFIX: &str = ".sig";

const DIGEST_HEX_LEN: usize = 64;

/// Path of the signature file that authenticates `artifact`.
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(SIGNATURE_SUFFIX);
    PathBuf::from(name)
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn compute_digest(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write `<path>.sig` for the artifact at `path`, returning the digest.
pub fn sign_plugin(path: &Path) -> Result<String> {
    let digest = compute_digest(path)?;
    let sig_path = signature_path(path);
    std::fs::write(&sig_path, format!("{}\n", digest))?;
    tracing::info!(path = %path.display(), signature = %sig_path.display(), "Plugin signed");
    Ok(digest)
}

fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalised form of `path`; symlinks resolved when it exists.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let normalized = normalize_lexically(&absolute);
    Ok(normalized.canonicalize().unwrap_or(normalized))
}

/// Validates plugin artifacts against a [`SecurityConfig`].
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SecurityConfig,
}

impl Sandbox {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Run every configured check in order. Returns the resolved path.
    pub fn validate(&self, path: &Path, source: &str) -> Result<PathBuf> {
        if !self.config.enable_sandbox {
            tracing::warn!(
                category = "security",
                path = %path.display(),
                "Sandbox disabled, plugin checks skipped"
            );
            return resolve(path);
        }

        let resolved = self.validate_plugin_path(path)?;
        self.validate_plugin_source(source)?;
        if self.config.require_signature {
            self.validate_plugin_signature(&resolved)?;
        } else {
            tracing::warn!(
                category = "security",
                path = %resolved.display(),
                "Signature not required, signature check skipped"
            );
        }
        Ok(resolved)
    }

    /// Resolve `path` and check it against the blocked file types and the
    /// allowed directories.
    pub fn validate_plugin_path(&self, path: &Path) -> Result<PathBuf> {
        let resolved = resolve(path)?;

        if let Some(ext) = resolved.extension().and_then(|e| e.to_str()) {
            let blocked = self.config.blocked_extensions.iter().any(|b| {
                b.trim_start_matches('.').eq_ignore_ascii_case(ext)
            });
            if blocked {
                return Err(ExtensionError::BlockedExtension(ext.to_string()));
            }
        }

        if !self.config.allowed_paths.is_empty() {
            let allowed = self
                .config
                .allowed_paths
                .iter()
                .filter_map(|dir| resolve(dir).ok())
                .any(|dir| resolved.starts_with(dir));
            if !allowed {
                return Err(ExtensionError::PathNotAllowed(resolved));
            }
        }

        Ok(resolved)
    }

    /// Check `source` against the trusted source markers.
    pub fn validate_plugin_source(&self, source: &str) -> Result<()> {
        if self.config.trusted_sources.is_empty() {
            return Ok(());
        }
        let trusted = !source.is_empty()
            && self
                .config
                .trusted_sources
                .iter()
                .any(|t| !t.is_empty() && source.contains(t.as_str()));
        if trusted {
            Ok(())
        } else {
            Err(ExtensionError::UntrustedSource(source.to_string()))
        }
    }

    /// Compare the artifact's digest with the one stored next to it.
    pub fn validate_plugin_signature(&self, path: &Path) -> Result<()> {
        if self.config.allow_unsafe {
            tracing::warn!(
                category = "security",
                path = %path.display(),
                "allow_unsafe set, signature verification bypassed"
            );
            return Ok(());
        }

        let sig_path = signature_path(path);
        let stored = match std::fs::read_to_string(&sig_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtensionError::SignatureNotFound(sig_path));
            }
            Err(e) => return Err(e.into()),
        };

        let expected = stored.trim();
        if !is_valid_digest(expected) {
            return Err(ExtensionError::InvalidSignature {
                path: sig_path,
                reason: format!("expected {} lowercase hex characters", DIGEST_HEX_LEN),
            });
        }

        let actual = compute_digest(path)?;
        if actual != expected {
            return Err(ExtensionError::SignatureMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }

        tracing::debug!(category = "security", path = %path.display(), "Plugin signature verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_path_appends_suffix() {
        assert_eq!(
            signature_path(Path::new("/opt/plugins/libtask.so")),
            PathBuf::from("/opt/plugins/libtask.so.sig")
        );
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/opt/plugins/../etc/./passwd")),
            PathBuf::from("/opt/etc/passwd")
        );
        assert_eq!(
            normalize_lexically(Path::new("/../..")),
            PathBuf::from("/")
        );
    }

    #[test]
    fn test_digest_format() {
        assert!(is_valid_digest(&"a".repeat(64)));
        assert!(!is_valid_digest(&"A".repeat(64)));
        assert!(!is_valid_digest(&"a".repeat(63)));
        assert!(!is_valid_digest(&"g".repeat(64)));
    }

    #[test]
    fn test_blocked_extension_is_case_insensitive() {
        let sandbox = Sandbox::new(SecurityConfig::default().with_blocked_extensions([".EXE"]));
        assert!(matches!(
            sandbox.validate_plugin_path(Path::new("/tmp/tool.exe")),
            Err(ExtensionError::BlockedExtension(_))
        ));
        assert!(sandbox.validate_plugin_path(Path::new("/tmp/tool.so")).is_ok());
    }

    #[test]
    fn test_traversal_out_of_allowed_dir() {
        let sandbox =
            Sandbox::new(SecurityConfig::default().with_allowed_paths(["/nonexistent/plugins"]));
        assert!(sandbox
            .validate_plugin_path(Path::new("/nonexistent/plugins/a.so"))
            .is_ok());
        assert!(matches!(
            sandbox.validate_plugin_path(Path::new("/nonexistent/plugins/../secrets/a.so")),
            Err(ExtensionError::PathNotAllowed(_))
        ));
        assert!(matches!(
            sandbox.validate_plugin_path(Path::new("/nonexistent/plugins-evil/a.so")),
            Err(ExtensionError::PathNotAllowed(_))
        ));
    }

    #[test]
    fn test_source_check() {
        let open = Sandbox::new(SecurityConfig::default());
        assert!(open.validate_plugin_source("").is_ok());

        let sandbox =
            Sandbox::new(SecurityConfig::default().with_trusted_sources(["github.com/acme"]));
        assert!(sandbox
            .validate_plugin_source("https://github.com/acme/task-plugin")
            .is_ok());
        assert!(matches!(
            sandbox.validate_plugin_source("https://example.org/evil"),
            Err(ExtensionError::UntrustedSource(_))
        ));
        assert!(matches!(
            sandbox.validate_plugin_source(""),
            Err(ExtensionError::UntrustedSource(_))
        ));
    }
}
