//! Loaders that turn a validated plugin artifact into an extension.
//!
//! # Native plugin exports
//!
//! A native plugin (.so/.dylib/.dll) must export:
//! - `extkit_extension_abi_version()` -> u32 (must equal [`ABI_VERSION`])
//! - `extkit_extension_create()` -> `*mut Box<dyn Extension>`
//!
//! The plugin must be built with the same compiler and `extkit-core`
//! version as the host.

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use std::path::Path;

use crate::error::{ExtensionError, Result};
use crate::extension::Extension;

/// ABI version for dynamic loading
pub const ABI_VERSION: u32 = 1;

const ABI_VERSION_SYMBOL: &[u8] = b"extkit_extension_abi_version";
const CREATE_SYMBOL: &[u8] = b"extkit_extension_create";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type CreateFn = unsafe extern "C" fn() -> *mut Box<dyn Extension>;

/// Turns a plugin artifact into an extension instance.
pub trait PluginLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Extension>>;
}

/// Check if a file is a native plugin for any platform.
pub fn is_native_plugin(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| matches!(ext, "so" | "dylib" | "dll"))
        .unwrap_or(false)
}

/// Loader for native plugins.
pub struct NativePluginLoader {
    /// Loaded library handles (kept alive to prevent unloading)
    libraries: Mutex<Vec<Library>>,
}

impl NativePluginLoader {
    pub fn new() -> Self {
        Self {
            libraries: Mutex::new(Vec::new()),
        }
    }

    /// Number of libraries currently held open.
    pub fn loaded_count(&self) -> usize {
        self.libraries.lock().len()
    }
}

impl Default for NativePluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader for NativePluginLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Extension>> {
        if !path.is_file() {
            return Err(ExtensionError::NotFound(path.display().to_string()));
        }
        if !is_native_plugin(path) {
            return Err(ExtensionError::LoadFailed(format!(
                "not a native library: {}",
                path.display()
            )));
        }

        // SAFETY: the artifact passed sandbox validation; running its
        // initializers is the point of loading it.
        let library = unsafe { Library::new(path) }
            .map_err(|e| ExtensionError::LoadFailed(format!("{}: {}", path.display(), e)))?;

        let extension = {
            // SAFETY: symbol signatures are fixed by the plugin ABI above.
            let abi_version: Symbol<AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
                .map_err(|e| ExtensionError::LoadFailed(format!("missing ABI version symbol: {}", e)))?;
            let got = unsafe { abi_version() };
            if got != ABI_VERSION {
                return Err(ExtensionError::IncompatibleVersion {
                    expected: ABI_VERSION,
                    got,
                });
            }

            let create: Symbol<CreateFn> = unsafe { library.get(CREATE_SYMBOL) }
                .map_err(|e| ExtensionError::LoadFailed(format!("missing create symbol: {}", e)))?;
            let raw = unsafe { create() };
            if raw.is_null() {
                return Err(ExtensionError::LoadFailed(format!(
                    "{} returned a null extension",
                    path.display()
                )));
            }
            // SAFETY: the plugin hands over ownership of a boxed extension.
            unsafe { *Box::from_raw(raw) }
        };

        tracing::info!(path = %path.display(), extension = %extension.name(), "Native plugin loaded");
        self.libraries.lock().push(library);
        Ok(extension)
    }
}
