//! Cross-service registry.
//!
//! Extensions publish services under a composite `"<namespace>.<Name>"` key
//! and look up each other's services without compile-time coupling. Values
//! are stored type-erased; [`CrossServiceRegistry::get`] downcasts to the
//! caller's type and reports a mismatch as an error rather than panicking.
//!
//! Reads dominate once startup is over, so the map sits behind a
//! reader/writer lock. Writes replace any previous value for the key.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExtensionError, Result};
use crate::extension::ServiceHandle;

/// Build the composite registry key for `namespace` and `name`.
pub fn service_key(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// Concurrent key → service map shared by all extensions.
#[derive(Default)]
pub struct CrossServiceRegistry {
    services: RwLock<HashMap<String, ServiceHandle>>,
}

impl CrossServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an already type-erased handle. Last writer wins.
    pub fn register_handle(&self, key: impl Into<String>, service: ServiceHandle) {
        let key = key.into();
        let replaced = self.services.write().insert(key.clone(), service).is_some();
        if replaced {
            tracing::debug!(key = %key, "Cross service replaced");
        } else {
            tracing::debug!(key = %key, "Cross service registered");
        }
    }

    /// Publish `service` under `key`. Last writer wins.
    pub fn register<T>(&self, key: impl Into<String>, service: T)
    where
        T: Any + Send + Sync,
    {
        self.register_handle(key, Arc::new(service));
    }

    /// Look up the raw handle for `namespace.name`.
    pub fn get_handle(&self, namespace: &str, name: &str) -> Result<ServiceHandle> {
        let key = service_key(namespace, name);
        self.services
            .read()
            .get(&key)
            .cloned()
            .ok_or(ExtensionError::ServiceNotFound(key))
    }

    /// Look up `namespace.name` as a `T`.
    ///
    /// Publish trait objects as `Arc<dyn Trait>` and request the same type
    /// back; the stored value is cloned out.
    pub fn get<T>(&self, namespace: &str, name: &str) -> Result<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let handle = self.get_handle(namespace, name)?;
        handle
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ExtensionError::ServiceTypeMismatch {
                key: service_key(namespace, name),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.services
            .read()
            .contains_key(&service_key(namespace, name))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.services.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Drop one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.services.write().remove(key).is_some()
    }

    /// Drop every entry. Only used on full shutdown.
    pub fn clear(&self) {
        self.services.write().clear();
    }
}

impl std::fmt::Debug for CrossServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossServiceRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_round_trip_identity() {
        let registry = CrossServiceRegistry::new();
        let svc: Arc<dyn Greeter> = Arc::new(English);
        registry.register("ns.Foo", svc.clone());

        let found: Arc<dyn Greeter> = registry.get("ns", "Foo").unwrap();
        assert!(Arc::ptr_eq(&found, &svc));
        assert_eq!(found.greet(), "hello");
    }

    #[test]
    fn test_handle_round_trip_identity() {
        let registry = CrossServiceRegistry::new();
        let handle: ServiceHandle = Arc::new(42u32);
        registry.register_handle("ns.Answer", handle.clone());

        let found = registry.get_handle("ns", "Answer").unwrap();
        assert!(Arc::ptr_eq(&found, &handle));
    }

    #[test]
    fn test_remove_single_key() {
        let registry = CrossServiceRegistry::new();
        registry.register("ns.Keep", 1u32);
        registry.register("ns.Drop", 2u32);

        assert!(registry.remove("ns.Drop"));
        assert!(!registry.remove("ns.Drop"));
        assert!(!registry.contains("ns", "Drop"));
        assert_eq!(registry.get::<u32>("ns", "Keep").unwrap(), 1);
    }

    #[test]
    fn test_missing_is_not_found() {
        let registry = CrossServiceRegistry::new();
        match registry.get::<u32>("ns", "Missing") {
            Err(ExtensionError::ServiceNotFound(key)) => assert_eq!(key, "ns.Missing"),
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_type_is_error() {
        let registry = CrossServiceRegistry::new();
        registry.register("ns.Count", 7u64);

        let result = registry.get::<String>("ns", "Count");
        assert!(matches!(
            result,
            Err(ExtensionError::ServiceTypeMismatch { ref key, .. }) if key == "ns.Count"
        ));
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = CrossServiceRegistry::new();
        registry.register("auth.Provider", "stub".to_string());
        registry.register("auth.Provider", "concrete".to_string());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<String>("auth", "Provider").unwrap(), "concrete");
    }

    #[test]
    fn test_clear() {
        let registry = CrossServiceRegistry::new();
        registry.register("a.One", 1i32);
        registry.register("b.Two", 2i32);
        assert_eq!(registry.keys(), vec!["a.One", "b.Two"]);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("a", "One"));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(CrossServiceRegistry::new());
        registry.register("ns.Counter", 0usize);

        let handles: Vec<_> = (0..8usize)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i == 0 {
                            registry.register("ns.Counter", i);
                        } else {
                            assert!(registry.get::<usize>("ns", "Counter").is_ok());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.contains("ns", "Counter"));
    }
}
