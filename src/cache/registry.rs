//! Cache provider registry
//!
//! Holds at most one active provider at a time. Registering a new provider
//! replaces the active one (last-write-wins, no multi-provider fan-out).
//! Absence of a provider is a fully supported state: `active()` returning
//! `None` means "operate directly against the store", never an error.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::CacheProvider;

#[derive(Default)]
struct RegistryInner {
    providers: HashMap<String, Arc<dyn CacheProvider>>,
    active: Option<String>,
}

/// Process-wide cache provider registry, constructed once at startup and
/// injected into every manager that needs cache access.
#[derive(Default)]
pub struct CacheRegistry {
    inner: RwLock<RegistryInner>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `name` and make it the sole active one
    pub fn register(&self, name: &str, provider: Arc<dyn CacheProvider>) {
        let mut inner = self.inner.write();
        inner.providers.insert(name.to_string(), provider);
        inner.active = Some(name.to_string());
        info!(provider = name, "Registered cache provider");
    }

    /// The active provider, or None when the system runs store-only
    pub fn active(&self) -> Option<Arc<dyn CacheProvider>> {
        let inner = self.inner.read();
        inner
            .active
            .as_ref()
            .and_then(|name| inner.providers.get(name))
            .cloned()
    }

    /// Remove a provider; if it was active, active becomes None
    pub fn unregister(&self, name: &str) {
        let mut inner = self.inner.write();
        if inner.providers.remove(name).is_some() {
            if inner.active.as_deref() == Some(name) {
                inner.active = None;
            }
            info!(provider = name, "Unregistered cache provider");
        }
    }

    /// Snapshot copy of the registry for introspection; mutating the
    /// returned map does not affect the registry
    pub fn list_registered(&self) -> HashMap<String, Arc<dyn CacheProvider>> {
        self.inner.read().providers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheProvider;

    #[test]
    fn test_empty_registry_has_no_active() {
        let registry = CacheRegistry::new();
        assert!(registry.active().is_none());
        assert!(registry.list_registered().is_empty());
    }

    #[test]
    fn test_last_registered_wins() {
        let registry = CacheRegistry::new();
        registry.register("first", Arc::new(MemoryCacheProvider::new()));
        registry.register("second", Arc::new(MemoryCacheProvider::new()));

        assert_eq!(registry.list_registered().len(), 2);
        // Active is the most recently registered
        let active = registry.active().unwrap();
        let second = registry.list_registered().remove("second").unwrap();
        assert!(Arc::ptr_eq(&active, &second));
    }

    #[test]
    fn test_unregister_active_clears_active() {
        let registry = CacheRegistry::new();
        registry.register("redis", Arc::new(MemoryCacheProvider::new()));
        registry.unregister("redis");
        assert!(registry.active().is_none());
        assert!(registry.list_registered().is_empty());
    }

    #[test]
    fn test_unregister_inactive_keeps_active() {
        let registry = CacheRegistry::new();
        registry.register("a", Arc::new(MemoryCacheProvider::new()));
        registry.register("b", Arc::new(MemoryCacheProvider::new()));
        registry.unregister("a");
        assert!(registry.active().is_some());
        assert_eq!(registry.list_registered().len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = CacheRegistry::new();
        registry.register("only", Arc::new(MemoryCacheProvider::new()));
        let mut snapshot = registry.list_registered();
        snapshot.clear();
        assert_eq!(registry.list_registered().len(), 1);
    }
}
