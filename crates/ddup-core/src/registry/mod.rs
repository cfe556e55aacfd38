//! Named DNS provider instances.
//!
//! Providers are constructed once from configuration at startup and
//! resolved by name when domains are wired up. A domain referencing an
//! unregistered name is a startup error, raised by
//! [`HealthEngine::new`](crate::HealthEngine::new).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::DnsProvider;

/// Registry of named provider instances
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn DnsProvider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider instance under a name, replacing any previous
    /// instance with the same name
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn DnsProvider>) {
        self.providers.write().insert(name.into(), provider);
    }

    /// Resolve a provider by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn DnsProvider>> {
        self.providers.read().get(name).cloned()
    }

    /// Whether a provider with this name is registered
    pub fn has(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    /// Names of all registered providers
    pub fn names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct NullProvider;

    #[async_trait]
    impl DnsProvider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }

        async fn update_records(
            &self,
            _domain: &str,
            _ttl: u32,
            _desired_ips: &[Ipv4Addr],
        ) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_and_resolve() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has("null"));
        assert!(registry.get("null").is_none());

        registry.register("null", Arc::new(NullProvider));

        assert!(registry.has("null"));
        assert_eq!(registry.get("null").unwrap().name(), "null");
        assert_eq!(registry.names(), vec!["null".to_string()]);
    }
}
