//! Plugin-based adapter registry
//!
//! The registry allows remote gateways and lock stores to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grouplock_core::plugins::AdapterRegistry;
//! use grouplock_core::config::GatewayConfig;
//!
//! let registry = AdapterRegistry::new();
//!
//! // Register gateways
//! registry.register_gateway("http", Box::new(http_factory));
//!
//! // Create a gateway from config
//! let config = GatewayConfig::Http { /* ... */ };
//! let gateway = registry.create_gateway(&config)?;
//! ```
//!
//! Adapter crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In grouplock-gateway-http crate
//! pub fn register(registry: &AdapterRegistry) {
//!     registry.register_gateway("http", Box::new(HttpGatewayFactory));
//! }
//! ```

use crate::config::{GatewayConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::traits::{LockStore, LockStoreFactory, RemoteGateway, RemoteGatewayFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry for plugin-based gateway and store creation
///
/// Maintains maps from adapter type names to factory objects, allowing
/// dynamic instantiation based on configuration.
///
/// ## Thread Safety
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct AdapterRegistry {
    /// Registered remote gateway factories
    gateways: RwLock<HashMap<String, Box<dyn RemoteGatewayFactory>>>,

    /// Registered lock store factories
    stores: RwLock<HashMap<String, Arc<dyn LockStoreFactory>>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote gateway factory
    ///
    /// # Parameters
    ///
    /// - `name`: Gateway type name (e.g., "http")
    /// - `factory`: Factory object for creating gateway instances
    pub fn register_gateway(&self, name: impl Into<String>, factory: Box<dyn RemoteGatewayFactory>) {
        let name = name.into();
        let mut gateways = self.gateways.write().unwrap();
        gateways.insert(name, factory);
    }

    /// Register a lock store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn LockStoreFactory>) {
        let name = name.into();
        let mut stores = self.stores.write().unwrap();
        stores.insert(name, Arc::from(factory));
    }

    /// Create a remote gateway from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn RemoteGateway>)`: Created gateway instance
    /// - `Err(Error)`: If the gateway type is not registered or creation
    ///   fails
    pub fn create_gateway(&self, config: &GatewayConfig) -> Result<Arc<dyn RemoteGateway>> {
        let gateway_type = config.type_name();
        let gateways = self.gateways.read().unwrap();

        let factory = gateways
            .get(gateway_type)
            .ok_or_else(|| Error::config(format!("Unknown gateway type: {}", gateway_type)))?;

        factory.create(config)
    }

    /// Create a lock store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn LockStore>)`: Created store instance
    /// - `Err(Error)`: If the store type is not registered or creation
    ///   fails
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn LockStore>> {
        let store_type = config.type_name().to_string();

        let factory = {
            let stores = self.stores.read().unwrap();
            stores
                .get(&store_type)
                .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?
                .clone()
            // Lock released before the async create call.
        };

        factory.create(config).await
    }

    /// List all registered gateway types
    pub fn list_gateways(&self) -> Vec<String> {
        let gateways = self.gateways.read().unwrap();
        gateways.keys().cloned().collect()
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap();
        stores.keys().cloned().collect()
    }

    /// Check if a gateway type is registered
    pub fn has_gateway(&self, name: &str) -> bool {
        let gateways = self.gateways.read().unwrap();
        gateways.contains_key(name)
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap();
        stores.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockGatewayFactory;

    impl RemoteGatewayFactory for MockGatewayFactory {
        fn create(&self, _config: &GatewayConfig) -> Result<Arc<dyn RemoteGateway>> {
            Err(Error::config("mock gateway not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = AdapterRegistry::new();

        // Initially empty
        assert!(!registry.has_gateway("mock"));

        // Register
        registry.register_gateway("mock", Box::new(MockGatewayFactory));

        // Now present
        assert!(registry.has_gateway("mock"));
        assert!(registry.list_gateways().contains(&"mock".to_string()));
    }

    #[test]
    fn test_unknown_gateway_type_errors() {
        let registry = AdapterRegistry::new();
        let config = GatewayConfig::Http {
            base_url: "https://bridge.example".to_string(),
            auth_token: "token".to_string(),
            event_poll_secs: 2,
        };
        let err = registry.create_gateway(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
