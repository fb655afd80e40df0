//! Plugin-based transport registry
//!
//! Transports register a factory under a type name; the daemon picks one
//! from `TransportConfig` without knowing any implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plclog_core::registry::TransportRegistry;
//! use plclog_core::config::TransportConfig;
//!
//! let registry = TransportRegistry::new();
//! plclog_sim::register(&registry);
//!
//! let transport = registry.create_transport("opc.tcp://127.0.0.2:4840", &TransportConfig::Simulated)?;
//! ```
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! # use plclog_core::registry::TransportRegistry;
//! // In the plclog-sim crate
//! pub fn register(registry: &TransportRegistry) {
//!     registry.register_transport("simulated", Box::new(SimTransportFactory::new(endpoint)));
//! }
//! ```

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::traits::{Transport, TransportFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of transport factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent reads, exclusive writes.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Box<dyn TransportFactory>>>,
}

impl TransportRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport factory
    ///
    /// # Parameters
    ///
    /// - `name`: Transport type name (e.g., "simulated")
    /// - `factory`: Factory object for creating transport instances
    ///
    /// Registering the same name again replaces the previous factory.
    pub fn register_transport(&self, name: impl Into<String>, factory: Box<dyn TransportFactory>) {
        let mut transports = self.transports.write().unwrap_or_else(|e| e.into_inner());
        transports.insert(name.into(), factory);
    }

    /// Create a transport for `endpoint` from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Transport>)`: Created transport instance
    /// - `Err(Error)`: Configuration error if the type is not registered, or
    ///   whatever the factory reports
    pub fn create_transport(
        &self,
        endpoint: &str,
        config: &TransportConfig,
    ) -> Result<Arc<dyn Transport>> {
        let transport_type = config.type_name();
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());

        let factory = transports.get(transport_type).ok_or_else(|| {
            Error::config(format!("Unknown transport type: {}", transport_type))
        })?;

        factory.create(endpoint, config)
    }

    /// List all registered transport types
    pub fn list_transports(&self) -> Vec<String> {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = transports.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a transport type is registered
    pub fn has_transport(&self, name: &str) -> bool {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        transports.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableFactory;

    impl TransportFactory for UnavailableFactory {
        fn create(&self, endpoint: &str, _config: &TransportConfig) -> Result<Arc<dyn Transport>> {
            Err(Error::connection(format!("{} is not available", endpoint)))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = TransportRegistry::new();
        assert!(!registry.has_transport("mock"));

        registry.register_transport("mock", Box::new(UnavailableFactory));

        assert!(registry.has_transport("mock"));
        assert_eq!(registry.list_transports(), vec!["mock".to_string()]);
    }

    #[test]
    fn test_unknown_transport_is_config_error() {
        let registry = TransportRegistry::new();
        let result = registry.create_transport("opc.tcp://localhost:4840", &TransportConfig::Simulated);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_custom_transport_uses_factory_name() {
        let registry = TransportRegistry::new();
        registry.register_transport("mock", Box::new(UnavailableFactory));

        let config = TransportConfig::Custom {
            factory: "mock".to_string(),
            config: serde_json::json!({}),
        };
        let result = registry.create_transport("opc.tcp://localhost:4840", &config);
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
