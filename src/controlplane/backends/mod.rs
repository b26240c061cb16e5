//! Orchestrator Backend Adapters
//!
//! Provides implementations of [`OrchestratorClient`]:
//! - OpenSDS: the hotpot REST API
//! - Memory: in-process orchestrator for standalone mode and tests

pub mod memory;
pub mod opensds;

pub use memory::*;
pub use opensds::*;

use crate::domain::ports::OrchestratorClient;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating orchestrator clients
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend client by name
    pub fn create(name: &str, config: BackendConfig) -> Result<Arc<dyn OrchestratorClient>> {
        match name.to_lowercase().as_str() {
            "opensds" | "hotpot" => Ok(Arc::new(OpenSdsClient::new(config.opensds)?)),
            "memory" | "standalone" => Ok(Arc::new(InMemoryOrchestrator::new(config.memory))),
            _ => Err(Error::Configuration(format!("unknown backend: {}", name))),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub opensds: OpenSdsConfig,
    pub memory: InMemoryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory() {
        let backend = BackendFactory::create("memory", BackendConfig::default()).unwrap();
        assert_eq!(backend.backend_name(), "memory");

        let backend = BackendFactory::create("OpenSDS", BackendConfig::default()).unwrap();
        assert_eq!(backend.backend_name(), "opensds");

        assert!(BackendFactory::create("ceph", BackendConfig::default()).is_err());
    }
}
