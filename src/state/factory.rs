use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{InMemoryStore, SledStore, TopologyStore};
use std::sync::Arc;

/// Create a topology store based on configuration
pub fn create_store(config: &StateConfig) -> Result<Arc<dyn TopologyStore>> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            let store = SledStore::new(path)?;
            Ok(Arc::new(store))
        }

        StateBackend::Memory => Ok(create_in_memory_store()),
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn TopologyStore> {
    tracing::info!("Initializing in-memory storage backend");
    Arc::new(InMemoryStore::new())
}
