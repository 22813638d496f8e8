//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use cirrus_shared::{Config, Notifier};
use cirrus_storage::{MemoryObjectStore, NodeObjectStore, ObjectStore, StorageService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub storage: Arc<StorageService>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store = build_object_store(&config);
        let notifier = Notifier::new(pool.clone());
        let storage = Arc::new(StorageService::new(pool.clone(), store, notifier.clone()));

        Self {
            pool,
            config,
            storage,
            notifier,
        }
    }
}

/// Pick the object-store backend. `memory://` keeps everything in-process
/// for local development; anything else is treated as a storage-node
/// gateway URL.
pub fn build_object_store(config: &Config) -> Arc<dyn ObjectStore> {
    if config.storage_node_url.starts_with("memory://") {
        tracing::warn!("Using in-memory object store - data will not survive a restart");
        Arc::new(MemoryObjectStore::new())
    } else {
        tracing::info!(url = %config.storage_node_url, "Storage-node object store configured");
        Arc::new(NodeObjectStore::new(
            &config.storage_node_url,
            &config.storage_node_token,
            &config.presign_secret,
        ))
    }
}
