//! State handed to every route: the gateway and the body size limit.

use std::sync::Arc;

use tracing::info;

use crate::conversation::{ConversationGateway, GatewayConfig, GatewayResult, KvBackend};
use crate::storage::{KeyValueStore, MemoryKvStore, OpendalObjectStore, SqliteKvStore};

/// Shared application state.
pub struct AppState {
    /// Conversation gateway.
    pub gateway: ConversationGateway,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wrap an already-built gateway.
    #[must_use]
    pub fn new(gateway: ConversationGateway, max_upload_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            max_upload_bytes,
        })
    }

    /// Build the stores described by `config` and the gateway over them.
    ///
    /// # Errors
    /// Returns an error if the key-value store cannot be opened.
    pub async fn from_config(config: &GatewayConfig) -> GatewayResult<Arc<Self>> {
        let kv: Arc<dyn KeyValueStore> = match &config.kv.backend {
            KvBackend::Memory => {
                info!("Using in-memory key-value store");
                Arc::new(MemoryKvStore::new())
            }
            KvBackend::Sqlite { path } => {
                info!("Using SQLite key-value store at {}", path.display());
                Arc::new(SqliteKvStore::open(path, &config.kv.table).await?)
            }
        };
        let objects = Arc::new(OpendalObjectStore::new(config.objects.backend.clone()));

        let gateway = ConversationGateway::new(
            kv,
            objects,
            config.objects.bucket.clone(),
            config.append_mode,
        );
        Ok(Self::new(gateway, config.server.max_upload_bytes))
    }
}
