pub mod dbchat;
pub mod memory;
pub mod store;

pub use dbchat::PgChatStore;
pub use memory::MemoryChatStore;
pub use store::{ChatStore, StoreError};

use std::sync::Arc;
use tracing::{error, info, warn};

/// Open the configured store, falling back to the in-memory one when no
/// database URL is set or the database cannot be reached.
pub async fn init_store(db_url: Option<&str>) -> Arc<dyn ChatStore> {
    let Some(db_url) = db_url else {
        warn!("No database URL configured - messages are kept in memory only");
        return Arc::new(MemoryChatStore::new());
    };

    match PgChatStore::new(db_url).await {
        Ok(store) => {
            if let Err(e) = store.ensure_schema().await {
                error!("Failed to prepare database schema: {}", e);
            }
            info!("Database initialized successfully");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            warn!("Falling back to in-memory message storage");
            Arc::new(MemoryChatStore::new())
        }
    }
}
