use std::sync::Arc;

use crate::config::Config;
use crate::db::ChatStore;
use crate::ws::{ConnectionRegistry, ConversationResolver, MessageRouter};

/// Shared by every handler. The registry is built here once per process
/// and handed to the router and the heartbeat monitor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<MessageRouter>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ChatStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let resolver = ConversationResolver::new(store.clone(), config.conversation_cache_ttl());
        let router = Arc::new(MessageRouter::new(registry.clone(), resolver, store));
        Self {
            config: Arc::new(config),
            registry,
            router,
        }
    }
}
