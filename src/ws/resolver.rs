use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{ChatStore, StoreError};
use crate::models::Conversation;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("participant id must not be empty")]
    EmptyParticipant,

    #[error("a private conversation needs two distinct users, got '{0}' twice")]
    SameParticipant(String),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("user '{user}' is not a participant of conversation '{conversation}'")]
    NotParticipant { user: String, conversation: String },

    #[error("conversation id '{0}' belongs to a different pair of users")]
    IdCollision(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Order the pair so `(a, b)` and `(b, a)` yield the same tuple
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Deterministic id of the private conversation between two users
pub fn private_conversation_id(a: &str, b: &str) -> String {
    let (first, second) = canonical_pair(a, b);
    format!("{}_{}", first, second)
}

/// Maps participants to the canonical conversation, creating it on first
/// contact. Conversations never change participants, so resolved rows are
/// cached.
pub struct ConversationResolver {
    store: Arc<dyn ChatStore>,
    cache: Cache<String, Conversation>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ChatStore>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(cache_ttl)
            .build();
        Self { store, cache }
    }

    /// Conversation between `a` and `b`, created if it does not exist yet.
    /// Losing a creation race is not an error: the winner's row is returned.
    pub async fn resolve(&self, a: &str, b: &str) -> Result<Conversation, ResolveError> {
        if a.is_empty() || b.is_empty() {
            return Err(ResolveError::EmptyParticipant);
        }
        if a == b {
            return Err(ResolveError::SameParticipant(a.to_string()));
        }

        let (first, second) = canonical_pair(a, b);
        let conversation_id = private_conversation_id(first, second);

        let conv = match self.cache.get(&conversation_id).await {
            Some(conv) => conv,
            None => {
                let conv = self.fetch_or_create(&conversation_id, first, second).await?;
                self.cache.insert(conversation_id.clone(), conv.clone()).await;
                conv
            }
        };

        // "a_b" + "c" and "a" + "b_c" share an id; never hand out someone else's conversation
        if conv.participant_a.as_deref() != Some(first) || conv.participant_b.as_deref() != Some(second) {
            return Err(ResolveError::IdCollision(conversation_id));
        }

        debug!("Resolved conversation {} for {} and {}", conversation_id, a, b);
        Ok(conv)
    }

    async fn fetch_or_create(&self, conversation_id: &str, first: &str, second: &str) -> Result<Conversation, ResolveError> {
        if let Some(conv) = self.store.find_conversation(conversation_id).await? {
            return Ok(conv);
        }
        match self.store.create_conversation_if_absent(conversation_id, first, second).await {
            Ok(conv) => Ok(conv),
            Err(e) => {
                warn!("Creating conversation {} failed ({}), re-reading", conversation_id, e);
                match self.store.find_conversation(conversation_id).await? {
                    Some(conv) => Ok(conv),
                    None => Err(e.into()),
                }
            }
        }
    }

    /// A group's conversation id is the group id itself
    pub fn resolve_group(&self, group_id: &str) -> String {
        group_id.to_string()
    }

    /// Stored conversation by id
    pub async fn find(&self, conversation_id: &str) -> Result<Conversation, ResolveError> {
        if let Some(conv) = self.cache.get(conversation_id).await {
            return Ok(conv);
        }
        match self.store.find_conversation(conversation_id).await? {
            Some(conv) => {
                self.cache.insert(conversation_id.to_string(), conv.clone()).await;
                Ok(conv)
            }
            None => Err(ResolveError::NotFound(conversation_id.to_string())),
        }
    }

    /// The other participant of a private conversation
    pub fn counterpart(&self, conv: &Conversation, user_id: &str) -> Result<String, ResolveError> {
        conv.counterpart(user_id)
            .map(str::to_string)
            .ok_or_else(|| ResolveError::NotParticipant {
                user: user_id.to_string(),
                conversation: conv.conversation_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryChatStore;
    use crate::models::{Message, NewMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn resolver(store: Arc<dyn ChatStore>) -> ConversationResolver {
        ConversationResolver::new(store, Duration::from_secs(60))
    }

    #[test]
    fn conversation_id_is_order_independent() {
        assert_eq!(private_conversation_id("alice", "bob"), "alice_bob");
        assert_eq!(private_conversation_id("bob", "alice"), "alice_bob");
    }

    #[tokio::test]
    async fn resolve_is_commutative_and_idempotent() {
        let store = Arc::new(MemoryChatStore::new());
        let resolver = resolver(store.clone());

        let ab = resolver.resolve("A", "B").await.unwrap();
        let ba = resolver.resolve("B", "A").await.unwrap();
        assert_eq!(ab.conversation_id, "A_B");
        assert_eq!(ab, ba);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_contact_creates_one_row() {
        let store = Arc::new(MemoryChatStore::new());
        let resolver = Arc::new(resolver(store.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        resolver.resolve("alice", "bob").await
                    } else {
                        resolver.resolve("bob", "alice").await
                    }
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().conversation_id);
        }
        assert!(ids.iter().all(|id| id == "alice_bob"));
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn rejects_degenerate_pairs() {
        let resolver = resolver(Arc::new(MemoryChatStore::new()));
        assert!(matches!(resolver.resolve("a", "a").await, Err(ResolveError::SameParticipant(_))));
        assert!(matches!(resolver.resolve("", "a").await, Err(ResolveError::EmptyParticipant)));
    }

    #[tokio::test]
    async fn colliding_ids_are_refused() {
        let store = Arc::new(MemoryChatStore::new());
        let resolver = resolver(store.clone());
        resolver.resolve("a_b", "c").await.unwrap();
        assert!(matches!(resolver.resolve("a", "b_c").await, Err(ResolveError::IdCollision(_))));
    }

    #[tokio::test]
    async fn group_resolution_is_identity() {
        let resolver = resolver(Arc::new(MemoryChatStore::new()));
        assert_eq!(resolver.resolve_group("team-42"), "team-42");
    }

    #[tokio::test]
    async fn find_and_counterpart() {
        let store = Arc::new(MemoryChatStore::new());
        let resolver = resolver(store.clone());
        resolver.resolve("A", "B").await.unwrap();

        let conv = resolver.find("A_B").await.unwrap();
        assert_eq!(resolver.counterpart(&conv, "A").unwrap(), "B");
        assert!(matches!(resolver.counterpart(&conv, "C"), Err(ResolveError::NotParticipant { .. })));
        assert!(matches!(resolver.find("missing").await, Err(ResolveError::NotFound(_))));
    }

    /// Behaves like a database that lost the insert race: the first read
    /// misses, the insert hits a uniqueness conflict.
    struct RacingStore {
        inner: MemoryChatStore,
        stale_read: AtomicBool,
    }

    #[async_trait]
    impl ChatStore for RacingStore {
        async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError> {
            self.inner.create_message(msg).await
        }

        async fn find_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
            if self.stale_read.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_conversation(conversation_id).await
        }

        async fn create_conversation_if_absent(
            &self,
            conversation_id: &str,
            _participant_a: &str,
            _participant_b: &str,
        ) -> Result<Conversation, StoreError> {
            Err(StoreError::Conflict(conversation_id.to_string()))
        }

        async fn mark_messages_read_up_to(&self, conversation_id: &str, max_id: i64) -> Result<u64, StoreError> {
            self.inner.mark_messages_read_up_to(conversation_id, max_id).await
        }

        async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
            self.inner.touch_conversation(conversation_id).await
        }

        async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
            self.inner.group_members(group_id).await
        }
    }

    #[tokio::test]
    async fn losing_the_creation_race_returns_the_winner() {
        let inner = MemoryChatStore::new();
        let winner = inner.create_conversation_if_absent("A_B", "A", "B").await.unwrap();
        let store = Arc::new(RacingStore {
            inner,
            stale_read: AtomicBool::new(true),
        });

        let resolved = resolver(store).resolve("B", "A").await.unwrap();
        assert_eq!(resolved, winner);
    }
}
