use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Conversation, Message, NewMessage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("conversation already exists: {0}")]
    Conflict(String),

    #[error("duplicate message id: {0}")]
    DuplicateMessage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence the routing core depends on.
///
/// Implementations must make `create_conversation_if_absent` safe under
/// concurrent callers: two racing calls for the same id both return the
/// single stored row.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message and return it with its storage id and `sent` status
    async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError>;

    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Insert the private conversation between two users unless a row with
    /// the same id exists. Participants arrive in canonical order.
    async fn create_conversation_if_absent(
        &self,
        conversation_id: &str,
        participant_a: &str,
        participant_b: &str,
    ) -> Result<Conversation, StoreError>;

    /// Mark every `sent` message of the conversation with `id <= max_id` as read.
    /// Returns the number of rows that changed.
    async fn mark_messages_read_up_to(&self, conversation_id: &str, max_id: i64) -> Result<u64, StoreError>;

    /// Bump `last_message_at` so conversation lists sort by activity
    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError>;
}
