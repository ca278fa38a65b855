use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::store::{ChatStore, StoreError};
use crate::models::{Conversation, Message, MessageStatus, NewMessage};

#[derive(Default)]
struct Tables {
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    next_id: i64,
    group_members: HashMap<String, Vec<String>>,
}

/// In-process store used when no database is configured, and by tests.
/// A single mutex serializes every operation, which is what makes
/// conversation creation race free here.
#[derive(Default)]
pub struct MemoryChatStore {
    tables: Mutex<Tables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_group_member(&self, group_id: &str, user_id: &str) {
        let mut tables = self.tables();
        let members = tables.group_members.entry(group_id.to_string()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
    }

    pub fn messages_in(&self, conversation_id: &str) -> Vec<Message> {
        self.tables()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn conversation_count(&self) -> usize {
        self.tables().conversations.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables();
        if tables.messages.iter().any(|m| m.message_id == msg.message_id) {
            return Err(StoreError::DuplicateMessage(msg.message_id));
        }
        tables.next_id += 1;
        let stored = Message::from_new(tables.next_id, msg);
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.tables().conversations.get(conversation_id).cloned())
    }

    async fn create_conversation_if_absent(
        &self,
        conversation_id: &str,
        participant_a: &str,
        participant_b: &str,
    ) -> Result<Conversation, StoreError> {
        let mut tables = self.tables();
        let conv = tables
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Conversation::private(
                    conversation_id.to_string(),
                    participant_a.to_string(),
                    participant_b.to_string(),
                )
            });
        Ok(conv.clone())
    }

    async fn mark_messages_read_up_to(&self, conversation_id: &str, max_id: i64) -> Result<u64, StoreError> {
        let mut updated = 0;
        for msg in self.tables().messages.iter_mut() {
            if msg.conversation_id == conversation_id && msg.id <= max_id && msg.status == MessageStatus::Sent {
                msg.status = MessageStatus::Read;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        if let Some(conv) = self.tables().conversations.get_mut(conversation_id) {
            conv.last_message_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.tables().group_members.get(group_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatKind;

    fn new_message(conversation_id: &str, message_id: &str) -> NewMessage {
        NewMessage {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "a".to_string(),
            receiver_id: Some("b".to_string()),
            group_id: None,
            kind: ChatKind::Private,
            content: "hello".to_string(),
            message_type: "text".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ids_increase_and_status_starts_sent() {
        let store = MemoryChatStore::new();
        let first = store.create_message(new_message("a_b", "m1")).await.unwrap();
        let second = store.create_message(new_message("a_b", "m2")).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let store = MemoryChatStore::new();
        store.create_message(new_message("a_b", "m1")).await.unwrap();
        let err = store.create_message(new_message("a_b", "m1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMessage(_)));
    }

    #[tokio::test]
    async fn create_if_absent_keeps_the_first_row() {
        let store = MemoryChatStore::new();
        let first = store.create_conversation_if_absent("a_b", "a", "b").await.unwrap();
        let again = store.create_conversation_if_absent("a_b", "a", "b").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn read_watermark_only_touches_older_messages_of_that_conversation() {
        let store = MemoryChatStore::new();
        let m1 = store.create_message(new_message("a_b", "m1")).await.unwrap();
        let _other = store.create_message(new_message("a_c", "m2")).await.unwrap();
        let m3 = store.create_message(new_message("a_b", "m3")).await.unwrap();

        let updated = store.mark_messages_read_up_to("a_b", m1.id).await.unwrap();
        assert_eq!(updated, 1);

        let msgs = store.messages_in("a_b");
        assert_eq!(msgs.iter().find(|m| m.id == m1.id).unwrap().status, MessageStatus::Read);
        assert_eq!(msgs.iter().find(|m| m.id == m3.id).unwrap().status, MessageStatus::Sent);
        assert_eq!(store.messages_in("a_c")[0].status, MessageStatus::Sent);

        // Already read rows do not count twice
        assert_eq!(store.mark_messages_read_up_to("a_b", m1.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_members_are_deduplicated() {
        let store = MemoryChatStore::new();
        store.add_group_member("g", "a");
        store.add_group_member("g", "a");
        store.add_group_member("g", "b");
        assert_eq!(store.group_members("g").await.unwrap(), vec!["a", "b"]);
        assert!(store.group_members("unknown").await.unwrap().is_empty());
    }
}
