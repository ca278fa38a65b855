use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body shared by private, group and broadcast messages
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatPayload {
    pub conversation_id: Option<String>,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

/// Read receipt: everything up to `read_id` in the conversation becomes read
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReadPayload {
    pub conversation_id: String,
    #[serde(rename = "readId")]
    pub read_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "private")]
    Private(ChatPayload),
    #[serde(rename = "group")]
    Group(ChatPayload),
    #[serde(rename = "broadcast")]
    Broadcast(ChatPayload),
    #[serde(rename = "updateRead")]
    UpdateRead(ReadPayload),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfirmationMessage {
    pub message_id: String,
    pub connection_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

/// Control envelopes the server emits. Delivered chat messages are sent
/// as the stored [`crate::models::Message`] instead.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "confirmation")]
    Confirmation(ConfirmationMessage),
    #[serde(rename = "broadcast")]
    Broadcast(BroadcastMessage),
}

fn default_message_type() -> String {
    "text".to_string()
}
