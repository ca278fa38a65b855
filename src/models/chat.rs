use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Delivery status of a stored message. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(MessageStatus::Sent),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

/// Whether a message or conversation is two-party or group scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

/// A conversation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub participant_a: Option<String>,
    pub participant_b: Option<String>,
    pub group_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Build a private conversation; participants must already be in canonical order
    pub fn private(conversation_id: String, participant_a: String, participant_b: String) -> Self {
        Self {
            conversation_id,
            kind: ChatKind::Private,
            participant_a: Some(participant_a),
            participant_b: Some(participant_b),
            group_id: None,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_a.as_deref() == Some(user_id) || self.participant_b.as_deref() == Some(user_id)
    }

    /// The participant that is not `user_id`
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        match (self.participant_a.as_deref(), self.participant_b.as_deref()) {
            (Some(a), Some(b)) if a == user_id => Some(b),
            (Some(a), Some(b)) if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// A message about to be persisted. Storage assigns the numeric id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub kind: ChatKind,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted message, serialized verbatim to recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: i64,
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub content: String,
    pub message_type: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_new(id: i64, new: NewMessage) -> Self {
        Self {
            id,
            message_id: new.message_id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            group_id: new.group_id,
            kind: new.kind,
            content: new.content,
            message_type: new.message_type,
            status: MessageStatus::Sent,
            created_at: new.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_is_the_other_participant() {
        let conv = Conversation::private("a_b".into(), "a".into(), "b".into());
        assert_eq!(conv.counterpart("a"), Some("b"));
        assert_eq!(conv.counterpart("b"), Some("a"));
        assert_eq!(conv.counterpart("c"), None);
        assert!(conv.has_participant("a"));
        assert!(!conv.has_participant("c"));
    }

    #[test]
    fn status_only_orders_forward() {
        assert!(MessageStatus::Sent < MessageStatus::Read);
        assert_eq!(MessageStatus::parse("read"), Some(MessageStatus::Read));
        assert_eq!(MessageStatus::parse("bogus"), None);
    }

    #[test]
    fn message_serializes_with_wire_names() {
        let msg = Message::from_new(
            7,
            NewMessage {
                message_id: "m-1".into(),
                conversation_id: "a_b".into(),
                sender_id: "a".into(),
                receiver_id: Some("b".into()),
                group_id: None,
                kind: ChatKind::Private,
                content: "hi".into(),
                message_type: "text".into(),
                created_at: Utc::now(),
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "private");
        assert_eq!(json["status"], "sent");
        assert_eq!(json["receiver_id"], "b");
        assert!(json.get("group_id").is_none());
    }
}
