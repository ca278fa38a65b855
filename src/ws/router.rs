use axum::extract::ws::Message as WsMessage;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::resolver::{ConversationResolver, ResolveError};
use super::session::Session;
use crate::db::{ChatStore, StoreError};
use crate::models::{
    BroadcastMessage, ChatKind, ChatPayload, ConfirmationMessage, Message, NewMessage, ReadPayload,
    ReceivedMessage, SendMessage,
};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0} message is missing {1}")]
    MissingField(&'static str, &'static str),

    #[error("user '{user}' is not a participant of conversation '{conversation}'")]
    NotParticipant { user: String, conversation: String },

    #[error("group '{0}' has no members")]
    UnknownGroup(String),

    #[error("user '{user}' is not a member of group '{group}'")]
    NotMember { user: String, group: String },

    #[error("cannot route: {0}")]
    Unroutable(ResolveError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl From<ResolveError> for RouteError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Store(e) => RouteError::Store(e),
            ResolveError::NotParticipant { user, conversation } => RouteError::NotParticipant { user, conversation },
            other => RouteError::Unroutable(other),
        }
    }
}

/// What a successfully dispatched frame led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Persisted and confirmed; `delivered` counts recipient sessions that took it
    Delivered { message_id: String, delivered: usize },
    Broadcast { delivered: usize },
    ReadUpdated { updated: u64 },
}

/// Turns inbound frames into storage writes and queued deliveries
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    resolver: ConversationResolver,
    store: Arc<dyn ChatStore>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, resolver: ConversationResolver, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, resolver, store }
    }

    /// Route one text frame received on `origin`.
    ///
    /// Nothing is delivered unless it was persisted first. Errors never
    /// affect the origin's connection; the caller only logs them.
    pub async fn dispatch(&self, origin: &Session, raw: &str) -> Result<RouteOutcome, RouteError> {
        let received: ReceivedMessage = serde_json::from_str(raw)?;
        debug!(user_id = %origin.user_id(), "Routing {:?}", received);

        match received {
            ReceivedMessage::Private(payload) => self.route_private(origin, payload).await,
            ReceivedMessage::Group(payload) => self.route_group(origin, payload).await,
            ReceivedMessage::Broadcast(payload) => Ok(self.route_broadcast(origin, payload)),
            ReceivedMessage::UpdateRead(payload) => self.route_read(origin, payload).await,
        }
    }

    async fn route_private(&self, origin: &Session, payload: ChatPayload) -> Result<RouteOutcome, RouteError> {
        let sender = origin.user_id();
        let conversation = match (payload.conversation_id.as_deref(), payload.receiver_id.as_deref()) {
            (Some(id), _) if !id.is_empty() => self.resolver.find(id).await?,
            (_, Some(receiver)) if !receiver.is_empty() => self.resolver.resolve(sender, receiver).await?,
            _ => return Err(RouteError::MissingField("private", "conversation_id or receiver_id")),
        };

        // Stored participants decide the recipient, not the client's claim
        let receiver = self.resolver.counterpart(&conversation, sender)?;
        if let Some(claimed) = payload.receiver_id.as_deref() {
            if claimed != receiver {
                warn!(
                    user_id = %sender,
                    conversation_id = %conversation.conversation_id,
                    "Ignoring receiver_id {} that does not match the conversation",
                    claimed
                );
            }
        }

        let stored = self
            .persist(NewMessage {
                message_id: Uuid::new_v4().to_string(),
                conversation_id: conversation.conversation_id.clone(),
                sender_id: sender.to_string(),
                receiver_id: Some(receiver.clone()),
                group_id: None,
                kind: ChatKind::Private,
                content: payload.content,
                message_type: payload.message_type,
                created_at: Utc::now(),
            })
            .await?;

        confirm(origin, &stored);
        let delivered = self.deliver(&stored, std::iter::once(receiver.as_str()));
        Ok(RouteOutcome::Delivered {
            message_id: stored.message_id,
            delivered,
        })
    }

    async fn route_group(&self, origin: &Session, payload: ChatPayload) -> Result<RouteOutcome, RouteError> {
        let sender = origin.user_id();
        let group_id = match payload.group_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(RouteError::MissingField("group", "group_id")),
        };

        let members = self.store.group_members(&group_id).await?;
        if members.is_empty() {
            return Err(RouteError::UnknownGroup(group_id));
        }
        if !members.iter().any(|m| m == sender) {
            return Err(RouteError::NotMember {
                user: sender.to_string(),
                group: group_id,
            });
        }

        let stored = self
            .persist(NewMessage {
                message_id: Uuid::new_v4().to_string(),
                conversation_id: self.resolver.resolve_group(&group_id),
                sender_id: sender.to_string(),
                receiver_id: None,
                group_id: Some(group_id),
                kind: ChatKind::Group,
                content: payload.content,
                message_type: payload.message_type,
                created_at: Utc::now(),
            })
            .await?;

        confirm(origin, &stored);
        let recipients = members.iter().map(String::as_str).filter(|m| *m != sender);
        let delivered = self.deliver(&stored, recipients);
        Ok(RouteOutcome::Delivered {
            message_id: stored.message_id,
            delivered,
        })
    }

    fn route_broadcast(&self, origin: &Session, payload: ChatPayload) -> RouteOutcome {
        let envelope = SendMessage::Broadcast(BroadcastMessage {
            sender_id: origin.user_id().to_string(),
            content: payload.content,
            message_type: payload.message_type,
            created_at: Utc::now(),
        });
        let delivered = match serde_json::to_string(&envelope) {
            Ok(text) => self.registry.broadcast_all(&WsMessage::Text(text)),
            Err(e) => {
                warn!("Failed to serialize broadcast: {}", e);
                0
            }
        };
        info!(user_id = %origin.user_id(), delivered, "Broadcast sent");
        RouteOutcome::Broadcast { delivered }
    }

    async fn route_read(&self, origin: &Session, payload: ReadPayload) -> Result<RouteOutcome, RouteError> {
        if payload.conversation_id.is_empty() {
            return Err(RouteError::MissingField("updateRead", "conversation_id"));
        }

        // Private conversations take receipts from their participants, groups from their members
        let found = self.resolver.find(&payload.conversation_id).await;
        let private = match found {
            Ok(conv) if conv.kind == ChatKind::Private => Some(conv),
            Ok(_) | Err(ResolveError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        match private {
            Some(conv) => {
                if !conv.has_participant(origin.user_id()) {
                    return Err(RouteError::NotParticipant {
                        user: origin.user_id().to_string(),
                        conversation: payload.conversation_id,
                    });
                }
            }
            None => {
                let members = self.store.group_members(&payload.conversation_id).await?;
                if !members.is_empty() && !members.iter().any(|m| m == origin.user_id()) {
                    return Err(RouteError::NotMember {
                        user: origin.user_id().to_string(),
                        group: payload.conversation_id,
                    });
                }
            }
        }

        let updated = self
            .store
            .mark_messages_read_up_to(&payload.conversation_id, payload.read_id)
            .await?;
        debug!(
            user_id = %origin.user_id(),
            conversation_id = %payload.conversation_id,
            read_id = payload.read_id,
            updated,
            "Read watermark applied"
        );
        Ok(RouteOutcome::ReadUpdated { updated })
    }

    async fn persist(&self, msg: NewMessage) -> Result<Message, RouteError> {
        let stored = self.store.create_message(msg).await?;
        if let Err(e) = self.store.touch_conversation(&stored.conversation_id).await {
            // The message is already stored; a stale sort key is not worth dropping it
            warn!(conversation_id = %stored.conversation_id, "Failed to update last_message_at: {}", e);
        }
        Ok(stored)
    }

    /// Queue `msg` on every open session of every recipient. Returns the
    /// number of sessions that accepted it.
    fn deliver<'a>(&self, msg: &Message, recipients: impl Iterator<Item = &'a str>) -> usize {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!(message_id = %msg.message_id, "Failed to serialize message: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for recipient in recipients {
            let sessions = self.registry.lookup(recipient);
            if sessions.is_empty() {
                debug!(message_id = %msg.message_id, "{} is offline", recipient);
                continue;
            }
            for session in sessions {
                match session.enqueue(WsMessage::Text(text.clone())) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(message_id = %msg.message_id, user_id = %recipient, "Delivery failed: {}", e),
                }
            }
        }
        delivered
    }
}

fn confirm(origin: &Session, stored: &Message) {
    let confirmation = SendMessage::Confirmation(ConfirmationMessage {
        message_id: stored.message_id.clone(),
        connection_id: origin.connection_id().to_string(),
    });
    if let Err(e) = origin.enqueue_json(&confirmation) {
        warn!(user_id = %origin.user_id(), "Could not confirm {}: {}", stored.message_id, e);
    }
}
