use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::session::{CloseReason, Session};

/// Directory of open sessions per user.
///
/// A user can hold several connections at once (tabs, devices). The lock is
/// only ever held for map operations; enqueueing and teardown happen on a
/// snapshot taken under the read lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Vec<Arc<Session>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Arc<Session>>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Arc<Session>>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session bound to this registry and register it
    pub fn open(self: &Arc<Self>, user_id: &str, queue_capacity: usize) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (session, rx) = Session::new(user_id, queue_capacity, Arc::downgrade(self));
        self.register(session.clone());
        (session, rx)
    }

    /// Add a session under its user. A session that already started closing
    /// is not added, so a teardown racing the registration cannot leave a
    /// stale entry behind.
    pub fn register(&self, session: Arc<Session>) {
        let mut sessions = self.write();
        if !session.is_open() {
            debug!(connection_id = %session.connection_id(), "Skipping registration of closed session");
            return;
        }
        let user_sessions = sessions.entry(session.user_id().to_string()).or_default();
        if user_sessions.iter().any(|s| s.connection_id() == session.connection_id()) {
            return;
        }
        user_sessions.push(session.clone());
        info!(
            user_id = %session.user_id(),
            connection_id = %session.connection_id(),
            connections = user_sessions.len(),
            "Connection registered"
        );
    }

    /// Remove exactly this session. Returns `false` when it was not registered.
    pub fn unregister(&self, user_id: &str, session: &Session) -> bool {
        let mut sessions = self.write();
        let Some(user_sessions) = sessions.get_mut(user_id) else {
            return false;
        };
        let before = user_sessions.len();
        user_sessions.retain(|s| s.connection_id() != session.connection_id());
        let removed = user_sessions.len() != before;
        if user_sessions.is_empty() {
            sessions.remove(user_id);
        }
        if removed {
            info!(user_id = %user_id, connection_id = %session.connection_id(), "Connection unregistered");
        }
        removed
    }

    /// Open sessions of a user, possibly none
    pub fn lookup(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.read().get(user_id).cloned().unwrap_or_default()
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.read().values().flatten().cloned().collect()
    }

    /// Queue `payload` on every session. Sessions that cannot take it are
    /// dropped instead of slowing the broadcaster down. Returns how many
    /// sessions accepted the payload.
    pub fn broadcast_all(&self, payload: &Message) -> usize {
        let targets = self.sessions();
        let mut delivered = 0;
        for session in targets {
            match session.enqueue(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(user_id = %session.user_id(), "Broadcast skipped session: {}", e),
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn user_count(&self) -> usize {
        self.read().len()
    }

    /// Close every session, used on shutdown
    pub fn close_all(&self, reason: CloseReason) {
        for session in self.sessions() {
            session.close(reason);
        }
    }
}
