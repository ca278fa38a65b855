use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::router::{MessageRouter, RouteError};
use crate::utils::scope_guard::ScopeGuard;

/// How long the write loop waits for the close handshake to flush
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadError,
    WriteError,
    QueueFull,
    HeartbeatTimeout,
    ProbeFailed,
    Shutdown,
    Aborted,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::ReadError => "read error",
            CloseReason::WriteError => "write error",
            CloseReason::QueueFull => "outbound queue full",
            CloseReason::HeartbeatTimeout => "heartbeat timeout",
            CloseReason::ProbeFailed => "liveness probe failed",
            CloseReason::Shutdown => "server shutdown",
            CloseReason::Aborted => "read loop aborted",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(String),

    #[error("outbound queue of session {0} is full")]
    QueueFull(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn until_closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Server side handle of one physical websocket connection.
///
/// The session owns the sending half of its outbound queue; the write loop
/// owns the receiving half. Every teardown path ends in [`Session::close`],
/// which runs at most once per session.
pub struct Session {
    user_id: String,
    connection_id: String,
    state: Mutex<SessionState>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    last_seen: Mutex<Instant>,
    shutdown: watch::Sender<bool>,
    registry: Weak<ConnectionRegistry>,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue.
    /// The session is not registered yet.
    pub fn new(
        user_id: impl Into<String>,
        queue_capacity: usize,
        registry: Weak<ConnectionRegistry>,
    ) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let session = Arc::new(Session {
            user_id: user_id.into(),
            connection_id: Uuid::new_v4().to_string(),
            state: Mutex::new(SessionState::Open),
            outbound: Mutex::new(Some(tx)),
            last_seen: Mutex::new(Instant::now()),
            shutdown,
            registry,
        });
        (session, rx)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Record that the peer is alive
    pub fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    /// Time since the peer last showed a sign of life
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    /// Resolves once the session starts tearing down
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Queue a frame for the write loop without waiting.
    ///
    /// A full queue means the peer cannot keep up; the session is closed
    /// rather than letting the backlog grow.
    pub fn enqueue(&self, payload: Message) -> Result<(), SessionError> {
        let result = {
            let outbound = lock(&self.outbound);
            match outbound.as_ref() {
                Some(tx) => tx.try_send(payload),
                None => return Err(SessionError::Closed(self.connection_id.clone())),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    user_id = %self.user_id,
                    connection_id = %self.connection_id,
                    "Outbound queue full, dropping session"
                );
                self.close(CloseReason::QueueFull);
                Err(SessionError::QueueFull(self.connection_id.clone()))
            }
            Err(TrySendError::Closed(_)) => {
                // The write loop is gone
                self.close(CloseReason::WriteError);
                Err(SessionError::Closed(self.connection_id.clone()))
            }
        }
    }

    /// Serialize `value` and queue it as a text frame
    pub fn enqueue_json<T: serde::Serialize>(&self, value: &T) -> Result<(), SessionError> {
        match serde_json::to_string(value) {
            Ok(text) => self.enqueue(Message::Text(text)),
            Err(e) => {
                // Our own types always serialize; keep the session alive regardless
                error!("Failed to serialize outbound payload: {}", e);
                Ok(())
            }
        }
    }

    /// Tear the session down: stop both loops, close the outbound queue
    /// and leave the registry. Returns `true` only for the call that did it.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Open {
                return false;
            }
            *state = SessionState::Closing;
        }

        info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            %reason,
            "Closing session"
        );

        self.shutdown.send_replace(true);
        lock(&self.outbound).take();
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.user_id, self);
        }

        *lock(&self.state) = SessionState::Closed;
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Read loop: one frame at a time until the peer goes away or the session
/// is closed from elsewhere. Data frames, text or binary, are routed inline.
pub async fn run_reader<S, E>(session: Arc<Session>, mut stream: S, router: Arc<MessageRouter>)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    // Dispatch may panic inside storage code; the session still has to leave the registry
    let guard_session = session.clone();
    let _guard = ScopeGuard::new(move || {
        guard_session.close(CloseReason::Aborted);
    });

    let mut closed = session.closed_signal();
    let reason = loop {
        let frame = tokio::select! {
            _ = until_closed(&mut closed) => None,
            frame = stream.next() => Some(frame),
        };
        let Some(frame) = frame else {
            break None;
        };

        match frame {
            Some(Ok(msg)) => {
                session.touch();
                match msg {
                    Message::Text(text) => route_frame(&session, &router, &text).await,
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => route_frame(&session, &router, text).await,
                        Err(e) => warn!(user_id = %session.user_id(), "Dropping binary frame that is not UTF-8: {}", e),
                    },
                    // Liveness is all they carry; the socket layer answers pings itself
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(frame) => {
                        debug!(user_id = %session.user_id(), reason = ?frame, "Client initiated close");
                        break Some(CloseReason::PeerClosed);
                    }
                }
            }
            Some(Err(e)) => {
                warn!(user_id = %session.user_id(), "WebSocket receive error: {}", e);
                break Some(CloseReason::ReadError);
            }
            None => break Some(CloseReason::PeerClosed),
        }
    };

    if let Some(reason) = reason {
        session.close(reason);
    }
}

async fn route_frame(session: &Session, router: &MessageRouter, text: &str) {
    if text.trim() == "pong" {
        return;
    }
    if let Err(e) = router.dispatch(session, text).await {
        match e {
            RouteError::Store(_) => error!(user_id = %session.user_id(), "Failed to route message: {}", e),
            _ => warn!(user_id = %session.user_id(), "Dropping message: {}", e),
        }
    }
}

/// Write loop: drains the outbound queue in order onto the sink
pub async fn run_writer<K>(session: Arc<Session>, mut sink: K, mut outbound: mpsc::Receiver<Message>)
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let mut closed = session.closed_signal();
    let mut failed = false;

    // Closing the session drops the queue's sender, so `recv` drains what
    // is buffered and then yields `None`
    while let Some(msg) = outbound.recv().await {
        let sent = tokio::select! {
            biased;
            res = sink.send(msg) => Some(res),
            _ = until_closed(&mut closed) => None,
        };
        match sent {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(user_id = %session.user_id(), "WebSocket send error: {}", e);
                failed = true;
                break;
            }
            // Stuck on a dead peer while the session was closed
            None => break,
        }
    }

    if failed {
        session.close(CloseReason::WriteError);
    } else {
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryChatStore;
    use crate::ws::resolver::ConversationResolver;
    use futures::channel::mpsc as fmpsc;
    use std::thread;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new())
    }

    fn text(msg: &Message) -> &str {
        match msg {
            Message::Text(t) => t.as_str(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn router(registry: &Arc<ConnectionRegistry>) -> Arc<MessageRouter> {
        router_with_store(registry).0
    }

    fn router_with_store(registry: &Arc<ConnectionRegistry>) -> (Arc<MessageRouter>, Arc<MemoryChatStore>) {
        let store = Arc::new(MemoryChatStore::new());
        let resolver = ConversationResolver::new(store.clone(), Duration::from_secs(60));
        (Arc::new(MessageRouter::new(registry.clone(), resolver, store.clone())), store)
    }

    #[tokio::test]
    async fn writer_preserves_enqueue_order() {
        let registry = registry();
        let (session, rx) = registry.open("alice", 64);
        let (sink, wire) = fmpsc::unbounded::<Message>();

        let writer = tokio::spawn(run_writer(session.clone(), sink, rx));
        for i in 0..50 {
            session.enqueue(Message::Text(format!("payload-{}", i))).unwrap();
        }
        session.close(CloseReason::Shutdown);
        writer.await.unwrap();

        let received: Vec<String> = wire.map(|msg| text(&msg).to_string()).collect().await;
        let expected: Vec<String> = (0..50).map(|i| format!("payload-{}", i)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn full_queue_closes_and_deregisters() {
        let registry = registry();
        let (session, _rx) = registry.open("alice", 2);

        session.enqueue(Message::Text("1".into())).unwrap();
        session.enqueue(Message::Text("2".into())).unwrap();
        let err = session.enqueue(Message::Text("3".into())).unwrap_err();

        assert_eq!(err, SessionError::QueueFull(session.connection_id().to_string()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup("alice").is_empty());
        assert!(matches!(
            session.enqueue(Message::Text("4".into())),
            Err(SessionError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn dropped_writer_counts_as_write_failure() {
        let registry = registry();
        let (session, rx) = registry.open("alice", 4);
        drop(rx);

        assert!(matches!(session.enqueue(Message::Text("x".into())), Err(SessionError::Closed(_))));
        assert!(!session.is_open());
        assert!(registry.lookup("alice").is_empty());
    }

    #[test]
    fn concurrent_close_tears_down_once() {
        let registry = registry();
        let (session, _rx) = registry.open("alice", 4);
        let (other, _other_rx) = registry.open("alice", 4);

        let reasons = [
            CloseReason::ReadError,
            CloseReason::WriteError,
            CloseReason::HeartbeatTimeout,
            CloseReason::Shutdown,
        ];
        let handles: Vec<_> = reasons
            .into_iter()
            .map(|reason| {
                let session = session.clone();
                thread::spawn(move || session.close(reason))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(session.state(), SessionState::Closed);
        // Only this connection left, the user's other one stays reachable
        let remaining = registry.lookup("alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].connection_id(), other.connection_id());
        assert!(!registry.unregister("alice", &session));
    }

    #[tokio::test]
    async fn writer_failure_closes_session() {
        let registry = registry();
        let (session, rx) = registry.open("alice", 4);
        let (sink, wire) = fmpsc::unbounded::<Message>();
        drop(wire);

        session.enqueue(Message::Text("lost".into())).unwrap();
        run_writer(session.clone(), sink, rx).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup("alice").is_empty());
    }

    #[tokio::test]
    async fn reader_skips_control_and_malformed_frames() {
        let registry = registry();
        let router = router(&registry);
        let (session, mut rx) = registry.open("alice", 8);
        let (inbound, stream) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let reader = tokio::spawn(run_reader(session.clone(), stream, router));
        inbound.unbounded_send(Ok(Message::Text("pong".into()))).unwrap();
        inbound.unbounded_send(Ok(Message::Ping(vec![1, 2]))).unwrap();
        inbound.unbounded_send(Ok(Message::Text("{not json".into()))).unwrap();
        inbound.unbounded_send(Ok(Message::Binary(vec![0xff, 0xfe, 0x00]))).unwrap();
        inbound
            .unbounded_send(Ok(Message::Text(
                r#"{"type":"private","receiver_id":"bob","content":"hi"}"#.into(),
            )))
            .unwrap();

        // Nothing was queued for the ping or the bad frames, the first reply is the confirmation
        let reply = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(text(&reply)).unwrap();
        assert_eq!(json["type"], "confirmation");
        assert!(session.is_open());

        drop(inbound);
        reader.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup("alice").is_empty());
    }

    #[tokio::test]
    async fn binary_json_frame_is_routed_like_text() {
        let registry = registry();
        let (router, store) = router_with_store(&registry);
        let (session, mut rx) = registry.open("A", 8);
        let (inbound, stream) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let reader = tokio::spawn(run_reader(session.clone(), stream, router));
        inbound
            .unbounded_send(Ok(Message::Binary(
                br#"{"type":"private","receiver_id":"B","content":"hi"}"#.to_vec(),
            )))
            .unwrap();

        let reply = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(text(&reply)).unwrap();
        assert_eq!(json["type"], "confirmation");
        let stored = store.messages_in("A_B");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi");

        drop(inbound);
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn read_error_tears_down() {
        let registry = registry();
        let router = router(&registry);
        let (session, _rx) = registry.open("alice", 8);
        let (inbound, stream) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        inbound
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();
        run_reader(session.clone(), stream, router).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup("alice").is_empty());
    }

    #[tokio::test]
    async fn external_close_stops_the_reader() {
        let registry = registry();
        let router = router(&registry);
        let (session, _rx) = registry.open("alice", 8);
        let (_inbound, stream) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let reader = tokio::spawn(run_reader(session.clone(), stream, router));
        session.close(CloseReason::HeartbeatTimeout);
        reader.await.unwrap();
        assert!(registry.lookup("alice").is_empty());
    }
}
