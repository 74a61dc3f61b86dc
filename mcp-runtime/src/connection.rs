//! Streaming dispatch loop for one server-sent-event channel.
//!
//! A connection moves `Connecting -> Authenticated -> Serving -> Closed`.
//! Inbound JSON-RPC messages arrive through the [`ConnectionRegistry`] (the
//! HTTP side posts them by connection id) and each is handled in its own
//! task, so a slow Jira call never holds up the heartbeat or other calls.
//! Dropping the outbound stream cancels the connection: the heartbeat stops,
//! in-flight calls are aborted and no further frame is produced. The same
//! happens once the session disappears from the store (revoked or swept); it
//! is re-checked on every inbound message and every heartbeat tick.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use spacebridge_core::auth::token_fingerprint;
use spacebridge_core::{CredentialStore, Session, UnauthorizedSessionError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::jira::JiraClient;
use crate::server::McpDispatcher;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const MESSAGES_PATH: &str = "/v1/messages";

/// One outbound unit on the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Where the client should POST its JSON-RPC messages.
    Endpoint(String),
    /// A JSON-RPC response.
    Message(Value),
    /// Comment-only keepalive.
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Unknown connection")]
    UnknownConnection,
}

/// Inbox senders of every serving connection, keyed by connection id.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inboxes: Arc<Mutex<HashMap<Uuid, mpsc::Sender<Value>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Value>>> {
        self.inboxes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, id: Uuid, inbox: mpsc::Sender<Value>) {
        self.lock().insert(id, inbox);
    }

    fn deregister(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` for the connection. Waits while its inbox is full.
    pub async fn deliver(&self, id: Uuid, message: Value) -> Result<(), DeliveryError> {
        let inbox = self
            .lock()
            .get(&id)
            .cloned()
            .ok_or(DeliveryError::UnknownConnection)?;
        inbox
            .send(message)
            .await
            .map_err(|_| DeliveryError::UnknownConnection)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub heartbeat_interval: Duration,
    pub inbox_capacity: usize,
    pub frame_capacity: usize,
    /// Tool calls running at once; further messages wait in the inbox.
    pub max_in_flight: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            inbox_capacity: 32,
            frame_capacity: 32,
            max_in_flight: 8,
        }
    }
}

/// A token that resolved to a live session; nothing is streamed yet.
#[derive(Debug)]
pub struct AuthenticatedConnection {
    store: CredentialStore,
    dispatcher: McpDispatcher,
}

impl AuthenticatedConnection {
    pub fn authenticate(
        store: &CredentialStore,
        token: Option<&str>,
        jira: JiraClient,
    ) -> Result<Self, UnauthorizedSessionError> {
        let session = store.authenticate(token)?;
        Ok(Self {
            store: store.clone(),
            dispatcher: McpDispatcher::new(session, jira),
        })
    }

    pub fn session(&self) -> &Session {
        self.dispatcher.session()
    }

    /// Register the connection and start serving it. The endpoint frame is
    /// queued before this returns, so it is always the first frame read.
    /// Cancelling `shutdown` closes the connection as well.
    pub fn open(
        self,
        registry: &ConnectionRegistry,
        options: ConnectionOptions,
        shutdown: &CancellationToken,
    ) -> ServingConnection {
        let id = Uuid::new_v4();
        let (inbox_tx, inbox_rx) = mpsc::channel(options.inbox_capacity.max(1));
        let (frame_tx, frame_rx) = mpsc::channel(options.frame_capacity.max(1));
        let cancel = shutdown.child_token();

        // Fresh channel with capacity >= 1, so this cannot fail.
        let _ = frame_tx.try_send(Frame::Endpoint(format!("{MESSAGES_PATH}?sessionId={id}")));
        registry.register(id, inbox_tx);

        tracing::info!(
            event = "connection_opened",
            connection_id = %id,
            session = %token_fingerprint(&self.dispatcher.session().session_token),
            "MCP connection opened"
        );

        tokio::spawn(serve(ServeLoop {
            id,
            store: self.store,
            dispatcher: self.dispatcher,
            inbox: inbox_rx,
            frames: frame_tx,
            registry: registry.clone(),
            cancel: cancel.clone(),
            heartbeat_interval: options.heartbeat_interval,
            max_in_flight: options.max_in_flight.max(1),
        }));

        ServingConnection {
            id,
            frames: frame_rx,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }
}

/// Outbound side of a serving connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct ServingConnection {
    id: Uuid,
    frames: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ServingConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled once the connection is closing, from either side.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ServingConnection {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.get_mut().frames.poll_recv(cx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Cancelled,
    ClientGone,
    SessionEnded,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::Cancelled => "cancelled",
            CloseReason::ClientGone => "client_gone",
            CloseReason::SessionEnded => "session_ended",
        }
    }
}

struct ServeLoop {
    id: Uuid,
    store: CredentialStore,
    dispatcher: McpDispatcher,
    inbox: mpsc::Receiver<Value>,
    frames: mpsc::Sender<Frame>,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
    heartbeat_interval: Duration,
    max_in_flight: usize,
}

impl ServeLoop {
    fn session_is_live(&self) -> bool {
        self.store
            .session(&self.dispatcher.session().session_token)
            .is_some()
    }
}

async fn serve(mut conn: ServeLoop) {
    let period = conn.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();
    let mut handled: u64 = 0;

    let reason = loop {
        tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => break CloseReason::Cancelled,
            _ = conn.frames.closed() => break CloseReason::ClientGone,
            _ = heartbeat.tick() => {
                if !conn.session_is_live() {
                    break CloseReason::SessionEnded;
                }
                // A full buffer already guarantees traffic; skip this beat.
                if let Err(TrySendError::Closed(_)) = conn.frames.try_send(Frame::Heartbeat) {
                    break CloseReason::ClientGone;
                }
            }
            message = conn.inbox.recv(), if in_flight.len() < conn.max_in_flight => {
                let Some(message) = message else {
                    break CloseReason::ClientGone;
                };
                if !conn.session_is_live() {
                    break CloseReason::SessionEnded;
                }
                handled += 1;
                let dispatcher = conn.dispatcher.clone();
                let frames = conn.frames.clone();
                let cancel = conn.cancel.clone();
                in_flight.spawn(async move {
                    let responses = tokio::select! {
                        _ = cancel.cancelled() => return,
                        responses = dispatcher.handle_incoming_message(message) => responses,
                    };
                    for response in responses {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            sent = frames.send(Frame::Message(response)) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    };

    conn.cancel.cancel();
    let aborted = in_flight.len();
    in_flight.shutdown().await;
    conn.registry.deregister(conn.id);

    tracing::info!(
        event = "connection_closed",
        connection_id = %conn.id,
        reason = reason.as_str(),
        messages_handled = handled,
        calls_aborted = aborted,
        "MCP connection closed"
    );
}
