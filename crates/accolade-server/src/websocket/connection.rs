//! One relay socket: its session state, outbound queue, and liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use accolade_core::{Channel, Identity, RelayError, ServerMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

use super::state::{Session, SessionState};

/// Result of handing a frame to a connection's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued for the writer task.
    Queued,
    /// Queue at capacity; the frame was dropped.
    QueueFull,
    /// Socket already gone.
    Closed,
}

impl Delivery {
    /// Whether the frame was enqueued.
    pub fn is_queued(self) -> bool {
        self == Self::Queued
    }
}

/// A live relay socket shared between its session task and the dispatcher.
pub struct ClientConnection {
    /// Connection id, `client_<uuid>`.
    pub id: String,
    session: Mutex<Session>,
    outbound: mpsc::Sender<Arc<String>>,
    opened_at: Instant,
    last_heard: Mutex<Instant>,
    dropped: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Connection writing to `outbound`.
    pub fn new(id: String, outbound: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            session: Mutex::new(Session::new()),
            outbound,
            opened_at: now,
            last_heard: Mutex::new(now),
            dropped: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Snapshot of the session.
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    /// Verified identity, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.session.lock().identity().cloned()
    }

    /// Store a verified identity, returning the one it replaced.
    pub fn authenticate(&self, identity: Identity) -> Option<Identity> {
        self.session.lock().authenticate(identity)
    }

    /// Subscribe to `channel`; see [`Session::subscribe`].
    pub fn subscribe(&self, channel: Channel) -> Result<bool, RelayError> {
        self.session.lock().subscribe(channel)
    }

    /// Clear identity and subscriptions, returning the identity.
    pub fn release(&self) -> Option<Identity> {
        self.session.lock().release()
    }

    /// Enqueue a serialized frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Delivery {
        let delivery = if self.is_closed() {
            Delivery::Closed
        } else {
            match self.outbound.try_send(frame) {
                Ok(()) => return Delivery::Queued,
                Err(TrySendError::Full(_)) => Delivery::QueueFull,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            }
        };
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        delivery
    }

    /// Serialize and enqueue a protocol message.
    pub fn send_message(&self, message: &ServerMessage) -> Delivery {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, kind = message.kind(), error = %e, "failed to serialize message");
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Closed
            }
        }
    }

    /// Frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Any inbound frame, Pong included, counts as a sign of life.
    pub fn record_activity(&self) {
        *self.last_heard.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn silent_for(&self) -> Duration {
        self.last_heard.lock().elapsed()
    }

    /// Whether the client has been silent longer than `timeout`.
    pub fn is_unresponsive(&self, timeout: Duration) -> bool {
        self.silent_for() > timeout
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Mark the socket as gone. Pending sends start failing.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection closes.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}
