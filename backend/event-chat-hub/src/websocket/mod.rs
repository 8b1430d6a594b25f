//! Real-time fan-out for event chat
//!
//! ```text
//!                         Hub (Arc, one per process)
//!                  ┌──────────────────────────────────┐
//!                  │ channels:    channel -> {conn}   │
//!                  │ connections: conn -> {channel}   │
//!                  └──────┬────────────────────▲──────┘
//!          broadcast()    │ snapshot            │ join / leave / unregister
//!                         ▼                     │
//!                  [mailbox (bounded)]    [inbound loop] ◄── socket reads
//!                         │
//!                         ▼
//!                  [outbound loop] ──► socket writes, pings, close
//! ```
//!
//! The hub is the only place that mutates membership. Broadcasts copy the member
//! list under the read lock and enqueue without holding it, so one frozen client
//! can never stall other channels.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod connection;
pub mod events;
pub mod hub;
pub mod message_types;

pub use connection::{Connection, ConnectionError, FrameSink};
pub use hub::Hub;
pub use message_types::{ClientFrame, EventKind, FrameError, ServerFrame, TypingPayload};

/// Verified user identifier, as issued by the identity provider
pub type UserId = u64;

/// Chat channel identifier; zero means "not provided" on the wire
pub type ChannelId = u64;

/// Receiving half of a connection's outbound queue, owned by its outbound loop
pub type Mailbox = mpsc::Receiver<Bytes>;

/// Unique identifier for a WebSocket connection
///
/// One user may hold several connections (phone + desktop); each gets its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared side of a connection: what the hub and broadcasters hold.
///
/// Enqueueing never blocks. A full mailbox drops the payload and asks the hub
/// to evict the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    mailbox: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    eviction_requested: AtomicBool,
    evictions: mpsc::UnboundedSender<ConnectionId>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        user_id: UserId,
        capacity: usize,
        evictions: mpsc::UnboundedSender<ConnectionId>,
    ) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: ConnectionId::new(),
            user_id,
            mailbox: tx,
            closed: CancellationToken::new(),
            eviction_requested: AtomicBool::new(false),
            evictions,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Non-blocking enqueue. Returns whether the payload was accepted.
    ///
    /// After the connection is closed this is a no-op.
    pub fn send(&self, payload: Bytes) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }

        match self.mailbox.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.request_eviction();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the hub has unregistered this connection
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Signal both loops to finish. Only the hub calls this, under its lock.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    fn request_eviction(&self) {
        if self.eviction_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            connection_id = %self.id,
            user_id = self.user_id,
            "mailbox full, scheduling eviction"
        );
        // Receiver only goes away with the hub itself
        let _ = self.evictions.send(self.id);
    }
}
