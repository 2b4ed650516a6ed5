//! Session lifecycle: state, events and the background I/O task.

mod heartbeat;
mod manager;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

pub(crate) use heartbeat::{Heartbeat, HeartbeatAction};
pub(crate) use manager::SessionManager;

/// Connection state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; requests are queued until a reconnect.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected to a server that accepts reads and writes.
    SyncConnected,
    /// Connected to a read-only server; writes fail with `NotWritable`.
    ReadOnly,
    /// The session expired. Terminal.
    Expired,
    /// The server rejected the credentials. Terminal.
    AuthFailed,
    /// The client was closed. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns a human-readable name for this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::SyncConnected => "SYNC_CONNECTED",
            Self::ReadOnly => "READ_ONLY",
            Self::Expired => "EXPIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Closed => "CLOSED",
        }
    }

    /// Returns `true` when a server connection is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::SyncConnected | Self::ReadOnly)
    }

    /// Returns `true` for states the session never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::AuthFailed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session transitions broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection attempt started.
    Connecting {
        /// Server being tried.
        server: String,
        /// Attempt number since the last established connection, from 1.
        attempt: u32,
    },
    /// A session was established or resumed.
    Connected {
        /// Session id.
        session_id: i64,
        /// Server address.
        address: SocketAddr,
        /// Whether the server is read-only.
        read_only: bool,
    },
    /// The connection was lost; the session may still be resumed.
    Disconnected {
        /// Server that was connected, if any.
        address: Option<SocketAddr>,
        /// Why the connection ended.
        reason: String,
    },
    /// The session expired.
    Expired {
        /// Session id.
        session_id: i64,
    },
    /// The server rejected the credentials.
    AuthFailed,
    /// The client was closed.
    Closed,
}

impl SessionEvent {
    /// Returns the state this event moves the session into.
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected {
                read_only: false, ..
            } => ConnectionState::SyncConnected,
            Self::Connected { read_only: true, .. } => ConnectionState::ReadOnly,
            Self::Disconnected { .. } => ConnectionState::Disconnected,
            Self::Expired { .. } => ConnectionState::Expired,
            Self::AuthFailed => ConnectionState::AuthFailed,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Snapshot of the session credentials and timing.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-assigned session id; 0 before the first handshake.
    pub session_id: i64,
    /// Password used to resume the session on another server.
    pub password: Vec<u8>,
    /// Timeout negotiated with the server.
    pub negotiated_timeout: Duration,
    /// Highest zxid observed in any reply.
    pub last_zxid_seen: i64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &format_args!("0x{:x}", self.session_id))
            .field("password", &"<redacted>")
            .field("negotiated_timeout", &self.negotiated_timeout)
            .field("last_zxid_seen", &self.last_zxid_seen)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    session_id: i64,
    password: Vec<u8>,
    negotiated_timeout: Duration,
}

/// Session state shared between the client handle and the I/O task.
#[derive(Debug)]
pub(crate) struct SessionShared {
    credentials: RwLock<Credentials>,
    last_zxid: AtomicI64,
    server: RwLock<Option<SocketAddr>>,
    closing: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    pub(crate) fn new(requested_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        Self {
            credentials: RwLock::new(Credentials {
                session_id: 0,
                password: Vec::new(),
                negotiated_timeout: requested_timeout,
            }),
            last_zxid: AtomicI64::new(0),
            server: RwLock::new(None),
            closing: AtomicBool::new(false),
            state_tx,
            events,
        }
    }

    pub(crate) fn snapshot(&self) -> Session {
        let credentials = self.credentials.read().clone();
        Session {
            session_id: credentials.session_id,
            password: credentials.password,
            negotiated_timeout: credentials.negotiated_timeout,
            last_zxid_seen: self.last_zxid(),
        }
    }

    pub(crate) fn session_id(&self) -> i64 {
        self.credentials.read().session_id
    }

    pub(crate) fn negotiated_timeout(&self) -> Duration {
        self.credentials.read().negotiated_timeout
    }

    pub(crate) fn establish(&self, session_id: i64, password: Vec<u8>, timeout: Duration) {
        *self.credentials.write() = Credentials {
            session_id,
            password,
            negotiated_timeout: timeout,
        };
    }

    pub(crate) fn last_zxid(&self) -> i64 {
        self.last_zxid.load(Ordering::Acquire)
    }

    pub(crate) fn observe_zxid(&self, zxid: i64) {
        if zxid > 0 {
            self.last_zxid.fetch_max(zxid, Ordering::AcqRel);
        }
    }

    pub(crate) fn server(&self) -> Option<SocketAddr> {
        *self.server.read()
    }

    pub(crate) fn set_server(&self, address: Option<SocketAddr>) {
        *self.server.write() = address;
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publishes a transition. Terminal states are never left.
    pub(crate) fn publish(&self, event: SessionEvent) {
        let next = event.state();
        let changed = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            tracing::debug!(state = %next, "session state changed");
            let _ = self.events.send(event);
        }
    }
}
