//! Listener registration for session state changes.

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

pub use state::StateListener;
pub(crate) use state::spawn_state_listener;

/// Unique identifier for a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Handle for a registered listener. The listener stops receiving events
/// once the handle is deactivated or dropped.
#[derive(Debug)]
pub struct ListenerRegistration {
    id: ListenerId,
    active: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl ListenerRegistration {
    pub(crate) fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            id: ListenerId::new(),
            active: Arc::new(AtomicBool::new(true)),
            stop_tx,
        }
    }

    /// Returns the listener ID.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns `true` if the listener still receives events.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops delivering events to the listener.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let _ = self.stop_tx.send(true);
            tracing::debug!(id = %self.id, "listener deactivated");
        }
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.deactivate();
    }
}
