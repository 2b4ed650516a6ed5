//! Session state callbacks.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::ListenerRegistration;
use crate::session::SessionEvent;

/// Listener for session state transitions.
///
/// All methods have empty default implementations, so only the interesting
/// ones need overriding. Callbacks run on a dedicated task, in the order the
/// transitions happened.
///
/// # Example
///
/// ```ignore
/// use zookeeper_client::listener::StateListener;
///
/// struct Alarm;
///
/// impl StateListener for Alarm {
///     fn expired(&self, session_id: i64) {
///         eprintln!("session 0x{:x} expired", session_id);
///     }
/// }
///
/// let registration = zk.add_state_listener(Alarm);
/// ```
pub trait StateListener: Send + Sync {
    /// A connection attempt started.
    fn connecting(&self, _server: &str, _attempt: u32) {}

    /// The session was established or resumed.
    fn connected(&self, _session_id: i64, _read_only: bool) {}

    /// The connection dropped; the session may still be resumed.
    fn disconnected(&self, _reason: &str) {}

    /// The session expired.
    fn expired(&self, _session_id: i64) {}

    /// The server rejected the credentials.
    fn auth_failed(&self) {}

    /// The client was closed.
    fn closed(&self) {}

    /// Routes an event to the matching callback.
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connecting { server, attempt } => self.connecting(server, *attempt),
            SessionEvent::Connected {
                session_id,
                read_only,
                ..
            } => self.connected(*session_id, *read_only),
            SessionEvent::Disconnected { reason, .. } => self.disconnected(reason),
            SessionEvent::Expired { session_id } => self.expired(*session_id),
            SessionEvent::AuthFailed => self.auth_failed(),
            SessionEvent::Closed => self.closed(),
        }
    }
}

impl std::fmt::Debug for dyn StateListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateListener")
    }
}

/// Feeds session events to `listener` until the registration is dropped
/// or the session ends.
pub(crate) fn spawn_state_listener(
    listener: Arc<dyn StateListener>,
    mut events: broadcast::Receiver<SessionEvent>,
    registration: &ListenerRegistration,
) {
    let id = registration.id();
    let active = registration.active_flag();
    let mut stop = registration.stop_signal();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if !active.load(std::sync::atomic::Ordering::Acquire) {
                            break;
                        }
                        listener.on_event(&event);
                        if event.state().is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(id = %id, skipped = skipped, "state listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!(id = %id, "state listener stopped");
    });
}
