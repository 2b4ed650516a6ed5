//! Ping scheduling and liveness detection.

use std::time::Duration;

use tokio::time::Instant;

/// What the I/O task should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    Idle,
    SendPing,
    Dead,
}

/// Tracks traffic on one connection.
///
/// A ping goes out once nothing has been sent for a third of the session
/// timeout. Any inbound frame proves liveness; two pings in a row without
/// any inbound frame, each given a full interval, mark the connection dead.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    last_send: Instant,
    last_ping: Option<Instant>,
    unanswered: u32,
}

const MAX_UNANSWERED_PINGS: u32 = 2;

impl Heartbeat {
    pub(crate) fn new(session_timeout: Duration, now: Instant) -> Self {
        Self {
            interval: session_timeout / 3,
            last_send: now,
            last_ping: None,
            unanswered: 0,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// How often the I/O task should consult [`Heartbeat::poll`].
    pub(crate) fn tick_period(&self) -> Duration {
        (self.interval / 4).max(Duration::from_millis(10))
    }

    pub(crate) fn on_send(&mut self, now: Instant) {
        self.last_send = now;
    }

    pub(crate) fn on_receive(&mut self) {
        self.unanswered = 0;
        self.last_ping = None;
    }

    pub(crate) fn on_ping_sent(&mut self, now: Instant) {
        self.unanswered += 1;
        self.last_ping = Some(now);
        self.last_send = now;
    }

    pub(crate) fn poll(&self, now: Instant) -> HeartbeatAction {
        match self.last_ping {
            Some(sent) if now.duration_since(sent) >= self.interval => {
                if self.unanswered >= MAX_UNANSWERED_PINGS {
                    HeartbeatAction::Dead
                } else {
                    HeartbeatAction::SendPing
                }
            }
            Some(_) => HeartbeatAction::Idle,
            None if now.duration_since(self.last_send) >= self.interval => {
                HeartbeatAction::SendPing
            }
            None => HeartbeatAction::Idle,
        }
    }
}
