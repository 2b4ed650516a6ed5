//! One-shot watch bookkeeping.
//!
//! Watches are keyed by server path and kind. The I/O task activates them
//! when a watching read succeeds, fires them when a matching notification
//! arrives and fails them all when the session ends.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use zookeeper_core::protocol::{EventType, SetWatches, WatchedEvent};
use zookeeper_core::{Result, ZkError};

use crate::path::Chroot;

/// Which read armed a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Armed by `get_data`.
    Data,
    /// Armed by `exists`.
    Exists,
    /// Armed by `get_children`.
    Children,
}

impl WatchKind {
    fn fired_by(self, event_type: EventType) -> bool {
        match (self, event_type) {
            (_, EventType::None) => false,
            (Self::Data | Self::Exists, EventType::NodeCreated | EventType::NodeDataChanged) => {
                true
            }
            (_, EventType::NodeDeleted) => true,
            (Self::Children, EventType::NodeChildrenChanged) => true,
            _ => false,
        }
    }
}

type Delivery = oneshot::Sender<Result<WatchedEvent>>;

/// Future that resolves exactly once with the event that fired the watch,
/// or with the error that ended the session.
#[derive(Debug)]
pub struct WatchTicket {
    rx: oneshot::Receiver<Result<WatchedEvent>>,
}

impl WatchTicket {
    fn ready(result: Result<WatchedEvent>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for WatchTicket {
    type Output = Result<WatchedEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ZkError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Reason every remaining watch is failed with once the session is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Expired,
    AuthFailed,
    Closed,
}

impl Terminal {
    pub(crate) fn error(self) -> ZkError {
        match self {
            Self::Expired => ZkError::SessionExpired,
            Self::AuthFailed => ZkError::AuthFailed,
            Self::Closed => ZkError::Closed,
        }
    }
}

#[derive(Debug, Default)]
struct Watches {
    by_kind: HashMap<WatchKind, HashMap<String, Vec<Delivery>>>,
    terminal: Option<Terminal>,
}

impl Watches {
    /// Forgets watches whose ticket was dropped.
    fn prune(&mut self) {
        for paths in self.by_kind.values_mut() {
            paths.retain(|_, deliveries| {
                deliveries.retain(|tx| !tx.is_closed());
                !deliveries.is_empty()
            });
        }
    }
}

/// Active watches of one session.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    inner: Mutex<Watches>,
    chroot: Chroot,
}

impl WatchRegistry {
    pub(crate) fn new(chroot: Chroot) -> Self {
        Self {
            inner: Mutex::new(Watches::default()),
            chroot,
        }
    }

    /// Activates a watch on `server_path`.
    pub(crate) fn register(&self, server_path: &str, kind: WatchKind) -> WatchTicket {
        let mut inner = self.inner.lock();
        if let Some(terminal) = inner.terminal {
            return WatchTicket::ready(Err(terminal.error()));
        }

        inner.prune();
        let (tx, rx) = oneshot::channel();
        inner
            .by_kind
            .entry(kind)
            .or_default()
            .entry(server_path.to_string())
            .or_default()
            .push(tx);
        tracing::trace!(path = server_path, kind = ?kind, "watch registered");
        WatchTicket { rx }
    }

    /// Fires every watch the event applies to and returns how many were
    /// delivered.
    pub(crate) fn dispatch(&self, event: WatchedEvent) -> usize {
        let fired: Vec<Delivery> = {
            let mut inner = self.inner.lock();
            let mut fired = Vec::new();
            for (kind, paths) in inner.by_kind.iter_mut() {
                if kind.fired_by(event.event_type) {
                    if let Some(deliveries) = paths.remove(&event.path) {
                        fired.extend(deliveries);
                    }
                }
            }
            fired
        };

        let event = WatchedEvent {
            path: self.chroot.strip(&event.path),
            ..event
        };
        let delivered = fired
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(Ok(event.clone())))
            .filter(|r| r.is_ok())
            .count();

        tracing::debug!(event = %event, delivered = delivered, "watch event dispatched");
        delivered
    }

    /// Fails every outstanding watch and rejects future registrations.
    pub(crate) fn expire_all(&self, terminal: Terminal) {
        let drained: Vec<Delivery> = {
            let mut inner = self.inner.lock();
            inner.terminal = Some(terminal);
            inner
                .by_kind
                .drain()
                .flat_map(|(_, paths)| paths.into_values().flatten())
                .collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(terminal.error()));
        }
        tracing::debug!(count = count, reason = ?terminal, "outstanding watches failed");
    }

    /// Builds the packet that re-arms every live watch after a reconnect.
    ///
    /// Watches whose ticket was dropped are pruned first.
    pub(crate) fn set_watches(&self, relative_zxid: i64) -> Option<SetWatches> {
        let mut inner = self.inner.lock();
        let mut packet = SetWatches {
            relative_zxid,
            data_watches: Vec::new(),
            exist_watches: Vec::new(),
            child_watches: Vec::new(),
        };

        inner.prune();
        for (kind, paths) in inner.by_kind.iter() {
            let target = match kind {
                WatchKind::Data => &mut packet.data_watches,
                WatchKind::Exists => &mut packet.exist_watches,
                WatchKind::Children => &mut packet.child_watches,
            };
            target.extend(paths.keys().cloned());
        }

        packet.data_watches.sort();
        packet.exist_watches.sort();
        packet.child_watches.sort();
        (!packet.is_empty()).then_some(packet)
    }

    /// Returns the number of watches whose ticket is still held.
    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .by_kind
            .values()
            .flat_map(|paths| paths.values())
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}
