//! Watch notifications.

use std::fmt;

use super::jute::{Record, RecordReader, RecordWriter};
use crate::error::{Result, ZkError};

/// What happened to a watched node.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Session state change, not tied to a node.
    None = -1,
    /// The node was created.
    NodeCreated = 1,
    /// The node was deleted.
    NodeDeleted = 2,
    /// The node's data changed.
    NodeDataChanged = 3,
    /// The node's children changed.
    NodeChildrenChanged = 4,
}

impl EventType {
    /// Maps the wire value to an event type.
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            -1 => Ok(Self::None),
            1 => Ok(Self::NodeCreated),
            2 => Ok(Self::NodeDeleted),
            3 => Ok(Self::NodeDataChanged),
            4 => Ok(Self::NodeChildrenChanged),
            other => Err(ZkError::MalformedRecord(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::NodeCreated => "NODE_CREATED",
            Self::NodeDeleted => "NODE_DELETED",
            Self::NodeDataChanged => "NODE_DATA_CHANGED",
            Self::NodeChildrenChanged => "NODE_CHILDREN_CHANGED",
        };
        f.write_str(name)
    }
}

/// Session state carried in a notification.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    /// The client is disconnected.
    Disconnected = 0,
    /// The client is connected to a read-write server.
    SyncConnected = 3,
    /// Authentication failed.
    AuthFailed = 4,
    /// The client is connected to a read-only server.
    ConnectedReadOnly = 5,
    /// The session has expired.
    Expired = -112,
}

impl KeeperState {
    /// Maps the wire value to a state.
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Disconnected),
            3 => Ok(Self::SyncConnected),
            4 => Ok(Self::AuthFailed),
            5 => Ok(Self::ConnectedReadOnly),
            -112 => Ok(Self::Expired),
            other => Err(ZkError::MalformedRecord(format!(
                "unknown keeper state: {}",
                other
            ))),
        }
    }
}

/// Raw notification record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    /// Raw event type.
    pub event_type: i32,
    /// Raw keeper state.
    pub state: i32,
    /// Server-side path of the node.
    pub path: String,
}

impl Record for WatcherEvent {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.event_type);
        w.write_i32(self.state);
        w.write_string(&self.path);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            event_type: r.read_i32()?,
            state: r.read_i32()?,
            path: r.read_string()?,
        })
    }
}

/// A typed watch notification delivered to a watch ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What happened.
    pub event_type: EventType,
    /// Session state at delivery.
    pub state: KeeperState,
    /// Path of the node, relative to the client's chroot.
    pub path: String,
}

impl WatchedEvent {
    /// Creates a node event observed while connected.
    pub fn new(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: path.into(),
        }
    }
}

impl TryFrom<WatcherEvent> for WatchedEvent {
    type Error = ZkError;

    fn try_from(raw: WatcherEvent) -> Result<Self> {
        Ok(Self {
            event_type: EventType::from_i32(raw.event_type)?,
            state: KeeperState::from_i32(raw.state)?,
            path: raw.path,
        })
    }
}

impl From<&WatchedEvent> for WatcherEvent {
    fn from(event: &WatchedEvent) -> Self {
        Self {
            event_type: event.event_type as i32,
            state: event.state as i32,
            path: event.path.clone(),
        }
    }
}

impl fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.event_type, self.path)
    }
}
