//! ZooKeeper jute wire protocol.
//!
//! This module provides the records exchanged with an ensemble and the
//! length-prefixed framing they travel in.

mod codec;
pub mod constants;
mod data;
mod event;
pub mod jute;
mod request;
mod response;

pub use codec::PacketCodec;
pub use constants::*;
pub use data::{Acl, CreateMode, Id, Perms, Stat};
pub use event::{EventType, KeeperState, WatchedEvent, WatcherEvent};
pub use jute::{Record, RecordReader, RecordWriter};
pub use request::{AuthPacket, ConnectRequest, MultiHeader, MultiOp, Request, RequestHeader, SetWatches};
pub use response::{first_multi_error, ConnectResponse, OpResult, Reply, ReplyHeader, Response};
