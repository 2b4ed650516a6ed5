//! Core types and wire protocol for ZooKeeper clients.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;

pub use error::{Result, ZkError};
