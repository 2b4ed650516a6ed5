//! Async Rust client for [Apache ZooKeeper](https://zookeeper.apache.org/).
//!
//! The client keeps one session with an ensemble over a single TCP
//! connection at a time. Requests are pipelined, heartbeats keep the session
//! alive, and the session is resumed on another server when the connection
//! drops. It is built on [Tokio](https://tokio.rs/) and every operation is an
//! `async fn`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use zookeeper_client::{ClientConfig, CreateOptions, ZooKeeper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .connect_string("127.0.0.1:2181")
//!         .build()?;
//!     let zk = ZooKeeper::connect(config).await?;
//!
//!     zk.create("/greeting", CreateOptions::new().data(b"hello".to_vec()))
//!         .await?;
//!     let (data, stat) = zk.get_data("/greeting").await?;
//!     println!("{} (version {})", String::from_utf8_lossy(&data), stat.version);
//!
//!     zk.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! A session survives disconnects as long as the client reconnects within
//! the negotiated timeout. Transitions are observable through
//! [`ZooKeeper::subscribe_state`], [`ZooKeeper::state_changes`] or a
//! [`StateListener`]. Once a session reaches `Expired`, `AuthFailed` or
//! `Closed` it never recovers, and a new [`ZooKeeper`] must be created.
//!
//! Reads submitted while disconnected wait for the next connection. Writes
//! that were in flight when the connection dropped fail with
//! `ConnectionLoss`, since the server may have applied them. Both defaults
//! can be changed per call with [`OperationOptions`].
//!
//! # Watches
//!
//! The `*_w` operations return a [`WatchTicket`] that resolves once, with
//! the first matching event or with the error that ended the session:
//!
//! ```rust,ignore
//! let (data, _stat, ticket) = zk.get_data_w("/config").await?;
//! let event = ticket.await?;
//! println!("{:?} on {}", event.event_type, event.path);
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | Load [`ClientConfig`] from YAML or TOML files |

#![warn(missing_docs)]

mod client;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod listener;
pub mod options;
pub mod path;
mod pipeline;
pub mod session;
mod transaction;
pub mod watch;

pub use client::ZooKeeper;
pub use config::{
    AuthCredential, ClientConfig, ClientConfigBuilder, ConfigError, ConnectString, RetryConfig,
    RetryConfigBuilder,
};
pub use config_file::FileConfig;
pub use listener::{ListenerId, ListenerRegistration, StateListener};
pub use options::{CreateOptions, OperationOptions, ReplayPolicy};
pub use path::validate_path;
pub use pipeline::PendingResponse;
pub use session::{ConnectionState, Session, SessionEvent};
pub use transaction::Transaction;
pub use watch::{WatchKind, WatchTicket};

pub use zookeeper_core as core;
pub use zookeeper_core::protocol::{
    Acl, CreateMode, EventType, Id, KeeperState, OpResult, Perms, Request, Response, Stat,
    WatchedEvent,
};
pub use zookeeper_core::{Result, ZkError};
