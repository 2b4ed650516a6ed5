//! Error types for ZooKeeper operations.

use std::io;
use thiserror::Error;

use crate::protocol::error_code;

/// The main error type for ZooKeeper operations.
///
/// Transport-level variants describe the health of the connection or the
/// session. Semantic variants are ordinary outcomes of a node operation and
/// are surfaced to the caller verbatim, never retried.
#[derive(Debug, Error)]
pub enum ZkError {
    /// The connection to the ensemble was lost before a response arrived.
    ///
    /// Retryable: the session may still be alive and the client will
    /// reconnect on its own.
    #[error("connection loss: {0}")]
    ConnectionLoss(String),

    /// The ensemble expired the session. The client and every watch are dead.
    #[error("session expired")]
    SessionExpired,

    /// The ensemble rejected the supplied credentials.
    #[error("authentication failed")]
    AuthFailed,

    /// A record on the wire was truncated, oversized or of the wrong type.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A write was attempted while connected to a read-only server.
    #[error("not writable: connected to a read-only server")]
    NotWritable,

    /// The caller-supplied operation timeout elapsed.
    #[error("operation timed out")]
    OperationTimeout,

    /// The client was closed by its owner.
    #[error("client closed")]
    Closed,

    /// The node does not exist.
    #[error("no node")]
    NoNode,

    /// The node already exists.
    #[error("node exists")]
    NodeExists,

    /// The expected version did not match the node's version.
    #[error("bad version")]
    BadVersion,

    /// The node has children and cannot be deleted.
    #[error("node not empty")]
    NotEmpty,

    /// Ephemeral nodes may not have children.
    #[error("ephemeral nodes may not have children")]
    NoChildrenForEphemerals,

    /// The ACL is invalid (for example empty, or `auth` without credentials).
    #[error("invalid ACL")]
    InvalidAcl,

    /// The session lacks permission for the operation.
    #[error("not authorized")]
    NoAuth,

    /// The arguments were rejected, by the client or by the ensemble.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Any other error code reported by the ensemble.
    #[error("server error code {code}")]
    Server {
        /// The raw error code.
        code: i32,
    },

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ZkError {
    /// Maps a wire error code to an error, or `None` for `OK`.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            error_code::OK => return None,
            error_code::CONNECTION_LOSS => {
                Self::ConnectionLoss("reported by server".to_string())
            }
            error_code::MARSHALLING_ERROR => {
                Self::MalformedRecord("server failed to unmarshal request".to_string())
            }
            error_code::OPERATION_TIMEOUT => Self::OperationTimeout,
            error_code::BAD_ARGUMENTS => Self::BadArguments("rejected by server".to_string()),
            error_code::NO_NODE => Self::NoNode,
            error_code::NO_AUTH => Self::NoAuth,
            error_code::BAD_VERSION => Self::BadVersion,
            error_code::NO_CHILDREN_FOR_EPHEMERALS => Self::NoChildrenForEphemerals,
            error_code::NODE_EXISTS => Self::NodeExists,
            error_code::NOT_EMPTY => Self::NotEmpty,
            error_code::SESSION_EXPIRED => Self::SessionExpired,
            error_code::INVALID_ACL => Self::InvalidAcl,
            error_code::AUTH_FAILED => Self::AuthFailed,
            error_code::NOT_READ_ONLY => Self::NotWritable,
            other => Self::Server { code: other },
        };
        Some(err)
    }

    /// Returns the wire error code this error corresponds to.
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionLoss(_) | Self::Io(_) => error_code::CONNECTION_LOSS,
            Self::SessionExpired => error_code::SESSION_EXPIRED,
            Self::AuthFailed => error_code::AUTH_FAILED,
            Self::MalformedRecord(_) => error_code::MARSHALLING_ERROR,
            Self::NotWritable => error_code::NOT_READ_ONLY,
            Self::OperationTimeout => error_code::OPERATION_TIMEOUT,
            Self::Closed => error_code::SESSION_EXPIRED,
            Self::NoNode => error_code::NO_NODE,
            Self::NodeExists => error_code::NODE_EXISTS,
            Self::BadVersion => error_code::BAD_VERSION,
            Self::NotEmpty => error_code::NOT_EMPTY,
            Self::NoChildrenForEphemerals => error_code::NO_CHILDREN_FOR_EPHEMERALS,
            Self::InvalidAcl => error_code::INVALID_ACL,
            Self::NoAuth => error_code::NO_AUTH,
            Self::BadArguments(_) => error_code::BAD_ARGUMENTS,
            Self::Server { code } => *code,
        }
    }

    /// Returns `true` for connection-scoped failures that may succeed once
    /// the client has reconnected.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss(_) | Self::Io(_) | Self::OperationTimeout
        )
    }

    /// Returns `true` for failures after which the client cannot be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::AuthFailed | Self::Closed)
    }

    /// Returns `true` for per-node outcomes such as `NoNode` or `BadVersion`.
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            Self::NoNode
                | Self::NodeExists
                | Self::BadVersion
                | Self::NotEmpty
                | Self::NoChildrenForEphemerals
                | Self::InvalidAcl
                | Self::NoAuth
        )
    }
}

/// A specialized `Result` type for ZooKeeper operations.
pub type Result<T> = std::result::Result<T, ZkError>;
