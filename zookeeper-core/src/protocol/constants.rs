//! Protocol constants for the ZooKeeper jute wire protocol.

/// Size of the big-endian length prefix in front of every packet.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

/// Default upper bound for a single packet, matching the server's `jute.maxbuffer`.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Protocol version sent in the connect handshake.
pub const PROTOCOL_VERSION: i32 = 0;

/// Version value meaning "skip the version check".
pub const ANY_VERSION: i32 = -1;

/// Encoded size of a `Stat` record.
pub const STAT_SIZE: usize = 68;

/// Size of a request header (xid + op code).
pub const REQUEST_HEADER_SIZE: usize = 8;

/// Size of a reply header (xid + zxid + err).
pub const REPLY_HEADER_SIZE: usize = 16;

/// Size of the password the ensemble hands out.
pub const SESSION_PASSWORD_LEN: usize = 16;

// Reserved xids for packets that are not matched through the pending queue.

/// Xid of a watch notification pushed by the server.
pub const NOTIFICATION_XID: i32 = -1;

/// Xid of a heartbeat ping and its reply.
pub const PING_XID: i32 = -2;

/// Xid of an authentication packet and its reply.
pub const AUTH_XID: i32 = -4;

/// Xid of a set-watches packet and its reply.
pub const SET_WATCHES_XID: i32 = -8;

/// Operation codes carried in the request header.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Server-pushed watch notification.
    Notification = 0,
    /// Create a node.
    Create = 1,
    /// Delete a node.
    Delete = 2,
    /// Check node existence.
    Exists = 3,
    /// Read node data.
    GetData = 4,
    /// Write node data.
    SetData = 5,
    /// Read node ACL.
    GetAcl = 6,
    /// Write node ACL.
    SetAcl = 7,
    /// List children without stat.
    GetChildren = 8,
    /// Flush the leader channel for a path.
    Sync = 9,
    /// Heartbeat.
    Ping = 11,
    /// List children with stat.
    GetChildren2 = 12,
    /// Version check inside a transaction.
    Check = 13,
    /// Atomic multi-operation transaction.
    Multi = 14,
    /// Add authentication credentials.
    Auth = 100,
    /// Re-arm watches after reconnect.
    SetWatches = 101,
    /// Close the session.
    CloseSession = -11,
    /// Error slot inside a multi response.
    Error = -1,
}

impl OpCode {
    /// Maps a raw op code to the enum.
    pub fn from_i32(value: i32) -> Option<Self> {
        let op = match value {
            0 => Self::Notification,
            1 => Self::Create,
            2 => Self::Delete,
            3 => Self::Exists,
            4 => Self::GetData,
            5 => Self::SetData,
            6 => Self::GetAcl,
            7 => Self::SetAcl,
            8 => Self::GetChildren,
            9 => Self::Sync,
            11 => Self::Ping,
            12 => Self::GetChildren2,
            13 => Self::Check,
            14 => Self::Multi,
            100 => Self::Auth,
            101 => Self::SetWatches,
            -11 => Self::CloseSession,
            -1 => Self::Error,
            _ => return None,
        };
        Some(op)
    }

    /// Returns the raw op code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns `true` if the operation never mutates the tree.
    ///
    /// Read-only servers accept exactly these.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::Exists
                | Self::GetData
                | Self::GetAcl
                | Self::GetChildren
                | Self::GetChildren2
                | Self::Sync
                | Self::Ping
                | Self::Auth
                | Self::SetWatches
                | Self::CloseSession
        )
    }
}

/// Error codes carried in reply headers and multi error results.
pub mod error_code {
    /// Success.
    pub const OK: i32 = 0;
    /// Generic system error.
    pub const SYSTEM_ERROR: i32 = -1;
    /// A runtime inconsistency; marks aborted ops after a failed multi op.
    pub const RUNTIME_INCONSISTENCY: i32 = -2;
    /// A data inconsistency was found.
    pub const DATA_INCONSISTENCY: i32 = -3;
    /// Connection to the server was lost.
    pub const CONNECTION_LOSS: i32 = -4;
    /// Error while marshalling or unmarshalling data.
    pub const MARSHALLING_ERROR: i32 = -5;
    /// Operation is unimplemented.
    pub const UNIMPLEMENTED: i32 = -6;
    /// Operation timeout.
    pub const OPERATION_TIMEOUT: i32 = -7;
    /// Invalid arguments.
    pub const BAD_ARGUMENTS: i32 = -8;
    /// Generic API error.
    pub const API_ERROR: i32 = -100;
    /// Node does not exist.
    pub const NO_NODE: i32 = -101;
    /// Not authenticated.
    pub const NO_AUTH: i32 = -102;
    /// Version conflict.
    pub const BAD_VERSION: i32 = -103;
    /// Ephemeral nodes may not have children.
    pub const NO_CHILDREN_FOR_EPHEMERALS: i32 = -108;
    /// The node already exists.
    pub const NODE_EXISTS: i32 = -110;
    /// The node has children.
    pub const NOT_EMPTY: i32 = -111;
    /// The session has been expired by the server.
    pub const SESSION_EXPIRED: i32 = -112;
    /// Invalid callback specified.
    pub const INVALID_CALLBACK: i32 = -113;
    /// Invalid ACL specified.
    pub const INVALID_ACL: i32 = -114;
    /// Client authentication failed.
    pub const AUTH_FAILED: i32 = -115;
    /// Session moved to another server.
    pub const SESSION_MOVED: i32 = -118;
    /// State-changing request passed to a read-only server.
    pub const NOT_READ_ONLY: i32 = -119;
}
