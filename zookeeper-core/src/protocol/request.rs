//! Outbound records: the connect handshake and every request body.

use bytes::BytesMut;

use super::constants::{
    OpCode, AUTH_XID, PING_XID, PROTOCOL_VERSION, REQUEST_HEADER_SIZE, SESSION_PASSWORD_LEN,
    SET_WATCHES_XID,
};
use super::data::{read_acl_list, write_acl_list, Acl, CreateMode};
use super::jute::{Record, RecordReader, RecordWriter};
use crate::error::{Result, ZkError};

/// Handshake sent as the first packet on every new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Protocol version, always [`PROTOCOL_VERSION`].
    pub protocol_version: i32,
    /// Highest zxid this client has observed.
    pub last_zxid_seen: i64,
    /// Requested session timeout in milliseconds.
    pub timeout: i32,
    /// Session to resume, or 0 for a new session.
    pub session_id: i64,
    /// Password of the session to resume.
    pub password: Vec<u8>,
    /// Whether a read-only server is acceptable.
    pub read_only: bool,
}

impl ConnectRequest {
    /// Handshake for a brand new session.
    pub fn new_session(timeout: i32, read_only: bool) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: 0,
            timeout,
            session_id: 0,
            password: vec![0; SESSION_PASSWORD_LEN],
            read_only,
        }
    }
}

impl Record for ConnectRequest {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.protocol_version);
        w.write_i64(self.last_zxid_seen);
        w.write_i32(self.timeout);
        w.write_i64(self.session_id);
        w.write_buffer(&self.password);
        w.write_bool(self.read_only);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            protocol_version: r.read_i32()?,
            last_zxid_seen: r.read_i64()?,
            timeout: r.read_i32()?,
            session_id: r.read_i64()?,
            password: r.read_bytes()?,
            // Clients older than 3.4 omit the flag.
            read_only: if r.is_empty() { false } else { r.read_bool()? },
        })
    }
}

/// Header in front of every request after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Transaction id used to match the reply.
    pub xid: i32,
    /// Raw operation code.
    pub op: i32,
}

impl Record for RequestHeader {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.xid);
        w.write_i32(self.op);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            xid: r.read_i32()?,
            op: r.read_i32()?,
        })
    }
}

/// Credentials added to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    /// Always 0.
    pub auth_type: i32,
    /// Authentication scheme, for example `digest`.
    pub scheme: String,
    /// Scheme-specific credential bytes.
    pub auth: Vec<u8>,
}

impl AuthPacket {
    /// Creates an auth packet for the given scheme.
    pub fn new(scheme: impl Into<String>, auth: impl Into<Vec<u8>>) -> Self {
        Self {
            auth_type: 0,
            scheme: scheme.into(),
            auth: auth.into(),
        }
    }
}

impl Record for AuthPacket {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.auth_type);
        w.write_string(&self.scheme);
        w.write_buffer(&self.auth);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            auth_type: r.read_i32()?,
            scheme: r.read_string()?,
            auth: r.read_bytes()?,
        })
    }
}

/// Watches to re-arm on a resumed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWatches {
    /// Events newer than this zxid are delivered immediately.
    pub relative_zxid: i64,
    /// Paths with a data watch.
    pub data_watches: Vec<String>,
    /// Paths with an exists watch.
    pub exist_watches: Vec<String>,
    /// Paths with a child watch.
    pub child_watches: Vec<String>,
}

impl SetWatches {
    /// Returns `true` if there is nothing to re-arm.
    pub fn is_empty(&self) -> bool {
        self.data_watches.is_empty() && self.exist_watches.is_empty() && self.child_watches.is_empty()
    }
}

fn write_strings(w: &mut RecordWriter, items: &[String]) {
    w.write_vec(items, |w, s| w.write_string(s));
}

fn read_strings(r: &mut RecordReader<'_>) -> Result<Vec<String>> {
    r.read_vec(4, |r| r.read_string())
}

impl Record for SetWatches {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i64(self.relative_zxid);
        write_strings(w, &self.data_watches);
        write_strings(w, &self.exist_watches);
        write_strings(w, &self.child_watches);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            relative_zxid: r.read_i64()?,
            data_watches: read_strings(r)?,
            exist_watches: read_strings(r)?,
            child_watches: read_strings(r)?,
        })
    }
}

/// Header in front of each operation inside a multi request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiHeader {
    /// Op code of the following record, or -1 at the end.
    pub op: i32,
    /// Set on the terminating header.
    pub done: bool,
    /// Error code; -1 in requests.
    pub err: i32,
}

impl MultiHeader {
    /// The header terminating every multi sequence.
    pub const DONE: MultiHeader = MultiHeader {
        op: -1,
        done: true,
        err: -1,
    };
}

impl Record for MultiHeader {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.op);
        w.write_bool(self.done);
        w.write_i32(self.err);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            op: r.read_i32()?,
            done: r.read_bool()?,
            err: r.read_i32()?,
        })
    }
}

/// One operation of an atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiOp {
    /// Create a node.
    Create {
        /// Node path.
        path: String,
        /// Initial data.
        data: Vec<u8>,
        /// Initial ACL.
        acl: Vec<Acl>,
        /// Create mode.
        mode: CreateMode,
    },
    /// Delete a node.
    Delete {
        /// Node path.
        path: String,
        /// Expected version, -1 for any.
        version: i32,
    },
    /// Replace node data.
    SetData {
        /// Node path.
        path: String,
        /// New data.
        data: Vec<u8>,
        /// Expected version, -1 for any.
        version: i32,
    },
    /// Assert a node's version without changing it.
    Check {
        /// Node path.
        path: String,
        /// Expected version, -1 for any.
        version: i32,
    },
}

impl MultiOp {
    /// Op code of the operation.
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Create { .. } => OpCode::Create,
            Self::Delete { .. } => OpCode::Delete,
            Self::SetData { .. } => OpCode::SetData,
            Self::Check { .. } => OpCode::Check,
        }
    }

    /// Path the operation targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. }
            | Self::Delete { path, .. }
            | Self::SetData { path, .. }
            | Self::Check { path, .. } => path,
        }
    }

    fn write_body(&self, w: &mut RecordWriter) {
        match self {
            Self::Create {
                path,
                data,
                acl,
                mode,
            } => write_create(w, path, data, acl, *mode),
            Self::Delete { path, version } | Self::Check { path, version } => {
                w.write_string(path);
                w.write_i32(*version);
            }
            Self::SetData {
                path,
                data,
                version,
            } => {
                w.write_string(path);
                w.write_buffer(data);
                w.write_i32(*version);
            }
        }
    }

    fn read_body(op: OpCode, r: &mut RecordReader<'_>) -> Result<Self> {
        let op = match op {
            OpCode::Create => {
                let path = r.read_string()?;
                let data = r.read_bytes()?;
                let acl = read_acl_list(r)?;
                let mode = CreateMode::from_flags(r.read_i32()?)?;
                Self::Create {
                    path,
                    data,
                    acl,
                    mode,
                }
            }
            OpCode::Delete => Self::Delete {
                path: r.read_string()?,
                version: r.read_i32()?,
            },
            OpCode::SetData => Self::SetData {
                path: r.read_string()?,
                data: r.read_bytes()?,
                version: r.read_i32()?,
            },
            OpCode::Check => Self::Check {
                path: r.read_string()?,
                version: r.read_i32()?,
            },
            other => {
                return Err(ZkError::MalformedRecord(format!(
                    "{:?} is not allowed inside a transaction",
                    other
                )))
            }
        };
        Ok(op)
    }
}

fn write_create(w: &mut RecordWriter, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) {
    w.write_string(path);
    w.write_buffer(data);
    write_acl_list(w, acl);
    w.write_i32(mode.flags());
}

/// A request body, tagged by operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Heartbeat.
    Ping,
    /// Create a node.
    Create {
        /// Node path.
        path: String,
        /// Initial data.
        data: Vec<u8>,
        /// Initial ACL.
        acl: Vec<Acl>,
        /// Create mode.
        mode: CreateMode,
    },
    /// Delete a node.
    Delete {
        /// Node path.
        path: String,
        /// Expected version, -1 for any.
        version: i32,
    },
    /// Stat a node, optionally leaving an exists watch.
    Exists {
        /// Node path.
        path: String,
        /// Leave a watch.
        watch: bool,
    },
    /// Read node data, optionally leaving a data watch.
    GetData {
        /// Node path.
        path: String,
        /// Leave a watch.
        watch: bool,
    },
    /// Replace node data.
    SetData {
        /// Node path.
        path: String,
        /// New data.
        data: Vec<u8>,
        /// Expected version, -1 for any.
        version: i32,
    },
    /// Read a node's ACL.
    GetAcl {
        /// Node path.
        path: String,
    },
    /// Replace a node's ACL.
    SetAcl {
        /// Node path.
        path: String,
        /// New ACL.
        acl: Vec<Acl>,
        /// Expected ACL version, -1 for any.
        version: i32,
    },
    /// List children with the parent's stat, optionally leaving a child watch.
    GetChildren {
        /// Node path.
        path: String,
        /// Leave a watch.
        watch: bool,
    },
    /// Catch the connected server up with the leader.
    Sync {
        /// Node path.
        path: String,
    },
    /// Version check; only meaningful inside a transaction.
    Check {
        /// Node path.
        path: String,
        /// Expected version, -1 for any.
        version: i32,
    },
    /// Atomic transaction.
    Multi(Vec<MultiOp>),
    /// Close the session.
    CloseSession,
    /// Add credentials.
    Auth(AuthPacket),
    /// Re-arm watches.
    SetWatches(SetWatches),
}

impl Request {
    /// Op code written into the request header.
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Ping => OpCode::Ping,
            Self::Create { .. } => OpCode::Create,
            Self::Delete { .. } => OpCode::Delete,
            Self::Exists { .. } => OpCode::Exists,
            Self::GetData { .. } => OpCode::GetData,
            Self::SetData { .. } => OpCode::SetData,
            Self::GetAcl { .. } => OpCode::GetAcl,
            Self::SetAcl { .. } => OpCode::SetAcl,
            Self::GetChildren { .. } => OpCode::GetChildren2,
            Self::Sync { .. } => OpCode::Sync,
            Self::Check { .. } => OpCode::Check,
            Self::Multi(_) => OpCode::Multi,
            Self::CloseSession => OpCode::CloseSession,
            Self::Auth(_) => OpCode::Auth,
            Self::SetWatches(_) => OpCode::SetWatches,
        }
    }

    /// Returns `true` if a read-only server accepts the request.
    pub fn is_read_only(&self) -> bool {
        self.op_code().is_read()
    }

    /// Reserved xid for control packets that bypass the pending queue.
    pub fn reserved_xid(&self) -> Option<i32> {
        match self {
            Self::Ping => Some(PING_XID),
            Self::Auth(_) => Some(AUTH_XID),
            Self::SetWatches(_) => Some(SET_WATCHES_XID),
            _ => None,
        }
    }

    /// Path the request targets, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Create { path, .. }
            | Self::Delete { path, .. }
            | Self::Exists { path, .. }
            | Self::GetData { path, .. }
            | Self::SetData { path, .. }
            | Self::GetAcl { path }
            | Self::SetAcl { path, .. }
            | Self::GetChildren { path, .. }
            | Self::Sync { path }
            | Self::Check { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Encodes header and body, without the length prefix.
    pub fn encode(&self, xid: i32) -> BytesMut {
        let mut w = RecordWriter::with_capacity(REQUEST_HEADER_SIZE + 64);
        RequestHeader {
            xid,
            op: self.op_code().as_i32(),
        }
        .write(&mut w);
        self.write_body(&mut w);
        w.into_inner()
    }

    fn write_body(&self, w: &mut RecordWriter) {
        match self {
            Self::Ping | Self::CloseSession => {}
            Self::Create {
                path,
                data,
                acl,
                mode,
            } => write_create(w, path, data, acl, *mode),
            Self::Delete { path, version } | Self::Check { path, version } => {
                w.write_string(path);
                w.write_i32(*version);
            }
            Self::Exists { path, watch }
            | Self::GetData { path, watch }
            | Self::GetChildren { path, watch } => {
                w.write_string(path);
                w.write_bool(*watch);
            }
            Self::SetData {
                path,
                data,
                version,
            } => {
                w.write_string(path);
                w.write_buffer(data);
                w.write_i32(*version);
            }
            Self::GetAcl { path } | Self::Sync { path } => w.write_string(path),
            Self::SetAcl { path, acl, version } => {
                w.write_string(path);
                write_acl_list(w, acl);
                w.write_i32(*version);
            }
            Self::Multi(ops) => {
                for op in ops {
                    MultiHeader {
                        op: op.op_code().as_i32(),
                        done: false,
                        err: -1,
                    }
                    .write(w);
                    op.write_body(w);
                }
                MultiHeader::DONE.write(w);
            }
            Self::Auth(packet) => packet.write(w),
            Self::SetWatches(watches) => watches.write(w),
        }
    }

    /// Decodes a request frame (without length prefix) into header and body.
    pub fn decode(frame: &[u8]) -> Result<(RequestHeader, Request)> {
        let mut r = RecordReader::new(frame);
        let header = RequestHeader::read(&mut r)?;
        let op = OpCode::from_i32(header.op).ok_or_else(|| {
            ZkError::MalformedRecord(format!("unknown op code: {}", header.op))
        })?;

        let request = match op {
            OpCode::Ping => Self::Ping,
            OpCode::CloseSession => Self::CloseSession,
            OpCode::Create => {
                let path = r.read_string()?;
                let data = r.read_bytes()?;
                let acl = read_acl_list(&mut r)?;
                let mode = CreateMode::from_flags(r.read_i32()?)?;
                Self::Create {
                    path,
                    data,
                    acl,
                    mode,
                }
            }
            OpCode::Delete => Self::Delete {
                path: r.read_string()?,
                version: r.read_i32()?,
            },
            OpCode::Check => Self::Check {
                path: r.read_string()?,
                version: r.read_i32()?,
            },
            OpCode::Exists => Self::Exists {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::GetData => Self::GetData {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::GetChildren2 => Self::GetChildren {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::SetData => Self::SetData {
                path: r.read_string()?,
                data: r.read_bytes()?,
                version: r.read_i32()?,
            },
            OpCode::GetAcl => Self::GetAcl {
                path: r.read_string()?,
            },
            OpCode::SetAcl => Self::SetAcl {
                path: r.read_string()?,
                acl: read_acl_list(&mut r)?,
                version: r.read_i32()?,
            },
            OpCode::Sync => Self::Sync {
                path: r.read_string()?,
            },
            OpCode::Multi => {
                let mut ops = Vec::new();
                loop {
                    let mh = MultiHeader::read(&mut r)?;
                    if mh.done {
                        break;
                    }
                    let op = OpCode::from_i32(mh.op).ok_or_else(|| {
                        ZkError::MalformedRecord(format!("unknown multi op code: {}", mh.op))
                    })?;
                    ops.push(MultiOp::read_body(op, &mut r)?);
                }
                Self::Multi(ops)
            }
            OpCode::Auth => Self::Auth(AuthPacket::read(&mut r)?),
            OpCode::SetWatches => Self::SetWatches(SetWatches::read(&mut r)?),
            other => {
                return Err(ZkError::MalformedRecord(format!(
                    "{:?} is not a client request",
                    other
                )))
            }
        };

        r.expect_end()?;
        Ok((header, request))
    }
}
