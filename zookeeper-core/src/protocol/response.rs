//! Inbound records: the handshake reply, reply headers and response bodies.

use bytes::{Bytes, BytesMut};

use super::constants::{
    error_code, OpCode, AUTH_XID, NOTIFICATION_XID, PING_XID, REPLY_HEADER_SIZE, SET_WATCHES_XID,
    STAT_SIZE,
};
use super::data::{read_acl_list, write_acl_list, Acl, Stat};
use super::event::WatcherEvent;
use super::jute::{Record, RecordReader, RecordWriter};
use super::request::MultiHeader;
use crate::error::{Result, ZkError};

/// Reply to a [`ConnectRequest`](super::request::ConnectRequest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Protocol version of the server.
    pub protocol_version: i32,
    /// Negotiated session timeout in milliseconds; `<= 0` means expired.
    pub timeout: i32,
    /// Assigned or resumed session id.
    pub session_id: i64,
    /// Session password.
    pub password: Vec<u8>,
    /// Whether the server is in read-only mode.
    pub read_only: bool,
}

impl Record for ConnectResponse {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.protocol_version);
        w.write_i32(self.timeout);
        w.write_i64(self.session_id);
        w.write_buffer(&self.password);
        w.write_bool(self.read_only);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            protocol_version: r.read_i32()?,
            timeout: r.read_i32()?,
            session_id: r.read_i64()?,
            password: r.read_bytes()?,
            // Servers older than 3.4 omit the flag.
            read_only: if r.is_empty() { false } else { r.read_bool()? },
        })
    }
}

/// Header in front of every reply after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Xid of the request, or a reserved xid.
    pub xid: i32,
    /// Zxid of the last committed transaction the server has seen.
    pub zxid: i64,
    /// Error code, 0 on success.
    pub err: i32,
}

impl Record for ReplyHeader {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.xid);
        w.write_i64(self.zxid);
        w.write_i32(self.err);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            xid: r.read_i32()?,
            zxid: r.read_i64()?,
            err: r.read_i32()?,
        })
    }
}

/// Outcome of one operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// A node was created at `path`.
    Create {
        /// Actual path, including any sequential suffix.
        path: String,
    },
    /// A node was deleted.
    Delete,
    /// Data was replaced.
    SetData {
        /// Stat after the write.
        stat: Stat,
    },
    /// A version check passed.
    Check,
    /// The operation failed or was rolled back.
    Error {
        /// Error code: the failure for the offending op, 0 for ops before it
        /// and `RUNTIME_INCONSISTENCY` for ops after it.
        code: i32,
    },
}

impl OpResult {
    fn op_code(&self) -> OpCode {
        match self {
            Self::Create { .. } => OpCode::Create,
            Self::Delete => OpCode::Delete,
            Self::SetData { .. } => OpCode::SetData,
            Self::Check => OpCode::Check,
            Self::Error { .. } => OpCode::Error,
        }
    }

    /// Returns the error of a failed operation, if any.
    pub fn error(&self) -> Option<ZkError> {
        match self {
            Self::Error { code } => ZkError::from_code(*code),
            _ => None,
        }
    }
}

/// Returns the error that aborted a transaction, if one did.
///
/// The offending operation carries the real code; operations after it carry
/// `RUNTIME_INCONSISTENCY`, which is only reported if nothing else is.
pub fn first_multi_error(results: &[OpResult]) -> Option<ZkError> {
    let mut fallback = None;
    for result in results {
        if let OpResult::Error { code } = result {
            match *code {
                error_code::OK => {}
                error_code::RUNTIME_INCONSISTENCY => {
                    fallback.get_or_insert(*code);
                }
                other => return ZkError::from_code(other),
            }
        }
    }
    fallback.and_then(ZkError::from_code)
}

/// A successfully decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// No body: delete, ping, close, auth, set-watches.
    Empty,
    /// Create: the actual path.
    Created(String),
    /// Exists, setData, setACL: the node stat.
    Stat(Stat),
    /// GetData: data and stat.
    Data(Vec<u8>, Stat),
    /// GetACL: ACL and stat.
    Acl(Vec<Acl>, Stat),
    /// GetChildren2: child names and the parent's stat.
    Children(Vec<String>, Stat),
    /// Sync: the synced path.
    Synced(String),
    /// Multi: per-operation results.
    Multi(Vec<OpResult>),
}

impl Response {
    /// Decodes a response body for the given request op.
    pub fn decode(op: OpCode, body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::new(body);
        let response = match op {
            OpCode::Create => Self::Created(r.read_string()?),
            OpCode::Exists | OpCode::SetData | OpCode::SetAcl => Self::Stat(Stat::read(&mut r)?),
            OpCode::GetData => {
                let data = r.read_bytes()?;
                Self::Data(data, Stat::read(&mut r)?)
            }
            OpCode::GetAcl => {
                let acl = read_acl_list(&mut r)?;
                Self::Acl(acl, Stat::read(&mut r)?)
            }
            OpCode::GetChildren2 => {
                let children = r.read_vec(4, |r| r.read_string())?;
                Self::Children(children, Stat::read(&mut r)?)
            }
            OpCode::Sync => Self::Synced(r.read_string()?),
            OpCode::Multi => Self::Multi(decode_multi(&mut r)?),
            OpCode::Delete
            | OpCode::Check
            | OpCode::Ping
            | OpCode::CloseSession
            | OpCode::Auth
            | OpCode::SetWatches => Self::Empty,
            other => {
                return Err(ZkError::MalformedRecord(format!(
                    "no response body defined for {:?}",
                    other
                )))
            }
        };
        r.expect_end()?;
        Ok(response)
    }

    /// Encodes the body.
    pub fn encode(&self) -> BytesMut {
        let mut w = RecordWriter::with_capacity(STAT_SIZE + 32);
        match self {
            Self::Empty => {}
            Self::Created(path) | Self::Synced(path) => w.write_string(path),
            Self::Stat(stat) => stat.write(&mut w),
            Self::Data(data, stat) => {
                w.write_buffer(data);
                stat.write(&mut w);
            }
            Self::Acl(acl, stat) => {
                write_acl_list(&mut w, acl);
                stat.write(&mut w);
            }
            Self::Children(children, stat) => {
                w.write_vec(children, |w, c| w.write_string(c));
                stat.write(&mut w);
            }
            Self::Multi(results) => encode_multi(&mut w, results),
        }
        w.into_inner()
    }
}

fn decode_multi(r: &mut RecordReader<'_>) -> Result<Vec<OpResult>> {
    let mut results = Vec::new();
    loop {
        let header = MultiHeader::read(r)?;
        if header.done {
            return Ok(results);
        }
        let op = OpCode::from_i32(header.op).ok_or_else(|| {
            ZkError::MalformedRecord(format!("unknown multi result type: {}", header.op))
        })?;
        let result = match op {
            OpCode::Create => OpResult::Create {
                path: r.read_string()?,
            },
            OpCode::Delete => OpResult::Delete,
            OpCode::SetData => OpResult::SetData {
                stat: Stat::read(r)?,
            },
            OpCode::Check => OpResult::Check,
            OpCode::Error => OpResult::Error {
                code: r.read_i32()?,
            },
            other => {
                return Err(ZkError::MalformedRecord(format!(
                    "{:?} is not a multi result",
                    other
                )))
            }
        };
        results.push(result);
    }
}

fn encode_multi(w: &mut RecordWriter, results: &[OpResult]) {
    for result in results {
        let err = match result {
            OpResult::Error { code } => *code,
            _ => error_code::OK,
        };
        MultiHeader {
            op: result.op_code().as_i32(),
            done: false,
            err,
        }
        .write(w);
        match result {
            OpResult::Create { path } => w.write_string(path),
            OpResult::SetData { stat } => stat.write(w),
            OpResult::Error { code } => w.write_i32(*code),
            OpResult::Delete | OpResult::Check => {}
        }
    }
    MultiHeader::DONE.write(w);
}

/// An inbound frame, classified by xid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Watch notification pushed by the server.
    Notification {
        /// Zxid in the header.
        zxid: i64,
        /// The event.
        event: WatcherEvent,
    },
    /// Heartbeat reply.
    Ping {
        /// Zxid in the header.
        zxid: i64,
    },
    /// Reply to an auth packet.
    Auth {
        /// Error code; `AUTH_FAILED` on rejection.
        err: i32,
    },
    /// Reply to a set-watches packet.
    SetWatches {
        /// Error code.
        err: i32,
    },
    /// Reply to a queued request; the body is decoded by the pipeline,
    /// which knows the op.
    Response {
        /// Reply header.
        header: ReplyHeader,
        /// Undecoded body.
        body: Bytes,
    },
}

impl Reply {
    /// Classifies a frame (without length prefix).
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        let header = {
            let mut r = RecordReader::new(&frame);
            ReplyHeader::read(&mut r)?
        };
        let body = frame.split_off(REPLY_HEADER_SIZE);

        let reply = match header.xid {
            NOTIFICATION_XID => Self::Notification {
                zxid: header.zxid,
                event: WatcherEvent::from_bytes(&body)?,
            },
            PING_XID => Self::Ping { zxid: header.zxid },
            AUTH_XID => Self::Auth { err: header.err },
            SET_WATCHES_XID => Self::SetWatches { err: header.err },
            _ => Self::Response { header, body },
        };
        Ok(reply)
    }

    /// Encodes a reply frame (without length prefix).
    pub fn encode(header: ReplyHeader, body: &[u8]) -> BytesMut {
        let mut w = RecordWriter::with_capacity(REPLY_HEADER_SIZE + body.len());
        header.write(&mut w);
        let mut buf = w.into_inner();
        buf.extend_from_slice(body);
        buf
    }

    /// Encodes a notification frame.
    pub fn notification(zxid: i64, event: &WatcherEvent) -> BytesMut {
        let header = ReplyHeader {
            xid: NOTIFICATION_XID,
            zxid,
            err: error_code::OK,
        };
        Self::encode(header, &event.to_bytes())
    }
}
