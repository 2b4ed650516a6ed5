//! Node metadata, ACLs and create modes.

use std::fmt;
use std::ops::BitOr;

use super::jute::{Record, RecordReader, RecordWriter};
use crate::error::{Result, ZkError};

/// Statistics about a node, as maintained by the ensemble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Stat {
    /// Zxid of the change that created the node.
    pub czxid: i64,
    /// Zxid of the change that last modified the node.
    pub mzxid: i64,
    /// Creation time in milliseconds since the epoch.
    pub ctime: i64,
    /// Last modification time in milliseconds since the epoch.
    pub mtime: i64,
    /// Number of changes to the data.
    pub version: i32,
    /// Number of changes to the children.
    pub cversion: i32,
    /// Number of changes to the ACL.
    pub aversion: i32,
    /// Session id of the owner if ephemeral, otherwise 0.
    pub ephemeral_owner: i64,
    /// Length of the data.
    pub data_length: i32,
    /// Number of children.
    pub num_children: i32,
    /// Zxid of the change that last modified the children.
    pub pzxid: i64,
}

impl Stat {
    /// Returns `true` if the node is owned by a session.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

impl Record for Stat {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i64(self.czxid);
        w.write_i64(self.mzxid);
        w.write_i64(self.ctime);
        w.write_i64(self.mtime);
        w.write_i32(self.version);
        w.write_i32(self.cversion);
        w.write_i32(self.aversion);
        w.write_i64(self.ephemeral_owner);
        w.write_i32(self.data_length);
        w.write_i32(self.num_children);
        w.write_i64(self.pzxid);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            czxid: r.read_i64()?,
            mzxid: r.read_i64()?,
            ctime: r.read_i64()?,
            mtime: r.read_i64()?,
            version: r.read_i32()?,
            cversion: r.read_i32()?,
            aversion: r.read_i32()?,
            ephemeral_owner: r.read_i64()?,
            data_length: r.read_i32()?,
            num_children: r.read_i32()?,
            pzxid: r.read_i64()?,
        })
    }
}

/// Permission bits of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Perms(i32);

impl Perms {
    /// Read data and list children.
    pub const READ: Perms = Perms(1);
    /// Write data.
    pub const WRITE: Perms = Perms(1 << 1);
    /// Create children.
    pub const CREATE: Perms = Perms(1 << 2);
    /// Delete children.
    pub const DELETE: Perms = Perms(1 << 3);
    /// Change the ACL.
    pub const ADMIN: Perms = Perms(1 << 4);
    /// Every permission.
    pub const ALL: Perms = Perms(31);
    /// No permission.
    pub const NONE: Perms = Perms(0);

    /// Wraps raw permission bits.
    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Returns the raw permission bits.
    pub fn bits(self) -> i32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

/// An authenticated identity: a scheme and an id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    /// Authentication scheme such as `world`, `auth` or `digest`.
    pub scheme: String,
    /// Identity within the scheme.
    pub id: String,
}

impl Id {
    /// Creates a new identity.
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// The `world:anyone` identity.
    pub fn anyone_unsafe() -> Self {
        Self::new("world", "anyone")
    }

    /// The identities the session has authenticated as.
    pub fn auth_ids() -> Self {
        Self::new("auth", "")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

impl Record for Id {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(&self.scheme);
        w.write_string(&self.id);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            scheme: r.read_string()?,
            id: r.read_string()?,
        })
    }
}

/// An access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    /// Granted permissions.
    pub perms: Perms,
    /// Identity the permissions are granted to.
    pub id: Id,
}

/// Smallest possible encoding of an [`Acl`]: perms plus two empty strings.
pub(crate) const MIN_ACL_SIZE: usize = 12;

impl Acl {
    /// Creates a new ACL entry.
    pub fn new(perms: Perms, id: Id) -> Self {
        Self { perms, id }
    }

    /// Completely open ACL: everyone may do everything.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(Perms::ALL, Id::anyone_unsafe())]
    }

    /// Every permission for the creator's authenticated identities.
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl::new(Perms::ALL, Id::auth_ids())]
    }

    /// Read-only access for everyone.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::new(Perms::READ, Id::anyone_unsafe())]
    }
}

impl Record for Acl {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.perms.bits());
        self.id.write(w);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            perms: Perms::from_bits(r.read_i32()?),
            id: Id::read(r)?,
        })
    }
}

pub(crate) fn write_acl_list(w: &mut RecordWriter, acl: &[Acl]) {
    w.write_vec(acl, |w, entry| entry.write(w));
}

pub(crate) fn read_acl_list(r: &mut RecordReader<'_>) -> Result<Vec<Acl>> {
    r.read_vec(MIN_ACL_SIZE, Acl::read)
}

/// How a node is created.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the creating session.
    #[default]
    Persistent = 0,
    /// Deleted when the creating session ends.
    Ephemeral = 1,
    /// Persistent, with a monotonically increasing 10-digit suffix.
    PersistentSequential = 2,
    /// Ephemeral, with a monotonically increasing 10-digit suffix.
    EphemeralSequential = 3,
}

impl CreateMode {
    /// Builds a mode from its two properties.
    pub fn new(ephemeral: bool, sequential: bool) -> Self {
        match (ephemeral, sequential) {
            (false, false) => Self::Persistent,
            (true, false) => Self::Ephemeral,
            (false, true) => Self::PersistentSequential,
            (true, true) => Self::EphemeralSequential,
        }
    }

    /// Parses the wire flags.
    pub fn from_flags(flags: i32) -> Result<Self> {
        match flags {
            0 => Ok(Self::Persistent),
            1 => Ok(Self::Ephemeral),
            2 => Ok(Self::PersistentSequential),
            3 => Ok(Self::EphemeralSequential),
            other => Err(ZkError::MalformedRecord(format!(
                "unknown create flags: {}",
                other
            ))),
        }
    }

    /// Returns the wire flags.
    pub fn flags(self) -> i32 {
        self as i32
    }

    /// Returns `true` for ephemeral modes.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    /// Returns `true` for sequential modes.
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}
