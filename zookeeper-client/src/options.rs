//! Per-call options.

use std::time::Duration;

use zookeeper_core::protocol::{Acl, CreateMode};

/// Whether a request that was in flight when the connection dropped is
/// re-sent after the session is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Re-send on the next connection. Only safe for idempotent requests.
    OnReconnect,
    /// Fail with `ConnectionLoss`.
    Never,
}

/// Options for a single operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOptions {
    timeout: Option<Duration>,
    replay: Option<ReplayPolicy>,
}

impl OperationOptions {
    /// Creates options that use the client defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the call with `OperationTimeout` after `timeout`.
    ///
    /// A request already sent is not withdrawn from the server; its reply is
    /// discarded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the replay policy. Reads replay by default, writes do not.
    pub fn replay(mut self, policy: ReplayPolicy) -> Self {
        self.replay = Some(policy);
        self
    }

    /// Returns the explicit timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the explicit replay policy, if any.
    pub fn get_replay(&self) -> Option<ReplayPolicy> {
        self.replay
    }
}

/// What to create: payload, ACL and mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub(crate) data: Vec<u8>,
    pub(crate) acl: Vec<Acl>,
    pub(crate) mode: CreateMode,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            acl: Acl::open_unsafe(),
            mode: CreateMode::Persistent,
        }
    }
}

impl CreateOptions {
    /// Persistent node, open ACL, no data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ephemeral node, open ACL, no data.
    pub fn ephemeral() -> Self {
        Self::default().mode(CreateMode::Ephemeral)
    }

    /// Sets the initial payload.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets the ACL.
    pub fn acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = acl;
        self
    }

    /// Sets the create mode.
    pub fn mode(mut self, mode: CreateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the create mode.
    pub fn get_mode(&self) -> CreateMode {
        self.mode
    }
}
