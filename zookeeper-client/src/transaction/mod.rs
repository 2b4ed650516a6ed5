//! Atomic multi-operation transactions.
//!
//! # Example
//!
//! ```ignore
//! use zookeeper_client::CreateOptions;
//!
//! let results = zk
//!     .transaction()
//!     .check("/config", 3)
//!     .create("/config/v4", CreateOptions::new().data(b"...".to_vec()))
//!     .set_data("/config", b"v4".to_vec(), Some(3))
//!     .commit()
//!     .await?;
//! ```

use zookeeper_core::protocol::{first_multi_error, MultiOp, OpResult, Request, Response, ANY_VERSION};
use zookeeper_core::{Result, ZkError};

use crate::client::ZooKeeper;
use crate::options::{CreateOptions, OperationOptions, ReplayPolicy};
use crate::path::validate_path;

/// Builder for a transaction. Either every operation is applied, or none.
///
/// Invalid paths are reported by [`Transaction::commit`] without contacting
/// the server.
#[derive(Debug)]
#[must_use = "a transaction does nothing until committed"]
pub struct Transaction {
    zk: ZooKeeper,
    ops: Vec<MultiOp>,
    error: Option<ZkError>,
    options: OperationOptions,
}

impl Transaction {
    pub(crate) fn new(zk: ZooKeeper) -> Self {
        Self {
            zk,
            ops: Vec::new(),
            error: None,
            options: OperationOptions::new().replay(ReplayPolicy::Never),
        }
    }

    /// Adds a node creation.
    pub fn create(mut self, path: &str, options: CreateOptions) -> Self {
        if self.accept(path, options.mode.is_sequential()) {
            self.ops.push(MultiOp::Create {
                path: self.zk.server_path(path),
                data: options.data,
                acl: options.acl,
                mode: options.mode,
            });
        }
        self
    }

    /// Adds a node deletion. `None` matches any version.
    pub fn delete(mut self, path: &str, version: Option<i32>) -> Self {
        if self.accept(path, false) {
            self.ops.push(MultiOp::Delete {
                path: self.zk.server_path(path),
                version: version.unwrap_or(ANY_VERSION),
            });
        }
        self
    }

    /// Adds a data update. `None` matches any version.
    pub fn set_data(mut self, path: &str, data: impl Into<Vec<u8>>, version: Option<i32>) -> Self {
        if self.accept(path, false) {
            self.ops.push(MultiOp::SetData {
                path: self.zk.server_path(path),
                data: data.into(),
                version: version.unwrap_or(ANY_VERSION),
            });
        }
        self
    }

    /// Adds a version assertion.
    pub fn check(mut self, path: &str, version: i32) -> Self {
        if self.accept(path, false) {
            self.ops.push(MultiOp::Check {
                path: self.zk.server_path(path),
                version,
            });
        }
        self
    }

    /// Sets a timeout for the commit.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options = self.options.timeout(timeout);
        self
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no operations were added.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies the operations atomically.
    ///
    /// On success returns one result per operation, in order. If any
    /// operation fails, nothing is applied and the first failure is
    /// returned. A commit interrupted by a disconnect fails with
    /// `ConnectionLoss` and is not retried, since it may have been applied.
    #[tracing::instrument(name = "transaction.commit", skip(self), fields(ops = self.ops.len()))]
    pub async fn commit(self) -> Result<Vec<OpResult>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .zk
            .dispatch(Request::Multi(self.ops), &self.options)
            .await?;
        let results = match response {
            Response::Multi(results) => results,
            other => {
                return Err(ZkError::MalformedRecord(format!(
                    "unexpected response: {:?}",
                    other
                )))
            }
        };

        if let Some(error) = first_multi_error(&results) {
            tracing::debug!(error = %error, "transaction rolled back");
            return Err(error);
        }

        Ok(results
            .into_iter()
            .map(|result| match result {
                OpResult::Create { path } => OpResult::Create {
                    path: self.zk.client_path(&path),
                },
                other => other,
            })
            .collect())
    }

    fn accept(&mut self, path: &str, sequential: bool) -> bool {
        if self.error.is_some() {
            return false;
        }
        match validate_path(path, sequential) {
            Ok(()) => true,
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }
}
