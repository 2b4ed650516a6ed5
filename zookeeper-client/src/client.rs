//! ZooKeeper client entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::instrument;
use zookeeper_core::protocol::{Acl, Request, Response, Stat, ANY_VERSION};
use zookeeper_core::{Result, ZkError};

use crate::config::{AuthCredential, ClientConfig};
use crate::listener::{spawn_state_listener, ListenerRegistration, StateListener};
use crate::options::{CreateOptions, OperationOptions, ReplayPolicy};
use crate::path::{join, parent, validate_path, Chroot};
use crate::pipeline::{PendingResponse, RequestPipeline};
use crate::session::{ConnectionState, Session, SessionEvent, SessionManager, SessionShared};
use crate::transaction::Transaction;
use crate::watch::{WatchRegistry, WatchTicket};

/// Handle to a ZooKeeper session.
///
/// Cloning is cheap; all clones share the session. The session is closed
/// without notifying the server when the last clone is dropped, so prefer
/// calling [`ZooKeeper::close`].
///
/// # Example
///
/// ```ignore
/// use zookeeper_client::{ClientConfig, CreateOptions, ZooKeeper};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .connect_string("10.0.0.1:2181,10.0.0.2:2181/app")
///         .build()?;
///
///     let zk = ZooKeeper::connect(config).await?;
///     zk.create("/config", CreateOptions::new().data(b"v1".to_vec())).await?;
///
///     let (data, stat) = zk.get_data("/config").await?;
///     zk.set_data("/config", b"v2".to_vec(), Some(stat.version)).await?;
///
///     zk.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ZooKeeper {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<ClientConfig>,
    chroot: Chroot,
    shared: Arc<SessionShared>,
    pipeline: Arc<RequestPipeline>,
    watches: Arc<WatchRegistry>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl ZooKeeper {
    /// Establishes a new session with the ensemble.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionLoss` if no server accepted a session within the
    /// configured number of attempts.
    #[instrument(
        name = "zookeeper.connect",
        skip(config),
        fields(servers = ?config.servers(), chroot = ?config.chroot())
    )]
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let chroot = Chroot::new(config.chroot().map(String::from));
        let watches = Arc::new(WatchRegistry::new(chroot.clone()));
        let pipeline = Arc::new(RequestPipeline::new(
            Arc::clone(&watches),
            config.auth().to_vec(),
            config.max_packet_size(),
        ));
        let shared = Arc::new(SessionShared::new(config.session_timeout()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut manager = SessionManager::new(
            Arc::clone(&config),
            Arc::clone(&shared),
            Arc::clone(&pipeline),
            Arc::clone(&watches),
            shutdown_rx,
        );
        let established = manager.connect().await?;
        let task = manager.spawn(established);

        tracing::info!(
            session_id = %format_args!("0x{:x}", shared.session_id()),
            "connected to ZooKeeper"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                chroot,
                shared,
                pipeline,
                watches,
                shutdown_tx,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Closes the session on the server and stops the I/O task.
    ///
    /// Pending requests and watches fail with `Closed`. Closing an already
    /// terminated session is a no-op.
    #[instrument(
        name = "zookeeper.close",
        skip(self),
        fields(session_id = self.session_id())
    )]
    pub async fn close(&self) -> Result<()> {
        let mut state_rx = self.inner.shared.watch_state();
        if !self.state().is_terminal() {
            self.inner.shared.begin_close();
            if self.state().is_connected() {
                let pending = self.inner.pipeline.submit(
                    Request::CloseSession,
                    ReplayPolicy::Never,
                    Some(self.inner.config.connect_timeout()),
                );
                if let Err(e) = pending.await {
                    tracing::debug!(error = %e, "close request did not complete");
                }
            }
            let _ = self.inner.shutdown_tx.send(true);
            let _ = state_rx.wait_for(|state| state.is_terminal()).await;
        }

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("session closed");
        Ok(())
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Returns a receiver that always holds the latest connection state.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.watch_state()
    }

    /// Subscribes to session transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.shared.subscribe()
    }

    /// Registers a listener for session transitions.
    pub fn add_state_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: StateListener + 'static,
    {
        let registration = ListenerRegistration::new();
        spawn_state_listener(
            Arc::new(listener),
            self.inner.shared.subscribe(),
            &registration,
        );
        registration
    }

    /// Returns the session id, 0 before the first handshake.
    pub fn session_id(&self) -> i64 {
        self.inner.shared.session_id()
    }

    /// Returns the session password.
    pub fn session_password(&self) -> Vec<u8> {
        self.inner.shared.snapshot().password
    }

    /// Returns the timeout negotiated with the server.
    pub fn session_timeout(&self) -> Duration {
        self.inner.shared.negotiated_timeout()
    }

    /// Returns a snapshot of the session.
    pub fn session(&self) -> Session {
        self.inner.shared.snapshot()
    }

    /// Returns the address of the connected server, if any.
    pub fn connected_server(&self) -> Option<SocketAddr> {
        self.inner.shared.server()
    }

    /// Returns the number of armed watches that have not fired and whose
    /// ticket is still held.
    pub fn pending_watches(&self) -> usize {
        self.inner.watches.len()
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Adds credentials to the session. They are re-sent on every
    /// reconnect. A rejection moves the session to `AuthFailed`.
    pub fn add_auth(&self, scheme: impl Into<String>, credential: impl Into<Vec<u8>>) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(terminal_error(state));
        }
        let credential = AuthCredential::new(scheme, credential);
        tracing::debug!(scheme = credential.scheme(), "adding credentials");
        self.inner.pipeline.add_auth(credential);
        Ok(())
    }

    /// Submits a request as-is and returns its pending reply.
    ///
    /// Paths are not validated and the chroot is not applied. Session
    /// control requests (ping, auth, set-watches, close) are rejected.
    pub fn submit(&self, request: Request, options: &OperationOptions) -> Result<PendingResponse> {
        if request.reserved_xid().is_some() || matches!(request, Request::CloseSession) {
            return Err(ZkError::BadArguments(format!(
                "{:?} cannot be submitted directly",
                request.op_code()
            )));
        }
        Ok(self.dispatch(request, options))
    }

    pub(crate) fn dispatch(&self, request: Request, options: &OperationOptions) -> PendingResponse {
        let replay = options.get_replay().unwrap_or(if request.is_read_only() {
            ReplayPolicy::OnReconnect
        } else {
            ReplayPolicy::Never
        });
        let timeout = options
            .get_timeout()
            .or_else(|| self.inner.config.request_timeout());
        self.inner.pipeline.submit(request, replay, timeout)
    }

    pub(crate) fn server_path(&self, path: &str) -> String {
        self.inner.chroot.prepend(path)
    }

    pub(crate) fn client_path(&self, server_path: &str) -> String {
        self.inner.chroot.strip(server_path)
    }

    /// Creates a node and returns its actual path, which differs from
    /// `path` for sequential nodes.
    pub async fn create(&self, path: &str, options: CreateOptions) -> Result<String> {
        self.create_with(path, options, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::create`] with per-call options.
    pub async fn create_with(
        &self,
        path: &str,
        options: CreateOptions,
        op: &OperationOptions,
    ) -> Result<String> {
        validate_path(path, options.mode.is_sequential())?;
        let request = Request::Create {
            path: self.server_path(path),
            data: options.data,
            acl: options.acl,
            mode: options.mode,
        };
        match self.dispatch(request, op).await? {
            Response::Created(created) => Ok(self.client_path(&created)),
            other => Err(unexpected(other)),
        }
    }

    /// Deletes a node. `None` matches any version.
    pub async fn delete(&self, path: &str, version: Option<i32>) -> Result<()> {
        self.delete_with(path, version, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::delete`] with per-call options.
    pub async fn delete_with(
        &self,
        path: &str,
        version: Option<i32>,
        op: &OperationOptions,
    ) -> Result<()> {
        validate_path(path, false)?;
        let request = Request::Delete {
            path: self.server_path(path),
            version: version.unwrap_or(ANY_VERSION),
        };
        match self.dispatch(request, op).await? {
            Response::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the node's stat, or `None` if it does not exist.
    pub async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.exists_with(path, &OperationOptions::default()).await
    }

    /// [`ZooKeeper::exists`] with per-call options.
    pub async fn exists_with(&self, path: &str, op: &OperationOptions) -> Result<Option<Stat>> {
        validate_path(path, false)?;
        let request = Request::Exists {
            path: self.server_path(path),
            watch: false,
        };
        stat_or_missing(self.dispatch(request, op).await)
    }

    /// Like [`ZooKeeper::exists`], and leaves a watch that fires when the
    /// node is created, changed or deleted.
    pub async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, WatchTicket)> {
        self.exists_w_with(path, &OperationOptions::default()).await
    }

    /// [`ZooKeeper::exists_w`] with per-call options.
    pub async fn exists_w_with(
        &self,
        path: &str,
        op: &OperationOptions,
    ) -> Result<(Option<Stat>, WatchTicket)> {
        validate_path(path, false)?;
        let request = Request::Exists {
            path: self.server_path(path),
            watch: true,
        };
        let (result, ticket) = self.dispatch(request, op).with_watch().await;
        let stat = stat_or_missing(result)?;
        Ok((stat, armed(ticket)?))
    }

    /// Returns the node's data and stat.
    pub async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.get_data_with(path, &OperationOptions::default()).await
    }

    /// [`ZooKeeper::get_data`] with per-call options.
    pub async fn get_data_with(&self, path: &str, op: &OperationOptions) -> Result<(Vec<u8>, Stat)> {
        validate_path(path, false)?;
        let request = Request::GetData {
            path: self.server_path(path),
            watch: false,
        };
        match self.dispatch(request, op).await? {
            Response::Data(data, stat) => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Like [`ZooKeeper::get_data`], and leaves a watch that fires when the
    /// data changes or the node is deleted.
    pub async fn get_data_w(&self, path: &str) -> Result<(Vec<u8>, Stat, WatchTicket)> {
        self.get_data_w_with(path, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::get_data_w`] with per-call options.
    pub async fn get_data_w_with(
        &self,
        path: &str,
        op: &OperationOptions,
    ) -> Result<(Vec<u8>, Stat, WatchTicket)> {
        validate_path(path, false)?;
        let request = Request::GetData {
            path: self.server_path(path),
            watch: true,
        };
        let (result, ticket) = self.dispatch(request, op).with_watch().await;
        match result? {
            Response::Data(data, stat) => Ok((data, stat, armed(ticket)?)),
            other => Err(unexpected(other)),
        }
    }

    /// Replaces the node's data. `None` matches any version.
    pub async fn set_data(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        version: Option<i32>,
    ) -> Result<Stat> {
        self.set_data_with(path, data, version, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::set_data`] with per-call options.
    pub async fn set_data_with(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        version: Option<i32>,
        op: &OperationOptions,
    ) -> Result<Stat> {
        validate_path(path, false)?;
        let request = Request::SetData {
            path: self.server_path(path),
            data: data.into(),
            version: version.unwrap_or(ANY_VERSION),
        };
        match self.dispatch(request, op).await? {
            Response::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the node's ACL and stat.
    pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)> {
        self.get_acl_with(path, &OperationOptions::default()).await
    }

    /// [`ZooKeeper::get_acl`] with per-call options.
    pub async fn get_acl_with(&self, path: &str, op: &OperationOptions) -> Result<(Vec<Acl>, Stat)> {
        validate_path(path, false)?;
        let request = Request::GetAcl {
            path: self.server_path(path),
        };
        match self.dispatch(request, op).await? {
            Response::Acl(acl, stat) => Ok((acl, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Replaces the node's ACL. `None` matches any ACL version.
    pub async fn set_acl(&self, path: &str, acl: Vec<Acl>, version: Option<i32>) -> Result<Stat> {
        self.set_acl_with(path, acl, version, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::set_acl`] with per-call options.
    pub async fn set_acl_with(
        &self,
        path: &str,
        acl: Vec<Acl>,
        version: Option<i32>,
        op: &OperationOptions,
    ) -> Result<Stat> {
        validate_path(path, false)?;
        if acl.is_empty() {
            return Err(ZkError::InvalidAcl);
        }
        let request = Request::SetAcl {
            path: self.server_path(path),
            acl,
            version: version.unwrap_or(ANY_VERSION),
        };
        match self.dispatch(request, op).await? {
            Response::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the node's child names and its stat.
    pub async fn get_children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        self.get_children_with(path, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::get_children`] with per-call options.
    pub async fn get_children_with(
        &self,
        path: &str,
        op: &OperationOptions,
    ) -> Result<(Vec<String>, Stat)> {
        validate_path(path, false)?;
        let request = Request::GetChildren {
            path: self.server_path(path),
            watch: false,
        };
        match self.dispatch(request, op).await? {
            Response::Children(children, stat) => Ok((children, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Like [`ZooKeeper::get_children`], and leaves a watch that fires when
    /// a child is added or removed, or the node is deleted.
    pub async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Stat, WatchTicket)> {
        self.get_children_w_with(path, &OperationOptions::default())
            .await
    }

    /// [`ZooKeeper::get_children_w`] with per-call options.
    pub async fn get_children_w_with(
        &self,
        path: &str,
        op: &OperationOptions,
    ) -> Result<(Vec<String>, Stat, WatchTicket)> {
        validate_path(path, false)?;
        let request = Request::GetChildren {
            path: self.server_path(path),
            watch: true,
        };
        let (result, ticket) = self.dispatch(request, op).with_watch().await;
        match result? {
            Response::Children(children, stat) => Ok((children, stat, armed(ticket)?)),
            other => Err(unexpected(other)),
        }
    }

    /// Waits until the connected server has caught up with the leader.
    pub async fn sync(&self, path: &str) -> Result<()> {
        self.sync_with(path, &OperationOptions::default()).await
    }

    /// [`ZooKeeper::sync`] with per-call options.
    pub async fn sync_with(&self, path: &str, op: &OperationOptions) -> Result<()> {
        validate_path(path, false)?;
        let request = Request::Sync {
            path: self.server_path(path),
        };
        match self.dispatch(request, op).await? {
            Response::Synced(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Starts an atomic transaction.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Creates `path` and every missing ancestor.
    ///
    /// Ancestors are created persistent with the same ACL and no data.
    /// Nodes created concurrently by someone else are accepted.
    #[instrument(name = "zookeeper.mkdirp", skip(self, options), fields(path = %path))]
    pub async fn mkdirp(&self, path: &str, options: CreateOptions) -> Result<String> {
        let sequential = options.mode.is_sequential();
        validate_path(path, sequential)?;

        let mut ancestors = Vec::new();
        let mut current = parent(path);
        while let Some(ancestor) = current {
            if ancestor == "/" {
                break;
            }
            ancestors.push(ancestor);
            current = parent(ancestor);
        }

        for ancestor in ancestors.into_iter().rev() {
            let parent_options = CreateOptions::new().acl(options.acl.clone());
            match self.create(ancestor, parent_options).await {
                Ok(_) | Err(ZkError::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }

        match self.create(path, options).await {
            Err(ZkError::NodeExists) if !sequential => Ok(path.to_string()),
            result => result,
        }
    }

    /// Lists `path` and all its descendants, breadth first, `path` first.
    ///
    /// Children of one node are sorted. Nodes deleted while listing are
    /// skipped.
    #[instrument(name = "zookeeper.list_subtree_bfs", skip(self), fields(path = %path))]
    pub async fn list_subtree_bfs(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path, false)?;

        let mut nodes = vec![path.to_string()];
        let mut level = vec![path.to_string()];
        while !level.is_empty() {
            let listings = try_join_all(level.iter().map(|node| async move {
                match self.get_children(node).await {
                    Ok((mut children, _)) => {
                        children.sort();
                        Ok(children
                            .iter()
                            .map(|child| join(node, child))
                            .collect::<Vec<_>>())
                    }
                    Err(ZkError::NoNode) if node != path => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            }))
            .await?;

            level = listings.into_iter().flatten().collect();
            nodes.extend(level.iter().cloned());
        }
        Ok(nodes)
    }

    /// Deletes `path` and all its descendants, deepest first. `version`
    /// applies to `path` only.
    #[instrument(name = "zookeeper.delete_recursive", skip(self), fields(path = %path))]
    pub async fn delete_recursive(&self, path: &str, version: Option<i32>) -> Result<()> {
        validate_path(path, false)?;
        if path == "/" {
            return Err(ZkError::BadArguments(
                "the root node cannot be deleted".to_string(),
            ));
        }

        let nodes = self.list_subtree_bfs(path).await?;
        for node in nodes.iter().skip(1).rev() {
            match self.delete(node, None).await {
                Ok(()) | Err(ZkError::NoNode) => {}
                Err(e) => return Err(e),
            }
        }
        self.delete(path, version).await
    }
}

fn unexpected(response: Response) -> ZkError {
    ZkError::MalformedRecord(format!("unexpected response: {:?}", response))
}

fn stat_or_missing(result: Result<Response>) -> Result<Option<Stat>> {
    match result {
        Ok(Response::Stat(stat)) => Ok(Some(stat)),
        Ok(other) => Err(unexpected(other)),
        Err(ZkError::NoNode) => Ok(None),
        Err(e) => Err(e),
    }
}

fn armed(ticket: Option<WatchTicket>) -> Result<WatchTicket> {
    ticket.ok_or_else(|| ZkError::ConnectionLoss("watch was not armed".to_string()))
}

fn terminal_error(state: ConnectionState) -> ZkError {
    match state {
        ConnectionState::Expired => ZkError::SessionExpired,
        ConnectionState::AuthFailed => ZkError::AuthFailed,
        _ => ZkError::Closed,
    }
}
