//! In-process ZooKeeper ensemble for integration tests.
//!
//! Speaks the real wire protocol through the core codec and keeps a small
//! in-memory tree with sessions, ephemerals, sequential nodes, one-shot
//! watches and transactions. Tests steer it through [`Ensemble`] to drop
//! connections, expire sessions, refuse or stall traffic and switch servers
//! to read-only mode.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use zookeeper_client::core::protocol::{
    error_code, Acl, ConnectRequest, ConnectResponse, CreateMode, EventType, KeeperState,
    MultiOp, OpResult, PacketCodec, Record, Reply, ReplyHeader, Request, Response, SetWatches,
    Stat, WatcherEvent, AUTH_XID, PING_XID, SESSION_PASSWORD_LEN, SET_WATCHES_XID,
};
use zookeeper_client::{
    ClientConfig, ClientConfigBuilder, ConnectionState, SessionEvent, ZooKeeper,
};

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Waits until the client reaches `state`, failing after five seconds.
pub async fn wait_for_state(zk: &ZooKeeper, state: ConnectionState) {
    let mut changes = zk.state_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}, still {}", state, zk.state()))
        .expect("state channel closed");
}

/// Returns the next session event matching `predicate`.
pub async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("session events closed"),
            }
        }
    })
    .await
    .expect("no matching session event")
}

/// Polls `condition` until it holds, failing after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// A set of fake servers sharing one tree.
pub struct Ensemble {
    store: Arc<Store>,
    servers: Vec<FakeServer>,
}

/// One listening member of the ensemble.
pub struct FakeServer {
    address: SocketAddr,
    control: Arc<Control>,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Address the server listens on.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Serves only read-only sessions while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.control.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Closes new connections right after accepting them while set.
    pub fn set_refusing(&self, refusing: bool) {
        self.control.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Reads but never answers while set.
    pub fn set_stalled(&self, stalled: bool) {
        self.control.stalled.store(stalled, Ordering::SeqCst);
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct Control {
    read_only: AtomicBool,
    refusing: AtomicBool,
    stalled: AtomicBool,
}

impl Ensemble {
    /// Starts `size` servers on ephemeral ports.
    pub async fn start(size: usize) -> Self {
        init_tracing();
        let store = Arc::new(Store::new());
        let mut servers = Vec::with_capacity(size);
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            let control = Arc::new(Control::default());
            let task = tokio::spawn(accept_loop(
                listener,
                Arc::clone(&store),
                Arc::clone(&control),
            ));
            servers.push(FakeServer {
                address,
                control,
                task,
            });
        }
        Self { store, servers }
    }

    /// Comma-separated addresses of every member.
    pub fn connect_string(&self) -> String {
        self.servers
            .iter()
            .map(|s| s.address.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Builder preset for this ensemble with short timeouts.
    pub fn config(&self) -> ClientConfigBuilder {
        ClientConfig::builder()
            .connect_string(self.connect_string())
            .session_timeout(Duration::from_millis(3000))
            .connect_timeout(Duration::from_millis(500))
            .retry(|r| {
                r.initial_backoff(Duration::from_millis(10))
                    .max_backoff(Duration::from_millis(100))
                    .max_retries(5)
            })
    }

    /// Connects a client with [`Ensemble::config`].
    pub async fn client(&self) -> ZooKeeper {
        ZooKeeper::connect(self.config().build().unwrap())
            .await
            .expect("failed to connect")
    }

    /// Returns member `index`.
    pub fn server(&self, index: usize) -> &FakeServer {
        &self.servers[index]
    }

    /// Drops every established connection; sessions survive.
    pub fn drop_connections(&self) {
        self.store.drop_connections();
    }

    /// Expires a session as the leader would after its timeout.
    pub fn expire_session(&self, session_id: i64) {
        self.store.close_session(session_id);
    }

    /// Returns `true` if the session is known to the ensemble.
    pub fn has_session(&self, session_id: i64) -> bool {
        self.store.state.lock().sessions.contains_key(&session_id)
    }

    /// Returns the node's data, bypassing any client.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.store
            .state
            .lock()
            .tree
            .nodes
            .get(path)
            .map(|n| n.data.clone())
    }

    /// Replaces a node's data behind every client's back.
    pub fn set_data(&self, path: &str, data: &[u8]) {
        let mut state = self.store.state.lock();
        let (_, events) = state
            .tree
            .set_data(path, data.to_vec(), -1)
            .expect("node must exist");
        state.notify(events);
    }

    /// Returns `true` if the node exists.
    pub fn exists(&self, path: &str) -> bool {
        self.store.state.lock().tree.nodes.contains_key(path)
    }

    /// Number of watches the ensemble holds for a session.
    pub fn watch_count(&self, session_id: i64) -> usize {
        self.store
            .state
            .lock()
            .sessions
            .get(&session_id)
            .map(|s| s.watches.len())
            .unwrap_or(0)
    }

    /// Credentials the ensemble accepted for a session.
    pub fn auth_schemes(&self, session_id: i64) -> Vec<String> {
        self.store
            .state
            .lock()
            .sessions
            .get(&session_id)
            .map(|s| s.auth.clone())
            .unwrap_or_default()
    }

    /// Requests received so far with the given op, across all sessions.
    pub fn request_count(&self, op: &str) -> usize {
        self.store
            .state
            .lock()
            .requests
            .get(op)
            .copied()
            .unwrap_or(0)
    }
}

async fn accept_loop(listener: TcpListener, store: Arc<Store>, control: Arc<Control>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        if control.refusing.load(Ordering::SeqCst) {
            drop(stream);
            continue;
        }
        tokio::spawn(serve(stream, Arc::clone(&store), Arc::clone(&control)));
    }
}

async fn serve(stream: TcpStream, store: Arc<Store>, control: Arc<Control>) {
    let mut framed = Framed::new(stream, PacketCodec::new());

    let Some(Ok(frame)) = framed.next().await else {
        return;
    };
    let Ok(request) = ConnectRequest::from_bytes(&frame) else {
        return;
    };
    let read_only = control.read_only.load(Ordering::SeqCst);
    if read_only && !request.read_only {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let Some((response, conn_id)) = store.open_session(&request, read_only, tx.clone()) else {
        let rejected = ConnectResponse {
            protocol_version: 0,
            timeout: 0,
            session_id: 0,
            password: vec![0; SESSION_PASSWORD_LEN],
            read_only: false,
        };
        let _ = framed.send(rejected.to_bytes()).await;
        return;
    };
    let session_id = response.session_id;
    if framed.send(response.to_bytes()).await.is_err() {
        store.detach(session_id, conn_id);
        return;
    }

    loop {
        tokio::select! {
            inbound = framed.next() => {
                let Some(Ok(frame)) = inbound else { break };
                store.count(&frame);
                if control.stalled.load(Ordering::SeqCst) {
                    continue;
                }
                let keep_open = store.handle(session_id, &frame, read_only, &tx);
                if !keep_open {
                    // Flush the final reply before closing.
                    while let Ok(outbound) = rx.try_recv() {
                        if outbound.is_empty() || framed.send(outbound).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(outbound) if !outbound.is_empty() => {
                        if framed.send(outbound).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
    store.detach(session_id, conn_id);
}

type Outbound = mpsc::UnboundedSender<BytesMut>;

struct Store {
    state: Mutex<State>,
    next_conn: AtomicU64,
}

#[derive(Default)]
struct State {
    tree: Tree,
    sessions: HashMap<i64, SessionEntry>,
    next_session: i64,
    requests: HashMap<String, usize>,
}

struct SessionEntry {
    password: Vec<u8>,
    timeout: i32,
    conn: Option<(u64, Outbound)>,
    watches: Watches,
    auth: Vec<String>,
}

#[derive(Default)]
struct Watches {
    data: HashSet<String>,
    exist: HashSet<String>,
    child: HashSet<String>,
}

impl Watches {
    fn len(&self) -> usize {
        self.data.len() + self.exist.len() + self.child.len()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.exist.clear();
        self.child.clear();
    }

    /// Removes and reports whether any watch matches the event.
    fn take(&mut self, event_type: EventType, path: &str) -> bool {
        match event_type {
            EventType::NodeCreated => self.exist.remove(path),
            EventType::NodeDataChanged => {
                let data = self.data.remove(path);
                self.exist.remove(path) || data
            }
            EventType::NodeDeleted => {
                let data = self.data.remove(path);
                let exist = self.exist.remove(path);
                self.child.remove(path) || data || exist
            }
            EventType::NodeChildrenChanged => self.child.remove(path),
            EventType::None => false,
        }
    }
}

impl Store {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tree: Tree::new(),
                next_session: 0x0100_0000_0000_0001,
                ..State::default()
            }),
            next_conn: AtomicU64::new(1),
        }
    }

    fn open_session(
        &self,
        request: &ConnectRequest,
        read_only: bool,
        tx: Outbound,
    ) -> Option<(ConnectResponse, u64)> {
        let conn_id = self.next_conn.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        let session_id = if request.session_id == 0 {
            let session_id = state.next_session;
            state.next_session += 1;
            let mut password = session_id.to_be_bytes().to_vec();
            password.extend_from_slice(&(!session_id).to_be_bytes());
            state.sessions.insert(
                session_id,
                SessionEntry {
                    password,
                    timeout: request.timeout,
                    conn: None,
                    watches: Watches::default(),
                    auth: Vec::new(),
                },
            );
            session_id
        } else {
            match state.sessions.get(&request.session_id) {
                Some(entry) if entry.password == request.password => request.session_id,
                _ => return None,
            }
        };

        let entry = state.sessions.get_mut(&session_id)?;
        if let Some((_, old)) = entry.conn.replace((conn_id, tx)) {
            let _ = old.send(BytesMut::new());
        }
        entry.watches.clear();
        entry.auth.clear();

        Some((
            ConnectResponse {
                protocol_version: 0,
                timeout: entry.timeout,
                session_id,
                password: entry.password.clone(),
                read_only,
            },
            conn_id,
        ))
    }

    fn detach(&self, session_id: i64, conn_id: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            if matches!(entry.conn, Some((id, _)) if id == conn_id) {
                entry.conn = None;
                entry.watches.clear();
            }
        }
    }

    fn drop_connections(&self) {
        let mut state = self.state.lock();
        for entry in state.sessions.values_mut() {
            if let Some((_, tx)) = entry.conn.take() {
                let _ = tx.send(BytesMut::new());
            }
            entry.watches.clear();
        }
    }

    fn close_session(&self, session_id: i64) {
        let mut state = self.state.lock();
        let Some(entry) = state.sessions.remove(&session_id) else {
            return;
        };
        if let Some((_, tx)) = entry.conn {
            let _ = tx.send(BytesMut::new());
        }
        let events = state.tree.remove_ephemerals(session_id);
        state.notify(events);
    }

    /// Tallies a received request frame by op, whether or not it is answered.
    fn count(&self, frame: &[u8]) {
        if let Ok((_, request)) = Request::decode(frame) {
            *self
                .state
                .lock()
                .requests
                .entry(format!("{:?}", request.op_code()))
                .or_default() += 1;
        }
    }

    /// Processes one request frame. Returns `false` to close the connection.
    fn handle(&self, session_id: i64, frame: &[u8], read_only: bool, tx: &Outbound) -> bool {
        let Ok((header, request)) = Request::decode(frame) else {
            return false;
        };
        let mut state = self.state.lock();
        let zxid = state.tree.zxid;

        let reply = |xid: i32, zxid: i64, err: i32, body: &[u8]| {
            let _ = tx.send(Reply::encode(ReplyHeader { xid, zxid, err }, body));
        };

        match request {
            Request::Ping => reply(PING_XID, zxid, error_code::OK, &[]),
            Request::Auth(packet) => {
                if packet.scheme == "digest" && packet.auth.contains(&b':') {
                    if let Some(entry) = state.sessions.get_mut(&session_id) {
                        entry.auth.push(packet.scheme);
                    }
                    reply(AUTH_XID, zxid, error_code::OK, &[]);
                } else {
                    reply(AUTH_XID, zxid, error_code::AUTH_FAILED, &[]);
                    return false;
                }
            }
            Request::SetWatches(watches) => {
                let events = state.restore_watches(session_id, watches);
                state.send_to(session_id, events);
                reply(SET_WATCHES_XID, zxid, error_code::OK, &[]);
            }
            Request::CloseSession => {
                let events = state.tree.remove_ephemerals(session_id);
                state.notify(events);
                let entry = state.sessions.remove(&session_id);
                reply(header.xid, state.tree.zxid, error_code::OK, &[]);
                drop(entry);
                return false;
            }
            request => {
                let outcome = if read_only && !request.op_code().is_read() {
                    Err((error_code::NOT_READ_ONLY, None))
                } else if let Request::Multi(ops) = request {
                    state.multi(session_id, ops)
                } else {
                    state.apply(session_id, request).map_err(|code| (code, None))
                };
                let zxid = state.tree.zxid;
                match outcome {
                    Ok(response) => reply(header.xid, zxid, error_code::OK, &response.encode()),
                    Err((code, body)) => {
                        let body = body.map(|r| r.encode()).unwrap_or_default();
                        reply(header.xid, zxid, code, &body)
                    }
                }
            }
        }
        true
    }
}

impl State {
    fn apply(&mut self, session_id: i64, request: Request) -> Result<Response, i32> {
        match request {
            Request::Create {
                path,
                data,
                acl,
                mode,
            } => {
                let (created, events) = self.tree.create(&path, data, acl, mode, session_id)?;
                self.notify(events);
                Ok(Response::Created(created))
            }
            Request::Delete { path, version } => {
                let events = self.tree.delete(&path, version)?;
                self.notify(events);
                Ok(Response::Empty)
            }
            Request::SetData {
                path,
                data,
                version,
            } => {
                let (stat, events) = self.tree.set_data(&path, data, version)?;
                self.notify(events);
                Ok(Response::Stat(stat))
            }
            Request::SetAcl { path, acl, version } => {
                Ok(Response::Stat(self.tree.set_acl(&path, acl, version)?))
            }
            Request::Check { path, version } => {
                self.tree.check(&path, version)?;
                Ok(Response::Empty)
            }
            Request::Exists { path, watch } => {
                let node = self.tree.nodes.get(&path).map(|n| n.stat);
                if watch {
                    self.watches_of(session_id).exist.insert(path);
                }
                node.map(Response::Stat).ok_or(error_code::NO_NODE)
            }
            Request::GetData { path, watch } => {
                let node = self.tree.nodes.get(&path).ok_or(error_code::NO_NODE)?;
                let response = Response::Data(node.data.clone(), node.stat);
                if watch {
                    self.watches_of(session_id).data.insert(path);
                }
                Ok(response)
            }
            Request::GetAcl { path } => {
                let node = self.tree.nodes.get(&path).ok_or(error_code::NO_NODE)?;
                Ok(Response::Acl(node.acl.clone(), node.stat))
            }
            Request::GetChildren { path, watch } => {
                let node = self.tree.nodes.get(&path).ok_or(error_code::NO_NODE)?;
                let response = Response::Children(self.tree.children(&path), node.stat);
                if watch {
                    self.watches_of(session_id).child.insert(path);
                }
                Ok(response)
            }
            Request::Sync { path } => Ok(Response::Synced(path)),
            _ => Err(error_code::UNIMPLEMENTED),
        }
    }

    /// Applies all operations or none. A failure still carries one result
    /// per operation.
    fn multi(
        &mut self,
        session_id: i64,
        ops: Vec<MultiOp>,
    ) -> Result<Response, (i32, Option<Response>)> {
        let total = ops.len();
        let mut scratch = self.tree.clone();
        let mut results = Vec::with_capacity(ops.len());
        let mut events = Vec::new();
        let mut failure = None;

        for (index, op) in ops.into_iter().enumerate() {
            let outcome = match op {
                MultiOp::Create {
                    path,
                    data,
                    acl,
                    mode,
                } => scratch
                    .create(&path, data, acl, mode, session_id)
                    .map(|(path, ev)| (OpResult::Create { path }, ev)),
                MultiOp::Delete { path, version } => scratch
                    .delete(&path, version)
                    .map(|ev| (OpResult::Delete, ev)),
                MultiOp::SetData {
                    path,
                    data,
                    version,
                } => scratch
                    .set_data(&path, data, version)
                    .map(|(stat, ev)| (OpResult::SetData { stat }, ev)),
                MultiOp::Check { path, version } => scratch
                    .check(&path, version)
                    .map(|()| (OpResult::Check, Vec::new())),
            };
            match outcome {
                Ok((result, ev)) => {
                    results.push(result);
                    events.extend(ev);
                }
                Err(code) => {
                    failure = Some((index, code));
                    results.push(OpResult::Error { code });
                    break;
                }
            }
        }

        let Some((failed, code)) = failure else {
            self.tree = scratch;
            self.notify(events);
            return Ok(Response::Multi(results));
        };

        let rolled_back = (0..total)
            .map(|index| {
                let code = match index.cmp(&failed) {
                    std::cmp::Ordering::Less => error_code::OK,
                    std::cmp::Ordering::Equal => code,
                    std::cmp::Ordering::Greater => error_code::RUNTIME_INCONSISTENCY,
                };
                OpResult::Error { code }
            })
            .collect();
        Err((code, Some(Response::Multi(rolled_back))))
    }

    fn watches_of(&mut self, session_id: i64) -> &mut Watches {
        &mut self
            .sessions
            .get_mut(&session_id)
            .expect("request from unknown session")
            .watches
    }

    fn restore_watches(&mut self, session_id: i64, watches: SetWatches) -> Vec<(EventType, String)> {
        let relative = watches.relative_zxid;
        let mut fired = Vec::new();
        let tree = &self.tree;
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return fired;
        };

        for path in watches.data_watches {
            match tree.nodes.get(&path) {
                None => fired.push((EventType::NodeDeleted, path)),
                Some(node) if node.stat.mzxid > relative => {
                    fired.push((EventType::NodeDataChanged, path))
                }
                Some(_) => {
                    entry.watches.data.insert(path);
                }
            }
        }
        for path in watches.exist_watches {
            match tree.nodes.get(&path) {
                Some(node) if node.stat.czxid > relative => {
                    fired.push((EventType::NodeCreated, path))
                }
                _ => {
                    entry.watches.exist.insert(path);
                }
            }
        }
        for path in watches.child_watches {
            match tree.nodes.get(&path) {
                None => fired.push((EventType::NodeDeleted, path)),
                Some(node) if node.stat.pzxid > relative => {
                    fired.push((EventType::NodeChildrenChanged, path))
                }
                Some(_) => {
                    entry.watches.child.insert(path);
                }
            }
        }
        fired
    }

    /// Fires matching watches of every session.
    fn notify(&mut self, events: Vec<(EventType, String)>) {
        let zxid = self.tree.zxid;
        for entry in self.sessions.values_mut() {
            for (event_type, path) in &events {
                if entry.watches.take(*event_type, path) {
                    if let Some((_, tx)) = &entry.conn {
                        let _ = tx.send(notification(zxid, *event_type, path));
                    }
                }
            }
        }
    }

    /// Sends events to one session without consulting its watches.
    fn send_to(&mut self, session_id: i64, events: Vec<(EventType, String)>) {
        let zxid = self.tree.zxid;
        if let Some((_, tx)) = self.sessions.get(&session_id).and_then(|e| e.conn.as_ref()) {
            for (event_type, path) in events {
                let _ = tx.send(notification(zxid, event_type, &path));
            }
        }
    }
}

fn notification(zxid: i64, event_type: EventType, path: &str) -> BytesMut {
    let event = WatcherEvent {
        event_type: event_type as i32,
        state: KeeperState::SyncConnected as i32,
        path: path.to_string(),
    };
    Reply::notification(zxid, &event)
}

#[derive(Clone)]
struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
}

#[derive(Clone)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    zxid: i64,
}

type Events = Vec<(EventType, String)>;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                acl: Acl::open_unsafe(),
                stat: Stat::default(),
            },
        );
        Self { nodes, zxid: 0 }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        acl: Vec<Acl>,
        mode: CreateMode,
        session_id: i64,
    ) -> Result<(String, Events), i32> {
        if acl.is_empty() {
            return Err(error_code::INVALID_ACL);
        }
        let parent_path = parent_of(path).to_string();
        let parent = self.nodes.get(&parent_path).ok_or(error_code::NO_NODE)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(error_code::NO_CHILDREN_FOR_EPHEMERALS);
        }
        let created = if mode.is_sequential() {
            format!("{}{:010}", path, parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&created) {
            return Err(error_code::NODE_EXISTS);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let now = now_millis();
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            ephemeral_owner: if mode.is_ephemeral() { session_id } else { 0 },
            data_length: data.len() as i32,
            pzxid: zxid,
            ..Stat::default()
        };
        self.nodes.insert(created.clone(), Node { data, acl, stat });
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.stat.cversion += 1;
            parent.stat.num_children += 1;
            parent.stat.pzxid = zxid;
        }

        let events = vec![
            (EventType::NodeCreated, created.clone()),
            (EventType::NodeChildrenChanged, parent_path),
        ];
        Ok((created, events))
    }

    fn delete(&mut self, path: &str, version: i32) -> Result<Events, i32> {
        if path == "/" {
            return Err(error_code::BAD_ARGUMENTS);
        }
        let node = self.nodes.get(path).ok_or(error_code::NO_NODE)?;
        if version != -1 && version != node.stat.version {
            return Err(error_code::BAD_VERSION);
        }
        if node.stat.num_children > 0 {
            return Err(error_code::NOT_EMPTY);
        }

        self.nodes.remove(path);
        self.zxid += 1;
        let parent_path = parent_of(path).to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.stat.cversion += 1;
            parent.stat.num_children -= 1;
            parent.stat.pzxid = self.zxid;
        }
        Ok(vec![
            (EventType::NodeDeleted, path.to_string()),
            (EventType::NodeChildrenChanged, parent_path),
        ])
    }

    fn set_data(&mut self, path: &str, data: Vec<u8>, version: i32) -> Result<(Stat, Events), i32> {
        let zxid = self.zxid + 1;
        let node = self.nodes.get_mut(path).ok_or(error_code::NO_NODE)?;
        if version != -1 && version != node.stat.version {
            return Err(error_code::BAD_VERSION);
        }
        self.zxid = zxid;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_millis();
        node.stat.data_length = data.len() as i32;
        node.data = data;
        Ok((node.stat, vec![(EventType::NodeDataChanged, path.to_string())]))
    }

    fn set_acl(&mut self, path: &str, acl: Vec<Acl>, version: i32) -> Result<Stat, i32> {
        if acl.is_empty() {
            return Err(error_code::INVALID_ACL);
        }
        let node = self.nodes.get_mut(path).ok_or(error_code::NO_NODE)?;
        if version != -1 && version != node.stat.aversion {
            return Err(error_code::BAD_VERSION);
        }
        node.stat.aversion += 1;
        node.acl = acl;
        self.zxid += 1;
        Ok(node.stat)
    }

    fn check(&self, path: &str, version: i32) -> Result<(), i32> {
        let node = self.nodes.get(path).ok_or(error_code::NO_NODE)?;
        if version != -1 && version != node.stat.version {
            return Err(error_code::BAD_VERSION);
        }
        Ok(())
    }

    fn remove_ephemerals(&mut self, session_id: i64) -> Events {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session_id)
            .map(|(path, _)| path.clone())
            .collect();
        let mut events = Vec::new();
        for path in owned.iter().rev() {
            if let Ok(ev) = self.delete(path, -1) {
                events.extend(ev);
            }
        }
        events
    }
}
