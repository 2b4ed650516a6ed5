//! Request pipelining over a single session.
//!
//! Requests get an xid when they are written. Replies arrive in the order
//! requests were written, so the oldest in-flight entry must always carry
//! the xid of the next reply. Anything else is a protocol violation and
//! forces a reconnect.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use zookeeper_core::protocol::{
    first_multi_error, AuthPacket, OpCode, ReplyHeader, Request, Response, SetWatches, AUTH_XID,
    SET_WATCHES_XID,
};
use zookeeper_core::{Result, ZkError};

use crate::config::AuthCredential;
use crate::options::ReplayPolicy;
use crate::watch::{Terminal, WatchKind, WatchRegistry, WatchTicket};

/// Writer side of the channel drained by the I/O task.
pub(crate) type PacketSender = mpsc::UnboundedSender<BytesMut>;

struct Completion {
    result: Result<Response>,
    watch: Option<WatchTicket>,
}

impl Completion {
    fn failed(err: ZkError) -> Self {
        Self {
            result: Err(err),
            watch: None,
        }
    }
}

struct Queued {
    id: u64,
    request: Request,
    /// Encoded request; the xid is stamped when it is written.
    packet: BytesMut,
    replay: ReplayPolicy,
    tx: oneshot::Sender<Completion>,
}

struct InFlight {
    xid: i32,
    id: u64,
    request: Request,
    replay: ReplayPolicy,
    /// `None` once the caller gave up; the reply is still consumed.
    tx: Option<oneshot::Sender<Completion>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Disconnected,
    Connected { read_only: bool },
    Terminated(Terminal),
}

struct PipelineState {
    mode: Mode,
    writer: Option<PacketSender>,
    next_xid: i32,
    next_id: u64,
    in_flight: VecDeque<InFlight>,
    queued: VecDeque<Queued>,
    auth: Vec<AuthCredential>,
}

impl PipelineState {
    fn allocate_xid(&mut self) -> i32 {
        let xid = self.next_xid;
        self.next_xid = if xid == i32::MAX { 1 } else { xid + 1 };
        xid
    }

    /// Writes a request to the current connection, handing it back if
    /// there is none.
    fn write(&mut self, mut queued: Queued) -> std::result::Result<(), Queued> {
        let xid = self.next_xid;
        let Some(writer) = &self.writer else {
            return Err(queued);
        };
        let mut packet = std::mem::take(&mut queued.packet);
        stamp_xid(&mut packet, xid);
        if let Err(mpsc::error::SendError(packet)) = writer.send(packet) {
            queued.packet = packet;
            return Err(queued);
        }
        self.allocate_xid();

        tracing::trace!(xid = xid, op = ?queued.request.op_code(), "request written");
        self.in_flight.push_back(InFlight {
            xid,
            id: queued.id,
            request: queued.request,
            replay: queued.replay,
            tx: Some(queued.tx),
        });
        Ok(())
    }
}

/// Matches replies to requests and owns the queue of requests waiting for
/// a connection.
pub(crate) struct RequestPipeline {
    state: Mutex<PipelineState>,
    watches: Arc<WatchRegistry>,
    max_packet_size: usize,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestPipeline")
            .field("mode", &state.mode)
            .field("in_flight", &state.in_flight.len())
            .field("queued", &state.queued.len())
            .finish()
    }
}

impl RequestPipeline {
    pub(crate) fn new(
        watches: Arc<WatchRegistry>,
        auth: Vec<AuthCredential>,
        max_packet_size: usize,
    ) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                mode: Mode::Disconnected,
                writer: None,
                next_xid: 1,
                next_id: 1,
                in_flight: VecDeque::new(),
                queued: VecDeque::new(),
                auth,
            }),
            watches,
            max_packet_size,
        }
    }

    /// Enqueues a request. It is written immediately when connected and
    /// queued otherwise. A request too large for the server is failed with
    /// `BadArguments` without touching the connection.
    pub(crate) fn submit(
        self: &Arc<Self>,
        request: Request,
        replay: ReplayPolicy,
        timeout: Option<Duration>,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let packet = request.encode(0);
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let rejected = match state.mode {
            Mode::Terminated(terminal) => Some(terminal.error()),
            _ if packet.len() > self.max_packet_size => {
                tracing::warn!(
                    op = ?request.op_code(),
                    size = packet.len(),
                    limit = self.max_packet_size,
                    "request exceeds max packet size"
                );
                Some(ZkError::BadArguments(format!(
                    "request of {} bytes exceeds max packet size of {}",
                    packet.len(),
                    self.max_packet_size
                )))
            }
            Mode::Connected { read_only: true } if !request.is_read_only() => {
                Some(ZkError::NotWritable)
            }
            _ => None,
        };
        if let Some(err) = rejected {
            drop(state);
            let _ = tx.send(Completion::failed(err));
            return PendingResponse::new(id, rx, None, None);
        }

        let queued = Queued {
            id,
            request,
            packet,
            replay,
            tx,
        };
        if let Err(queued) = state.write(queued) {
            state.queued.push_back(queued);
        }
        drop(state);

        PendingResponse::new(id, rx, Some(Arc::clone(self)), timeout)
    }

    /// Switches to a new connection: re-sends credentials and watches, then
    /// flushes the queue in submission order.
    pub(crate) fn attach(
        &self,
        writer: PacketSender,
        read_only: bool,
        set_watches: Option<SetWatches>,
    ) {
        let mut rejected = Vec::new();
        {
            let mut state = self.state.lock();
            if let Mode::Terminated(_) = state.mode {
                return;
            }

            for credential in &state.auth {
                let packet = Request::Auth(AuthPacket::new(
                    credential.scheme(),
                    credential.credential(),
                ));
                let _ = writer.send(packet.encode(AUTH_XID));
            }
            if let Some(set_watches) = set_watches {
                let _ = writer.send(Request::SetWatches(set_watches).encode(SET_WATCHES_XID));
            }

            state.writer = Some(writer);
            state.mode = Mode::Connected { read_only };

            let queued = std::mem::take(&mut state.queued);
            let flushed = queued.len();
            for entry in queued {
                if read_only && !entry.request.is_read_only() {
                    rejected.push(entry.tx);
                    continue;
                }
                if let Err(entry) = state.write(entry) {
                    state.queued.push_back(entry);
                }
            }
            tracing::debug!(
                flushed = flushed,
                rejected = rejected.len(),
                read_only = read_only,
                "pipeline attached to connection"
            );
        }

        for tx in rejected {
            let _ = tx.send(Completion::failed(ZkError::NotWritable));
        }
    }

    /// Drops the current connection. Requests in flight are re-queued ahead
    /// of anything already waiting if their policy allows it, and failed
    /// with `ConnectionLoss` otherwise.
    pub(crate) fn connection_lost(&self, reason: &str) {
        let mut failed = Vec::new();
        {
            let mut state = self.state.lock();
            state.writer = None;
            if !matches!(state.mode, Mode::Terminated(_)) {
                state.mode = Mode::Disconnected;
            }

            let in_flight = std::mem::take(&mut state.in_flight);
            for entry in in_flight.into_iter().rev() {
                let Some(tx) = entry.tx else {
                    continue;
                };
                match entry.replay {
                    ReplayPolicy::OnReconnect => state.queued.push_front(Queued {
                        id: entry.id,
                        packet: entry.request.encode(0),
                        request: entry.request,
                        replay: entry.replay,
                        tx,
                    }),
                    ReplayPolicy::Never => failed.push(tx),
                }
            }
            tracing::debug!(
                requeued = state.queued.len(),
                failed = failed.len(),
                "pipeline detached from connection"
            );
        }

        for tx in failed.into_iter().rev() {
            let _ = tx.send(Completion::failed(ZkError::ConnectionLoss(reason.to_string())));
        }
    }

    /// Fails everything with the terminal error and rejects later requests.
    pub(crate) fn terminate(&self, terminal: Terminal) {
        let (in_flight, queued) = {
            let mut state = self.state.lock();
            state.mode = Mode::Terminated(terminal);
            state.writer = None;
            (
                std::mem::take(&mut state.in_flight),
                std::mem::take(&mut state.queued),
            )
        };

        let pending = in_flight
            .into_iter()
            .filter_map(|entry| entry.tx)
            .chain(queued.into_iter().map(|entry| entry.tx));
        for tx in pending {
            let _ = tx.send(Completion::failed(terminal.error()));
        }
    }

    /// Delivers a reply to the oldest in-flight request.
    ///
    /// Returns an error if the reply breaks ordering or cannot be decoded;
    /// the connection must then be dropped.
    pub(crate) fn complete(&self, header: ReplyHeader, body: Bytes) -> Result<()> {
        let entry = {
            let mut state = self.state.lock();
            match state.in_flight.pop_front() {
                Some(entry) if entry.xid == header.xid => entry,
                Some(entry) => {
                    let expected = entry.xid;
                    state.in_flight.push_front(entry);
                    return Err(ZkError::MalformedRecord(format!(
                        "reply xid {} does not match expected xid {}",
                        header.xid, expected
                    )));
                }
                None => {
                    return Err(ZkError::MalformedRecord(format!(
                        "reply xid {} with nothing in flight",
                        header.xid
                    )))
                }
            }
        };

        let op = entry.request.op_code();
        let (result, malformed) = decode_reply(op, header.err, &body);

        match entry.tx {
            Some(tx) => {
                let watch = watch_target(&entry.request)
                    .filter(|(_, kind)| activates(*kind, &result))
                    .map(|(path, kind)| self.watches.register(path, kind));
                let _ = tx.send(Completion { result, watch });
            }
            None => {
                tracing::trace!(xid = header.xid, "reply for abandoned request dropped");
            }
        }

        match malformed {
            Some(reason) => Err(ZkError::MalformedRecord(reason)),
            None => Ok(()),
        }
    }

    /// Records credentials for every future connection and sends them on
    /// the current one.
    pub(crate) fn add_auth(&self, credential: AuthCredential) {
        let mut state = self.state.lock();
        if let Some(writer) = &state.writer {
            let packet = Request::Auth(AuthPacket::new(
                credential.scheme(),
                credential.credential(),
            ));
            let _ = writer.send(packet.encode(AUTH_XID));
        }
        state.auth.push(credential);
    }

    /// Forgets a request whose caller is no longer waiting.
    fn abandon(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.queued.iter().position(|entry| entry.id == id) {
            state.queued.remove(pos);
        } else if let Some(entry) = state.in_flight.iter_mut().find(|entry| entry.id == id) {
            entry.tx = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }
}

/// Overwrites the xid at the start of an encoded request header.
fn stamp_xid(packet: &mut [u8], xid: i32) {
    packet[..4].copy_from_slice(&xid.to_be_bytes());
}

fn decode_reply(op: OpCode, err: i32, body: &[u8]) -> (Result<Response>, Option<String>) {
    let server_error = ZkError::from_code(err);
    match server_error {
        // A failed transaction still carries per-operation results.
        Some(err) if op != OpCode::Multi || body.is_empty() => (Err(err), None),
        server_error => match Response::decode(op, body) {
            Ok(Response::Multi(results)) => match server_error {
                Some(err) if first_multi_error(&results).is_none() => (Err(err), None),
                _ => (Ok(Response::Multi(results)), None),
            },
            Ok(response) => (Ok(response), None),
            Err(e) => {
                let reason = format!("undecodable {:?} reply: {}", op, e);
                (Err(ZkError::MalformedRecord(reason.clone())), Some(reason))
            }
        },
    }
}

fn watch_target(request: &Request) -> Option<(&str, WatchKind)> {
    match request {
        Request::GetData { path, watch: true } => Some((path, WatchKind::Data)),
        Request::Exists { path, watch: true } => Some((path, WatchKind::Exists)),
        Request::GetChildren { path, watch: true } => Some((path, WatchKind::Children)),
        _ => None,
    }
}

/// An exists watch is also left on a missing node, to observe its creation.
fn activates(kind: WatchKind, result: &Result<Response>) -> bool {
    match result {
        Ok(_) => true,
        Err(ZkError::NoNode) => kind == WatchKind::Exists,
        Err(_) => false,
    }
}

/// Future for the reply to one request.
///
/// Dropping it, or calling [`PendingResponse::cancel`], abandons the
/// request: it is removed from the queue if not yet sent, and its reply is
/// discarded otherwise.
#[must_use = "futures do nothing unless polled"]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Completion>,
    pipeline: Option<Arc<RequestPipeline>>,
    deadline: Option<Pin<Box<Sleep>>>,
    done: bool,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

impl PendingResponse {
    fn new(
        id: u64,
        rx: oneshot::Receiver<Completion>,
        pipeline: Option<Arc<RequestPipeline>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            rx,
            pipeline,
            deadline: timeout.map(|t| Box::pin(tokio::time::sleep(t))),
            done: false,
        }
    }

    /// Abandons the request.
    pub fn cancel(mut self) {
        self.abandon();
    }

    /// Waits for the reply together with the watch it armed, if any.
    pub(crate) async fn with_watch(mut self) -> (Result<Response>, Option<WatchTicket>) {
        let completion = std::future::poll_fn(|cx| self.poll_completion(cx)).await;
        (completion.result, completion.watch)
    }

    fn poll_completion(&mut self, cx: &mut Context<'_>) -> Poll<Completion> {
        if let Poll::Ready(result) = Pin::new(&mut self.rx).poll(cx) {
            self.done = true;
            return Poll::Ready(result.unwrap_or_else(|_| Completion::failed(ZkError::Closed)));
        }
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                self.abandon();
                return Poll::Ready(Completion::failed(ZkError::OperationTimeout));
            }
        }
        Poll::Pending
    }

    fn abandon(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(pipeline) = &self.pipeline {
            pipeline.abandon(self.id);
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .poll_completion(cx)
            .map(|completion| completion.result)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.abandon();
    }
}
