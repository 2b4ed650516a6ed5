//! The per-client I/O task.
//!
//! One task owns the socket. It writes everything the pipeline queues,
//! routes every inbound frame, keeps the connection alive with pings and
//! re-establishes the session on another server when the connection drops.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::instrument;
use zookeeper_core::protocol::{
    error_code, ConnectRequest, Reply, Request, WatchedEvent, PING_XID, PROTOCOL_VERSION,
    SESSION_PASSWORD_LEN,
};
use zookeeper_core::{Result, ZkError};

use super::{Heartbeat, HeartbeatAction, SessionEvent, SessionShared};
use crate::config::ClientConfig;
use crate::connection::{Backoff, Connection, HostProvider};
use crate::pipeline::RequestPipeline;
use crate::watch::{Terminal, WatchRegistry};

/// A connection with a completed handshake, attached to the pipeline.
#[derive(Debug)]
pub(crate) struct Established {
    server: String,
    conn: Connection,
    rx: mpsc::UnboundedReceiver<BytesMut>,
}

enum Handshake {
    Established(Established),
    Expired,
}

enum Outcome {
    Shutdown,
    Terminal(Terminal),
    Lost(String),
}

/// Owns session establishment and the I/O loop.
#[derive(Debug)]
pub(crate) struct SessionManager {
    config: Arc<ClientConfig>,
    shared: Arc<SessionShared>,
    pipeline: Arc<RequestPipeline>,
    watches: Arc<WatchRegistry>,
    hosts: HostProvider,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl SessionManager {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        shared: Arc<SessionShared>,
        pipeline: Arc<RequestPipeline>,
        watches: Arc<WatchRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let hosts = HostProvider::new(config.servers().to_vec());
        let backoff = Backoff::from_config(config.retry());
        Self {
            config,
            shared,
            pipeline,
            watches,
            hosts,
            backoff,
            shutdown,
        }
    }

    /// Creates a new session, trying servers until one accepts or the
    /// retry budget is spent.
    #[instrument(
        name = "session_manager.connect",
        skip(self),
        fields(
            servers = self.hosts.len(),
            max_retries = self.config.retry().max_retries()
        )
    )]
    pub(crate) async fn connect(&mut self) -> Result<Established> {
        let attempts = self.config.retry().max_retries().saturating_add(1);
        let mut last_error = String::from("no servers configured");

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.backoff.next_delay();
                tracing::debug!(attempt = attempt, backoff = ?delay, "retrying connect");
                tokio::time::sleep(delay).await;
            }

            let Some(server) = self.hosts.next() else {
                break;
            };
            self.shared.publish(SessionEvent::Connecting {
                server: server.clone(),
                attempt,
            });

            let connect_timeout = self.config.connect_timeout();
            match self.try_connect(&server, connect_timeout).await {
                Ok(Handshake::Established(established)) => return Ok(established),
                Ok(Handshake::Expired) => {
                    last_error = format!("{} refused to create a session", server);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        server = %server,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
            self.hosts.mark_failed(&server);
        }

        self.shared.publish(SessionEvent::Disconnected {
            address: None,
            reason: last_error.clone(),
        });
        Err(ZkError::ConnectionLoss(format!(
            "unable to connect after {} attempts: {}",
            attempts, last_error
        )))
    }

    /// Starts the I/O task on an established connection.
    pub(crate) fn spawn(self, established: Established) -> JoinHandle<()> {
        tokio::spawn(self.run(established))
    }

    async fn run(mut self, mut established: Established) {
        loop {
            let outcome = self.drive(&mut established).await;
            let Established { server, conn, .. } = established;
            let address = conn.address();
            let conn_id = conn.id();
            conn.close().await;

            let reason = match outcome {
                Outcome::Shutdown => return self.finish(Terminal::Closed),
                Outcome::Terminal(terminal) => return self.finish(terminal),
                Outcome::Lost(reason) => reason,
            };

            tracing::warn!(
                conn = %conn_id,
                address = %address,
                reason = %reason,
                "connection lost"
            );
            self.pipeline.connection_lost(&reason);
            self.shared.set_server(None);
            self.shared.publish(SessionEvent::Disconnected {
                address: Some(address),
                reason,
            });
            self.hosts.mark_failed(&server);

            if self.shared.is_closing() || *self.shutdown.borrow() {
                return self.finish(Terminal::Closed);
            }

            established = match self.reconnect().await {
                Ok(established) => established,
                Err(terminal) => return self.finish(terminal),
            };
        }
    }

    /// Resumes the session on any server before it times out.
    #[instrument(
        name = "session_manager.reconnect",
        skip(self),
        fields(session_id = self.shared.session_id())
    )]
    async fn reconnect(&mut self) -> std::result::Result<Established, Terminal> {
        let disconnected_at = Instant::now();
        let mut shutdown = self.shutdown.clone();
        let mut attempt = 0u32;

        loop {
            let session_timeout = self.shared.negotiated_timeout();
            let remaining = session_timeout.saturating_sub(disconnected_at.elapsed());
            if remaining.is_zero() {
                tracing::warn!(
                    timeout = ?session_timeout,
                    "session timed out while disconnected"
                );
                return Err(Terminal::Expired);
            }

            if attempt > 0 {
                let delay = self.backoff.next_delay().min(remaining);
                tracing::debug!(attempt = attempt, backoff = ?delay, "waiting before reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Err(Terminal::Closed),
                }
            }
            attempt += 1;

            // A handshake may not outlive the session it is resuming.
            let remaining = session_timeout.saturating_sub(disconnected_at.elapsed());
            if remaining.is_zero() {
                continue;
            }
            let connect_timeout = self.config.connect_timeout().min(remaining);

            let Some(server) = self.hosts.next() else {
                return Err(Terminal::Closed);
            };
            self.shared.publish(SessionEvent::Connecting {
                server: server.clone(),
                attempt,
            });

            let result = tokio::select! {
                result = self.try_connect(&server, connect_timeout) => result,
                _ = shutdown.changed() => return Err(Terminal::Closed),
            };
            match result {
                Ok(Handshake::Established(established)) => {
                    tracing::info!(attempt = attempt, server = %server, "session resumed");
                    return Ok(established);
                }
                Ok(Handshake::Expired) => {
                    tracing::warn!(server = %server, "server reports session expired");
                    return Err(Terminal::Expired);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        server = %server,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    self.hosts.mark_failed(&server);
                }
            }
        }
    }

    /// Opens a connection, performs the handshake within `connect_timeout`
    /// and attaches the pipeline.
    async fn try_connect(&mut self, server: &str, connect_timeout: Duration) -> Result<Handshake> {
        let session = self.shared.snapshot();
        let password = if session.session_id == 0 {
            vec![0; SESSION_PASSWORD_LEN]
        } else {
            session.password
        };
        let request = ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: session.last_zxid_seen,
            timeout: duration_to_millis(self.config.session_timeout()),
            session_id: session.session_id,
            password,
            read_only: self.config.can_be_read_only(),
        };

        let max_packet_size = self.config.max_packet_size();
        let handshake = async {
            let mut conn = Connection::connect(server, max_packet_size).await?;
            let response = conn.handshake(&request).await?;
            Ok::<_, ZkError>((conn, response))
        };
        let (conn, response) = timeout(connect_timeout, handshake).await.map_err(|_| {
            ZkError::ConnectionLoss(format!(
                "handshake with {} timed out after {:?}",
                server, connect_timeout
            ))
        })??;

        if response.timeout <= 0 {
            conn.close().await;
            return Ok(Handshake::Expired);
        }
        if session.session_id != 0 && response.session_id != session.session_id {
            conn.close().await;
            return Err(ZkError::MalformedRecord(format!(
                "server resumed session 0x{:x} instead of 0x{:x}",
                response.session_id, session.session_id
            )));
        }

        let negotiated = Duration::from_millis(response.timeout as u64);
        self.shared
            .establish(response.session_id, response.password, negotiated);
        self.hosts.mark_connected();
        self.backoff.reset();

        let (tx, rx) = mpsc::unbounded_channel();
        let set_watches = self.watches.set_watches(self.shared.last_zxid());
        self.pipeline.attach(tx, response.read_only, set_watches);

        let address = conn.address();
        self.shared.set_server(Some(address));
        self.shared.publish(SessionEvent::Connected {
            session_id: response.session_id,
            address,
            read_only: response.read_only,
        });
        tracing::info!(
            conn = %conn.id(),
            address = %address,
            session_id = %format_args!("0x{:x}", response.session_id),
            timeout = ?negotiated,
            read_only = response.read_only,
            "session established"
        );

        Ok(Handshake::Established(Established {
            server: server.to_string(),
            conn,
            rx,
        }))
    }

    /// Runs the I/O loop until the connection ends.
    async fn drive(&mut self, established: &mut Established) -> Outcome {
        let mut heartbeat = Heartbeat::new(self.shared.negotiated_timeout(), Instant::now());
        let mut ticker = interval(heartbeat.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Outcome::Shutdown;
                    }
                }
                frame = established.conn.receive() => match frame {
                    Ok(Some(frame)) => {
                        heartbeat.on_receive();
                        if let Err(e) = self.handle_frame(frame) {
                            return match e {
                                ZkError::AuthFailed => Outcome::Terminal(Terminal::AuthFailed),
                                other => Outcome::Lost(other.to_string()),
                            };
                        }
                    }
                    Ok(None) => return Outcome::Lost("server closed the connection".to_string()),
                    Err(e) => return Outcome::Lost(e.to_string()),
                },
                packet = established.rx.recv() => match packet {
                    Some(packet) => {
                        if let Err(e) = established.conn.send(packet).await {
                            return Outcome::Lost(e.to_string());
                        }
                        heartbeat.on_send(Instant::now());
                    }
                    None => return Outcome::Lost("request channel closed".to_string()),
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    match heartbeat.poll(now) {
                        HeartbeatAction::Idle => {}
                        HeartbeatAction::SendPing => {
                            if let Err(e) = established.conn.send(Request::Ping.encode(PING_XID)).await {
                                return Outcome::Lost(e.to_string());
                            }
                            heartbeat.on_ping_sent(now);
                        }
                        HeartbeatAction::Dead => {
                            return Outcome::Lost(format!(
                                "no reply from server within {:?}",
                                heartbeat.interval() * 2
                            ));
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: BytesMut) -> Result<()> {
        match Reply::decode(frame.freeze())? {
            Reply::Notification { zxid, event } => {
                self.shared.observe_zxid(zxid);
                let event = WatchedEvent::try_from(event)?;
                self.watches.dispatch(event);
            }
            Reply::Ping { .. } => {
                tracing::trace!("ping reply");
            }
            Reply::Auth { err } => match err {
                error_code::OK => tracing::debug!("credentials accepted"),
                error_code::AUTH_FAILED => {
                    tracing::error!("credentials rejected by server");
                    return Err(ZkError::AuthFailed);
                }
                other => tracing::warn!(code = other, "unexpected auth reply"),
            },
            Reply::SetWatches { err } => {
                if err != error_code::OK {
                    tracing::warn!(code = err, "failed to restore watches");
                }
            }
            Reply::Response { header, body } => {
                self.shared.observe_zxid(header.zxid);
                self.pipeline.complete(header, body)?;
            }
        }
        Ok(())
    }

    /// Moves the session into a terminal state. State is published before
    /// waiters are woken, so they observe it.
    fn finish(&self, terminal: Terminal) {
        let event = match terminal {
            Terminal::Expired => SessionEvent::Expired {
                session_id: self.shared.session_id(),
            },
            Terminal::AuthFailed => SessionEvent::AuthFailed,
            Terminal::Closed => SessionEvent::Closed,
        };
        self.shared.set_server(None);
        self.shared.publish(event);
        self.pipeline.terminate(terminal);
        self.watches.expire_all(terminal);
        tracing::info!(reason = ?terminal, "session ended");
    }
}

fn duration_to_millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}
