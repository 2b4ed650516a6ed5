//! Single connection to an ensemble member.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use zookeeper_core::protocol::{ConnectRequest, ConnectResponse, PacketCodec, Record};
use zookeeper_core::{Result, ZkError};

/// Process-wide sequence number of a connection, used to tell sessions'
/// successive sockets apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A framed TCP connection to one ensemble member.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    stream: TcpStream,
    codec: PacketCodec,
    read_buffer: BytesMut,
}

impl Connection {
    /// Wraps an established TCP stream.
    pub fn new(stream: TcpStream, address: SocketAddr, max_packet_size: usize) -> Self {
        Self {
            id: ConnectionId::next(),
            address,
            stream,
            codec: PacketCodec::with_max_packet_size(max_packet_size),
            read_buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Opens a TCP connection to `server` (`host:port`).
    pub async fn connect(server: &str, max_packet_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(server).await.map_err(|e| {
            ZkError::ConnectionLoss(format!("failed to connect to {}: {}", server, e))
        })?;

        stream.set_nodelay(true).map_err(|e| {
            ZkError::ConnectionLoss(format!("failed to set TCP_NODELAY: {}", e))
        })?;

        let address = stream.peer_addr()?;
        let conn = Self::new(stream, address, max_packet_size);
        tracing::debug!(id = %conn.id, address = %address, "established connection");
        Ok(conn)
    }

    /// Performs the session handshake.
    pub async fn handshake(&mut self, request: &ConnectRequest) -> Result<ConnectResponse> {
        self.send(request.to_bytes()).await?;
        match self.receive().await? {
            Some(packet) => ConnectResponse::from_bytes(&packet),
            None => Err(ZkError::ConnectionLoss(format!(
                "{} closed the connection during handshake",
                self.address
            ))),
        }
    }

    /// Sends one packet; the length prefix is added here.
    pub async fn send(&mut self, packet: BytesMut) -> Result<()> {
        let mut buf = BytesMut::with_capacity(packet.len() + 4);
        self.codec.encode(packet, &mut buf)?;

        self.stream.write_all(&buf).await.map_err(|e| {
            ZkError::ConnectionLoss(format!("failed to write to {}: {}", self.address, e))
        })?;
        Ok(())
    }

    /// Receives one packet, without its length prefix.
    ///
    /// Returns `None` if the connection is closed cleanly. Cancel-safe: bytes
    /// read before cancellation stay buffered for the next call.
    pub async fn receive(&mut self) -> Result<Option<BytesMut>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.read_buffer)? {
                return Ok(Some(packet));
            }

            let bytes_read = self.stream.read_buf(&mut self.read_buffer).await.map_err(|e| {
                ZkError::ConnectionLoss(format!("failed to read from {}: {}", self.address, e))
            })?;

            if bytes_read == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ZkError::ConnectionLoss(format!(
                    "connection to {} closed mid-packet",
                    self.address
                )));
            }
        }
    }

    /// Closes this connection.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
        tracing::debug!(id = %self.id, address = %self.address, "connection closed");
    }
}
