//! Connection handling for the DSI streamer
//!
//! Owns the byte stream and turns it into packets. Partial packets stay in
//! the read buffer, so abandoning a pending read on timeout never loses bytes.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::protocol::{CodecError, Decoder, Packet};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Read timeout")]
    Timeout,

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),
}

impl ConnectionError {
    /// Whether the connection is still usable after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectionError::Timeout)
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Packets decoded
    pub packets_received: u64,
    /// Bytes read from the stream
    pub bytes_received: u64,
}

/// A packet-level view over a streamer byte stream
pub struct Connection<S = TcpStream> {
    /// The byte stream
    stream: S,
    /// Protocol decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection<TcpStream> {
    /// Connect to a streamer
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> ConnectionResult<Self> {
        tracing::info!("Connecting to DSI streamer at {}", addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectionError::Io(e)),
            Err(_) => return Err(ConnectionError::ConnectTimeout(addr)),
        };
        stream.set_nodelay(true)?;

        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Wrap an established byte stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            stats: ConnectionStats::default(),
        }
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Receive a packet (returns None if the peer closed cleanly between packets)
    pub async fn recv(&mut self) -> ConnectionResult<Option<Packet>> {
        loop {
            // Try to decode a packet from the buffer
            if let Some(packet) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.packets_received += 1;
                return Ok(Some(packet));
            }

            // Read more data
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                return match self.decoder.truncated(&self.read_buf) {
                    None => Ok(None),
                    Some(e) => Err(ConnectionError::Protocol(e)),
                };
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Try to receive a packet with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Packet>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Receive a packet, treating a clean close as an error
    pub async fn expect_packet(&mut self, timeout: Duration) -> ConnectionResult<Packet> {
        self.recv_timeout(timeout)
            .await?
            .ok_or(ConnectionError::Closed)
    }
}
