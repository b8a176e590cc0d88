//! Buffered TCP connection and lifecycle tracking.
//!
//! # Responsibilities
//! - Own exactly one socket, buffered in both directions
//! - Line-oriented and raw byte I/O for the protocol pumps
//! - Idempotent close that releases the socket exactly once
//! - Generate unique connection IDs for tracing
//! - Count live connections per service

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Longest line [`Connection::read_line`] accepts.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors raised by connection I/O.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Eof,

    /// `close` was already called on this connection.
    #[error("connection already closed")]
    AlreadyClosed,

    /// Outbound connect was refused or failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Outbound connect did not finish within the deadline.
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A line ran past its length limit without a terminator.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// Any other transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A buffered, bidirectional stream over one TCP socket.
///
/// The socket lives in an `Option` so that `close` can take it exactly once;
/// every later operation reports [`ConnectionError::AlreadyClosed`].
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    stream: Option<BufStream<TcpStream>>,
}

impl Connection {
    /// Wrap an accepted (or freshly dialed) socket.
    pub fn wrap(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            id: ConnectionId::new(),
            peer_addr,
            stream: Some(BufStream::new(stream)),
        }
    }

    /// Dial `addr`, failing if the connect does not complete within `timeout`.
    pub async fn dial(addr: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let conn = Self::wrap(stream);
                tracing::debug!(connection_id = %conn.id, addr = %addr, "Outbound connection established");
                Ok(conn)
            }
            Ok(Err(source)) => Err(ConnectionError::Connect {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ConnectionError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// True until `close` has been called.
    pub fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut BufStream<TcpStream>, ConnectionError> {
        self.stream.as_mut().ok_or(ConnectionError::AlreadyClosed)
    }

    /// Read one line of at most [`MAX_LINE_BYTES`], including its terminator.
    ///
    /// A peer that closes before sending anything yields [`ConnectionError::Eof`];
    /// a final unterminated line is returned as-is.
    pub async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let mut line = Vec::new();
        if self.read_line_bytes(&mut line, MAX_LINE_BYTES).await? == 0 {
            return Err(ConnectionError::Eof);
        }
        String::from_utf8(line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    /// Append one raw line (up to and including `\n`) to `buf`, reading no
    /// more than `limit` bytes.
    ///
    /// Returns the number of bytes appended; zero means end of stream. A line
    /// still unterminated after `limit` bytes fails with
    /// [`ConnectionError::LineTooLong`].
    pub async fn read_line_bytes(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize, ConnectionError> {
        let stream = self.stream()?;
        let n = (&mut *stream).take(limit as u64).read_until(b'\n', buf).await?;
        if n == limit && buf.last() != Some(&b'\n') {
            return Err(ConnectionError::LineTooLong { limit });
        }
        Ok(n)
    }

    /// Fill `buf` completely, reporting a short read as [`ConnectionError::Eof`].
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConnectionError> {
        match self.stream()?.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ConnectionError::Eof),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a line for sending. The newline is appended here.
    pub async fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let stream = self.stream()?;
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        Ok(())
    }

    /// Queue raw bytes for sending.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream()?.write_all(bytes).await?;
        Ok(())
    }

    /// Push buffered output to the socket.
    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.stream()?.flush().await?;
        Ok(())
    }

    /// Flush and release the socket.
    ///
    /// Flush failures are logged and do not stop the close. A second call
    /// returns [`ConnectionError::AlreadyClosed`] without touching the socket.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let mut stream = self.stream.take().ok_or(ConnectionError::AlreadyClosed)?;

        if let Err(e) = stream.flush().await {
            tracing::warn!(connection_id = %self.id, error = %e, "Flush failed during close");
        }
        if let Err(e) = stream.get_mut().shutdown().await {
            tracing::debug!(connection_id = %self.id, error = %e, "Socket shutdown failed");
        }
        tracing::debug!(connection_id = %self.id, "Connection closed");
        Ok(())
    }

    /// Give up the buffering layer and hand back the raw socket.
    ///
    /// Only meaningful before any buffered I/O; unread buffered input is lost.
    pub fn into_stream(mut self) -> Result<TcpStream, ConnectionError> {
        let stream = self.stream.take().ok_or(ConnectionError::AlreadyClosed)?;
        Ok(stream.into_inner())
    }
}

/// Counts live connections for one owner (a service).
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection untracked");
    }
}
