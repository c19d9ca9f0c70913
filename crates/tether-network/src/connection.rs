//! A single established byte stream, server- or client-side.
//!
//! Creating a [`Connection`] splits its [`Transport`] in two:
//!
//! - the write half stays inside the `Connection`, which is shared as
//!   `Arc<Connection>` between the registry, handlers and callers;
//! - the read half goes into a [`ChunkReader`], owned by exactly one read loop.
//!
//! ```text
//!                      ┌──> ChunkReader ──> read loop ──> handlers
//! Transport ──split──> │
//!                      └──> Connection::write / send <── callers
//! ```
//!
//! A connection is open until its read loop ends or someone calls
//! [`Connection::close`]. After that every write fails with
//! [`ConnectionError::Closed`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::ClientId;
use tether_core::constants::CLOSE_TIMEOUT_MS;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::transport::Transport;

/// Errors returned by connection writes
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection has been closed
    #[error("Connection closed")]
    Closed,

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one pull from a [`ChunkReader`].
#[derive(Debug)]
pub enum ReadOutcome {
    /// Bytes received from the peer. Never empty.
    Chunk(Bytes),
    /// The peer finished sending, or the connection was closed locally.
    Eof,
    /// The transport failed.
    Error(std::io::Error),
}

/// Connection information snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection identifier
    pub id: ClientId,

    /// Remote peer address, if the socket still reports one
    pub peer_addr: Option<SocketAddr>,

    /// Local socket address
    pub local_addr: Option<SocketAddr>,

    /// Whether the transport is TLS
    pub secure: bool,

    /// When the connection was established
    pub connected_at: DateTime<Utc>,

    /// Whether the connection has been closed
    pub closed: bool,
}

/// One established connection.
///
/// Writes are serialized internally, so `write` and `send` may be called from
/// several tasks at once; bytes from one call are never interleaved with
/// bytes from another. Writing and reading are independent and may overlap.
pub struct Connection {
    id: ClientId,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    secure: bool,
    connected_at: DateTime<Utc>,
    writer: Mutex<Option<WriteHalf<Transport>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    /// Wrap a transport, assigning a fresh identifier.
    ///
    /// Returns the shared connection handle and the reader that must drive
    /// its read loop. Dropping the reader without reading is allowed; the
    /// connection then simply never reports incoming data.
    pub fn new(transport: Transport, read_buffer_size: usize) -> (Arc<Self>, ChunkReader) {
        let id = ClientId::generate();
        let peer_addr = transport.peer_addr().ok();
        let local_addr = transport.local_addr().ok();
        let secure = transport.is_secure();
        let (reader, writer) = tokio::io::split(transport);
        let shutdown = CancellationToken::new();

        debug!(client_id = %id, peer = ?peer_addr, secure, "Connection created");

        let connection = Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            secure,
            connected_at: Utc::now(),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            shutdown: shutdown.clone(),
        });

        let reader = ChunkReader {
            id,
            reader,
            buffer: BytesMut::with_capacity(read_buffer_size),
            chunk_size: read_buffer_size.max(1),
            shutdown,
        };

        (connection, reader)
    }

    /// Get the connection identifier
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Get the remote address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get the local address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the transport is TLS
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Get connection timestamp
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of the connection metadata
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            local_addr: self.local_addr,
            secure: self.secure,
            connected_at: self.connected_at,
            closed: self.is_closed(),
        }
    }

    /// Write raw bytes to the peer.
    ///
    /// Returns the number of bytes written, which is always `buf.len()` on
    /// success. Blocks only the caller while the transport applies
    /// backpressure.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Closed`] once the connection is closed
    /// - [`ConnectionError::Io`] if the transport fails
    pub async fn write(&self, buf: &[u8]) -> Result<usize, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;

        writer.write_all(buf).await?;
        writer.flush().await?;

        trace!(client_id = %self.id, bytes = buf.len(), "Wrote to connection");
        Ok(buf.len())
    }

    /// Write UTF-8 text to the peer.
    pub async fn send(&self, text: &str) -> Result<usize, ConnectionError> {
        self.write(text.as_bytes()).await
    }

    /// Close the connection.
    ///
    /// Stops the read loop at its next blocking point (it ends as a clean
    /// end-of-stream) and shuts down the write direction. Idempotent; only
    /// the first call touches the transport.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        debug!(client_id = %self.id, "Closing connection");

        let close_timeout = Duration::from_millis(CLOSE_TIMEOUT_MS);
        let writer = match tokio::time::timeout(close_timeout, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                warn!(
                    client_id = %self.id,
                    "Write in progress during close ({}ms), leaving shutdown to drop",
                    close_timeout.as_millis()
                );
                None
            }
        };

        if let Some(mut writer) = writer {
            match tokio::time::timeout(close_timeout, writer.shutdown()).await {
                Ok(Ok(())) => trace!(client_id = %self.id, "Shutdown completed"),
                Ok(Err(e)) => debug!(client_id = %self.id, error = %e, "Error during shutdown"),
                Err(_) => warn!(
                    client_id = %self.id,
                    "Shutdown timeout during close ({}ms)",
                    close_timeout.as_millis()
                ),
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("secure", &self.secure)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read half of a connection.
///
/// The only reader of the underlying stream. Each call to
/// [`next_chunk`](Self::next_chunk) blocks until bytes arrive, the stream
/// ends, the transport fails, or the connection is closed locally.
pub struct ChunkReader {
    id: ClientId,
    reader: ReadHalf<Transport>,
    buffer: BytesMut,
    chunk_size: usize,
    shutdown: CancellationToken,
}

impl ChunkReader {
    /// Identifier of the connection this reader belongs to
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Pull the next chunk.
    pub async fn next_chunk(&mut self) -> ReadOutcome {
        if self.shutdown.is_cancelled() {
            return ReadOutcome::Eof;
        }
        self.buffer.reserve(self.chunk_size);

        // reserve() may leave more spare capacity than asked for.
        let mut limited = (&mut self.reader).take(self.chunk_size as u64);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => ReadOutcome::Eof,
            result = limited.read_buf(&mut self.buffer) => match result {
                Ok(0) => ReadOutcome::Eof,
                Ok(n) => {
                    trace!(client_id = %self.id, bytes = n, "Read chunk");
                    ReadOutcome::Chunk(self.buffer.split().freeze())
                }
                Err(e) => ReadOutcome::Error(e),
            },
        }
    }
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("id", &self.id)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}
