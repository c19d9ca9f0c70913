//! TCP/TLS server with callback-driven connection handling.
//!
//! A [`Server`] owns a listener and a [`ClientRegistry`]. It runs one accept
//! loop for its whole lifetime plus one read loop per open connection, all
//! as separate tokio tasks, and reports every lifecycle event to a
//! [`ServerHandler`].
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────── accept loop ────────────┐
//! Listener ──>│ Connection::new ─> registry.insert   │
//!             │        │                             │
//!             │        ├─> spawn read loop (gated)   │
//!             │        └─> on_connection ─> open gate│
//!             └─────────────────────────────────────┘
//!
//! read loop (one per connection):
//!   next_chunk ─> on_data ... ─> close ─> registry.remove
//!              ─> [on_client_error] ─> on_disconnect
//! ```
//!
//! The read loop is spawned before `on_connection` runs, but it does not
//! dispatch anything until `on_connection` has returned, so a handler never
//! sees data for a connection it has not been told about.
//!
//! # Example Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use tether_network::{Connection, Server, ServerConfig, ServerHandler};
//!
//! struct Chat;
//!
//! impl ServerHandler for Chat {
//!     async fn on_data(&self, server: &Server<Self>, client: &Arc<Connection>, data: Bytes) {
//!         let sender = client.id();
//!         server.broadcast_filtered(&data, |c| c.id() != sender).await;
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig {
//!     bind_addr: "0.0.0.0:3000".to_string(),
//!     ..Default::default()
//! };
//! let server = Server::listen(config, Chat).await?;
//! println!("Listening on {}", server.local_addr());
//! server.closed().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Shutdown
//!
//! [`Server::close`] stops the accept loop at its next blocking point. The
//! loop then abandons TLS handshakes still in progress, waits for any
//! `on_connection` already running, clears the registry and fires `on_close`.
//! No connection is admitted after that. Connections that were
//! open keep their read loops; they wind down on their own and still report
//! `on_disconnect`. Dropping every `Server` handle does NOT stop the server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tether_core::ClientId;
use tether_core::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_READ_BUFFER_SIZE,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{ChunkReader, Connection, ConnectionError, ConnectionInfo, ReadOutcome};
use crate::handler::ServerHandler;
use crate::registry::ClientRegistry;
use crate::tls::{ServerTlsConfig, TlsError};
use crate::transport::Transport;

/// Configuration for a server
///
/// # Example
///
/// ```
/// use tether_network::ServerConfig;
///
/// let config = ServerConfig {
///     bind_addr: "127.0.0.1:0".to_string(),
///     ..Default::default()
/// };
/// assert!(config.nodelay);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (`host:port`; hostnames are resolved)
    pub bind_addr: String,

    /// Bytes reserved per read; upper bound on one data chunk
    pub read_buffer_size: usize,

    /// Set TCP_NODELAY on accepted sockets
    pub nodelay: bool,

    /// Time allowed for a TLS handshake before the peer is dropped
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            nodelay: true,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        }
    }
}

/// Errors that can occur during server operations
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No connection is registered under this identifier
    #[error("Unknown client identifier: {0}")]
    UnknownClient(ClientId),

    /// Write to a registered connection failed
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Connections that accepted the whole buffer
    pub recipients: usize,

    /// Sum of bytes written to those connections
    pub bytes_written: usize,
}

struct Shared<H> {
    handler: H,
    registry: ClientRegistry,
    config: ServerConfig,
    tls: Option<ServerTlsConfig>,
    local_addr: SocketAddr,
    listening: AtomicBool,
    had_error: AtomicBool,
    shutdown: CancellationToken,
    closed: CancellationToken,
    handshakes: TaskTracker,
}

/// A listening server.
///
/// `Server` is a cheap handle; clones refer to the same listener and
/// registry. Handlers receive a `&Server<Self>` so they can look up, write
/// to, or broadcast to clients from inside a callback.
///
/// # Lifecycle
///
/// `Listening` → `Closed`, one-way. The server is listening as soon as the
/// constructor returns and closed once `on_close` has fired.
pub struct Server<H: ServerHandler> {
    shared: Arc<Shared<H>>,
}

impl<H: ServerHandler> Clone for Server<H> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<H: ServerHandler> Server<H> {
    /// Bind a plain TCP server and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound
    /// (in use, permission denied, unresolvable host).
    pub async fn listen(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        let listener = Self::bind(&config).await?;
        Self::from_listener(listener, config, None, handler)
    }

    /// Bind a TLS server and start accepting.
    pub async fn listen_secure(
        config: ServerConfig,
        tls: ServerTlsConfig,
        handler: H,
    ) -> Result<Self, ServerError> {
        let listener = Self::bind(&config).await?;
        Self::from_listener(listener, config, Some(tls), handler)
    }

    /// Start a server on an already bound listener.
    ///
    /// The accept loop is spawned onto the current tokio runtime; this must be
    /// called from within one. `config.bind_addr` is ignored.
    pub fn from_listener(
        listener: TcpListener,
        config: ServerConfig,
        tls: Option<ServerTlsConfig>,
        handler: H,
    ) -> Result<Self, ServerError> {
        let local_addr = listener.local_addr()?;

        info!(
            "Server listening on {} ({})",
            local_addr,
            if tls.is_some() { "tls" } else { "tcp" }
        );

        let server = Self::new(config, tls, handler, local_addr);
        tokio::spawn(server.clone().accept_loop(listener));
        Ok(server)
    }

    fn new(
        config: ServerConfig,
        tls: Option<ServerTlsConfig>,
        handler: H,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                registry: ClientRegistry::new(),
                config,
                tls,
                local_addr,
                listening: AtomicBool::new(true),
                had_error: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
                handshakes: TaskTracker::new(),
            }),
        }
    }

    async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
        debug!("Binding server to {}", config.bind_addr);
        TcpListener::bind(config.bind_addr.as_str())
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr.clone(),
                source,
            })
    }

    /// The handler this server dispatches to
    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Get the local address the server is bound to
    ///
    /// Useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Whether this server accepts TLS connections
    pub fn is_secure(&self) -> bool {
        self.shared.tls.is_some()
    }

    /// Whether the accept loop is still running
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Whether the accept loop ended because of an error
    pub fn had_error(&self) -> bool {
        self.shared.had_error.load(Ordering::SeqCst)
    }

    /// Look up a connected client
    pub fn get_client(&self, id: &ClientId) -> Option<Arc<Connection>> {
        self.shared.registry.get(id)
    }

    /// Identifiers of all connected clients
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.shared.registry.ids()
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Metadata of all connected clients
    pub fn clients_info(&self) -> Vec<ConnectionInfo> {
        self.shared
            .registry
            .snapshot()
            .iter()
            .map(|conn| conn.info())
            .collect()
    }

    /// Write bytes to one client.
    ///
    /// No retry is attempted.
    ///
    /// # Errors
    ///
    /// - [`ServerError::UnknownClient`] if `id` is not registered (no I/O
    ///   is performed)
    /// - [`ServerError::Connection`] if the write itself fails
    pub async fn write_to_client(&self, buf: &[u8], id: &ClientId) -> Result<usize, ServerError> {
        let Some(conn) = self.shared.registry.get(id) else {
            return Err(ServerError::UnknownClient(*id));
        };

        trace!(client_id = %id, bytes = buf.len(), "Writing to client");
        Ok(conn.write(buf).await?)
    }

    /// Write bytes to every connected client.
    ///
    /// See [`broadcast_filtered`](Self::broadcast_filtered).
    pub async fn broadcast(&self, buf: &[u8]) -> BroadcastSummary {
        self.broadcast_filtered(buf, |_| true).await
    }

    /// Write bytes to every connected client accepted by `filter`.
    ///
    /// Best effort: targets are taken from a snapshot of the registry and
    /// written concurrently. A failed write is skipped silently and only
    /// excluded from the summary; it never fails or delays the others.
    pub async fn broadcast_filtered<F>(&self, buf: &[u8], filter: F) -> BroadcastSummary
    where
        F: Fn(&Connection) -> bool,
    {
        let targets: Vec<Arc<Connection>> = self
            .shared
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| filter(conn))
            .collect();

        let results = join_all(targets.iter().map(|conn| conn.write(buf))).await;

        let mut summary = BroadcastSummary::default();
        for written in results.into_iter().flatten() {
            summary.recipients += 1;
            summary.bytes_written += written;
        }

        trace!(
            targets = targets.len(),
            recipients = summary.recipients,
            bytes = summary.bytes_written,
            "Broadcast complete"
        );
        summary
    }

    /// Close one client's connection.
    ///
    /// Its read loop ends cleanly and reports `on_disconnect` with
    /// `had_error = false`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownClient`] if `id` is not registered.
    pub async fn disconnect(&self, id: &ClientId) -> Result<(), ServerError> {
        let Some(conn) = self.shared.registry.get(id) else {
            return Err(ServerError::UnknownClient(*id));
        };

        info!(client_id = %id, "Disconnecting client");
        conn.close().await;
        Ok(())
    }

    /// Stop accepting connections.
    ///
    /// Returns immediately; use [`closed`](Self::closed) to wait for
    /// `on_close`. Idempotent.
    pub fn close(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Closing server on {}", self.shared.local_addr);
            self.shared.shutdown.cancel();
        }
    }

    /// Wait until the accept loop has ended and `on_close` has returned.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    async fn accept_loop(self, listener: TcpListener) {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => break Err(e),
                },
            }
        };

        drop(listener);
        self.finish_accepting(outcome).await;
    }

    /// Exit sequence of the accept loop.
    ///
    /// Handshakes still in progress are abandoned; ones that already produced
    /// a connection finish onboarding first, so `on_connection` never follows
    /// `on_close` and the registry stays empty once cleared.
    async fn finish_accepting(&self, outcome: std::io::Result<()>) {
        self.shared.listening.store(false, Ordering::SeqCst);
        self.shared.shutdown.cancel();

        self.shared.handshakes.close();
        self.shared.handshakes.wait().await;

        if let Err(e) = outcome {
            error!(addr = %self.shared.local_addr, error = %e, "Accept loop failed");
            self.shared.had_error.store(true, Ordering::SeqCst);
            self.shared.handler.on_server_error(self, &e).await;
        }

        let cleared = self.shared.registry.clear();
        let had_error = self.had_error();
        info!(
            "Server on {} closed (had_error: {}, dropped {} registry entries)",
            self.shared.local_addr, had_error, cleared
        );

        self.shared.handler.on_close(self, had_error).await;
        self.shared.closed.cancel();
    }

    async fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("Accepted new connection from {}", peer);

        if let Err(e) = stream.set_nodelay(self.shared.config.nodelay) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let Some(tls) = &self.shared.tls else {
            self.onboard(Transport::Plain(stream)).await;
            return;
        };

        // Handshakes run on their own task so one slow peer cannot stall accepting.
        let server = self.clone();
        let acceptor = tls.acceptor().clone();
        let handshake_timeout = self.shared.config.handshake_timeout;
        self.shared.handshakes.spawn(async move {
            let handshake = tokio::time::timeout(handshake_timeout, acceptor.accept(stream));
            let result = tokio::select! {
                biased;
                _ = server.shared.shutdown.cancelled() => {
                    debug!("Server closed during TLS handshake with {}, dropping", peer);
                    return;
                }
                result = handshake => result,
            };

            match result {
                Ok(Ok(tls_stream)) => {
                    server.onboard(Transport::ServerTls(Box::new(tls_stream))).await;
                }
                Ok(Err(e)) => warn!(peer = %peer, error = %e, "TLS handshake failed"),
                Err(_) => warn!(
                    peer = %peer,
                    "TLS handshake timeout after {}ms",
                    handshake_timeout.as_millis()
                ),
            }
        });
    }

    async fn onboard(&self, transport: Transport) {
        let (conn, reader) = Connection::new(transport, self.shared.config.read_buffer_size);
        self.shared.registry.insert(conn.clone());

        info!(
            client_id = %conn.id(),
            peer = ?conn.peer_addr(),
            total = self.shared.registry.len(),
            "Client connected"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(self.clone().read_loop(conn.clone(), reader, ready_rx));

        self.shared.handler.on_connection(self, &conn).await;
        let _ = ready_tx.send(());
    }

    async fn read_loop(
        self,
        conn: Arc<Connection>,
        mut reader: ChunkReader,
        ready: oneshot::Receiver<()>,
    ) {
        // Released once on_connection has returned.
        let _ = ready.await;

        let failure = loop {
            match reader.next_chunk().await {
                ReadOutcome::Chunk(data) => self.shared.handler.on_data(&self, &conn, data).await,
                ReadOutcome::Eof => break None,
                ReadOutcome::Error(e) => break Some(e),
            }
        };

        drop(reader);
        conn.close().await;

        let id = conn.id();
        self.shared.registry.remove(&id);

        let had_error = match failure {
            Some(e) => {
                warn!(client_id = %id, error = %e, "Client read failed");
                self.shared.handler.on_client_error(&self, &conn, &e).await;
                true
            }
            None => false,
        };

        info!(
            client_id = %id,
            had_error,
            total = self.shared.registry.len(),
            "Client disconnected"
        );
        self.shared.handler.on_disconnect(&self, id, had_error).await;
    }
}

impl<H: ServerHandler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.shared.local_addr)
            .field("secure", &self.is_secure())
            .field("listening", &self.is_listening())
            .field("clients", &self.client_count())
            .finish()
    }
}
