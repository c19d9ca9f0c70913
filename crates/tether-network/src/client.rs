//! Outbound connections.
//!
//! Dialing produces the same [`Connection`] type a server hands to its
//! handlers, just without a registry around it.
//!
//! # Example Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use tether_network::{ClientConfig, Connection, ConnectionHandler, client};
//!
//! struct Printer;
//!
//! impl ConnectionHandler for Printer {
//!     async fn on_data(&self, connection: &Arc<Connection>, data: Bytes) {
//!         println!("{}", String::from_utf8_lossy(&data));
//!         connection.close().await;
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig {
//!     server_addr: "localhost:3000".to_string(),
//!     ..Default::default()
//! };
//!
//! let connection = client::connect_with_handler(&config, Printer).await?;
//! connection.send("Hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Without a handler the caller gets the [`ChunkReader`] back and drives the
//! reads itself (or drops it and never reads):
//!
//! ```no_run
//! use tether_network::{ClientConfig, ReadOutcome, client};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (connection, mut reader) = client::connect(&ClientConfig::default()).await?;
//! connection.write(b"ping").await?;
//! if let ReadOutcome::Chunk(reply) = reader.next_chunk().await {
//!     println!("{} bytes", reply.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design Principles
//!
//! - **No automatic retry**: the caller decides whether to dial again
//! - **Timeout on connect only**: writes block as long as the transport does
//! - **Read loop on demand**: started only when a handler is supplied

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use tether_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_BUFFER_SIZE, DEFAULT_SERVER_ADDR,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{ChunkReader, Connection, ReadOutcome};
use crate::handler::ConnectionHandler;
use crate::tls::ClientTlsConfig;
use crate::transport::Transport;

/// Configuration for outbound connections
///
/// # Example
///
/// ```
/// use tether_network::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     server_addr: "127.0.0.1:3000".to_string(),
///     timeout: Duration::from_millis(5000),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`host:port`; hostnames are resolved)
    pub server_addr: String,

    /// Timeout for establishing the connection, TLS handshake included
    pub timeout: Duration,

    /// Bytes reserved per read; upper bound on one data chunk
    pub read_buffer_size: usize,

    /// Set TCP_NODELAY on the socket
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            nodelay: true,
        }
    }
}

/// Errors that can occur while connecting
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// The TLS server name could not be derived or is invalid
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] std::io::Error),

    /// Low-level I/O error (refused, unreachable, unresolvable)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connect over plain TCP.
///
/// Returns the connection and its reader; no read loop is started.
///
/// # Errors
///
/// Returns an error if the address cannot be resolved, the server refuses
/// the connection, or `config.timeout` elapses.
pub async fn connect(config: &ClientConfig) -> Result<(Arc<Connection>, ChunkReader), ClientError> {
    let stream = dial(config).await?;
    Ok(Connection::new(Transport::Plain(stream), config.read_buffer_size))
}

/// Connect over plain TCP and dispatch reads to `handler`.
pub async fn connect_with_handler<H: ConnectionHandler>(
    config: &ClientConfig,
    handler: H,
) -> Result<Arc<Connection>, ClientError> {
    let (connection, reader) = connect(config).await?;
    spawn_read_loop(connection.clone(), reader, handler);
    Ok(connection)
}

/// Connect over TLS.
///
/// The connect timeout covers the TCP connect and the handshake together.
pub async fn connect_secure(
    config: &ClientConfig,
    tls: &ClientTlsConfig,
) -> Result<(Arc<Connection>, ChunkReader), ClientError> {
    let server_name = resolve_server_name(config, tls)?;

    let handshake = async {
        let stream = dial(config).await?;
        debug!("Starting TLS handshake with {}", config.server_addr);
        tls.connector()
            .connect(server_name, stream)
            .await
            .map_err(ClientError::TlsHandshake)
    };

    let tls_stream = match tokio::time::timeout(config.timeout, handshake).await {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(e)) => {
            error!("Secure connection to {} failed: {}", config.server_addr, e);
            return Err(e);
        }
        Err(_) => {
            warn!("Secure connection timeout after {}ms", config.timeout.as_millis());
            return Err(ClientError::ConnectionTimeout(config.timeout.as_millis() as u64));
        }
    };

    info!("TLS established with {}", config.server_addr);
    Ok(Connection::new(
        Transport::ClientTls(Box::new(tls_stream)),
        config.read_buffer_size,
    ))
}

/// Connect over TLS and dispatch reads to `handler`.
pub async fn connect_secure_with_handler<H: ConnectionHandler>(
    config: &ClientConfig,
    tls: &ClientTlsConfig,
    handler: H,
) -> Result<Arc<Connection>, ClientError> {
    let (connection, reader) = connect_secure(config, tls).await?;
    spawn_read_loop(connection.clone(), reader, handler);
    Ok(connection)
}

/// Run a read loop for `connection` on a new task.
///
/// Every chunk goes to `handler.on_data`. When the stream ends the
/// connection is closed; a transport error is reported through
/// `handler.on_error` first, then `handler.on_close` fires once.
pub fn spawn_read_loop<H: ConnectionHandler>(
    connection: Arc<Connection>,
    mut reader: ChunkReader,
    handler: H,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let failure = loop {
            match reader.next_chunk().await {
                ReadOutcome::Chunk(data) => handler.on_data(&connection, data).await,
                ReadOutcome::Eof => break None,
                ReadOutcome::Error(e) => break Some(e),
            }
        };

        drop(reader);
        connection.close().await;

        let had_error = match failure {
            Some(e) => {
                warn!(client_id = %connection.id(), error = %e, "Read from server failed");
                handler.on_error(&connection, &e).await;
                true
            }
            None => false,
        };

        debug!(client_id = %connection.id(), had_error, "Read loop finished");
        handler.on_close(&connection, had_error).await;
    })
}

async fn dial(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    info!("Connecting to server at {}", config.server_addr);

    let stream = match tokio::time::timeout(
        config.timeout,
        TcpStream::connect(config.server_addr.as_str()),
    )
    .await
    {
        Ok(Ok(stream)) => {
            info!("Successfully connected to {}", config.server_addr);
            stream
        }
        Ok(Err(e)) => {
            error!("Connection failed: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            warn!("Connection timeout after {}ms", config.timeout.as_millis());
            return Err(ClientError::ConnectionTimeout(
                config.timeout.as_millis() as u64
            ));
        }
    };

    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(stream)
}

/// Host part of a `host:port` address, without IPv6 brackets.
fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

fn resolve_server_name(
    config: &ClientConfig,
    tls: &ClientTlsConfig,
) -> Result<ServerName<'static>, ClientError> {
    let name = tls
        .server_name_override()
        .unwrap_or_else(|| host_of(&config.server_addr));

    ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::InvalidServerName(name.to_string()))
}
