//! Event-driven TCP/TLS connection layer for Tether
//!
//! This crate provides a callback-driven server that tracks every connected
//! client under a generated [`ClientId`], and a client that dials a server
//! and exposes the same [`Connection`] type for writes.
//!
//! # Components
//!
//! - **Server**: Accepts connections, keeps the client registry, dispatches
//!   lifecycle events to a [`ServerHandler`]
//! - **client**: Plain and TLS dialing, optionally with a [`ConnectionHandler`]
//! - **Connection**: One open byte stream with serialized writes and an
//!   idempotent close
//! - **tls**: PEM loading for server identities and client trust roots
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use tether_network::{ClientId, Connection, Server, ServerConfig, ServerHandler};
//!
//! struct Chat;
//!
//! impl ServerHandler for Chat {
//!     async fn on_data(&self, server: &Server<Self>, client: &Arc<Connection>, data: Bytes) {
//!         let sender = client.id();
//!         server.broadcast_filtered(&data, |c| c.id() != sender).await;
//!     }
//!
//!     async fn on_disconnect(&self, _server: &Server<Self>, id: ClientId, _had_error: bool) {
//!         println!("{id} left");
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::listen(ServerConfig::default(), Chat).await?;
//! server.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
mod connection;
mod handler;
mod registry;
mod server;
mod tls;
mod transport;

pub use client::{ClientConfig, ClientError};
pub use connection::{ChunkReader, Connection, ConnectionError, ConnectionInfo, ReadOutcome};
pub use handler::{ConnectionHandler, ServerHandler};
pub use registry::ClientRegistry;
pub use server::{BroadcastSummary, Server, ServerConfig, ServerError};
pub use tether_core::ClientId;
pub use tls::{ClientTlsConfig, ServerTlsConfig, TlsError};
pub use transport::Transport;
