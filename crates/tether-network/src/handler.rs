//! Callback traits for server and client lifecycle events.
//!
//! Every method has a no-op default, so an implementation only overrides the
//! events it cares about. The handler type is a generic parameter of the
//! server (or of the client read loop), fixed at construction.
//!
//! Methods are async (native RPITIT, no `async_trait`) and must produce
//! `Send` futures because they run on spawned tasks. Implementations may use
//! plain `async fn`.
//!
//! # Where callbacks run
//!
//! | Callback | Task |
//! |----------|------|
//! | `on_connection` | accept loop (TLS: the connection's handshake task) |
//! | `on_data`, `on_client_error`, `on_disconnect` | the connection's read loop |
//! | `on_server_error`, `on_close` | accept loop, after it stops accepting |
//!
//! A slow `on_data` delays further reads from that connection only. A slow
//! `on_connection` delays accepting the next connection.

use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tether_core::ClientId;

use crate::connection::Connection;
use crate::server::Server;

/// Callbacks for [`Server`] events.
///
/// For a given connection the order is always `on_connection`, then any
/// number of `on_data`, then at most one `on_client_error`, then exactly one
/// `on_disconnect`. No ordering holds across different connections.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use tether_network::{Connection, Server, ServerConfig, ServerHandler};
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     async fn on_data(&self, _server: &Server<Self>, client: &Arc<Connection>, data: Bytes) {
///         let _ = client.write(&data).await;
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::listen(ServerConfig::default(), Echo).await?;
/// server.closed().await;
/// # Ok(())
/// # }
/// ```
pub trait ServerHandler: Send + Sync + Sized + 'static {
    /// A connection was registered and its read loop started.
    fn on_connection(
        &self,
        _server: &Server<Self>,
        _client: &Arc<Connection>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A chunk of bytes arrived from a client.
    fn on_data(
        &self,
        _server: &Server<Self>,
        _client: &Arc<Connection>,
        _data: Bytes,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A client connection was torn down and removed from the registry.
    fn on_disconnect(
        &self,
        _server: &Server<Self>,
        _id: ClientId,
        _had_error: bool,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Reading from a client failed. Followed by `on_disconnect` with
    /// `had_error = true`.
    fn on_client_error(
        &self,
        _server: &Server<Self>,
        _client: &Arc<Connection>,
        _error: &io::Error,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Accepting failed; the server stops. Followed by `on_close`.
    fn on_server_error(
        &self,
        _server: &Server<Self>,
        _error: &io::Error,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The accept loop ended and the registry was cleared. Fires exactly once,
    /// after every `on_connection`.
    ///
    /// `had_error` is true only if the accept loop itself failed; client
    /// errors do not count.
    fn on_close(&self, _server: &Server<Self>, _had_error: bool) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Callbacks for an outbound connection's read loop.
///
/// `on_data` fires once per received chunk. When the loop ends, `on_error`
/// fires first if it ended on a transport error, then `on_close` fires once.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A chunk of bytes arrived from the server.
    fn on_data(&self, _connection: &Arc<Connection>, _data: Bytes) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Reading from the server failed.
    fn on_error(
        &self,
        _connection: &Arc<Connection>,
        _error: &io::Error,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The read loop ended and the connection is closed.
    fn on_close(&self, _connection: &Arc<Connection>, _had_error: bool) -> impl Future<Output = ()> + Send {
        async {}
    }
}
