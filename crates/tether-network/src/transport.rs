//! Byte stream underneath a [`Connection`](crate::Connection).
//!
//! A connection is either plain TCP or TCP wrapped in TLS, and on the TLS side
//! the concrete stream type differs between accepted (server) and dialed
//! (client) connections. [`Transport`] folds the three cases into one type so
//! the rest of the crate only deals with a single `AsyncRead + AsyncWrite`.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A stream that may or may not be TLS-encrypted.
pub enum Transport {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP, accepted by a secure server.
    ServerTls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    /// TLS over TCP, dialed by a secure client.
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    /// Whether traffic on this transport is encrypted.
    pub fn is_secure(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::ServerTls(stream) => stream.get_ref().0,
            Transport::ClientTls(stream) => stream.get_ref().0,
        }
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Transport::Plain(_) => "Plain",
            Transport::ServerTls(_) => "ServerTls",
            Transport::ClientTls(_) => "ClientTls",
        };
        f.debug_struct("Transport")
            .field("kind", &kind)
            .field("peer_addr", &self.peer_addr().ok())
            .finish()
    }
}

impl From<TcpStream> for Transport {
    fn from(stream: TcpStream) -> Self {
        Transport::Plain(stream)
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::ServerTls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            Transport::ClientTls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::ServerTls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            Transport::ClientTls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::ServerTls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            Transport::ClientTls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::ServerTls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            Transport::ClientTls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
