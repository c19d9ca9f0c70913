//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tether_network::{
    ChunkReader, ClientConfig, ClientId, Connection, ReadOutcome, Server, ServerConfig,
    ServerHandler,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle events observed by [`Recorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `registered` is whether the registry already held the id
    Connected { id: ClientId, registered: bool },
    Data { id: ClientId, data: Bytes },
    ClientError { id: ClientId },
    /// `registered` is whether the registry still held the id
    Disconnected {
        id: ClientId,
        had_error: bool,
        registered: bool,
    },
    ServerError,
    Closed { had_error: bool },
}

/// Handler that reports every callback on a channel, optionally echoing data
pub struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    echo: bool,
}

impl ServerHandler for Recorder {
    async fn on_connection(&self, server: &Server<Self>, client: &Arc<Connection>) {
        let id = client.id();
        let registered = server.get_client(&id).is_some();
        let _ = self.events.send(Event::Connected { id, registered });
    }

    async fn on_data(&self, _server: &Server<Self>, client: &Arc<Connection>, data: Bytes) {
        if self.echo {
            let _ = client.write(&data).await;
        }
        let _ = self.events.send(Event::Data {
            id: client.id(),
            data,
        });
    }

    async fn on_disconnect(&self, server: &Server<Self>, id: ClientId, had_error: bool) {
        let registered = server.get_client(&id).is_some();
        let _ = self.events.send(Event::Disconnected {
            id,
            had_error,
            registered,
        });
    }

    async fn on_client_error(
        &self,
        _server: &Server<Self>,
        client: &Arc<Connection>,
        _error: &std::io::Error,
    ) {
        let _ = self.events.send(Event::ClientError { id: client.id() });
    }

    async fn on_server_error(&self, _server: &Server<Self>, _error: &std::io::Error) {
        let _ = self.events.send(Event::ServerError);
    }

    async fn on_close(&self, _server: &Server<Self>, had_error: bool) {
        let _ = self.events.send(Event::Closed { had_error });
    }
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

pub fn recorder(echo: bool) -> (Recorder, mpsc::UnboundedReceiver<Event>) {
    let (events, rx) = mpsc::unbounded_channel();
    (Recorder { events, echo }, rx)
}

/// Start a plain server on an ephemeral loopback port
pub async fn start_server(echo: bool) -> (Server<Recorder>, mpsc::UnboundedReceiver<Event>) {
    let (handler, rx) = recorder(echo);
    let server = Server::listen(server_config(), handler).await.unwrap();
    (server, rx)
}

pub fn client_config<H: ServerHandler>(server: &Server<H>) -> ClientConfig {
    ClientConfig {
        server_addr: server.local_addr().to_string(),
        timeout: Duration::from_millis(1000),
        ..Default::default()
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("Timed out waiting for server event")
        .expect("Event channel closed")
}

/// Wait for the next `Connected` event, returning its id
pub async fn next_connected(rx: &mut mpsc::UnboundedReceiver<Event>) -> ClientId {
    match next_event(rx).await {
        Event::Connected { id, registered } => {
            assert!(registered, "client not registered during on_connection");
            id
        }
        other => panic!("Expected Connected, got {other:?}"),
    }
}

/// Skip events until a `Disconnected` arrives
pub async fn next_disconnected(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    loop {
        let event = next_event(rx).await;
        if matches!(event, Event::Disconnected { .. }) {
            return event;
        }
    }
}

/// Read until exactly `len` bytes have arrived, across chunk boundaries
pub async fn read_exact(reader: &mut ChunkReader, len: usize) -> Bytes {
    let mut collected = BytesMut::new();
    while collected.len() < len {
        match timeout(EVENT_TIMEOUT, reader.next_chunk())
            .await
            .expect("Timed out waiting for data")
        {
            ReadOutcome::Chunk(chunk) => collected.extend_from_slice(&chunk),
            other => panic!("Expected data, got {other:?}"),
        }
    }
    collected.freeze()
}
