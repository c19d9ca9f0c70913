//! Integration tests for Server
//!
//! These tests drive a real server over loopback TCP and check the callback
//! order, the registry and the write paths from the outside.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use tether_network::{
    BroadcastSummary, ClientId, Connection, ReadOutcome, Server, ServerHandler, client,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_echo_round_trip() {
    let (server, mut events) = start_server(true).await;

    let (conn, mut reader) = client::connect(&client_config(&server)).await.unwrap();
    let id = next_connected(&mut events).await;

    conn.send("ping").await.unwrap();
    assert_eq!(read_exact(&mut reader, 4).await.as_ref(), b"ping");

    match next_event(&mut events).await {
        Event::Data { id: from, data } => {
            assert_eq!(from, id);
            assert_eq!(data.as_ref(), b"ping");
        }
        other => panic!("Expected Data, got {other:?}"),
    }

    conn.close().await;
    assert_eq!(
        next_disconnected(&mut events).await,
        Event::Disconnected {
            id,
            had_error: false,
            registered: false
        }
    );
    assert_eq!(server.client_count(), 0);

    server.close();
}

#[tokio::test]
async fn test_write_to_client() {
    let (server, mut events) = start_server(false).await;

    let (_conn, mut reader) = client::connect(&client_config(&server)).await.unwrap();
    let id = next_connected(&mut events).await;

    let written = server.write_to_client(b"direct", &id).await.unwrap();
    assert_eq!(written, 6);
    assert_eq!(read_exact(&mut reader, 6).await.as_ref(), b"direct");

    server.close();
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (server, mut events) = start_server(false).await;
    let config = client_config(&server);

    let (_a, mut reader_a) = client::connect(&config).await.unwrap();
    next_connected(&mut events).await;
    let (_b, mut reader_b) = client::connect(&config).await.unwrap();
    next_connected(&mut events).await;

    let summary = server.broadcast(b"hello").await;
    assert_eq!(summary.recipients, 2);
    assert_eq!(summary.bytes_written, 10);

    assert_eq!(read_exact(&mut reader_a, 5).await.as_ref(), b"hello");
    assert_eq!(read_exact(&mut reader_b, 5).await.as_ref(), b"hello");

    server.close();
}

#[tokio::test]
async fn test_broadcast_filter_excludes_client() {
    let (server, mut events) = start_server(false).await;
    let config = client_config(&server);

    let (_a, mut reader_a) = client::connect(&config).await.unwrap();
    next_connected(&mut events).await;
    let (_b, mut reader_b) = client::connect(&config).await.unwrap();
    let id_b = next_connected(&mut events).await;

    let summary = server
        .broadcast_filtered(b"hi", |conn| conn.id() != id_b)
        .await;
    assert_eq!(summary.recipients, 1);

    assert_eq!(read_exact(&mut reader_a, 2).await.as_ref(), b"hi");
    assert!(
        timeout(Duration::from_millis(200), reader_b.next_chunk())
            .await
            .is_err(),
        "filtered client received data"
    );

    server.close();
}

#[tokio::test]
async fn test_broadcast_skips_departed_clients() {
    let (server, mut events) = start_server(false).await;
    let config = client_config(&server);

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(client::connect(&config).await.unwrap());
        next_connected(&mut events).await;
    }

    for (conn, _) in clients.iter().take(2) {
        conn.close().await;
    }
    for _ in 0..2 {
        next_disconnected(&mut events).await;
    }

    let summary = server.broadcast(b"x").await;
    assert_eq!(summary.recipients, 3);
    assert_eq!(server.client_count(), 3);

    server.close();
}

#[tokio::test]
#[allow(deprecated)]
async fn test_abrupt_disconnect_reports_error() {
    let (server, mut events) = start_server(false).await;

    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let id = next_connected(&mut events).await;

    // Zero linger turns the close into a reset.
    stream.set_linger(Some(Duration::ZERO)).unwrap();
    drop(stream);

    assert_eq!(next_event(&mut events).await, Event::ClientError { id });
    assert_eq!(
        next_event(&mut events).await,
        Event::Disconnected {
            id,
            had_error: true,
            registered: false
        }
    );
    assert!(server.get_client(&id).is_none());

    server.close();
}

#[tokio::test]
async fn test_server_disconnect_closes_client() {
    let (server, mut events) = start_server(false).await;

    let (_conn, mut reader) = client::connect(&client_config(&server)).await.unwrap();
    let id = next_connected(&mut events).await;

    server.disconnect(&id).await.unwrap();

    assert_eq!(
        next_disconnected(&mut events).await,
        Event::Disconnected {
            id,
            had_error: false,
            registered: false
        }
    );

    let outcome = timeout(EVENT_TIMEOUT, reader.next_chunk()).await.unwrap();
    assert!(matches!(outcome, ReadOutcome::Eof));

    let result = server.write_to_client(b"late", &id).await;
    assert!(result.is_err());

    server.close();
}

#[tokio::test]
async fn test_clients_info_matches_peers() {
    let (server, mut events) = start_server(false).await;

    let (conn, _reader) = client::connect(&client_config(&server)).await.unwrap();
    let id = next_connected(&mut events).await;

    let info = server.clients_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].id, id);
    assert_eq!(info[0].peer_addr, conn.local_addr());
    assert!(!info[0].secure);
    assert!(!info[0].closed);
    assert_eq!(server.client_ids(), vec![id]);

    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_keep_per_connection_order() {
    const CLIENTS: usize = 20;

    let (server, mut events) = start_server(false).await;
    let config = client_config(&server);

    let mut tasks = Vec::new();
    for i in 0..CLIENTS {
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let (conn, reader) = client::connect(&config).await.unwrap();
            conn.send(&format!("hello-{i}")).await.unwrap();
            (conn, reader)
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    // Per id: connected first, then data.
    let mut seen: HashMap<ClientId, bool> = HashMap::new();
    let mut with_data = 0;
    while seen.len() < CLIENTS || with_data < CLIENTS {
        match next_event(&mut events).await {
            Event::Connected { id, registered } => {
                assert!(registered);
                assert!(seen.insert(id, false).is_none(), "duplicate connection");
            }
            Event::Data { id, .. } => {
                let got_data = seen.get_mut(&id).expect("data before connection");
                if !*got_data {
                    *got_data = true;
                    with_data += 1;
                }
            }
            other => panic!("Unexpected event {other:?}"),
        }
    }
    assert_eq!(server.client_count(), CLIENTS);

    for (conn, _) in &clients {
        conn.close().await;
    }

    let mut departed = 0;
    while departed < CLIENTS {
        if let Event::Disconnected { id, registered, .. } = next_disconnected(&mut events).await {
            assert!(seen.contains_key(&id));
            assert!(!registered);
            departed += 1;
        }
    }
    assert_eq!(server.client_count(), 0);

    server.close();
}

#[tokio::test]
async fn test_close_clears_registry_once() {
    let (server, mut events) = start_server(false).await;
    let config = client_config(&server);

    let (conn, _reader) = client::connect(&config).await.unwrap();
    let id = next_connected(&mut events).await;

    server.close();
    timeout(EVENT_TIMEOUT, server.closed()).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        Event::Closed { had_error: false }
    );
    assert!(!server.is_listening());
    assert!(!server.had_error());
    assert_eq!(server.client_count(), 0);

    // New connections are refused once the listener is gone.
    assert!(client::connect(&config).await.is_err());

    // An already open connection keeps its read loop.
    conn.send("still here").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 10 {
        match next_event(&mut events).await {
            Event::Data { id: from, data } => {
                assert_eq!(from, id);
                received.extend_from_slice(&data);
            }
            other => panic!("Expected Data, got {other:?}"),
        }
    }
    assert_eq!(received, b"still here");

    conn.close().await;
    assert!(matches!(
        next_disconnected(&mut events).await,
        Event::Disconnected { had_error: false, .. }
    ));

    // on_close fired exactly once.
    server.close();
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );
}

/// Closes the `close_at`-th client inside `on_connection`, while it is still
/// registered, then broadcasts and reports the summary.
struct CloseThenBroadcast {
    close_at: usize,
    seen: AtomicUsize,
    summaries: mpsc::UnboundedSender<Option<BroadcastSummary>>,
}

impl ServerHandler for CloseThenBroadcast {
    async fn on_connection(&self, server: &Server<Self>, client: &Arc<Connection>) {
        let index = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if index < self.close_at {
            let _ = self.summaries.send(None);
            return;
        }

        client.close().await;
        let summary = server.broadcast(b"hi").await;
        let _ = self.summaries.send(Some(summary));
    }
}

#[tokio::test]
async fn test_broadcast_skips_registered_dead_client() {
    const CLIENTS: usize = 3;

    let (summaries, mut rx) = mpsc::unbounded_channel();
    let handler = CloseThenBroadcast {
        close_at: CLIENTS,
        seen: AtomicUsize::new(0),
        summaries,
    };
    let server = Server::listen(server_config(), handler).await.unwrap();
    let config = client_config(&server);

    let mut readers = Vec::new();
    let mut summary = None;
    for _ in 0..CLIENTS {
        let (conn, reader) = client::connect(&config).await.unwrap();
        readers.push((conn, reader));
        summary = timeout(EVENT_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    }

    let summary = summary.expect("last connection did not broadcast");
    assert_eq!(summary.recipients, CLIENTS - 1);
    assert_eq!(summary.bytes_written, (CLIENTS - 1) * 2);

    let (_, dead_reader) = readers.last_mut().unwrap();
    let outcome = timeout(EVENT_TIMEOUT, dead_reader.next_chunk()).await.unwrap();
    assert!(matches!(outcome, ReadOutcome::Eof));

    for (_, reader) in readers.iter_mut().take(CLIENTS - 1) {
        assert_eq!(read_exact(reader, 2).await.as_ref(), b"hi");
    }

    server.close();
}
