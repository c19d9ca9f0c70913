//! Tether echo client binary.
//!
//! Connects, sends one message, prints what comes back and disconnects.
//!
//! # Usage
//!
//! ```bash
//! tether-echo-client --server 127.0.0.1:3000 --message "Hello"
//!
//! # TLS with a private CA
//! tether-echo-client --server 127.0.0.1:3443 --ca ca.pem --server-name localhost
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tether_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_SERVER_ADDR};
use tether_network::{ClientConfig, ClientTlsConfig, Connection, ConnectionHandler, client};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether echo client
#[derive(Parser, Debug)]
#[command(name = "tether-echo-client")]
#[command(about = "Send a message to an echo server and print the reply")]
#[command(version)]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = DEFAULT_SERVER_ADDR)]
    server: String,

    /// Message to send
    #[arg(short, long, default_value = "Hello, tether!")]
    message: String,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Use TLS, trusting only the CA certificates in this PEM file
    #[arg(long)]
    ca: Option<String>,

    /// Use TLS with the bundled web PKI roots
    #[arg(long, conflicts_with = "ca")]
    tls: bool,

    /// Server name to verify (defaults to the host part of --server)
    #[arg(long)]
    server_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Prints the first reply, then hangs up
struct PrintReply {
    done: Arc<Notify>,
}

impl ConnectionHandler for PrintReply {
    async fn on_data(&self, connection: &Arc<Connection>, data: Bytes) {
        println!("{}", String::from_utf8_lossy(&data));
        connection.close().await;
    }

    async fn on_error(&self, _connection: &Arc<Connection>, error: &std::io::Error) {
        warn!("Connection error: {}", error);
    }

    async fn on_close(&self, _connection: &Arc<Connection>, had_error: bool) {
        info!("Connection closed (had_error: {})", had_error);
        self.done.notify_one();
    }
}

fn tls_config(args: &Args) -> anyhow::Result<Option<ClientTlsConfig>> {
    let tls = match (&args.ca, args.tls) {
        (Some(ca), _) => ClientTlsConfig::from_ca_file(ca)
            .with_context(|| format!("loading CA certificates from {ca}"))?,
        (None, true) => ClientTlsConfig::with_webpki_roots()?,
        (None, false) => return Ok(None),
    };

    Ok(Some(match &args.server_name {
        Some(name) => tls.server_name(name.clone()),
        None => tls,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig {
        server_addr: args.server.clone(),
        timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };

    let done = Arc::new(Notify::new());
    let handler = PrintReply { done: done.clone() };

    let connection = match tls_config(&args)? {
        Some(tls) => client::connect_secure_with_handler(&config, &tls, handler).await,
        None => client::connect_with_handler(&config, handler).await,
    }
    .with_context(|| format!("connecting to {}", args.server))?;

    info!("Connected to {} as {}", args.server, connection.id());
    connection
        .send(&args.message)
        .await
        .context("sending message")?;

    done.notified().await;
    Ok(())
}
