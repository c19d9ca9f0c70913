//! Tether echo server binary.
//!
//! Writes every received chunk back to the client that sent it.
//!
//! # Usage
//!
//! ```bash
//! # Plain TCP on the default port
//! tether-echo-server
//!
//! # TLS
//! tether-echo-server --bind 0.0.0.0:3443 --cert cert.pem --key key.pem
//! ```

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tether_core::constants::DEFAULT_BIND_ADDR;
use tether_network::{ClientId, Connection, Server, ServerConfig, ServerHandler, ServerTlsConfig};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether echo server
#[derive(Parser, Debug)]
#[command(name = "tether-echo-server")]
#[command(about = "Echo every received byte back to its sender")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = DEFAULT_BIND_ADDR)]
    bind: String,

    /// Path to TLS certificate chain (PEM format)
    #[arg(short, long, requires = "key")]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, requires = "cert")]
    key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Echo;

impl ServerHandler for Echo {
    async fn on_connection(&self, server: &Server<Self>, client: &Arc<Connection>) {
        info!(
            "Client {} connected from {:?} ({} total)",
            client.id(),
            client.peer_addr(),
            server.client_count()
        );
    }

    async fn on_data(&self, _server: &Server<Self>, client: &Arc<Connection>, data: Bytes) {
        if let Err(e) = client.write(&data).await {
            warn!("Echo to {} failed: {}", client.id(), e);
        }
    }

    async fn on_disconnect(&self, server: &Server<Self>, id: ClientId, had_error: bool) {
        info!(
            "Client {} disconnected (had_error: {}, {} remaining)",
            id,
            had_error,
            server.client_count()
        );
    }

    async fn on_client_error(
        &self,
        _server: &Server<Self>,
        client: &Arc<Connection>,
        error: &std::io::Error,
    ) {
        warn!("Client {} error: {}", client.id(), error);
    }

    async fn on_server_error(&self, _server: &Server<Self>, error: &std::io::Error) {
        tracing::error!("Server error: {}", error);
    }

    async fn on_close(&self, _server: &Server<Self>, had_error: bool) {
        info!("Server closed (had_error: {})", had_error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        bind_addr: args.bind,
        ..Default::default()
    };

    let server = match (args.cert, args.key) {
        (Some(cert), Some(key)) => {
            let tls = ServerTlsConfig::from_pem_files(&cert, &key)
                .with_context(|| format!("loading TLS identity from {cert} and {key}"))?;
            Server::listen_secure(config, tls, Echo).await?
        }
        _ => Server::listen(config, Echo).await?,
    };

    info!(
        "Echo server listening on {} (tls: {})",
        server.local_addr(),
        server.is_secure()
    );

    tokio::select! {
        _ = server.closed() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("Shutdown requested");
            server.close();
            server.closed().await;
        }
    }

    Ok(())
}
