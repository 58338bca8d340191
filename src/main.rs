//! SSE relay server.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                  SSE RELAY                   │
//!   Browser               │                                              │
//!   GET /sse-proxy ───────┼─▶ http (CORS, request ID) ─▶ relay handler   │
//!                         │                                   │          │
//!                         │                       upstream GET│+ bearer  │
//!                         │                                   ▼          │    Upstream
//!                         │   ┌──────────── session task ─────────────┐ ─┼──▶ event router
//!                         │   │ upstream chunks │ heartbeat │ closed? │ ◀┼──  (SSE)
//!                         │   └───────────────┬───────────────────────┘  │
//!   ◀─────── SSE body ────┼──── mpsc channel ◀┘                          │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use sse_relay::config::{load_config, RelayConfig};
use sse_relay::lifecycle::{signals, Shutdown};
use sse_relay::observability::{logging, metrics};
use sse_relay::RelayServer;

/// Relay an upstream SSE stream to browser clients.
#[derive(Debug, Parser)]
#[command(name = "sse-relay", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides the configuration file).
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?cli.config,
        bind_address = %config.listener.bind_address(),
        upstream_scheme = %config.upstream.scheme,
        keepalive_interval_secs = config.stream.keepalive_interval_secs,
        "sse-relay starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(config.listener.bind_address()).await?;

    let shutdown = Shutdown::new();
    let server = RelayServer::new(config, shutdown.clone())?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        let notified = signal_shutdown.trigger();
        tracing::info!(subscribers = notified, "Shutdown signalled");
    });

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
