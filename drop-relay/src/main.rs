//! natdrop-relay binary entry point.
//!
//! Usage:
//! ```bash
//! natdrop-relay --config relay.toml
//! natdrop-relay --bind 0.0.0.0:8765
//! natdrop-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use drop_relay::config::Config;
use drop_relay::http;
use drop_relay::protocol::RelayServer;
use drop_relay::server::SignalRelay;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Rendezvous and signaling relay for natdrop.
#[derive(Parser, Debug)]
#[command(name = "natdrop-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// WebSocket bind address, overrides `server.bind_address`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let relay = Arc::new(SignalRelay::new(config));

    if relay.config().http.enabled {
        let http_addr = relay.config().http.bind_address.clone();
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP endpoint {http_addr}"))?;
        tracing::info!("HTTP endpoints on {}", http_addr);
        let router = http::build_router(relay.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::warn!("HTTP server stopped: {}", e);
            }
        });
    }

    // Keep the rate limiter maps from growing with idle keys
    let limits = relay.rate_limits().clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            limits.shrink();
        }
    });

    let server = RelayServer::bind(relay.clone())
        .await
        .context("Failed to bind signaling listener")?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
