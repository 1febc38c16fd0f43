//! WebSocket accept loop for the signaling relay.

use crate::error::RelayError;
use crate::server::SignalRelay;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Default signaling port.
pub const DEFAULT_PORT: u16 = 8765;

/// Listening relay.
#[derive(Debug)]
pub struct RelayServer {
    relay: Arc<SignalRelay>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind the configured `server.bind_address`.
    pub async fn bind(relay: Arc<SignalRelay>) -> Result<Self, RelayError> {
        let addr = relay.config().server.bind_address.clone();
        let listener = TcpListener::bind(&addr).await?;
        Ok(Self { relay, listener })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), RelayError> {
        tracing::info!("Signaling relay listening on {}", self.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            accept(self.relay.clone(), stream, peer);
        }
    }
}

/// Admit one TCP connection and spawn its session.
fn accept(relay: Arc<SignalRelay>, stream: TcpStream, peer: SocketAddr) {
    // Rate limit check: prevent connection flooding from a single address
    if let Err(e) = relay.rate_limits().check_connection(peer.ip()) {
        tracing::warn!("Connection rate limited for {}: {}", peer, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let max = relay.config().server.max_message_size;
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(max))
        .max_frame_size(Some(max));

    // Spawn session handler - don't block the accept loop
    tokio::spawn(async move {
        let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        };
        if let Err(e) = Session::new(relay, peer).run(ws).await {
            tracing::warn!("Session error: {}", e);
        }
    });
}
