//! Per-connection session management.
//!
//! Each WebSocket connection gets a Session: a reader loop that parses
//! signaling frames and a writer task that drains the connection's outbound
//! queue into the socket.

use crate::error::{RelayError, SignalingError};
use crate::server::{ConnectionId, RegisterKind, SignalRelay};
use drop_types::{SessionKey, SignalMessage};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// A per-connection session.
pub struct Session {
    relay: Arc<SignalRelay>,
    peer: SocketAddr,
    /// Room this connection registered in.
    registered: Option<SessionKey>,
}

impl Session {
    /// Create a new session for an accepted connection.
    pub fn new(relay: Arc<SignalRelay>, peer: SocketAddr) -> Self {
        Self {
            relay,
            peer,
            registered: None,
        }
    }

    /// Run the session until the client disconnects.
    pub async fn run<S>(mut self, ws: WebSocketStream<S>) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (id, mut outbound) = self.relay.connect();
        tracing::info!("New connection {} from {}", id, self.peer);

        let (mut sink, mut stream) = ws.split();
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!("Write to {} failed: {}", id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let register_timeout =
            Duration::from_secs(self.relay.config().limits.register_timeout_secs);

        // Main session loop
        loop {
            // Unregistered connections may not idle forever.
            let next = if self.registered.is_none() {
                match tokio::time::timeout(register_timeout, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            "Register timeout ({}s) for {}",
                            register_timeout.as_secs(),
                            self.peer
                        );
                        break;
                    }
                }
            } else {
                stream.next().await
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_text(id, text.as_str()),
                Some(Ok(Message::Binary(_))) => self
                    .relay
                    .send_error(id, &SignalingError::invalid("binary frame")),
                Some(Ok(Message::Close(_))) | None => break,
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Connection {} errored: {}", id, e);
                    break;
                }
            }
        }

        // Cleanup
        self.relay.disconnect(id, self.registered.as_ref());
        let _ = writer.await;
        tracing::info!("Connection {} from {} closed", id, self.peer);
        Ok(())
    }

    /// Handle one text frame.
    fn handle_text(&mut self, id: ConnectionId, text: &str) {
        if let Err(e) = self.relay.rate_limits().check_message(id) {
            tracing::warn!("Message rate limited for {}: {}", id, e);
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            self.relay.send_error(id, &SignalingError::RateLimited);
            return;
        }

        if let Err(err) = self.dispatch(id, text) {
            self.relay.send_error(id, &err);
        }
    }

    fn dispatch(&mut self, id: ConnectionId, text: &str) -> Result<(), SignalingError> {
        let message =
            SignalMessage::from_json(text).map_err(|e| SignalingError::invalid(e.to_string()))?;
        tracing::debug!("{} -> {}", id, message.kind());

        match &message {
            SignalMessage::Register { session_key, .. } => {
                self.register(id, session_key.as_ref(), RegisterKind::Register)
            }
            SignalMessage::Join { session_key, .. } => {
                self.register(id, session_key.as_ref(), RegisterKind::Join)
            }
            msg if msg.is_relayed() => {
                let key = msg
                    .session_key()
                    .or(self.registered.as_ref())
                    .ok_or(SignalingError::UnknownSession)?;
                self.relay.relay(id, key, text.to_string())
            }
            other => Err(SignalingError::invalid(format!(
                "{} is sent by the relay only",
                other.kind()
            ))),
        }
    }

    fn register(
        &mut self,
        id: ConnectionId,
        key: Option<&SessionKey>,
        kind: RegisterKind,
    ) -> Result<(), SignalingError> {
        let key = key
            .filter(|k| !k.is_blank())
            .ok_or(SignalingError::BadJoin)?;
        if let Some(current) = &self.registered {
            if current != key {
                return Err(SignalingError::BadJoin);
            }
        }
        self.relay.register(id, key, kind)?;
        self.registered = Some(key.clone());
        Ok(())
    }
}
