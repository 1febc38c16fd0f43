//! WebSocket signaling transport.

use super::{SignalError, SignalTransport};
use async_trait::async_trait;
use drop_types::SignalMessage;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Signaling over a WebSocket connection to the relay.
///
/// A reader task parses incoming text frames; frames that are not valid
/// signaling messages are logged and skipped.
pub struct WsSignalTransport {
    sink: Mutex<WsSink>,
    inbound: Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for WsSignalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSignalTransport").finish_non_exhaustive()
    }
}

impl WsSignalTransport {
    /// Connect to a relay at `url` (`ws://host:port`).
    pub async fn connect(url: &str) -> Result<Self, SignalError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| SignalError::ConnectionFailed(e.to_string()))?;
        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::debug!("Connected to signaling relay {}", url);

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring unparsable signaling frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Signaling connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sink: Mutex::new(sink),
            inbound: Mutex::new(rx),
            reader,
        })
    }
}

#[async_trait]
impl SignalTransport for WsSignalTransport {
    async fn send(&self, message: &SignalMessage) -> Result<(), SignalError> {
        let text = message.to_json()?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| SignalError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<SignalMessage>, SignalError> {
        let mut inbound = self.inbound.lock().await;
        Ok(inbound.recv().await)
    }

    async fn close(&self) -> Result<(), SignalError> {
        let mut sink = self.sink.lock().await;
        let result = sink.close().await;
        self.reader.abort();
        result.map_err(|e| SignalError::SendFailed(e.to_string()))
    }
}

impl Drop for WsSignalTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
