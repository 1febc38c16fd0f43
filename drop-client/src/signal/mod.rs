//! Signaling transport abstraction for natdrop.
//!
//! The negotiation coordinator talks to the relay through [`SignalTransport`]:
//! - `send()` transmits one signaling message
//! - `recv()` waits for the next one (`None` once the connection closed)
//! - `close()` gracefully terminates
//!
//! [`WsSignalTransport`] speaks JSON over a WebSocket; [`MockSignalTransport`]
//! lets tests script the relay side.

mod mock;
mod ws;

pub use mock::MockSignalTransport;
pub use ws::WsSignalTransport;

use async_trait::async_trait;
use drop_types::{SignalMessage, WireError};
use thiserror::Error;

/// Signaling transport errors.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Message could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(#[from] WireError),
}

/// Transport for signaling messages.
///
/// `recv` must be cancel-safe: the coordinator polls it inside `select!`.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Send one message to the relay.
    async fn send(&self, message: &SignalMessage) -> Result<(), SignalError>;

    /// Receive the next message, or `None` once the connection is closed.
    async fn recv(&self) -> Result<Option<SignalMessage>, SignalError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), SignalError>;
}
