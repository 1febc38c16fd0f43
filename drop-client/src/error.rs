//! Client error types.

use drop_core::{CursorError, FailureReason};
use drop_types::{ErrorReason, WireError};
use std::time::Duration;
use thiserror::Error;

use crate::peer::ChannelError;
use crate::signal::SignalError;

/// Negotiation failures. Fatal to the session.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The relay refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(ErrorReason),

    /// Nobody joined the room in time.
    #[error("timed out waiting for peer")]
    PeerTimeout,

    /// The peer engine failed.
    #[error("peer transport failed: {0}")]
    Transport(String),

    /// The signaling connection closed before the channel opened.
    #[error("signaling connection closed")]
    SignalingClosed,

    /// The peer sent `bye`.
    #[error("peer left the session")]
    PeerLeft,

    /// Signaling transport error.
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalError),
}

impl From<FailureReason> for NegotiationError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Rejected(reason) => Self::Rejected(reason),
            FailureReason::PeerTimeout => Self::PeerTimeout,
            FailureReason::Transport(detail) => Self::Transport(detail),
            FailureReason::SignalingClosed => Self::SignalingClosed,
            FailureReason::PeerLeft => Self::PeerLeft,
        }
    }
}

/// Transfer failures. Partial output stays on disk.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The channel closed before the transfer completed.
    #[error("channel closed after {received} bytes")]
    ChannelClosed {
        /// Bytes received or sent before the close.
        received: u64,
        /// Size announced by the metadata, if it arrived.
        expected: Option<u64>,
    },

    /// The channel reported a failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// The receiver never acknowledged the end of stream.
    #[error("no ack within {0:?}")]
    AckTimeout(Duration),

    /// Signaling ended while the transfer was running.
    #[error("session aborted: {0}")]
    Aborted(String),

    /// The peer broke the transfer protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A chunk did not fit the cursor.
    #[error("protocol error: {0}")]
    Cursor(#[from] CursorError),

    /// A control frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Reading the source or writing the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChannelError> for TransferError {
    fn from(error: ChannelError) -> Self {
        Self::Channel(error.to_string())
    }
}

/// Errors from the send/receive entry points.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Negotiation failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Connecting to or talking with the relay failed.
    #[error(transparent)]
    Signaling(#[from] SignalError),
}

impl ClientError {
    /// Process exit status for a command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Negotiation(_) => 2,
            Self::Transfer(_) => 3,
            Self::Signaling(_) => 4,
        }
    }
}
