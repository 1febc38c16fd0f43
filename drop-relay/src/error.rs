//! Error types for drop-relay.

use drop_core::RoomError;
use drop_types::ErrorReason;

/// Main error type for drop-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// WebSocket handshake or framing error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A client request the relay refuses.
///
/// Replied to the offending client as `{"type":"error","reason":...}`;
/// never fatal to the server or to other connections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    /// Missing or blank session key, or a registration for a second room.
    #[error("bad join")]
    BadJoin,

    /// Both slots are taken, or the room limit is reached.
    #[error("room full")]
    RoomFull,

    /// No such room, or the sender does not belong to it.
    #[error("unknown session")]
    UnknownSession,

    /// The peer slot is empty and buffering is disabled.
    #[error("peer not ready")]
    PeerNotReady,

    /// Unparsable or unexpected frame.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong with the frame.
        reason: String,
    },

    /// Message rate limit exceeded.
    #[error("rate limited")]
    RateLimited,
}

impl SignalingError {
    /// Wire reason sent back to the client.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::BadJoin => ErrorReason::BadJoin,
            Self::RoomFull => ErrorReason::RoomFull,
            Self::UnknownSession => ErrorReason::UnknownSession,
            Self::PeerNotReady => ErrorReason::PeerNotReady,
            Self::InvalidMessage { .. } => ErrorReason::InvalidMessage,
            Self::RateLimited => ErrorReason::RateLimited,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }
}

impl From<RoomError> for SignalingError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::Full | RoomError::TooManyRooms => Self::RoomFull,
            RoomError::UnknownSession | RoomError::NotMember => Self::UnknownSession,
            RoomError::PeerAbsent => Self::PeerNotReady,
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
