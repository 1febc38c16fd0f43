//! Error types for natdrop wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON encoding or decoding failed
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed but violates the protocol
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
