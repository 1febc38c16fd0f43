//! Control frames of the transfer protocol.
//!
//! Control frames travel as JSON text over the data channel; chunk bytes
//! travel as binary frames and never pass through this module. Pull-mode
//! frames are tagged by `type`, push-mode frames by `kind`.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Immutable description of the file being transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    /// Display name (basename of the source file).
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Fixed chunk size in bytes.
    #[serde(alias = "chunk_size")]
    pub chunk_size: u64,
    /// Number of chunks, `ceil(size / chunk_size)`.
    #[serde(alias = "chunks")]
    pub chunk_count: u64,
    /// Hex SHA-256 of the whole byte stream, when the sender computed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl TransferMeta {
    /// Build metadata, deriving the chunk count.
    pub fn new(name: impl Into<String>, size: u64, chunk_size: u64, sha256: Option<String>) -> Self {
        let chunk_count = if chunk_size == 0 {
            0
        } else {
            size.div_ceil(chunk_size)
        };
        Self {
            name: name.into(),
            size,
            chunk_size,
            chunk_count,
            sha256,
        }
    }

    /// Reject metadata whose fields disagree with each other.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.chunk_size == 0 {
            return Err(WireError::InvalidFrame("chunkSize is zero".into()));
        }
        let expected = self.size.div_ceil(self.chunk_size);
        if self.chunk_count != expected {
            return Err(WireError::InvalidFrame(format!(
                "chunkCount {} does not match size {} / chunkSize {} (expected {})",
                self.chunk_count, self.size, self.chunk_size, expected
            )));
        }
        if self.name.is_empty() {
            return Err(WireError::InvalidFrame("empty file name".into()));
        }
        Ok(())
    }
}

/// Receiver-driven (pull mode) control frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PullControl {
    /// Ask for the metadata.
    #[serde(rename = "GET_META")]
    GetMeta,
    /// Ask for one chunk.
    #[serde(rename = "GET_CHUNK")]
    GetChunk {
        /// Chunk index.
        index: u64,
    },
    /// Metadata reply.
    #[serde(rename = "META")]
    Meta(TransferMeta),
}

/// Sender-driven (push mode) control frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PushControl {
    /// Announces the stream.
    Meta {
        /// Display name.
        name: String,
        /// Total size in bytes.
        size: u64,
    },
    /// Last chunk sent; carries the stream digest.
    Eof {
        /// Hex SHA-256 of the whole stream.
        sha256: String,
    },
    /// Receiver has flushed and closed the output.
    Ack,
}

/// Any control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlFrame {
    /// Pull-mode frame.
    Pull(PullControl),
    /// Push-mode frame.
    Push(PushControl),
}

impl ControlFrame {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::from)
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::from)
    }
}

impl From<PullControl> for ControlFrame {
    fn from(frame: PullControl) -> Self {
        Self::Pull(frame)
    }
}

impl From<PushControl> for ControlFrame {
    fn from(frame: PushControl) -> Self {
        Self::Push(frame)
    }
}
