//! Transfer Session.
//!
//! Moves one file over an open [`DataChannel`](crate::peer::DataChannel).
//! Control frames travel as JSON text, chunk payloads as binary frames.
//!
//! Two modes:
//! - **Pull** ([`serve_pull`] / [`fetch_pull`]): the receiver asks for the
//!   metadata, then for one chunk at a time
//! - **Push** ([`push_file`] / [`receive_push`]): the sender streams every
//!   chunk, paced by the channel's buffered amount, and waits for an ack
//!
//! Both receivers hash the stream with SHA-256 and compare it with the
//! digest the sender announced. A mismatch is reported in the outcome, not
//! raised as an error.

mod pull;
mod push;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use pull::{fetch_pull, serve_pull};
pub use push::{push_file, receive_push};
pub use store::{
    file_meta, ChunkSink, ChunkSource, FileOutput, FileSink, FileSource, MemoryOutput,
    MemorySink, MemorySource, SinkOpener,
};

use std::path::PathBuf;
use std::time::Duration;

use drop_core::{Backpressure, FlushPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_FLUSH_BYTES};
use drop_types::ControlFrame;
use sha2::{Digest, Sha256};

use crate::error::TransferError;
use crate::peer::{ChannelMessage, DataChannel};

/// Default wait for the receiver's ack in push mode.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default backpressure poll interval in push mode.
pub const DEFAULT_BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// Who drives the transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Receiver requests each chunk.
    #[default]
    Pull,
    /// Sender streams chunks with backpressure.
    Push,
}

/// Transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Transfer mode.
    pub mode: TransferMode,
    /// Chunk size used by the sender.
    pub chunk_size: u64,
    /// Durable flush interval on the receiver.
    pub flush_every: u64,
    /// How long a push sender waits for the ack.
    pub ack_timeout: Duration,
    /// Sleep between buffered-amount checks.
    pub backpressure_poll: Duration,
    /// Buffered-amount threshold; 8 chunks when unset.
    pub backpressure_threshold: Option<u64>,
    /// Replace an existing output file instead of picking a `.recv` name.
    pub overwrite: bool,
    /// Announce a SHA-256 in pull-mode metadata (hashes the file up front).
    pub compute_digest: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_every: DEFAULT_FLUSH_BYTES,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            backpressure_poll: DEFAULT_BACKPRESSURE_POLL,
            backpressure_threshold: None,
            overwrite: false,
            compute_digest: true,
        }
    }
}

impl TransferConfig {
    /// Set the transfer mode.
    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the durable flush interval.
    pub fn with_flush_every(mut self, bytes: u64) -> Self {
        self.flush_every = bytes;
        self
    }

    /// Set the ack timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set an explicit backpressure threshold.
    pub fn with_backpressure_threshold(mut self, bytes: u64) -> Self {
        self.backpressure_threshold = Some(bytes);
        self
    }

    /// Allow overwriting the output file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Enable or disable the up-front digest.
    pub fn with_digest(mut self, compute: bool) -> Self {
        self.compute_digest = compute;
        self
    }

    /// Backpressure policy for a stream with the given chunk size.
    pub fn backpressure(&self, chunk_size: u64) -> Backpressure {
        self.backpressure_threshold
            .map(Backpressure::new)
            .unwrap_or_else(|| Backpressure::for_chunk_size(chunk_size))
    }
}

/// Digest verdict for a received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// Local digest matches the announced one.
    Verified,
    /// The sender announced no digest.
    Unverified,
    /// Digests differ. The file is kept.
    Mismatch {
        /// Announced digest.
        expected: String,
        /// Digest of the bytes written.
        actual: String,
    },
}

impl Integrity {
    /// Compare an announced digest with the local one.
    pub fn check(expected: Option<&str>, actual: &str) -> Self {
        match expected {
            None => Self::Unverified,
            Some(expected) if expected.eq_ignore_ascii_case(actual) => Self::Verified,
            Some(expected) => {
                tracing::warn!(
                    "Integrity warning: expected sha256 {}, got {}",
                    expected,
                    actual
                );
                Self::Mismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }
            }
        }
    }

    /// No mismatch was detected.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// File read (sender) or written (receiver).
    pub path: PathBuf,
    /// Bytes transferred.
    pub bytes: u64,
    /// Hex SHA-256 of the transferred bytes, when known.
    pub digest: Option<String>,
    /// Digest verdict.
    pub integrity: Integrity,
}

impl TransferOutcome {
    /// Process exit status: the file was delivered, even with a mismatch.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// Sender-side counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Control frames handled (pull mode).
    pub requests: u64,
    /// Chunks sent.
    pub chunks: u64,
    /// Payload bytes sent.
    pub bytes: u64,
    /// Digest of the stream, when computed.
    pub digest: Option<String>,
}

async fn send_control<C: DataChannel + ?Sized>(
    channel: &mut C,
    frame: impl Into<ControlFrame>,
) -> Result<(), TransferError> {
    let text = frame.into().encode()?;
    channel.send(ChannelMessage::Text(text)).await?;
    Ok(())
}

/// Receive-side writer shared by both modes: hashes, writes, flushes.
struct Incoming<K> {
    path: PathBuf,
    sink: K,
    hasher: Sha256,
    flush: FlushPolicy,
    written: u64,
    expected: u64,
}

impl<K: ChunkSink> Incoming<K> {
    fn new(path: PathBuf, sink: K, flush_every: u64, expected: u64) -> Self {
        Self {
            path,
            sink,
            hasher: Sha256::new(),
            flush: FlushPolicy::new(flush_every),
            written: 0,
            expected,
        }
    }

    /// Share of the announced size written so far, in percent.
    fn percent(&self) -> f64 {
        if self.expected == 0 {
            return 100.0;
        }
        self.written as f64 * 100.0 / self.expected as f64
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.hasher.update(bytes);
        self.sink.write(bytes).await?;
        self.written += bytes.len() as u64;
        if self.flush.record(bytes.len() as u64) {
            self.sink.sync().await?;
            tracing::debug!(
                "{}: {}/{} bytes ({:.1}%)",
                self.path.display(),
                self.written,
                self.expected,
                self.percent()
            );
        }
        Ok(())
    }

    async fn finish(mut self, expected: Option<&str>) -> Result<TransferOutcome, TransferError> {
        self.sink.finish().await?;
        let digest = hex::encode(self.hasher.finalize());
        let integrity = Integrity::check(expected, &digest);
        tracing::info!(
            "Received {} bytes into {} ({:?})",
            self.written,
            self.path.display(),
            integrity
        );
        Ok(TransferOutcome {
            path: self.path,
            bytes: self.written,
            digest: Some(digest),
            integrity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn integrity_verdicts() {
        assert_eq!(Integrity::check(None, ABC_SHA256), Integrity::Unverified);
        assert_eq!(
            Integrity::check(Some(&ABC_SHA256.to_uppercase()), ABC_SHA256),
            Integrity::Verified
        );
        let mismatch = Integrity::check(Some("00"), ABC_SHA256);
        assert!(!mismatch.is_ok());
        assert_eq!(
            mismatch,
            Integrity::Mismatch {
                expected: "00".into(),
                actual: ABC_SHA256.into()
            }
        );
    }

    #[test]
    fn backpressure_defaults_to_eight_chunks() {
        let config = TransferConfig::default();
        assert_eq!(config.backpressure(1024).threshold(), 8 * 1024);
        let config = config.with_backpressure_threshold(100);
        assert_eq!(config.backpressure(1024).threshold(), 100);
    }

    #[test]
    fn default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.mode, TransferMode::Pull);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.flush_every, 4 * 1024 * 1024);
        assert_eq!(config.ack_timeout, Duration::from_secs(30));
        assert!(!config.overwrite);
    }

    #[tokio::test]
    async fn incoming_hashes_and_flushes() {
        let output = MemoryOutput::new();
        let sink = output.sink();
        let mut incoming = Incoming::new(PathBuf::from("abc"), sink, 2, 3);
        incoming.write(b"a").await.unwrap();
        incoming.write(b"bc").await.unwrap();
        assert_eq!(incoming.percent(), 100.0);
        let outcome = incoming.finish(Some(ABC_SHA256)).await.unwrap();

        assert_eq!(outcome.bytes, 3);
        assert_eq!(outcome.integrity, Integrity::Verified);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(output.bytes(), b"abc");
        assert_eq!(output.syncs(), 1);
        assert!(output.is_finished());
    }

    #[tokio::test]
    async fn incoming_reports_progress() {
        let output = MemoryOutput::new();
        let mut incoming = Incoming::new(PathBuf::from("p"), output.sink(), 1024, 8);
        assert_eq!(incoming.percent(), 0.0);
        incoming.write(b"ab").await.unwrap();
        assert_eq!(incoming.percent(), 25.0);
        incoming.write(b"cdef").await.unwrap();
        assert_eq!(incoming.percent(), 75.0);

        let empty = Incoming::new(PathBuf::from("e"), MemoryOutput::new().sink(), 1024, 0);
        assert_eq!(empty.percent(), 100.0);
    }
}
