//! Transfer bookkeeping for natdrop.
//!
//! This module provides the arithmetic shared by both transfer modes:
//! - Chunk addressing (`[i * chunk_size, min((i + 1) * chunk_size, size))`)
//! - The pull-mode receive cursor, which rejects out-of-order or
//!   wrong-length chunks
//! - Backpressure and durable-flush thresholds for the push mode
//!
//! Nothing here touches a channel or a file.

use drop_types::TransferMeta;
use thiserror::Error;

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Default interval between durable flushes (4 MiB).
pub const DEFAULT_FLUSH_BYTES: u64 = 4 * 1024 * 1024;

/// Buffered-amount threshold, in chunks, above which a sender pauses.
pub const BACKPRESSURE_CHUNKS: u64 = 8;

/// Number of chunks needed for `size` bytes.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        0
    } else {
        size.div_ceil(chunk_size)
    }
}

/// Byte offset and length of chunk `index`, or `None` when out of range.
pub fn chunk_span(index: u64, size: u64, chunk_size: u64) -> Option<(u64, u64)> {
    if index >= chunk_count(size, chunk_size) {
        return None;
    }
    let offset = index * chunk_size;
    Some((offset, chunk_size.min(size - offset)))
}

/// Protocol violations detected by the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// A chunk arrived after the last one.
    #[error("unexpected chunk: all {count} chunks already received")]
    AlreadyComplete {
        /// Total chunk count.
        count: u64,
    },
    /// The chunk length does not match its index.
    #[error("chunk {index} has {actual} bytes, expected {expected}")]
    WrongLength {
        /// Chunk index.
        index: u64,
        /// Length implied by the metadata.
        expected: u64,
        /// Length received.
        actual: u64,
    },
}

/// What the receiver does after applying a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Request this chunk next.
    Request(u64),
    /// Every chunk has been received.
    Complete,
}

/// Receive-side position in a pull transfer.
///
/// Chunks are requested one at a time, so each binary frame is the chunk at
/// `next_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCursor {
    size: u64,
    chunk_size: u64,
    chunk_count: u64,
    next_index: u64,
    received: u64,
}

impl TransferCursor {
    /// Start a cursor for the announced metadata.
    pub fn new(meta: &TransferMeta) -> Self {
        Self {
            size: meta.size,
            chunk_size: meta.chunk_size,
            chunk_count: meta.chunk_count,
            next_index: 0,
            received: 0,
        }
    }

    /// First step after metadata: request chunk 0, or finish for empty files.
    pub fn start(&self) -> CursorStep {
        if self.chunk_count == 0 {
            CursorStep::Complete
        } else {
            CursorStep::Request(0)
        }
    }

    /// Account for a chunk of `len` bytes at `next_index`.
    pub fn apply(&mut self, len: u64) -> Result<CursorStep, CursorError> {
        let index = self.next_index;
        let Some((_, expected)) = chunk_span(index, self.size, self.chunk_size) else {
            return Err(CursorError::AlreadyComplete {
                count: self.chunk_count,
            });
        };
        if len != expected {
            return Err(CursorError::WrongLength {
                index,
                expected,
                actual: len,
            });
        }
        self.received += len;
        self.next_index += 1;
        if self.next_index == self.chunk_count {
            Ok(CursorStep::Complete)
        } else {
            Ok(CursorStep::Request(self.next_index))
        }
    }

    /// Index of the chunk expected next.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// All chunks received.
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.chunk_count
    }
}

/// Sender-side flow control for push mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpressure {
    threshold: u64,
}

impl Backpressure {
    /// Pause while more than `threshold` bytes are buffered.
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// The default threshold for a chunk size (8 chunks).
    pub fn for_chunk_size(chunk_size: u64) -> Self {
        Self::new(chunk_size.saturating_mul(BACKPRESSURE_CHUNKS))
    }

    /// The sender must wait before queueing another chunk.
    pub fn should_wait(&self, buffered: u64) -> bool {
        buffered > self.threshold
    }

    /// Threshold in bytes.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

/// Tracks bytes written since the last durable flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    every: u64,
    pending: u64,
}

impl FlushPolicy {
    /// Flush after every `every` bytes (0 flushes after each write).
    pub fn new(every: u64) -> Self {
        Self { every, pending: 0 }
    }

    /// Record a write; true when a durable flush is due now.
    pub fn record(&mut self, written: u64) -> bool {
        self.pending += written;
        if self.pending >= self.every {
            self.pending = 0;
            true
        } else {
            false
        }
    }

    /// Bytes written since the last flush.
    pub fn pending(&self) -> u64 {
        self.pending
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_BYTES)
    }
}
