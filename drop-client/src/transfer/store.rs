//! File Store Adapter.
//!
//! The transfer session reads chunks from a [`ChunkSource`] and appends
//! received bytes to a [`ChunkSink`]; a [`SinkOpener`] resolves where the
//! sink lives once the metadata is known. File-backed implementations use
//! tokio's filesystem API; the in-memory ones back the tests.

use async_trait::async_trait;
use drop_core::{chunk_span, resolve_output_path};
use drop_types::TransferMeta;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::error::TransferError;

/// Read size used while hashing a file.
const HASH_READ_SIZE: usize = 1024 * 1024;

/// Name used when the announced one has no usable file name.
const FALLBACK_NAME: &str = "received.bin";

/// Random access to the chunks of the outgoing file.
#[async_trait]
pub trait ChunkSource: Send {
    /// Metadata describing the stream.
    fn meta(&self) -> &TransferMeta;

    /// Bytes of chunk `index`, or `None` when out of range.
    async fn read_chunk(&mut self, index: u64) -> Result<Option<Vec<u8>>, TransferError>;
}

/// Sequential writer for the incoming file.
#[async_trait]
pub trait ChunkSink: Send {
    /// Append bytes.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransferError>;

    /// Make everything written so far durable.
    async fn sync(&mut self) -> Result<(), TransferError>;

    /// Flush, sync and close.
    async fn finish(&mut self) -> Result<(), TransferError>;
}

/// Resolves and opens the output once the file name is known.
#[async_trait]
pub trait SinkOpener: Send {
    /// Sink type produced.
    type Sink: ChunkSink;

    /// Open the output for a file announced as `name`.
    async fn open(&mut self, name: &str) -> Result<(PathBuf, Self::Sink), TransferError>;
}

/// Build metadata for `path`, optionally streaming it through SHA-256.
pub async fn file_meta(
    path: &Path,
    chunk_size: u64,
    with_hash: bool,
) -> Result<TransferMeta, TransferError> {
    let size = tokio::fs::metadata(path).await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    let sha256 = if with_hash {
        let mut file = File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_READ_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Some(hex::encode(hasher.finalize()))
    } else {
        None
    };

    Ok(TransferMeta::new(name, size, chunk_size, sha256))
}

/// Chunks read from a file on disk.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    meta: TransferMeta,
}

impl FileSource {
    /// Open `path` and describe it.
    pub async fn open(path: &Path, chunk_size: u64, with_hash: bool) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::Protocol("chunk size must be positive".into()));
        }
        let meta = file_meta(path, chunk_size, with_hash).await?;
        let file = File::open(path).await?;
        tracing::debug!(
            "Serving {} ({} bytes, {} chunks)",
            path.display(),
            meta.size,
            meta.chunk_count
        );
        Ok(Self { file, meta })
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    async fn read_chunk(&mut self, index: u64) -> Result<Option<Vec<u8>>, TransferError> {
        let Some((offset, len)) = chunk_span(index, self.meta.size, self.meta.chunk_size) else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

/// Output file on disk.
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create (or truncate) `path`.
    pub async fn create(path: &Path) -> Result<Self, TransferError> {
        let file = File::create(path).await?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), TransferError> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_data().await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransferError> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Output target on disk.
///
/// A directory target receives the announced file name; any other target
/// is used as the file path. Existing files are kept unless `overwrite` is
/// set; a `.recv` variant is chosen instead.
#[derive(Debug, Clone)]
pub struct FileOutput {
    target: PathBuf,
    overwrite: bool,
}

impl FileOutput {
    /// Output to `target`.
    pub fn new(target: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            target: target.into(),
            overwrite,
        }
    }

    /// Path the next `open(name)` would write to.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let candidate = if self.target.is_dir() {
            self.target.join(sanitize_name(name))
        } else {
            self.target.clone()
        };
        resolve_output_path(&candidate, self.overwrite, |p| p.exists())
    }
}

/// Strip directories from an announced name.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[async_trait]
impl SinkOpener for FileOutput {
    type Sink = FileSink;

    async fn open(&mut self, name: &str) -> Result<(PathBuf, FileSink), TransferError> {
        let path = self.resolve(name);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let sink = FileSink::create(&path).await?;
        tracing::debug!("Writing {} to {}", name, path.display());
        Ok((path, sink))
    }
}

/// Chunks served from memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    meta: TransferMeta,
}

impl MemorySource {
    /// Serve `data` as `name`, with its SHA-256 announced.
    pub fn new(name: &str, data: Vec<u8>, chunk_size: u64) -> Self {
        let digest = hex::encode(Sha256::digest(&data));
        let meta = TransferMeta::new(name, data.len() as u64, chunk_size, Some(digest));
        Self { data, meta }
    }

    /// Replace the announced metadata.
    pub fn with_meta(mut self, meta: TransferMeta) -> Self {
        self.meta = meta;
        self
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    async fn read_chunk(&mut self, index: u64) -> Result<Option<Vec<u8>>, TransferError> {
        Ok(chunk_span(index, self.data.len() as u64, self.meta.chunk_size)
            .map(|(offset, len)| self.data[offset as usize..(offset + len) as usize].to_vec()))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    name: Option<String>,
    bytes: Vec<u8>,
    syncs: usize,
    finished: bool,
}

/// In-memory output; clones share the written bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOutput {
    /// Empty output.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A sink writing into this output.
    pub fn sink(&self) -> MemorySink {
        MemorySink {
            output: self.clone(),
        }
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.state().bytes.clone()
    }

    /// Name the output was opened for.
    pub fn name(&self) -> Option<String> {
        self.state().name.clone()
    }

    /// Durable flushes requested.
    pub fn syncs(&self) -> usize {
        self.state().syncs
    }

    /// `finish` was called.
    pub fn is_finished(&self) -> bool {
        self.state().finished
    }
}

#[async_trait]
impl SinkOpener for MemoryOutput {
    type Sink = MemorySink;

    async fn open(&mut self, name: &str) -> Result<(PathBuf, MemorySink), TransferError> {
        self.state().name = Some(name.to_string());
        Ok((PathBuf::from(sanitize_name(name)), self.sink()))
    }
}

/// Sink half of a [`MemoryOutput`].
#[derive(Debug, Clone)]
pub struct MemorySink {
    output: MemoryOutput,
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.output.state().bytes.extend_from_slice(bytes);
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), TransferError> {
        self.output.state().syncs += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransferError> {
        self.output.state().finished = true;
        Ok(())
    }
}
