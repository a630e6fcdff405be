use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Local storage failures surfaced to callers. A missing key is never an
/// error; disk trouble is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("key does not map to a valid store path")]
    InvalidKey,
}

/// Per-artifact bookkeeping held in the in-memory index.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub size: u64,
    /// Unix millis of the last successful get or put.
    pub last_access: u64,
    /// Unix millis of the last put (last-writer-wins tiebreak).
    pub last_modified: u64,
}

pub(crate) type PinMap = Arc<DashMap<String, usize>>;

/// In-flight marker for one served blob. While any guard for a key is alive
/// the eviction loop will not remove that key.
pub struct PinGuard {
    pins: PinMap,
    key: String,
}

pub(crate) fn pin(pins: &PinMap, key: &str) -> PinGuard {
    *pins.entry(key.to_string()).or_insert(0) += 1;
    PinGuard {
        pins: pins.clone(),
        key: key.to_string(),
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let emptied = {
            match self.pins.get_mut(&self.key) {
                Some(mut count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            }
        };
        if emptied {
            self.pins.remove_if(&self.key, |_, count| *count == 0);
        }
    }
}

/// A temp file receiving a streamed blob before it is either committed into
/// the store (atomic rename) or discarded. Dropping an uncommitted spool
/// removes the file.
pub struct Spool {
    path: PathBuf,
    file: File,
    len: u64,
    keep: bool,
}

impl Spool {
    pub(crate) async fn create(path: PathBuf) -> Result<Self, StoreError> {
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            len: 0,
            keep: false,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Drains `reader` to the end of the spool, returning the bytes copied.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let copied = tokio::io::copy(reader, &mut self.file).await?;
        self.len += copied;
        Ok(copied)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh read handle on the spooled data.
    pub async fn reopen(&self) -> Result<File, StoreError> {
        Ok(File::open(&self.path).await?)
    }

    pub(crate) async fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush().await?;
        Ok(())
    }

    pub(crate) async fn persist_to(mut self, path: &Path) -> Result<(), StoreError> {
        self.flush().await?;
        tokio::fs::rename(&self.path, path).await?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub(crate) enum Hold {
    Pin(PinGuard),
    Spool(Arc<Spool>),
}

/// Keeps a served blob's backing resources alive for as long as its bytes are
/// still being streamed: either an eviction pin on a store entry or a shared
/// reference to a serve-and-discard spool.
pub struct BlobHold(#[allow(dead_code)] pub(crate) Hold);

/// An open artifact ready for streaming.
pub struct Blob {
    size: u64,
    file: File,
    hold: BlobHold,
}

impl Blob {
    pub(crate) fn new_pinned(size: u64, file: File, guard: PinGuard) -> Self {
        Self {
            size,
            file,
            hold: BlobHold(Hold::Pin(guard)),
        }
    }

    pub(crate) async fn from_spool(spool: Arc<Spool>) -> Result<Self, StoreError> {
        let file = spool.reopen().await?;
        Ok(Self {
            size: spool.len(),
            file,
            hold: BlobHold(Hold::Spool(spool)),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_parts(self) -> (u64, File, BlobHold) {
        (self.size, self.file, self.hold)
    }

    /// Chunked byte stream over the blob. The underlying hold travels with the
    /// stream, so the entry stays pinned (or the spool stays on disk) until
    /// the consumer is done.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let (_, file, hold) = self.into_parts();
        ReaderStream::new(file).map(move |chunk| {
            let _ = &hold;
            chunk
        })
    }

    /// Buffers the whole blob. Convenience for small values and tests; the
    /// serving paths use `into_stream`/`into_parts`.
    pub async fn read_to_bytes(self) -> Result<Vec<u8>, StoreError> {
        let (size, mut file, _hold) = self.into_parts();
        let mut buf = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
