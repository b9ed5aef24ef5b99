//! Chunked reads of large, randomly addressable byte objects.
//!
//! DESIGN
//! ======
//! A `StreamableObject` exposes a total size and a range-read. The reader
//! walks it with a plain loop carrying `offset`:
//!
//! ```text
//! offset = 0
//! while offset < total:
//!     chunk = read(offset, min(chunk_size, total - offset))
//!     deliver(chunk)
//!     offset += chunk.len()
//! ```
//!
//! The offset advances by the bytes actually returned, not the bytes asked
//! for, so a source may legally answer short. A source that answers with
//! zero bytes before the end would loop forever; that case fails with
//! `ChunkError::ShortRead` instead.
//!
//! Reads are strictly sequential: no read-ahead, so memory stays bounded by
//! one chunk (plus the accumulator for `read_all`). Dropping the future
//! abandons the walk between chunks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("short read: source returned no bytes at offset {offset} of {total}")]
    ShortRead { offset: u64, total: u64 },
    #[error("source returned {returned} bytes for a {requested}-byte read at offset {offset}")]
    Overread { offset: u64, requested: u64, returned: u64 },
    #[error("range read failed at offset {offset}: {message}")]
    Source { offset: u64, message: String },
    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}

// =============================================================================
// STREAMABLE OBJECT
// =============================================================================

/// A large byte object readable by range.
#[async_trait]
pub trait StreamableObject: Send + Sync {
    /// Total size in bytes. Fixed for the lifetime of the object.
    fn size(&self) -> u64;

    /// Read at most `len` bytes starting at `offset`.
    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, ChunkError>;
}

type ReadFn = dyn Fn(u64, u64) -> Result<Vec<u8>, ChunkError> + Send + Sync;

/// A `StreamableObject` backed by a range-read closure.
///
/// Requests are clamped to the remaining size before the closure runs, so
/// the closure never sees a range past the end.
#[derive(Clone)]
pub struct StreamableBuffer {
    total: u64,
    read_fn: Arc<ReadFn>,
}

impl StreamableBuffer {
    pub fn from_fn<F>(total: u64, read_fn: F) -> Self
    where
        F: Fn(u64, u64) -> Result<Vec<u8>, ChunkError> + Send + Sync + 'static,
    {
        Self { total, read_fn: Arc::new(read_fn) }
    }

    /// Expose an owned buffer without copying it wholesale per read.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let data = Arc::new(data);
        let total = data.len() as u64;
        Self::from_fn(total, move |offset, len| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            let end = start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX)).min(data.len());
            Ok(data[start..end].to_vec())
        })
    }
}

impl std::fmt::Debug for StreamableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableBuffer").field("total", &self.total).finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamableObject for StreamableBuffer {
    fn size(&self) -> u64 {
        self.total
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, ChunkError> {
        let to_read = len.min(self.total.saturating_sub(offset));
        (self.read_fn)(offset, to_read)
    }
}

// =============================================================================
// READER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedReader {
    chunk_size: u64,
}

impl Default for ChunkedReader {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

impl ChunkedReader {
    pub fn new(chunk_size: u64) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Read the whole object into one buffer.
    pub async fn read_all(&self, object: &dyn StreamableObject) -> Result<Vec<u8>, ChunkError> {
        // The declared size is untrusted; grow as chunks actually arrive.
        let mut out = Vec::with_capacity(usize::try_from(object.size().min(self.chunk_size)).unwrap_or(0));
        self.read_chunks(object, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await?;
        Ok(out)
    }

    /// Copy the whole object into an async sink. Returns bytes written.
    pub async fn copy_to<W>(&self, object: &dyn StreamableObject, sink: &mut W) -> Result<u64, ChunkError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let total = object.size();
        let mut offset = 0_u64;
        while offset < total {
            let chunk = self.next_chunk(object, offset, total).await?;
            sink.write_all(&chunk).await?;
            offset += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(offset)
    }

    /// Walk the object, handing each chunk to `on_chunk` in order.
    ///
    /// Returns the number of bytes delivered, which equals `object.size()` on
    /// success. An error from `on_chunk` stops the walk.
    pub async fn read_chunks<F>(&self, object: &dyn StreamableObject, mut on_chunk: F) -> Result<u64, ChunkError>
    where
        F: FnMut(&[u8]) -> Result<(), ChunkError> + Send,
    {
        let total = object.size();
        let mut offset = 0_u64;
        while offset < total {
            let chunk = self.next_chunk(object, offset, total).await?;
            on_chunk(&chunk)?;
            offset += chunk.len() as u64;
        }
        Ok(offset)
    }

    async fn next_chunk(&self, object: &dyn StreamableObject, offset: u64, total: u64) -> Result<Vec<u8>, ChunkError> {
        let requested = self.chunk_size.min(total - offset);
        let chunk = object.read(offset, requested).await?;
        let returned = chunk.len() as u64;

        if returned == 0 {
            return Err(ChunkError::ShortRead { offset, total });
        }
        if returned > requested {
            return Err(ChunkError::Overread { offset, requested, returned });
        }
        if returned < requested {
            debug!(offset, requested, returned, "chunked: source answered short");
        }
        Ok(chunk)
    }
}

#[cfg(test)]
#[path = "chunked_test.rs"]
mod tests;
