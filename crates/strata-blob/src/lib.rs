//! # strata-blob
//!
//! Byte-range access to layer blobs for chunked (partial) extraction.
//!
//! A chunk-assembly layer asks a [`BlobSource`] for a list of
//! [`ImageSourceChunk`]s and receives one bounded reader per chunk, in request
//! order, over a rendezvous channel:
//!
//! ```text
//! get_blob_at([c0, c1, c2])
//!     producer thread ──(bounded(0))──> c0 view, c1 view, c2 view, <closed>
//!                     ──(bounded(0))──> <closed>   (error signal)
//! ```
//!
//! The producer blocks until each view has been taken, so a slow consumer
//! throttles it. Dropping the receiver makes the next send fail and ends the
//! producer thread.

mod section;

pub use section::SectionReader;

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use strata_config::log_blob_debug;
use thiserror::Error;

/// Errors that can occur while serving blob ranges
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to start blob producer: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// One contiguous byte range of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSourceChunk {
    pub offset: u64,
    pub length: u64,
}

impl ImageSourceChunk {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, `None` if it would overflow
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Positioned reads that do not move any shared cursor.
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`; `Ok(0)` means EOF.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

/// A chunk view handed to the consumer
pub type ChunkStream = Box<dyn Read + Send>;

/// Receiving ends returned by [`BlobSource::get_blob_at`]
pub type BlobStreams = (Receiver<ChunkStream>, Receiver<BlobError>);

/// A blob that can serve arbitrary byte ranges.
///
/// Network-backed implementations may fail before delivering every range and
/// report that on the error channel; the local implementation never does.
pub trait BlobSource: Send + Sync {
    fn get_blob_at(&self, chunks: &[ImageSourceChunk]) -> Result<BlobStreams>;

    /// Name of this source (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// A local random-access blob, e.g. a layer file already on disk.
///
/// The underlying source is released once the `SeekableFile` and every view
/// handed out by it are dropped.
pub struct SeekableFile<R: ReadAt + ?Sized + 'static> {
    reader: Arc<R>,
}

impl<R: ReadAt + 'static> SeekableFile<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Arc::new(reader),
        }
    }
}

impl<R: ReadAt + ?Sized + 'static> SeekableFile<R> {
    pub fn from_arc(reader: Arc<R>) -> Self {
        Self { reader }
    }

    /// Shared handle to the underlying source
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

impl<R: ReadAt + ?Sized + 'static> BlobSource for SeekableFile<R> {
    fn get_blob_at(&self, chunks: &[ImageSourceChunk]) -> Result<BlobStreams> {
        let (streams_tx, streams_rx) = bounded::<ChunkStream>(0);
        let (errs_tx, errs_rx) = bounded::<BlobError>(0);

        let reader = Arc::clone(&self.reader);
        let chunks = chunks.to_vec();

        thread::Builder::new()
            .name("strata-blob-at".to_string())
            .spawn(move || {
                let total = chunks.len();
                for (index, chunk) in chunks.into_iter().enumerate() {
                    let view = SectionReader::new(Arc::clone(&reader), chunk.offset, chunk.length);
                    if streams_tx.send(Box::new(view)).is_err() {
                        log_blob_debug!(
                            "Consumer dropped chunk stream",
                            delivered = index,
                            requested = total
                        );
                        break;
                    }
                }
                drop(streams_tx);
                drop(errs_tx);
            })
            .map_err(BlobError::Spawn)?;

        Ok((streams_rx, errs_rx))
    }

    fn name(&self) -> &'static str {
        "seekable-file"
    }
}
