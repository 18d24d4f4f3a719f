//! Length-bounded views over a shared random-access source.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::ReadAt;

/// A window `[base, base + length)` over a shared [`ReadAt`] source.
///
/// Every view keeps its own cursor, so several views over the same source can
/// be read independently and from different threads. A window reaching past
/// the end of the source simply hits EOF early.
pub struct SectionReader<R: ReadAt + ?Sized> {
    source: Arc<R>,
    base: u64,
    pos: u64,
    limit: u64,
}

impl<R: ReadAt + ?Sized> SectionReader<R> {
    pub fn new(source: Arc<R>, offset: u64, length: u64) -> Self {
        Self {
            source,
            base: offset,
            pos: offset,
            limit: offset.saturating_add(length),
        }
    }

    /// Declared length of the window
    pub fn len(&self) -> u64 {
        self.limit - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.limit == self.base
    }

    /// Bytes left before the window end
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }
}

impl<R: ReadAt + ?Sized> Read for SectionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.source.read_at(&mut buf[..max], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: ReadAt + ?Sized> Seek for SectionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(off) => self.base.checked_add(off),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.limit.checked_add_signed(delta),
        };
        match target {
            Some(abs) if abs >= self.base => {
                self.pos = abs;
                Ok(abs - self.base)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

impl<R: ReadAt + ?Sized> ReadAt for SectionReader<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = self.len();
        if offset >= len {
            return Ok(0);
        }
        let max = buf
            .len()
            .min(usize::try_from(len - offset).unwrap_or(usize::MAX));
        self.source.read_at(&mut buf[..max], self.base + offset)
    }
}
