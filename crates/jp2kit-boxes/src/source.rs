//! Byte source and target abstractions
//!
//! A family source reads through a [`ByteSource`]; a family target writes
//! through a [`ByteTarget`]. Capabilities advertise what the underlying
//! device can do so higher layers can degrade gracefully (e.g.
//! `load_in_memory` declining on a purely sequential device, deferred
//! headers refusing a target that cannot rewrite).
//!
//! Read-side failures are I/O errors; write-side refusals (disk full,
//! broken pipe) are `false` returns because the caller can abort cleanly
//! and there is nothing structural to report.

use crate::error::Result;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Capability: bytes can be consumed front to back
pub const CAP_SEQUENTIAL: u32 = 1 << 0;

/// Capability: arbitrary repositioning is supported
pub const CAP_SEEKABLE: u32 = 1 << 1;

/// Capability: backed by a dynamically growing cache
pub const CAP_CACHED: u32 = 1 << 2;

/// Capability: the full content is resident in memory
pub const CAP_IN_MEMORY: u32 = 1 << 3;

/// A readable byte origin with an absolute position
pub trait ByteSource: Send {
    /// Capability mask (`CAP_*` constants)
    fn capabilities(&self) -> u32;

    /// Read at the current position, advancing it
    ///
    /// A short count means end of currently-available data, never an
    /// error; device failures are `Err`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move to an absolute position
    ///
    /// Sequential-only sources accept forward seeks (by discarding) and
    /// reject backward ones.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Current absolute position
    fn position(&self) -> u64;

    /// Total length, when the device knows it
    fn len(&self) -> Option<u64> {
        None
    }

    /// Whether no bytes are available at all
    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// A writable byte sink with optional in-place rewrites
///
/// All methods report refusal (`false`) rather than erroring: a full disk
/// or closed pipe is an expected outcome the caller handles by aborting
/// its output, not an exceptional state.
pub trait ByteTarget: Send {
    /// Append bytes at the current write position
    fn write(&mut self, buf: &[u8]) -> bool;

    /// Bytes written so far (the append position)
    fn position(&self) -> u64;

    /// Whether `start_rewrite` can work at all
    fn supports_rewrite(&self) -> bool;

    /// Begin overwriting previously written bytes at `pos`
    ///
    /// Fails when rewinding is unsupported or `pos` lies beyond the bytes
    /// written so far. While a rewrite is active, `write` overwrites
    /// instead of appending.
    fn start_rewrite(&mut self, pos: u64) -> bool;

    /// Finish a rewrite and return to the append position
    fn end_rewrite(&mut self) -> bool;
}

/// Buffered file source
///
/// With `allow_seeks = false` the file is treated as a one-way stream:
/// forward seeks discard, backward seeks fail. This models consuming a
/// non-seekable device through the same interface.
pub struct FileSource {
    inner: BufReader<File>,
    pos: u64,
    len: u64,
    allow_seeks: bool,
}

impl FileSource {
    /// Open a file for box parsing
    pub fn open(path: impl AsRef<Path>, allow_seeks: bool) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: BufReader::new(file),
            pos: 0,
            len,
            allow_seeks,
        })
    }
}

impl ByteSource for FileSource {
    fn capabilities(&self) -> u32 {
        if self.allow_seeks {
            CAP_SEQUENTIAL | CAP_SEEKABLE
        } else {
            CAP_SEQUENTIAL
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.inner.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.pos += total as u64;
        Ok(total)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos == self.pos {
            return Ok(());
        }
        if self.allow_seeks {
            self.inner.seek(SeekFrom::Start(pos))?;
            self.pos = pos;
            return Ok(());
        }
        if pos < self.pos {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "backward seek on a sequential-only source",
            )
            .into());
        }
        // Forward-only: discard the gap.
        let mut remaining = pos - self.pos;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let n = remaining.min(scratch.len() as u64) as usize;
            let got = self.read(&mut scratch[..n])?;
            if got == 0 {
                break;
            }
            remaining -= got as u64;
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// In-memory byte source
pub struct MemorySource {
    data: Vec<u8>,
    pos: u64,
}

impl MemorySource {
    /// Wrap a fully-resident byte buffer
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteSource for MemorySource {
    fn capabilities(&self) -> u32 {
        CAP_SEQUENTIAL | CAP_SEEKABLE | CAP_IN_MEMORY
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// File target with seek-based rewrites
pub struct FileTarget {
    file: File,
    end: u64,
    rewrite: Option<u64>,
}

impl FileTarget {
    /// Create (truncating) a file for box writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            end: 0,
            rewrite: None,
        })
    }
}

impl ByteTarget for FileTarget {
    fn write(&mut self, buf: &[u8]) -> bool {
        // Rewrites may run up to, but never past, the append end.
        if let Some(pos) = self.rewrite {
            if pos + buf.len() as u64 > self.end {
                return false;
            }
        }
        if self.file.write_all(buf).is_err() {
            return false;
        }
        match self.rewrite.as_mut() {
            Some(pos) => *pos += buf.len() as u64,
            None => self.end += buf.len() as u64,
        }
        true
    }

    fn position(&self) -> u64 {
        self.end
    }

    fn supports_rewrite(&self) -> bool {
        true
    }

    fn start_rewrite(&mut self, pos: u64) -> bool {
        if self.rewrite.is_some() || pos > self.end {
            return false;
        }
        if self.file.seek(SeekFrom::Start(pos)).is_err() {
            return false;
        }
        self.rewrite = Some(pos);
        true
    }

    fn end_rewrite(&mut self) -> bool {
        if self.rewrite.take().is_none() {
            return false;
        }
        self.file.seek(SeekFrom::Start(self.end)).is_ok()
    }
}

/// Growable in-memory target
#[derive(Default)]
pub struct MemoryTarget {
    data: Vec<u8>,
    rewrite: Option<u64>,
}

impl MemoryTarget {
    /// Empty target
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the target, yielding everything written
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes written so far
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteTarget for MemoryTarget {
    fn write(&mut self, buf: &[u8]) -> bool {
        match self.rewrite.as_mut() {
            Some(pos) => {
                let start = *pos as usize;
                if start + buf.len() > self.data.len() {
                    return false;
                }
                self.data[start..start + buf.len()].copy_from_slice(buf);
                *pos += buf.len() as u64;
            }
            None => self.data.extend_from_slice(buf),
        }
        true
    }

    fn position(&self) -> u64 {
        self.data.len() as u64
    }

    fn supports_rewrite(&self) -> bool {
        true
    }

    fn start_rewrite(&mut self, pos: u64) -> bool {
        if self.rewrite.is_some() || pos > self.data.len() as u64 {
            return false;
        }
        self.rewrite = Some(pos);
        true
    }

    fn end_rewrite(&mut self) -> bool {
        self.rewrite.take().is_some()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads_and_seeks() {
        let mut src = MemorySource::new(b"abcdef".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        src.seek(1).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"bcde");

        // Reading past the end is a short count, not an error.
        src.seek(5).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn test_memory_target_rewrite_bounds() {
        let mut tgt = MemoryTarget::new();
        assert!(tgt.write(b"0123456789"));

        assert!(tgt.start_rewrite(4));
        assert!(tgt.write(b"xx"));
        assert!(!tgt.write(b"way-too-long"));
        assert!(tgt.end_rewrite());

        assert_eq!(&tgt.bytes()[..6], b"0123xx");
        assert!(!tgt.start_rewrite(99));
    }

    #[test]
    fn test_sequential_file_source_rejects_backward_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut src = FileSource::open(&path, false).unwrap();
        assert_eq!(src.capabilities() & CAP_SEEKABLE, 0);

        src.seek(4).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"45");
        assert!(src.seek(0).is_err());
    }
}
