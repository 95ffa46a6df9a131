//! Resumable data-bin scans
//!
//! The scan protocol replaces "give me the next most/least recently used
//! bin" style primitives, which cannot be made safe under concurrent
//! mutation. Each cache handle owns a private cursor remembering the last
//! yielded key; the next call resumes from that key's strict successor in
//! the ordered bin map, so inserts and deletes between calls can neither
//! double-yield a bin nor skip one that survives.

use crate::key::BinKey;

/// Restart the scan from the first bin
pub const SCAN_START: u32 = 1 << 0;

/// Yield only bins exempt from trimming
pub const SCAN_PRESERVED_ONLY: u32 = 1 << 1;

/// Skip bins exempt from trimming
pub const SCAN_SKIP_PRESERVED: u32 = 1 << 2;

/// Stay on the previously yielded bin and continue copying its bytes
pub const SCAN_NO_ADVANCE: u32 = 1 << 3;

/// Yield only bins belonging to the codestream id passed to the scan call
pub const SCAN_FIX_CODESTREAM: u32 = 1 << 4;

/// Yield only bins of the class passed to the scan call
pub const SCAN_FIX_CLASS: u32 = 1 << 5;

/// Yield only bins with mark flags set
pub const SCAN_MARKED_ONLY: u32 = 1 << 6;

/// One yielded bin from [`DataBinCache::scan_databins`]
///
/// [`DataBinCache::scan_databins`]: crate::cache::DataBinCache::scan_databins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEntry {
    /// The bin's address
    pub key: BinKey,
    /// Readable (contiguous-from-zero) length
    pub prefix_len: u64,
    /// Whether the bin's entire nominal content is held
    pub is_complete: bool,
    /// DELETED / AUGMENTED / MARKED bits
    pub marks: u8,
    /// Whether the bin is exempt from trimming
    pub preserved: bool,
    /// Offset within the bin at which this call started copying
    pub buf_offset: u64,
    /// Bytes copied into the caller's buffer (0 when no buffer was passed)
    pub buf_len: usize,
}

/// Per-handle scan cursor
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    /// Last yielded key; `None` before the first yield or after a restart
    pub(crate) last: Option<BinKey>,
    /// Continuation offset into the last yielded bin's prefix
    pub(crate) read_pos: u64,
}

impl ScanState {
    pub(crate) fn restart(&mut self) {
        self.last = None;
        self.read_pos = 0;
    }
}
