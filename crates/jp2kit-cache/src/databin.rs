//! Per-bin sparse byte storage
//!
//! A data-bin's nominal content never changes; byte ranges simply become
//! known, in any order, possibly more than once. Storage is a set of
//! disjoint, maximally-merged segments keyed by start offset. Consumers
//! only ever see the contiguous prefix starting at offset 0 — holes past
//! that prefix are invisible until filled.

use bytes::BytesMut;
use std::collections::BTreeMap;

/// Mark flag: bin contents were discarded after being held
pub const BIN_DELETED: u8 = 1;

/// Mark flag: bin gained content since the flags were last cleared
pub const BIN_AUGMENTED: u8 = 2;

/// Mark flag: one of the other mark conditions has fired
pub const BIN_MARKED: u8 = 4;

/// Storage and bookkeeping for one data-bin
#[derive(Debug, Default)]
pub(crate) struct DataBin {
    /// Disjoint segments, merged whenever ranges touch
    segments: BTreeMap<u64, BytesMut>,
    /// Total nominal length, known once a final range has been added
    pub(crate) total_len: Option<u64>,
    /// DELETED / AUGMENTED / MARKED bits
    pub(crate) marks: u8,
    /// Exempt from memory-pressure trimming
    pub(crate) preserved: bool,
    /// Active read scopes pinning this bin against eviction
    pub(crate) lock_count: u32,
    /// LRU tick of the last touch
    pub(crate) last_touch: u64,
}

/// Outcome of merging one byte range into a bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AddOutcome {
    /// Bytes that were not previously held
    pub added: usize,
    /// The bin's total length became known or the bin became complete
    pub advanced: bool,
}

impl DataBin {
    /// Length of the contiguous prefix starting at offset 0
    pub(crate) fn prefix_len(&self) -> u64 {
        self.segments
            .get(&0)
            .map_or(0, |seg| seg.len() as u64)
    }

    /// Whether the entire nominal content is held
    pub(crate) fn is_complete(&self) -> bool {
        self.total_len
            .is_some_and(|total| self.prefix_len() == total)
    }

    /// Bytes of storage the bin currently occupies
    pub(crate) fn bytes_held(&self) -> usize {
        self.segments.values().map(BytesMut::len).sum()
    }

    /// Whether this entry is a deletion tombstone (marks only, no storage)
    pub(crate) fn is_tombstone(&self) -> bool {
        self.segments.is_empty() && self.marks & BIN_DELETED != 0
    }

    /// Whether the entry carries nothing worth keeping
    pub(crate) fn is_trivial(&self) -> bool {
        self.segments.is_empty()
            && self.total_len.is_none()
            && self.marks == 0
            && !self.preserved
            && self.lock_count == 0
    }

    /// Merge `data` at absolute `offset` into the segment set
    ///
    /// Bytes already held for an offset are kept as-is; only uncovered gaps
    /// are filled from `data`. A bin's true content never changes, so a
    /// resend of an identical range is a no-op apart from the bookkeeping
    /// in the returned [`AddOutcome`].
    pub(crate) fn add_range(&mut self, offset: u64, data: &[u8], is_final: bool) -> AddOutcome {
        let was_complete = self.is_complete();
        let had_total = self.total_len.is_some();

        if is_final {
            let end = offset + data.len() as u64;
            debug_assert!(
                self.total_len.is_none_or(|t| t == end),
                "conflicting final length for data-bin"
            );
            if self.total_len.is_none() {
                self.total_len = Some(end);
            }
        }

        let added = if data.is_empty() {
            0
        } else {
            self.merge_segment(offset, data)
        };

        let advanced = (self.total_len.is_some() && !had_total)
            || (self.is_complete() && !was_complete);
        AddOutcome { added, advanced }
    }

    /// Copy bytes from the readable prefix at `offset` into `buf`
    ///
    /// Returns the number of bytes copied, which is short exactly when the
    /// prefix ends before `offset + buf.len()`.
    pub(crate) fn read_prefix(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Some(seg) = self.segments.get(&0) else {
            return 0;
        };
        if offset >= seg.len() as u64 {
            return 0;
        }
        let start = offset as usize;
        let n = buf.len().min(seg.len() - start);
        buf[..n].copy_from_slice(&seg[start..start + n]);
        n
    }

    /// Drop all stored bytes, keeping marks/preserve bookkeeping intact
    pub(crate) fn clear_storage(&mut self) -> usize {
        let released = self.bytes_held();
        self.segments.clear();
        self.total_len = None;
        released
    }

    fn merge_segment(&mut self, offset: u64, data: &[u8]) -> usize {
        let new_end = offset + data.len() as u64;

        // Collect every existing segment that overlaps or touches the
        // incoming range. Candidates start at or before new_end; the first
        // one strictly before `offset` only matters if it reaches it.
        let mut absorb = Vec::new();
        for (&start, seg) in self.segments.range(..=new_end) {
            let end = start + seg.len() as u64;
            if end >= offset {
                absorb.push(start);
            }
        }

        if absorb.is_empty() {
            let mut seg = BytesMut::with_capacity(data.len());
            seg.extend_from_slice(data);
            self.segments.insert(offset, seg);
            return data.len();
        }

        let mut merged_start = offset;
        let mut merged_end = new_end;
        let mut previously_held = 0usize;
        for &start in &absorb {
            let seg = &self.segments[&start];
            previously_held += seg.len();
            merged_start = merged_start.min(start);
            merged_end = merged_end.max(start + seg.len() as u64);
        }

        let merged_len = (merged_end - merged_start) as usize;
        let mut merged = BytesMut::with_capacity(merged_len);
        merged.resize(merged_len, 0);

        // Incoming bytes first, then existing segments on top so that bytes
        // already held win over any resend.
        let dst = (offset - merged_start) as usize;
        merged[dst..dst + data.len()].copy_from_slice(data);
        for &start in &absorb {
            if let Some(seg) = self.segments.remove(&start) {
                let dst = (start - merged_start) as usize;
                merged[dst..dst + seg.len()].copy_from_slice(&seg);
            }
        }

        self.segments.insert(merged_start, merged);
        merged_len - previously_held
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_only_counts_from_zero() {
        let mut bin = DataBin::default();
        bin.add_range(10, b"world", false);
        assert_eq!(bin.prefix_len(), 0);
        assert_eq!(bin.bytes_held(), 5);

        bin.add_range(0, b"hello", false);
        assert_eq!(bin.prefix_len(), 5);

        // Filling the hole joins everything into one prefix
        bin.add_range(5, b"-----", false);
        assert_eq!(bin.prefix_len(), 15);
        assert_eq!(bin.bytes_held(), 15);
    }

    #[test]
    fn test_resend_is_idempotent() {
        let mut bin = DataBin::default();
        let first = bin.add_range(0, b"abcdef", false);
        assert_eq!(first.added, 6);

        let again = bin.add_range(0, b"abcdef", false);
        assert_eq!(again.added, 0);
        assert!(!again.advanced);
        assert_eq!(bin.bytes_held(), 6);
    }

    #[test]
    fn test_overlap_does_not_corrupt_held_bytes() {
        let mut bin = DataBin::default();
        bin.add_range(0, b"abcd", false);
        // Resend of [2,6) with identical content for the overlap
        bin.add_range(2, b"cdef", false);

        let mut buf = [0u8; 6];
        assert_eq!(bin.read_prefix(0, &mut buf), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn test_final_range_closes_length() {
        let mut bin = DataBin::default();
        let out = bin.add_range(4, b"tail", true);
        assert!(out.advanced);
        assert_eq!(bin.total_len, Some(8));
        assert!(!bin.is_complete());

        let out = bin.add_range(0, b"head", false);
        assert!(out.advanced);
        assert!(bin.is_complete());
    }

    #[test]
    fn test_empty_final_bin_is_complete_without_storage() {
        let mut bin = DataBin::default();
        let out = bin.add_range(0, b"", true);
        assert!(out.advanced);
        assert!(bin.is_complete());
        assert_eq!(bin.bytes_held(), 0);
    }

    #[test]
    fn test_read_prefix_stops_at_hole() {
        let mut bin = DataBin::default();
        bin.add_range(0, b"abc", false);
        bin.add_range(6, b"xyz", false);

        let mut buf = [0u8; 9];
        assert_eq!(bin.read_prefix(0, &mut buf), 3);
        assert_eq!(bin.read_prefix(2, &mut buf), 1);
        assert_eq!(bin.read_prefix(3, &mut buf), 0);
    }
}
