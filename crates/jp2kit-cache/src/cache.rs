//! The data-bin cache
//!
//! One [`DataBinCache`] owns all byte storage for a streamed JP2-family
//! source. Mutation (`add_to_databin`, `delete_databin`, `mark_databin`,
//! `scan_databins`) is serialized behind a single mutex and safe to call
//! from any thread. The `(set_read_scope, read)` pair is handle-local
//! state: one thread per handle, with additional readers created cheaply
//! through [`DataBinCache::attach`], which shares storage but not cursors.
//!
//! A single lock over the whole bin map is deliberate: `mark_databin` must
//! return flags, readable length and completeness sampled at one instant,
//! which per-bin locking cannot provide once trimming is in the picture.

use crate::databin::{AddOutcome, BIN_AUGMENTED, BIN_DELETED, BIN_MARKED, DataBin};
use crate::key::{BinKey, DataBinClass};
use crate::scan::{
    SCAN_FIX_CLASS, SCAN_FIX_CODESTREAM, SCAN_MARKED_ONLY, SCAN_NO_ADVANCE, SCAN_PRESERVED_ONLY,
    SCAN_SKIP_PRESERVED, SCAN_START, ScanEntry, ScanState,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use tracing::{debug, trace};

/// Consistent sample of one bin's externally-visible state
///
/// All three fields reflect the same instant, even while other threads are
/// mutating the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkSnapshot {
    /// DELETED / AUGMENTED / MARKED bits
    pub marks: u8,
    /// Readable (contiguous-from-zero) length at the sampled instant
    pub prefix_len: u64,
    /// Whether the bin held its entire nominal content
    pub is_complete: bool,
}

/// Counters sampled by [`DataBinCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bin entries currently tracked (including tombstones)
    pub bin_count: usize,
    /// Bytes of content currently stored
    pub bytes_held: usize,
    /// High-water mark of `bytes_held`
    pub peak_bytes: usize,
    /// Bins whose storage was released by trimming
    pub evicted_bins: u64,
    /// Cumulative new bytes accepted by `add_to_databin`
    pub transferred_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct ReadScope {
    key: BinKey,
    pos: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    bins: BTreeMap<BinKey, DataBin>,
    total_bytes: usize,
    preferred_limit: Option<usize>,
    touch_counter: u64,
    preserved_classes: HashSet<(DataBinClass, Option<u64>)>,
    peak_bytes: usize,
    evicted_bins: u64,
    transferred_bytes: u64,
    closed: bool,
}

impl CacheState {
    fn touch(&mut self) -> u64 {
        self.touch_counter += 1;
        self.touch_counter
    }

    fn is_preserved(&self, key: &BinKey, bin: &DataBin) -> bool {
        bin.preserved
            || self
                .preserved_classes
                .contains(&(key.class, Some(key.codestream_id)))
            || self.preserved_classes.contains(&(key.class, None))
    }

    /// Drop the entry if nothing observable remains
    fn prune(&mut self, key: BinKey) {
        if self.bins.get(&key).is_some_and(DataBin::is_trivial) {
            self.bins.remove(&key);
        }
    }

    /// Release storage of least-recently-touched bins until the preferred
    /// limit is respected or nothing more can legally be evicted.
    fn trim(&mut self) {
        let Some(limit) = self.preferred_limit else {
            return;
        };
        while self.total_bytes > limit {
            let victim = self
                .bins
                .iter()
                .filter(|(key, bin)| {
                    bin.bytes_held() > 0 && bin.lock_count == 0 && !self.is_preserved(key, bin)
                })
                .min_by_key(|(_, bin)| bin.last_touch)
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                break;
            };
            if let Some(bin) = self.bins.get_mut(&key) {
                let had_bytes = bin.bytes_held() > 0;
                let released = bin.clear_storage();
                self.total_bytes -= released;
                self.evicted_bins += 1;
                if had_bytes {
                    bin.marks = BIN_DELETED | BIN_MARKED;
                }
                trace!(
                    class = key.class.id(),
                    codestream = key.codestream_id,
                    bin = key.bin_id,
                    released,
                    "evicted data-bin under memory pressure"
                );
            }
            self.prune(key);
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<CacheState>,
}

/// Sparse, dynamically-growing, thread-safe store of data-bins
///
/// See the [module docs](self) for the concurrency contract.
#[derive(Debug)]
pub struct DataBinCache {
    shared: Arc<Shared>,
    attached: bool,
    scope: Mutex<Option<ReadScope>>,
    scan: Mutex<ScanState>,
}

impl Default for DataBinCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBinCache {
    /// Create an empty primary cache
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::default()),
            }),
            attached: false,
            scope: Mutex::new(None),
            scan: Mutex::new(ScanState::default()),
        }
    }

    /// Create a secondary handle sharing this cache's storage
    ///
    /// The new handle proxies all queries and reads to the same bin store
    /// but owns its read scope and scan cursor, so one thread can read
    /// while another mutates. Mark-clearing through an attached handle is
    /// a no-op; the flags belong to whichever consumer drives the primary.
    pub fn attach(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            attached: true,
            scope: Mutex::new(None),
            scan: Mutex::new(ScanState::default()),
        }
    }

    /// Whether this handle was produced by [`DataBinCache::attach`]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Merge one byte range into a bin
    ///
    /// Ranges may arrive in any order and may resend bytes already held;
    /// a bin's nominal content never changes, so overlaps are reconciled
    /// in favour of the bytes already stored. `is_final` declares that
    /// `offset + data.len()` is the bin's total length.
    ///
    /// Returns `true` iff the call contributed something new: bytes not
    /// previously held, a newly-known total length, or completeness.
    #[allow(clippy::too_many_arguments)]
    pub fn add_to_databin(
        &self,
        class: DataBinClass,
        codestream_id: u64,
        bin_id: u64,
        offset: u64,
        data: &[u8],
        is_final: bool,
        mark_if_augmented: bool,
    ) -> bool {
        let key = BinKey::new(class, codestream_id, bin_id);
        let mut state = self.shared.state.lock();
        if state.closed {
            return false;
        }
        let tick = state.touch();
        let bin = state.bins.entry(key).or_default();
        bin.last_touch = tick;

        let AddOutcome { added, advanced } = bin.add_range(offset, data, is_final);
        if mark_if_augmented && added > 0 && bin.marks == 0 {
            bin.marks = BIN_MARKED | BIN_AUGMENTED;
        }

        state.total_bytes += added;
        state.transferred_bytes += added as u64;
        state.peak_bytes = state.peak_bytes.max(state.total_bytes);
        state.trim();
        state.prune(key);

        added > 0 || advanced
    }

    /// Remove a bin's storage
    ///
    /// With `mark_if_nonempty`, a bin that actually held bytes leaves a
    /// DELETED+MARKED tombstone behind so the divergence from a remote
    /// peer's cache model can be reported later; bins with nothing worth
    /// signalling (including empty-but-complete bins) simply vanish.
    ///
    /// Returns `true` iff the bin existed.
    pub fn delete_databin(
        &self,
        class: DataBinClass,
        codestream_id: u64,
        bin_id: u64,
        mark_if_nonempty: bool,
    ) -> bool {
        let key = BinKey::new(class, codestream_id, bin_id);
        let mut state = self.shared.state.lock();
        let Some(bin) = state.bins.get_mut(&key) else {
            return false;
        };
        let had_bytes = bin.bytes_held() > 0;
        let released = bin.clear_storage();
        if mark_if_nonempty && had_bytes {
            bin.marks = BIN_DELETED | BIN_MARKED;
        } else {
            bin.marks = 0;
        }
        state.total_bytes -= released;
        state.prune(key);
        true
    }

    /// Sample (and optionally clear) a bin's mark state
    ///
    /// The returned snapshot is consistent: flags, readable length and
    /// completeness all reflect the same instant. With `clear`, the mark
    /// flags are reset in the same critical section, so a flag can be
    /// observed by exactly one clearing call. Clearing through an attached
    /// handle is ignored.
    pub fn mark_databin(
        &self,
        class: DataBinClass,
        codestream_id: u64,
        bin_id: u64,
        clear: bool,
    ) -> MarkSnapshot {
        let key = BinKey::new(class, codestream_id, bin_id);
        let mut state = self.shared.state.lock();
        let Some(bin) = state.bins.get_mut(&key) else {
            return MarkSnapshot::default();
        };
        let snapshot = MarkSnapshot {
            marks: bin.marks,
            prefix_len: bin.prefix_len(),
            is_complete: bin.is_complete(),
        };
        if clear && !self.attached {
            bin.marks = 0;
            state.prune(key);
        }
        snapshot
    }

    /// Readable (contiguous-from-zero) length of a bin
    pub fn databin_length(&self, class: DataBinClass, codestream_id: u64, bin_id: u64) -> u64 {
        let key = BinKey::new(class, codestream_id, bin_id);
        let state = self.shared.state.lock();
        state.bins.get(&key).map_or(0, DataBin::prefix_len)
    }

    /// Whether a bin's entire nominal content is held
    pub fn databin_is_complete(
        &self,
        class: DataBinClass,
        codestream_id: u64,
        bin_id: u64,
    ) -> bool {
        let key = BinKey::new(class, codestream_id, bin_id);
        let state = self.shared.state.lock();
        state.bins.get(&key).is_some_and(DataBin::is_complete)
    }

    /// Focus this handle's read cursor on one bin
    ///
    /// The scoped bin is pinned against trimming until the scope moves.
    /// Returns the bin's readable length at the time of the call.
    pub fn set_read_scope(&self, class: DataBinClass, codestream_id: u64, bin_id: u64) -> u64 {
        let key = BinKey::new(class, codestream_id, bin_id);
        let mut scope = self.scope.lock();
        let mut state = self.shared.state.lock();

        if let Some(old) = scope.take() {
            if let Some(bin) = state.bins.get_mut(&old.key) {
                bin.lock_count = bin.lock_count.saturating_sub(1);
            }
            state.prune(old.key);
        }
        if state.closed {
            return 0;
        }

        let tick = state.touch();
        let bin = state.bins.entry(key).or_default();
        bin.lock_count += 1;
        bin.last_touch = tick;
        let len = bin.prefix_len();
        *scope = Some(ReadScope { key, pos: 0 });
        len
    }

    /// Read from the scoped bin's prefix at the cursor position
    ///
    /// A short count means the contiguous prefix ends before the request
    /// is satisfied — for a still-growing cache that is "try again later",
    /// disambiguated by completeness queries, never an error.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut scope = self.scope.lock();
        let Some(scope) = scope.as_mut() else {
            return 0;
        };
        let mut state = self.shared.state.lock();
        let tick = state.touch();
        let Some(bin) = state.bins.get_mut(&scope.key) else {
            return 0;
        };
        bin.last_touch = tick;
        let n = bin.read_prefix(scope.pos, buf);
        scope.pos += n as u64;
        n
    }

    /// Move the scoped read cursor to an absolute bin offset
    pub fn seek(&self, pos: u64) {
        if let Some(scope) = self.scope.lock().as_mut() {
            scope.pos = pos;
        }
    }

    /// Current scoped read position
    pub fn read_pos(&self) -> u64 {
        self.scope.lock().as_ref().map_or(0, |scope| scope.pos)
    }

    /// Exempt one bin from memory-pressure trimming
    pub fn preserve_databin(&self, class: DataBinClass, codestream_id: u64, bin_id: u64) {
        let key = BinKey::new(class, codestream_id, bin_id);
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.bins.entry(key).or_default().preserved = true;
    }

    /// Exempt a whole class from trimming
    ///
    /// With `codestream_id = None` the preservation applies to the class
    /// across every codestream, otherwise to the named codestream only.
    pub fn preserve_class(&self, class: DataBinClass, codestream_id: Option<u64>) {
        let codestream_id = if class == DataBinClass::Meta {
            codestream_id.map(|_| 0)
        } else {
            codestream_id
        };
        self.shared
            .state
            .lock()
            .preserved_classes
            .insert((class, codestream_id));
    }

    /// Set the preferred memory budget in bytes
    ///
    /// Future `add_to_databin` calls trim least-recently-touched,
    /// non-preserved, non-pinned bins whenever the budget is exceeded.
    /// Call [`DataBinCache::trim_to_preferred_limit`] to converge
    /// immediately.
    pub fn set_preferred_memory_limit(&self, limit: usize) {
        let mut state = self.shared.state.lock();
        debug!(limit, "preferred cache memory limit set");
        state.preferred_limit = Some(limit);
    }

    /// Trim immediately until the preferred limit is respected
    ///
    /// Storage stabilizes at the minimum achievable when everything left
    /// is preserved or pinned by a read scope.
    pub fn trim_to_preferred_limit(&self) {
        self.shared.state.lock().trim();
    }

    /// Resumable filtered walk over the bin set
    ///
    /// `flags` combines the `SCAN_*` constants; `class` and
    /// `codestream_id` are consulted only under [`SCAN_FIX_CLASS`] /
    /// [`SCAN_FIX_CODESTREAM`]. When `buf` is given, bytes from the
    /// yielded bin's prefix are copied into it; pass [`SCAN_NO_ADVANCE`]
    /// on the next call to keep draining the same bin after a truncated
    /// copy. Returns `None` once the walk is exhausted (new bins appended
    /// later are picked up by further calls without restarting).
    pub fn scan_databins(
        &self,
        flags: u32,
        class: DataBinClass,
        codestream_id: u64,
        buf: Option<&mut [u8]>,
    ) -> Option<ScanEntry> {
        let mut scan = self.scan.lock();
        let state = self.shared.state.lock();

        if flags & SCAN_START != 0 {
            scan.restart();
        }

        let accept = |key: &BinKey, bin: &DataBin| -> bool {
            if flags & SCAN_MARKED_ONLY != 0 && bin.marks == 0 {
                return false;
            }
            let preserved = state.is_preserved(key, bin);
            if flags & SCAN_PRESERVED_ONLY != 0 && !preserved {
                return false;
            }
            if flags & SCAN_SKIP_PRESERVED != 0 && preserved {
                return false;
            }
            if flags & SCAN_FIX_CLASS != 0 && key.class != class {
                return false;
            }
            if flags & SCAN_FIX_CODESTREAM != 0 && key.codestream_id != codestream_id {
                return false;
            }
            true
        };

        // Continue draining the previous bin if asked and it still exists.
        let hit = if flags & SCAN_NO_ADVANCE != 0 {
            scan.last
                .and_then(|key| state.bins.get(&key).map(|bin| (key, bin)))
                .filter(|(key, bin)| accept(key, bin))
        } else {
            None
        };
        let (key, bin, continuing) = match hit {
            Some((key, bin)) => (key, bin, true),
            None => {
                let range = match scan.last {
                    Some(last) => state.bins.range((Excluded(last), Unbounded)),
                    None => state.bins.range(..),
                };
                let (key, bin) = range.into_iter().find(|(key, bin)| accept(key, bin))?;
                (*key, bin, false)
            }
        };

        let buf_offset = if continuing { scan.read_pos } else { 0 };
        let buf_len = buf.map_or(0, |buf| bin.read_prefix(buf_offset, buf));

        let entry = ScanEntry {
            key,
            prefix_len: bin.prefix_len(),
            is_complete: bin.is_complete(),
            marks: bin.marks,
            preserved: state.is_preserved(&key, bin),
            buf_offset,
            buf_len,
        };
        scan.last = Some(key);
        scan.read_pos = buf_offset + buf_len as u64;
        Some(entry)
    }

    /// Sample the cache counters
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            bin_count: state.bins.len(),
            bytes_held: state.total_bytes,
            peak_bytes: state.peak_bytes,
            evicted_bins: state.evicted_bins,
            transferred_bytes: state.transferred_bytes,
        }
    }

    /// Bytes of content currently stored across all bins
    pub fn bytes_held(&self) -> usize {
        self.shared.state.lock().total_bytes
    }

    /// Discard everything and refuse further additions
    ///
    /// All handles attached to this cache observe the closure. Boxes
    /// parsing out of the cache see their bins vanish; completeness
    /// answers obtained while a close is racing are not trustworthy,
    /// which is what `close_without_checking` on the box side is for.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        debug!(
            bins = state.bins.len(),
            bytes = state.total_bytes,
            "closing data-bin cache"
        );
        state.bins.clear();
        state.total_bytes = 0;
        state.preserved_classes.clear();
        state.closed = true;
    }

    /// Whether [`DataBinCache::close`] has been called on any handle
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl Drop for DataBinCache {
    fn drop(&mut self) {
        // Release the read-scope pin so the bin becomes evictable again.
        let mut scope = self.scope.lock();
        if let Some(old) = scope.take() {
            let mut state = self.shared.state.lock();
            if let Some(bin) = state.bins.get_mut(&old.key) {
                bin.lock_count = bin.lock_count.saturating_sub(1);
            }
            state.prune(old.key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::databin::BIN_AUGMENTED;

    fn filled(cache: &DataBinCache, bin_id: u64, len: usize) {
        let data = vec![0xAB; len];
        cache.add_to_databin(DataBinClass::Meta, 0, bin_id, 0, &data, true, false);
    }

    #[test]
    fn test_mark_then_clear_reports_flags_exactly_once() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Meta, 0, 7, 0, b"payload", true, true);

        let first = cache.mark_databin(DataBinClass::Meta, 0, 7, true);
        assert_eq!(first.marks, BIN_MARKED | BIN_AUGMENTED);
        assert_eq!(first.prefix_len, 7);
        assert!(first.is_complete);

        let second = cache.mark_databin(DataBinClass::Meta, 0, 7, true);
        assert_eq!(second.marks, 0);

        // Deleting the now-unmarked, non-empty bin signals DELETED alone.
        assert!(cache.delete_databin(DataBinClass::Meta, 0, 7, true));
        let third = cache.mark_databin(DataBinClass::Meta, 0, 7, true);
        assert_eq!(third.marks, BIN_DELETED | BIN_MARKED);
        assert_eq!(third.prefix_len, 0);
    }

    #[test]
    fn test_unmarked_empty_delete_leaves_no_tombstone() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Meta, 0, 3, 0, b"", true, true);
        assert!(cache.databin_is_complete(DataBinClass::Meta, 0, 3));

        cache.delete_databin(DataBinClass::Meta, 0, 3, true);
        let snap = cache.mark_databin(DataBinClass::Meta, 0, 3, false);
        assert_eq!(snap.marks, 0);
        assert_eq!(cache.stats().bin_count, 0);
    }

    #[test]
    fn test_trim_converges_under_limit() {
        let cache = DataBinCache::new();
        for id in 0..10 {
            filled(&cache, id, 100);
        }
        assert_eq!(cache.bytes_held(), 1000);

        cache.set_preferred_memory_limit(350);
        cache.trim_to_preferred_limit();
        assert!(cache.bytes_held() <= 350);
    }

    #[test]
    fn test_trim_spares_preserved_and_pinned_bins() {
        let cache = DataBinCache::new();
        for id in 0..4 {
            filled(&cache, id, 100);
        }
        cache.preserve_databin(DataBinClass::Meta, 0, 0);
        cache.preserve_databin(DataBinClass::Meta, 0, 1);
        cache.set_read_scope(DataBinClass::Meta, 0, 2);

        cache.set_preferred_memory_limit(0);
        cache.trim_to_preferred_limit();

        // Bins 0 and 1 preserved, 2 pinned by the read scope; only 3 goes.
        assert_eq!(cache.bytes_held(), 300);
        assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 3), 0);
    }

    #[test]
    fn test_evicted_bin_is_marked_deleted() {
        let cache = DataBinCache::new();
        filled(&cache, 0, 100);
        cache.set_preferred_memory_limit(0);
        cache.trim_to_preferred_limit();

        let snap = cache.mark_databin(DataBinClass::Meta, 0, 0, false);
        assert_eq!(snap.marks, BIN_DELETED | BIN_MARKED);
        assert_eq!(cache.stats().evicted_bins, 1);
    }

    #[test]
    fn test_class_wildcard_preservation() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Precinct, 1, 0, 0, &[0; 50], true, false);
        cache.add_to_databin(DataBinClass::Precinct, 2, 0, 0, &[0; 50], true, false);
        cache.preserve_class(DataBinClass::Precinct, Some(1));

        cache.set_preferred_memory_limit(0);
        cache.trim_to_preferred_limit();
        assert_eq!(cache.databin_length(DataBinClass::Precinct, 1, 0), 50);
        assert_eq!(cache.databin_length(DataBinClass::Precinct, 2, 0), 0);
    }

    #[test]
    fn test_attached_handle_cannot_clear_marks() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Meta, 0, 1, 0, b"x", true, true);

        let reader = cache.attach();
        assert!(reader.is_attached());
        let snap = reader.mark_databin(DataBinClass::Meta, 0, 1, true);
        assert_eq!(snap.marks, BIN_MARKED | BIN_AUGMENTED);

        // Primary still observes (and may clear) the flags.
        let snap = cache.mark_databin(DataBinClass::Meta, 0, 1, true);
        assert_eq!(snap.marks, BIN_MARKED | BIN_AUGMENTED);
        let snap = cache.mark_databin(DataBinClass::Meta, 0, 1, true);
        assert_eq!(snap.marks, 0);
    }

    #[test]
    fn test_attached_handles_have_independent_read_scopes() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Meta, 0, 1, 0, b"abcdef", true, false);
        cache.add_to_databin(DataBinClass::Meta, 0, 2, 0, b"uvwxyz", true, false);

        let reader = cache.attach();
        cache.set_read_scope(DataBinClass::Meta, 0, 1);
        reader.set_read_scope(DataBinClass::Meta, 0, 2);

        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        assert_eq!(cache.read(&mut a), 3);
        assert_eq!(reader.read(&mut b), 3);
        assert_eq!(&a, b"abc");
        assert_eq!(&b, b"uvw");
    }

    #[test]
    fn test_scan_marked_only_with_buffer_continuation() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Meta, 0, 1, 0, b"aaaa", true, false);
        cache.add_to_databin(DataBinClass::Meta, 0, 2, 0, b"bbbbbb", true, true);

        let mut buf = [0u8; 4];
        let entry = cache
            .scan_databins(SCAN_START | SCAN_MARKED_ONLY, DataBinClass::Meta, 0, Some(&mut buf))
            .expect("marked bin");
        assert_eq!(entry.key.bin_id, 2);
        assert_eq!(entry.buf_len, 4);
        assert_eq!(&buf, b"bbbb");

        // Truncated copy: continue the same bin without advancing.
        let entry = cache
            .scan_databins(SCAN_NO_ADVANCE | SCAN_MARKED_ONLY, DataBinClass::Meta, 0, Some(&mut buf))
            .expect("same bin");
        assert_eq!(entry.key.bin_id, 2);
        assert_eq!(entry.buf_offset, 4);
        assert_eq!(entry.buf_len, 2);
        assert_eq!(&buf[..2], b"bb");

        assert!(
            cache
                .scan_databins(SCAN_MARKED_ONLY, DataBinClass::Meta, 0, None)
                .is_none()
        );
    }

    #[test]
    fn test_scan_fixed_class_filter() {
        let cache = DataBinCache::new();
        cache.add_to_databin(DataBinClass::Precinct, 5, 1, 0, b"p", true, false);
        cache.add_to_databin(DataBinClass::MainHeader, 5, 0, 0, b"m", true, false);

        let entry = cache
            .scan_databins(
                SCAN_START | SCAN_FIX_CLASS,
                DataBinClass::MainHeader,
                0,
                None,
            )
            .expect("main header bin");
        assert_eq!(entry.key.class, DataBinClass::MainHeader);
        assert!(
            cache
                .scan_databins(SCAN_FIX_CLASS, DataBinClass::MainHeader, 0, None)
                .is_none()
        );
    }

    #[test]
    fn test_close_invalidates_all_handles() {
        let cache = DataBinCache::new();
        let reader = cache.attach();
        filled(&cache, 0, 10);

        reader.close();
        assert!(cache.is_closed());
        assert!(!cache.add_to_databin(DataBinClass::Meta, 0, 9, 0, b"x", false, false));
        assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 0), 0);
    }
}
