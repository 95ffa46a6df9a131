//! Family source and target
//!
//! A [`FamilySource`] owns exactly one underlying byte origin — a file, a
//! generic [`ByteSource`], or an attached data-bin cache — and arbitrates
//! access among the input boxes navigating it. Box objects are lightweight
//! cursors; every byte they see is pulled through here. Navigation is
//! internally serialized, so multiple boxes on one family can be driven
//! from different threads.
//!
//! For cache origins the family keeps a small most-recently-used record of
//! the last data-bin it touched, so repeated remaining-length and
//! completeness queries against the same bin stay cheap. Anything that
//! mutates the backing cache from outside the family must be followed by
//! [`FamilySource::synch_with_cache`], or those cached answers go stale.
//!
//! [`FamilyTarget`] is the writer-side dual: one underlying byte target,
//! at most one output box open against it at a time.

use crate::error::{BoxError, Result};
use crate::source::{ByteSource, ByteTarget, FileSource, FileTarget, MemoryTarget};
use jp2kit_cache::{DataBinCache, DataBinClass};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct BinStatus {
    bin_id: u64,
    prefix_len: u64,
    complete: bool,
}

enum Origin {
    Stream(Box<dyn ByteSource>),
    Cache(DataBinCache),
}

struct SourceState {
    origin: Option<Origin>,
    /// Data-bin currently holding the cache handle's read scope
    scoped: Option<u64>,
    /// Most-recently-used bin bookkeeping; invalidated by `synch_with_cache`
    last_bin: Option<BinStatus>,
}

/// Single owner of one underlying byte origin
///
/// Create it unbound, then bind with one of the `open_*` calls. Rebinding
/// after [`FamilySource::close`] is allowed and bumps the generation
/// counter so long-lived consumers can notice the swap.
pub struct FamilySource {
    state: Mutex<SourceState>,
    generation: AtomicU64,
}

impl Default for FamilySource {
    fn default() -> Self {
        Self::new()
    }
}

impl FamilySource {
    /// An unbound family source
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                origin: None,
                scoped: None,
                last_bin: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Bind to a file on disk
    ///
    /// Failure to open the file is fatal — there is nothing to retry.
    pub fn open_file(&self, path: impl AsRef<Path>, allow_seeks: bool) -> Result<()> {
        let src = FileSource::open(path, allow_seeks)?;
        self.bind(Origin::Stream(Box::new(src)))
    }

    /// Bind to a caller-supplied byte source
    pub fn open_source(&self, src: Box<dyn ByteSource>) -> Result<()> {
        self.bind(Origin::Stream(src))
    }

    /// Bind to a data-bin cache
    ///
    /// The family attaches its own handle, so the caller's handle (and any
    /// feeder thread using it) is unaffected by the family's read scope.
    pub fn open_cache(&self, cache: &DataBinCache) -> Result<()> {
        self.bind(Origin::Cache(cache.attach()))
    }

    fn bind(&self, origin: Origin) -> Result<()> {
        let mut state = self.state.lock();
        if state.origin.is_some() {
            return Err(BoxError::AlreadyBound);
        }
        state.origin = Some(origin);
        state.scoped = None;
        state.last_bin = None;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "family source bound");
        Ok(())
    }

    /// Unbind the current origin
    ///
    /// Boxes derived from the previous origin must already be closed;
    /// their reads will find nothing afterwards.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.origin = None;
        state.scoped = None;
        state.last_bin = None;
    }

    /// How many times this family has been bound
    ///
    /// Bumped by every successful `open_*`, letting dependents detect that
    /// the origin was swapped out underneath a long-lived reference.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether an origin is currently bound
    pub fn is_open(&self) -> bool {
        self.state.lock().origin.is_some()
    }

    /// Whether the bound origin is a data-bin cache
    pub fn is_cache_backed(&self) -> bool {
        matches!(self.state.lock().origin, Some(Origin::Cache(_)))
    }

    /// Whether the top level of the container is fully present
    ///
    /// `true` for linear sources (the file is all there); for cache
    /// origins, whether the top-level metadata bin is complete. Cheap
    /// enough to poll before attempting a parse.
    pub fn is_top_level_complete(&self) -> bool {
        let mut state = self.state.lock();
        match &state.origin {
            Some(Origin::Stream(_)) => true,
            Some(Origin::Cache(_)) => Self::bin_status_locked(&mut state, 0).complete,
            None => false,
        }
    }

    /// Whether a codestream's main header bin is fully present
    ///
    /// Decoders must not be handed a codestream until this answers `true`.
    pub fn is_codestream_main_header_complete(&self, codestream_id: u64) -> bool {
        let state = self.state.lock();
        match &state.origin {
            Some(Origin::Stream(_)) => true,
            Some(Origin::Cache(cache)) => {
                cache.databin_is_complete(DataBinClass::MainHeader, codestream_id, 0)
            }
            None => false,
        }
    }

    /// Drop the most-recently-used bin bookkeeping
    ///
    /// Call after mutating the backing cache through any handle other than
    /// this family; otherwise remaining-length and completeness answers
    /// may reflect the state before the mutation.
    pub fn synch_with_cache(&self) {
        self.state.lock().last_bin = None;
    }

    /// Read `buf.len()` bytes at an absolute position of the origin
    ///
    /// `bin` selects a metadata bin for cache origins and must be `None`
    /// for linear ones. Short counts mean end of currently-available data.
    pub(crate) fn read_at(&self, bin: Option<u64>, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let state = &mut *state;
        match &mut state.origin {
            None => Ok(0),
            Some(Origin::Stream(src)) => {
                debug_assert!(bin.is_none(), "bin-based read on a linear source");
                src.seek(pos)?;
                src.read(buf)
            }
            Some(Origin::Cache(cache)) => {
                let bin_id = bin.unwrap_or(0);
                if state.scoped != Some(bin_id) {
                    let prefix_len = cache.set_read_scope(DataBinClass::Meta, 0, bin_id);
                    let complete = cache.databin_is_complete(DataBinClass::Meta, 0, bin_id);
                    state.scoped = Some(bin_id);
                    state.last_bin = Some(BinStatus {
                        bin_id,
                        prefix_len,
                        complete,
                    });
                }
                cache.seek(pos);
                Ok(cache.read(buf))
            }
        }
    }

    /// Readable length and completeness of a metadata bin
    ///
    /// Served from the most-recently-used record when it matches; see
    /// [`FamilySource::synch_with_cache`].
    pub(crate) fn bin_status(&self, bin_id: u64) -> (u64, bool) {
        let mut state = self.state.lock();
        let status = Self::bin_status_locked(&mut state, bin_id);
        (status.prefix_len, status.complete)
    }

    fn bin_status_locked(state: &mut SourceState, bin_id: u64) -> BinStatus {
        if let Some(last) = state.last_bin {
            if last.bin_id == bin_id {
                return last;
            }
        }
        let status = match &state.origin {
            Some(Origin::Cache(cache)) => {
                let snap = cache.mark_databin(DataBinClass::Meta, 0, bin_id, false);
                BinStatus {
                    bin_id,
                    prefix_len: snap.prefix_len,
                    complete: snap.is_complete,
                }
            }
            _ => BinStatus {
                bin_id,
                prefix_len: 0,
                complete: false,
            },
        };
        state.last_bin = Some(status);
        status
    }

    /// Known end of the coordinate space a locator lives in
    ///
    /// For linear sources this is the stream length; for a cache bin it is
    /// the bin's total length once the bin is complete. Used to resolve
    /// rubber-length boxes.
    pub(crate) fn space_end(&self, bin: Option<u64>) -> Option<u64> {
        let mut state = self.state.lock();
        match &state.origin {
            None => None,
            Some(Origin::Stream(src)) => src.len(),
            Some(Origin::Cache(_)) => {
                let status = Self::bin_status_locked(&mut state, bin.unwrap_or(0));
                status.complete.then_some(status.prefix_len)
            }
        }
    }
}

enum TargetKind {
    File(FileTarget),
    Memory(MemoryTarget),
    Generic(Box<dyn ByteTarget>),
}

impl TargetKind {
    fn as_target(&mut self) -> &mut dyn ByteTarget {
        match self {
            Self::File(t) => t,
            Self::Memory(t) => t,
            Self::Generic(t) => t.as_mut(),
        }
    }
}

struct TargetState {
    kind: Option<TargetKind>,
    box_open: bool,
}

/// Single owner of one underlying byte target
///
/// Only one output box may be open against a target at a time; sub-boxes
/// nest inside their super-box rather than opening here.
pub struct FamilyTarget {
    state: Mutex<TargetState>,
}

impl Default for FamilyTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl FamilyTarget {
    /// An unbound family target
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TargetState {
                kind: None,
                box_open: false,
            }),
        }
    }

    /// Bind to a new (truncated) file
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let tgt = FileTarget::create(path)?;
        self.bind(TargetKind::File(tgt))
    }

    /// Bind to a growable in-memory buffer
    ///
    /// Retrieve the written bytes with [`FamilyTarget::take_memory`].
    pub fn open_memory(&self) -> Result<()> {
        self.bind(TargetKind::Memory(MemoryTarget::new()))
    }

    /// Bind to a caller-supplied byte target
    pub fn open_target(&self, tgt: Box<dyn ByteTarget>) -> Result<()> {
        self.bind(TargetKind::Generic(tgt))
    }

    fn bind(&self, kind: TargetKind) -> Result<()> {
        let mut state = self.state.lock();
        if state.kind.is_some() {
            return Err(BoxError::AlreadyBound);
        }
        state.kind = Some(kind);
        state.box_open = false;
        Ok(())
    }

    /// Unbind, flushing and dropping the underlying target
    pub fn close(&self) {
        let mut state = self.state.lock();
        debug_assert!(!state.box_open, "closing a family target with a box open");
        state.kind = None;
        state.box_open = false;
    }

    /// For memory-bound targets, unbind and return everything written
    pub fn take_memory(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if state.box_open {
            return None;
        }
        match state.kind.take() {
            Some(TargetKind::Memory(mem)) => Some(mem.into_bytes()),
            other => {
                state.kind = other;
                None
            }
        }
    }

    pub(crate) fn begin_box(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.kind.is_none() {
            return Err(BoxError::NotBound);
        }
        if state.box_open {
            return Err(BoxError::SuperBoxLocked);
        }
        state.box_open = true;
        Ok(())
    }

    pub(crate) fn finish_box(&self) {
        self.state.lock().box_open = false;
    }

    pub(crate) fn write_bytes(&self, buf: &[u8]) -> bool {
        let mut state = self.state.lock();
        state
            .kind
            .as_mut()
            .is_some_and(|kind| kind.as_target().write(buf))
    }

    pub(crate) fn target_pos(&self) -> u64 {
        let mut state = self.state.lock();
        state
            .kind
            .as_mut()
            .map_or(0, |kind| kind.as_target().position())
    }

    pub(crate) fn target_supports_rewrite(&self) -> bool {
        let mut state = self.state.lock();
        state
            .kind
            .as_mut()
            .is_some_and(|kind| kind.as_target().supports_rewrite())
    }

    pub(crate) fn target_start_rewrite(&self, pos: u64) -> bool {
        let mut state = self.state.lock();
        state
            .kind
            .as_mut()
            .is_some_and(|kind| kind.as_target().start_rewrite(pos))
    }

    pub(crate) fn target_end_rewrite(&self) -> bool {
        let mut state = self.state.lock();
        state
            .kind
            .as_mut()
            .is_some_and(|kind| kind.as_target().end_rewrite())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_rebind_bumps_generation() {
        let family = FamilySource::new();
        assert_eq!(family.generation(), 0);

        family
            .open_source(Box::new(MemorySource::new(vec![1, 2, 3])))
            .unwrap();
        assert_eq!(family.generation(), 1);
        assert!(
            family
                .open_source(Box::new(MemorySource::new(vec![])))
                .is_err()
        );

        family.close();
        family
            .open_source(Box::new(MemorySource::new(vec![4])))
            .unwrap();
        assert_eq!(family.generation(), 2);
    }

    #[test]
    fn test_top_level_complete_tracks_bin_zero() {
        let cache = DataBinCache::new();
        let family = FamilySource::new();
        family.open_cache(&cache).unwrap();
        assert!(!family.is_top_level_complete());

        cache.add_to_databin(DataBinClass::Meta, 0, 0, 0, b"data", true, false);
        family.synch_with_cache();
        assert!(family.is_top_level_complete());
    }

    #[test]
    fn test_stale_bin_status_until_synch() {
        let cache = DataBinCache::new();
        let family = FamilySource::new();
        family.open_cache(&cache).unwrap();

        assert_eq!(family.bin_status(0), (0, false));
        cache.add_to_databin(DataBinClass::Meta, 0, 0, 0, b"grown", true, false);

        // The MRU record still answers for bin 0 until invalidated.
        assert_eq!(family.bin_status(0), (0, false));
        family.synch_with_cache();
        assert_eq!(family.bin_status(0), (5, true));
    }

    #[test]
    fn test_single_writer_discipline() {
        let target = FamilyTarget::new();
        target.open_memory().unwrap();

        target.begin_box().unwrap();
        assert!(matches!(
            target.begin_box(),
            Err(BoxError::SuperBoxLocked)
        ));
        target.finish_box();
        target.begin_box().unwrap();
        target.finish_box();
    }
}
