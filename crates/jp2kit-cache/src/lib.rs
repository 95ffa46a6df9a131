//! Incremental data-bin cache for streamed JP2-family container delivery
//!
//! When a JP2-family file is delivered over a network rather than read from
//! disk, its bytes arrive as out-of-order fragments of *data-bins*: byte
//! ranges keyed by `(class, codestream id, in-class id)`. This crate stores
//! those fragments, exposes each bin's contiguous-from-zero readable prefix,
//! and keeps the bookkeeping needed to stay in sync with a remote peer's
//! model of the cache (mark flags), to survive memory pressure (preferred
//! limits with LRU trimming), and to let readers and the network feeder run
//! on different threads (attached handles).
//!
//! # Concurrency contract
//!
//! - Mutation ([`DataBinCache::add_to_databin`],
//!   [`DataBinCache::delete_databin`], [`DataBinCache::mark_databin`],
//!   [`DataBinCache::scan_databins`]) is internally serialized and safe
//!   from any thread on any handle.
//! - The `(set_read_scope, read)` pair is per-handle cursor state. Give
//!   each reading thread its own handle via [`DataBinCache::attach`] — a
//!   small state copy, not a clone of the storage.
//! - Nothing here blocks waiting for data. A consumer that outruns the
//!   feeder sees short reads and incomplete flags and retries on its own
//!   schedule; the feeder signals progress however the application likes
//!   (typically a condvar around `add_to_databin`).
//!
//! # Example
//!
//! ```
//! use jp2kit_cache::{DataBinCache, DataBinClass};
//!
//! let cache = DataBinCache::new();
//! // Fragments arrive out of order; the tail first, marked final.
//! cache.add_to_databin(DataBinClass::Meta, 0, 0, 6, b"world!", true, false);
//! assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 0), 0);
//!
//! cache.add_to_databin(DataBinClass::Meta, 0, 0, 0, b"hello ", false, false);
//! assert!(cache.databin_is_complete(DataBinClass::Meta, 0, 0));
//!
//! cache.set_read_scope(DataBinClass::Meta, 0, 0);
//! let mut buf = [0u8; 12];
//! assert_eq!(cache.read(&mut buf), 12);
//! assert_eq!(&buf, b"hello world!");
//! ```

#![warn(missing_docs)]

pub mod cache;
mod databin;
pub mod key;
pub mod scan;

pub use cache::{CacheStats, DataBinCache, MarkSnapshot};
pub use databin::{BIN_AUGMENTED, BIN_DELETED, BIN_MARKED};
pub use key::{BinKey, DataBinClass};
pub use scan::{
    SCAN_FIX_CLASS, SCAN_FIX_CODESTREAM, SCAN_MARKED_ONLY, SCAN_NO_ADVANCE, SCAN_PRESERVED_ONLY,
    SCAN_SKIP_PRESERVED, SCAN_START, ScanEntry,
};
