//! Error types for box parsing and writing
//!
//! Only fatal/structural conditions are errors. "Not enough bytes yet" on
//! a cache-backed source is the dominant outcome of incremental parsing
//! and is threaded through return values (`Ok(false)`, short read counts,
//! `Ok(None)`) so retry loops stay allocation- and exception-free.

use thiserror::Error;

/// Result alias for box operations
pub type Result<T> = std::result::Result<T, BoxError>;

/// Fatal conditions raised by box parsing and writing
#[derive(Debug, Error)]
pub enum BoxError {
    /// Underlying device I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes at a box boundary cannot be a box header
    #[error("malformed box header at offset {offset}: {reason}")]
    MalformedHeader {
        /// Offset of the failed header within its container or data-bin
        offset: u64,
        /// What made the header unusable
        reason: &'static str,
    },

    /// A placeholder box resolved to an original with a zero box type
    #[error("resolved placeholder has zero box type")]
    ZeroBoxType,

    /// A placeholder box body does not follow the placeholder record layout
    #[error("malformed placeholder box: {0}")]
    MalformedPlaceholder(String),

    /// The operation needs a super-box that currently has an open sub-box
    #[error("box is locked while a sub-box opened from it remains open")]
    SuperBoxLocked,

    /// The operation needs an open box
    #[error("box is not open")]
    NotOpen,

    /// Seek past the known end of a box's content
    #[error("seek to {pos} beyond box content length {len}")]
    SeekBeyondEnd {
        /// Requested content-relative position
        pos: u64,
        /// Known content length
        len: u64,
    },

    /// A family source/target is already bound to an origin
    #[error("already bound to an underlying origin; close it first")]
    AlreadyBound,

    /// No origin is currently bound
    #[error("no underlying origin is bound")]
    NotBound,

    /// The target cannot rewrite previously written bytes
    #[error("operation requires a rewrite-capable (seekable) target")]
    RewriteUnsupported,

    /// A deferred-header box outgrew the header size reserved at open
    #[error("deferred box content does not fit the reserved {reserved}-byte header")]
    HeaderOverflow {
        /// Header bytes reserved at open time
        reserved: u64,
    },
}
