//! Box writing
//!
//! [`OutputBox`] frames content into boxes against a [`FamilyTarget`].
//! Three header-timing strategies cover the fact that a box's length
//! field precedes content whose size may not be known up front:
//!
//! - **buffered** (the default): content accumulates in memory; the
//!   header (8 or 16 bytes, decided by the final size) is emitted at
//!   close, followed by the buffered bytes.
//! - **rubber**: the header goes out immediately with a zero length
//!   field and writes pass straight through; legal only for the final
//!   box of its container.
//! - **deferred**: a reserved header is emitted up front and backpatched
//!   at close — for boxes too large to buffer, on targets that can
//!   rewrite.
//!
//! Headerless boxes emit no framing at all; they exist for composition
//! tricks where a byte range must look like box content without being
//! one.
//!
//! Sub-boxes mutably borrow their super-box, which statically enforces
//! the single-writer discipline: exactly one box is writable at any
//! moment, and a super-box cannot emit bytes while a sub-box is open.
//! Every write returns `bool`; `false` means the device refused the
//! bytes (disk full, broken pipe) and the caller should abort cleanly.

use crate::box_type::{BoxType, FREE};
use crate::error::{BoxError, Result};
use crate::family::FamilyTarget;
use crate::placeholder::EmbeddedHeader;

/// Encode a box header for the given content length
///
/// `None` encodes a rubber length (a zero length field). The 16-byte
/// extended form is chosen exactly when the total box length would
/// overflow the 32-bit field; `force_extended` reserves it regardless,
/// which deferred headers need when the final size is unknown.
pub fn encode_box_header(
    box_type: BoxType,
    content_len: Option<u64>,
    force_extended: bool,
) -> Vec<u8> {
    let header = match content_len {
        Some(len) if force_extended => EmbeddedHeader {
            lbox: 1,
            tbox: box_type.0,
            xlbox: Some(len + 16),
        },
        other => EmbeddedHeader::for_content(box_type, other),
    };
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&header.lbox.to_be_bytes());
    out.extend_from_slice(&header.tbox.to_be_bytes());
    if let Some(xl) = header.xlbox {
        out.extend_from_slice(&xl.to_be_bytes());
    }
    out
}

/// Where a box sends its bytes: the family target, or the super-box it
/// was opened inside.
enum SinkRef<'a> {
    Target(&'a FamilyTarget),
    Parent(&'a mut dyn BoxSink),
}

impl SinkRef<'_> {
    fn push(&mut self, data: &[u8]) -> bool {
        match self {
            Self::Target(t) => t.write_bytes(data),
            Self::Parent(p) => p.push(data),
        }
    }

    fn pos(&self) -> u64 {
        match self {
            Self::Target(t) => t.target_pos(),
            Self::Parent(p) => p.sink_pos(),
        }
    }

    fn pass_through(&self) -> bool {
        match self {
            Self::Target(_) => true,
            Self::Parent(p) => p.sink_pass_through(),
        }
    }

    fn supports_rewrite(&self) -> bool {
        match self {
            Self::Target(t) => t.target_supports_rewrite(),
            Self::Parent(p) => p.sink_supports_rewrite(),
        }
    }

    fn start_rewrite(&mut self, pos: u64) -> bool {
        match self {
            Self::Target(t) => t.target_start_rewrite(pos),
            Self::Parent(p) => p.sink_start_rewrite(pos),
        }
    }

    fn end_rewrite(&mut self) -> bool {
        match self {
            Self::Target(t) => t.target_end_rewrite(),
            Self::Parent(p) => p.sink_end_rewrite(),
        }
    }
}

/// Content pipeline of an open box, as seen by a sub-box
trait BoxSink {
    fn push(&mut self, data: &[u8]) -> bool;
    fn sink_pos(&self) -> u64;
    fn sink_pass_through(&self) -> bool;
    fn sink_supports_rewrite(&self) -> bool;
    fn sink_start_rewrite(&mut self, pos: u64) -> bool;
    fn sink_end_rewrite(&mut self) -> bool;
}

enum Mode {
    Buffered {
        buf: Vec<u8>,
    },
    Rubber {
        content_pos: Option<u64>,
    },
    Deferred {
        header_pos: u64,
        extended: bool,
        written: u64,
    },
    Headerless {
        content_pos: Option<u64>,
    },
}

enum OutState {
    Closed,
    Open(Mode),
    Rewriting { remaining: u64 },
}

/// Span of a closed box's content within the target, for reopening
#[derive(Debug, Clone, Copy)]
struct ClosedSpan {
    content_pos: u64,
    content_len: u64,
}

/// A box opened for writing
///
/// Created by [`FamilyTarget::open_box`] (or the headerless variant) or
/// nested inside another box with [`OutputBox::open_child`]. Check every
/// write: `false` means the device refused the bytes.
pub struct OutputBox<'a> {
    sink: SinkRef<'a>,
    root: bool,
    box_type: BoxType,
    state: OutState,
    span: Option<ClosedSpan>,
}

impl FamilyTarget {
    /// Open a box against this target (buffered header timing)
    ///
    /// Only one box may be open on a target at a time; nest further boxes
    /// with [`OutputBox::open_child`].
    pub fn open_box(&self, box_type: BoxType) -> Result<OutputBox<'_>> {
        self.begin_box()?;
        Ok(OutputBox {
            sink: SinkRef::Target(self),
            root: true,
            box_type,
            state: OutState::Open(Mode::Buffered { buf: Vec::new() }),
            span: None,
        })
    }

    /// Open a headerless byte range against this target
    ///
    /// No framing bytes are ever emitted; the "box" is a pure pass-through
    /// convention.
    pub fn open_headerless_box(&self) -> Result<OutputBox<'_>> {
        self.begin_box()?;
        let pos = self.target_pos();
        Ok(OutputBox {
            sink: SinkRef::Target(self),
            root: true,
            box_type: BoxType(0),
            state: OutState::Open(Mode::Headerless {
                content_pos: Some(pos),
            }),
            span: None,
        })
    }
}

impl<'a> OutputBox<'a> {
    /// Type code this box will carry (zero for headerless ranges)
    pub fn box_type(&self) -> BoxType {
        self.box_type
    }

    /// Whether the box is open for writing
    pub fn is_open(&self) -> bool {
        matches!(self.state, OutState::Open(_) | OutState::Rewriting { .. })
    }

    /// Open a sub-box inside this box
    ///
    /// The sub-box mutably borrows this box until it is dropped, so no
    /// bytes can be written here in the meantime.
    pub fn open_child(&mut self, box_type: BoxType) -> Result<OutputBox<'_>> {
        if !matches!(self.state, OutState::Open(_)) {
            return Err(BoxError::NotOpen);
        }
        Ok(OutputBox {
            sink: SinkRef::Parent(self),
            root: false,
            box_type,
            state: OutState::Open(Mode::Buffered { buf: Vec::new() }),
            span: None,
        })
    }

    /// Open a headerless sub-range inside this box
    pub fn open_headerless_child(&mut self) -> Result<OutputBox<'_>> {
        if !matches!(self.state, OutState::Open(_)) {
            return Err(BoxError::NotOpen);
        }
        let content_pos = self.sink_pass_through().then(|| self.sink_pos());
        Ok(OutputBox {
            sink: SinkRef::Parent(self),
            root: false,
            box_type: BoxType(0),
            state: OutState::Open(Mode::Headerless { content_pos }),
            span: None,
        })
    }

    /// Switch to rubber length: emit the header now, stream from here on
    ///
    /// Flushes any bytes already buffered. A rubber-length box must be
    /// the last box of its container; nothing can be written after it at
    /// this level. Returns `false` if the device refused the flush.
    pub fn set_rubber_length(&mut self) -> bool {
        let OutState::Open(Mode::Buffered { buf }) = &mut self.state else {
            debug_assert!(false, "rubber length requires an open buffered box");
            return false;
        };
        let pending = std::mem::take(buf);
        let header = encode_box_header(self.box_type, None, false);
        if !(self.sink.push(&header) && self.sink.push(&pending)) {
            return false;
        }
        let content_pos = self
            .sink
            .pass_through()
            .then(|| self.sink.pos() - pending.len() as u64);
        self.state = OutState::Open(Mode::Rubber { content_pos });
        true
    }

    /// Switch to a deferred header, backpatched at close
    ///
    /// Emits a reserved header (16 bytes when `extended`, else 8)
    /// immediately; the length field is patched once the final size is
    /// known. Requires every enclosing box to pass bytes straight through
    /// to a rewrite-capable target. Choose `extended` for boxes that may
    /// outgrow the 32-bit length field — a short reserved header cannot
    /// be enlarged later.
    pub fn defer_header(&mut self, extended: bool) -> Result<bool> {
        let OutState::Open(Mode::Buffered { buf }) = &mut self.state else {
            debug_assert!(false, "deferred header requires an open buffered box");
            return Err(BoxError::RewriteUnsupported);
        };
        if !(self.sink.pass_through() && self.sink.supports_rewrite()) {
            return Err(BoxError::RewriteUnsupported);
        }
        let pending = std::mem::take(buf);
        let header_pos = self.sink.pos();
        let reserved = encode_box_header(self.box_type, Some(0), extended);
        if !(self.sink.push(&reserved) && self.sink.push(&pending)) {
            return Ok(false);
        }
        self.state = OutState::Open(Mode::Deferred {
            header_pos,
            extended,
            written: pending.len() as u64,
        });
        Ok(true)
    }

    /// Write content bytes
    ///
    /// Returns `false` when the device refuses them, or when a rewrite
    /// would run past the reopened box's end.
    pub fn write(&mut self, data: &[u8]) -> bool {
        match &self.state {
            OutState::Open(_) => self.absorb(data),
            &OutState::Rewriting { remaining } => {
                if data.len() as u64 > remaining {
                    return false;
                }
                if !self.sink.push(data) {
                    return false;
                }
                self.state = OutState::Rewriting {
                    remaining: remaining - data.len() as u64,
                };
                true
            }
            OutState::Closed => {
                debug_assert!(false, "write on a closed box");
                false
            }
        }
    }

    fn absorb(&mut self, data: &[u8]) -> bool {
        // Buffered content never touches the sink until close.
        if let OutState::Open(Mode::Buffered { buf }) = &mut self.state {
            buf.extend_from_slice(data);
            return true;
        }
        if !matches!(self.state, OutState::Open(_)) {
            return false;
        }
        if !self.sink.push(data) {
            return false;
        }
        if let OutState::Open(Mode::Deferred { written, .. }) = &mut self.state {
            *written += data.len() as u64;
        }
        true
    }

    /// Bytes of content written or buffered so far
    pub fn content_written(&self) -> u64 {
        match &self.state {
            OutState::Open(Mode::Buffered { buf }) => buf.len() as u64,
            OutState::Open(Mode::Deferred { written, .. }) => *written,
            OutState::Open(Mode::Rubber { content_pos, .. } | Mode::Headerless { content_pos }) => {
                content_pos.map_or(0, |start| self.sink.pos() - start)
            }
            _ => self.span.map_or(0, |span| span.content_len),
        }
    }

    /// Close the box, emitting or patching its header as required
    ///
    /// `Ok(false)` reports a device refusal. A deferred box whose content
    /// outgrew a short reserved header fails with
    /// [`BoxError::HeaderOverflow`].
    pub fn close(&mut self) -> Result<bool> {
        let state = std::mem::replace(&mut self.state, OutState::Closed);
        let ok = match state {
            OutState::Closed => true,
            OutState::Rewriting { .. } => {
                let ok = self.sink.end_rewrite();
                self.finish_root();
                return Ok(ok);
            }
            OutState::Open(Mode::Buffered { buf }) => {
                let header = encode_box_header(self.box_type, Some(buf.len() as u64), false);
                let content_pos = self
                    .sink
                    .pass_through()
                    .then(|| self.sink.pos() + header.len() as u64);
                let ok = self.sink.push(&header) && self.sink.push(&buf);
                if ok {
                    if let Some(content_pos) = content_pos {
                        self.span = Some(ClosedSpan {
                            content_pos,
                            content_len: buf.len() as u64,
                        });
                    }
                }
                ok
            }
            OutState::Open(Mode::Rubber { content_pos }) => {
                if let Some(content_pos) = content_pos {
                    self.span = Some(ClosedSpan {
                        content_pos,
                        content_len: self.sink.pos() - content_pos,
                    });
                }
                true
            }
            OutState::Open(Mode::Headerless { content_pos }) => {
                if let Some(content_pos) = content_pos {
                    self.span = Some(ClosedSpan {
                        content_pos,
                        content_len: self.sink.pos() - content_pos,
                    });
                }
                true
            }
            OutState::Open(Mode::Deferred {
                header_pos,
                extended,
                written,
            }) => {
                if !extended && written + 8 > u64::from(u32::MAX) {
                    self.finish_root();
                    return Err(BoxError::HeaderOverflow { reserved: 8 });
                }
                let header = encode_box_header(self.box_type, Some(written), extended);
                let ok = self.sink.start_rewrite(header_pos)
                    && self.sink.push(&header)
                    && self.sink.end_rewrite();
                if ok {
                    self.span = Some(ClosedSpan {
                        content_pos: header_pos + header.len() as u64,
                        content_len: written,
                    });
                }
                ok
            }
        };
        self.finish_root();
        Ok(ok)
    }

    fn finish_root(&mut self) {
        if self.root {
            if let SinkRef::Target(target) = &self.sink {
                target.finish_box();
            }
        }
    }

    /// Re-enter a closed box's body to rewrite bytes in place
    ///
    /// `offset` is content-relative. Returns the number of rewritable
    /// bytes from there; subsequent writes overwrite (never extend) and
    /// the next [`OutputBox::close`] ends the rewrite. The box must have
    /// gone to a rewrite-capable target.
    pub fn reopen(&mut self, offset: u64) -> Result<u64> {
        if !matches!(self.state, OutState::Closed) {
            return Err(BoxError::AlreadyBound);
        }
        let span = self.span.ok_or(BoxError::RewriteUnsupported)?;
        if offset > span.content_len {
            return Err(BoxError::SeekBeyondEnd {
                pos: offset,
                len: span.content_len,
            });
        }
        if self.root {
            // Occupy the target's single-writer slot again for the
            // duration of the rewrite.
            if let SinkRef::Target(target) = &self.sink {
                target.begin_box()?;
            }
        }
        if !self.sink.start_rewrite(span.content_pos + offset) {
            self.finish_root();
            return Err(BoxError::RewriteUnsupported);
        }
        let remaining = span.content_len - offset;
        self.state = OutState::Rewriting { remaining };
        Ok(remaining)
    }

    /// Append a `free` padding box of exactly `total` bytes, then close
    ///
    /// The padding reserves space that a later rewrite can grow into; it
    /// is streamed in small chunks, never buffered whole. `total` must be
    /// at least 8 (the free box's own header).
    pub fn write_free_and_close(&mut self, total: u64) -> Result<bool> {
        debug_assert!(total >= 8, "a free box cannot be smaller than its header");
        if !matches!(self.state, OutState::Open(_)) {
            return Err(BoxError::NotOpen);
        }
        let (header, content) = if total <= u64::from(u32::MAX) {
            (encode_box_header(FREE, Some(total - 8), false), total - 8)
        } else {
            (encode_box_header(FREE, Some(total - 16), true), total - 16)
        };
        if !self.write(&header) {
            let _ = self.close()?;
            return Ok(false);
        }
        let zeros = [0u8; 4096];
        let mut left = content;
        while left > 0 {
            let n = left.min(zeros.len() as u64) as usize;
            if !self.write(&zeros[..n]) {
                let _ = self.close()?;
                return Ok(false);
            }
            left -= n as u64;
        }
        self.close()
    }
}

macro_rules! typed_writer {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self, value: $ty) -> bool {
            self.write(&value.to_be_bytes())
        }
    };
}

impl OutputBox<'_> {
    typed_writer!(
        /// Write one byte
        write_u8, u8
    );
    typed_writer!(
        /// Write a big-endian unsigned 16-bit integer
        write_u16, u16
    );
    typed_writer!(
        /// Write a big-endian unsigned 32-bit integer
        write_u32, u32
    );
    typed_writer!(
        /// Write a big-endian unsigned 64-bit integer
        write_u64, u64
    );
    typed_writer!(
        /// Write a big-endian signed 16-bit integer
        write_i16, i16
    );
    typed_writer!(
        /// Write a big-endian signed 32-bit integer
        write_i32, i32
    );
}

impl BoxSink for OutputBox<'_> {
    fn push(&mut self, data: &[u8]) -> bool {
        self.absorb(data)
    }

    fn sink_pos(&self) -> u64 {
        self.sink.pos()
    }

    fn sink_pass_through(&self) -> bool {
        matches!(
            self.state,
            OutState::Open(Mode::Rubber { .. } | Mode::Deferred { .. } | Mode::Headerless { .. })
        ) && self.sink.pass_through()
    }

    fn sink_supports_rewrite(&self) -> bool {
        self.sink_pass_through() && self.sink.supports_rewrite()
    }

    fn sink_start_rewrite(&mut self, pos: u64) -> bool {
        self.sink.start_rewrite(pos)
    }

    fn sink_end_rewrite(&mut self) -> bool {
        self.sink.end_rewrite()
    }
}

impl Drop for OutputBox<'_> {
    fn drop(&mut self) {
        // A box dropped while open emits nothing; close() is the only way
        // to produce valid framing. The target's writer slot is released
        // so teardown paths do not wedge it.
        if matches!(
            self.state,
            OutState::Open(_) | OutState::Rewriting { .. }
        ) {
            if let OutState::Rewriting { .. } = self.state {
                let _ = self.sink.end_rewrite();
            }
            self.state = OutState::Closed;
            self.finish_root();
        }
    }
}
