//! Placeholder box bodies
//!
//! A `phld` box stands in for a box whose content is delivered out of
//! band, in its own metadata data-bin. The body is a big-endian record:
//!
//! ```text
//! u32       flags        (bit 0: original box accessible,
//!                         bit 1: codestream equivalent present)
//! u64       orig_bin     metadata bin holding the original box
//! [u8;8|16] orig_header  the original box's header, verbatim
//! if flags bit 1:
//!   u64     cs_min       first codestream id of the equivalent range
//!   u64     cs_max       last codestream id of the equivalent range
//! ```
//!
//! The embedded header is authoritative for the original's apparent type
//! and length, so a reader can start pulling content out of `orig_bin`
//! before that bin's own header bytes have arrived.

use crate::box_type::{BoxType, PLACEHOLDER};
use crate::error::{BoxError, Result};
use binrw::{BinRead, BinResult, BinWrite};
use std::io::{Cursor, Read, Seek, Write};

/// Flag: the original box's content is accessible in `orig_bin`
pub const PHLD_ORIGINAL: u32 = 1 << 0;

/// Flag: a codestream-equivalent range accompanies the original
pub const PHLD_CODESTREAM_EQUIV: u32 = 1 << 1;

/// A box header embedded verbatim inside a placeholder record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedHeader {
    /// 32-bit length field (0 = rubber, 1 = extended length follows)
    pub lbox: u32,
    /// Box type code
    pub tbox: u32,
    /// Extended 64-bit total length, present iff `lbox == 1`
    pub xlbox: Option<u64>,
}

impl EmbeddedHeader {
    /// Encode a header for a box of the given content length
    ///
    /// `None` encodes a rubber length. The extended form is used exactly
    /// when the total box length overflows the 32-bit field.
    pub fn for_content(box_type: BoxType, content_len: Option<u64>) -> Self {
        match content_len {
            None => Self {
                lbox: 0,
                tbox: box_type.0,
                xlbox: None,
            },
            Some(len) if len + 8 <= u64::from(u32::MAX) => Self {
                lbox: (len + 8) as u32,
                tbox: box_type.0,
                xlbox: None,
            },
            Some(len) => Self {
                lbox: 1,
                tbox: box_type.0,
                xlbox: Some(len + 16),
            },
        }
    }

    /// Header length in bytes (8 or 16)
    pub fn header_len(&self) -> u64 {
        if self.xlbox.is_some() { 16 } else { 8 }
    }

    /// Content length, `None` for a rubber-length box
    pub fn content_len(&self) -> Option<u64> {
        match (self.lbox, self.xlbox) {
            (0, _) => None,
            (1, Some(xl)) => Some(xl - 16),
            (lbox, _) => Some(u64::from(lbox) - 8),
        }
    }

    /// The box type the header declares
    pub fn box_type(&self) -> BoxType {
        BoxType(self.tbox)
    }
}

impl BinRead for EmbeddedHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let lbox = u32::read_options(reader, endian, ())?;
        let tbox = u32::read_options(reader, endian, ())?;
        let xlbox = if lbox == 1 {
            Some(u64::read_options(reader, endian, ())?)
        } else {
            None
        };
        if let Some(xl) = xlbox {
            if xl < 16 {
                return Err(binrw::Error::AssertFail {
                    pos: reader.stream_position().unwrap_or(0),
                    message: format!("extended box length {xl} is shorter than its header"),
                });
            }
        } else if (2..8).contains(&lbox) {
            return Err(binrw::Error::AssertFail {
                pos: reader.stream_position().unwrap_or(0),
                message: format!("box length {lbox} is shorter than its header"),
            });
        }
        Ok(Self { lbox, tbox, xlbox })
    }
}

impl BinWrite for EmbeddedHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.lbox.write_options(writer, endian, ())?;
        self.tbox.write_options(writer, endian, ())?;
        if let Some(xl) = self.xlbox {
            xl.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

/// Codestream-equivalent range carried by a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[br(big)]
#[bw(big)]
pub struct CodestreamEquiv {
    /// First codestream id the placeholder stands in for
    pub cs_min: u64,
    /// Last codestream id the placeholder stands in for
    pub cs_max: u64,
}

/// Parsed placeholder box body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderBox {
    /// `PHLD_*` flag bits
    pub flags: u32,
    /// Metadata bin holding the original box (header included)
    pub orig_bin: u64,
    /// The original box's header, as embedded in the record
    pub orig_header: EmbeddedHeader,
    /// Codestream-equivalent range, when flagged
    pub equiv: Option<CodestreamEquiv>,
}

impl PlaceholderBox {
    /// Whether the original box can be reached through `orig_bin`
    pub fn has_original(&self) -> bool {
        self.flags & PHLD_ORIGINAL != 0
    }

    /// Encoded body length in bytes
    pub fn body_len(&self) -> u64 {
        let equiv = if self.flags & PHLD_CODESTREAM_EQUIV != 0 {
            16
        } else {
            0
        };
        4 + 8 + self.orig_header.header_len() + equiv
    }

    /// Attempt to parse a body from the bytes available so far
    ///
    /// `Ok(None)` means the record is not yet fully present — the normal
    /// outcome while a cache is still growing. Structural violations are
    /// errors regardless of source kind.
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        let mut cursor = Cursor::new(data);
        match Self::read_options(&mut cursor, binrw::Endian::Big, ()) {
            Ok(body) => Ok(Some(body)),
            Err(e) if is_premature_eof(&e) => Ok(None),
            Err(e) => Err(BoxError::MalformedPlaceholder(e.to_string())),
        }
    }

    /// Encode the body to bytes
    pub fn build(&self) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        // Writing a fixed record to a Vec cannot fail.
        let _ = self.write_options(&mut cursor, binrw::Endian::Big, ());
        cursor.into_inner()
    }
}

impl BinRead for PlaceholderBox {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let flags = u32::read_options(reader, endian, ())?;
        let orig_bin = u64::read_options(reader, endian, ())?;
        let orig_header = EmbeddedHeader::read_options(reader, endian, ())?;
        let equiv = if flags & PHLD_CODESTREAM_EQUIV != 0 {
            Some(CodestreamEquiv::read_options(reader, endian, ())?)
        } else {
            None
        };
        if orig_header.box_type() == PLACEHOLDER {
            return Err(binrw::Error::AssertFail {
                pos: reader.stream_position().unwrap_or(0),
                message: "placeholder records must not nest".to_owned(),
            });
        }
        Ok(Self {
            flags,
            orig_bin,
            orig_header,
            equiv,
        })
    }
}

impl BinWrite for PlaceholderBox {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.flags.write_options(writer, endian, ())?;
        self.orig_bin.write_options(writer, endian, ())?;
        self.orig_header.write_options(writer, endian, ())?;
        if let Some(equiv) = self.equiv {
            equiv.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

fn is_premature_eof(err: &binrw::Error) -> bool {
    match err {
        binrw::Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
        binrw::Error::Backtrace(bt) => is_premature_eof(&bt.error),
        _ => false,
    }
}
