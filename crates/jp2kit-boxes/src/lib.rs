//! Box-structured JP2-family container reading and writing
//!
//! JP2-family files (JP2, JPX and relatives) are sequences of nested
//! *boxes*: length-prefixed, four-character-typed binary records. This
//! crate parses and writes that framing — nothing inside it. It is built
//! for two delivery models with one API:
//!
//! - **Linear sources** (files, memory, generic byte streams): headers
//!   are parsed eagerly and malformed framing is a hard error.
//! - **Cache origins** ([`jp2kit_cache::DataBinCache`]): the container
//!   arrives as out-of-order data-bin fragments. Any parse or read may
//!   find its bytes missing; that is reported through `Ok(false)` /
//!   short counts and retried by the caller once the cache has grown.
//!   Placeholder (`phld`) boxes redirect a box's content into another
//!   data-bin and are resolved transparently.
//!
//! # Reading
//!
//! ```
//! use jp2kit_boxes::{BoxLocator, FamilySource, FamilyTarget, InputBox, box_type};
//!
//! # fn main() -> jp2kit_boxes::Result<()> {
//! // Write a tiny container into memory first.
//! let target = FamilyTarget::new();
//! target.open_memory()?;
//! let mut out = target.open_box(box_type::ASSOCIATION)?;
//! let mut child = out.open_child(box_type::XML)?;
//! child.write(b"<note/>");
//! child.close()?;
//! drop(child);
//! out.close()?;
//! let bytes = target.take_memory().unwrap();
//!
//! // Walk it back.
//! let family = FamilySource::new();
//! family.open_source(Box::new(jp2kit_boxes::MemorySource::new(bytes)))?;
//! let mut bx = InputBox::new(&family);
//! assert!(bx.open()?);
//! assert_eq!(bx.box_type(), Some(box_type::ASSOCIATION));
//!
//! let mut inner = bx.open_child()?.unwrap();
//! assert_eq!(inner.box_type(), Some(box_type::XML));
//! let mut buf = [0u8; 7];
//! inner.read(&mut buf)?;
//! assert_eq!(&buf, b"<note/>");
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! A [`FamilySource`] serializes navigation internally, so boxes sharing
//! one family may be driven from different threads. Box objects
//! themselves are single-threaded cursors. Nothing blocks waiting for
//! cache growth — the retry schedule belongs to the application.

#![warn(missing_docs)]

pub mod box_type;
pub mod error;
pub mod family;
pub mod input;
pub mod locator;
pub mod output;
pub mod placeholder;
pub mod source;

pub use box_type::BoxType;
pub use error::{BoxError, Result};
pub use family::{FamilySource, FamilyTarget};
pub use input::InputBox;
pub use locator::BoxLocator;
pub use output::{OutputBox, encode_box_header};
pub use placeholder::{
    CodestreamEquiv, EmbeddedHeader, PHLD_CODESTREAM_EQUIV, PHLD_ORIGINAL, PlaceholderBox,
};
pub use source::{
    ByteSource, ByteTarget, CAP_CACHED, CAP_IN_MEMORY, CAP_SEEKABLE, CAP_SEQUENTIAL, FileSource,
    FileTarget, MemorySource, MemoryTarget,
};
