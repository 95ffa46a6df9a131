//! Box type codes
//!
//! A box type is a four-character code stored big-endian in the box
//! header. The parser treats types as opaque except for `phld`, whose
//! placeholder indirection it resolves itself; everything else is
//! interpreted by higher layers.

use std::fmt;

/// Four-character box type code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoxType(pub u32);

impl BoxType {
    /// Build a type code from its four characters
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// The four characters of the code
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// A type code of zero, which no well-formed box carries
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType({self})")
    }
}

/// JP2 signature box
pub const SIGNATURE: BoxType = BoxType::from_bytes(*b"jP  ");

/// File type box
pub const FILE_TYPE: BoxType = BoxType::from_bytes(*b"ftyp");

/// JP2 header super-box
pub const JP2_HEADER: BoxType = BoxType::from_bytes(*b"jp2h");

/// Image header box
pub const IMAGE_HEADER: BoxType = BoxType::from_bytes(*b"ihdr");

/// Contiguous codestream box
pub const CODESTREAM: BoxType = BoxType::from_bytes(*b"jp2c");

/// Association super-box
pub const ASSOCIATION: BoxType = BoxType::from_bytes(*b"asoc");

/// XML box
pub const XML: BoxType = BoxType::from_bytes(*b"xml ");

/// UUID box
pub const UUID: BoxType = BoxType::from_bytes(*b"uuid");

/// Placeholder box redirecting to out-of-band content
pub const PLACEHOLDER: BoxType = BoxType::from_bytes(*b"phld");

/// Free (padding) box
pub const FREE: BoxType = BoxType::from_bytes(*b"free");

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shows_four_characters() {
        assert_eq!(PLACEHOLDER.to_string(), "phld");
        assert_eq!(SIGNATURE.to_string(), "jP  ");
        assert_eq!(BoxType(0x0001_0203).to_string(), "\\x00\\x01\\x02\\x03");
    }

    #[test]
    fn test_round_trips_through_bytes() {
        let ty = BoxType::from_bytes(*b"ftyp");
        assert_eq!(ty.to_bytes(), *b"ftyp");
        assert!(!ty.is_null());
        assert!(BoxType(0).is_null());
    }
}
