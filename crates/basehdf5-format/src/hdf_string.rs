//! String codec shared by fixed-length and variable-length string types.

use crate::error::FormatError;

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

impl StringPadding {
    pub fn from_bits(bits: u8) -> Result<Self, FormatError> {
        match bits {
            0 => Ok(StringPadding::NullTerminate),
            1 => Ok(StringPadding::NullPad),
            2 => Ok(StringPadding::SpacePad),
            other => Err(FormatError::InvalidStringPadding(other)),
        }
    }

    pub fn to_bits(self) -> u8 {
        match self {
            StringPadding::NullTerminate => 0,
            StringPadding::NullPad => 1,
            StringPadding::SpacePad => 2,
        }
    }
}

impl CharacterSet {
    pub fn from_bits(bits: u8) -> Result<Self, FormatError> {
        match bits {
            0 => Ok(CharacterSet::Ascii),
            1 => Ok(CharacterSet::Utf8),
            other => Err(FormatError::InvalidCharacterSet(other)),
        }
    }

    pub fn to_bits(self) -> u8 {
        match self {
            CharacterSet::Ascii => 0,
            CharacterSet::Utf8 => 1,
        }
    }
}

/// A string as stored in the file: raw bytes plus how to interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdfString {
    bytes: Vec<u8>,
    padding: StringPadding,
    charset: CharacterSet,
}

impl HdfString {
    /// Wrap raw stored bytes, padding included.
    pub fn from_stored(bytes: &[u8], padding: StringPadding, charset: CharacterSet) -> Self {
        Self {
            bytes: bytes.to_vec(),
            padding,
            charset,
        }
    }

    /// Prepare `s` for storage, checking it against the character set.
    pub fn new(s: &str, padding: StringPadding, charset: CharacterSet) -> Result<Self, FormatError> {
        if charset == CharacterSet::Ascii && !s.is_ascii() {
            return Err(FormatError::InvalidStringEncoding("ASCII"));
        }
        Ok(Self {
            bytes: s.as_bytes().to_vec(),
            padding,
            charset,
        })
    }

    /// The significant bytes, with padding removed.
    pub fn trimmed(&self) -> &[u8] {
        let b = &self.bytes[..];
        match self.padding {
            StringPadding::NullTerminate => match b.iter().position(|&c| c == 0) {
                Some(end) => &b[..end],
                None => b,
            },
            StringPadding::NullPad => {
                let end = b.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
                &b[..end]
            }
            StringPadding::SpacePad => {
                let end = b.iter().rposition(|&c| c != b' ').map_or(0, |p| p + 1);
                &b[..end]
            }
        }
    }

    /// Decode to a Rust string.
    pub fn decode(&self) -> Result<String, FormatError> {
        let t = self.trimmed();
        if self.charset == CharacterSet::Ascii && !t.is_ascii() {
            return Err(FormatError::InvalidStringEncoding("ASCII"));
        }
        String::from_utf8(t.to_vec()).map_err(|_| FormatError::InvalidStringEncoding("UTF-8"))
    }

    /// Bytes for a field of exactly `size` bytes.
    ///
    /// Null-terminated strings need one spare byte for the terminator.
    pub fn to_fixed(&self, size: usize) -> Result<Vec<u8>, FormatError> {
        let len = self.bytes.len();
        let room = match self.padding {
            StringPadding::NullTerminate => size.saturating_sub(1),
            _ => size,
        };
        if len > room {
            return Err(FormatError::StringTooLong { len, size });
        }
        let fill = match self.padding {
            StringPadding::SpacePad => b' ',
            _ => 0,
        };
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&self.bytes);
        out.resize(size, fill);
        Ok(out)
    }

    /// Bytes for a variable-length payload (no padding, no terminator).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_terminated_stops_at_first_nul() {
        let s = HdfString::from_stored(b"ab\0cd", StringPadding::NullTerminate, CharacterSet::Ascii);
        assert_eq!(s.decode().unwrap(), "ab");
    }

    #[test]
    fn padded_variants() {
        let n = HdfString::from_stored(b"abc\0\0", StringPadding::NullPad, CharacterSet::Ascii);
        assert_eq!(n.decode().unwrap(), "abc");
        let sp = HdfString::from_stored(b"abc  ", StringPadding::SpacePad, CharacterSet::Ascii);
        assert_eq!(sp.decode().unwrap(), "abc");
        let empty = HdfString::from_stored(b"\0\0", StringPadding::NullPad, CharacterSet::Ascii);
        assert_eq!(empty.decode().unwrap(), "");
    }

    #[test]
    fn fixed_encoding() {
        let s = HdfString::new("hi", StringPadding::SpacePad, CharacterSet::Ascii).unwrap();
        assert_eq!(s.to_fixed(4).unwrap(), b"hi  ".to_vec());
        let t = HdfString::new("four", StringPadding::NullTerminate, CharacterSet::Ascii).unwrap();
        assert_eq!(
            t.to_fixed(4),
            Err(FormatError::StringTooLong { len: 4, size: 4 })
        );
        assert_eq!(t.to_fixed(5).unwrap(), b"four\0".to_vec());
    }

    #[test]
    fn charset_checks() {
        assert!(HdfString::new("é", StringPadding::NullPad, CharacterSet::Ascii).is_err());
        let u = HdfString::new("é", StringPadding::NullPad, CharacterSet::Utf8).unwrap();
        assert_eq!(u.decode().unwrap(), "é");
        let bad = HdfString::from_stored(&[0xC3], StringPadding::NullPad, CharacterSet::Utf8);
        assert_eq!(bad.decode(), Err(FormatError::InvalidStringEncoding("UTF-8")));
    }

    #[test]
    fn padding_bits() {
        for bits in 0..3 {
            assert_eq!(StringPadding::from_bits(bits).unwrap().to_bits(), bits);
        }
        assert_eq!(StringPadding::from_bits(7), Err(FormatError::InvalidStringPadding(7)));
        assert_eq!(CharacterSet::from_bits(2), Err(FormatError::InvalidCharacterSet(2)));
    }
}
