//! HDF5 Object Modification Time message (message type 0x0012).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::fields::ensure_len;

/// Seconds since the Unix epoch at which the object was last modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModificationTime {
    pub seconds: u32,
}

impl ModificationTime {
    pub fn parse(data: &[u8]) -> Result<ModificationTime, FormatError> {
        ensure_len(data, 0, 8)?;
        if data[0] != 1 {
            return Err(FormatError::InvalidMessageVersion {
                msg_type: 0x0012,
                version: data[0],
            });
        }
        Ok(ModificationTime {
            seconds: LittleEndian::read_u32(&data[4..]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![1, 0, 0, 0];
        buf.extend_from_slice(&self.seconds.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let t = ModificationTime { seconds: 1_700_000_000 };
        let bytes = t.serialize();
        assert_eq!(bytes.len(), 8);
        assert_eq!(ModificationTime::parse(&bytes).unwrap(), t);
    }

    #[test]
    fn wrong_version() {
        assert!(matches!(
            ModificationTime::parse(&[2, 0, 0, 0, 0, 0, 0, 0]),
            Err(FormatError::InvalidMessageVersion { version: 2, .. })
        ));
    }
}
