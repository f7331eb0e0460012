//! HDF5 Fill Value message (message type 0x0005).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::fields::ensure_len;

/// When storage space is allocated.
pub const ALLOC_TIME_LATE: u8 = 2;
/// Fill value write time: on allocation.
pub const WRITE_TIME_ON_ALLOC: u8 = 0;
/// Fill value write time: only if a fill value was set.
pub const WRITE_TIME_IF_SET: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValueMessage {
    pub space_allocation_time: u8,
    pub write_time: u8,
    pub defined: bool,
    /// The fill value bytes, when one is stored.
    pub value: Option<Vec<u8>>,
}

impl FillValueMessage {
    /// The message written for new datasets: late allocation, value
    /// "defined" with no bytes (the library default).
    pub fn default_for(compound: bool) -> Self {
        FillValueMessage {
            space_allocation_time: ALLOC_TIME_LATE,
            write_time: if compound {
                WRITE_TIME_ON_ALLOC
            } else {
                WRITE_TIME_IF_SET
            },
            defined: true,
            value: None,
        }
    }

    pub fn parse(data: &[u8]) -> Result<FillValueMessage, FormatError> {
        ensure_len(data, 0, 1)?;
        match data[0] {
            1 | 2 => {
                ensure_len(data, 0, 4)?;
                let defined = data[3] != 0;
                let value = if data[0] == 1 || defined {
                    read_value(data, 4)?
                } else {
                    None
                };
                Ok(FillValueMessage {
                    space_allocation_time: data[1],
                    write_time: data[2],
                    defined,
                    value,
                })
            }
            3 => {
                ensure_len(data, 0, 2)?;
                let flags = data[1];
                let value = if flags & 0x20 != 0 {
                    read_value(data, 2)?
                } else {
                    None
                };
                Ok(FillValueMessage {
                    space_allocation_time: flags & 0x03,
                    write_time: (flags >> 2) & 0x03,
                    defined: flags & 0x20 != 0,
                    value,
                })
            }
            version => Err(FormatError::InvalidMessageVersion {
                msg_type: 0x0005,
                version,
            }),
        }
    }

    /// Serialize as a version 2 message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![
            2,
            self.space_allocation_time,
            self.write_time,
            u8::from(self.defined),
        ];
        if self.defined {
            let value = self.value.as_deref().unwrap_or(&[]);
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
        buf
    }
}

fn read_value(data: &[u8], pos: usize) -> Result<Option<Vec<u8>>, FormatError> {
    ensure_len(data, pos, 4)?;
    let size = LittleEndian::read_u32(&data[pos..]) as usize;
    ensure_len(data, pos + 4, size)?;
    Ok((size > 0).then(|| data[pos + 4..pos + 4 + size].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encoding() {
        assert_eq!(
            FillValueMessage::default_for(false).serialize(),
            vec![2, 2, 2, 1, 0, 0, 0, 0]
        );
        assert_eq!(
            FillValueMessage::default_for(true).serialize(),
            vec![2, 2, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn v2_with_value() {
        let msg = FillValueMessage {
            space_allocation_time: 1,
            write_time: 0,
            defined: true,
            value: Some(vec![9, 0, 0, 0]),
        };
        assert_eq!(FillValueMessage::parse(&msg.serialize()).unwrap(), msg);
    }

    #[test]
    fn v3_flags() {
        let mut data = vec![3, 0x20 | (2 << 2) | 2];
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);
        let msg = FillValueMessage::parse(&data).unwrap();
        assert_eq!(msg.space_allocation_time, 2);
        assert_eq!(msg.write_time, 2);
        assert!(msg.defined);
        assert_eq!(msg.value, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn unknown_version() {
        assert_eq!(
            FillValueMessage::parse(&[9]),
            Err(FormatError::InvalidMessageVersion {
                msg_type: 5,
                version: 9
            })
        );
    }
}
