//! HDF5 Data Layout message (message type 0x0008).
//!
//! Versions 1 through 3 are read. Chunked storage is recognised so the
//! dataset can still be listed, but its data cannot be read.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::fields::{ensure_len, read_address, read_length, write_offset, UNDEFINED_ADDRESS};

const CLASS_COMPACT: u8 = 0;
const CLASS_CONTIGUOUS: u8 = 1;
const CLASS_CHUNKED: u8 = 2;

/// Parsed HDF5 data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Compact: data stored inline in the message.
    Compact {
        /// The inline raw data bytes.
        data: Vec<u8>,
    },
    /// Contiguous: data stored at a single address in the file.
    Contiguous {
        /// File address of the data, or `None` if undefined (all 0xFF).
        address: Option<u64>,
        /// Size of the data in bytes.
        size: u64,
    },
    /// Chunked: data stored in chunks via a B-tree. Not readable.
    Chunked {
        /// Layout message version.
        version: u8,
    },
}

impl DataLayout {
    /// Parse a data layout message from raw message bytes.
    ///
    /// `offset_size` and `length_size` come from the superblock.
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        ensure_len(data, 0, 2)?;
        match data[0] {
            1 | 2 => Self::parse_v1(data, offset_size),
            3 => Self::parse_v3(data, offset_size, length_size),
            version => Err(FormatError::InvalidLayoutVersion(version)),
        }
    }

    fn parse_v1(data: &[u8], offset_size: u8) -> Result<DataLayout, FormatError> {
        // version, dimensionality, class, 5 reserved
        ensure_len(data, 0, 8)?;
        let version = data[0];
        let dimensionality = data[1] as usize;
        let class = data[2];
        let mut pos = 8;

        let address = if class == CLASS_COMPACT {
            None
        } else {
            let a = read_address(data, pos, offset_size)?;
            pos += offset_size as usize;
            a
        };

        ensure_len(data, pos, dimensionality * 4)?;
        let dims: Vec<u64> = (0..dimensionality)
            .map(|i| u64::from(LittleEndian::read_u32(&data[pos + 4 * i..])))
            .collect();
        pos += dimensionality * 4;

        match class {
            CLASS_COMPACT => {
                ensure_len(data, pos, 4)?;
                let size = LittleEndian::read_u32(&data[pos..]) as usize;
                ensure_len(data, pos + 4, size)?;
                Ok(DataLayout::Compact {
                    data: data[pos + 4..pos + 4 + size].to_vec(),
                })
            }
            // the last dimension is the element size
            CLASS_CONTIGUOUS => Ok(DataLayout::Contiguous {
                address,
                size: dims.iter().product(),
            }),
            CLASS_CHUNKED => Ok(DataLayout::Chunked { version }),
            other => Err(FormatError::InvalidLayoutClass(other)),
        }
    }

    fn parse_v3(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        let pos = 2;
        match data[1] {
            CLASS_COMPACT => {
                ensure_len(data, pos, 2)?;
                let data_size = LittleEndian::read_u16(&data[pos..]) as usize;
                ensure_len(data, pos + 2, data_size)?;
                Ok(DataLayout::Compact {
                    data: data[pos + 2..pos + 2 + data_size].to_vec(),
                })
            }
            CLASS_CONTIGUOUS => {
                let address = read_address(data, pos, offset_size)?;
                let size = read_length(data, pos + offset_size as usize, length_size)?;
                Ok(DataLayout::Contiguous { address, size })
            }
            CLASS_CHUNKED => Ok(DataLayout::Chunked { version: 3 }),
            other => Err(FormatError::InvalidLayoutClass(other)),
        }
    }

    /// Serialize as a version 3 layout message.
    pub fn serialize(&self, offset_size: u8, length_size: u8) -> Result<Vec<u8>, FormatError> {
        let mut buf = vec![3u8];
        match self {
            DataLayout::Compact { data } => {
                let size = u16::try_from(data.len()).map_err(|_| FormatError::InconsistentSize {
                    what: "compact data size",
                    value: data.len() as u64,
                })?;
                buf.push(CLASS_COMPACT);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(data);
            }
            DataLayout::Contiguous { address, size } => {
                buf.push(CLASS_CONTIGUOUS);
                write_offset(&mut buf, address.unwrap_or(UNDEFINED_ADDRESS), offset_size);
                write_offset(&mut buf, *size, length_size);
            }
            DataLayout::Chunked { .. } => return Err(FormatError::ChunkedLayoutUnsupported),
        }
        Ok(buf)
    }
}
