//! HDF5 Dataspace message (message type 0x0001).

use log::warn;

use crate::error::FormatError;
use crate::fields::{ensure_len, read_length, write_offset};

/// Type of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Scalar (single element).
    Scalar,
    /// Simple (N-dimensional array).
    Simple,
    /// Null (no data).
    Null,
}

/// Parsed HDF5 dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// The type of this dataspace.
    pub space_type: DataspaceType,
    /// Current dimension sizes (empty for scalar).
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, if present. `u64::MAX` means unlimited.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    /// A single-element dataspace.
    pub fn scalar() -> Self {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    /// A fixed-size N-dimensional dataspace. An empty `dims` is scalar.
    pub fn simple(dims: &[u64]) -> Self {
        if dims.is_empty() {
            return Self::scalar();
        }
        Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: Some(dims.to_vec()),
        }
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Parse a dataspace message from raw message bytes.
    ///
    /// `length_size` is needed for dimension value width (from superblock).
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        ensure_len(data, 0, 4)?;

        let version = data[0];
        let rank = data[1];
        let flags = data[2];

        let (space_type, header_size) = match version {
            1 => {
                // v1: byte 3 and the next 4 bytes are reserved
                ensure_len(data, 0, 8)?;
                let st = if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                };
                (st, 8usize)
            }
            2 => {
                let st = match data[3] {
                    0 => DataspaceType::Scalar,
                    1 => DataspaceType::Simple,
                    2 => DataspaceType::Null,
                    other => return Err(FormatError::InvalidDataspaceType(other)),
                };
                (st, 4usize)
            }
            _ => return Err(FormatError::InvalidDataspaceVersion(version)),
        };

        let ls = length_size as usize;
        let mut pos = header_size;

        let mut dimensions = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dimensions.push(read_length(data, pos, length_size)?);
            pos += ls;
        }

        let max_dimensions = if flags & 0x01 != 0 {
            let mut max_dims = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                max_dims.push(read_length(data, pos, length_size)?);
                pos += ls;
            }
            Some(max_dims)
        } else {
            None
        };

        if version == 1 && flags & 0x02 != 0 {
            warn!("dataspace permutation indices present; ignored");
        }

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Serialize as a version 1 dataspace message.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 2 * self.rank() * length_size as usize);
        buf.push(1);
        buf.push(self.rank() as u8);
        buf.push(if self.max_dimensions.is_some() { 0x01 } else { 0x00 });
        buf.extend_from_slice(&[0u8; 5]);
        for &dim in &self.dimensions {
            write_offset(&mut buf, dim, length_size);
        }
        if let Some(max_dims) = &self.max_dimensions {
            for &md in max_dims {
                write_offset(&mut buf, md, length_size);
            }
        }
        buf
    }

    /// Total number of elements. Scalar = 1, Null = 0. Saturates at
    /// `u64::MAX` for corrupt dimensions.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self
                .dimensions
                .iter()
                .fold(1u64, |n, &d| n.saturating_mul(d)),
        }
    }
}
