//! HDF5 Datatype message (message type 0x0003).
//!
//! The writable classes are fixed-point, floating-point, fixed-length
//! string, compound, variable-length and array. Time, bit field, opaque,
//! reference and enumeration types are parsed and decoded too, so files
//! that use them still open. Besides the on-disk
//! encoding, every datatype can decode one element's bytes into a
//! [`Value`] and encode a [`Value`] back into exactly [`Datatype::size`]
//! bytes. Variable-length elements live in the global heap, which is passed
//! in explicitly.

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::byte_order::DatatypeByteOrder;
use crate::error::FormatError;
use crate::fields::{ensure_len, pad8};
use crate::fixed_point::{FixedPointLayout, FixedPointValue};
use crate::float_point;
use crate::global_heap::{
    decode_vl_reference, encode_vl_reference, GlobalHeapId, HeapAccess, HeapStore,
};
use crate::hdf_string::{CharacterSet, HdfString, StringPadding};
use crate::value::{shape_values, Value};

const CLASS_FIXED_POINT: u8 = 0;
const CLASS_FLOATING_POINT: u8 = 1;
const CLASS_TIME: u8 = 2;
const CLASS_STRING: u8 = 3;
const CLASS_BIT_FIELD: u8 = 4;
const CLASS_OPAQUE: u8 = 5;
const CLASS_COMPOUND: u8 = 6;
const CLASS_REFERENCE: u8 = 7;
const CLASS_ENUMERATION: u8 = 8;
const CLASS_VARIABLE_LENGTH: u8 = 9;
const CLASS_ARRAY: u8 = 10;

/// Datatypes nested deeper than this are treated as corrupt.
const MAX_NESTING: usize = 32;

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// What a reference-typed element points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    /// An object header address.
    Object,
    /// A dataset plus a stored selection.
    DatasetRegion,
}

/// A named value of an enumeration datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value, exactly one base-type element wide.
    pub value: Vec<u8>,
}

/// Parsed HDF5 datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0: Fixed-point (integer) types.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: Floating-point types.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 2: Time, stored as an integer count.
    Time {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_precision: u16,
    },
    /// Class 3: Fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4: Bit field.
    BitField {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5: Opaque bytes with an ASCII tag.
    Opaque {
        size: u32,
        tag: String,
    },
    /// Class 6: Compound type.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7: Object or region reference.
    Reference {
        size: u32,
        ref_type: ReferenceType,
    },
    /// Class 8: Enumeration over an integer base type.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: Variable-length sequence or string.
    ///
    /// `size` is the width of the stored heap reference: a 4-byte length,
    /// a file address and a 4-byte object index.
    VariableLength {
        size: u32,
        is_string: bool,
        padding: StringPadding,
        charset: CharacterSet,
        base_type: Box<Datatype>,
    },
    /// Class 10: Array type.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

/// Read a null-terminated string from `data` starting at `offset`.
/// Returns (string, bytes_consumed including the null terminator).
fn read_null_terminated_string(data: &[u8], offset: usize) -> Result<(String, usize), FormatError> {
    ensure_len(data, offset, 1)?;
    let remaining = &data[offset..];
    let null_pos = remaining
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::UnexpectedEof {
            expected: data.len() + 1,
            available: data.len(),
        })?;
    let name = String::from_utf8_lossy(&remaining[..null_pos]).into_owned();
    Ok((name, null_pos + 1))
}

/// Determine how many bytes are needed to encode `compound_size` as a byte offset (v3).
fn offset_bytes_for_size(compound_size: u32) -> usize {
    if compound_size <= 0xFF {
        1
    } else if compound_size <= 0xFFFF {
        2
    } else {
        4
    }
}

fn read_u32s(data: &[u8], pos: usize, n: usize) -> Result<Vec<u32>, FormatError> {
    ensure_len(data, pos, n * 4)?;
    Ok((0..n)
        .map(|i| LittleEndian::read_u32(&data[pos + 4 * i..]))
        .collect())
}

fn build_header(class: u8, version: u8, bf: [u8; 3], size: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = (class & 0x0F) | ((version & 0x0F) << 4);
    buf[1] = bf[0];
    buf[2] = bf[1];
    buf[3] = bf[2];
    LittleEndian::write_u32(&mut buf[4..8], size);
    buf
}

/// Address width encoded in a variable-length reference of `size` bytes.
fn vl_offset_size(size: u32) -> Result<u8, FormatError> {
    match size.checked_sub(8) {
        Some(os @ (2 | 4 | 8)) => Ok(os as u8),
        _ => Err(FormatError::InconsistentSize {
            what: "variable-length datatype size",
            value: u64::from(size),
        }),
    }
}

fn checked_element_size(datatype: &Datatype) -> Result<usize, FormatError> {
    match datatype.size() as usize {
        0 => Err(FormatError::InconsistentSize {
            what: "zero-sized element type",
            value: 0,
        }),
        n => Ok(n),
    }
}

fn integer_byte_order(bf0: u8) -> DatatypeByteOrder {
    if bf0 & 0x01 == 0 {
        DatatypeByteOrder::LittleEndian
    } else {
        DatatypeByteOrder::BigEndian
    }
}

fn byte_order_bits(byte_order: DatatypeByteOrder) -> u8 {
    u8::from(matches!(byte_order, DatatypeByteOrder::BigEndian))
}

fn unsigned_layout(size: u32, byte_order: DatatypeByteOrder, bit_offset: u16, bit_precision: u16) -> FixedPointLayout {
    FixedPointLayout {
        size,
        byte_order,
        signed: false,
        bit_offset,
        bit_precision,
    }
}

fn mismatch(expected: &'static str, value: &Value) -> FormatError {
    FormatError::TypeMismatch {
        expected,
        found: value.kind_name(),
    }
}

impl Datatype {
    /// Parse a datatype message from raw bytes.
    ///
    /// Returns `(Datatype, bytes_consumed)` for recursive parsing.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        Self::parse_nested(data, 0)
    }

    fn parse_nested(data: &[u8], depth: usize) -> Result<(Datatype, usize), FormatError> {
        if depth > MAX_NESTING {
            return Err(FormatError::InconsistentSize {
                what: "datatype nesting depth",
                value: depth as u64,
            });
        }
        // class+version, 24-bit class bit field, 4-byte size
        ensure_len(data, 0, 8)?;

        let class_id = data[0] & 0x0F;
        let version = (data[0] >> 4) & 0x0F;
        let bf0 = data[1];
        let bf1 = data[2];
        let size = LittleEndian::read_u32(&data[4..8]);
        let mut pos = 8;

        match class_id {
            CLASS_FIXED_POINT => {
                ensure_len(data, pos, 4)?;
                let byte_order = integer_byte_order(bf0);
                let signed = (bf0 >> 3) & 0x01 == 1;
                let bit_offset = LittleEndian::read_u16(&data[pos..pos + 2]);
                let bit_precision = LittleEndian::read_u16(&data[pos + 2..pos + 4]);
                pos += 4;
                Ok((
                    Datatype::FixedPoint {
                        size,
                        byte_order,
                        signed,
                        bit_offset,
                        bit_precision,
                    },
                    pos,
                ))
            }
            CLASS_FLOATING_POINT => {
                ensure_len(data, pos, 12)?;
                let byte_order = match (bf0 >> 6 & 0x01, bf0 & 0x01) {
                    (0, 0) => DatatypeByteOrder::LittleEndian,
                    (0, _) => DatatypeByteOrder::BigEndian,
                    (_, 1) => DatatypeByteOrder::Vax,
                    _ => return Err(FormatError::InvalidByteOrder(bf0 & 0x41)),
                };
                let bit_offset = LittleEndian::read_u16(&data[pos..pos + 2]);
                let bit_precision = LittleEndian::read_u16(&data[pos + 2..pos + 4]);
                let exponent_location = data[pos + 4];
                let exponent_size = data[pos + 5];
                let mantissa_location = data[pos + 6];
                let mantissa_size = data[pos + 7];
                let exponent_bias = LittleEndian::read_u32(&data[pos + 8..pos + 12]);
                pos += 12;
                Ok((
                    Datatype::FloatingPoint {
                        size,
                        byte_order,
                        sign_location: bf1,
                        bit_offset,
                        bit_precision,
                        exponent_location,
                        exponent_size,
                        mantissa_location,
                        mantissa_size,
                        exponent_bias,
                    },
                    pos,
                ))
            }
            CLASS_TIME => {
                ensure_len(data, pos, 2)?;
                let bit_precision = LittleEndian::read_u16(&data[pos..pos + 2]);
                pos += 2;
                Ok((
                    Datatype::Time {
                        size,
                        byte_order: integer_byte_order(bf0),
                        bit_precision,
                    },
                    pos,
                ))
            }
            CLASS_BIT_FIELD => {
                ensure_len(data, pos, 4)?;
                let bit_offset = LittleEndian::read_u16(&data[pos..pos + 2]);
                let bit_precision = LittleEndian::read_u16(&data[pos + 2..pos + 4]);
                pos += 4;
                Ok((
                    Datatype::BitField {
                        size,
                        byte_order: integer_byte_order(bf0),
                        bit_offset,
                        bit_precision,
                    },
                    pos,
                ))
            }
            CLASS_OPAQUE => {
                // tag length includes its NUL padding
                let tag_len = bf0 as usize;
                ensure_len(data, pos, tag_len)?;
                let raw = &data[pos..pos + tag_len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let tag = String::from_utf8_lossy(&raw[..end]).into_owned();
                pos += tag_len;
                Ok((Datatype::Opaque { size, tag }, pos))
            }
            CLASS_REFERENCE => {
                let ref_type = match bf0 & 0x0F {
                    0 => ReferenceType::Object,
                    1 => ReferenceType::DatasetRegion,
                    other => return Err(FormatError::InvalidReferenceType(other)),
                };
                Ok((Datatype::Reference { size, ref_type }, pos))
            }
            CLASS_ENUMERATION => {
                let num_members = usize::from(u16::from(bf0) | (u16::from(bf1) << 8));
                let (base_type, consumed) = Self::parse_nested(&data[pos..], depth + 1)?;
                pos += consumed;
                let base_size = checked_element_size(&base_type)?;
                if base_size != size as usize {
                    return Err(FormatError::InconsistentSize {
                        what: "enumeration size",
                        value: u64::from(size),
                    });
                }
                let mut names = Vec::with_capacity(num_members.min(data.len()));
                for _ in 0..num_members {
                    let (name, name_len) = read_null_terminated_string(data, pos)?;
                    // versions 1 and 2 pad each name to eight bytes
                    pos += if version < 3 { pad8(name_len) } else { name_len };
                    names.push(name);
                }
                ensure_len(data, pos, num_members * base_size)?;
                let members = names
                    .into_iter()
                    .map(|name| {
                        let value = data[pos..pos + base_size].to_vec();
                        pos += base_size;
                        EnumMember { name, value }
                    })
                    .collect();
                Ok((
                    Datatype::Enumeration {
                        base_type: Box::new(base_type),
                        members,
                    },
                    pos,
                ))
            }
            CLASS_STRING => {
                let padding = StringPadding::from_bits(bf0 & 0x0F)?;
                let charset = CharacterSet::from_bits((bf0 >> 4) & 0x0F)?;
                Ok((Datatype::String { size, padding, charset }, pos))
            }
            CLASS_COMPOUND => {
                let num_members = (bf0 as u16) | ((bf1 as u16) << 8);
                let mut members = Vec::with_capacity(num_members as usize);

                for _ in 0..num_members {
                    let (name, name_len) = read_null_terminated_string(data, pos)?;
                    let (byte_offset, datatype) = match version {
                        1 | 2 => {
                            // names are padded to an 8-byte boundary
                            pos += pad8(name_len);
                            ensure_len(data, pos, 4)?;
                            let off = u64::from(LittleEndian::read_u32(&data[pos..]));
                            pos += 4;
                            let mut dims = Vec::new();
                            if version == 1 {
                                // dimensionality, 3 reserved, permutation, 4 reserved, 4 dim sizes
                                ensure_len(data, pos, 28)?;
                                let ndims = (data[pos] as usize).min(4);
                                dims = read_u32s(data, pos + 12, ndims)?;
                                pos += 28;
                            }
                            let (dt, consumed) = Self::parse_nested(&data[pos..], depth + 1)?;
                            pos += consumed;
                            let dt = if dims.is_empty() {
                                dt
                            } else {
                                Datatype::Array {
                                    base_type: Box::new(dt),
                                    dimensions: dims,
                                }
                            };
                            (off, dt)
                        }
                        3 => {
                            pos += name_len;
                            let ob = offset_bytes_for_size(size);
                            ensure_len(data, pos, ob)?;
                            let off = LittleEndian::read_uint(&data[pos..], ob);
                            pos += ob;
                            let (dt, consumed) = Self::parse_nested(&data[pos..], depth + 1)?;
                            pos += consumed;
                            (off, dt)
                        }
                        _ => {
                            return Err(FormatError::InvalidDatatypeVersion {
                                class: class_id,
                                version,
                            })
                        }
                    };
                    if byte_offset + u64::from(datatype.size()) > u64::from(size) {
                        return Err(FormatError::InconsistentSize {
                            what: "compound member offset",
                            value: byte_offset,
                        });
                    }
                    members.push(CompoundMember {
                        name,
                        byte_offset,
                        datatype,
                    });
                }

                Ok((Datatype::Compound { size, members }, pos))
            }
            CLASS_VARIABLE_LENGTH => {
                let is_string = bf0 & 0x0F == 1;
                let (padding, charset) = if is_string {
                    (
                        StringPadding::from_bits((bf0 >> 4) & 0x0F)?,
                        CharacterSet::from_bits(bf1 & 0x0F)?,
                    )
                } else {
                    (StringPadding::NullTerminate, CharacterSet::Ascii)
                };
                let (base_type, consumed) = Self::parse_nested(&data[pos..], depth + 1)?;
                pos += consumed;
                Ok((
                    Datatype::VariableLength {
                        size,
                        is_string,
                        padding,
                        charset,
                        base_type: Box::new(base_type),
                    },
                    pos,
                ))
            }
            CLASS_ARRAY => {
                ensure_len(data, pos, 1)?;
                let ndims = data[pos] as usize;
                let dimensions = match version {
                    2 => {
                        // ndims, 3 reserved, sizes, permutation indices
                        pos += 4;
                        let dims = read_u32s(data, pos, ndims)?;
                        pos += ndims * 4;
                        ensure_len(data, pos, ndims * 4)?;
                        pos += ndims * 4;
                        dims
                    }
                    3 => {
                        pos += 1;
                        let dims = read_u32s(data, pos, ndims)?;
                        pos += ndims * 4;
                        dims
                    }
                    _ => {
                        return Err(FormatError::InvalidDatatypeVersion {
                            class: class_id,
                            version,
                        })
                    }
                };
                let (base_type, consumed) = Self::parse_nested(&data[pos..], depth + 1)?;
                pos += consumed;
                Ok((
                    Datatype::Array {
                        base_type: Box::new(base_type),
                        dimensions,
                    },
                    pos,
                ))
            }
            _ => Err(FormatError::InvalidDatatypeClass(class_id)),
        }
    }

    /// Serialize datatype to HDF5 message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let mut bf0 = 0u8;
                if matches!(byte_order, DatatypeByteOrder::BigEndian) {
                    bf0 |= 0x01;
                }
                if *signed {
                    bf0 |= 0x08;
                }
                let mut buf = build_header(CLASS_FIXED_POINT, 1, [bf0, 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                // mantissa normalization 2: implied leading one
                let mut bf0 = 0x20u8;
                match byte_order {
                    DatatypeByteOrder::BigEndian => bf0 |= 0x01,
                    DatatypeByteOrder::Vax => bf0 |= 0x41,
                    DatatypeByteOrder::LittleEndian => {}
                }
                let mut buf =
                    build_header(CLASS_FLOATING_POINT, 1, [bf0, *sign_location, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf.push(*exponent_location);
                buf.push(*exponent_size);
                buf.push(*mantissa_location);
                buf.push(*mantissa_size);
                buf.extend_from_slice(&exponent_bias.to_le_bytes());
                buf
            }
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => {
                let mut buf =
                    build_header(CLASS_TIME, 1, [byte_order_bits(*byte_order), 0, 0], *size);
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding.to_bits() | (charset.to_bits() << 4);
                build_header(CLASS_STRING, 1, [bf0, 0, 0], *size)
            }
            Datatype::BitField {
                size,
                byte_order,
                bit_offset,
                bit_precision,
            } => {
                let mut buf =
                    build_header(CLASS_BIT_FIELD, 1, [byte_order_bits(*byte_order), 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::Opaque { size, tag } => {
                // the length byte caps the padded tag at 248 bytes
                let tag = &tag.as_bytes()[..tag.len().min(247)];
                let padded = pad8(tag.len() + 1);
                let mut buf = build_header(CLASS_OPAQUE, 1, [padded as u8, 0, 0], *size);
                buf.extend_from_slice(tag);
                buf.resize(8 + padded, 0);
                buf
            }
            Datatype::Reference { size, ref_type } => {
                let bits = match ref_type {
                    ReferenceType::Object => 0,
                    ReferenceType::DatasetRegion => 1,
                };
                build_header(CLASS_REFERENCE, 1, [bits, 0, 0], *size)
            }
            Datatype::Enumeration { base_type, members } => {
                let n = members.len() as u16;
                let mut buf = build_header(
                    CLASS_ENUMERATION,
                    1,
                    [n as u8, (n >> 8) as u8, 0],
                    base_type.size(),
                );
                buf.extend_from_slice(&base_type.serialize());
                for m in members {
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.resize(buf.len() + pad8(m.name.len() + 1) - m.name.len(), 0);
                }
                for m in members {
                    buf.extend_from_slice(&m.value);
                }
                buf
            }
            Datatype::Compound { size, members } => {
                let version = if members
                    .iter()
                    .any(|m| matches!(m.datatype, Datatype::Array { .. }))
                {
                    2
                } else {
                    1
                };
                let n = members.len() as u16;
                let mut buf =
                    build_header(CLASS_COMPOUND, version, [n as u8, (n >> 8) as u8, 0], *size);
                for m in members {
                    let name_len = m.name.len() + 1;
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.resize(buf.len() + pad8(name_len) - m.name.len(), 0);
                    buf.extend_from_slice(&(m.byte_offset as u32).to_le_bytes());
                    if version == 1 {
                        // scalar member: no dimensions, zero permutation
                        buf.extend_from_slice(&[0u8; 28]);
                    }
                    buf.extend_from_slice(&m.datatype.serialize());
                }
                buf
            }
            Datatype::VariableLength {
                size,
                is_string,
                padding,
                charset,
                base_type,
            } => {
                let (bf0, bf1) = if *is_string {
                    (0x01 | (padding.to_bits() << 4), charset.to_bits())
                } else {
                    (0, 0)
                };
                let mut buf = build_header(CLASS_VARIABLE_LENGTH, 1, [bf0, bf1, 0], *size);
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let mut buf = build_header(CLASS_ARRAY, 2, [0, 0, 0], self.size());
                buf.push(dimensions.len() as u8);
                buf.extend_from_slice(&[0u8; 3]);
                for d in dimensions {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                for i in 0..dimensions.len() as u32 {
                    buf.extend_from_slice(&i.to_le_bytes());
                }
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
        }
    }

    /// Return the size in bytes of one element of this type.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::VariableLength { size, .. } => *size,
            Datatype::Enumeration { base_type, .. } => base_type.size(),
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let elem_count = dimensions.iter().fold(1u32, |n, &d| n.saturating_mul(d));
                base_type.size().saturating_mul(elem_count)
            }
        }
    }

    /// True for compound types.
    pub fn is_compound(&self) -> bool {
        matches!(self, Datatype::Compound { .. })
    }

    /// True when elements of this type refer into the global heap.
    pub fn uses_global_heap(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } => true,
            Datatype::Array { base_type, .. } => base_type.uses_global_heap(),
            Datatype::Compound { members, .. } => {
                members.iter().any(|m| m.datatype.uses_global_heap())
            }
            _ => false,
        }
    }

    /// Decode one element.
    ///
    /// `bytes` must be exactly [`Datatype::size`] long. Variable-length
    /// elements are looked up in `heap`, whose collections must already be
    /// resolved.
    pub fn read_value(&self, bytes: &[u8], heap: &dyn HeapAccess) -> Result<Value, FormatError> {
        let expected = self.size() as usize;
        if bytes.len() != expected {
            return Err(FormatError::ValueSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let layout = FixedPointLayout {
                    size: *size,
                    byte_order: *byte_order,
                    signed: *signed,
                    bit_offset: *bit_offset,
                    bit_precision: *bit_precision,
                };
                Ok(match layout.decode(bytes)? {
                    FixedPointValue::Signed(v) => Value::Int(v),
                    FixedPointValue::Unsigned(v) => Value::UInt(v),
                })
            }
            Datatype::FloatingPoint {
                size, byte_order, ..
            } => Ok(Value::Float(float_point::decode(bytes, *size, *byte_order)?)),
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => match unsigned_layout(*size, *byte_order, 0, *bit_precision).decode(bytes)? {
                FixedPointValue::Unsigned(v) => Ok(Value::UInt(v)),
                FixedPointValue::Signed(v) => Ok(Value::Int(v)),
            },
            Datatype::String {
                padding, charset, ..
            } => HdfString::from_stored(bytes, *padding, *charset)
                .decode()
                .map(Value::String),
            Datatype::BitField {
                size,
                byte_order,
                bit_offset,
                bit_precision,
            } => match unsigned_layout(*size, *byte_order, *bit_offset, *bit_precision)
                .decode(bytes)?
            {
                FixedPointValue::Unsigned(v) => Ok(Value::UInt(v)),
                FixedPointValue::Signed(v) => Ok(Value::Int(v)),
            },
            Datatype::Opaque { .. } => Ok(Value::Bytes(bytes.to_vec())),
            Datatype::Reference {
                ref_type: ReferenceType::Object,
                size: 1..=8,
            } => Ok(Value::UInt(LittleEndian::read_uint(bytes, bytes.len()))),
            Datatype::Reference { .. } => Ok(Value::Bytes(bytes.to_vec())),
            Datatype::Enumeration { base_type, members } => {
                match members.iter().find(|m| m.value == bytes) {
                    Some(m) => Ok(Value::String(m.name.clone())),
                    None => base_type.read_value(bytes, heap),
                }
            }
            Datatype::Compound { members, .. } => {
                let mut out = Vec::with_capacity(members.len());
                for m in members {
                    let start = m.byte_offset as usize;
                    let end = start + m.datatype.size() as usize;
                    ensure_len(bytes, start, end - start)?;
                    out.push((m.name.clone(), m.datatype.read_value(&bytes[start..end], heap)?));
                }
                Ok(Value::Compound(out))
            }
            Datatype::VariableLength {
                size,
                is_string,
                padding,
                charset,
                base_type,
            } => {
                let (length, id) = decode_vl_reference(bytes, vl_offset_size(*size)?)?;
                let payload: &[u8] = if length == 0 {
                    &[]
                } else {
                    heap.get_object(id)?
                };
                if *is_string {
                    let n = (length as usize).min(payload.len());
                    return HdfString::from_stored(&payload[..n], *padding, *charset)
                        .decode()
                        .map(Value::String);
                }
                if length == 0 {
                    return Ok(Value::Sequence(Vec::new()));
                }
                let bs = checked_element_size(base_type)?;
                let needed = length as usize * bs;
                if payload.len() < needed {
                    return Err(FormatError::InconsistentSize {
                        what: "variable-length payload",
                        value: payload.len() as u64,
                    });
                }
                payload[..needed]
                    .chunks(bs)
                    .map(|c| base_type.read_value(c, heap))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Sequence)
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let bs = checked_element_size(base_type)?;
                let flat = bytes
                    .chunks(bs)
                    .map(|c| base_type.read_value(c, heap))
                    .collect::<Result<Vec<_>, _>>()?;
                let dims: Vec<u64> = dimensions.iter().map(|&d| u64::from(d)).collect();
                Ok(shape_values(flat, &dims))
            }
        }
    }

    /// Encode one element into exactly [`Datatype::size`] bytes.
    ///
    /// Variable-length payloads are appended to `heap`; an empty payload is
    /// stored as a zero-length reference without a heap object.
    pub fn write_value(&self, value: &Value, heap: &mut dyn HeapStore) -> Result<Vec<u8>, FormatError> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let layout = FixedPointLayout {
                    size: *size,
                    byte_order: *byte_order,
                    signed: *signed,
                    bit_offset: *bit_offset,
                    bit_precision: *bit_precision,
                };
                match value {
                    Value::Int(v) => layout.encode_signed(*v),
                    Value::UInt(v) => layout.encode_unsigned(*v),
                    other => Err(mismatch("integer", other)),
                }
            }
            Datatype::FloatingPoint {
                size, byte_order, ..
            } => {
                let v = match value {
                    Value::Float(f) => *f,
                    Value::Int(i) => *i as f64,
                    Value::UInt(u) => *u as f64,
                    other => return Err(mismatch("float", other)),
                };
                float_point::encode(v, *size, *byte_order)
            }
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => {
                let layout = unsigned_layout(*size, *byte_order, 0, *bit_precision);
                match value {
                    Value::UInt(v) => layout.encode_unsigned(*v),
                    Value::Int(v @ 0..) => layout.encode_unsigned(*v as u64),
                    other => Err(mismatch("unsigned integer", other)),
                }
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => match value {
                Value::String(s) => {
                    HdfString::new(s, *padding, *charset)?.to_fixed(*size as usize)
                }
                other => Err(mismatch("string", other)),
            },
            Datatype::BitField {
                size,
                byte_order,
                bit_offset,
                bit_precision,
            } => {
                let layout = unsigned_layout(*size, *byte_order, *bit_offset, *bit_precision);
                match value {
                    Value::UInt(v) => layout.encode_unsigned(*v),
                    Value::Int(v @ 0..) => layout.encode_unsigned(*v as u64),
                    other => Err(mismatch("unsigned integer", other)),
                }
            }
            Datatype::Opaque { size, .. } | Datatype::Reference { size, .. } => match value {
                Value::Bytes(b) if b.len() == *size as usize => Ok(b.clone()),
                Value::Bytes(b) => Err(FormatError::ValueSizeMismatch {
                    expected: *size as usize,
                    actual: b.len(),
                }),
                Value::UInt(address)
                    if matches!(self, Datatype::Reference { ref_type: ReferenceType::Object, .. })
                        && (1..=8).contains(size) =>
                {
                    let n = *size as usize;
                    if n < 8 && *address >> (8 * n) != 0 {
                        return Err(FormatError::ValueOutOfRange {
                            value: address.to_string(),
                            precision: (8 * n) as u16,
                        });
                    }
                    let mut buf = vec![0u8; n];
                    LittleEndian::write_uint(&mut buf, *address, n);
                    Ok(buf)
                }
                other => Err(mismatch("bytes", other)),
            },
            Datatype::Enumeration { base_type, members } => match value {
                Value::String(name) => members
                    .iter()
                    .find(|m| m.name == *name)
                    .map(|m| m.value.clone())
                    .ok_or_else(|| mismatch("enumeration member", value)),
                other => base_type.write_value(other, heap),
            },
            Datatype::Compound { size, members } => {
                let Value::Compound(fields) = value else {
                    return Err(mismatch("compound", value));
                };
                let mut buf = vec![0u8; *size as usize];
                for m in members {
                    let v = fields
                        .iter()
                        .find(|(n, _)| *n == m.name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| FormatError::MissingCompoundMember(m.name.clone()))?;
                    let bytes = m.datatype.write_value(v, heap)?;
                    let start = m.byte_offset as usize;
                    if start + bytes.len() > buf.len() {
                        return Err(FormatError::InconsistentSize {
                            what: "compound member offset",
                            value: m.byte_offset,
                        });
                    }
                    buf[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                Ok(buf)
            }
            Datatype::VariableLength {
                size,
                is_string,
                padding,
                charset,
                base_type,
            } => {
                let offset_size = vl_offset_size(*size)?;
                let (length, payload) = if *is_string {
                    let Value::String(s) = value else {
                        return Err(mismatch("string", value));
                    };
                    let s = HdfString::new(s, *padding, *charset)?;
                    (s.as_bytes().len(), s.as_bytes().to_vec())
                } else {
                    let (Value::Sequence(items) | Value::Array(items)) = value else {
                        return Err(mismatch("sequence", value));
                    };
                    let mut payload = Vec::with_capacity(items.len() * base_type.size() as usize);
                    for item in items {
                        payload.extend_from_slice(&base_type.write_value(item, heap)?);
                    }
                    (items.len(), payload)
                };
                let length = u32::try_from(length).map_err(|_| FormatError::InconsistentSize {
                    what: "variable-length element count",
                    value: length as u64,
                })?;
                let id = if payload.is_empty() {
                    GlobalHeapId {
                        collection_address: 0,
                        index: 0,
                    }
                } else {
                    heap.put_object(&payload)?
                };
                Ok(encode_vl_reference(length, id, offset_size))
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let mut buf = Vec::with_capacity(self.size() as usize);
                write_shaped(base_type, dimensions, value, heap, &mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Collect the global heap collections referenced by one element.
    ///
    /// Only the element's own references are followed; sequences whose base
    /// type is itself variable-length are not descended into.
    pub fn heap_references(&self, bytes: &[u8], out: &mut BTreeSet<u64>) -> Result<(), FormatError> {
        match self {
            Datatype::VariableLength { size, .. } => {
                let (length, id) = decode_vl_reference(bytes, vl_offset_size(*size)?)?;
                if length > 0 {
                    out.insert(id.collection_address);
                }
                Ok(())
            }
            Datatype::Compound { members, .. } => {
                for m in members.iter().filter(|m| m.datatype.uses_global_heap()) {
                    let start = m.byte_offset as usize;
                    let len = m.datatype.size() as usize;
                    ensure_len(bytes, start, len)?;
                    m.datatype.heap_references(&bytes[start..start + len], out)?;
                }
                Ok(())
            }
            Datatype::Array { base_type, .. } if base_type.uses_global_heap() => {
                let bs = checked_element_size(base_type)?;
                for c in bytes.chunks(bs) {
                    base_type.heap_references(c, out)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn write_shaped(
    base: &Datatype,
    dims: &[u32],
    value: &Value,
    heap: &mut dyn HeapStore,
    buf: &mut Vec<u8>,
) -> Result<(), FormatError> {
    let Some((&first, rest)) = dims.split_first() else {
        buf.extend_from_slice(&base.write_value(value, heap)?);
        return Ok(());
    };
    let Value::Array(items) = value else {
        return Err(mismatch("array", value));
    };
    if items.len() != first as usize {
        return Err(FormatError::ArrayShapeMismatch {
            expected: first as usize,
            actual: items.len(),
        });
    }
    for item in items {
        write_shaped(base, rest, item, heap, buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::FileAllocation;
    use crate::global_heap::{GlobalHeap, HeapWriter};
    use crate::type_builders::{
        make_f32_type, make_f64_type, make_i32_type, make_u8_type, make_vl_sequence_type,
        make_vl_string_type, CompoundTypeBuilder,
    };
    use crate::value::FromValue;

    /// A heap that holds nothing; fixed-size types never touch it.
    struct NoHeap;

    impl HeapAccess for NoHeap {
        fn get_object(&self, id: GlobalHeapId) -> Result<&[u8], FormatError> {
            Err(FormatError::GlobalHeapCollectionNotLoaded(id.collection_address))
        }
    }

    impl HeapStore for NoHeap {
        fn put_object(&mut self, _data: &[u8]) -> Result<GlobalHeapId, FormatError> {
            Err(FormatError::GlobalHeapCollectionNotLoaded(0))
        }
    }

    // Helper to build a fixed-point datatype message
    fn build_fixed_point(size: u32, be: bool, signed: bool, bit_offset: u16, bit_precision: u16) -> Vec<u8> {
        let bf0 = if be { 0x01 } else { 0x00 } | if signed { 0x08 } else { 0x00 };
        let mut buf = build_header(0, 1, [bf0, 0, 0], size);
        buf.extend_from_slice(&bit_offset.to_le_bytes());
        buf.extend_from_slice(&bit_precision.to_le_bytes());
        buf
    }

    #[test]
    fn test_fixed_point_reference_bytes() {
        let bytes = make_i32_type().serialize();
        assert_eq!(bytes, vec![0x10, 0x08, 0, 0, 4, 0, 0, 0, 0, 0, 32, 0]);
        let (dt, consumed) = Datatype::parse(&bytes).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(dt, make_i32_type());
    }

    #[test]
    fn test_fixed_point_u16_be() {
        let data = build_fixed_point(2, true, false, 0, 16);
        let (dt, _) = Datatype::parse(&data).unwrap();
        match &dt {
            Datatype::FixedPoint { byte_order, signed, size, .. } => {
                assert_eq!(*byte_order, DatatypeByteOrder::BigEndian);
                assert!(!signed);
                assert_eq!(*size, 2);
            }
            _ => panic!("expected FixedPoint"),
        }
        assert_eq!(dt.read_value(&[0x01, 0x02], &NoHeap).unwrap(), Value::UInt(0x0102));
        assert_eq!(dt.write_value(&Value::UInt(0xBEEF), &mut NoHeap).unwrap(), vec![0xBE, 0xEF]);
    }

    #[test]
    fn test_float_f64_reference_bytes() {
        let bytes = make_f64_type().serialize();
        assert_eq!(&bytes[..8], &[0x11, 0x20, 63, 0, 8, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[0, 0, 64, 0, 52, 11, 0, 52, 0xFF, 0x03, 0, 0]);
        let (dt, consumed) = Datatype::parse(&bytes).unwrap();
        assert_eq!(consumed, 20);
        assert_eq!(dt, make_f64_type());
    }

    #[test]
    fn test_float_values() {
        let f32_type = make_f32_type();
        let bytes = f32_type.write_value(&Value::Float(2.5), &mut NoHeap).unwrap();
        assert_eq!(bytes, 2.5f32.to_le_bytes());
        assert_eq!(f32_type.read_value(&bytes, &NoHeap).unwrap(), Value::Float(2.5));
        // integers widen into floats on write
        let b = make_f64_type().write_value(&Value::Int(3), &mut NoHeap).unwrap();
        assert_eq!(b, 3.0f64.to_le_bytes());
    }

    #[test]
    fn test_fixed_string() {
        let dt = Datatype::String {
            size: 6,
            padding: StringPadding::SpacePad,
            charset: CharacterSet::Ascii,
        };
        let bytes = dt.serialize();
        assert_eq!(&bytes[..4], &[0x13, 0x02, 0, 0]);
        assert_eq!(Datatype::parse(&bytes).unwrap(), (dt.clone(), 8));
        let stored = dt.write_value(&Value::String("abc".into()), &mut NoHeap).unwrap();
        assert_eq!(stored, b"abc   ".to_vec());
        assert_eq!(dt.read_value(&stored, &NoHeap).unwrap(), Value::String("abc".into()));
        assert!(matches!(
            dt.write_value(&Value::String("toolong".into()), &mut NoHeap),
            Err(FormatError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_compound_v1_layout() {
        let dt = CompoundTypeBuilder::new()
            .i32_field("id")
            .f64_field("value")
            .build();
        assert_eq!(dt.size(), 12);
        let bytes = dt.serialize();
        // class 6 version 1, two members
        assert_eq!(&bytes[..4], &[0x16, 2, 0, 0]);
        // "id\0" padded to 8, offset 0, 28 bytes of dimension info
        assert_eq!(&bytes[8..16], b"id\0\0\0\0\0\0");
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        let (parsed, consumed) = Datatype::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, dt);

        let v = Value::Compound(vec![
            ("id".into(), Value::Int(7)),
            ("value".into(), Value::Float(0.5)),
        ]);
        let raw = dt.write_value(&v, &mut NoHeap).unwrap();
        assert_eq!(raw.len(), 12);
        assert_eq!(dt.read_value(&raw, &NoHeap).unwrap(), v);
    }

    #[test]
    fn test_compound_missing_member() {
        let dt = CompoundTypeBuilder::new().i32_field("a").i32_field("b").build();
        let v = Value::Compound(vec![("a".into(), Value::Int(1))]);
        assert_eq!(
            dt.write_value(&v, &mut NoHeap),
            Err(FormatError::MissingCompoundMember("b".into()))
        );
    }

    #[test]
    fn test_compound_with_array_member_is_v2() {
        let arr = Datatype::Array {
            base_type: Box::new(make_u8_type()),
            dimensions: vec![3],
        };
        let dt = CompoundTypeBuilder::new().field("rgb", arr).i32_field("n").build();
        let bytes = dt.serialize();
        assert_eq!(bytes[0], 0x26);
        let (parsed, _) = Datatype::parse(&bytes).unwrap();
        assert_eq!(parsed, dt);
    }

    #[test]
    fn test_compound_v1_member_dims_become_array() {
        let mut buf = build_header(6, 1, [1, 0, 0], 8);
        buf.extend_from_slice(b"xy\0\0\0\0\0\0");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&[0; 3]);
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0; 12]);
        buf.extend_from_slice(&make_i32_type().serialize());
        let (dt, _) = Datatype::parse(&buf).unwrap();
        let Datatype::Compound { members, .. } = dt else {
            panic!("expected compound");
        };
        assert_eq!(
            members[0].datatype,
            Datatype::Array {
                base_type: Box::new(make_i32_type()),
                dimensions: vec![2]
            }
        );
    }

    #[test]
    fn test_array_shaping() {
        let dt = Datatype::Array {
            base_type: Box::new(make_i32_type()),
            dimensions: vec![2, 3],
        };
        assert_eq!(dt.size(), 24);
        let bytes = dt.serialize();
        assert_eq!(bytes[0], 0x2A);
        assert_eq!(Datatype::parse(&bytes).unwrap().0, dt);

        let nested = Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::Array(vec![Value::Int(4), Value::Int(5), Value::Int(6)]),
        ]);
        let raw = dt.write_value(&nested, &mut NoHeap).unwrap();
        assert_eq!(&raw[..8], &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(dt.read_value(&raw, &NoHeap).unwrap(), nested);

        let ragged = Value::Array(vec![Value::Array(vec![Value::Int(1)])]);
        assert!(matches!(
            dt.write_value(&ragged, &mut NoHeap),
            Err(FormatError::ArrayShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_array_v3() {
        let mut buf = build_header(10, 3, [0, 0, 0], 8);
        buf.push(1);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&make_i32_type().serialize());
        let (dt, consumed) = Datatype::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(dt.size(), 8);
    }

    #[test]
    fn test_vl_string_through_heap() {
        let dt = make_vl_string_type(CharacterSet::Utf8, 8);
        assert_eq!(dt.size(), 16);
        let (parsed, _) = Datatype::parse(&dt.serialize()).unwrap();
        assert_eq!(parsed, dt);
        assert!(dt.uses_global_heap());

        let mut heap = GlobalHeap::new(8);
        let mut alloc = FileAllocation::new();
        let raw = {
            let mut w = HeapWriter {
                heap: &mut heap,
                alloc: &mut alloc,
            };
            dt.write_value(&Value::String("héllo".into()), &mut w).unwrap()
        };
        assert_eq!(raw.len(), 16);
        assert_eq!(LittleEndian::read_u32(&raw), 6);
        assert_eq!(
            dt.read_value(&raw, &heap).unwrap(),
            Value::String("héllo".into())
        );
        let mut refs = BTreeSet::new();
        dt.heap_references(&raw, &mut refs).unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_vl_empty_needs_no_heap() {
        let dt = make_vl_string_type(CharacterSet::Ascii, 8);
        let raw = dt.write_value(&Value::String(String::new()), &mut NoHeap).unwrap();
        assert_eq!(raw, vec![0u8; 16]);
        assert_eq!(dt.read_value(&raw, &NoHeap).unwrap(), Value::String(String::new()));
        let mut refs = BTreeSet::new();
        dt.heap_references(&raw, &mut refs).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_vl_sequence() {
        let dt = make_vl_sequence_type(make_i32_type(), 4);
        assert_eq!(dt.size(), 12);
        let mut heap = GlobalHeap::new(4);
        let mut alloc = FileAllocation::new();
        let seq = Value::Sequence(vec![Value::Int(1), Value::Int(-2), Value::Int(3)]);
        let raw = dt
            .write_value(
                &seq,
                &mut HeapWriter {
                    heap: &mut heap,
                    alloc: &mut alloc,
                },
            )
            .unwrap();
        assert_eq!(dt.read_value(&raw, &heap).unwrap(), seq);
    }

    #[test]
    fn test_vl_dangling_reference() {
        let dt = make_vl_string_type(CharacterSet::Ascii, 8);
        let heap = GlobalHeap::new(8);
        let raw = encode_vl_reference(
            3,
            GlobalHeapId {
                collection_address: 4096,
                index: 1,
            },
            8,
        );
        let err = dt.read_value(&raw, &heap).unwrap_err();
        assert_eq!(err, FormatError::GlobalHeapCollectionNotLoaded(4096));
    }

    #[test]
    fn test_window_size_checked() {
        assert!(matches!(
            make_i32_type().read_value(&[0; 3], &NoHeap),
            Err(FormatError::ValueSizeMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            make_i32_type().write_value(&Value::Float(1.0), &mut NoHeap),
            Err(FormatError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_float_reserved_byte_order() {
        let mut bytes = make_f32_type().serialize();
        bytes[1] = (bytes[1] & !0x01) | 0x40;
        assert_eq!(Datatype::parse(&bytes), Err(FormatError::InvalidByteOrder(0x40)));
        bytes[1] |= 0x01;
        let (dt, _) = Datatype::parse(&bytes).unwrap();
        assert!(matches!(
            dt,
            Datatype::FloatingPoint { byte_order: DatatypeByteOrder::Vax, .. }
        ));
    }

    #[test]
    fn test_time_and_bit_field() {
        let mut time = build_header(2, 1, [0x01, 0, 0], 4);
        time.extend_from_slice(&32u16.to_le_bytes());
        let (dt, consumed) = Datatype::parse(&time).unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(
            dt,
            Datatype::Time {
                size: 4,
                byte_order: DatatypeByteOrder::BigEndian,
                bit_precision: 32,
            }
        );
        assert_eq!(dt.serialize(), time);
        assert_eq!(dt.read_value(&[0, 0, 1, 0], &NoHeap).unwrap(), Value::UInt(256));

        let mut bits = build_header(4, 1, [0, 0, 0], 2);
        bits.extend_from_slice(&4u16.to_le_bytes());
        bits.extend_from_slice(&8u16.to_le_bytes());
        let (dt, _) = Datatype::parse(&bits).unwrap();
        assert_eq!(dt.size(), 2);
        assert_eq!(dt.serialize(), bits);
        assert_eq!(dt.read_value(&[0xA5, 0x0F], &NoHeap).unwrap(), Value::UInt(0xFA));
        assert_eq!(dt.write_value(&Value::UInt(0xFA), &mut NoHeap).unwrap(), vec![0xA0, 0x0F]);
    }

    #[test]
    fn test_opaque_and_reference() {
        let mut opaque = build_header(5, 1, [8, 0, 0], 3);
        opaque.extend_from_slice(b"rgb\0\0\0\0\0");
        let (dt, consumed) = Datatype::parse(&opaque).unwrap();
        assert_eq!(consumed, 16);
        assert_eq!(dt, Datatype::Opaque { size: 3, tag: "rgb".into() });
        assert_eq!(dt.serialize(), opaque);
        assert_eq!(dt.read_value(&[1, 2, 3], &NoHeap).unwrap(), Value::Bytes(vec![1, 2, 3]));
        let pixel: Vec<u8> = FromValue::from_value(Value::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(pixel, vec![1, 2, 3]);

        let object = build_header(7, 1, [0, 0, 0], 8);
        let (dt, _) = Datatype::parse(&object).unwrap();
        assert_eq!(dt, Datatype::Reference { size: 8, ref_type: ReferenceType::Object });
        assert_eq!(dt.read_value(&800u64.to_le_bytes(), &NoHeap).unwrap(), Value::UInt(800));
        assert_eq!(dt.write_value(&Value::UInt(800), &mut NoHeap).unwrap(), 800u64.to_le_bytes());

        let region = build_header(7, 1, [1, 0, 0], 12);
        let (dt, _) = Datatype::parse(&region).unwrap();
        assert_eq!(dt.read_value(&[7; 12], &NoHeap).unwrap(), Value::Bytes(vec![7; 12]));
        assert_eq!(
            Datatype::parse(&build_header(7, 1, [5, 0, 0], 8)),
            Err(FormatError::InvalidReferenceType(5))
        );
    }

    #[test]
    fn test_enumeration() {
        let mut bytes = build_header(8, 3, [2, 0, 0], 1);
        bytes.extend_from_slice(&make_u8_type().serialize());
        bytes.extend_from_slice(b"RED\0GREEN\0");
        bytes.extend_from_slice(&[0, 1]);
        let (dt, consumed) = Datatype::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        let Datatype::Enumeration { members, .. } = &dt else {
            panic!("expected enumeration, got {dt:?}");
        };
        assert_eq!(members[1], EnumMember { name: "GREEN".into(), value: vec![1] });
        assert_eq!(dt.read_value(&[1], &NoHeap).unwrap(), Value::String("GREEN".into()));
        assert_eq!(dt.read_value(&[9], &NoHeap).unwrap(), Value::UInt(9));
        assert_eq!(dt.write_value(&Value::String("RED".into()), &mut NoHeap).unwrap(), vec![0]);
        assert!(dt.write_value(&Value::String("BLUE".into()), &mut NoHeap).is_err());

        // written as version 1 with padded names
        let v1 = dt.serialize();
        assert_eq!(&v1[20..28], b"RED\0\0\0\0\0");
        assert_eq!(Datatype::parse(&v1).unwrap(), (dt, v1.len()));
    }

    #[test]
    fn test_unsupported_class_and_version() {
        let reserved = build_header(11, 1, [0, 0, 0], 1);
        assert_eq!(Datatype::parse(&reserved), Err(FormatError::InvalidDatatypeClass(11)));
        let arr_v1 = build_header(10, 1, [0, 0, 0], 4);
        assert_eq!(
            Datatype::parse(&arr_v1),
            Err(FormatError::InvalidDatatypeVersion { class: 10, version: 1 })
        );
    }

    #[test]
    fn test_truncated_and_deeply_nested() {
        assert!(matches!(
            Datatype::parse(&[0x10, 0x08, 0, 0]),
            Err(FormatError::UnexpectedEof { .. })
        ));
        // VL of VL of ... with no terminating base type
        let mut buf = Vec::new();
        for _ in 0..40 {
            buf.extend_from_slice(&build_header(9, 1, [0, 0, 0], 16));
        }
        assert!(Datatype::parse(&buf).is_err());
    }
}
