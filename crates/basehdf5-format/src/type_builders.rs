//! Builder helpers for datatypes and attribute values.

use crate::attribute::AttributeMessage;
use crate::byte_order::DatatypeByteOrder;
use crate::dataspace::Dataspace;
use crate::datatype::{CompoundMember, Datatype};
use crate::error::FormatError;
use crate::global_heap::HeapStore;
use crate::hdf_string::{CharacterSet, StringPadding};
use crate::value::Value;

// ---- Datatype constructors ----

pub fn make_f64_type() -> Datatype {
    Datatype::FloatingPoint {
        size: 8,
        byte_order: DatatypeByteOrder::LittleEndian,
        sign_location: 63,
        bit_offset: 0,
        bit_precision: 64,
        exponent_location: 52,
        exponent_size: 11,
        mantissa_location: 0,
        mantissa_size: 52,
        exponent_bias: 1023,
    }
}

pub fn make_f32_type() -> Datatype {
    Datatype::FloatingPoint {
        size: 4,
        byte_order: DatatypeByteOrder::LittleEndian,
        sign_location: 31,
        bit_offset: 0,
        bit_precision: 32,
        exponent_location: 23,
        exponent_size: 8,
        mantissa_location: 0,
        mantissa_size: 23,
        exponent_bias: 127,
    }
}

/// A little-endian integer filling `size` bytes.
pub fn make_int_type(size: u32, signed: bool) -> Datatype {
    Datatype::FixedPoint {
        size,
        byte_order: DatatypeByteOrder::LittleEndian,
        signed,
        bit_offset: 0,
        bit_precision: (size * 8) as u16,
    }
}

pub fn make_i8_type() -> Datatype {
    make_int_type(1, true)
}

pub fn make_i16_type() -> Datatype {
    make_int_type(2, true)
}

pub fn make_i32_type() -> Datatype {
    make_int_type(4, true)
}

pub fn make_i64_type() -> Datatype {
    make_int_type(8, true)
}

pub fn make_u8_type() -> Datatype {
    make_int_type(1, false)
}

pub fn make_u16_type() -> Datatype {
    make_int_type(2, false)
}

pub fn make_u32_type() -> Datatype {
    make_int_type(4, false)
}

pub fn make_u64_type() -> Datatype {
    make_int_type(8, false)
}

pub fn make_fixed_string_type(size: u32, padding: StringPadding, charset: CharacterSet) -> Datatype {
    Datatype::String {
        size,
        padding,
        charset,
    }
}

/// Variable-length string whose heap references use `offset_size`-byte
/// addresses.
pub fn make_vl_string_type(charset: CharacterSet, offset_size: u8) -> Datatype {
    Datatype::VariableLength {
        size: 8 + u32::from(offset_size),
        is_string: true,
        padding: StringPadding::NullTerminate,
        charset,
        base_type: Box::new(make_u8_type()),
    }
}

/// Variable-length sequence of `base` elements.
pub fn make_vl_sequence_type(base: Datatype, offset_size: u8) -> Datatype {
    Datatype::VariableLength {
        size: 8 + u32::from(offset_size),
        is_string: false,
        padding: StringPadding::NullTerminate,
        charset: CharacterSet::Ascii,
        base_type: Box::new(base),
    }
}

pub fn make_array_type(base: Datatype, dimensions: &[u32]) -> Datatype {
    Datatype::Array {
        base_type: Box::new(base),
        dimensions: dimensions.to_vec(),
    }
}

// ---- Compound type builder ----

/// Builder for constructing HDF5 compound (struct) datatypes.
///
/// Members are packed in insertion order with no alignment padding.
pub struct CompoundTypeBuilder {
    fields: Vec<(String, Datatype)>,
}

impl CompoundTypeBuilder {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a named field with the given datatype.
    pub fn field(mut self, name: &str, datatype: Datatype) -> Self {
        self.fields.push((name.to_string(), datatype));
        self
    }

    /// Add an f64 field.
    pub fn f64_field(self, name: &str) -> Self {
        self.field(name, make_f64_type())
    }
    /// Add an f32 field.
    pub fn f32_field(self, name: &str) -> Self {
        self.field(name, make_f32_type())
    }
    /// Add an i32 field.
    pub fn i32_field(self, name: &str) -> Self {
        self.field(name, make_i32_type())
    }
    /// Add an i64 field.
    pub fn i64_field(self, name: &str) -> Self {
        self.field(name, make_i64_type())
    }
    /// Add a u8 field.
    pub fn u8_field(self, name: &str) -> Self {
        self.field(name, make_u8_type())
    }

    /// Build the compound datatype.
    pub fn build(self) -> Datatype {
        let mut offset = 0u64;
        let mut members = Vec::with_capacity(self.fields.len());
        for (name, dt) in self.fields {
            let sz = dt.size();
            members.push(CompoundMember {
                name,
                byte_offset: offset,
                datatype: dt,
            });
            offset += u64::from(sz);
        }
        Datatype::Compound {
            size: offset as u32,
            members,
        }
    }
}

impl Default for CompoundTypeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Attribute values ----

/// Convenient attribute values for the write API.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    F64(f64),
    F64Array(Vec<f64>),
    I64(i64),
    I64Array(Vec<i64>),
    U64(u64),
    /// Fixed-length UTF-8 string sized to its contents.
    String(String),
    StringArray(Vec<String>),
    /// Variable-length UTF-8 string stored in the global heap.
    VarString(String),
}

/// Encode `value` as an attribute message. Variable-length strings are
/// stored through `heap`.
pub fn build_attr_message(
    name: &str,
    value: &AttrValue,
    heap: &mut dyn HeapStore,
    offset_size: u8,
) -> Result<AttributeMessage, FormatError> {
    let (datatype, dataspace, values) = match value {
        AttrValue::F64(v) => (make_f64_type(), Dataspace::scalar(), vec![Value::Float(*v)]),
        AttrValue::F64Array(arr) => (
            make_f64_type(),
            Dataspace::simple(&[arr.len() as u64]),
            arr.iter().map(|&v| Value::Float(v)).collect(),
        ),
        AttrValue::I64(v) => (make_i64_type(), Dataspace::scalar(), vec![Value::Int(*v)]),
        AttrValue::I64Array(arr) => (
            make_i64_type(),
            Dataspace::simple(&[arr.len() as u64]),
            arr.iter().map(|&v| Value::Int(v)).collect(),
        ),
        AttrValue::U64(v) => (make_u64_type(), Dataspace::scalar(), vec![Value::UInt(*v)]),
        AttrValue::String(s) => (
            make_fixed_string_type(s.len().max(1) as u32, StringPadding::NullPad, CharacterSet::Utf8),
            Dataspace::scalar(),
            vec![Value::String(s.clone())],
        ),
        AttrValue::StringArray(arr) => {
            let max_len = arr.iter().map(|s| s.len()).max().unwrap_or(0).max(1);
            (
                make_fixed_string_type(max_len as u32, StringPadding::NullPad, CharacterSet::Utf8),
                Dataspace::simple(&[arr.len() as u64]),
                arr.iter().map(|s| Value::String(s.clone())).collect(),
            )
        }
        AttrValue::VarString(s) => (
            make_vl_string_type(CharacterSet::Utf8, offset_size),
            Dataspace::scalar(),
            vec![Value::String(s.clone())],
        ),
    };

    let mut raw_data = Vec::with_capacity(values.len() * datatype.size() as usize);
    for v in &values {
        raw_data.extend_from_slice(&datatype.write_value(v, heap)?);
    }
    Ok(AttributeMessage {
        name: name.to_string(),
        datatype,
        dataspace,
        raw_data,
    })
}
