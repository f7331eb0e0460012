//! Simplified type representations for the high-level API.

use std::fmt;

use basehdf5_format::attribute::AttributeMessage;
use basehdf5_format::datatype::{Datatype, ReferenceType};
use basehdf5_format::value::Value;

pub use basehdf5_format::type_builders::AttrValue;

/// Simplified datatype enum for the high-level API.
///
/// Maps from the detailed [`Datatype`] to a user-friendly representation.
#[derive(Debug, Clone, PartialEq)]
pub enum DType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    String,
    VariableLengthString,
    Sequence(Box<DType>),
    Compound(Vec<(String, DType)>),
    Array(Box<DType>, Vec<u32>),
    Other(String),
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::U8 => write!(f, "u8"),
            DType::U16 => write!(f, "u16"),
            DType::U32 => write!(f, "u32"),
            DType::U64 => write!(f, "u64"),
            DType::String => write!(f, "string"),
            DType::VariableLengthString => write!(f, "vlen_string"),
            DType::Sequence(base) => write!(f, "vlen<{base}>"),
            DType::Compound(fields) => {
                write!(f, "compound{{")?;
                for (i, (name, dt)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {dt}")?;
                }
                write!(f, "}}")
            }
            DType::Array(base, dims) => write!(f, "array<{base}, {dims:?}>"),
            DType::Other(desc) => write!(f, "other({desc})"),
        }
    }
}

/// Convert a low-level `Datatype` to a simplified `DType`.
pub(crate) fn classify_datatype(dt: &Datatype) -> DType {
    match dt {
        Datatype::FloatingPoint { size: 4, .. } => DType::F32,
        Datatype::FloatingPoint { size: 8, .. } => DType::F64,
        Datatype::FloatingPoint { size, .. } => DType::Other(format!("float{}", size * 8)),
        Datatype::FixedPoint { size, signed, .. } => match (size, signed) {
            (1, true) => DType::I8,
            (2, true) => DType::I16,
            (4, true) => DType::I32,
            (8, true) => DType::I64,
            (1, false) => DType::U8,
            (2, false) => DType::U16,
            (4, false) => DType::U32,
            (8, false) => DType::U64,
            _ => {
                let prefix = if *signed { "i" } else { "u" };
                DType::Other(format!("{prefix}{}", size * 8))
            }
        },
        Datatype::String { .. } => DType::String,
        Datatype::VariableLength {
            is_string: true, ..
        } => DType::VariableLengthString,
        Datatype::VariableLength { base_type, .. } => {
            DType::Sequence(Box::new(classify_datatype(base_type)))
        }
        Datatype::Compound { members, .. } => DType::Compound(
            members
                .iter()
                .map(|m| (m.name.clone(), classify_datatype(&m.datatype)))
                .collect(),
        ),
        Datatype::Array {
            base_type,
            dimensions,
        } => DType::Array(Box::new(classify_datatype(base_type)), dimensions.clone()),
        Datatype::Time { size, .. } => DType::Other(format!("time{}", size * 8)),
        Datatype::BitField { size, .. } => DType::Other(format!("bitfield{}", size * 8)),
        Datatype::Opaque { tag, .. } => DType::Other(format!("opaque({tag})")),
        Datatype::Reference {
            ref_type: ReferenceType::Object,
            ..
        } => DType::Other("object_reference".into()),
        Datatype::Reference { .. } => DType::Other("region_reference".into()),
        Datatype::Enumeration { base_type, .. } => {
            DType::Other(format!("enum<{}>", classify_datatype(base_type)))
        }
    }
}

/// Turn decoded attribute values into an [`AttrValue`].
///
/// Scalar attributes become the scalar variants, one-dimensional ones the
/// array variants. Returns `None` for shapes and types `AttrValue` cannot
/// express (compounds, sequences, unsigned arrays above `i64::MAX`).
pub(crate) fn to_attr_value(attr: &AttributeMessage, values: Vec<Value>) -> Option<AttrValue> {
    let scalar = attr.dataspace.rank() == 0;
    match &attr.datatype {
        Datatype::FloatingPoint { .. } => {
            let vals = values
                .into_iter()
                .map(|v| match v {
                    Value::Float(f) => Some(f),
                    _ => None,
                })
                .collect::<Option<Vec<f64>>>()?;
            if scalar {
                vals.first().copied().map(AttrValue::F64)
            } else {
                Some(AttrValue::F64Array(vals))
            }
        }
        Datatype::FixedPoint { signed: false, .. } if scalar => match values.first()? {
            Value::UInt(u) => Some(AttrValue::U64(*u)),
            _ => None,
        },
        Datatype::FixedPoint { .. } => {
            let vals = values
                .into_iter()
                .map(|v| match v {
                    Value::Int(i) => Some(i),
                    Value::UInt(u) => i64::try_from(u).ok(),
                    _ => None,
                })
                .collect::<Option<Vec<i64>>>()?;
            if scalar {
                vals.first().copied().map(AttrValue::I64)
            } else {
                Some(AttrValue::I64Array(vals))
            }
        }
        Datatype::String { .. }
        | Datatype::VariableLength {
            is_string: true, ..
        } => {
            let mut strings = values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect::<Option<Vec<String>>>()?;
            match (scalar, &attr.datatype) {
                (false, _) => Some(AttrValue::StringArray(strings)),
                (true, Datatype::String { .. }) => strings.pop().map(AttrValue::String),
                (true, _) => strings.pop().map(AttrValue::VarString),
            }
        }
        _ => None,
    }
}
