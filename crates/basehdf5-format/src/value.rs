//! Semantic values produced and consumed by datatypes.

use crate::error::FormatError;

/// A decoded dataset element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed fixed-point.
    Int(i64),
    /// Unsigned fixed-point.
    UInt(u64),
    /// Floating-point, widened to `f64`.
    Float(f64),
    /// Fixed or variable-length string.
    String(String),
    /// Variable-length sequence of base-type values.
    Sequence(Vec<Value>),
    /// Array-typed value or one row of an N-dimensional read.
    Array(Vec<Value>),
    /// Compound members in declaration order.
    Compound(Vec<(String, Value)>),
    /// Uninterpreted bytes: opaque data and region references.
    Bytes(Vec<u8>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::UInt(_) => "unsigned integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Array(_) => "array",
            Value::Compound(_) => "compound",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Look up a compound member by name.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Compound(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Conversion from a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, FormatError>;
}

/// Conversion into a [`Value`] for writing.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch(expected: &'static str, v: &Value) -> FormatError {
    FormatError::TypeMismatch {
        expected,
        found: v.kind_name(),
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {$(
        impl FromValue for $t {
            fn from_value(value: Value) -> Result<Self, FormatError> {
                let out_of_range = |v: String| FormatError::ValueOutOfRange {
                    value: v,
                    precision: <$t>::BITS as u16,
                };
                match value {
                    Value::Int(i) => <$t>::try_from(i).map_err(|_| out_of_range(i.to_string())),
                    Value::UInt(u) => <$t>::try_from(u).map_err(|_| out_of_range(u.to_string())),
                    other => Err(mismatch(stringify!($t), &other)),
                }
            }
        }
    )*};
}

int_value!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! signed_into {
    ($($t:ty),*) => {$(
        impl IntoValue for $t {
            fn into_value(self) -> Value {
                Value::Int(i64::from(self))
            }
        }
    )*};
}

macro_rules! unsigned_into {
    ($($t:ty),*) => {$(
        impl IntoValue for $t {
            fn into_value(self) -> Value {
                Value::UInt(u64::from(self))
            }
        }
    )*};
}

signed_into!(i8, i16, i32, i64);
unsigned_into!(u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, FormatError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::UInt(u) => Ok(u as f64),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, FormatError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, FormatError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, FormatError> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, FormatError> {
        match value {
            Value::Array(items) | Value::Sequence(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            Value::Bytes(bytes) => bytes
                .into_iter()
                .map(|b| T::from_value(Value::UInt(u64::from(b))))
                .collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

/// Nest a row-major run of values into [`Value::Array`]s following `dims`.
///
/// An empty `dims` is a scalar: a single value comes back unwrapped.
pub fn shape_values(values: Vec<Value>, dims: &[u64]) -> Value {
    if dims.is_empty() {
        let mut values = values;
        return if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
    }
    let mut current = values;
    for i in (1..dims.len()).rev() {
        let width = dims[i] as usize;
        let rows: usize = dims[..i].iter().product::<u64>() as usize;
        let mut grouped = Vec::with_capacity(rows);
        let mut it = current.into_iter();
        for _ in 0..rows {
            grouped.push(Value::Array(it.by_ref().take(width).collect()));
        }
        current = grouped;
    }
    Value::Array(current)
}

/// Inverse of [`shape_values`]: unwrap `dims.len()` levels of nesting into a
/// row-major run, checking every level against its dimension.
pub fn flatten_values(value: Value, dims: &[u64]) -> Result<Vec<Value>, FormatError> {
    let Some((&first, rest)) = dims.split_first() else {
        return Ok(vec![value]);
    };
    let items = match value {
        Value::Array(items) => items,
        other => return Err(mismatch("array", &other)),
    };
    if items.len() as u64 != first {
        return Err(FormatError::ArrayShapeMismatch {
            expected: first as usize,
            actual: items.len(),
        });
    }
    let mut out = Vec::new();
    for item in items {
        out.extend(flatten_values(item, rest)?);
    }
    Ok(out)
}
