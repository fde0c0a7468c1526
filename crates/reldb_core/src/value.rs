//! Dynamic SQL value type.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single SQL value.
///
/// Values are totally ordered the way SQL sorts them: NULL first, then all
/// numbers (integers, reals and booleans compare numerically with each
/// other), then text, then blobs. Equality and hashing agree with that
/// order, so `Integer(1) == Real(1.0)` and both hash alike. This makes
/// values usable as index and identity-map keys.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Blob(Vec<u8>),
}

/// Sort class of a value; lower classes sort first.
fn class(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) | Value::Bool(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

/// Compares an integer with a float without losing precision for integers
/// beyond 2^53.
fn cmp_int_real(i: i64, r: f64) -> Ordering {
    if r.is_nan() {
        return Ordering::Greater;
    }
    let as_float = i as f64;
    if r.fract() == 0.0 && r >= i64::MIN as f64 && r < i64::MAX as f64 {
        return i.cmp(&(r as i64));
    }
    as_float.partial_cmp(&r).unwrap_or(Ordering::Equal)
}

fn cmp_real(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Value {
    /// Returns true for NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the SQL name of the value's runtime type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
            Value::Blob(_) => "blob",
        }
    }

    /// Returns the value as an integer. Booleans count as 0 and 1.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Real(r) => Some(*r),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Returns the text content, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a boolean. Integers 0 and 1 qualify.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a blob.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Renders the value as a SQL literal, quoting text.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (class(self), class(other));
        if a != b {
            return a.cmp(&b);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => cmp_real(*a, *b),
            (Value::Real(r), other) => match other.as_i64() {
                Some(i) => cmp_int_real(i, *r).reverse(),
                None => Ordering::Equal,
            },
            (this, Value::Real(r)) => match this.as_i64() {
                Some(i) => cmp_int_real(i, *r),
                None => Ordering::Equal,
            },
            (this, other) => this.as_i64().cmp(&other.as_i64()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        class(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(_) | Value::Bool(_) => self.as_i64().hash(state),
            Value::Real(r) => {
                // Integral reals must hash like the equal integer.
                if r.fract() == 0.0 && *r >= i64::MIN as f64 && *r < i64::MAX as f64 {
                    Some(*r as i64).hash(state);
                } else {
                    r.to_bits().hash(state);
                }
            }
            Value::Text(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(r) => write!(f, "{r:?}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Blob(bytes) => {
                f.write_str("X'")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                f.write_str("'")
            }
        }
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a stored [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Converts the value, failing with a conversion error on type mismatch.
    fn from_value(value: &Value) -> CoreResult<Self>;
}

fn mismatch(value: &Value, target: &str) -> CoreError {
    CoreError::conversion(format!(
        "cannot convert {} value to {target}",
        value.type_name()
    ))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> CoreResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> CoreResult<Self> {
        value.as_i64().ok_or_else(|| mismatch(value, "i64"))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> CoreResult<Self> {
        let n = i64::from_value(value)?;
        i32::try_from(n).map_err(|_| CoreError::conversion(format!("{n} does not fit in i32")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> CoreResult<Self> {
        value.as_f64().ok_or_else(|| mismatch(value, "f64"))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> CoreResult<Self> {
        value.as_bool().ok_or_else(|| mismatch(value, "bool"))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> CoreResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(value, "String"))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> CoreResult<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch(value, "Vec<u8>"))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> CoreResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
