//! The dynamic value domain all codecs operate on.
//!
//! A closed set of shapes replaces the duck typing the wire format was
//! originally designed around: every codec encodes from and decodes into a
//! [`Value`], and union dispatch works by testing values against options in
//! order.

use indexmap::IndexMap;
use num_bigint::BigInt;

/// A dynamically-typed value.
///
/// `Record` keeps insertion order (handy for debugging and JSON output) but
/// record codecs always encode in *declared* field order, so insertion order
/// never affects bytes on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Distinct from `Null`: string-map codecs skip `Undefined` entries on
    /// encode, and it is the default result codec for methods without one.
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    BigInt(BigInt),
    Array(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    /// Short name of the value's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::BigInt(_) => "bigint",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    /// True for a finite number with no fractional part, at or above zero
    /// and representable in 64 bits. This is the domain of the `size` codec;
    /// anything outside it would be corrupted by the cast to `u64`.
    pub fn is_size(&self) -> bool {
        matches!(
            self,
            Value::Number(n)
                if n.is_finite() && *n >= 0.0 && n.trunc() == *n && *n <= u64::MAX as f64
        )
    }

    /// True for a finite number with no fractional part whose magnitude fits
    /// the doubled-and-signed encoding (|v| < 2^63).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Value::Number(n)
                if n.is_finite() && n.trunc() == *n && n.abs() < (1u64 << 63) as f64
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Build a record from (name, value) pairs.
    pub fn record<K, I>(fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::BigInt(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
