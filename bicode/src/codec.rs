//! Composable binary codecs.
//!
//! A [`Codec`] is an immutable, cheaply-clonable handle over a closed shape
//! tree. Three operations: encode a [`Value`] onto a stream, decode one back,
//! and [`Codec::test`] - the runtime membership predicate union dispatch is
//! built on. The shape tree doubles as reflection metadata for the schema
//! codec: identity is `Arc` pointer identity, structure is exhaustive
//! pattern matching.
//!
//! Wire format summary:
//! - `size`: ULEB128 (7 value bits per byte, high bit = continuation)
//! - `isize`: `2*|v| + (v < 0)` delegated to `size`
//! - `number`: IEEE-754 binary64, 8 bytes big-endian
//! - `string`/`buffer`: `size` byte-count prefix + raw bytes
//! - `union`: `size` discriminator (first option whose `test` passes) + payload
//! - `literal`/`null`/`undefined`: zero bytes

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use num_bigint::{BigInt, BigUint, Sign};

use crate::error::{DecodeError, EncodeError};
use crate::stream::ByteStream;
use crate::value::Value;

/// Caller-supplied codec, opaque to the framework. Custom codecs are atomic
/// for self-description and must be registered as registry extras before a
/// schema containing them can be Type-encoded.
pub trait CustomCodec: Send + Sync {
    fn name(&self) -> &str;
    fn encode_value(&self, stream: &mut ByteStream, value: &Value) -> Result<(), EncodeError>;
    fn decode_value(&self, stream: &mut ByteStream) -> Result<Value, DecodeError>;
    fn test(&self, value: &Value) -> bool;
}

/// The closed set of codec shapes.
#[derive(Clone)]
pub enum Shape {
    // Primitives
    Size,
    Isize,
    Byte,
    Number,
    String,
    Boolean,
    Null,
    Undefined,
    BigInt,
    Buffer,
    // Combinators
    Array(Codec),
    Record(Vec<(String, Codec)>),
    Tuple(Vec<Codec>),
    Union(Vec<Codec>),
    StringMap(Codec),
    Literal(Value),
    /// Indirection through a once-initialized cell, enabling
    /// self-referential schemas.
    Defer(DeferCell),
    Custom(Arc<dyn CustomCodec>),
}

impl Shape {
    fn name(&self) -> &'static str {
        match self {
            Shape::Size => "size",
            Shape::Isize => "isize",
            Shape::Byte => "byte",
            Shape::Number => "number",
            Shape::String => "string",
            Shape::Boolean => "boolean",
            Shape::Null => "null",
            Shape::Undefined => "undefined",
            Shape::BigInt => "bigint",
            Shape::Buffer => "buffer",
            Shape::Array(_) => "array",
            Shape::Record(_) => "record",
            Shape::Tuple(_) => "tuple",
            Shape::Union(_) => "union",
            Shape::StringMap(_) => "stringMap",
            Shape::Literal(_) => "literal",
            Shape::Defer(_) => "defer",
            Shape::Custom(_) => "custom",
        }
    }
}

/// An immutable (de)serializer for one type of value.
#[derive(Clone)]
pub struct Codec(Arc<Shape>);

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Codec({})", self.0.name())
    }
}

/// Lazy-initialization cell for self-referential schemas.
///
/// `cell.codec()` hands out a placeholder codec immediately; `cell.bind()`
/// fills it in once the real codec exists. Eager construction of a codec
/// graph that contains itself would otherwise recurse forever at definition
/// time. The first bind wins; later binds are ignored.
#[derive(Clone, Default)]
pub struct DeferCell {
    slot: Arc<OnceLock<Codec>>,
}

impl DeferCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec that forwards every operation to the bound codec.
    pub fn codec(&self) -> Codec {
        Codec(Arc::new(Shape::Defer(self.clone())))
    }

    pub fn bind(&self, codec: Codec) {
        let _ = self.slot.set(codec);
    }

    pub fn get(&self) -> Option<&Codec> {
        self.slot.get()
    }
}

// Primitive constructors. Each call returns a fresh handle; the schema codec
// treats all primitive handles of the same shape as the same identity.

pub fn size() -> Codec {
    Codec(Arc::new(Shape::Size))
}

pub fn isize() -> Codec {
    Codec(Arc::new(Shape::Isize))
}

pub fn byte() -> Codec {
    Codec(Arc::new(Shape::Byte))
}

pub fn number() -> Codec {
    Codec(Arc::new(Shape::Number))
}

pub fn string() -> Codec {
    Codec(Arc::new(Shape::String))
}

pub fn boolean() -> Codec {
    Codec(Arc::new(Shape::Boolean))
}

pub fn null() -> Codec {
    Codec(Arc::new(Shape::Null))
}

pub fn undefined() -> Codec {
    Codec(Arc::new(Shape::Undefined))
}

pub fn bigint() -> Codec {
    Codec(Arc::new(Shape::BigInt))
}

pub fn buffer() -> Codec {
    Codec(Arc::new(Shape::Buffer))
}

/// `size`-prefixed count followed by each element.
pub fn array(element: Codec) -> Codec {
    Codec(Arc::new(Shape::Array(element)))
}

/// Fixed, ordered set of named fields. Fields are always encoded in the
/// order declared here, never in the order the value happens to hold them.
pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Codec)>) -> Codec {
    Codec(Arc::new(Shape::Record(
        fields.into_iter().map(|(k, c)| (k.into(), c)).collect(),
    )))
}

/// Positional fields, fixed arity.
pub fn tuple(elements: impl IntoIterator<Item = Codec>) -> Codec {
    Codec(Arc::new(Shape::Tuple(elements.into_iter().collect())))
}

/// Ordered options. Encoding commits to the FIRST option whose `test`
/// passes, so option order is a semantic contract: with overlapping shapes
/// the earlier option wins.
pub fn union(options: impl IntoIterator<Item = Codec>) -> Codec {
    Codec(Arc::new(Shape::Union(options.into_iter().collect())))
}

/// `size`-prefixed count of (string key, element) pairs. Entries whose value
/// is `Undefined` are skipped on encode.
pub fn string_map(element: Codec) -> Codec {
    Codec(Arc::new(Shape::StringMap(element)))
}

/// Zero-byte codec bound to one fixed primitive value.
pub fn literal(value: impl Into<Value>) -> Codec {
    Codec(Arc::new(Shape::Literal(value.into())))
}

/// Union of literals.
pub fn enum_of(values: impl IntoIterator<Item = Value>) -> Codec {
    union(values.into_iter().map(literal))
}

/// `union(null, element)`.
pub fn optional(element: Codec) -> Codec {
    union([null(), element])
}

pub fn custom(inner: Arc<dyn CustomCodec>) -> Codec {
    Codec(Arc::new(Shape::Custom(inner)))
}

impl Codec {
    pub fn shape(&self) -> &Shape {
        &self.0
    }

    /// Identity for schema de-duplication: same `Arc`, same schema node.
    pub(crate) fn identity(&self) -> *const Shape {
        Arc::as_ptr(&self.0)
    }

    /// Unwrap `Defer` layers down to the constructed codec underneath.
    pub(crate) fn resolve(&self) -> Option<Codec> {
        match self.shape() {
            Shape::Defer(cell) => cell.get().and_then(|inner| inner.resolve()),
            _ => Some(self.clone()),
        }
    }

    /// Encode onto a fresh stream and return the written bytes.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let mut stream = ByteStream::new();
        self.encode_value(&mut stream, value)?;
        Ok(stream.into_bytes())
    }

    /// Decode a single value from the start of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let mut stream = ByteStream::from_bytes(bytes.to_vec());
        self.decode_value(&mut stream)
    }

    pub fn encode_value(
        &self,
        stream: &mut ByteStream,
        value: &Value,
    ) -> Result<(), EncodeError> {
        let mismatch = || EncodeError::SchemaMismatch {
            expected: self.0.name(),
            value_kind: value.kind(),
        };

        match self.shape() {
            Shape::Size => match value {
                Value::Number(n) if value.is_size() => {
                    write_size(stream, *n as u64);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Isize => match value {
                Value::Number(n) if value.is_integer() => {
                    let negative = *n < 0.0;
                    write_size(stream, 2 * (n.abs() as u64) + negative as u64);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Byte => match value {
                Value::Number(n) if value.is_integer() && *n >= 0.0 && *n < 256.0 => {
                    stream.write_byte(*n as u8);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Number => match value {
                Value::Number(n) => {
                    stream.write_buffer(&n.to_be_bytes());
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::String => match value {
                Value::String(s) => {
                    write_size(stream, s.len() as u64);
                    stream.write_buffer(s.as_bytes());
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Boolean => match value {
                Value::Bool(b) => {
                    stream.write_byte(*b as u8);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Null => match value {
                Value::Null => Ok(()),
                _ => Err(mismatch()),
            },
            Shape::Undefined => match value {
                Value::Undefined => Ok(()),
                _ => Err(mismatch()),
            },
            Shape::BigInt => match value {
                Value::BigInt(n) => {
                    write_bigint(stream, n);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Buffer => match value {
                Value::Bytes(bytes) => {
                    write_size(stream, bytes.len() as u64);
                    stream.write_buffer(bytes);
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Array(element) => match value {
                Value::Array(items) => {
                    write_size(stream, items.len() as u64);
                    for item in items {
                        element.encode_value(stream, item)?;
                    }
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Record(fields) => match value {
                Value::Record(entries) => {
                    // Declared order, not the value's insertion order: the
                    // decoder reads fields back in declared order, so the
                    // two must agree.
                    for (name, codec) in fields {
                        let field = entries.get(name).ok_or_else(|| {
                            EncodeError::MissingField { field: name.clone() }
                        })?;
                        codec.encode_value(stream, field)?;
                    }
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Tuple(elements) => match value {
                Value::Array(items) if items.len() == elements.len() => {
                    for (codec, item) in elements.iter().zip(items) {
                        codec.encode_value(stream, item)?;
                    }
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Union(options) => {
                for (index, option) in options.iter().enumerate() {
                    if option.test(value) {
                        write_size(stream, index as u64);
                        return option.encode_value(stream, value);
                    }
                }
                Err(EncodeError::NoMatchingVariant {
                    value_kind: value.kind(),
                })
            }
            Shape::StringMap(element) => match value {
                Value::Record(entries) => {
                    let present: Vec<_> = entries
                        .iter()
                        .filter(|(_, v)| !matches!(v, Value::Undefined))
                        .collect();
                    write_size(stream, present.len() as u64);
                    for (key, item) in present {
                        write_size(stream, key.len() as u64);
                        stream.write_buffer(key.as_bytes());
                        element.encode_value(stream, item)?;
                    }
                    Ok(())
                }
                _ => Err(mismatch()),
            },
            Shape::Literal(expected) => {
                if value == expected {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            Shape::Defer(cell) => cell
                .get()
                .ok_or(EncodeError::UnboundDefer)?
                .encode_value(stream, value),
            Shape::Custom(inner) => inner.encode_value(stream, value),
        }
    }

    pub fn decode_value(&self, stream: &mut ByteStream) -> Result<Value, DecodeError> {
        match self.shape() {
            Shape::Size => Ok(Value::Number(read_size(stream)? as f64)),
            Shape::Isize => {
                let raw = read_size(stream)?;
                let magnitude = (raw / 2) as f64;
                Ok(Value::Number(if raw % 2 == 0 {
                    magnitude
                } else {
                    -magnitude
                }))
            }
            Shape::Byte => Ok(Value::Number(stream.read_byte()? as f64)),
            Shape::Number => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(stream.read_buffer(8)?);
                Ok(Value::Number(f64::from_be_bytes(bytes)))
            }
            Shape::String => {
                let count = read_size(stream)? as usize;
                let bytes = stream.read_buffer(count)?.to_vec();
                Ok(Value::String(String::from_utf8(bytes)?))
            }
            Shape::Boolean => Ok(Value::Bool(stream.read_byte()? != 0)),
            Shape::Null => Ok(Value::Null),
            Shape::Undefined => Ok(Value::Undefined),
            Shape::BigInt => Ok(Value::BigInt(read_bigint(stream)?)),
            Shape::Buffer => {
                let count = read_size(stream)? as usize;
                Ok(Value::Bytes(stream.read_buffer(count)?.to_vec()))
            }
            Shape::Array(element) => {
                let count = read_size(stream)?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(element.decode_value(stream)?);
                }
                Ok(Value::Array(items))
            }
            Shape::Record(fields) => {
                let mut entries = IndexMap::with_capacity(fields.len());
                for (name, codec) in fields {
                    entries.insert(name.clone(), codec.decode_value(stream)?);
                }
                Ok(Value::Record(entries))
            }
            Shape::Tuple(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for codec in elements {
                    items.push(codec.decode_value(stream)?);
                }
                Ok(Value::Array(items))
            }
            Shape::Union(options) => {
                let index = read_size(stream)?;
                let option = options.get(index as usize).ok_or(
                    DecodeError::InvalidDiscriminant {
                        index,
                        options: options.len(),
                    },
                )?;
                option.decode_value(stream)
            }
            Shape::StringMap(element) => {
                let count = read_size(stream)?;
                let mut entries = IndexMap::new();
                for _ in 0..count {
                    let key_len = read_size(stream)? as usize;
                    let key = String::from_utf8(stream.read_buffer(key_len)?.to_vec())?;
                    let item = element.decode_value(stream)?;
                    entries.insert(key, item);
                }
                Ok(Value::Record(entries))
            }
            Shape::Literal(value) => Ok(value.clone()),
            Shape::Defer(cell) => cell
                .get()
                .ok_or(DecodeError::UnboundDefer)?
                .decode_value(stream),
            Shape::Custom(inner) => inner.decode_value(stream),
        }
    }

    /// Runtime membership test. An unbound `Defer` cell accepts nothing.
    pub fn test(&self, value: &Value) -> bool {
        match self.shape() {
            Shape::Size => value.is_size(),
            Shape::Isize => value.is_integer(),
            Shape::Byte => match value {
                Value::Number(n) => value.is_integer() && *n >= 0.0 && *n < 256.0,
                _ => false,
            },
            Shape::Number => matches!(value, Value::Number(_)),
            Shape::String => matches!(value, Value::String(_)),
            Shape::Boolean => matches!(value, Value::Bool(_)),
            Shape::Null => matches!(value, Value::Null),
            Shape::Undefined => matches!(value, Value::Undefined),
            Shape::BigInt => matches!(value, Value::BigInt(_)),
            Shape::Buffer => matches!(value, Value::Bytes(_)),
            Shape::Array(element) => match value {
                Value::Array(items) => items.iter().all(|item| element.test(item)),
                _ => false,
            },
            Shape::Record(fields) => match value {
                Value::Record(entries) => {
                    entries.len() == fields.len()
                        && fields.iter().all(|(name, codec)| {
                            entries.get(name).is_some_and(|field| codec.test(field))
                        })
                }
                _ => false,
            },
            Shape::Tuple(elements) => match value {
                Value::Array(items) => {
                    items.len() == elements.len()
                        && elements
                            .iter()
                            .zip(items)
                            .all(|(codec, item)| codec.test(item))
                }
                _ => false,
            },
            Shape::Union(options) => options.iter().any(|option| option.test(value)),
            Shape::StringMap(element) => match value {
                Value::Record(entries) => entries
                    .values()
                    .all(|item| matches!(item, Value::Undefined) || element.test(item)),
                _ => false,
            },
            Shape::Literal(expected) => value == expected,
            Shape::Defer(cell) => cell.get().is_some_and(|inner| inner.test(value)),
            Shape::Custom(inner) => inner.test(value),
        }
    }
}

/// ULEB128: base-128 little-endian groups, high bit flags continuation.
pub(crate) fn write_size(stream: &mut ByteStream, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        stream.write_byte(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn read_size(stream: &mut ByteStream) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = stream.read_byte()?;
        let group = (byte & 0x7f) as u64;
        if shift >= 64 || (group != 0 && shift > 64 - 7 && group >> (64 - shift) != 0) {
            return Err(DecodeError::VarintOverflow);
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Zero is a lone zero byte. Otherwise a `size` header carrying the sign in
/// its low bit and the magnitude byte count in the rest, then the magnitude
/// big-endian.
fn write_bigint(stream: &mut ByteStream, value: &BigInt) {
    if value.sign() == Sign::NoSign {
        stream.write_byte(0);
        return;
    }

    let negative = value.sign() == Sign::Minus;
    let magnitude = value.magnitude().to_bytes_be();
    write_size(stream, negative as u64 + 2 * magnitude.len() as u64);
    stream.write_buffer(&magnitude);
}

fn read_bigint(stream: &mut ByteStream) -> Result<BigInt, DecodeError> {
    let header = read_size(stream)?;
    if header == 0 {
        return Ok(BigInt::from(0));
    }

    let negative = header % 2 == 1;
    let count = (header / 2) as usize;
    let magnitude = BigUint::from_bytes_be(stream.read_buffer(count)?);

    Ok(BigInt::from_biguint(
        if negative { Sign::Minus } else { Sign::Plus },
        magnitude,
    ))
}
