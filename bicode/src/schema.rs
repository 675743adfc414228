//! Self-describing schemas: a codec whose value domain is codecs.
//!
//! The wire format is a table of newly-discovered composite schemas followed
//! by a root reference:
//!
//! ```text
//! [size table-count] [per entry: size block-len + block bytes] [size root-ref]
//! ```
//!
//! Each block is `[size constructor-index][constructor arguments]`, where
//! arguments are themselves references. A reference below the atomic count
//! (10 built-in primitives, then registered extras) names an atomic codec;
//! anything above names a table slot. A composite codec is assigned its slot
//! *before* its arguments are encoded and de-duplicated by `Arc` identity,
//! which is what keeps recursive and shared substructure finite.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{
    self, Codec, CustomCodec, DeferCell, Shape, read_size, write_size,
};
use crate::error::{DecodeError, EncodeError};
use crate::stream::ByteStream;
use crate::value::Value;

const PRIMITIVE_COUNT: u64 = 10;

// Constructor indices inside a table block.
const CTOR_ARRAY: u64 = 0;
const CTOR_RECORD: u64 = 1;
const CTOR_TUPLE: u64 = 2;
const CTOR_UNION: u64 = 3;
const CTOR_STRING_MAP: u64 = 4;
const CTOR_LITERAL: u64 = 5;

// Literal value tags.
const LIT_NULL: u8 = 0;
const LIT_UNDEFINED: u8 = 1;
const LIT_FALSE: u8 = 2;
const LIT_TRUE: u8 = 3;
const LIT_NUMBER: u8 = 4;
const LIT_STRING: u8 = 5;

/// Encodes and decodes [`Codec`] schemas.
///
/// The identity registry is the ten built-in primitives plus any registered
/// extra (custom) codecs; indices are stable for the life of the value.
#[derive(Default)]
pub struct SchemaCodec {
    extras: Vec<Arc<dyn CustomCodec>>,
}

impl SchemaCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the identity registry with a caller-supplied codec. Schemas
    /// containing the exact registered instance become self-describable.
    pub fn register(&mut self, extra: Arc<dyn CustomCodec>) {
        self.extras.push(extra);
    }

    fn atomic_count(&self) -> u64 {
        PRIMITIVE_COUNT + self.extras.len() as u64
    }

    pub fn encode_codec(&self, codec: &Codec) -> Result<Vec<u8>, EncodeError> {
        let mut stream = ByteStream::new();
        self.encode_schema(&mut stream, codec)?;
        Ok(stream.into_bytes())
    }

    pub fn decode_codec(&self, bytes: &[u8]) -> Result<Codec, DecodeError> {
        let mut stream = ByteStream::from_bytes(bytes.to_vec());
        self.decode_schema(&mut stream)
    }

    pub fn encode_schema(
        &self,
        stream: &mut ByteStream,
        codec: &Codec,
    ) -> Result<(), EncodeError> {
        let mut table: Vec<Option<Vec<u8>>> = Vec::new();
        let mut assigned: HashMap<*const Shape, u64> = HashMap::new();

        let root = self.encode_ref(codec, &mut table, &mut assigned)?;

        write_size(stream, table.len() as u64);
        for block in table {
            // Every reserved slot is filled once its arguments return.
            let block = block.ok_or(EncodeError::UnboundDefer)?;
            write_size(stream, block.len() as u64);
            stream.write_buffer(&block);
        }
        write_size(stream, root);
        Ok(())
    }

    fn encode_ref(
        &self,
        codec: &Codec,
        table: &mut Vec<Option<Vec<u8>>>,
        assigned: &mut HashMap<*const Shape, u64>,
    ) -> Result<u64, EncodeError> {
        let resolved = codec.resolve().ok_or(EncodeError::UnboundDefer)?;

        match resolved.shape() {
            Shape::Size => return Ok(0),
            Shape::Isize => return Ok(1),
            Shape::Byte => return Ok(2),
            Shape::Number => return Ok(3),
            Shape::String => return Ok(4),
            Shape::Boolean => return Ok(5),
            Shape::Null => return Ok(6),
            Shape::Undefined => return Ok(7),
            Shape::BigInt => return Ok(8),
            Shape::Buffer => return Ok(9),
            Shape::Custom(inner) => {
                for (index, extra) in self.extras.iter().enumerate() {
                    if Arc::ptr_eq(inner, extra) {
                        return Ok(PRIMITIVE_COUNT + index as u64);
                    }
                }
                return Err(EncodeError::UnregisteredCustom {
                    name: inner.name().to_string(),
                });
            }
            _ => {}
        }

        // Composite: reuse the slot if this exact instance was already seen
        // during this call (identity, not structural equality), otherwise
        // reserve a slot before descending into the arguments so a schema
        // that contains itself terminates.
        if let Some(reference) = assigned.get(&resolved.identity()) {
            return Ok(*reference);
        }

        let slot = table.len();
        let reference = self.atomic_count() + slot as u64;
        assigned.insert(resolved.identity(), reference);
        table.push(None);

        let mut block = ByteStream::new();
        match resolved.shape() {
            Shape::Array(element) => {
                write_size(&mut block, CTOR_ARRAY);
                let element = self.encode_ref(element, table, assigned)?;
                write_size(&mut block, element);
            }
            Shape::Record(fields) => {
                write_size(&mut block, CTOR_RECORD);
                write_size(&mut block, fields.len() as u64);
                for (name, field) in fields {
                    write_size(&mut block, name.len() as u64);
                    block.write_buffer(name.as_bytes());
                    let field = self.encode_ref(field, table, assigned)?;
                    write_size(&mut block, field);
                }
            }
            Shape::Tuple(elements) => {
                write_size(&mut block, CTOR_TUPLE);
                write_size(&mut block, elements.len() as u64);
                for element in elements {
                    let element = self.encode_ref(element, table, assigned)?;
                    write_size(&mut block, element);
                }
            }
            Shape::Union(options) => {
                write_size(&mut block, CTOR_UNION);
                write_size(&mut block, options.len() as u64);
                for option in options {
                    let option = self.encode_ref(option, table, assigned)?;
                    write_size(&mut block, option);
                }
            }
            Shape::StringMap(element) => {
                write_size(&mut block, CTOR_STRING_MAP);
                let element = self.encode_ref(element, table, assigned)?;
                write_size(&mut block, element);
            }
            Shape::Literal(value) => {
                write_size(&mut block, CTOR_LITERAL);
                write_literal(&mut block, value)?;
            }
            // Primitives, Custom and Defer are handled above.
            _ => unreachable!("non-composite shape in composite path"),
        }

        table[slot] = Some(block.into_bytes());
        Ok(reference)
    }

    pub fn decode_schema(&self, stream: &mut ByteStream) -> Result<Codec, DecodeError> {
        let count = read_size(stream)? as usize;

        // The count is untrusted wire data: no pre-reservation, a hostile
        // count must fail on the bounds-checked reads below.
        let mut blocks = Vec::new();
        for _ in 0..count {
            let len = read_size(stream)? as usize;
            blocks.push(stream.read_buffer(len)?.to_vec());
        }

        // One cell per slot up front, so blocks can reference slots that
        // have not been resolved yet (forward and self references).
        let cells: Vec<DeferCell> = (0..count).map(|_| DeferCell::new()).collect();

        for (block, cell) in blocks.iter().zip(&cells) {
            let codec = self.decode_block(block, &cells)?;
            cell.bind(codec);
        }

        let root = read_size(stream)?;
        self.resolve_ref(root, &cells)
    }

    fn resolve_ref(&self, reference: u64, cells: &[DeferCell]) -> Result<Codec, DecodeError> {
        match reference {
            0 => return Ok(codec::size()),
            1 => return Ok(codec::isize()),
            2 => return Ok(codec::byte()),
            3 => return Ok(codec::number()),
            4 => return Ok(codec::string()),
            5 => return Ok(codec::boolean()),
            6 => return Ok(codec::null()),
            7 => return Ok(codec::undefined()),
            8 => return Ok(codec::bigint()),
            9 => return Ok(codec::buffer()),
            _ => {}
        }

        if reference < self.atomic_count() {
            let extra = &self.extras[(reference - PRIMITIVE_COUNT) as usize];
            return Ok(codec::custom(Arc::clone(extra)));
        }

        let slot = (reference - self.atomic_count()) as usize;
        match cells.get(slot) {
            Some(cell) => Ok(cell.codec()),
            None => Err(DecodeError::BadSchemaReference { reference }),
        }
    }

    fn decode_block(&self, block: &[u8], cells: &[DeferCell]) -> Result<Codec, DecodeError> {
        let mut stream = ByteStream::from_bytes(block.to_vec());
        let constructor = read_size(&mut stream)?;

        match constructor {
            CTOR_ARRAY => {
                let element = read_size(&mut stream)?;
                Ok(codec::array(self.resolve_ref(element, cells)?))
            }
            CTOR_RECORD => {
                let count = read_size(&mut stream)?;
                let mut fields = Vec::new();
                for _ in 0..count {
                    let name_len = read_size(&mut stream)? as usize;
                    let name = String::from_utf8(stream.read_buffer(name_len)?.to_vec())?;
                    let field = read_size(&mut stream)?;
                    fields.push((name, self.resolve_ref(field, cells)?));
                }
                Ok(codec::record(fields))
            }
            CTOR_TUPLE => {
                let count = read_size(&mut stream)?;
                let mut elements = Vec::new();
                for _ in 0..count {
                    let element = read_size(&mut stream)?;
                    elements.push(self.resolve_ref(element, cells)?);
                }
                Ok(codec::tuple(elements))
            }
            CTOR_UNION => {
                let count = read_size(&mut stream)?;
                let mut options = Vec::new();
                for _ in 0..count {
                    let option = read_size(&mut stream)?;
                    options.push(self.resolve_ref(option, cells)?);
                }
                Ok(codec::union(options))
            }
            CTOR_STRING_MAP => {
                let element = read_size(&mut stream)?;
                Ok(codec::string_map(self.resolve_ref(element, cells)?))
            }
            CTOR_LITERAL => Ok(codec::literal(read_literal(&mut stream)?)),
            index => Err(DecodeError::BadSchemaConstructor { index }),
        }
    }
}

fn write_literal(stream: &mut ByteStream, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Null => stream.write_byte(LIT_NULL),
        Value::Undefined => stream.write_byte(LIT_UNDEFINED),
        Value::Bool(false) => stream.write_byte(LIT_FALSE),
        Value::Bool(true) => stream.write_byte(LIT_TRUE),
        Value::Number(n) => {
            stream.write_byte(LIT_NUMBER);
            stream.write_buffer(&n.to_be_bytes());
        }
        Value::String(s) => {
            stream.write_byte(LIT_STRING);
            write_size(stream, s.len() as u64);
            stream.write_buffer(s.as_bytes());
        }
        other => {
            return Err(EncodeError::SchemaMismatch {
                expected: "primitive literal",
                value_kind: other.kind(),
            });
        }
    }
    Ok(())
}

fn read_literal(stream: &mut ByteStream) -> Result<Value, DecodeError> {
    match stream.read_byte()? {
        LIT_NULL => Ok(Value::Null),
        LIT_UNDEFINED => Ok(Value::Undefined),
        LIT_FALSE => Ok(Value::Bool(false)),
        LIT_TRUE => Ok(Value::Bool(true)),
        LIT_NUMBER => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(stream.read_buffer(8)?);
            Ok(Value::Number(f64::from_be_bytes(bytes)))
        }
        LIT_STRING => {
            let len = read_size(stream)? as usize;
            Ok(Value::String(String::from_utf8(
                stream.read_buffer(len)?.to_vec(),
            )?))
        }
        tag => Err(DecodeError::BadSchemaConstructor { index: tag as u64 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        array, bigint, boolean, buffer, byte, literal, number, optional, record, size,
        string, string_map, tuple, union,
    };

    /// Functional equivalence: both codecs agree on bytes for a value.
    fn assert_equivalent(original: &Codec, rebuilt: &Codec, value: &Value) {
        assert!(original.test(value));
        assert!(rebuilt.test(value));
        let bytes = original.encode(value).unwrap();
        assert_eq!(rebuilt.encode(value).unwrap(), bytes);
        assert_eq!(rebuilt.decode(&bytes).unwrap(), *value);
    }

    fn schema_roundtrip(codec: &Codec) -> Codec {
        let schema = SchemaCodec::new();
        let bytes = schema.encode_codec(codec).unwrap();
        schema.decode_codec(&bytes).unwrap()
    }

    #[test]
    fn primitive_schema_roundtrip() {
        for (codec, value) in [
            (size(), Value::from(129u64)),
            (string(), Value::from("hi")),
            (boolean(), Value::Bool(true)),
            (bigint(), Value::from(num_bigint::BigInt::from(-12345))),
        ] {
            let rebuilt = schema_roundtrip(&codec);
            assert_equivalent(&codec, &rebuilt, &value);
        }
    }

    #[test]
    fn primitive_schema_is_a_bare_reference() {
        // Empty table + root reference.
        let schema = SchemaCodec::new();
        assert_eq!(schema.encode_codec(&size()).unwrap(), vec![0, 0]);
        assert_eq!(schema.encode_codec(&buffer()).unwrap(), vec![0, 9]);
    }

    #[test]
    fn composite_schema_roundtrip() {
        let shape = record([
            ("kind", literal("circle")),
            ("radius", size()),
            ("center", tuple([number(), number()])),
            ("tags", array(string())),
            ("meta", string_map(optional(string()))),
        ]);
        let rebuilt = schema_roundtrip(&shape);

        let value = Value::record([
            ("kind", Value::from("circle")),
            ("radius", Value::from(9u64)),
            (
                "center",
                Value::Array(vec![Value::Number(1.5), Value::Number(-2.5)]),
            ),
            ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
            ("meta", Value::record([("note", Value::Null)])),
        ]);
        assert_equivalent(&shape, &rebuilt, &value);
    }

    #[test]
    fn shared_substructure_is_written_once() {
        let point = record([("x", number()), ("y", number())]);
        let segment = record([("from", point.clone()), ("to", point)]);

        let schema = SchemaCodec::new();
        let bytes = schema.encode_codec(&segment).unwrap();
        // Table holds exactly two entries: the segment and ONE point.
        assert_eq!(bytes[0], 2);

        let rebuilt = schema.decode_codec(&bytes).unwrap();
        let value = Value::record([
            (
                "from",
                Value::record([("x", Value::Number(0.0)), ("y", Value::Number(1.0))]),
            ),
            (
                "to",
                Value::record([("x", Value::Number(2.0)), ("y", Value::Number(3.0))]),
            ),
        ]);
        assert_equivalent(&segment, &rebuilt, &value);
    }

    #[test]
    fn recursive_schema_roundtrip() {
        // Tree = union(size, array(Tree))
        let cell = DeferCell::new();
        let tree = union([size(), array(cell.codec())]);
        cell.bind(tree.clone());

        let rebuilt = schema_roundtrip(&tree);
        let value = Value::Array(vec![
            Value::from(1u64),
            Value::Array(vec![Value::from(2u64), Value::Array(vec![])]),
        ]);
        assert_equivalent(&tree, &rebuilt, &value);
    }

    #[test]
    fn hostile_table_count_is_a_decode_error() {
        let schema = SchemaCodec::new();
        // Varint table count of 2^60 followed by a single byte: far more
        // blocks promised than the input can hold. Must surface as a
        // decode error, not an allocation failure.
        let hostile = [0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x10, 0];
        assert!(matches!(
            schema.decode_codec(&hostile),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn hostile_field_count_is_a_decode_error() {
        let schema = SchemaCodec::new();
        // One record block claiming 2^60 fields, then nothing.
        let block = [
            1, // record constructor
            0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x10,
        ];
        let mut bytes = vec![1, block.len() as u8];
        bytes.extend_from_slice(&block);
        bytes.push(10); // root -> slot 0
        assert!(matches!(
            schema.decode_codec(&bytes),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn out_of_range_reference_is_fatal() {
        let schema = SchemaCodec::new();
        // Empty table, root reference 99: points nowhere.
        assert!(matches!(
            schema.decode_codec(&[0, 99]),
            Err(DecodeError::BadSchemaReference { reference: 99 })
        ));
    }

    #[test]
    fn unknown_constructor_is_fatal() {
        let schema = SchemaCodec::new();
        // One single-byte block with constructor index 42, root -> slot 0.
        assert!(matches!(
            schema.decode_codec(&[1, 1, 42, 10]),
            Err(DecodeError::BadSchemaConstructor { index: 42 })
        ));
    }

    struct Rgba;

    impl CustomCodec for Rgba {
        fn name(&self) -> &str {
            "rgba"
        }

        fn encode_value(&self, stream: &mut ByteStream, value: &Value) -> Result<(), EncodeError> {
            let items = value.as_array().ok_or(EncodeError::SchemaMismatch {
                expected: "rgba",
                value_kind: value.kind(),
            })?;
            for item in items {
                byte().encode_value(stream, item)?;
            }
            Ok(())
        }

        fn decode_value(&self, stream: &mut ByteStream) -> Result<Value, DecodeError> {
            let mut items = Vec::with_capacity(4);
            for _ in 0..4 {
                items.push(Value::Number(stream.read_byte()? as f64));
            }
            Ok(Value::Array(items))
        }

        fn test(&self, value: &Value) -> bool {
            value
                .as_array()
                .is_some_and(|items| items.len() == 4 && items.iter().all(|i| byte().test(i)))
        }
    }

    #[test]
    fn registered_custom_codec_is_self_describable() {
        let rgba: Arc<dyn CustomCodec> = Arc::new(Rgba);
        let pixel_row = array(codec::custom(Arc::clone(&rgba)));

        let mut schema = SchemaCodec::new();
        schema.register(Arc::clone(&rgba));

        let bytes = schema.encode_codec(&pixel_row).unwrap();
        let rebuilt = schema.decode_codec(&bytes).unwrap();

        let value = Value::Array(vec![Value::Array(vec![
            Value::from(0u64),
            Value::from(255u64),
            Value::from(128u64),
            Value::from(255u64),
        ])]);
        assert_equivalent(&pixel_row, &rebuilt, &value);
    }

    #[test]
    fn unregistered_custom_codec_is_rejected() {
        let rgba: Arc<dyn CustomCodec> = Arc::new(Rgba);
        let schema = SchemaCodec::new();
        assert!(matches!(
            schema.encode_codec(&codec::custom(rgba)),
            Err(EncodeError::UnregisteredCustom { .. })
        ));
    }
}
