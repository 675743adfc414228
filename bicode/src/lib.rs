//! bicode: composable binary codecs with self-describing schemas.
//!
//! A [`Codec`] pairs an encoder, a decoder and a runtime membership test
//! over a dynamic [`Value`] domain. Codecs compose (arrays, records, tuples,
//! unions, maps, optionals, literals) and a schema can describe itself: the
//! [`SchemaCodec`] serializes a codec's own structure, including recursive
//! schemas built with [`DeferCell`].

pub mod codec;
pub mod error;
pub mod json;
pub mod schema;
pub mod stream;
pub mod value;

pub use codec::{
    Codec, CustomCodec, DeferCell, Shape, array, bigint, boolean, buffer, byte, custom,
    enum_of, isize, literal, null, number, optional, record, size, string, string_map,
    tuple, undefined, union,
};
pub use error::{DecodeError, EncodeError, SchemaError};
pub use schema::SchemaCodec;
pub use stream::ByteStream;
pub use value::Value;
