//! JSON interchange with schema validation.
//!
//! Textual payloads are untrusted: parsing converts to a dynamic [`Value`]
//! and then validates it against the codec's `test` before handing it back.

use indexmap::IndexMap;

use crate::codec::Codec;
use crate::error::SchemaError;
use crate::value::Value;

/// Lossy-but-total mapping into JSON: `Undefined` becomes JSON null, bytes
/// become an array of numbers, bigints become decimal strings.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::Undefined => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::Array(
            bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
        ),
        Value::BigInt(n) => serde_json::Value::String(n.to_string()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Record(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn from_json_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_json_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k, from_json_value(v)))
                .collect::<IndexMap<_, _>>(),
        ),
    }
}

/// Convert a JSON document and validate it against `codec`.
pub fn from_json(codec: &Codec, json: serde_json::Value) -> Result<Value, SchemaError> {
    let value = from_json_value(json);
    if !codec.test(&value) {
        return Err(SchemaError::Mismatch);
    }
    Ok(value)
}

/// Parse a JSON string and validate it against `codec`.
pub fn parse(codec: &Codec, text: &str) -> Result<Value, SchemaError> {
    from_json(codec, serde_json::from_str(text)?)
}

/// Serialize a value to a JSON string.
pub fn stringify(value: &Value) -> String {
    to_json(value).to_string()
}
