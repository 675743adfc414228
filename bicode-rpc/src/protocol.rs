//! Protocol definitions and their derived wire codecs.
//!
//! A protocol is a fixed mapping from method name to argument/result codecs,
//! built once at startup. The request codec is generated from it: a union
//! with one record variant per method, tagged by a method-name literal, so
//! the variant a request decodes as *is* the method dispatch.

use bicode::{Codec, Value, buffer, literal, record, size, tuple, union};
use indexmap::IndexMap;

/// One callable method: ordered argument codecs plus a result codec.
pub struct Method {
    pub args: Vec<Codec>,
    pub result: Codec,
}

/// Immutable name -> method mapping. Declaration order is the request
/// union's option order and therefore part of the wire format.
pub struct Protocol {
    methods: IndexMap<String, Method>,
}

#[derive(Default)]
pub struct ProtocolBuilder {
    methods: IndexMap<String, Method>,
}

impl ProtocolBuilder {
    pub fn method(
        mut self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = Codec>,
        result: Codec,
    ) -> Self {
        self.methods.insert(
            name.into(),
            Method {
                args: args.into_iter().collect(),
                result,
            },
        );
        self
    }

    pub fn build(self) -> Protocol {
        Protocol {
            methods: self.methods,
        }
    }
}

impl Protocol {
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::default()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// `union(record { id, method: literal(name), args: tuple(...) }, ...)`
    /// over methods in declaration order.
    pub fn request_codec(&self) -> Codec {
        union(self.methods.iter().map(|(name, method)| {
            record([
                ("id", size()),
                ("method", literal(name.as_str())),
                ("args", tuple(method.args.iter().cloned())),
            ])
        }))
    }

    /// `record { id: size, data: buffer }` - the result is encoded
    /// separately with the method's result codec and carried as raw bytes.
    pub fn response_codec(&self) -> Codec {
        record([("id", size()), ("data", buffer())])
    }
}

/// Typed view of a decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub args: Vec<Value>,
}

impl Request {
    pub fn to_value(&self) -> Value {
        Value::record([
            ("id", Value::from(self.id)),
            ("method", Value::from(self.method.as_str())),
            ("args", Value::Array(self.args.clone())),
        ])
    }

    /// Reconstruct from a value decoded with the request codec. `None`
    /// means the value did not have the generated shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        let fields = value.as_record()?;
        Some(Self {
            id: fields.get("id")?.as_number()? as u64,
            method: fields.get("method")?.as_str()?.to_string(),
            args: fields.get("args")?.as_array()?.to_vec(),
        })
    }
}

/// Typed view of a response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub data: Vec<u8>,
}

impl Response {
    pub fn to_value(&self) -> Value {
        Value::record([
            ("id", Value::from(self.id)),
            ("data", Value::Bytes(self.data.clone())),
        ])
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let fields = value.as_record()?;
        Some(Self {
            id: fields.get("id")?.as_number()? as u64,
            data: fields.get("data")?.as_bytes()?.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bicode::{number, string, undefined};

    fn greeter() -> Protocol {
        Protocol::builder()
            .method("say_hello", [string()], string())
            .method("add", [number(), number()], number())
            .method("ping", [], undefined())
            .build()
    }

    #[test]
    fn request_roundtrip_selects_the_method_variant() {
        let protocol = greeter();
        let codec = protocol.request_codec();

        let request = Request {
            id: 7,
            method: "add".to_string(),
            args: vec![Value::Number(1.5), Value::Number(2.5)],
        };

        let bytes = codec.encode(&request.to_value()).unwrap();
        // Discriminator 1: `add` is the second declared method.
        assert_eq!(bytes[0], 1);

        let decoded = Request::from_value(&codec.decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn request_with_no_args_encodes_an_empty_tuple() {
        let protocol = greeter();
        let codec = protocol.request_codec();

        let request = Request {
            id: 0,
            method: "ping".to_string(),
            args: vec![],
        };
        // Variant 2, id 0, empty tuple: two bytes total.
        assert_eq!(codec.encode(&request.to_value()).unwrap(), vec![2, 0]);
    }

    #[test]
    fn unknown_method_fails_to_encode() {
        let protocol = greeter();
        let codec = protocol.request_codec();

        let request = Request {
            id: 1,
            method: "nope".to_string(),
            args: vec![],
        };
        assert!(codec.encode(&request.to_value()).is_err());
    }

    #[test]
    fn response_roundtrip() {
        let protocol = greeter();
        let codec = protocol.response_codec();

        let response = Response {
            id: 300,
            data: vec![1, 2, 3],
        };
        let bytes = codec.encode(&response.to_value()).unwrap();
        let decoded = Response::from_value(&codec.decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn wrong_arg_types_fail_to_encode() {
        let protocol = greeter();
        let codec = protocol.request_codec();

        let request = Request {
            id: 1,
            method: "add".to_string(),
            args: vec![Value::from("one"), Value::Number(2.0)],
        };
        assert!(codec.encode(&request.to_value()).is_err());
    }
}
