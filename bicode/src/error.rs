//! Error taxonomy for the codec layer.
//!
//! Encode and decode failures are never retried internally: an encode error
//! means the value does not match the schema it was paired with, a decode
//! error means the input is truncated, corrupted or hostile. Both propagate
//! to the caller.

/// A value could not be encoded with the codec it was handed to.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// No option of a union accepted the value.
    #[error("no union variant matches value of kind {value_kind}")]
    NoMatchingVariant { value_kind: &'static str },

    /// The value's kind does not match the codec outside of a union
    /// (e.g. encoding a string with the number codec).
    #[error("schema mismatch: expected {expected}, got {value_kind}")]
    SchemaMismatch {
        expected: &'static str,
        value_kind: &'static str,
    },

    /// A record value is missing a declared field.
    #[error("record value is missing declared field `{field}`")]
    MissingField { field: String },

    /// A deferred codec cell was used before being bound.
    #[error("deferred codec used before it was bound")]
    UnboundDefer,

    /// A custom codec was passed to the schema codec without being
    /// registered as an extra identity.
    #[error("custom codec `{name}` is not registered for self-description")]
    UnregisteredCustom { name: String },

    /// Failure reported by a caller-supplied custom codec.
    #[error("custom codec: {0}")]
    Custom(String),
}

/// Input bytes could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A union discriminator was out of range - malformed or truncated
    /// input, treated as fatal rather than coerced.
    #[error("union discriminator {index} out of range (only {options} options)")]
    InvalidDiscriminant { index: u64, options: usize },

    /// A varint does not fit the numeric domain being decoded.
    #[error("varint overflows the value domain")]
    VarintOverflow,

    /// A schema table or registry reference was out of range.
    #[error("schema reference {reference} out of range")]
    BadSchemaReference { reference: u64 },

    /// A schema block named an unknown constructor.
    #[error("unknown schema constructor index {index}")]
    BadSchemaConstructor { index: u64 },

    /// String contents were not valid UTF-8.
    #[error("invalid utf-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A deferred codec cell was used before being bound.
    #[error("deferred codec used before it was bound")]
    UnboundDefer,

    /// Failure reported by a caller-supplied custom codec.
    #[error("custom codec: {0}")]
    Custom(String),
}

/// A textual interchange payload failed schema validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("JSON payload does not match the expected type")]
    Mismatch,

    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
