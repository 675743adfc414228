//! RPC-layer error taxonomy.

use bicode::{DecodeError, EncodeError};

/// Failures of the framed byte transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended part-way through a frame. Distinct from a clean
    /// end-of-stream between frames, which is not an error.
    #[error("transport closed mid-frame")]
    IncompleteFrame,

    #[error("transport closed")]
    Closed,
}

/// Failures surfaced to RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The connection reached end-of-stream while calls were outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
