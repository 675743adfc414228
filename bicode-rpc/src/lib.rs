//! Request/response RPC and channel multiplexing over `bicode` codecs.
//!
//! A [`Protocol`] declares methods and derives the wire codecs for them;
//! [`Client`] and [`serve_protocol`] speak that protocol over any
//! [`BufferRead`] / [`BufferWrite`] transport, with [`FramedIo`] providing
//! length-prefixed framing for byte streams and [`Channels`] multiplexing
//! several transports over one.

mod channels;
mod client;
mod error;
mod protocol;
mod queue;
mod server;
mod transport;

pub use channels::{ChannelReader, ChannelWriter, Channels};
pub use client::Client;
pub use error::{RpcError, TransportError};
pub use protocol::{Method, Protocol, ProtocolBuilder, Request, Response};
pub use queue::AsyncQueue;
pub use server::{Handler, HandlerError, serve_listener, serve_protocol};
pub use transport::{BufferRead, BufferWrite, FrameReader, FrameWriter, FramedIo};
