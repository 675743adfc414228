//! Framed byte transport.
//!
//! The RPC layer speaks whole messages, not byte streams. [`BufferRead`] /
//! [`BufferWrite`] are the message contract (`None` from `read` is a clean
//! end-of-stream), and [`FramedIo`] adapts any duplex byte stream to it with
//! a 4-byte big-endian length header per message.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TransportError;

/// Read side of a message transport.
#[async_trait]
pub trait BufferRead: Send {
    /// Next whole message, or `None` on clean end-of-stream.
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Write side of a message transport.
#[async_trait]
pub trait BufferWrite: Send {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError>;
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(usize::MAX)
        .new_codec()
}

/// Length-prefixed framing over any `AsyncRead + AsyncWrite`.
///
/// The reader accumulates partial reads until a full frame is available. An
/// end-of-stream that lands *inside* a frame is a fatal
/// [`TransportError::IncompleteFrame`]; between frames it is a clean close.
pub struct FramedIo<T> {
    inner: Framed<T, LengthDelimitedCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> FramedIo<T> {
    pub fn new(io: T) -> Self {
        Self {
            inner: Framed::new(io, frame_codec()),
        }
    }

    /// Split into independently-owned write and read halves.
    pub fn split(self) -> (FrameWriter<T>, FrameReader<T>) {
        let (sink, stream) = self.inner.split();
        (FrameWriter { sink }, FrameReader { stream })
    }
}

pub struct FrameWriter<T> {
    sink: SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>,
}

pub struct FrameReader<T> {
    stream: SplitStream<Framed<T, LengthDelimitedCodec>>,
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> BufferWrite for FrameWriter<T> {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.sink.send(frame).await.map_err(TransportError::Io)
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> BufferRead for FrameReader<T> {
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.stream.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            // The codec reports leftover bytes at EOF as InvalidData and a
            // short body as UnexpectedEof: both mean the peer went away
            // mid-frame.
            Some(Err(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                Err(TransportError::IncompleteFrame)
            }
            Some(Err(e)) => Err(TransportError::Io(e)),
        }
    }
}
