//! Channel multiplexing: many numbered message streams over one transport.
//!
//! Each outgoing message is wrapped in a `{ id, buffer }` envelope; a demux
//! task routes incoming envelopes to a per-id queue. Both directions share
//! the id space, so channel 3 here talks to channel 3 on the peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use bicode::{Codec, Value, buffer, record, size};

use crate::error::TransportError;
use crate::queue::AsyncQueue;
use crate::transport::{BufferRead, BufferWrite};

fn envelope_codec() -> Codec {
    record([("id", size()), ("buffer", buffer())])
}

struct ChannelQueues {
    map: DashMap<u64, Arc<AsyncQueue<Bytes>>>,
    open: AtomicBool,
}

impl ChannelQueues {
    fn new() -> Self {
        Self {
            map: DashMap::new(),
            open: AtomicBool::new(true),
        }
    }

    /// Queue for `id`, created on first use. Queues created after the
    /// underlying transport ended are born closed.
    fn queue(&self, id: u64) -> Arc<AsyncQueue<Bytes>> {
        let queue = self
            .map
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncQueue::new()))
            .clone();
        if !self.open.load(Ordering::Acquire) {
            queue.close();
        }
        queue
    }

    fn close_all(&self) {
        self.open.store(false, Ordering::Release);
        for entry in self.map.iter() {
            entry.value().close();
        }
    }
}

/// Multiplexer over one framed transport.
pub struct Channels {
    codec: Codec,
    writer: Arc<Mutex<Box<dyn BufferWrite>>>,
    queues: Arc<ChannelQueues>,
}

impl Channels {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: BufferRead + 'static,
        W: BufferWrite + 'static,
    {
        let queues = Arc::new(ChannelQueues::new());
        tokio::spawn(demux_loop(reader, Arc::clone(&queues)));

        Self {
            codec: envelope_codec(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            queues,
        }
    }

    /// The write and read endpoints of channel `id`. May be called any
    /// number of times; endpoints for the same id share one queue.
    pub fn channel(&self, id: u64) -> (ChannelWriter, ChannelReader) {
        (
            ChannelWriter {
                id,
                codec: self.codec.clone(),
                writer: Arc::clone(&self.writer),
            },
            ChannelReader {
                queue: self.queues.queue(id),
            },
        )
    }
}

async fn demux_loop<R: BufferRead>(mut reader: R, queues: Arc<ChannelQueues>) {
    let codec = envelope_codec();

    loop {
        let frame = match reader.read().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("channel transport ended");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "channel transport failed");
                break;
            }
        };

        let envelope = codec
            .decode(&frame)
            .ok()
            .and_then(|value| parse_envelope(&value));
        let Some((id, payload)) = envelope else {
            tracing::error!("undecodable channel envelope, closing");
            break;
        };

        queues.queue(id).push(payload);
    }

    queues.close_all();
}

fn parse_envelope(value: &Value) -> Option<(u64, Bytes)> {
    let fields = value.as_record()?;
    let id = fields.get("id")?.as_number()? as u64;
    let payload = Bytes::copy_from_slice(fields.get("buffer")?.as_bytes()?);
    Some((id, payload))
}

/// Write endpoint of one channel.
pub struct ChannelWriter {
    id: u64,
    codec: Codec,
    writer: Arc<Mutex<Box<dyn BufferWrite>>>,
}

/// Read endpoint of one channel.
pub struct ChannelReader {
    queue: Arc<AsyncQueue<Bytes>>,
}

#[async_trait]
impl BufferWrite for ChannelWriter {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let envelope = Value::record([
            ("id", Value::from(self.id)),
            ("buffer", Value::Bytes(frame.to_vec())),
        ]);
        let encoded = self
            .codec
            .encode(&envelope)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;

        let mut writer = self.writer.lock().await;
        writer.write(encoded.into()).await
    }
}

#[async_trait]
impl BufferRead for ChannelReader {
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.queue.pop().await)
    }
}
