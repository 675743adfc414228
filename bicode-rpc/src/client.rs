//! RPC client: encodes calls, correlates responses by id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, oneshot};

use bicode::{Codec, Value};

use crate::error::RpcError;
use crate::protocol::{Protocol, Request, Response};
use crate::transport::{BufferRead, BufferWrite};

type PendingTable = DashMap<u64, oneshot::Sender<Result<Vec<u8>, RpcError>>>;

/// Caller side of a protocol connection.
///
/// Requests carry a connection-unique id; a background task reads response
/// frames and completes the matching pending call, so responses may arrive
/// in any order. When the read side ends, every outstanding and future call
/// fails with [`RpcError::ConnectionClosed`].
pub struct Client {
    protocol: Arc<Protocol>,
    request_codec: Codec,
    writer: Arc<Mutex<Box<dyn BufferWrite>>>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
}

impl Client {
    pub fn new<R, W>(reader: R, writer: W, protocol: Arc<Protocol>) -> Self
    where
        R: BufferRead + 'static,
        W: BufferWrite + 'static,
    {
        let request_codec = protocol.request_codec();
        let response_codec = protocol.response_codec();
        let pending: Arc<PendingTable> = Arc::new(DashMap::new());

        tokio::spawn(read_loop(reader, response_codec, Arc::clone(&pending)));

        Self {
            protocol,
            request_codec,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(0),
        }
    }

    /// Call `method` and wait for its result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let method_def = self
            .protocol
            .method(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;
        let result_codec = method_def.result.clone();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            id,
            method: method.to_string(),
            args,
        };
        let frame = self.request_codec.encode(&request.to_value())?;

        // Register before writing: the response can arrive before the write
        // call even returns.
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write(frame.into()).await
        };
        if let Err(e) = write_result {
            self.pending.remove(&id);
            return Err(e.into());
        }

        let data = match rx.await {
            Ok(result) => result?,
            // Sender dropped without completing: the read loop is gone.
            Err(_) => return Err(RpcError::ConnectionClosed),
        };
        Ok(result_codec.decode(&data)?)
    }
}

async fn read_loop<R: BufferRead>(
    mut reader: R,
    response_codec: Codec,
    pending: Arc<PendingTable>,
) {
    loop {
        let frame = match reader.read().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("response stream ended");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "response stream failed");
                break;
            }
        };

        let response = response_codec
            .decode(&frame)
            .ok()
            .and_then(|value| Response::from_value(&value));
        let Some(response) = response else {
            tracing::error!("undecodable response frame, closing");
            break;
        };

        match pending.remove(&response.id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(response.data));
            }
            None => {
                tracing::warn!(id = response.id, "response for unknown request id");
            }
        }
    }

    // Reject everything still outstanding.
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }
}
