//! RPC server: decodes requests, dispatches to a handler, writes responses.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use bicode::Value;

use crate::error::RpcError;
use crate::protocol::{Protocol, Request, Response};
use crate::transport::{BufferRead, BufferWrite, FramedIo};

/// Application-level failure of a single method call.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Implements the methods of a protocol.
///
/// `method` is guaranteed to name a method of the served protocol and
/// `args` to match its declared argument codecs; both were checked when the
/// request decoded.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Serve one connection until its request stream ends.
///
/// Each request runs as its own task, so a slow method does not block later
/// requests and responses go out in completion order. A handler failure is
/// logged and produces no response; an undecodable request frame is fatal
/// for the connection.
pub async fn serve_protocol<R, W>(
    mut reader: R,
    writer: W,
    protocol: Arc<Protocol>,
    handler: Arc<dyn Handler>,
) -> Result<(), RpcError>
where
    R: BufferRead,
    W: BufferWrite + 'static,
{
    let request_codec = protocol.request_codec();
    let response_codec = protocol.response_codec();
    let writer: Arc<Mutex<Box<dyn BufferWrite>>> = Arc::new(Mutex::new(Box::new(writer)));

    loop {
        let frame = match reader.read().await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        let value = request_codec.decode(&frame)?;
        let Some(request) = Request::from_value(&value) else {
            // The generated codec only produces request-shaped values.
            tracing::error!("request decoded to an unexpected shape");
            return Err(RpcError::ConnectionClosed);
        };

        let result_codec = match protocol.method(&request.method) {
            Some(method) => method.result.clone(),
            None => return Err(RpcError::UnknownMethod(request.method)),
        };

        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        let response_codec = response_codec.clone();
        tokio::spawn(async move {
            let id = request.id;
            let method = request.method.clone();

            let result = match handler.handle(&request.method, request.args).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(method, id, error = %e, "handler failed");
                    return;
                }
            };

            let frame = result_codec
                .encode(&result)
                .and_then(|data| response_codec.encode(&Response { id, data }.to_value()));
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(method, id, error = %e, "response failed to encode");
                    return;
                }
            };

            let mut writer = writer.lock().await;
            if let Err(e) = writer.write(frame.into()).await {
                tracing::error!(method, id, error = %e, "response failed to send");
            }
        });
    }
}

/// Accept loop: serve every incoming connection with the same protocol and
/// handler until the listener errors.
pub async fn serve_listener(
    listener: TcpListener,
    protocol: Arc<Protocol>,
    handler: Arc<dyn Handler>,
) -> Result<(), std::io::Error> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "connection accepted");

        let protocol = Arc::clone(&protocol);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let (writer, reader) = FramedIo::new(socket).split();
            match serve_protocol(reader, writer, protocol, handler).await {
                Ok(()) => tracing::info!(%peer, "connection closed"),
                Err(e) => tracing::error!(%peer, error = %e, "connection failed"),
            }
        });
    }
}
