//! End-to-end tests: client and server over an in-memory duplex stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use bicode::{Value, number, string, undefined};
use bicode_rpc::{
    Channels, Client, FramedIo, Handler, HandlerError, Protocol, RpcError, serve_protocol,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn greeter_protocol() -> Arc<Protocol> {
    Arc::new(
        Protocol::builder()
            .method("say_hello", [string()], string())
            .method("add", [number(), number()], number())
            .method("never_replies", [], undefined())
            .build(),
    )
}

struct Greeter;

#[async_trait]
impl Handler for Greeter {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        match method {
            "say_hello" => {
                let name = args[0].as_str().unwrap();
                // Delay so a concurrent `add` can overtake this response.
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Value::from(format!("Hello, {name}!")))
            }
            "add" => {
                let a = args[0].as_number().unwrap();
                let b = args[1].as_number().unwrap();
                Ok(Value::Number(a + b))
            }
            "never_replies" => Err(HandlerError::new("declined")),
            other => Err(HandlerError::new(format!("unhandled method {other}"))),
        }
    }
}

/// Client connected to a served `Greeter` over an in-memory pipe. The
/// returned stream keeps the server side alive; drop it to close.
fn connect() -> (Client, tokio::task::JoinHandle<Result<(), RpcError>>) {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(4096);
    let (client_writer, client_reader) = FramedIo::new(client_io).split();
    let (server_writer, server_reader) = FramedIo::new(server_io).split();

    let protocol = greeter_protocol();
    let server = tokio::spawn(serve_protocol(
        server_reader,
        server_writer,
        Arc::clone(&protocol),
        Arc::new(Greeter),
    ));
    let client = Client::new(client_reader, client_writer, protocol);
    (client, server)
}

#[tokio::test]
async fn call_returns_the_handler_result() {
    let (client, _server) = connect();

    let result = client
        .call("say_hello", vec![Value::from("world")])
        .await
        .unwrap();
    assert_eq!(result, Value::from("Hello, world!"));
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let (client, _server) = connect();
    let client = Arc::new(client);

    // say_hello sleeps 50ms server-side; add answers immediately, so its
    // response arrives first and must still land on the right call.
    let slow = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("say_hello", vec![Value::from("late")]).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let fast = client
        .call("add", vec![Value::Number(2.0), Value::Number(3.0)])
        .await
        .unwrap();

    assert_eq!(fast, Value::Number(5.0));
    assert_eq!(slow.await.unwrap().unwrap(), Value::from("Hello, late!"));
}

#[tokio::test]
async fn unknown_method_is_rejected_locally() {
    let (client, _server) = connect();

    match client.call("no_such_method", vec![]).await {
        Err(RpcError::UnknownMethod(name)) => assert_eq!(name, "no_such_method"),
        other => panic!("expected UnknownMethod, got {other:?}"),
    }
}

#[tokio::test]
async fn handler_failure_produces_no_response_but_keeps_serving() {
    let (client, _server) = connect();
    let client = Arc::new(client);

    // The failed call never completes; later calls still work.
    let abandoned = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("never_replies", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = client
        .call("add", vec![Value::Number(1.0), Value::Number(1.0)])
        .await
        .unwrap();
    assert_eq!(result, Value::Number(2.0));

    assert!(!abandoned.is_finished());
    abandoned.abort();
}

#[tokio::test]
async fn pending_calls_fail_when_the_connection_closes() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(4096);
    let (client_writer, client_reader) = FramedIo::new(client_io).split();

    let client = Client::new(client_reader, client_writer, greeter_protocol());

    // No server ever answers; dropping the peer ends the response stream.
    let pending = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(server_io);
    });

    match client.call("say_hello", vec![Value::from("x")]).await {
        Err(RpcError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {other:?}"),
    }
    pending.await.unwrap();
}

fn paired_channels() -> (Channels, Channels) {
    init_tracing();
    let (a, b) = tokio::io::duplex(4096);
    let (a_writer, a_reader) = FramedIo::new(a).split();
    let (b_writer, b_reader) = FramedIo::new(b).split();
    (
        Channels::new(a_reader, a_writer),
        Channels::new(b_reader, b_writer),
    )
}

#[tokio::test]
async fn channels_route_by_id() {
    use bicode_rpc::{BufferRead, BufferWrite};
    use bytes::Bytes;

    let (left, right) = paired_channels();

    let (mut w3, _) = left.channel(3);
    let (mut w7, _) = left.channel(7);
    let (_, mut r3) = right.channel(3);
    let (_, mut r7) = right.channel(7);

    w3.write(Bytes::from_static(b"for three")).await.unwrap();
    w7.write(Bytes::from_static(b"for seven")).await.unwrap();
    w3.write(Bytes::from_static(b"three again")).await.unwrap();

    assert_eq!(r7.read().await.unwrap().unwrap(), &b"for seven"[..]);
    assert_eq!(r3.read().await.unwrap().unwrap(), &b"for three"[..]);
    assert_eq!(r3.read().await.unwrap().unwrap(), &b"three again"[..]);
}

#[tokio::test]
async fn rpc_runs_over_a_multiplexed_channel() {
    let (left, right) = paired_channels();

    let protocol = greeter_protocol();
    let (server_writer, server_reader) = right.channel(0);
    let _server = tokio::spawn(serve_protocol(
        server_reader,
        server_writer,
        Arc::clone(&protocol),
        Arc::new(Greeter),
    ));

    let (client_writer, client_reader) = left.channel(0);
    let client = Client::new(client_reader, client_writer, protocol);

    let result = client
        .call("add", vec![Value::Number(20.0), Value::Number(22.0)])
        .await
        .unwrap();
    assert_eq!(result, Value::Number(42.0));
}

#[tokio::test]
async fn closing_the_transport_closes_every_channel() {
    use bicode_rpc::BufferRead;

    init_tracing();
    let (a, b) = tokio::io::duplex(4096);
    let (a_writer, a_reader) = FramedIo::new(a).split();
    let left = Channels::new(a_reader, a_writer);
    let (_, mut reader) = left.channel(1);

    drop(b);

    assert_eq!(reader.read().await.unwrap(), None);

    // Channels opened after the close are born closed.
    let (_, mut late) = left.channel(99);
    assert_eq!(late.read().await.unwrap(), None);
}
