//! WebSocket loopback integration tests
//!
//! Runs the client against a real in-process WebSocket collector on
//! 127.0.0.1 to exercise the tungstenite transport end to end: handshake,
//! event delivery, liveness replies, reconnect, and rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use trestle::{BridgeClient, BridgeConfig, LogLevel, SessionState};

const WAIT: Duration = Duration::from_secs(5);
const SECRET: &str = "itest-secret";

type WsServer = WebSocketStream<TcpStream>;

async fn bounded<T>(what: &str, fut: impl std::future::Future<Output = T>) -> T {
    timeout(WAIT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Next JSON text frame from the client, skipping transport-level frames;
/// `None` once the client closes
async fn next_json(ws: &mut WsServer) -> Option<Value> {
    while let Some(frame) = ws.next().await {
        match frame.ok()? {
            Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_json(ws: &mut WsServer, frame: &str) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

fn test_config(url: String) -> BridgeConfig {
    init_tracing();
    BridgeConfig::new(url, SECRET).with_backoff(50, 200)
}

/// Route client logs into the test output when RUST_LOG is set
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Handshake and event delivery
// =============================================================================

#[tokio::test]
async fn test_connects_and_delivers_console_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (obs_tx, mut obs) = mpsc::unbounded_channel::<Value>();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        let hello = next_json(&mut ws).await.expect("expected hello");
        assert_eq!(hello["type"], "hello", "first frame should be hello");
        assert_eq!(hello["secret"], SECRET);
        assert_eq!(hello["platform"], "rust");
        send_json(&mut ws, r#"{"type":"auth_success","clientId":"i1"}"#).await;

        // Probe the client once, then record everything it sends
        send_json(&mut ws, r#"{"type":"ping"}"#).await;
        while let Some(frame) = next_json(&mut ws).await {
            let _ = obs_tx.send(frame);
        }
    });

    let client = BridgeClient::new(test_config(url)).unwrap();
    client.start().await.unwrap();
    bounded("session", client.wait_connected()).await;

    client
        .send_console("integration line", LogLevel::Error)
        .await
        .unwrap();

    // The client must answer the probe and deliver the console event; frame
    // order over the socket is not fixed
    let mut pong = None;
    let mut console = None;
    while pong.is_none() || console.is_none() {
        let frame = bounded("client frame", obs.recv()).await.unwrap();
        match frame["type"].as_str() {
            Some("pong") => pong = Some(frame),
            Some("console") => console = Some(frame),
            other => panic!("unexpected frame type: {:?}", other),
        }
    }

    let console = console.unwrap();
    assert_eq!(console["message"], "integration line");
    assert_eq!(console["level"], "error");
    assert!(console["timestamp"].as_u64().unwrap() > 0);

    client.stop().await;
    bounded("server shutdown", server).await.unwrap();
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (obs_tx, mut obs) = mpsc::unbounded_channel::<Value>();
    let (drop_tx, drop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        // First session: accept, ack, then cut the connection on signal
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        let hello = next_json(&mut ws).await.expect("first hello");
        assert_eq!(hello["type"], "hello");
        send_json(&mut ws, r#"{"type":"auth_success","clientId":"i1"}"#).await;
        drop_rx.await.unwrap();
        drop(ws);

        // The client must come back on its own and handshake again
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        let hello = next_json(&mut ws).await.expect("second hello");
        assert_eq!(hello["secret"], SECRET, "retry should resend the secret");
        send_json(&mut ws, r#"{"type":"auth_success","clientId":"i2"}"#).await;
        while let Some(frame) = next_json(&mut ws).await {
            let _ = obs_tx.send(frame);
        }
    });

    let client = BridgeClient::new(test_config(url)).unwrap();
    let mut state_rx = client.subscribe_state();

    client.start().await.unwrap();
    bounded("first session", state_rx.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap();

    drop_tx.send(()).unwrap();
    bounded("drop detection", state_rx.wait_for(|s| *s == SessionState::Disconnected))
        .await
        .unwrap();
    bounded("second session", state_rx.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap();

    // The recovered session carries events again
    client.send_console("after reconnect", LogLevel::Info).await.unwrap();
    let frame = bounded("relayed event", obs.recv()).await.unwrap();
    assert_eq!(frame["type"], "console");
    assert_eq!(frame["message"], "after reconnect");

    client.stop().await;
    bounded("server shutdown", server).await.unwrap();
}

// =============================================================================
// Rejection
// =============================================================================

#[tokio::test]
async fn test_rejected_secret_never_connects() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let accepts = Arc::new(AtomicUsize::new(0));
    let server = {
        let accepts = Arc::clone(&accepts);
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                accepts.fetch_add(1, Ordering::SeqCst);
                let mut ws = accept_async(socket).await.unwrap();
                if next_json(&mut ws).await.is_some() {
                    send_json(&mut ws, r#"{"type":"auth_error","message":"Invalid secret"}"#)
                        .await;
                }
                // Drain until the client closes its half
                while next_json(&mut ws).await.is_some() {}
            }
        })
    };

    let config = BridgeConfig::new(url, "wrong-secret").with_backoff(50, 100);
    let client = BridgeClient::new(config).unwrap();
    client.start().await.unwrap();

    // Give the client several rejection cycles of real time
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(
        !client.is_connected(),
        "rejected client must never report connected"
    );
    assert!(
        accepts.load(Ordering::SeqCst) >= 2,
        "client should keep retrying after rejection, got {} attempts",
        accepts.load(Ordering::SeqCst)
    );

    client.stop().await;
    server.abort();
    let _ = server.await;
}
