//! Channel transport tests
//!
//! Runs the relay on an ephemeral port and talks to it over a real WebSocket.

use di_axum::RouterServiceProviderExtensions;
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use ollama_relay::{api, build_provider, infrastructure::config::RelayConfig};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay(upstream: &str) -> SocketAddr {
    let provider = build_provider(RelayConfig::with_upstream(upstream)).unwrap();
    let app = api::router().with_provider(provider);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/socket")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

/// Next JSON text frame, skipping control frames
async fn receive(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn chat_message(session: &str, prompt: &str) -> Value {
    json!({
        "event": "chat message",
        "session": session,
        "data": {"message": prompt, "model": "llama3"}
    })
}

fn is_terminal(event: &Value) -> bool {
    event["event"] == "chat response complete" || event["event"] == "chat response error"
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_session_over_socket() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .body("{\"response\":\"Hel\"}\n{\"response\":\"lo\"}\n{\"done\":true,\"id\":\"42\"}\n");
        })
        .await;
    let addr = spawn_relay(&server.base_url()).await;
    let mut socket = connect(addr).await;

    send(&mut socket, chat_message("s1", "Say hello")).await;

    assert_eq!(
        receive(&mut socket).await,
        json!({"event": "chat response chunk", "session": "s1", "data": "Hel"})
    );
    assert_eq!(
        receive(&mut socket).await,
        json!({"event": "chat response chunk", "session": "s1", "data": "lo"})
    );
    assert_eq!(
        receive(&mut socket).await,
        json!({"event": "chat response complete", "session": "s1", "data": "42"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_sessions_never_cross_deliver() {
    let server = MockServer::start_async().await;
    for (prompt, words) in [("first", ["a1", "a2", "a3"]), ("second", ["b1", "b2", "b3"])] {
        let body: String = words
            .iter()
            .map(|w| format!("{{\"response\":\"{w}\"}}\n"))
            .chain(std::iter::once(format!(
                "{{\"done\":true,\"id\":\"{prompt}\"}}\n"
            )))
            .collect();
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body(json!({"model": "llama3", "prompt": prompt, "stream": true}));
                then.status(200).body(body);
            })
            .await;
    }
    let addr = spawn_relay(&server.base_url()).await;
    let mut socket = connect(addr).await;

    send(&mut socket, chat_message("A", "first")).await;
    send(&mut socket, chat_message("B", "second")).await;

    let mut by_session: HashMap<String, Vec<Value>> = HashMap::new();
    let mut finished = 0;
    while finished < 2 {
        let event = receive(&mut socket).await;
        if is_terminal(&event) {
            finished += 1;
        }
        let session = event["session"].as_str().unwrap().to_owned();
        by_session.entry(session).or_default().push(event["data"].clone());
    }

    assert_eq!(by_session["A"], vec![json!("a1"), json!("a2"), json!("a3"), json!("first")]);
    assert_eq!(by_session["B"], vec![json!("b1"), json!("b2"), json!("b3"), json!("second")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_upstream_over_socket() {
    let addr = spawn_relay("http://127.0.0.1:9").await;
    let mut socket = connect(addr).await;

    send(&mut socket, chat_message("s1", "hi")).await;

    let event = receive(&mut socket).await;
    assert_eq!(event["event"], "chat response error");
    assert_eq!(event["session"], "s1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generated_session_id_when_client_sends_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).body("{\"response\":\"x\",\"done\":true}\n");
        })
        .await;
    let addr = spawn_relay(&server.base_url()).await;
    let mut socket = connect(addr).await;

    send(
        &mut socket,
        json!({"event": "chat message", "data": {"prompt": "hi", "model": "llama3"}}),
    )
    .await;

    let chunk = receive(&mut socket).await;
    let complete = receive(&mut socket).await;
    assert!(!chunk["session"].as_str().unwrap().is_empty());
    assert_eq!(chunk["session"], complete["session"]);
    assert_eq!(complete["event"], "chat response complete");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_frames_get_session_less_errors() {
    let addr = spawn_relay("http://127.0.0.1:9").await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::Text("not json".to_owned()))
        .await
        .unwrap();
    let event = receive(&mut socket).await;
    assert_eq!(event["event"], "chat response error");
    assert!(event.get("session").is_none());

    send(&mut socket, json!({"event": "chat message", "session": "s1"})).await;
    let event = receive(&mut socket).await;
    assert_eq!(event["event"], "chat response error");
    assert!(event.get("session").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_session_stays_silent() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(Duration::from_millis(500))
                .body("{\"response\":\"too late\"}\n{\"done\":true}\n");
        })
        .await;
    let addr = spawn_relay(&server.base_url()).await;
    let mut socket = connect(addr).await;

    send(&mut socket, chat_message("s1", "hi")).await;
    send(&mut socket, json!({"event": "chat cancel", "session": "s1"})).await;
    // Frames are handled in order, so this answer proves the cancel was processed.
    send(&mut socket, json!({"event": "ping"})).await;

    let event = receive(&mut socket).await;
    assert_eq!(event["event"], "chat response error");
    assert!(event.get("session").is_none());

    // Outlive the upstream delay; the cancelled session must not speak.
    let late = timeout(Duration::from_millis(1000), socket.next()).await;
    assert!(late.is_err(), "cancelled session delivered {late:?}");
    assert!(generate.hits_async().await <= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_id_can_be_reused_after_cancel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(Duration::from_millis(300))
                .body("{\"response\":\"x\"}\n{\"done\":true,\"id\":\"9\"}\n");
        })
        .await;
    let addr = spawn_relay(&server.base_url()).await;
    let mut socket = connect(addr).await;

    send(&mut socket, chat_message("s1", "first")).await;
    send(&mut socket, json!({"event": "chat cancel", "session": "s1"})).await;
    send(&mut socket, chat_message("s1", "second")).await;

    // The cancelled run ends first and must leave the new registration alone.
    assert_eq!(
        receive(&mut socket).await,
        json!({"event": "chat response chunk", "session": "s1", "data": "x"})
    );
    assert_eq!(
        receive(&mut socket).await,
        json!({"event": "chat response complete", "session": "s1", "data": "9"})
    );
}
