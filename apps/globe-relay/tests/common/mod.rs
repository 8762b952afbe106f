#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use globe_relay::config::Config;
use globe_relay::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test config: default party and a small peer queue.
pub fn test_config() -> Config {
    Config {
        port: 0,
        peer_queue_capacity: 64,
        ..Config::default()
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState) {
    test_app_with(test_config())
}

pub fn test_app_with(config: Config) -> (Router, AppState) {
    let state = AppState::new(config);
    let app = globe_relay::routes::router().with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing.
/// The server runs in the background.
pub async fn start_ws_server() -> (SocketAddr, AppState) {
    start_ws_server_with(test_config()).await
}

pub async fn start_ws_server_with(config: Config) -> (SocketAddr, AppState) {
    let (app, state) = test_app_with(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Connect to `room` and consume the welcome frame. The relay has registered
/// the connection by the time this returns.
pub async fn join(addr: SocketAddr, state: &AppState, room: &str) -> WsStream {
    join_with_id(addr, state, room).await.0
}

/// Like [`join`], also returning the identity announced in the welcome.
pub async fn join_with_id(addr: SocketAddr, state: &AppState, room: &str) -> (WsStream, String) {
    let url = format!("ws://{addr}/parties/globe/{room}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let welcome = next_event(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    let id = welcome["id"].as_str().expect("welcome id").to_string();
    assert!(
        state.rooms().members(room).iter().any(|m| m.id.as_str() == id),
        "welcomed before joining {room}"
    );
    (ws, id)
}

/// Poll the registry until `room` has exactly `count` members.
pub async fn wait_for_members(state: &AppState, room: &str, count: usize) {
    time::timeout(Duration::from_secs(5), async {
        while state.rooms().members(room).len() != count {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("room {room} never reached {count} members"));
}

/// Send an `add-marker-request`.
pub async fn send_position(ws: &mut WsStream, lat: f64, lng: f64) {
    let msg = serde_json::json!({ "type": "add-marker-request", "lat": lat, "lng": lng });
    send_text(ws, &msg.to_string()).await;
}

pub async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .expect("send text");
}

/// Read the next presence event, skipping control frames.
pub async fn next_event(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse event");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {other:?}"),
        }
    }
}

/// Assert that nothing arrives within `ms` milliseconds.
pub async fn expect_silence(ws: &mut WsStream, ms: u64) {
    if let Ok(Some(Ok(msg))) = time::timeout(Duration::from_millis(ms), ws.next()).await {
        panic!("Expected no event, got: {msg:?}");
    }
}
