//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use globe_common::ServerMessage;

use crate::error::ApiError;
use crate::AppState;

use super::connection::Connection;
use super::fanout::{peer_channel, PeerReceiver};

/// Close code sent to a peer evicted for falling behind (RFC 6455 "Try Again Later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Upper bound on writing the close frame to a peer that stopped reading.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest accepted room name, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new().route("/parties/{party}/{room}", get(ws_upgrade))
}

/// Only the configured party is served.
pub fn check_party(state: &AppState, party: &str) -> Result<(), ApiError> {
    if party != state.config.party {
        return Err(ApiError::not_found(format!("Unknown party '{party}'")));
    }
    Ok(())
}

pub fn check_room_name(room: &str) -> Result<(), ApiError> {
    let len = room.chars().count();
    if len == 0 || len > MAX_ROOM_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Room name must be 1-{MAX_ROOM_NAME_LEN} characters"
        )));
    }
    Ok(())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path((party, room)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    check_party(&state, &party)?;
    check_room_name(&room)?;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, room)))
}

async fn handle_connection(socket: WebSocket, state: AppState, room: String) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (outbound, inbox) = peer_channel(state.config.peer_queue_capacity);

    let mut connection = Connection::new(state.relay.clone(), outbound);
    connection.open(&room);

    // Welcome and room snapshot go out ahead of the queue, which only ever
    // holds events newer than the snapshot.
    let eviction = inbox.eviction();
    let greeting = connection.take_greeting();
    let greeted = tokio::select! {
        sent = send_greeting(&mut ws_tx, greeting) => match sent {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(?e, connection_id = %connection.id(), "failed to send greeting");
                false
            }
        },
        _ = eviction.wait() => {
            evict(&connection, &mut ws_tx).await;
            false
        }
    };

    if greeted {
        run_connection(&mut connection, ws_tx, ws_rx, inbox).await;
    }

    // Covers voluntary close, transport errors and eviction alike.
    connection.close();
}

/// Main connection loop: apply client position reports, forward queued room
/// events to the socket, and stop on transport close or eviction.
async fn run_connection(
    connection: &mut Connection,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut inbox: PeerReceiver,
) {
    let eviction = inbox.eviction();

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = connection.receive(text.as_str()) {
                            tracing::debug!(
                                connection_id = %connection.id(),
                                %err,
                                "discarding inbound message"
                            );
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(connection_id = %connection.id(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %connection.id(), "ws read error");
                        break;
                    }
                }
            }

            // Room event queued for this connection.
            event = inbox.recv() => {
                let Some(event) = event else { break };
                let Some(frame) = encode(&event) else { continue };
                // A peer that stopped reading blocks this write; eviction
                // must still get through.
                tokio::select! {
                    sent = ws_tx.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = eviction.wait() => {
                        evict(connection, &mut ws_tx).await;
                        break;
                    }
                }
            }

            // A fan-out found our queue full.
            _ = eviction.wait() => {
                evict(connection, &mut ws_tx).await;
                break;
            }
        }
    }
}

async fn evict(connection: &Connection, ws_tx: &mut SplitSink<WebSocket, Message>) {
    tracing::warn!(
        connection_id = %connection.id(),
        "connection fell behind room events, closing"
    );
    let close = send_close(ws_tx, CLOSE_TRY_AGAIN_LATER, "Too slow");
    if tokio::time::timeout(CLOSE_WRITE_TIMEOUT, close).await.is_err() {
        tracing::debug!(connection_id = %connection.id(), "close frame not written, dropping socket");
    }
}

/// Write the welcome and room snapshot in one flush.
async fn send_greeting(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    greeting: Vec<ServerMessage>,
) -> Result<(), axum::Error> {
    if greeting.is_empty() {
        return Ok(());
    }
    for message in &greeting {
        if let Some(frame) = encode(message) {
            ws_tx.feed(frame).await?;
        }
    }
    ws_tx.flush().await
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(err) => {
            tracing::error!(%err, "failed to encode room event");
            None
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
