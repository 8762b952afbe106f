//! Per-connection identity and presence state.

use std::sync::Arc;

use globe_common::{ClientMessage, Identity, Position, ServerMessage};

use crate::error::ProtocolError;

use super::fanout::PeerSender;
use super::presence::PresenceRelay;
use super::registry::Peer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unjoined,
    Joined,
    Closed,
}

/// State for a single transport session.
///
/// Owned by the connection's own task, so its events reach the relay one at a
/// time. Dropping a `Connection` closes it.
pub struct Connection {
    /// Unique identity (`conn_` prefixed ULID), fixed for the session.
    id: Identity,
    room: Option<String>,
    /// Last position sent by the client.
    position: Option<Position>,
    state: ConnectionState,
    /// Frames owed to the client ahead of anything in its queue.
    greeting: Vec<ServerMessage>,
    outbound: PeerSender,
    relay: Arc<PresenceRelay>,
}

impl Connection {
    /// Allocate a fresh identity for a new transport session.
    pub fn new(relay: Arc<PresenceRelay>, outbound: PeerSender) -> Self {
        Self {
            id: Identity::generate(),
            room: None,
            position: None,
            state: ConnectionState::Unjoined,
            greeting: Vec::new(),
            outbound,
            relay,
        }
    }

    pub fn id(&self) -> &Identity {
        &self.id
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Join `room_name` (created on demand) and announce this connection.
    /// Only the first call has an effect. On success the greeting holds a
    /// `welcome` with this identity followed by the room snapshot.
    pub fn open(&mut self, room_name: &str) -> Identity {
        if self.state != ConnectionState::Unjoined {
            return self.id.clone();
        }

        let mut peer = Peer::new(self.id.clone(), self.outbound.clone());
        peer.position = self.position;

        match self.relay.announce_join(room_name, peer) {
            Some(report) => {
                self.state = ConnectionState::Joined;
                self.room = Some(room_name.to_string());
                tracing::info!(
                    connection_id = %self.id,
                    room = %room_name,
                    notified = report.notified,
                    seeded = report.seed.len(),
                    "connection joined room"
                );
                self.greeting.push(ServerMessage::welcome(self.id.clone()));
                self.greeting.extend(report.seed);
            }
            None => {
                tracing::error!(
                    connection_id = %self.id,
                    room = %room_name,
                    "identity already present in room"
                );
            }
        }
        self.id.clone()
    }

    /// Frames to write before draining the outbound queue. Empty after the
    /// first call.
    pub fn take_greeting(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.greeting)
    }

    /// Handle one inbound text frame. A malformed frame is returned as an
    /// error for the caller to log; the connection is left untouched.
    pub fn receive(&mut self, text: &str) -> Result<(), ProtocolError> {
        let position = ClientMessage::parse_position(text)?;
        self.receive_position(position);
        Ok(())
    }

    /// Store a validated position and broadcast it if joined. A position that
    /// arrives before `open` is carried by the join announcement instead.
    pub fn receive_position(&mut self, position: Position) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Unjoined => self.position = Some(position),
            ConnectionState::Joined => {
                self.position = Some(position);
                if let Some(room) = self.room.as_deref() {
                    self.relay.announce_position(room, &self.id, position);
                }
            }
        }
    }

    /// Leave the room and broadcast the removal. Idempotent, and a no-op for a
    /// connection that never joined.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        if let Some(room) = self.room.as_deref() {
            let notified = self.relay.announce_leave(room, &self.id);
            tracing::info!(
                connection_id = %self.id,
                room = %room,
                notified = notified.unwrap_or(0),
                "connection left room"
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
