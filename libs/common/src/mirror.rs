//! Client-side cache of markers, rebuilt incrementally from relay events.
//!
//! The relay never echoes a client's own reports back to it. The viewer learns
//! its identity from the `welcome` frame and records its own location through
//! [`Mirror::locate_self`].
//!
//! Mutation and per-frame reads happen on the same task. When the transport
//! delivers events on another thread, push them into a [`MirrorInbox`] and
//! call [`Mirror::drain`] once per frame before [`Mirror::frame`].

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::protocol::{Identity, Position, ServerMessage};

/// Marker size for the viewer's own marker.
pub const OWN_MARKER_SIZE: f32 = 0.1;
/// Marker size for every other member.
pub const PEER_MARKER_SIZE: f32 = 0.05;

/// One marker as consumed by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderMarker {
    /// `[lat, lng]` in degrees.
    pub location: [f64; 2],
    pub size: f32,
}

/// Local mapping from identity to last-known location.
#[derive(Debug, Default)]
pub struct Mirror {
    own_id: Option<Identity>,
    markers: HashMap<Identity, Option<Position>>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the viewer's own identity so its marker gets emphasis. The
    /// viewer counts as present from then on.
    pub fn set_self(&mut self, id: Identity) {
        self.markers.entry(id.clone()).or_insert(None);
        self.own_id = Some(id);
    }

    pub fn own_id(&self) -> Option<&Identity> {
        self.own_id.as_ref()
    }

    /// Record the position this client just reported. Ignored until the
    /// viewer's identity is known.
    pub fn locate_self(&mut self, position: Position) {
        if let Some(id) = &self.own_id {
            self.markers.insert(id.clone(), Some(position));
        }
    }

    /// Apply one inbound event. `add-marker` overwrites, `remove-marker` of an
    /// unknown id is a no-op.
    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { id } => self.set_self(id),
            ServerMessage::AddMarker { position } => {
                let location = position.position();
                self.markers.insert(position.id, location);
            }
            ServerMessage::RemoveMarker { id } => {
                self.markers.remove(&id);
            }
        }
    }

    /// Apply every event queued since the last frame. Returns how many were applied.
    pub fn drain(&mut self, inbox: &mut mpsc::UnboundedReceiver<ServerMessage>) -> usize {
        let mut applied = 0;
        while let Ok(message) = inbox.try_recv() {
            self.apply(message);
            applied += 1;
        }
        applied
    }

    /// Unordered marker list for one render frame. Members that have not
    /// reported a location yet are skipped.
    pub fn frame(&self) -> Vec<RenderMarker> {
        self.markers
            .iter()
            .filter_map(|(id, position)| {
                let position = (*position)?;
                let size = if self.own_id.as_ref() == Some(id) {
                    OWN_MARKER_SIZE
                } else {
                    PEER_MARKER_SIZE
                };
                Some(RenderMarker {
                    location: [position.lat(), position.lng()],
                    size,
                })
            })
            .collect()
    }

    /// Number of identities currently present, the viewer included once its
    /// identity is known, with or without a location.
    pub fn present(&self) -> usize {
        self.markers.len()
    }

    pub fn contains(&self, id: &Identity) -> bool {
        self.markers.contains_key(id)
    }

    /// Last-known location for `id`.
    pub fn location(&self, id: &Identity) -> Option<Position> {
        self.markers.get(id).copied().flatten()
    }
}

/// Sending half of the handoff queue between a transport callback and the
/// render loop.
#[derive(Debug, Clone)]
pub struct MirrorInbox {
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl MirrorInbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue an event for the next frame. Dropped silently once the render
    /// loop is gone.
    pub fn push(&self, message: ServerMessage) {
        let _ = self.sender.send(message);
    }
}
