//! Room registry: room name -> live members, one critical section per room.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use globe_common::{Identity, MarkerPosition, Position};
use parking_lot::Mutex;

use super::fanout::PeerSender;

/// A live member of a room as seen by fan-out.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: Identity,
    /// Last position reported by this member, if any.
    pub position: Option<Position>,
    pub outbound: PeerSender,
}

impl Peer {
    pub fn new(id: Identity, outbound: PeerSender) -> Self {
        Self {
            id,
            position: None,
            outbound,
        }
    }

    pub fn marker(&self) -> MarkerPosition {
        MarkerPosition::new(self.id.clone(), self.position)
    }
}

/// Room names with their current member count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub name: String,
    pub member_count: usize,
}

#[derive(Default)]
struct Room {
    members: HashMap<Identity, Peer>,
    /// Set when the last member leaves and the room is pruned. A join that
    /// fetched the room just before the prune sees this and retries.
    retired: bool,
}

impl Room {
    fn others(&self, id: &Identity) -> Vec<&Peer> {
        self.members.values().filter(|peer| &peer.id != id).collect()
    }
}

/// Shared registry of all rooms.
///
/// Uses `DashMap` to look rooms up by name and a `parking_lot::Mutex` per
/// room, so joins and leaves on unrelated rooms never contend. Each mutating
/// method runs its `critical` closure while the room's lock is held; the
/// member list it receives is exactly the membership at that point in the
/// room's order.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room_name: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room_name).map(|entry| entry.value().clone())
    }

    /// Insert `peer` into `room_name`, creating the room if absent, then run
    /// `critical` with the new member and every other live member.
    ///
    /// Returns `None` without touching the room if the identity is already a
    /// member.
    pub fn join<R>(
        &self,
        room_name: &str,
        peer: Peer,
        critical: impl FnOnce(&Peer, &[&Peer]) -> R,
    ) -> Option<R> {
        loop {
            let room = self
                .rooms
                .entry(room_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Room::default())))
                .clone();

            let mut guard = room.lock();
            if guard.retired {
                continue;
            }
            if guard.members.contains_key(&peer.id) {
                return None;
            }

            let id = peer.id.clone();
            guard.members.insert(id.clone(), peer);
            let joined = &guard.members[&id];
            let others = guard.others(&id);
            return Some(critical(joined, &others));
        }
    }

    /// Record a new position for `id` and run `critical` with the updated
    /// member and every other live member. `None` if `id` is not in the room.
    pub fn update<R>(
        &self,
        room_name: &str,
        id: &Identity,
        position: Position,
        critical: impl FnOnce(&Peer, &[&Peer]) -> R,
    ) -> Option<R> {
        let room = self.room(room_name)?;
        let mut guard = room.lock();
        guard.members.get_mut(id)?.position = Some(position);

        let member = &guard.members[id];
        let others = guard.others(id);
        Some(critical(member, &others))
    }

    /// Remove `id` from the room and run `critical` with the departed member
    /// and everyone remaining. Prunes the room once empty. `None` if `id` was
    /// not a member, so repeated leaves are harmless.
    pub fn leave<R>(
        &self,
        room_name: &str,
        id: &Identity,
        critical: impl FnOnce(&Peer, &[&Peer]) -> R,
    ) -> Option<R> {
        let room = self.room(room_name)?;
        let mut guard = room.lock();
        let departed = guard.members.remove(id)?;

        let remaining: Vec<&Peer> = guard.members.values().collect();
        let result = critical(&departed, &remaining);

        if guard.members.is_empty() {
            guard.retired = true;
            self.rooms
                .remove_if(room_name, |_, current| Arc::ptr_eq(current, &room));
        }
        Some(result)
    }

    /// Snapshot of the room's members. An absent room has no one present.
    pub fn members(&self, room_name: &str) -> Vec<MarkerPosition> {
        let Some(room) = self.room(room_name) else {
            return Vec::new();
        };
        let guard = room.lock();
        let mut markers: Vec<MarkerPosition> = guard.members.values().map(Peer::marker).collect();
        markers.sort_by(|a, b| a.id.cmp(&b.id));
        markers
    }

    /// Every live room with its member count, sorted by name.
    pub fn rooms(&self) -> Vec<RoomSummary> {
        let rooms: Vec<(String, Arc<Mutex<Room>>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut summaries: Vec<RoomSummary> = rooms
            .into_iter()
            .filter_map(|(name, room)| {
                let guard = room.lock();
                if guard.retired || guard.members.is_empty() {
                    return None;
                }
                Some(RoomSummary {
                    name,
                    member_count: guard.members.len(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Number of rooms currently tracked.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
