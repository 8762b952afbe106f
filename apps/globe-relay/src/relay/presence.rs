//! Presence relay: turns membership transitions into marker events.
//!
//! Every event is delivered inside the room's critical section, so each
//! recipient observes one room's joins, moves and leaves in the same order
//! the registry applied them. The seed snapshot handed to a joiner is taken in
//! the same critical section, and everything queued for the joiner afterwards
//! is newer than it.

use std::sync::Arc;

use globe_common::{Identity, Position, ServerMessage};

use super::fanout::fan_out;
use super::registry::{Peer, RoomRegistry};

/// Outcome of a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReport {
    /// Existing members told about the newcomer.
    pub notified: usize,
    /// One `add-marker` per existing member, with its last-known position.
    /// The caller writes these to the newcomer before draining its queue, so
    /// the snapshot never counts against the newcomer's queue capacity.
    pub seed: Vec<ServerMessage>,
}

/// Room-scoped broadcast logic shared by every connection task.
pub struct PresenceRelay {
    registry: Arc<RoomRegistry>,
}

impl PresenceRelay {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// unjoined -> joined. Announces the newcomer to the room and snapshots
    /// every existing member's last-known marker for it.
    ///
    /// Returns `None` if the identity is already in the room.
    pub fn announce_join(&self, room: &str, peer: Peer) -> Option<JoinReport> {
        self.registry.join(room, peer, |joined, others| {
            let seed: Vec<ServerMessage> = others
                .iter()
                .map(|other| ServerMessage::add_marker(other.id.clone(), other.position))
                .collect();

            let notified = fan_out(
                room,
                others,
                ServerMessage::add_marker(joined.id.clone(), joined.position),
            );

            tracing::debug!(
                room = %room,
                connection_id = %joined.id,
                notified,
                seeded = seed.len(),
                "member joined"
            );
            JoinReport { notified, seed }
        })
    }

    /// joined -> joined. Re-broadcasts the member's new position.
    ///
    /// Returns the number of members notified, or `None` if `id` is no longer
    /// in the room.
    pub fn announce_position(&self, room: &str, id: &Identity, position: Position) -> Option<usize> {
        self.registry.update(room, id, position, |member, others| {
            let notified = fan_out(room, others, ServerMessage::add_marker(member.id.clone(), member.position));
            tracing::trace!(room = %room, connection_id = %member.id, notified, "member moved");
            notified
        })
    }

    /// joined -> closed. Broadcasts the member's removal to everyone remaining.
    ///
    /// Returns `None` if `id` had already left.
    pub fn announce_leave(&self, room: &str, id: &Identity) -> Option<usize> {
        self.registry.leave(room, id, |departed, remaining| {
            let notified = fan_out(room, remaining, ServerMessage::remove_marker(departed.id.clone()));
            tracing::debug!(room = %room, connection_id = %departed.id, notified, "member left");
            notified
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::fanout::{peer_channel, PeerReceiver};
    use globe_common::Mirror;

    fn relay() -> PresenceRelay {
        PresenceRelay::new(Arc::new(RoomRegistry::new()))
    }

    fn peer(id: &str) -> (Peer, PeerReceiver) {
        let (tx, rx) = peer_channel(64);
        (Peer::new(Identity::from(id), tx), rx)
    }

    fn drain(rx: &mut PeerReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    fn feed(mirror: &mut Mirror, rx: &mut PeerReceiver) {
        for msg in drain(rx) {
            mirror.apply(msg);
        }
    }

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    #[test]
    fn lone_join_then_leave_broadcasts_nothing_and_prunes() {
        let relay = relay();
        let (a, mut a_rx) = peer("conn_a");

        let report = relay.announce_join("default", a).unwrap();
        assert_eq!(report, JoinReport { notified: 0, seed: Vec::new() });
        assert_eq!(relay.announce_leave("default", &Identity::from("conn_a")), Some(0));

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(relay.registry().room_count(), 0);
    }

    #[test]
    fn join_is_announced_to_others_not_to_self() {
        let relay = relay();
        let (a, mut a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");

        relay.announce_join("default", a);
        assert!(drain(&mut a_rx).is_empty());

        let report = relay.announce_join("default", b).unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(
            report.seed,
            vec![ServerMessage::add_marker(Identity::from("conn_a"), None)]
        );

        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::add_marker(Identity::from("conn_b"), None)]
        );
        // The seed is handed back, not queued.
        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn joiner_is_seeded_with_known_positions() {
        let relay = relay();
        let (a, _a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");
        let a_id = Identity::from("conn_a");

        relay.announce_join("default", a);
        assert_eq!(relay.announce_position("default", &a_id, pos(40.7, -74.0)), Some(0));

        let report = relay.announce_join("default", b).unwrap();
        assert_eq!(
            report.seed,
            vec![ServerMessage::add_marker(a_id, Some(pos(40.7, -74.0)))]
        );
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn seed_larger_than_joiner_queue_does_not_evict_it() {
        let relay = relay();
        let mut existing = Vec::new();
        for i in 0..5 {
            let (p, rx) = peer(&format!("conn_{i}"));
            relay.announce_join("big", p);
            existing.push(rx);
        }

        let (tx, mut joiner_rx) = peer_channel(2);
        let eviction = joiner_rx.eviction();
        let report = relay
            .announce_join("big", Peer::new(Identity::from("conn_late"), tx))
            .unwrap();

        assert_eq!(report.seed.len(), 5);
        assert_eq!(report.notified, 5);
        assert!(joiner_rx.try_recv().is_none());
        let evicted = tokio::time::timeout(std::time::Duration::from_millis(50), eviction.wait()).await;
        assert!(evicted.is_err(), "joiner must not be evicted by its own seed");
        assert_eq!(relay.registry().members("big").len(), 6);
    }

    #[test]
    fn successive_updates_are_last_write_wins() {
        let relay = relay();
        let (a, _a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");
        let a_id = Identity::from("conn_a");
        relay.announce_join("default", a);
        relay.announce_join("default", b);

        relay.announce_position("default", &a_id, pos(1.0, 1.0));
        relay.announce_position("default", &a_id, pos(2.0, 2.0));

        let mut mirror = Mirror::new();
        feed(&mut mirror, &mut b_rx);
        assert_eq!(mirror.location(&a_id), Some(pos(2.0, 2.0)));
    }

    #[test]
    fn leave_is_terminal_for_the_identity() {
        let relay = relay();
        let (a, _a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");
        let a_id = Identity::from("conn_a");
        relay.announce_join("default", a);
        relay.announce_join("default", b);
        relay.announce_position("default", &a_id, pos(3.0, 3.0));

        assert_eq!(relay.announce_leave("default", &a_id), Some(1));
        // Nothing more for A once it has left.
        assert_eq!(relay.announce_position("default", &a_id, pos(4.0, 4.0)), None);
        assert_eq!(relay.announce_leave("default", &a_id), None);

        let events = drain(&mut b_rx);
        assert_eq!(
            events.last(),
            Some(&ServerMessage::remove_marker(a_id.clone()))
        );
        let removes = events
            .iter()
            .filter(|m| matches!(m, ServerMessage::RemoveMarker { .. }))
            .count();
        assert_eq!(removes, 1);
    }

    #[test]
    fn events_never_cross_rooms() {
        let relay = relay();
        let (a, mut a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");
        let (c, _c_rx) = peer("conn_c");

        relay.announce_join("north", a);
        relay.announce_join("south", b);
        relay.announce_join("south", c);
        relay.announce_position("south", &Identity::from("conn_c"), pos(9.0, 9.0));
        relay.announce_leave("south", &Identity::from("conn_c"));

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx).len(), 3);
    }

    #[test]
    fn mirrors_converge_to_membership() {
        let relay = relay();
        let mut receivers = Vec::new();
        for name in ["conn_a", "conn_b", "conn_c", "conn_d"] {
            let (p, rx) = peer(name);
            let report = relay.announce_join("default", p).unwrap();
            let mut mirror = Mirror::new();
            for seed in report.seed {
                mirror.apply(seed);
            }
            receivers.push((Identity::from(name), rx, mirror));
        }
        relay.announce_position("default", &Identity::from("conn_b"), pos(10.0, 20.0));
        relay.announce_leave("default", &Identity::from("conn_c"));
        relay.announce_leave("default", &Identity::from("conn_a"));

        let live: Vec<Identity> = relay
            .registry()
            .members("default")
            .into_iter()
            .map(|m| m.id)
            .collect();

        for (id, rx, mirror) in receivers.iter_mut() {
            if !live.contains(&*id) {
                continue;
            }
            feed(mirror, rx);
            assert_eq!(mirror.present(), live.len() - 1, "mirror of {id}");
            for other in live.iter().filter(|other| other.as_str() != id.as_str()) {
                assert!(mirror.contains(other));
            }
        }
    }

    #[test]
    fn failed_peer_does_not_block_others() {
        let relay = relay();
        let (a, a_rx) = peer("conn_a");
        let (b, mut b_rx) = peer("conn_b");
        let (c, _c_rx) = peer("conn_c");
        relay.announce_join("default", a);
        relay.announce_join("default", b);
        drop(a_rx);
        drain(&mut b_rx);

        let report = relay.announce_join("default", c).unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::add_marker(Identity::from("conn_c"), None)]
        );
    }
}
