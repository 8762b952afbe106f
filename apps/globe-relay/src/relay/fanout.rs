//! Per-peer outbound queues used for room fan-out.
//!
//! Every connection owns a bounded `tokio::sync::mpsc` queue. Fan-out runs
//! inside a room's critical section, so it only ever uses `try_send` and never
//! waits on a slow peer. A peer whose queue is full is signalled to evict
//! itself; its own close then announces its departure to the room.

use std::fmt;
use std::sync::Arc;

use globe_common::ServerMessage;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Notify};

use super::registry::Peer;

/// Why a single delivery was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer's queue is full; the peer has been told to disconnect.
    Full,
    /// The peer's receive side is gone (connection already shutting down).
    Closed,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("peer queue full"),
            Self::Closed => f.write_str("peer queue closed"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sending half of a peer's outbound queue. Cloned into the room registry.
#[derive(Debug, Clone)]
pub struct PeerSender {
    sender: mpsc::Sender<Arc<ServerMessage>>,
    evict: Arc<Notify>,
}

/// Receiving half, owned by the connection's own task.
#[derive(Debug)]
pub struct PeerReceiver {
    receiver: mpsc::Receiver<Arc<ServerMessage>>,
    evict: Arc<Notify>,
}

/// Create a peer queue holding at most `capacity` undelivered events.
pub fn peer_channel(capacity: usize) -> (PeerSender, PeerReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let evict = Arc::new(Notify::new());
    (
        PeerSender {
            sender,
            evict: evict.clone(),
        },
        PeerReceiver { receiver, evict },
    )
}

impl PeerSender {
    /// Non-blocking handoff of one event to this peer.
    pub fn deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evict.notify_one();
                Err(DeliveryError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}

impl PeerReceiver {
    /// Next queued event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ServerMessage>> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Handle that resolves once a fan-out found this peer's queue full.
    pub fn eviction(&self) -> Eviction {
        Eviction(self.evict.clone())
    }
}

/// Eviction signal for one peer, awaited alongside its queue.
#[derive(Debug, Clone)]
pub struct Eviction(Arc<Notify>);

impl Eviction {
    pub async fn wait(&self) {
        self.0.notified().await
    }
}

/// Deliver `message` to every recipient. Failures are logged and skipped;
/// returns the number of successful handoffs.
pub fn fan_out(room: &str, recipients: &[&Peer], message: ServerMessage) -> usize {
    if recipients.is_empty() {
        return 0;
    }

    let message = Arc::new(message);
    let mut delivered = 0;
    for peer in recipients {
        match peer.outbound.deliver(message.clone()) {
            Ok(()) => delivered += 1,
            Err(DeliveryError::Full) => {
                tracing::warn!(
                    room = %room,
                    connection_id = %peer.id,
                    subject = %message.subject(),
                    "peer queue full; evicting slow connection"
                );
            }
            Err(DeliveryError::Closed) => {
                tracing::debug!(
                    room = %room,
                    connection_id = %peer.id,
                    "peer already closing; skipping delivery"
                );
            }
        }
    }
    delivered
}
