//! Connection registry: identity, send handle and room assignment for every
//! live connection.
//!
//! The registry holds no business logic. The [`crate::router`] is the only
//! writer of room assignments and always updates them while holding the lock
//! of the room concerned, so a peer's assignment and the room's member list
//! never disagree.
//!
//! Unknown peers are never an error here: transport disconnects race with
//! application events, so every operation on a missing peer is a no-op.

use std::collections::HashMap;

use duet_proto::message::{PeerId, RoomId, ServerMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A unit queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A protocol message, JSON-encoded by the writer.
    Message(ServerMessage),
    /// A raw text unit (broadcast mode).
    Text(String),
}

/// Sender half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// The connection's writer task is gone; nothing can be delivered to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection of peer {0} is closed")]
pub struct PeerClosed(pub PeerId);

/// Identity plus send capability of one connection.
///
/// Cheap to clone; rooms hold clones of the handles of their members.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    outbox: Outbox,
}

impl PeerHandle {
    /// The peer's identity.
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// Queues a protocol message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PeerClosed`] if the connection's writer has shut down.
    pub fn send(&self, msg: ServerMessage) -> Result<(), PeerClosed> {
        self.push(Outbound::Message(msg))
    }

    /// Queues a raw text unit without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PeerClosed`] if the connection's writer has shut down.
    pub fn send_text(&self, text: String) -> Result<(), PeerClosed> {
        self.push(Outbound::Text(text))
    }

    /// Whether the writer side has already gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }

    fn push(&self, unit: Outbound) -> Result<(), PeerClosed> {
        self.outbox.send(unit).map_err(|_| PeerClosed(self.id))
    }
}

#[derive(Debug)]
struct PeerEntry {
    handle: PeerHandle,
    room: Option<RoomId>,
}

/// Thread-safe map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: Mutex<HashMap<PeerId, PeerEntry>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new connection under a fresh identity, with no room.
    pub fn register(&self, outbox: Outbox) -> PeerHandle {
        let handle = PeerHandle {
            id: PeerId::new(),
            outbox,
        };
        self.peers.lock().insert(
            handle.id,
            PeerEntry {
                handle: handle.clone(),
                room: None,
            },
        );
        handle
    }

    /// Removes all bookkeeping for a peer, returning the room it was
    /// assigned to at that moment. Calling it again is a no-op.
    pub fn unregister(&self, peer: &PeerId) -> Option<RoomId> {
        self.peers.lock().remove(peer).and_then(|entry| entry.room)
    }

    /// Returns the room the peer currently belongs to.
    pub fn lookup_room(&self, peer: &PeerId) -> Option<RoomId> {
        self.peers
            .lock()
            .get(peer)
            .and_then(|entry| entry.room.clone())
    }

    /// Records the peer's room. Returns `false` if the peer is unknown.
    ///
    /// Only the router calls this, under the lock of the room involved.
    pub(crate) fn assign_room(&self, peer: &PeerId, room: Option<RoomId>) -> bool {
        match self.peers.lock().get_mut(peer) {
            Some(entry) => {
                entry.room = room;
                true
            }
            None => false,
        }
    }

    /// Returns the send handle of a live peer.
    pub fn handle(&self, peer: &PeerId) -> Option<PeerHandle> {
        self.peers.lock().get(peer).map(|entry| entry.handle.clone())
    }

    /// Whether the peer is still registered.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.lock().contains_key(peer)
    }

    /// Snapshot of every live peer's handle.
    pub fn peers(&self) -> Vec<PeerHandle> {
        self.peers
            .lock()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
