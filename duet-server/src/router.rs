//! Signaling router: the per-room two-peer state machine.
//!
//! A room moves `Empty -> Waiting -> Ready` as peers join and back down as
//! they leave. `Empty` rooms are never kept in the table.
//!
//! # Locking
//!
//! The room table is a short-held map from room name to a per-room mutex.
//! Every transition on a room runs under that room's lock, including the
//! registry update and the (non-blocking) delivery of notifications, so the
//! members observe notifications in transition order. Lock order is always
//! room, then table or registry; the table lock is released before any room
//! lock is taken.
//!
//! Deliveries that fail because the recipient's writer has gone are
//! collected and, once the room lock is released, turned into an implicit
//! disconnect of that recipient.

use std::collections::HashMap;
use std::sync::Arc;

use duet_proto::message::{ClientMessage, Payload, PeerId, RoomId, ServerMessage, SignalKind};
use parking_lot::Mutex;

use crate::registry::{ConnectionRegistry, PeerHandle};

/// Maximum number of members in a room.
pub const ROOM_CAPACITY: usize = 2;

/// Occupancy of a room that exists in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// One member, waiting for a partner.
    Waiting,
    /// Two members; both have been told `ready`.
    Ready,
}

/// Application-level failures of a router transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    /// The room already has two members. The joiner has been sent
    /// `room_full`; its connection is unaffected.
    #[error("room {0} is full")]
    RoomFull(RoomId),
    /// The peer disconnected before the event was processed.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// What happened to a relayed handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued for the other member.
    Forwarded,
    /// The sender is not in a room.
    NotInRoom,
    /// The sender named a room other than the one it is in.
    RoomMismatch,
    /// The sender is alone in its room.
    NoPartner,
    /// The other member's connection was already closed; it has been
    /// removed from the room.
    PartnerGone,
}

#[derive(Debug)]
struct Room {
    id: RoomId,
    members: Vec<PeerHandle>,
    /// Set when the room is emptied and dropped from the table. A joiner
    /// that still holds this slot must go back to the table.
    retired: bool,
}

impl Room {
    const fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::new(),
            retired: false,
        }
    }

    fn position(&self, peer: &PeerId) -> Option<usize> {
        self.members.iter().position(|m| m.id() == *peer)
    }

    fn partner_of(&self, peer: &PeerId) -> Option<&PeerHandle> {
        self.members.iter().find(|m| m.id() != *peer)
    }

    fn state(&self) -> Option<RoomState> {
        match self.members.len() {
            0 => None,
            1 => Some(RoomState::Waiting),
            _ => Some(RoomState::Ready),
        }
    }
}

type RoomSlot = Arc<Mutex<Room>>;

/// Routes joins, handshake messages and departures between room members.
#[derive(Debug)]
pub struct SignalingRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Mutex<HashMap<RoomId, RoomSlot>>,
}

impl SignalingRouter {
    /// Creates a router with an empty room table over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this router keeps in sync.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Dispatches one decoded inbound message from `peer`.
    pub fn dispatch(&self, peer: &PeerId, msg: ClientMessage) {
        match msg {
            ClientMessage::Join { room } => match self.handle_join(peer, room) {
                Ok(_) => {}
                Err(SignalingError::RoomFull(room)) => {
                    tracing::info!(peer_id = %peer, room = %room, "join rejected, room full");
                }
                Err(SignalingError::UnknownPeer(_)) => {
                    tracing::debug!(peer_id = %peer, "join from unregistered peer ignored");
                }
            },
            ClientMessage::Signal {
                kind,
                room,
                payload,
            } => {
                let outcome = self.handle_relay(peer, kind, room, payload);
                tracing::debug!(peer_id = %peer, kind = %kind, outcome = ?outcome, "relay");
            }
        }
    }

    /// Puts `peer` into `room`.
    ///
    /// A peer that is already in a room (this one or another) leaves it
    /// first, exactly as if it had left explicitly. If the target room is
    /// already `Ready` the peer is sent `room_full` and stays roomless.
    /// When the peer is the second member, both members are sent `ready`.
    ///
    /// # Errors
    ///
    /// [`SignalingError::RoomFull`] if the room has two members,
    /// [`SignalingError::UnknownPeer`] if the peer has disconnected.
    pub fn handle_join(&self, peer: &PeerId, room: RoomId) -> Result<RoomState, SignalingError> {
        let handle = self
            .registry
            .handle(peer)
            .ok_or(SignalingError::UnknownPeer(*peer))?;

        let mut failed = Vec::new();
        if let Some(previous) = self.registry.lookup_room(peer) {
            tracing::info!(peer_id = %peer, from = %previous, to = %room, "rejoin, leaving previous room");
            self.leave_room(peer, &previous, &mut failed);
        }
        let result = self.enter_room(&handle, room, &mut failed);
        self.evict(failed);
        result
    }

    /// Forwards a handshake message to the other member of the sender's
    /// room. Anything that cannot be forwarded is dropped silently.
    pub fn handle_relay(
        &self,
        peer: &PeerId,
        kind: SignalKind,
        room: Option<RoomId>,
        payload: Payload,
    ) -> RelayOutcome {
        let Some(current) = self.registry.lookup_room(peer) else {
            return RelayOutcome::NotInRoom;
        };
        if room.as_ref().is_some_and(|named| *named != current) {
            return RelayOutcome::RoomMismatch;
        }
        let Some(slot) = self.slot(&current) else {
            return RelayOutcome::NotInRoom;
        };

        let mut failed = Vec::new();
        let outcome = {
            let guard = slot.lock();
            if guard.position(peer).is_none() {
                RelayOutcome::NotInRoom
            } else if let Some(partner) = guard.partner_of(peer) {
                if deliver(partner, ServerMessage::Signal { kind, payload }, &mut failed) {
                    RelayOutcome::Forwarded
                } else {
                    RelayOutcome::PartnerGone
                }
            } else {
                RelayOutcome::NoPartner
            }
        };
        self.evict(failed);
        outcome
    }

    /// Removes `peer` from its room, notifying the remaining member or
    /// deleting the room if it is now empty. Returns the room left.
    pub fn handle_leave(&self, peer: &PeerId) -> Option<RoomId> {
        let room = self.registry.lookup_room(peer)?;
        let mut failed = Vec::new();
        let left = self.leave_room(peer, &room, &mut failed);
        self.evict(failed);
        left.then_some(room)
    }

    /// Connection closed: leave the room and forget the peer. Idempotent.
    pub fn handle_disconnect(&self, peer: &PeerId) {
        let mut failed = Vec::new();
        self.disconnect_peer(peer, &mut failed);
        self.evict(failed);
    }

    /// Current occupancy of a room, `None` if it does not exist.
    pub fn room_state(&self, room: &RoomId) -> Option<RoomState> {
        self.slot(room).and_then(|slot| slot.lock().state())
    }

    /// Members of a room in join order.
    pub fn room_members(&self, room: &RoomId) -> Vec<PeerId> {
        self.slot(room)
            .map(|slot| slot.lock().members.iter().map(PeerHandle::id).collect())
            .unwrap_or_default()
    }

    /// Names of all rooms currently in the table.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.lock().keys().cloned().collect()
    }

    /// Number of rooms currently in the table.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    fn slot(&self, room: &RoomId) -> Option<RoomSlot> {
        self.rooms.lock().get(room).cloned()
    }

    fn enter_room(
        &self,
        handle: &PeerHandle,
        room: RoomId,
        failed: &mut Vec<PeerId>,
    ) -> Result<RoomState, SignalingError> {
        let peer = handle.id();
        loop {
            let slot = {
                let mut table = self.rooms.lock();
                Arc::clone(
                    table
                        .entry(room.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(Room::new(room.clone())))),
                )
            };
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }

            if guard.members.len() >= ROOM_CAPACITY {
                drop(guard);
                deliver(handle, ServerMessage::RoomFull { room: room.clone() }, failed);
                return Err(SignalingError::RoomFull(room));
            }

            if !self.registry.assign_room(&peer, Some(room.clone())) {
                if guard.members.is_empty() {
                    self.retire(&mut guard, &slot);
                }
                return Err(SignalingError::UnknownPeer(peer));
            }
            guard.members.push(handle.clone());

            if guard.members.len() < ROOM_CAPACITY {
                tracing::info!(peer_id = %peer, room = %room, "joined room, waiting for partner");
                return Ok(RoomState::Waiting);
            }

            tracing::info!(peer_id = %peer, room = %room, "joined room, room ready");
            for member in &guard.members {
                deliver(member, ServerMessage::Ready { room: room.clone() }, failed);
            }
            return Ok(RoomState::Ready);
        }
    }

    /// Removes `peer` from `room` if it is still a member.
    fn leave_room(&self, peer: &PeerId, room: &RoomId, failed: &mut Vec<PeerId>) -> bool {
        let Some(slot) = self.slot(room) else {
            return false;
        };
        let mut guard = slot.lock();
        let Some(index) = guard.position(peer) else {
            return false;
        };
        guard.members.remove(index);
        self.registry.assign_room(peer, None);

        if let Some(remaining) = guard.members.first() {
            tracing::info!(peer_id = %peer, room = %room, "left room, notifying partner");
            deliver(remaining, ServerMessage::PeerDisconnected, failed);
        } else {
            tracing::info!(peer_id = %peer, room = %room, "left room, room deleted");
            self.retire(&mut guard, &slot);
        }
        true
    }

    /// Drops an empty room from the table. Caller holds the room lock.
    fn retire(&self, room: &mut Room, slot: &RoomSlot) {
        room.retired = true;
        let mut table = self.rooms.lock();
        if table.get(&room.id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            table.remove(&room.id);
        }
    }

    fn disconnect_peer(&self, peer: &PeerId, failed: &mut Vec<PeerId>) {
        // Unregister first so a concurrent join cannot assign a new room
        // after the departure below.
        if let Some(room) = self.registry.unregister(peer) {
            self.leave_room(peer, &room, failed);
        }
    }

    /// Disconnects every peer whose delivery failed, including peers whose
    /// `peer_disconnected` notice fails in turn.
    fn evict(&self, mut failed: Vec<PeerId>) {
        while let Some(peer) = failed.pop() {
            if self.registry.contains(&peer) {
                tracing::warn!(peer_id = %peer, "delivery failed, dropping peer");
                self.disconnect_peer(&peer, &mut failed);
            }
        }
    }
}

/// Queues `msg` for `to`; on failure records the peer for eviction.
fn deliver(to: &PeerHandle, msg: ServerMessage, failed: &mut Vec<PeerId>) -> bool {
    match to.send(msg) {
        Ok(()) => true,
        Err(closed) => {
            failed.push(closed.0);
            false
        }
    }
}
