//! Typed message set for the duet signaling protocol.
//!
//! Inbound units ([`ClientMessage`]) are either a room join or one of the
//! three handshake kinds that get relayed to the other room member. Outbound
//! units ([`ServerMessage`]) are room notifications plus the relayed
//! handshake messages. Handshake payloads are opaque JSON values that the
//! server never inspects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::ProtoError;

/// Default maximum size of a single inbound unit in bytes (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Opaque per-connection identity, assigned by the server on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Creates a new time-ordered peer identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `PeerId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-chosen room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the room name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Value of the `type` field on an inbound unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Enter a room.
    Join,
    /// A handshake message to relay.
    Signal(SignalKind),
}

impl FromStr for MessageKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Self::Join),
            other => other
                .parse()
                .map(Self::Signal)
                .map_err(|_| ProtoError::UnknownType(other.to_string())),
        }
    }
}

/// The three handshake message kinds the server relays without inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Network-path candidate.
    IceCandidate,
}

impl SignalKind {
    /// All relayable kinds.
    pub const ALL: [Self; 3] = [Self::Offer, Self::Answer, Self::IceCandidate];

    /// Wire name used in the `type` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

impl FromStr for SignalKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which JSON field carried a handshake payload.
///
/// Clients use `payload`, `sdp` or `candidate` interchangeably; the relay
/// re-emits the value under the same field it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadField {
    /// Generic `payload` field.
    Payload,
    /// `sdp` field, typical for offers and answers.
    Sdp,
    /// `candidate` field, typical for ICE candidates.
    Candidate,
}

impl PayloadField {
    /// JSON key for this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payload => "payload",
            Self::Sdp => "sdp",
            Self::Candidate => "candidate",
        }
    }
}

/// An opaque handshake payload and the field it travels in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Field name the sender used.
    pub field: PayloadField,
    /// The payload itself, never inspected by the server.
    pub value: serde_json::Value,
}

impl Payload {
    /// Creates a payload carried in the given field.
    #[must_use]
    pub const fn new(field: PayloadField, value: serde_json::Value) -> Self {
        Self { field, value }
    }
}

/// Messages sent by a peer to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Enter (or create) a room.
    Join {
        /// Target room.
        room: RoomId,
    },

    /// A handshake message for the other member of the sender's room.
    Signal {
        /// Offer, answer or ICE candidate.
        kind: SignalKind,
        /// Room named explicitly by the sender, if any. When absent the
        /// server uses the sender's current room.
        room: Option<RoomId>,
        /// Opaque handshake data.
        payload: Payload,
    },
}

/// Messages sent by the server to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// The room now has two members; negotiation may begin.
    Ready {
        /// The room that became ready.
        room: RoomId,
    },

    /// The requested room already has two members.
    RoomFull {
        /// The room that rejected the join.
        room: RoomId,
    },

    /// The other member left the room or lost its connection.
    PeerDisconnected,

    /// A handshake message relayed unmodified from the other member.
    Signal {
        /// Original kind.
        kind: SignalKind,
        /// Original payload, in its original field.
        payload: Payload,
    },
}
