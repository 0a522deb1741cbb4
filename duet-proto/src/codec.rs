//! JSON text encoding for the duet wire protocol.
//!
//! Every unit is a flat JSON object with a `type` tag, an optional `room`,
//! and at most one payload field (`payload`, `sdp` or `candidate`). Unknown
//! extra fields are ignored so clients can attach their own metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{
    ClientMessage, MessageKind, Payload, PayloadField, RoomId, ServerMessage, SignalKind,
};

/// Outbound `type` tag for [`ServerMessage::Ready`].
const READY: &str = "ready";
/// Outbound `type` tag for [`ServerMessage::RoomFull`].
const ROOM_FULL: &str = "room_full";
/// Outbound `type` tag for [`ServerMessage::PeerDisconnected`].
const PEER_DISCONNECTED: &str = "peer_disconnected";

/// Error type for codec encode/decode operations.
///
/// Every decode failure means the unit is structurally malformed; the
/// server drops it and keeps the connection open.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Not valid JSON, not an object, or missing the `type` tag.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` tag names no known message.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
    /// A message that requires a room did not carry one.
    #[error("{0} message is missing the room field")]
    MissingRoom(&'static str),
    /// The room field was present but empty.
    #[error("room identifier must not be empty")]
    EmptyRoom,
    /// A handshake message carried no payload field.
    #[error("{0} message is missing its payload")]
    MissingPayload(SignalKind),
    /// A handshake message carried more than one payload field.
    #[error("{0} message carries more than one payload field")]
    AmbiguousPayload(SignalKind),
}

/// Flat on-the-wire shape shared by both directions.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<Value>,
}

impl WireFrame {
    fn tagged(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    fn with_room(mut self, room: &RoomId) -> Self {
        self.room = Some(room.as_str().to_string());
        self
    }

    fn with_payload(mut self, payload: &Payload) -> Self {
        let value = Some(payload.value.clone());
        match payload.field {
            PayloadField::Payload => self.payload = value,
            PayloadField::Sdp => self.sdp = value,
            PayloadField::Candidate => self.candidate = value,
        }
        self
    }

    /// Extracts the single payload field; zero or several is an error.
    fn take_payload(&mut self, kind: SignalKind) -> Result<Payload, ProtoError> {
        let mut found = [
            (PayloadField::Payload, self.payload.take()),
            (PayloadField::Sdp, self.sdp.take()),
            (PayloadField::Candidate, self.candidate.take()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| Payload::new(field, v)));

        let payload = found.next().ok_or(ProtoError::MissingPayload(kind))?;
        if found.next().is_some() {
            return Err(ProtoError::AmbiguousPayload(kind));
        }
        Ok(payload)
    }

    fn required_room(&mut self, tag: &'static str) -> Result<RoomId, ProtoError> {
        self.optional_room()?.ok_or(ProtoError::MissingRoom(tag))
    }

    fn optional_room(&mut self) -> Result<Option<RoomId>, ProtoError> {
        match self.room.take() {
            None => Ok(None),
            Some(room) if room.is_empty() => Err(ProtoError::EmptyRoom),
            Some(room) => Ok(Some(RoomId::new(room))),
        }
    }
}

/// Decodes an inbound text unit into a [`ClientMessage`].
///
/// # Errors
///
/// Returns a [`ProtoError`] describing why the unit is malformed.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtoError> {
    client_from_frame(serde_json::from_str(text)?)
}

/// Decodes an inbound binary unit holding UTF-8 JSON.
///
/// # Errors
///
/// Returns a [`ProtoError`] describing why the unit is malformed.
pub fn decode_client_slice(bytes: &[u8]) -> Result<ClientMessage, ProtoError> {
    client_from_frame(serde_json::from_slice(bytes)?)
}

fn client_from_frame(mut frame: WireFrame) -> Result<ClientMessage, ProtoError> {
    match frame.kind.parse::<MessageKind>()? {
        MessageKind::Join => Ok(ClientMessage::Join {
            room: frame.required_room("join")?,
        }),
        MessageKind::Signal(kind) => Ok(ClientMessage::Signal {
            kind,
            room: frame.optional_room()?,
            payload: frame.take_payload(kind)?,
        }),
    }
}

/// Encodes a [`ClientMessage`] as a JSON text unit.
///
/// # Errors
///
/// Returns [`ProtoError::Json`] if the payload cannot be serialized.
pub fn encode_client(msg: &ClientMessage) -> Result<String, ProtoError> {
    let frame = match msg {
        ClientMessage::Join { room } => WireFrame::tagged("join").with_room(room),
        ClientMessage::Signal {
            kind,
            room,
            payload,
        } => {
            let frame = WireFrame::tagged(kind.as_str()).with_payload(payload);
            match room {
                Some(room) => frame.with_room(room),
                None => frame,
            }
        }
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Encodes a [`ServerMessage`] as a JSON text unit.
///
/// # Errors
///
/// Returns [`ProtoError::Json`] if the payload cannot be serialized.
pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtoError> {
    let frame = match msg {
        ServerMessage::Ready { room } => WireFrame::tagged(READY).with_room(room),
        ServerMessage::RoomFull { room } => WireFrame::tagged(ROOM_FULL).with_room(room),
        ServerMessage::PeerDisconnected => WireFrame::tagged(PEER_DISCONNECTED),
        ServerMessage::Signal { kind, payload } => {
            WireFrame::tagged(kind.as_str()).with_payload(payload)
        }
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decodes an outbound text unit, as a client would.
///
/// # Errors
///
/// Returns a [`ProtoError`] if the unit is not a valid server message.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtoError> {
    let mut frame: WireFrame = serde_json::from_str(text)?;
    match frame.kind.as_str() {
        READY => Ok(ServerMessage::Ready {
            room: frame.required_room(READY)?,
        }),
        ROOM_FULL => Ok(ServerMessage::RoomFull {
            room: frame.required_room(ROOM_FULL)?,
        }),
        PEER_DISCONNECTED => Ok(ServerMessage::PeerDisconnected),
        other => {
            let kind = other.parse::<SignalKind>()?;
            Ok(ServerMessage::Signal {
                kind,
                payload: frame.take_payload(kind)?,
            })
        }
    }
}
