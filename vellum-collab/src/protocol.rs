//! Wire protocol for the realtime room channel.
//!
//! Two layers:
//! - **Frames** ([`ServerEvent`] / [`ClientEvent`]) — the unencrypted room
//!   envelope (join handshake, membership, the encrypted broadcast carrier).
//!   Bincode-encoded; they carry no free-form JSON.
//! - **Payloads** ([`BroadcastPayload`]) — the decrypted body of a
//!   `client-broadcast` frame. JSON-encoded (`kind`-tagged), because scene
//!   elements carry open-ended style maps that only survive a
//!   self-describing format.
//!
//! Anything that fails to decrypt or parse becomes
//! [`BroadcastPayload::InvalidResponse`] and is dropped, never propagated
//! as an error.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vellum_scene::SceneElement;

/// Participant identity within one room.
pub type ParticipantId = Uuid;

/// Delivery class for outgoing broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Scene state: must arrive (full/incremental updates).
    Reliable,
    /// Presence: losing one is harmless (pointer, idle status).
    Volatile,
}

/// Presence of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Recent input.
    Active,
    /// No input for the idle threshold.
    Idle,
    /// View hidden (tab in background).
    Away,
}

/// Frames sent by the room server to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Connection accepted; the client answers with `JoinRoom`.
    InitRoom,
    /// This participant is the first in the room (leader signal).
    FirstInRoom,
    /// Another participant joined; triggers a forced full broadcast.
    NewUser { participant: ParticipantId },
    /// Current room membership.
    RoomUserChange { participants: Vec<ParticipantId> },
    /// The single encrypted payload envelope.
    ClientBroadcast { iv: Vec<u8>, ciphertext: Vec<u8> },
}

/// Frames sent by a participant to the room server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    JoinRoom { room_id: String },
    /// Reliable delivery.
    Broadcast { iv: Vec<u8>, ciphertext: Vec<u8> },
    /// Best-effort delivery.
    VolatileBroadcast { iv: Vec<u8>, ciphertext: Vec<u8> },
    LeaveRoom,
}

/// Decrypted body of a `ClientBroadcast` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum BroadcastPayload {
    /// Full scene snapshot (join repair, anti-entropy resync).
    Init { elements: Vec<SceneElement> },
    /// Incremental scene update (watermark-filtered).
    Update { elements: Vec<SceneElement> },
    MouseLocation {
        participant: ParticipantId,
        x: f32,
        y: f32,
        selected_ids: Vec<String>,
        username: String,
    },
    IdleStatus {
        participant: ParticipantId,
        status: PresenceStatus,
        username: String,
    },
    /// Stand-in for anything undecryptable or unparseable.
    InvalidResponse,
}

/// Frame-level protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ServerEvent {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

impl ClientEvent {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

impl BroadcastPayload {
    /// Serialize for encryption.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a decrypted body; garbage degrades to `InvalidResponse`.
    pub fn decode_or_invalid(bytes: &[u8]) -> BroadcastPayload {
        serde_json::from_slice(bytes).unwrap_or(BroadcastPayload::InvalidResponse)
    }
}
