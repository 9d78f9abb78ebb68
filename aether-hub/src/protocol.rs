//! Wire protocol: the JSON envelope every message travels in.
//!
//! ```text
//! { "type": "position_update", "payload": {...}, "timestamp": 1700000000000, "userId": "..." }
//! ```
//!
//! Outbound envelopes are encoded once and shared between all recipients as
//! [`EncodedEnvelope`]. When the outbound pump coalesces a burst, envelopes
//! are joined with `\n` into a single text frame; [`decode_batch`] splits
//! them again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::asset::{Asset, AssetId};
use crate::error::Result;
use crate::participant::{Participant, ParticipantId};

/// Separator between coalesced envelopes in one frame.
pub const BATCH_SEPARATOR: char = '\n';

/// Epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserJoin,
    UserLeave,
    ChunkChange,
    PositionUpdate,
    AssetSpawn,
    WorldState,
    /// Any tag this server does not understand.
    Unknown,
}

impl MessageType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user_join" => MessageType::UserJoin,
            "user_leave" => MessageType::UserLeave,
            "chunk_change" => MessageType::ChunkChange,
            "position_update" => MessageType::PositionUpdate,
            "asset_spawn" => MessageType::AssetSpawn,
            "world_state" => MessageType::WorldState,
            _ => MessageType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserJoin => "user_join",
            MessageType::UserLeave => "user_leave",
            MessageType::ChunkChange => "chunk_change",
            MessageType::PositionUpdate => "position_update",
            MessageType::AssetSpawn => "asset_spawn",
            MessageType::WorldState => "world_state",
            MessageType::Unknown => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(MessageType::from_tag(&tag))
    }
}

/// An encoded envelope, shared by every queue it is delivered to.
pub type EncodedEnvelope = Arc<str>;

/// Tagged wrapper for every message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: i64,
    /// Origin participant. Clients may omit it; the server never trusts it.
    #[serde(default)]
    pub user_id: String,
}

impl Envelope {
    /// Wrap `payload` stamped with the current time.
    pub fn new<T: Serialize>(kind: MessageType, payload: &T, origin: ParticipantId) -> Result<Self> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
            timestamp: now_millis(),
            user_id: origin.to_string(),
        })
    }

    pub fn user_join(participant: &Participant) -> Result<Self> {
        Self::new(MessageType::UserJoin, participant, participant.id)
    }

    pub fn user_leave(participant: &Participant) -> Result<Self> {
        Self::new(MessageType::UserLeave, participant, participant.id)
    }

    pub fn chunk_change(participant: &Participant) -> Result<Self> {
        Self::new(MessageType::ChunkChange, participant, participant.id)
    }

    pub fn position_update(participant: &Participant) -> Result<Self> {
        Self::new(MessageType::PositionUpdate, participant, participant.id)
    }

    pub fn asset_spawn(asset: &Asset) -> Result<Self> {
        Self::new(MessageType::AssetSpawn, asset, asset.created_by)
    }

    pub fn world_state(state: &WorldState, recipient: ParticipantId) -> Result<Self> {
        Self::new(MessageType::WorldState, state, recipient)
    }

    /// Encode to a shareable text frame body.
    pub fn encode(&self) -> Result<EncodedEnvelope> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }

    /// Decode a single envelope.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode the payload as `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// Decode a frame that may hold several newline-joined envelopes. Blank and
/// undecodable lines are skipped.
pub fn decode_batch(frame: &str) -> Vec<Envelope> {
    frame
        .split(BATCH_SEPARATOR)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Full snapshot sent once to a newly registered client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub users: HashMap<ParticipantId, Participant>,
    pub assets: HashMap<AssetId, Asset>,
}
