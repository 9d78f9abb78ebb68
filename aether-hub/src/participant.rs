//! Participant identity and live state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::region::{ChunkSize, Position, RegionKey};

/// Unique participant id. A connection shares its participant's id.
pub type ParticipantId = Uuid;

/// Generate a fresh participant id.
#[inline]
pub fn generate_participant_id() -> ParticipantId {
    Uuid::new_v4()
}

/// A connected actor in the world. Sent as the payload of presence messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub position: Position,
    #[serde(rename = "chunkID")]
    pub region: RegionKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Participant {
    pub fn new(id: ParticipantId, position: Position, chunk: ChunkSize) -> Self {
        Self {
            id,
            position,
            region: chunk.region_of(&position),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Move to `position`, returning the region left behind.
    pub fn relocate(&mut self, position: Position, chunk: ChunkSize) -> RegionKey {
        let previous = self.region;
        self.position = position;
        self.region = chunk.region_of(&position);
        previous
    }
}
