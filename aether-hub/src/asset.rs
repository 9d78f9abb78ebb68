//! Spawned assets and the asset store.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::participant::ParticipantId;
use crate::protocol::now_millis;
use crate::region::Position;

pub type AssetId = Uuid;

fn unit_scale() -> Position {
    Position::new(1.0, 1.0, 1.0)
}

/// An asset anchored at a world position. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub scale: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Opaque mesh payload (base64 or a reference), never inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_data: Option<String>,
    pub created_at: i64,
    pub created_by: ParticipantId,
}

/// Client-supplied spawn request. Any `id`, `createdAt` or `createdBy` the
/// client sends is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpawn {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub position: Position,
    #[serde(default = "unit_scale")]
    pub scale: Position,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub mesh_data: Option<String>,
}

impl AssetSpawn {
    /// Stamp a fresh id, creation time and creator.
    pub fn into_asset(self, created_by: ParticipantId) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            kind: self.kind,
            position: self.position,
            scale: self.scale,
            color: self.color,
            mesh_data: self.mesh_data,
            created_at: now_millis(),
            created_by,
        }
    }
}

/// Process-lifetime asset storage. There is no removal path.
pub struct AssetStore {
    assets: DashMap<AssetId, Asset>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            assets: DashMap::new(),
        }
    }

    pub fn insert(&self, asset: Asset) {
        self.assets.insert(asset.id, asset);
    }

    pub fn get(&self, id: &AssetId) -> Option<Asset> {
        self.assets.get(id).map(|r| r.value().clone())
    }

    pub fn count(&self) -> usize {
        self.assets.len()
    }

    pub fn snapshot(&self) -> HashMap<AssetId, Asset> {
        self.assets
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }
}

impl Default for AssetStore {
    fn default() -> Self {
        Self::new()
    }
}
