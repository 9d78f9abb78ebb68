//! Inbound message handling.
//!
//! Runs on the sending client's inbound pump. Position updates and asset
//! spawns touch only the spatial index and the asset store, never the hub's
//! registries, so they do not go through the coordination task.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::asset::AssetSpawn;
use crate::client::Client;
use crate::error::Result;
use crate::hub::Hub;
use crate::protocol::{Envelope, MessageType};
use crate::region::{Position, RegionKey};

/// What a position update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOutcome {
    /// Stayed in `region`.
    Moved { region: RegionKey },
    /// Crossed from `from` into `to`.
    Crossed { from: RegionKey, to: RegionKey },
    /// Sender is no longer indexed; nothing was broadcast.
    Detached,
}

impl Hub {
    /// Dispatch one decoded envelope from `client`. Malformed payloads and
    /// unknown types are dropped; the connection stays open.
    pub fn handle_envelope(&self, client: &Arc<Client>, envelope: Envelope) {
        match envelope.kind {
            MessageType::PositionUpdate => match envelope.payload_as::<Position>() {
                Ok(position) if position.is_finite() => {
                    if let Err(e) = self.apply_position(client, position) {
                        warn!(client_id = %client.id(), error = %e, "position update failed");
                    }
                }
                Ok(_) => warn!(client_id = %client.id(), "non-finite position dropped"),
                Err(e) => warn!(client_id = %client.id(), error = %e, "malformed position dropped"),
            },
            MessageType::AssetSpawn => match envelope.payload_as::<AssetSpawn>() {
                Ok(spawn) if spawn.position.is_finite() && spawn.scale.is_finite() => {
                    if let Err(e) = self.spawn_asset(client, spawn) {
                        warn!(client_id = %client.id(), error = %e, "asset spawn failed");
                    }
                }
                Ok(_) => warn!(client_id = %client.id(), "non-finite asset spawn dropped"),
                Err(e) => warn!(client_id = %client.id(), error = %e, "malformed asset spawn dropped"),
            },
            other => {
                debug!(client_id = %client.id(), kind = other.as_str(), "ignoring message");
            }
        }
    }

    /// Update `client`'s position and notify the affected regions.
    ///
    /// Same region: `position_update` to that region, sender included.
    /// New region: `chunk_change` to the old region, `user_join` to the new
    /// region without the sender, then `position_update` to the new region
    /// with the sender.
    pub fn apply_position(&self, client: &Arc<Client>, position: Position) -> Result<PositionOutcome> {
        let id = client.id();

        // Participant lock is taken before the index lock everywhere.
        let (participant, from, moved) = {
            let mut participant = client.shared_participant().write();
            let from = participant.relocate(position, self.chunk());
            let to = participant.region;
            let moved = if from == to {
                self.index.contains(to, id)
            } else {
                self.index.move_member(id, from, to)
            };
            (participant.clone(), from, moved)
        };
        let to = participant.region;

        if !moved {
            debug!(client_id = %id, "position update from detached client");
            return Ok(PositionOutcome::Detached);
        }

        if from == to {
            let update = Envelope::position_update(&participant)?.encode()?;
            self.broadcast_to_region(to, &update);
            return Ok(PositionOutcome::Moved { region: to });
        }

        debug!(client_id = %id, %from, %to, "region change");
        let change = Envelope::chunk_change(&participant)?.encode()?;
        self.broadcast_to_region(from, &change);

        let join = Envelope::user_join(&participant)?.encode()?;
        self.broadcast_to_region_except(to, &join, id);

        let update = Envelope::position_update(&participant)?.encode()?;
        self.broadcast_to_region(to, &update);

        Ok(PositionOutcome::Crossed { from, to })
    }

    /// Store a new asset created by `client` and announce it to the region
    /// containing the asset's position.
    pub fn spawn_asset(&self, client: &Client, spawn: AssetSpawn) -> Result<RegionKey> {
        let asset = spawn.into_asset(client.id());
        let region = self.chunk().region_of(&asset.position);
        let announce = Envelope::asset_spawn(&asset)?.encode()?;

        debug!(client_id = %client.id(), asset_id = %asset.id, %region, kind = %asset.kind, "asset spawned");
        self.assets.insert(asset);
        self.broadcast_to_region(region, &announce);
        Ok(region)
    }
}
