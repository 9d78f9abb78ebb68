//! # Aether Hub
//!
//! Real-time spatial broadcast hub for shared 3D worlds.
//!
//! ## Features
//!
//! - **Regions**: The world is cut into cubic chunks; every participant lives
//!   in exactly one and only hears about activity there
//! - **Hub**: Registration, departure and global notices are serialized
//!   through one coordination task
//! - **Back-pressure**: Each client has a bounded outbound queue; a client
//!   that cannot keep up is disconnected instead of slowing everyone else
//! - **Keepalive**: Idle connections are pinged and silent ones dropped
//!
//! ## Example
//!
//! ```rust,ignore
//! use aether_hub::{Hub, HubConfig, Participant, Position, generate_participant_id};
//! use aether_hub::transport::memory;
//!
//! let (hub, _runner) = Hub::spawn(HubConfig::default())?;
//! let (reader, writer, peer) = memory::pair();
//! let me = Participant::new(generate_participant_id(), Position::ORIGIN, hub.chunk());
//! hub.connect(me, reader, writer).await?;
//! ```

pub mod asset;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod participant;
pub mod protocol;
pub mod pump;
pub mod region;
pub mod spatial;
pub mod telemetry;
pub mod transport;

// Re-exports
pub use asset::{Asset, AssetId, AssetSpawn, AssetStore};
pub use client::{Client, OutboundQueue};
pub use config::{HubConfig, HubConfigBuilder};
pub use error::{DeliveryError, HubError, Result};
pub use handler::PositionOutcome;
pub use hub::{DisconnectReason, Hub, HubRunner};
pub use participant::{generate_participant_id, Participant, ParticipantId};
pub use protocol::{decode_batch, EncodedEnvelope, Envelope, MessageType, WorldState};
pub use pump::ConnectionTasks;
pub use region::{ChunkSize, Position, RegionKey};
pub use spatial::SpatialIndex;
pub use transport::{Frame, FrameReader, FrameWriter};
