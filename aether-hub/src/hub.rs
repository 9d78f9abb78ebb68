//! The broadcast hub.
//!
//! Registration, unregistration and global broadcasts are commands processed
//! one at a time by [`HubRunner::run`], so the connection and participant
//! registries are only ever mutated from that task. Region broadcasts and
//! region moves are performed directly by connection tasks against the
//! [`SpatialIndex`].

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::asset::AssetStore;
use crate::client::{Client, SharedParticipant};
use crate::config::HubConfig;
use crate::error::{DeliveryError, HubError, Result};
use crate::participant::{Participant, ParticipantId};
use crate::protocol::{EncodedEnvelope, Envelope, WorldState};
use crate::region::{ChunkSize, RegionKey};
use crate::spatial::SpatialIndex;

/// Why a client is being unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the connection.
    PeerClosed,
    /// Nothing arrived within the idle window.
    IdleTimeout,
    ReadError,
    WriteError,
    /// Outbound queue overflowed.
    Overflow,
    /// Hub shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::PeerClosed => "peer closed",
            DisconnectReason::IdleTimeout => "idle timeout",
            DisconnectReason::ReadError => "read error",
            DisconnectReason::WriteError => "write error",
            DisconnectReason::Overflow => "outbound queue overflow",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

enum HubCommand {
    Register {
        client: Arc<Client>,
        ack: oneshot::Sender<Result<()>>,
    },
    Unregister {
        id: ParticipantId,
        /// Only this connection may be removed; `None` removes whoever holds `id`.
        client: Option<Arc<Client>>,
        reason: DisconnectReason,
    },
    BroadcastGlobal(EncodedEnvelope),
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Shared hub state.
pub struct Hub {
    config: HubConfig,
    chunk: ChunkSize,
    connections: DashMap<ParticipantId, Arc<Client>>,
    participants: DashMap<ParticipantId, SharedParticipant>,
    pub(crate) index: SpatialIndex<Arc<Client>>,
    pub(crate) assets: AssetStore,
    commands: mpsc::UnboundedSender<HubCommand>,
}

/// The coordination task that owns registry mutations.
pub struct HubRunner {
    hub: Arc<Hub>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// Build a hub. Nothing is processed until [`HubRunner::run`] is polled.
    pub fn new(config: HubConfig) -> Result<(Arc<Self>, HubRunner)> {
        config.validate()?;
        let chunk = config.chunk()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            config,
            chunk,
            connections: DashMap::new(),
            participants: DashMap::new(),
            index: SpatialIndex::new(),
            assets: AssetStore::new(),
            commands: tx,
        });
        let runner = HubRunner {
            hub: Arc::clone(&hub),
            commands: rx,
        };
        Ok((hub, runner))
    }

    /// Build a hub and spawn its coordination task on the current runtime.
    pub fn spawn(config: HubConfig) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let (hub, runner) = Self::new(config)?;
        let handle = tokio::spawn(runner.run());
        Ok((hub, handle))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn chunk(&self) -> ChunkSize {
        self.chunk
    }

    // ==================== Structural commands ====================

    /// Register `client`, returning once it is indexed and its `world_state`
    /// snapshot has been queued. Fails if its id is already registered.
    pub async fn register(&self, client: Arc<Client>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { client, ack })
            .map_err(|_| HubError::HubClosed)?;
        done.await.map_err(|_| HubError::HubClosed)?
    }

    /// Request unregistration of whichever connection holds `id`. Never
    /// blocks; repeated requests are no-ops.
    pub fn unregister(&self, id: ParticipantId, reason: DisconnectReason) {
        self.send_unregister(id, None, reason);
    }

    /// Request unregistration of `client` itself. Ignored if `client` is no
    /// longer the registered connection for its id.
    pub fn unregister_client(&self, client: &Arc<Client>, reason: DisconnectReason) {
        self.send_unregister(client.id(), Some(Arc::clone(client)), reason);
    }

    fn send_unregister(&self, id: ParticipantId, client: Option<Arc<Client>>, reason: DisconnectReason) {
        if self
            .commands
            .send(HubCommand::Unregister { id, client, reason })
            .is_err()
        {
            trace!(client_id = %id, "hub stopped, unregister ignored");
        }
    }

    /// Queue a system-wide notice for every connected client.
    pub fn broadcast_global(&self, envelope: &Envelope) -> Result<()> {
        let encoded = envelope.encode()?;
        self.commands
            .send(HubCommand::BroadcastGlobal(encoded))
            .map_err(|_| HubError::HubClosed)
    }

    /// Unregister everyone and stop the coordination task.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Shutdown { ack })
            .map_err(|_| HubError::HubClosed)?;
        done.await.map_err(|_| HubError::HubClosed)
    }

    // ==================== Region broadcast ====================

    /// Deliver to a snapshot of `region`'s members. Returns how many queues
    /// accepted the envelope. Unknown regions are a no-op.
    pub fn broadcast_to_region(&self, region: RegionKey, envelope: &EncodedEnvelope) -> usize {
        self.broadcast_to_region_inner(region, envelope, None)
    }

    /// Like [`Hub::broadcast_to_region`] but skips `except`.
    pub fn broadcast_to_region_except(
        &self,
        region: RegionKey,
        envelope: &EncodedEnvelope,
        except: ParticipantId,
    ) -> usize {
        self.broadcast_to_region_inner(region, envelope, Some(except))
    }

    fn broadcast_to_region_inner(
        &self,
        region: RegionKey,
        envelope: &EncodedEnvelope,
        except: Option<ParticipantId>,
    ) -> usize {
        let members = self.index.members(region);
        let mut delivered = 0;
        for client in members.iter().filter(|c| Some(c.id()) != except) {
            if self.deliver(client, envelope) {
                delivered += 1;
            }
        }
        trace!(%region, delivered, "region broadcast");
        delivered
    }

    /// Non-blocking delivery. A full queue disconnects the client.
    fn deliver(&self, client: &Arc<Client>, envelope: &EncodedEnvelope) -> bool {
        match client.deliver(Arc::clone(envelope)) {
            Ok(()) => true,
            Err(DeliveryError::Full) => {
                warn!(client_id = %client.id(), "outbound queue full, disconnecting");
                self.unregister_client(client, DisconnectReason::Overflow);
                false
            }
            Err(DeliveryError::Closed) => false,
        }
    }

    // ==================== Introspection ====================

    pub fn is_registered(&self, id: ParticipantId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn client(&self, id: ParticipantId) -> Option<Arc<Client>> {
        self.connections.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.get(&id).map(|r| r.value().read().clone())
    }

    pub fn client_count(&self) -> usize {
        self.connections.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn region_count(&self) -> usize {
        self.index.region_count()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.count()
    }

    pub fn region_of(&self, id: ParticipantId) -> Option<RegionKey> {
        self.index.region_of(id)
    }

    /// Ids currently in `region`.
    pub fn members(&self, region: RegionKey) -> Vec<ParticipantId> {
        self.index.member_ids(region)
    }

    /// Every participant and every stored asset.
    pub fn world_state(&self) -> WorldState {
        WorldState {
            users: self
                .participants
                .iter()
                .map(|r| (*r.key(), r.value().read().clone()))
                .collect(),
            assets: self.assets.snapshot(),
        }
    }

    // ==================== Coordination task internals ====================

    fn register_now(&self, client: Arc<Client>) -> Result<()> {
        let id = client.id();
        if self.connections.contains_key(&id) {
            warn!(client_id = %id, "duplicate participant id rejected");
            return Err(HubError::protocol(format!("duplicate participant id {id}")));
        }

        let participant = {
            let mut p = client.shared_participant().write();
            p.region = self.chunk.region_of(&p.position);
            p.clone()
        };
        let region = participant.region;

        self.connections.insert(id, Arc::clone(&client));
        self.participants
            .insert(id, Arc::clone(client.shared_participant()));

        // The snapshot is queued before the client becomes visible to any
        // region broadcast, so it is always the first thing it receives.
        match Envelope::world_state(&self.world_state(), id).and_then(|e| e.encode()) {
            Ok(snapshot) => {
                self.deliver(&client, &snapshot);
            }
            Err(e) => warn!(client_id = %id, error = %e, "failed to encode world state"),
        }

        if !self.index.add(region, id, Arc::clone(&client)) {
            warn!(client_id = %id, %region, "client already indexed");
        }

        match Envelope::user_join(&participant).and_then(|e| e.encode()) {
            Ok(join) => {
                self.broadcast_to_region_except(region, &join, id);
            }
            Err(e) => warn!(client_id = %id, error = %e, "failed to encode join"),
        }

        info!(client_id = %id, %region, clients = self.connections.len(), "client registered");
        Ok(())
    }

    fn unregister_now(&self, id: ParticipantId, expected: Option<&Arc<Client>>, reason: DisconnectReason) {
        let removed = self.connections.remove_if(&id, |_, current| {
            expected.map_or(true, |expected| Arc::ptr_eq(current, expected))
        });
        let Some((_, client)) = removed else {
            trace!(client_id = %id, %reason, "not registered");
            return;
        };
        self.participants.remove(&id);

        let last_region = self
            .index
            .remove_member(id)
            .map(|(region, _)| region)
            .unwrap_or_else(|| client.region());
        client.close();

        match Envelope::user_leave(&client.participant()).and_then(|e| e.encode()) {
            Ok(leave) => {
                self.broadcast_to_region(last_region, &leave);
            }
            Err(e) => warn!(client_id = %id, error = %e, "failed to encode leave"),
        }

        info!(client_id = %id, region = %last_region, %reason, clients = self.connections.len(), "client unregistered");
    }

    fn broadcast_global_now(&self, envelope: &EncodedEnvelope) {
        let clients: Vec<Arc<Client>> = self
            .connections
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        let delivered = clients.iter().filter(|c| self.deliver(c, envelope)).count();
        debug!(delivered, "global broadcast");
    }

    fn shutdown_now(&self) {
        let ids: Vec<ParticipantId> = self.connections.iter().map(|r| *r.key()).collect();
        for id in ids {
            self.unregister_now(id, None, DisconnectReason::Shutdown);
        }
        info!("hub stopped");
    }
}

impl HubRunner {
    /// Process structural commands until shutdown.
    pub async fn run(mut self) {
        info!(chunk_size = self.hub.chunk.get(), "hub running");
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { client, ack } => {
                    let _ = ack.send(self.hub.register_now(client));
                }
                HubCommand::Unregister { id, client, reason } => {
                    self.hub.unregister_now(id, client.as_ref(), reason)
                }
                HubCommand::BroadcastGlobal(envelope) => self.hub.broadcast_global_now(&envelope),
                HubCommand::Shutdown { ack } => {
                    self.hub.shutdown_now();
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }
}
