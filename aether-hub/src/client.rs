//! Connected clients and their bounded outbound queues.
//!
//! Other tasks only ever enqueue onto a client's queue through
//! [`Client::deliver`]; the receiving half belongs to the client's outbound
//! pump alone.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::DeliveryError;
use crate::participant::{Participant, ParticipantId};
use crate::protocol::{EncodedEnvelope, BATCH_SEPARATOR};
use crate::region::RegionKey;

/// Participant state shared between the client and the hub's registry.
pub type SharedParticipant = Arc<RwLock<Participant>>;

/// One connected participant.
pub struct Client {
    id: ParticipantId,
    participant: SharedParticipant,
    outbound: RwLock<Option<mpsc::Sender<EncodedEnvelope>>>,
    closed: watch::Sender<bool>,
    last_inbound: Mutex<Instant>,
}

impl Client {
    /// Create a client and the receiving half of its outbound queue.
    pub fn new(participant: Participant, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let client = Arc::new(Self {
            id: participant.id,
            participant: Arc::new(RwLock::new(participant)),
            outbound: RwLock::new(Some(tx)),
            closed,
            last_inbound: Mutex::new(Instant::now()),
        });
        (client, OutboundQueue { rx, capacity })
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Snapshot of the participant.
    pub fn participant(&self) -> Participant {
        self.participant.read().clone()
    }

    pub fn region(&self) -> RegionKey {
        self.participant.read().region
    }

    pub(crate) fn shared_participant(&self) -> &SharedParticipant {
        &self.participant
    }

    /// Queue an envelope without waiting.
    pub fn deliver(&self, envelope: EncodedEnvelope) -> Result<(), DeliveryError> {
        let outbound = self.outbound.read();
        let Some(tx) = outbound.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the outbound queue. Envelopes already queued are still drained
    /// by the outbound pump. Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = self.outbound.write().take().is_some();
        self.closed.send_replace(true);
        was_open
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the client has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    /// Time since anything last arrived from the peer.
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("region", &self.region())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a client's outbound queue.
pub struct OutboundQueue {
    rx: mpsc::Receiver<EncodedEnvelope>,
    capacity: usize,
}

impl OutboundQueue {
    /// Next envelope; `None` once the client is closed and the queue drained.
    pub async fn recv(&mut self) -> Option<EncodedEnvelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EncodedEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Join `first` with whatever is already queued into one frame body.
    /// Takes at most one queue's worth so a busy producer cannot starve the
    /// writer.
    pub fn coalesce(&mut self, first: EncodedEnvelope) -> String {
        let mut frame = String::with_capacity(first.len());
        frame.push_str(&first);
        for _ in 1..self.capacity {
            match self.rx.try_recv() {
                Ok(next) => {
                    frame.push(BATCH_SEPARATOR);
                    frame.push_str(&next);
                }
                Err(_) => break,
            }
        }
        frame
    }
}
