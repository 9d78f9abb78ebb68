//! Per-connection inbound and outbound pumps.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::client::{Client, OutboundQueue};
use crate::error::Result;
use crate::hub::{DisconnectReason, Hub};
use crate::participant::Participant;
use crate::protocol::Envelope;
use crate::transport::{Frame, FrameReader, FrameWriter};

/// Handles for one connection's pumps.
pub struct ConnectionTasks {
    pub client: Arc<Client>,
    pub read: JoinHandle<()>,
    pub write: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Wait for both pumps to finish, i.e. for the connection to end.
    pub async fn join(self) {
        let _ = self.read.await;
        let _ = self.write.await;
    }
}

impl Hub {
    /// Register `participant` and start pumping frames between the hub and
    /// the given transport halves.
    pub async fn connect<R, W>(
        self: &Arc<Self>,
        participant: Participant,
        reader: R,
        writer: W,
    ) -> Result<ConnectionTasks>
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let (client, queue) = Client::new(participant, self.config().outbound_queue_capacity);
        self.register(Arc::clone(&client)).await?;
        Ok(spawn_pumps(Arc::clone(self), client, queue, reader, writer))
    }
}

/// Spawn both pumps for an already registered client.
pub fn spawn_pumps<R, W>(
    hub: Arc<Hub>,
    client: Arc<Client>,
    queue: OutboundQueue,
    reader: R,
    writer: W,
) -> ConnectionTasks
where
    R: FrameReader,
    W: FrameWriter,
{
    let span = info_span!("client", client_id = %client.id());
    let read = tokio::spawn(
        read_pump(Arc::clone(&hub), Arc::clone(&client), reader).instrument(span.clone()),
    );
    let write = tokio::spawn(
        write_pump(hub, Arc::clone(&client), queue, writer).instrument(span),
    );
    ConnectionTasks { client, read, write }
}

/// Read frames until the peer leaves, the read deadline passes, or the client
/// is closed. Any inbound frame pushes the deadline out by `pong_wait`.
pub async fn read_pump<R: FrameReader>(hub: Arc<Hub>, client: Arc<Client>, mut reader: R) {
    let pong_wait = hub.config().pong_wait();
    let max_frame = hub.config().max_frame_bytes;

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = client.closed() => break None,
            next = time::timeout(pong_wait, reader.next_frame()) => next,
        };

        let frame = match next {
            Err(_) => break Some(DisconnectReason::IdleTimeout),
            Ok(None) => break Some(DisconnectReason::PeerClosed),
            Ok(Some(Err(e))) => {
                warn!(error = %e, "read failed");
                break Some(DisconnectReason::ReadError);
            }
            Ok(Some(Ok(frame))) => frame,
        };
        client.touch();

        if frame.len() > max_frame {
            warn!(len = frame.len(), max = max_frame, "oversized frame dropped");
            continue;
        }

        match frame {
            Frame::Close => break Some(DisconnectReason::PeerClosed),
            Frame::Ping(_) | Frame::Pong(_) => trace!("keepalive"),
            Frame::Text(text) => dispatch(&hub, &client, text.as_bytes()),
            Frame::Binary(data) => dispatch(&hub, &client, &data),
        }
    };

    if let Some(reason) = reason {
        debug!(%reason, "inbound pump stopping");
        hub.unregister_client(&client, reason);
    }
}

fn dispatch(hub: &Hub, client: &Arc<Client>, data: &[u8]) {
    match Envelope::decode(data) {
        Ok(envelope) => hub.handle_envelope(client, envelope),
        Err(e) => warn!(error = %e, "malformed frame dropped"),
    }
}

/// Drain the outbound queue to the transport, coalescing bursts into single
/// frames, and ping the peer when it has gone quiet.
pub async fn write_pump<W: FrameWriter>(
    hub: Arc<Hub>,
    client: Arc<Client>,
    mut queue: OutboundQueue,
    mut writer: W,
) {
    let write_wait = hub.config().write_wait();
    let ping_period = hub.config().ping_period();
    let quiet_window = hub.config().keepalive_quiet_window();
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(first) = next else {
                    // Queue closed by unregister: say goodbye and stop.
                    let _ = time::timeout(write_wait, writer.send(Frame::Close)).await;
                    debug!("outbound pump stopping");
                    return;
                };
                let body = queue.coalesce(first);
                if !send_within(&mut writer, Frame::Text(body), write_wait).await {
                    hub.unregister_client(&client, DisconnectReason::WriteError);
                    return;
                }
            }
            _ = ticker.tick() => {
                if client.idle_for() < quiet_window {
                    continue;
                }
                trace!("ping");
                if !send_within(&mut writer, Frame::Ping(Vec::new()), write_wait).await {
                    hub.unregister_client(&client, DisconnectReason::WriteError);
                    return;
                }
            }
        }
    }
}

async fn send_within<W: FrameWriter>(writer: &mut W, frame: Frame, wait: std::time::Duration) -> bool {
    match time::timeout(wait, writer.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "write failed");
            false
        }
        Err(_) => {
            warn!("write deadline exceeded");
            false
        }
    }
}
