//! Integration tests for aether-hub over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use aether_hub::transport::memory::{self, MemoryPeer};
use aether_hub::{
    decode_batch, generate_participant_id, Client, ConnectionTasks, DisconnectReason, Envelope,
    Frame, Hub, HubConfig, HubError, MessageType, Participant, ParticipantId, Position, RegionKey,
    WorldState,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);
const ORIGIN_REGION: RegionKey = RegionKey::new(0, 0, 0);

struct TestClient {
    id: ParticipantId,
    peer: MemoryPeer,
    _tasks: ConnectionTasks,
}

impl TestClient {
    async fn expect(&mut self, kind: MessageType) -> Envelope {
        let envelope = timeout(WAIT, self.peer.next_envelope())
            .await
            .expect("timed out waiting for envelope")
            .expect("connection closed");
        assert_eq!(envelope.kind, kind, "unexpected envelope {envelope:?}");
        envelope
    }

    /// Discard everything delivered so far.
    async fn drain(&mut self) {
        settle().await;
        while self.peer.try_next_envelope().is_some() {}
    }

    async fn assert_quiet(&mut self) {
        settle().await;
        if let Some(envelope) = self.peer.try_next_envelope() {
            panic!("unexpected envelope {envelope:?}");
        }
    }

    fn send_position(&self, x: f64, y: f64, z: f64) {
        let msg = json!({ "type": "position_update", "payload": { "x": x, "y": y, "z": z } });
        assert!(self.peer.send_text(msg.to_string()));
    }

    /// Wait for the server to close this connection.
    async fn expect_closed(&mut self) {
        timeout(WAIT, async { while self.peer.next_envelope().await.is_some() {} })
            .await
            .expect("connection not closed");
    }
}

fn spawn_hub(config: HubConfig) -> Arc<Hub> {
    let (hub, _runner) = Hub::spawn(config).unwrap();
    hub
}

async fn join_at(hub: &Arc<Hub>, x: f64, y: f64, z: f64) -> TestClient {
    let (reader, writer, peer) = memory::pair();
    let participant = Participant::new(generate_participant_id(), Position::new(x, y, z), hub.chunk());
    let id = participant.id;
    let tasks = hub.connect(participant, reader, writer).await.unwrap();
    TestClient { id, peer, _tasks: tasks }
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn sender(envelope: &Envelope) -> ParticipantId {
    envelope.user_id.parse().unwrap()
}

fn probe(origin: ParticipantId) -> Arc<str> {
    Envelope::new(MessageType::PositionUpdate, &json!({ "probe": true }), origin)
        .unwrap()
        .encode()
        .unwrap()
}

#[tokio::test]
async fn test_world_state_arrives_first() {
    let hub = spawn_hub(HubConfig::default());

    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let state: WorldState = a.expect(MessageType::WorldState).await.payload_as().unwrap();
    assert!(state.users.contains_key(&a.id));
    assert!(state.assets.is_empty());

    let mut b = join_at(&hub, 10.0, 0.0, 0.0).await;
    let state: WorldState = b.expect(MessageType::WorldState).await.payload_as().unwrap();
    assert_eq!(state.users.len(), 2);

    let join = a.expect(MessageType::UserJoin).await;
    assert_eq!(sender(&join), b.id);

    // no self-join
    b.assert_quiet().await;
    assert_eq!(hub.client_count(), 2);
    assert_eq!(hub.region_count(), 1);
}

#[tokio::test]
async fn test_region_broadcast_reaches_each_member_once() {
    let hub = spawn_hub(HubConfig::default());
    let mut near = Vec::new();
    for i in 0..3 {
        near.push(join_at(&hub, i as f64, 0.0, 0.0).await);
    }
    let mut far = join_at(&hub, 250.0, 0.0, 0.0).await;
    for c in near.iter_mut() {
        c.drain().await;
    }
    far.drain().await;

    let delivered = hub.broadcast_to_region(ORIGIN_REGION, &probe(near[0].id));
    assert_eq!(delivered, 3);

    for c in near.iter_mut() {
        let env = c.expect(MessageType::PositionUpdate).await;
        assert_eq!(env.payload["probe"], true);
        c.assert_quiet().await;
    }
    far.assert_quiet().await;

    assert_eq!(hub.broadcast_to_region(RegionKey::new(9, 9, 9), &probe(far.id)), 0);
}

#[tokio::test]
async fn test_broadcast_except_skips_sender() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.drain().await;
    b.drain().await;

    assert_eq!(hub.broadcast_to_region_except(ORIGIN_REGION, &probe(a.id), a.id), 1);
    b.expect(MessageType::PositionUpdate).await;
    a.assert_quiet().await;
}

#[tokio::test]
async fn test_move_within_region() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 50.0, 0.0, 0.0).await;
    a.drain().await;
    b.drain().await;

    a.send_position(10.0, 0.0, 0.0);
    let to_self = a.expect(MessageType::PositionUpdate).await;
    let to_peer = b.expect(MessageType::PositionUpdate).await;
    assert_eq!(to_self.payload, to_peer.payload);
    assert_eq!(to_peer.payload["position"]["x"], 10.0);

    assert_eq!(hub.region_of(a.id), Some(ORIGIN_REGION));
    a.assert_quiet().await;
    b.assert_quiet().await;
}

#[tokio::test]
async fn test_move_across_regions() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut c = join_at(&hub, 150.0, 0.0, 0.0).await;
    for client in [&mut a, &mut b, &mut c] {
        client.drain().await;
    }

    a.send_position(150.0, 0.0, 0.0);

    let update = a.expect(MessageType::PositionUpdate).await;
    assert_eq!(update.payload["chunkID"], json!({ "chunkX": 1, "chunkY": 0, "chunkZ": 0 }));

    let change = b.expect(MessageType::ChunkChange).await;
    assert_eq!(sender(&change), a.id);
    assert_eq!(change.payload["chunkID"]["chunkX"], 1);

    let join = c.expect(MessageType::UserJoin).await;
    assert_eq!(sender(&join), a.id);
    let update = c.expect(MessageType::PositionUpdate).await;
    assert_eq!(sender(&update), a.id);

    a.assert_quiet().await;
    b.assert_quiet().await;
    c.assert_quiet().await;

    assert_eq!(hub.region_of(a.id), Some(RegionKey::new(1, 0, 0)));
    assert_eq!(hub.members(ORIGIN_REGION), vec![b.id]);
    assert_eq!(hub.members(RegionKey::new(1, 0, 0)).len(), 2);
    assert_eq!(hub.participant(a.id).unwrap().position.x, 150.0);
}

#[tokio::test]
async fn test_asset_spawn_goes_to_asset_region() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 250.0, 0.0, 0.0).await;
    a.drain().await;
    b.drain().await;

    let msg = json!({
        "type": "asset_spawn",
        "payload": { "type": "tree", "position": { "x": 250.0, "y": 0.0, "z": 0.0 } }
    });
    assert!(a.peer.send_text(msg.to_string()));

    let spawn = b.expect(MessageType::AssetSpawn).await;
    assert_eq!(spawn.payload["type"], "tree");
    assert_eq!(spawn.payload["createdBy"], a.id.to_string());
    assert_eq!(sender(&spawn), a.id);
    a.assert_quiet().await;
    assert_eq!(hub.asset_count(), 1);

    let mut late = join_at(&hub, 0.0, 0.0, 0.0).await;
    let state: WorldState = late.expect(MessageType::WorldState).await.payload_as().unwrap();
    assert_eq!(state.assets.len(), 1);
    assert_eq!(state.users.len(), 3);
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    b.drain().await;

    hub.unregister(a.id, DisconnectReason::PeerClosed);
    hub.unregister(a.id, DisconnectReason::PeerClosed);

    let leave = b.expect(MessageType::UserLeave).await;
    assert_eq!(sender(&leave), a.id);
    b.assert_quiet().await;

    a.expect_closed().await;
    assert_eq!(hub.client_count(), 1);
    assert_eq!(hub.participant_count(), 1);
    assert_eq!(hub.members(ORIGIN_REGION), vec![b.id]);
}

#[tokio::test]
async fn test_peer_hangup_unregisters() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    b.drain().await;

    a.peer.close();
    let leave = b.expect(MessageType::UserLeave).await;
    assert_eq!(sender(&leave), a.id);
    eventually(|| hub.client_count() == 1).await;
    assert!(hub.participant(a.id).is_none());
}

#[tokio::test]
async fn test_overflow_disconnects_slow_client() {
    let config = HubConfig::builder().outbound_queue_capacity(2).build().unwrap();
    let hub = spawn_hub(config);

    // Registered but never drained.
    let participant = Participant::new(generate_participant_id(), Position::ORIGIN, hub.chunk());
    let (victim, mut victim_queue) = Client::new(participant, 2);
    hub.register(Arc::clone(&victim)).await.unwrap();

    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    b.expect(MessageType::WorldState).await;

    // victim: world_state + user_join fill the queue, so this one overflows
    assert_eq!(hub.broadcast_to_region(ORIGIN_REGION, &probe(b.id)), 1);
    b.expect(MessageType::PositionUpdate).await;

    eventually(|| !hub.is_registered(victim.id())).await;
    assert!(victim.is_closed());
    assert!(hub.participant(victim.id()).is_none());
    assert_eq!(hub.region_of(victim.id()), None);
    assert_eq!(hub.members(ORIGIN_REGION), vec![b.id]);

    let leave = b.expect(MessageType::UserLeave).await;
    assert_eq!(sender(&leave), victim.id());

    let first = victim_queue.recv().await.unwrap();
    assert_eq!(decode_batch(&first)[0].kind, MessageType::WorldState);
    assert!(victim_queue.recv().await.is_some());
    assert!(victim_queue.recv().await.is_none());
}

#[tokio::test]
async fn test_malformed_frames_do_not_disconnect() {
    let hub = spawn_hub(HubConfig::default());
    let a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    b.drain().await;

    assert!(a.peer.send_text("not json"));
    assert!(a.peer.send_text(r#"{"type":"position_update","payload":{"x":"east"}}"#));
    assert!(a.peer.send_text(r#"{"type":"asset_spawn","payload":{"type":"rock"}}"#));
    assert!(a.peer.send_text(r#"{"type":"emote","payload":{}}"#));
    a.send_position(5.0, 0.0, 0.0);

    let update = b.expect(MessageType::PositionUpdate).await;
    assert_eq!(update.payload["position"]["x"], 5.0);
    assert!(hub.is_registered(a.id));
    assert_eq!(hub.asset_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_dropped() {
    let config = HubConfig::builder().max_frame_bytes(64).build().unwrap();
    let hub = spawn_hub(config);
    let a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 0.0, 0.0, 0.0).await;
    b.drain().await;

    let padded = json!({
        "type": "position_update",
        "payload": { "x": 1.0, "y": 0.0, "z": 0.0, "padding": "x".repeat(128) }
    });
    assert!(a.peer.send_text(padded.to_string()));
    b.assert_quiet().await;
    assert!(hub.is_registered(a.id));
}

#[tokio::test]
async fn test_burst_is_coalesced_into_one_frame() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.expect(MessageType::WorldState).await;

    for _ in 0..5 {
        hub.broadcast_to_region(ORIGIN_REGION, &probe(a.id));
    }

    let frame = timeout(WAIT, a.peer.recv()).await.unwrap().unwrap();
    let Frame::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let batch = decode_batch(&text);
    assert_eq!(batch.len(), 5);
    assert!(batch.iter().all(|e| e.kind == MessageType::PositionUpdate));
}

#[tokio::test]
async fn test_write_failure_unregisters() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.drain().await;

    a.peer.fail_writes();
    hub.broadcast_to_region(ORIGIN_REGION, &probe(a.id));
    eventually(|| hub.client_count() == 0).await;
    assert_eq!(hub.region_count(), 0);
}

#[tokio::test]
async fn test_read_error_unregisters() {
    let hub = spawn_hub(HubConfig::default());
    let a = join_at(&hub, 0.0, 0.0, 0.0).await;

    a.peer.fail_read(std::io::ErrorKind::ConnectionReset);
    eventually(|| !hub.is_registered(a.id)).await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_is_pinged_then_dropped() {
    let config = HubConfig::builder()
        .pong_wait(Duration::from_millis(600))
        .ping_period(Duration::from_millis(500))
        .write_wait(Duration::from_millis(100))
        .build()
        .unwrap();
    let hub = spawn_hub(config);
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.peer.set_auto_pong(false);
    a.expect(MessageType::WorldState).await;

    assert_eq!(a.peer.recv().await, Some(Frame::Ping(Vec::new())));
    assert_eq!(a.peer.recv().await, Some(Frame::Close));
    eventually(|| hub.client_count() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_responsive_client_survives_keepalive() {
    let config = HubConfig::builder()
        .pong_wait(Duration::from_millis(600))
        .ping_period(Duration::from_millis(500))
        .build()
        .unwrap();
    let hub = spawn_hub(config);
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.expect(MessageType::WorldState).await;

    sleep(Duration::from_secs(3)).await;
    assert!(hub.is_registered(a.id));

    let mut pings = 0;
    while let Some(frame) = a.peer.try_recv() {
        if frame == Frame::Ping(Vec::new()) {
            pings += 1;
        }
    }
    assert!(pings >= 5, "only {pings} pings");
}

#[tokio::test]
async fn test_global_broadcast_reaches_every_region() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, -500.0, 0.0, 900.0).await;
    a.drain().await;
    b.drain().await;

    let notice = Envelope::new(MessageType::Unknown, &json!({ "motd": "hi" }), a.id).unwrap();
    hub.broadcast_global(&notice).unwrap();

    for c in [&mut a, &mut b] {
        let env = c.expect(MessageType::Unknown).await;
        assert_eq!(env.payload, json!({ "motd": "hi" }));
    }
}

#[tokio::test]
async fn test_duplicate_register_rejected() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.drain().await;

    let client = hub.client(a.id).unwrap();
    assert!(matches!(hub.register(client).await, Err(HubError::Protocol { .. })));
    assert_eq!(hub.client_count(), 1);
    assert_eq!(hub.members(ORIGIN_REGION).len(), 1);
    a.assert_quiet().await;
}

#[tokio::test]
async fn test_second_connection_with_same_id_cannot_evict_first() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    a.drain().await;

    let (reader, writer, mut impostor) = memory::pair();
    let participant = Participant::new(a.id, Position::new(250.0, 0.0, 0.0), hub.chunk());
    let result = hub.connect(participant, reader, writer).await;
    assert!(matches!(result, Err(HubError::Protocol { .. })));

    // no pumps were started for the rejected connection
    assert!(timeout(WAIT, impostor.next_envelope()).await.unwrap().is_none());
    impostor.close();

    // a stale handle for the same id cannot remove the live connection
    let participant = Participant::new(a.id, Position::ORIGIN, hub.chunk());
    let (stale, _queue) = Client::new(participant, 4);
    hub.unregister_client(&stale, DisconnectReason::PeerClosed);
    settle().await;

    assert!(hub.is_registered(a.id));
    assert!(!hub.client(a.id).unwrap().is_closed());
    assert_eq!(hub.region_of(a.id), Some(ORIGIN_REGION));
    assert_eq!(hub.participant(a.id).unwrap().position, Position::ORIGIN);
    a.assert_quiet().await;

    a.send_position(1.0, 0.0, 0.0);
    a.expect(MessageType::PositionUpdate).await;
}

#[tokio::test]
async fn test_shutdown_closes_everyone() {
    let hub = spawn_hub(HubConfig::default());
    let mut a = join_at(&hub, 0.0, 0.0, 0.0).await;
    let mut b = join_at(&hub, 300.0, 0.0, 0.0).await;

    hub.shutdown().await.unwrap();
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.region_count(), 0);
    a.expect_closed().await;
    b.expect_closed().await;

    let participant = Participant::new(generate_participant_id(), Position::ORIGIN, hub.chunk());
    let (late, _queue) = Client::new(participant, 4);
    assert!(matches!(hub.register(late).await, Err(HubError::HubClosed)));
    assert!(hub.world_state().users.is_empty());
}
