//! Texture scheduler behavior against a scripted endpoint
//!
//! Slot-bounded concurrency, stall escalation with resume-at-first-gap,
//! hard timeouts, and the cancellation sentinel.

mod common;

use bytes::Bytes;
use common::FakeSimulator;
use lludp_asset::{TextureConfig, TextureScheduler, TextureSink, TransferStatus};
use lludp_protocol::{Message, FLAG_RELIABLE};
use lludp_transport::{ReliableTransport, TransportConfig};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct CollectSink {
    textures: Mutex<Vec<(Uuid, u8, Vec<u8>)>>,
}

impl TextureSink for CollectSink {
    fn store_texture(&self, image_id: Uuid, codec: u8, data: &[u8]) {
        self.textures.lock().push((image_id, codec, data.to_vec()));
    }
}

struct Harness {
    sim: FakeSimulator,
    transport: ReliableTransport,
    scheduler: TextureScheduler,
    sink: Arc<CollectSink>,
}

fn setup(config: TextureConfig) -> Harness {
    let mut sim = FakeSimulator::start();
    let remote = sim.addr();
    let handle = thread::spawn(move || ReliableTransport::connect(remote, TransportConfig::default()));
    sim.recv_packet(WAIT).expect("connect probe");
    let transport = handle.join().expect("thread").expect("circuit");

    let sink = Arc::new(CollectSink::default());
    let scheduler = TextureScheduler::new(transport.clone(), config, sink.clone())
        .expect("scheduler started");
    Harness {
        sim,
        transport,
        scheduler,
        sink,
    }
}

/// The single entry of a texture wire request
fn entry_of(message: &Message) -> Option<lludp_protocol::ImageRequestEntry> {
    match message {
        Message::RequestImage { requests } if requests.len() == 1 => Some(requests[0]),
        _ => None,
    }
}

#[test]
fn test_slot_count_bounds_concurrency() {
    let mut h = setup(TextureConfig {
        worker_slots: 2,
        stall_threshold: Duration::from_secs(10),
        hard_timeout: Duration::from_secs(60),
        ..TextureConfig::default()
    });
    let events = h.scheduler.events();

    let ids: Vec<Uuid> = (1..=5).map(Uuid::from_u128).collect();
    for (i, id) in ids.iter().enumerate() {
        h.scheduler
            .request_texture(*id, 0, 0, (i + 1) as f32)
            .expect("queued");
    }

    // Exactly two requests reach the wire; the rest stay pending
    let mut on_wire = HashSet::new();
    while let Some(packet) = h.sim.recv_packet(Duration::from_millis(600)) {
        if let Some(entry) = entry_of(&packet.message) {
            on_wire.insert(entry.image_id);
        }
    }
    assert_eq!(on_wire.len(), 2, "admissions exceeded the slot count");
    // Highest priorities won the slots
    assert!(on_wire.contains(&ids[4]));
    assert!(on_wire.contains(&ids[3]));
    assert_eq!(h.scheduler.active_count(), 2);
    assert_eq!(h.scheduler.pending_count(), 3);

    // Completing one frees its slot and promotes exactly one more
    h.sim.send(
        FLAG_RELIABLE,
        &Message::ImageData {
            image_id: ids[4],
            codec: 2,
            size: 4,
            data: Bytes::from_static(&[9, 9, 9, 9]),
        },
    );
    let event = events.recv_timeout(WAIT).expect("completion event");
    assert_eq!(event.image_id, ids[4]);
    assert_eq!(event.status, TransferStatus::Done);
    // Settled requests are destroyed, not kept in the map
    assert_eq!(h.scheduler.state_of(ids[4]), None);

    let promoted = h
        .sim
        .wait_for(WAIT, |p| entry_of(&p.message).is_some())
        .and_then(|p| entry_of(&p.message))
        .expect("next request admitted");
    assert_eq!(promoted.image_id, ids[2], "promotion is priority ordered");
    assert!(h.scheduler.active_count() <= 2);

    assert_eq!(h.sink.textures.lock().len(), 1);
    h.scheduler.shutdown();
    h.transport.disconnect();
}

#[test]
fn test_stall_boosts_priority_and_resumes_at_gap() {
    let mut h = setup(TextureConfig {
        worker_slots: 1,
        stall_threshold: Duration::from_millis(200),
        hard_timeout: Duration::from_secs(30),
        priority_boost: 2.0,
        ..TextureConfig::default()
    });
    let image_id = Uuid::from_u128(0xFEED);

    h.scheduler
        .request_texture(image_id, 0, 0, 10.0)
        .expect("queued");
    let first = h
        .sim
        .wait_for(WAIT, |p| entry_of(&p.message).is_some())
        .and_then(|p| entry_of(&p.message))
        .expect("initial request");
    assert_eq!(first.starting_packet, 0);
    assert_eq!(first.priority, 10.0);

    // Chunk 0 and chunk 2 arrive; chunk 1 is the gap
    h.sim.send(
        FLAG_RELIABLE,
        &Message::ImageData {
            image_id,
            codec: 2,
            size: 30,
            data: Bytes::from_static(&[0xAA; 10]),
        },
    );
    h.sim.send(
        FLAG_RELIABLE,
        &Message::ImagePacket {
            image_id,
            packet_index: 2,
            data: Bytes::from_static(&[0xCC; 10]),
        },
    );

    // Then silence: the stalled request comes back boosted, resuming at the
    // first missing chunk
    let resumed = h
        .sim
        .wait_for(WAIT, |p| {
            entry_of(&p.message).map(|e| e.starting_packet > 0).unwrap_or(false)
        })
        .and_then(|p| entry_of(&p.message))
        .expect("re-request after stall");
    assert_eq!(resumed.image_id, image_id);
    assert_eq!(resumed.starting_packet, 1);
    assert_eq!(resumed.priority, 20.0);

    h.scheduler.shutdown();
    h.transport.disconnect();
}

#[test]
fn test_hard_timeout_frees_the_slot() {
    let mut h = setup(TextureConfig {
        worker_slots: 1,
        stall_threshold: Duration::from_millis(100),
        hard_timeout: Duration::from_millis(300),
        ..TextureConfig::default()
    });
    let events = h.scheduler.events();
    let starved = Uuid::from_u128(1);
    let next = Uuid::from_u128(2);

    h.scheduler.request_texture(starved, 0, 0, 10.0).expect("queued");
    h.scheduler.request_texture(next, 0, 0, 1.0).expect("queued");

    let event = events.recv_timeout(WAIT).expect("timeout event");
    assert_eq!(event.image_id, starved);
    assert_eq!(event.status, TransferStatus::Timeout);
    assert_eq!(h.scheduler.state_of(starved), None);

    // The freed slot admits the waiting request
    h.sim
        .wait_for(WAIT, |p| {
            entry_of(&p.message).map(|e| e.image_id == next).unwrap_or(false)
        })
        .expect("second request admitted");

    h.scheduler.shutdown();
    h.transport.disconnect();
}

#[test]
fn test_cancellation_sentinel_aborts_in_flight_request() {
    let mut h = setup(TextureConfig {
        worker_slots: 1,
        stall_threshold: Duration::from_secs(10),
        hard_timeout: Duration::from_secs(60),
        ..TextureConfig::default()
    });
    let events = h.scheduler.events();
    let image_id = Uuid::from_u128(0xABCD);

    h.scheduler.request_texture(image_id, 0, 0, 5.0).expect("queued");
    h.sim
        .wait_for(WAIT, |p| entry_of(&p.message).is_some())
        .expect("initial request");

    // Priority 0 with discard -1 on an active request: abort, not re-request
    h.scheduler
        .request_texture(image_id, 0, -1, 0.0)
        .expect("sentinel accepted");

    let cancel = h
        .sim
        .wait_for(WAIT, |p| {
            entry_of(&p.message)
                .map(|e| e.image_id == image_id && e.priority == 0.0 && e.discard_level == -1)
                .unwrap_or(false)
        })
        .expect("cancel on the wire");
    assert_eq!(cancel.message, Message::RequestImage {
        requests: vec![lludp_protocol::ImageRequestEntry {
            image_id,
            discard_level: -1,
            priority: 0.0,
            starting_packet: 0,
            image_type: 0,
        }]
    });

    let event = events.recv_timeout(WAIT).expect("abort event");
    assert_eq!(event.image_id, image_id);
    assert_eq!(event.status, TransferStatus::Aborted);
    assert_eq!(h.scheduler.state_of(image_id), None);

    h.scheduler.shutdown();
    h.transport.disconnect();
}

#[test]
fn test_not_in_database_settles_as_not_found() {
    let mut h = setup(TextureConfig {
        worker_slots: 1,
        ..TextureConfig::default()
    });
    let events = h.scheduler.events();
    let image_id = Uuid::from_u128(0x404);

    h.scheduler.request_texture(image_id, 0, 0, 5.0).expect("queued");
    h.sim
        .wait_for(WAIT, |p| entry_of(&p.message).is_some())
        .expect("initial request");

    h.sim.send(FLAG_RELIABLE, &Message::ImageNotInDatabase { image_id });

    let event = events.recv_timeout(WAIT).expect("not-found event");
    assert_eq!(event.image_id, image_id);
    assert_eq!(event.status, TransferStatus::NotFound);
    assert!(h.sink.textures.lock().is_empty());

    h.scheduler.shutdown();
    h.transport.disconnect();
}
