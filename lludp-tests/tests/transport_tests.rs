//! Transport behavior against a scripted endpoint
//!
//! Each test stands up a real circuit against a fake simulator socket and
//! drives the wire directly: duplicate delivery, missing ACKs, piggybacked
//! trailers, and teardown.

mod common;

use common::FakeSimulator;
use lludp_protocol::Message;
use lludp_transport::{ReliableTransport, TransportConfig};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

/// Connect through the fake simulator's handshake: the reliable probe the
/// client opens with is answered (auto-ACK), which confirms liveness.
fn connect(sim: &mut FakeSimulator, config: TransportConfig) -> ReliableTransport {
    let remote = sim.addr();
    let handle = thread::spawn(move || ReliableTransport::connect(remote, config));
    sim.recv_packet(WAIT).expect("connect probe");
    handle
        .join()
        .expect("connect thread")
        .expect("circuit established")
}

#[test]
fn test_connect_answers_pings() {
    let mut sim = FakeSimulator::start();
    let transport = connect(&mut sim, TransportConfig::default());

    sim.send(0, &Message::StartPingCheck {
        ping_id: 9,
        oldest_unacked: 0,
    });
    let reply = sim
        .wait_for(WAIT, |p| {
            matches!(p.message, Message::CompletePingCheck { ping_id: 9 })
        })
        .expect("ping answered");
    assert!(!reply.header.is_reliable());

    transport.disconnect();
}

#[test]
fn test_duplicate_dispatched_once_but_acked_twice() {
    let mut sim = FakeSimulator::start();
    let config = TransportConfig {
        ack_batch_threshold: 1,
        ..TransportConfig::default()
    };
    let transport = connect(&mut sim, config);
    let inbound = transport.subscribe();

    // The duplicate deliberately lacks the resent flag: a late copy is
    // acknowledged the same as a marked resend
    let message = Message::AgentResume { serial: 7 };
    sim.send_with_seq(lludp_protocol::FLAG_RELIABLE, 42, &message);
    sim.send_with_seq(lludp_protocol::FLAG_RELIABLE, 42, &message);

    // Two ACK emissions for the same sequence
    for round in 0..2 {
        sim.wait_for(WAIT, |p| match &p.message {
            Message::PacketAck { acks } => acks.contains(&42),
            _ => false,
        })
        .unwrap_or_else(|| panic!("missing ACK emission {round}"));
    }

    // Exactly one dispatch to subscribers
    let event = inbound.recv_timeout(WAIT).expect("first dispatch");
    assert_eq!(event.sequence, 42);
    assert_eq!(event.message, message);
    assert!(inbound.recv_timeout(Duration::from_millis(300)).is_err());

    assert_eq!(transport.stats().duplicates, 1);
    transport.disconnect();
}

#[test]
fn test_reliable_ping_is_acknowledged() {
    let mut sim = FakeSimulator::start();
    let transport = connect(&mut sim, TransportConfig::default());

    let ping_seq = sim.next_seq();
    sim.send(
        lludp_protocol::FLAG_RELIABLE,
        &Message::StartPingCheck {
            ping_id: 3,
            oldest_unacked: 0,
        },
    );

    // The pong answers the ping; the ping's own sequence must also be
    // acknowledged, piggybacked or in an explicit ACK
    let acked = sim.wait_for(WAIT, |p| {
        p.acks.contains(&ping_seq)
            || matches!(&p.message, Message::PacketAck { acks } if acks.contains(&ping_seq))
    });
    assert!(acked.is_some(), "reliable ping never acknowledged");

    transport.disconnect();
}

#[test]
fn test_connect_retries_probe_until_answered() {
    let mut sim = FakeSimulator::start();
    sim.auto_ack = false;
    sim.auto_pong = false;

    let config = TransportConfig {
        resend_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(5),
        ..TransportConfig::default()
    };
    let remote = sim.addr();
    let handle = thread::spawn(move || ReliableTransport::connect(remote, config));

    // Swallow the first probe; a retry must follow without the remote
    // having spoken
    sim.recv_packet(WAIT).expect("first probe");
    let retry = sim.recv_packet(WAIT).expect("probe retried");
    assert!(matches!(retry.message, Message::StartPingCheck { .. }));
    sim.send(0, &Message::CompletePingCheck { ping_id: 0 });

    let transport = handle
        .join()
        .expect("connect thread")
        .expect("circuit established after retry");
    assert!(transport.is_connected());
    transport.disconnect();
}

#[test]
fn test_unacked_packet_resent_then_dropped() {
    let mut sim = FakeSimulator::start();
    sim.auto_ack = false;

    let config = TransportConfig {
        resend_interval: Duration::from_millis(50),
        resend_timeout: Duration::from_millis(100),
        max_resends: 2,
        ..TransportConfig::default()
    };
    let remote = sim.addr();
    let handle = thread::spawn(move || ReliableTransport::connect(remote, config));
    let probe = sim.recv_packet(WAIT).expect("connect probe");
    let probe_seq = probe.header.sequence;
    // Anything inbound confirms liveness; deliberately not an ACK
    sim.send(0, &Message::CompletePingCheck { ping_id: 0 });
    let transport = handle.join().expect("thread").expect("circuit");

    // The unacknowledged probe comes back exactly max_resends times, marked
    // resent, under its original sequence number
    for attempt in 0..2 {
        let resent = sim
            .wait_for(WAIT, |p| p.header.is_resent() && p.header.sequence == probe_seq)
            .unwrap_or_else(|| panic!("missing resend {attempt}"));
        assert!(resent.header.is_reliable());
    }
    assert!(
        sim.wait_for(Duration::from_millis(500), |p| p.header.is_resent()
            && p.header.sequence == probe_seq)
            .is_none(),
        "resend cap exceeded"
    );

    // Dropped as lost and removed from the awaiting-ACK map
    assert_eq!(transport.unacked_count(), 0);
    assert_eq!(transport.stats().packets_lost, 1);
    transport.disconnect();
}

#[test]
fn test_acks_piggyback_on_outgoing_traffic() {
    let mut sim = FakeSimulator::start();
    let config = TransportConfig {
        // No proactive flushing: ACKs must ride along on the next send
        ack_batch_threshold: 100,
        resend_interval: Duration::from_secs(30),
        ping_interval: Duration::from_secs(30),
        ..TransportConfig::default()
    };
    let transport = connect(&mut sim, config);

    sim.send_with_seq(lludp_protocol::FLAG_RELIABLE, 11, &Message::AgentResume { serial: 1 });
    // Give the receive thread a moment to queue the pending ACK
    thread::sleep(Duration::from_millis(200));

    transport
        .send(Message::AgentPause { serial: 2 }, false)
        .expect("send");
    let outgoing = sim
        .wait_for(WAIT, |p| matches!(p.message, Message::AgentPause { .. }))
        .expect("outgoing packet");
    assert!(outgoing.header.has_appended_acks());
    assert!(outgoing.acks.contains(&11));

    transport.disconnect();
}

#[test]
fn test_disconnect_signals_remote() {
    let mut sim = FakeSimulator::start();
    let transport = connect(&mut sim, TransportConfig::default());

    transport.disconnect();
    assert!(!transport.is_connected());
    sim.wait_for(WAIT, |p| matches!(p.message, Message::CloseCircuit))
        .expect("close signal");

    // Idempotent
    transport.disconnect();
}

#[test]
fn test_remote_close_dispatched_and_terminates() {
    let mut sim = FakeSimulator::start();
    let transport = connect(&mut sim, TransportConfig::default());
    let inbound = transport.subscribe();

    sim.send(lludp_protocol::FLAG_RELIABLE, &Message::CloseCircuit);
    let event = inbound.recv_timeout(WAIT).expect("close dispatched");
    assert_eq!(event.message, Message::CloseCircuit);

    // The circuit winds down shortly after
    let mut closed = false;
    for _ in 0..20 {
        if !transport.is_connected() {
            closed = true;
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    assert!(closed, "circuit still up after remote close");
}
