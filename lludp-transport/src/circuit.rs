//! Circuit state
//!
//! A circuit is one logical connection to one simulator endpoint. It owns the
//! outbound sequence counter, the pause/resume serial, and the per-circuit
//! statistics. Created on connect, dropped on disconnect; nothing here
//! survives a reconnect.

use parking_lot::{Mutex, MutexGuard};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Per-circuit counters
#[derive(Debug, Clone, Default)]
pub struct CircuitStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Reliable packets retransmitted
    pub resends: u64,
    /// Reliable packets dropped after exhausting resends
    pub packets_lost: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    /// Inbound reliable duplicates suppressed
    pub duplicates: u64,
    /// Round-trip time of the most recent completed ping
    pub last_ping_rtt: Option<Duration>,
}

/// One reliable connection to a simulator endpoint
pub struct Circuit {
    remote: SocketAddr,
    /// Next outbound sequence number
    sequence: AtomicU32,
    /// Serial carried by pause/resume control messages
    pause_serial: AtomicU32,
    stats: Mutex<CircuitStats>,
}

impl Circuit {
    pub fn new(remote: SocketAddr) -> Self {
        Circuit {
            remote,
            sequence: AtomicU32::new(1),
            pause_serial: AtomicU32::new(0),
            stats: Mutex::new(CircuitStats::default()),
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Claim a fresh outbound sequence number. Only first sends get one;
    /// resends keep their original sequence.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Sequence number the next send would get
    pub fn current_sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Monotonically increasing serial for pause/resume signals
    pub fn next_pause_serial(&self) -> u32 {
        self.pause_serial.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn stats(&self) -> CircuitStats {
        self.stats.lock().clone()
    }

    pub(crate) fn stats_mut(&self) -> MutexGuard<'_, CircuitStats> {
        self.stats.lock()
    }
}
