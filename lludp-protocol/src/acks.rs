//! Pending outbound ACK set
//!
//! Inbound reliable sequence numbers wait here until they are either appended
//! to an outgoing packet or flushed in an explicit ACK message. Order of
//! arrival is preserved; a sequence is queued at most once while pending.

use std::collections::{HashSet, VecDeque};

/// Inbound sequence numbers awaiting acknowledgement
#[derive(Default)]
pub struct PendingAcks {
    queue: VecDeque<u32>,
    pending: HashSet<u32>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sequence number for acknowledgement.
    ///
    /// A sequence already pending is not queued twice; once taken it may be
    /// queued again (a resent packet is re-ACKed).
    pub fn push(&mut self, sequence: u32) {
        if self.pending.insert(sequence) {
            self.queue.push_back(sequence);
        }
    }

    /// Drain up to `max` pending ACKs, oldest first.
    pub fn take(&mut self, max: usize) -> Vec<u32> {
        let count = max.min(self.queue.len());
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            // queue and set are kept in lockstep
            if let Some(seq) = self.queue.pop_front() {
                self.pending.remove(&seq);
                out.push(seq);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
