//! Inbound duplicate detection
//!
//! The transport keeps a fixed-capacity window of recently accepted inbound
//! sequence numbers. A reliable packet whose sequence is already present is a
//! duplicate: it is not dispatched again, though it may still be re-ACKed.

use std::collections::{HashSet, VecDeque};

/// Ring of recently seen inbound sequence numbers with O(1) lookup
pub struct InboundSequenceWindow {
    ring: VecDeque<u32>,
    seen: HashSet<u32>,
    capacity: usize,
}

impl InboundSequenceWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be non-zero");
        InboundSequenceWindow {
            ring: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sequence number.
    ///
    /// Returns `true` when the sequence was fresh, `false` for a duplicate.
    /// The oldest entry is evicted once the window is full.
    pub fn insert(&mut self, sequence: u32) -> bool {
        if self.seen.contains(&sequence) {
            return false;
        }

        if self.ring.len() == self.capacity {
            if let Some(oldest) = self.ring.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.ring.push_back(sequence);
        self.seen.insert(sequence);
        true
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.seen.contains(&sequence)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
