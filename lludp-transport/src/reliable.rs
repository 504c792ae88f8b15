//! Awaiting-ACK bookkeeping
//!
//! Every reliable send is recorded here until the remote side acknowledges
//! its sequence number. The resend tick walks entries older than the resend
//! timeout: survivors are retransmitted with the resent flag set, entries at
//! the retry cap are dropped and counted as lost.

use lludp_protocol::header::FLAG_RESENT;
use lludp_protocol::SeqNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A reliable packet waiting for its ACK
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    pub sequence: u32,
    /// Serialized datagram exactly as first sent
    pub bytes: Vec<u8>,
    /// Last transmission time
    pub sent_at: Instant,
    pub resend_count: u32,
}

/// Ordered map of unacknowledged reliable packets, keyed by sequence.
///
/// A sequence number appears here at most once at a time.
#[derive(Default)]
pub struct AwaitingAck {
    entries: Mutex<BTreeMap<u32, OutgoingPacket>>,
}

impl AwaitingAck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly sent reliable packet.
    pub fn record(&self, sequence: u32, bytes: Vec<u8>) {
        let mut entries = self.entries.lock();
        entries.insert(
            sequence,
            OutgoingPacket {
                sequence,
                bytes,
                sent_at: Instant::now(),
                resend_count: 0,
            },
        );
    }

    /// Remove an acknowledged sequence. Returns whether it was present.
    pub fn acknowledge(&self, sequence: u32) -> bool {
        self.entries.lock().remove(&sequence).is_some()
    }

    /// Remove a batch of acknowledged sequences, returning how many matched.
    pub fn acknowledge_many(&self, sequences: &[u32]) -> usize {
        let mut entries = self.entries.lock();
        sequences
            .iter()
            .filter(|seq| entries.remove(seq).is_some())
            .count()
    }

    /// Oldest sequence still unacknowledged (carried by liveness pings).
    ///
    /// Oldest under serial-number order, so the answer stays correct while
    /// the sequence counter wraps around.
    pub fn oldest_unacked(&self) -> Option<u32> {
        self.entries
            .lock()
            .keys()
            .copied()
            .reduce(|a, b| {
                if SeqNumber::new(a).lt(SeqNumber::new(b)) {
                    a
                } else {
                    b
                }
            })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Collect packets due for retransmission.
    ///
    /// Entries older than `resend_timeout` are either returned for resend
    /// (resent flag set, counter bumped, clock reset) or, once they have
    /// been resent `max_resends` times, dropped and counted in the second
    /// return value. Dropped packets are silently lost; the upper layers
    /// observe the loss through their own timeout paths.
    pub fn collect_due(
        &self,
        resend_timeout: Duration,
        max_resends: u32,
    ) -> (Vec<OutgoingPacket>, usize) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let due: Vec<u32> = entries
            .iter()
            .filter(|(_, p)| now.duration_since(p.sent_at) >= resend_timeout)
            .map(|(seq, _)| *seq)
            .collect();

        let mut resend = Vec::new();
        let mut dropped = 0;
        for seq in due {
            // Checked above; entry cannot have vanished while locked
            let Some(packet) = entries.get_mut(&seq) else {
                continue;
            };
            if packet.resend_count >= max_resends {
                entries.remove(&seq);
                dropped += 1;
            } else {
                packet.resend_count += 1;
                packet.sent_at = now;
                packet.bytes[0] |= FLAG_RESENT;
                resend.push(packet.clone());
            }
        }

        (resend, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lludp_protocol::header::PacketHeader;
    use bytes::BytesMut;

    fn datagram(sequence: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PacketHeader::new(lludp_protocol::FLAG_RELIABLE, sequence).to_bytes(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_record_acknowledge() {
        let awaiting = AwaitingAck::new();
        awaiting.record(5, datagram(5));
        awaiting.record(7, datagram(7));

        assert_eq!(awaiting.len(), 2);
        assert_eq!(awaiting.oldest_unacked(), Some(5));

        assert!(awaiting.acknowledge(5));
        assert!(!awaiting.acknowledge(5));
        assert_eq!(awaiting.oldest_unacked(), Some(7));
    }

    #[test]
    fn test_oldest_unacked_across_wraparound() {
        let awaiting = AwaitingAck::new();
        // The counter wrapped: u32::MAX - 1 was sent before 1
        awaiting.record(1, datagram(1));
        awaiting.record(u32::MAX - 1, datagram(u32::MAX - 1));

        assert_eq!(awaiting.oldest_unacked(), Some(u32::MAX - 1));
        assert!(awaiting.acknowledge(u32::MAX - 1));
        assert_eq!(awaiting.oldest_unacked(), Some(1));
    }

    #[test]
    fn test_acknowledge_many() {
        let awaiting = AwaitingAck::new();
        for seq in [1u32, 2, 3] {
            awaiting.record(seq, datagram(seq));
        }
        assert_eq!(awaiting.acknowledge_many(&[2, 3, 9]), 2);
        assert_eq!(awaiting.len(), 1);
    }

    #[test]
    fn test_collect_due_resends_then_drops() {
        let awaiting = AwaitingAck::new();
        awaiting.record(1, datagram(1));

        // Zero timeout: due immediately
        let (resend, dropped) = awaiting.collect_due(Duration::ZERO, 2);
        assert_eq!(resend.len(), 1);
        assert_eq!(dropped, 0);
        assert_eq!(resend[0].resend_count, 1);
        assert!(resend[0].bytes[0] & FLAG_RESENT != 0);

        let (resend, dropped) = awaiting.collect_due(Duration::ZERO, 2);
        assert_eq!(resend.len(), 1);
        assert_eq!(resend[0].resend_count, 2);
        assert_eq!(dropped, 0);

        // Third pass hits the cap: dropped and removed
        let (resend, dropped) = awaiting.collect_due(Duration::ZERO, 2);
        assert!(resend.is_empty());
        assert_eq!(dropped, 1);
        assert!(awaiting.is_empty());
    }

    #[test]
    fn test_collect_due_respects_timeout() {
        let awaiting = AwaitingAck::new();
        awaiting.record(1, datagram(1));

        let (resend, dropped) = awaiting.collect_due(Duration::from_secs(60), 3);
        assert!(resend.is_empty());
        assert_eq!(dropped, 0);
        assert_eq!(awaiting.len(), 1);
    }
}
