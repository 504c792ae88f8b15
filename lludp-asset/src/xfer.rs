//! Xfer download state
//!
//! The receive side of the legacy byte-stream protocol. Chunk 0 leads with a
//! little-endian total size; bit 31 of the chunk index marks the final chunk.
//! Every applied chunk is confirmed by index; a duplicate or out-of-order
//! chunk is answered by re-confirming the last applied index so the sender
//! resumes from the right place.

use crate::reassembly::{Accepted, Completed, Reassembler};
use crate::status::TransferStatus;
use bytes::Bytes;
use lludp_protocol::message::XFER_EOF_BIT;
use tracing::debug;
use uuid::Uuid;

/// Derive the xfer id a chunked upload streams under from its upload
/// transaction id.
pub fn xfer_id_for_transaction(transaction_id: Uuid) -> u64 {
    let bytes = transaction_id.as_bytes();
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// What the caller should do after feeding a chunk in
#[derive(Debug)]
pub enum XferChunkOutcome {
    /// Chunk applied; confirm this index
    Confirm(u32),
    /// Chunk applied and the stream is finished; confirm, then report
    Finished(u32, Completed<u64>),
    /// Duplicate or out-of-order; re-confirm the last applied index, if any
    ReConfirm(Option<u32>),
    /// No active download under this xfer id
    Unknown,
}

/// Active Xfer downloads keyed by xfer id
#[derive(Default)]
pub struct XferDownloads {
    reassembler: Reassembler<u64>,
}

impl XferDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a download. Size is unknown until chunk 0 arrives.
    pub fn begin(&mut self, xfer_id: u64) -> bool {
        self.reassembler.begin(xfer_id, None)
    }

    pub fn is_active(&self, xfer_id: u64) -> bool {
        self.reassembler.is_active(xfer_id)
    }

    /// Drop a download without completing it.
    pub fn abort(&mut self, xfer_id: u64) -> bool {
        self.reassembler.remove(xfer_id)
    }

    /// Feed one inbound chunk in.
    pub fn accept_packet(
        &mut self,
        xfer_id: u64,
        packet_index: u32,
        data: Bytes,
    ) -> XferChunkOutcome {
        if !self.reassembler.is_active(xfer_id) {
            return XferChunkOutcome::Unknown;
        }

        let eof = packet_index & XFER_EOF_BIT != 0;
        let index = packet_index & !XFER_EOF_BIT;

        // Chunk 0 can never be buffered (it is the first expected index), so
        // the size prefix is stripped exactly once
        let payload = if index == 0 && self.reassembler.next_index(xfer_id) == Some(0) {
            if data.len() >= 4 {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&data[..4]);
                let size = u32::from_le_bytes(raw) as usize;
                if size > 0 {
                    self.reassembler.set_size(xfer_id, size);
                }
                data.slice(4..)
            } else {
                debug!(xfer_id, "chunk 0 too short for a size prefix");
                data
            }
        } else {
            data
        };

        let status = if eof {
            TransferStatus::Done
        } else {
            TransferStatus::Ok
        };

        match self.reassembler.accept(xfer_id, index, payload, status) {
            Accepted::Applied(None) => XferChunkOutcome::Confirm(index),
            Accepted::Applied(Some(completed)) => XferChunkOutcome::Finished(index, completed),
            Accepted::Buffered | Accepted::Duplicate => {
                let last = self
                    .reassembler
                    .next_index(xfer_id)
                    .and_then(|next| next.checked_sub(1));
                XferChunkOutcome::ReConfirm(last)
            }
            Accepted::Inactive => XferChunkOutcome::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized_chunk0(total: u32, payload: &[u8]) -> Bytes {
        let mut data = total.to_le_bytes().to_vec();
        data.extend_from_slice(payload);
        Bytes::from(data)
    }

    #[test]
    fn test_download_in_order() {
        let mut downloads = XferDownloads::new();
        assert!(downloads.begin(9));

        let outcome = downloads.accept_packet(9, 0, sized_chunk0(6, &[1, 2, 3]));
        assert!(matches!(outcome, XferChunkOutcome::Confirm(0)));

        let outcome = downloads.accept_packet(9, 1 | XFER_EOF_BIT, Bytes::from_static(&[4, 5, 6]));
        let XferChunkOutcome::Finished(1, done) = outcome else {
            panic!("expected finish, got {outcome:?}");
        };
        assert!(done.success);
        assert_eq!(done.data, vec![1, 2, 3, 4, 5, 6]);
        assert!(!downloads.is_active(9));
    }

    #[test]
    fn test_eof_terminates_without_size() {
        // Size prefix of zero: only the EOF bit ends the stream
        let mut downloads = XferDownloads::new();
        downloads.begin(1);

        downloads.accept_packet(1, 0, sized_chunk0(0, &[1, 1]));
        let outcome = downloads.accept_packet(1, 1 | XFER_EOF_BIT, Bytes::from_static(&[2, 2]));
        let XferChunkOutcome::Finished(_, done) = outcome else {
            panic!("expected finish");
        };
        assert_eq!(done.data, vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_duplicate_reconfirms_last_applied() {
        let mut downloads = XferDownloads::new();
        downloads.begin(1);

        downloads.accept_packet(1, 0, sized_chunk0(100, &[0; 10]));
        downloads.accept_packet(1, 1, Bytes::from_static(&[0; 10]));

        // Same index again: not applied, last applied index re-confirmed
        let outcome = downloads.accept_packet(1, 1, Bytes::from_static(&[9; 10]));
        assert!(matches!(outcome, XferChunkOutcome::ReConfirm(Some(1))));
    }

    #[test]
    fn test_out_of_order_reconfirms() {
        let mut downloads = XferDownloads::new();
        downloads.begin(1);
        downloads.accept_packet(1, 0, sized_chunk0(100, &[0; 10]));

        let outcome = downloads.accept_packet(1, 3, Bytes::from_static(&[0; 10]));
        assert!(matches!(outcome, XferChunkOutcome::ReConfirm(Some(0))));
    }

    #[test]
    fn test_unknown_xfer_ignored() {
        let mut downloads = XferDownloads::new();
        let outcome = downloads.accept_packet(42, 0, Bytes::from_static(&[0; 8]));
        assert!(matches!(outcome, XferChunkOutcome::Unknown));
    }

    #[test]
    fn test_xfer_id_derivation_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(xfer_id_for_transaction(id), xfer_id_for_transaction(id));
        assert_ne!(xfer_id_for_transaction(id), 0);
    }
}
