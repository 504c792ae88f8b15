//! Chunk reassembly
//!
//! Applies transfer chunks strictly in index order regardless of arrival
//! order. Out-of-order chunks are buffered and drained as soon as the gap in
//! front of them closes. Generic over the transfer key: Xfer streams use the
//! numeric xfer id, Transfer downloads and textures use a `Uuid`.

use crate::status::TransferStatus;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::trace;

/// A finished transfer, successful or not
#[derive(Debug, Clone)]
pub struct Completed<K> {
    pub key: K,
    /// Assembled payload; meaningful only when `success`
    pub data: Vec<u8>,
    pub status: TransferStatus,
    pub success: bool,
}

/// Outcome of feeding one chunk in
#[derive(Debug)]
pub enum Accepted<K> {
    /// Chunk applied in order (possibly draining buffered successors);
    /// carries the completion when this chunk ended the transfer
    Applied(Option<Completed<K>>),
    /// Chunk ahead of the expected index, held for later
    Buffered,
    /// Chunk index already applied; data discarded
    Duplicate,
    /// No active transfer under this key
    Inactive,
}

struct ActiveTransfer {
    /// Declared total size; `None` means the end is signalled by status only
    size: Option<usize>,
    data: Vec<u8>,
    /// Next chunk index expected in order
    next_index: u32,
    /// Out-of-order chunks keyed by index
    pending: BTreeMap<u32, (Bytes, TransferStatus)>,
}

/// In-order chunk reassembler for concurrent transfers.
///
/// Completion is reported exactly once per transfer: the `Completed` value
/// returned from [`accept`](Reassembler::accept) is the only completion
/// signal, and the transfer is gone from the active set once it is returned.
pub struct Reassembler<K> {
    active: HashMap<K, ActiveTransfer>,
}

impl<K: Eq + Hash + Copy> Reassembler<K> {
    pub fn new() -> Self {
        Reassembler {
            active: HashMap::new(),
        }
    }

    /// Open a transfer. Returns false when the key is already active.
    pub fn begin(&mut self, key: K, size: Option<usize>) -> bool {
        if self.active.contains_key(&key) {
            return false;
        }
        let capacity = size.unwrap_or(0).min(1 << 20);
        self.active.insert(
            key,
            ActiveTransfer {
                size,
                data: Vec::with_capacity(capacity),
                next_index: 0,
                pending: BTreeMap::new(),
            },
        );
        true
    }

    pub fn is_active(&self, key: K) -> bool {
        self.active.contains_key(&key)
    }

    /// Declare the size of a transfer opened without one. Xfer streams learn
    /// their size from the first chunk, after the transfer is already open.
    pub fn set_size(&mut self, key: K, size: usize) -> bool {
        match self.active.get_mut(&key) {
            Some(transfer) => {
                transfer.size = Some(size);
                true
            }
            None => false,
        }
    }

    /// Next chunk index an active transfer expects, which is also its first
    /// missing index
    pub fn next_index(&self, key: K) -> Option<u32> {
        self.active.get(&key).map(|t| t.next_index)
    }

    pub fn bytes_transferred(&self, key: K) -> Option<usize> {
        self.active.get(&key).map(|t| t.data.len())
    }

    /// Drop a transfer without completing it. Returns whether it existed.
    pub fn remove(&mut self, key: K) -> bool {
        self.active.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Feed one chunk in.
    ///
    /// An in-order chunk is applied and the buffer drained of any chunks now
    /// in order. A chunk ahead of the expected index is buffered; a chunk
    /// behind it is a duplicate and discarded. The transfer ends when an
    /// applied chunk carries a terminal status, or when the applied bytes
    /// reach the declared size (reported as `Done`). Chunk data running past
    /// the declared size is truncated at the boundary and ends the transfer
    /// as an `Error`.
    pub fn accept(
        &mut self,
        key: K,
        chunk_index: u32,
        payload: Bytes,
        status: TransferStatus,
    ) -> Accepted<K> {
        let Some(transfer) = self.active.get_mut(&key) else {
            return Accepted::Inactive;
        };

        if chunk_index < transfer.next_index {
            return Accepted::Duplicate;
        }
        if chunk_index > transfer.next_index {
            transfer.pending.insert(chunk_index, (payload, status));
            return Accepted::Buffered;
        }

        // In order: apply, then drain buffered successors
        let mut chunk = (payload, status);
        let terminal = loop {
            let (payload, status) = chunk;
            let ended = Self::apply(transfer, &payload, status);
            transfer.next_index += 1;

            if ended.is_some() {
                break ended;
            }
            match transfer.pending.remove(&transfer.next_index) {
                Some(next) => chunk = next,
                None => break None,
            }
        };

        let Some(final_status) = terminal else {
            return Accepted::Applied(None);
        };

        // Completed; buffered leftovers are discarded with it
        let Some(transfer) = self.active.remove(&key) else {
            return Accepted::Inactive;
        };
        trace!(
            bytes = transfer.data.len(),
            pending_discarded = transfer.pending.len(),
            "transfer completed"
        );
        Accepted::Applied(Some(Completed {
            key,
            success: final_status == TransferStatus::Done,
            data: transfer.data,
            status: final_status,
        }))
    }

    /// Append one chunk's data; returns the terminal status when this chunk
    /// ends the transfer.
    fn apply(
        transfer: &mut ActiveTransfer,
        payload: &[u8],
        status: TransferStatus,
    ) -> Option<TransferStatus> {
        if let Some(size) = transfer.size {
            let room = size - transfer.data.len();
            if payload.len() > room {
                transfer.data.extend_from_slice(&payload[..room]);
                return Some(TransferStatus::Error);
            }
        }
        transfer.data.extend_from_slice(payload);

        if status.is_terminal() {
            return Some(status);
        }
        match transfer.size {
            Some(size) if transfer.data.len() >= size => Some(TransferStatus::Done),
            _ => None,
        }
    }
}

impl<K: Eq + Hash + Copy> Default for Reassembler<K> {
    fn default() -> Self {
        Self::new()
    }
}
