//! Xfer upload state
//!
//! The send side of the byte-stream protocol. Uploads too large for an
//! inline request wait for the simulator's grant (an inbound `RequestXfer`
//! naming our transaction), then stream fixed-size chunks, one per inbound
//! confirmation. Only one upload may await its grant at a time; the rest
//! queue behind it.

use bytes::Bytes;
use lludp_protocol::message::XFER_EOF_BIT;
use lludp_protocol::Message;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// One chunked upload being streamed
pub struct UploadStream {
    pub transaction_id: Uuid,
    pub asset_type: i8,
    data: Vec<u8>,
    chunk_size: usize,
    /// Next chunk index to send
    next_chunk: u32,
}

impl UploadStream {
    pub fn new(transaction_id: Uuid, asset_type: i8, data: Vec<u8>, chunk_size: usize) -> Self {
        UploadStream {
            transaction_id,
            asset_type,
            data,
            chunk_size,
            next_chunk: 0,
        }
    }

    fn chunk_count(&self) -> u32 {
        (self.data.len().div_ceil(self.chunk_size) as u32).max(1)
    }

    pub fn is_finished(&self) -> bool {
        self.next_chunk >= self.chunk_count()
    }

    /// Index of the most recently produced chunk, EOF bit excluded
    pub fn last_sent(&self) -> Option<u32> {
        self.next_chunk.checked_sub(1)
    }

    /// Build the next outgoing chunk. Chunk 0 leads with the little-endian
    /// total size; the final chunk carries the EOF bit. Returns `None` once
    /// every chunk has been produced.
    pub fn next_packet(&mut self, xfer_id: u64) -> Option<Message> {
        if self.is_finished() {
            return None;
        }
        let index = self.next_chunk;
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.data.len());

        let mut payload = Vec::with_capacity(end - start + 4);
        if index == 0 {
            payload.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        }
        payload.extend_from_slice(&self.data[start..end]);

        self.next_chunk += 1;
        let packet_index = if self.is_finished() {
            index | XFER_EOF_BIT
        } else {
            index
        };
        Some(Message::SendXferPacket {
            xfer_id,
            packet_index,
            data: Bytes::from(payload),
        })
    }
}

struct GrantWaiter {
    stream: UploadStream,
    /// When this upload became the one awaiting its grant
    waiting_since: Instant,
}

/// Single-slot grant handshake plus the queue behind it
#[derive(Default)]
pub struct UploadQueue {
    /// The one upload allowed to await its grant
    current: Option<GrantWaiter>,
    waiting: VecDeque<UploadStream>,
    /// Granted uploads, streaming under the simulator's xfer id
    active: HashMap<u64, UploadStream>,
}

impl UploadQueue {
    pub fn new() -> Self {
        UploadQueue {
            current: None,
            waiting: VecDeque::new(),
            active: HashMap::new(),
        }
    }

    /// Queue an upload for its grant. It becomes the awaiting upload
    /// immediately when the slot is free.
    pub fn enqueue(&mut self, stream: UploadStream) {
        if self.current.is_none() {
            self.current = Some(GrantWaiter {
                stream,
                waiting_since: Instant::now(),
            });
        } else {
            self.waiting.push_back(stream);
        }
    }

    /// Match an inbound grant against the awaiting upload. On a match the
    /// upload starts streaming under `xfer_id` and the next queued upload is
    /// promoted into the grant slot.
    pub fn grant(&mut self, transaction_id: Uuid, xfer_id: u64) -> Option<&mut UploadStream> {
        let matches = self
            .current
            .as_ref()
            .map(|w| w.stream.transaction_id == transaction_id)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        // Checked above
        let waiter = self.current.take()?;
        self.active.insert(xfer_id, waiter.stream);
        self.promote();
        self.active.get_mut(&xfer_id)
    }

    /// Fail the awaiting upload when its grant has not arrived in time.
    /// Returns the expired stream so the caller can report it.
    pub fn expire(&mut self, timeout: Duration) -> Option<UploadStream> {
        let expired = self
            .current
            .as_ref()
            .map(|w| w.waiting_since.elapsed() >= timeout)
            .unwrap_or(false);
        if !expired {
            return None;
        }
        let waiter = self.current.take()?;
        debug!(
            transaction_id = %waiter.stream.transaction_id,
            "upload grant timed out"
        );
        self.promote();
        Some(waiter.stream)
    }

    fn promote(&mut self) {
        if let Some(next) = self.waiting.pop_front() {
            self.current = Some(GrantWaiter {
                stream: next,
                waiting_since: Instant::now(),
            });
        }
    }

    /// Look up a streaming upload by the xfer id it was granted under.
    pub fn active_mut(&mut self, xfer_id: u64) -> Option<&mut UploadStream> {
        self.active.get_mut(&xfer_id)
    }

    /// Remove a streaming upload, finished or aborted.
    pub fn finish(&mut self, xfer_id: u64) -> Option<UploadStream> {
        self.active.remove(&xfer_id)
    }

    pub fn awaiting_grant(&self) -> Option<Uuid> {
        self.current.as_ref().map(|w| w.stream.transaction_id)
    }

    pub fn queued_len(&self) -> usize {
        self.waiting.len()
    }
}
