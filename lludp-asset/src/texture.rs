//! Texture download scheduling
//!
//! Bounds concurrent texture downloads with a fixed slot array. A scheduling
//! thread admits the highest-priority pending request into a free slot and
//! issues the wire request from the first missing chunk; one worker thread
//! per slot blocks on the request's completion signal, escalating priority on
//! stall and forcing a timeout when the stall persists.

use crate::reassembly::{Accepted, Reassembler};
use crate::sink::TextureSink;
use crate::status::TransferStatus;
use crate::TransferError;
use bytes::Bytes;
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use lludp_protocol::{ImageRequestEntry, Message};
use lludp_transport::ReliableTransport;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Scheduling thread tick
const ADMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Texture scheduler tunables
#[derive(Debug, Clone)]
pub struct TextureConfig {
    /// Concurrent download bound
    pub worker_slots: usize,
    /// No chunk for this long: escalate priority and re-request
    pub stall_threshold: Duration,
    /// No chunk for this long: force a timeout and free the slot
    pub hard_timeout: Duration,
    /// Multiplier applied to a stalled request's priority, uncapped
    pub priority_boost: f32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        TextureConfig {
            worker_slots: 4,
            stall_threshold: Duration::from_secs(5),
            hard_timeout: Duration::from_secs(30),
            priority_boost: 1.5,
        }
    }
}

/// Lifecycle of one in-flight texture request. A terminal transition
/// destroys the request; the outcome travels in the [`TextureEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    /// Waiting for a free slot
    Pending,
    /// Admitted; wire request issued, no data yet
    Started,
    /// At least one chunk received
    Progress,
}

/// Terminal outcome of one texture request
#[derive(Debug, Clone)]
pub struct TextureEvent {
    pub image_id: Uuid,
    pub status: TransferStatus,
}

/// First gap in a sparse set of received chunk indices; where a re-request
/// asks the sender to resume from.
pub fn first_missing(seen: &BTreeSet<u32>) -> u32 {
    let mut expected = 0;
    for &index in seen {
        if index != expected {
            break;
        }
        expected += 1;
    }
    expected
}

struct TextureRequest {
    image_type: u8,
    discard_level: i8,
    priority: f32,
    state: TextureState,
    codec: u8,
    /// Chunk indices received so far, in sorted order
    seen: BTreeSet<u32>,
    last_chunk_at: Instant,
    /// Wakes the slot worker on a terminal transition
    signal: Option<Sender<TransferStatus>>,
}

struct WorkItem {
    image_id: Uuid,
    slot: usize,
    signal: Receiver<TransferStatus>,
}

/// What a slot worker does after a stall-threshold wakeup
enum Escalation {
    /// Data flowed recently; keep waiting
    Wait,
    /// Stalled: priority boosted, resume from the first missing chunk
    Resend(ImageRequestEntry),
    /// Stall outlived the hard timeout; free the slot
    ForceTimeout,
}

struct Inner {
    transport: ReliableTransport,
    config: TextureConfig,
    sink: Arc<dyn TextureSink>,
    requests: Mutex<HashMap<Uuid, TextureRequest>>,
    reassembler: Mutex<Reassembler<Uuid>>,
    /// Slot array bounding concurrency; `Some` holds the occupant
    slots: Mutex<Vec<Option<Uuid>>>,
    subscribers: Mutex<Vec<Sender<TextureEvent>>>,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded-concurrency texture download frontend for one circuit.
#[derive(Clone)]
pub struct TextureScheduler {
    inner: Arc<Inner>,
}

impl TextureScheduler {
    /// Start the scheduler: one scheduling thread plus one worker per slot.
    pub fn new(
        transport: ReliableTransport,
        config: TextureConfig,
        sink: Arc<dyn TextureSink>,
    ) -> Result<TextureScheduler, TransferError> {
        let events = transport.subscribe();
        let (work_tx, work_rx) = unbounded::<WorkItem>();

        let inner = Arc::new(Inner {
            slots: Mutex::new(vec![None; config.worker_slots]),
            transport,
            config,
            sink,
            requests: Mutex::new(HashMap::new()),
            reassembler: Mutex::new(Reassembler::new()),
            subscribers: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::new();
        for slot in 0..inner.config.worker_slots {
            let worker_inner = Arc::clone(&inner);
            let worker_rx = work_rx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("lludp-tex-{slot}"))
                    .spawn(move || worker_inner.worker_loop(worker_rx))?,
            );
        }

        let scheduler = TextureScheduler {
            inner: Arc::clone(&inner),
        };
        let sched_inner = Arc::clone(&inner);
        threads.push(
            thread::Builder::new()
                .name("lludp-tex-sched".to_string())
                .spawn(move || sched_inner.scheduler_loop(events, work_tx))?,
        );
        *inner.threads.lock() = threads;

        Ok(scheduler)
    }

    /// Subscribe to terminal texture events.
    pub fn events(&self) -> Receiver<TextureEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Queue a texture download, or update an active one.
    ///
    /// Priority zero together with discard level -1 is the cancellation
    /// sentinel: against an active request it aborts, never re-requests.
    pub fn request_texture(
        &self,
        image_id: Uuid,
        image_type: u8,
        discard_level: i8,
        priority: f32,
    ) -> Result<(), TransferError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(TransferError::Closed);
        }

        let sentinel = priority == 0.0 && discard_level == -1;
        {
            let mut requests = self.inner.requests.lock();
            match requests.entry(image_id) {
                Entry::Occupied(mut occupied) => {
                    if !sentinel {
                        let request = occupied.get_mut();
                        request.priority = priority;
                        request.discard_level = discard_level;
                        return Ok(());
                    }
                    // Sentinel against an active request: abort below, after
                    // the lock is released
                }
                Entry::Vacant(vacant) => {
                    if !sentinel {
                        vacant.insert(TextureRequest {
                            image_type,
                            discard_level,
                            priority,
                            state: TextureState::Pending,
                            codec: 0,
                            seen: BTreeSet::new(),
                            last_chunk_at: Instant::now(),
                            signal: None,
                        });
                        trace!(%image_id, priority, "texture queued");
                    }
                    return Ok(());
                }
            }
        }
        self.abort(image_id)
    }

    /// Cancel an active texture request. Tells the simulator to stop via the
    /// sentinel entry and settles the request as `Aborted`.
    pub fn abort(&self, image_id: Uuid) -> Result<(), TransferError> {
        let known = self.inner.requests.lock().contains_key(&image_id);
        if !known {
            return Err(TransferError::UnknownTransfer(image_id));
        }

        self.inner.transport.send(
            Message::RequestImage {
                requests: vec![ImageRequestEntry {
                    image_id,
                    discard_level: -1,
                    priority: 0.0,
                    starting_packet: 0,
                    image_type: 0,
                }],
            },
            true,
        )?;
        self.inner.settle(image_id, TransferStatus::Aborted);
        Ok(())
    }

    /// State of an in-flight request; `None` once it has settled (terminal
    /// requests are destroyed).
    pub fn state_of(&self, image_id: Uuid) -> Option<TextureState> {
        self.inner.requests.lock().get(&image_id).map(|r| r.state)
    }

    /// Requests currently occupying a slot
    pub fn active_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .requests
            .lock()
            .values()
            .filter(|r| r.state == TextureState::Pending)
            .count()
    }

    /// Stop all scheduler threads. In-flight requests are dropped without
    /// events.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let threads: Vec<JoinHandle<()>> = self.inner.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn scheduler_loop(
        self: Arc<Self>,
        events: Receiver<lludp_transport::InboundEvent>,
        work_tx: Sender<WorkItem>,
    ) {
        while self.running.load(Ordering::Acquire) {
            match events.recv_timeout(ADMIT_INTERVAL) {
                Ok(event) => self.handle_message(event.message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("transport channel closed, stopping texture scheduler");
                    self.running.store(false, Ordering::Release);
                    break;
                }
            }
            self.admit(&work_tx);
        }
        debug!("texture scheduler stopped");
    }

    /// Promote pending requests into free slots, highest priority first.
    fn admit(&self, work_tx: &Sender<WorkItem>) {
        loop {
            let Some(slot) = self.free_slot() else { return };

            let admitted = {
                let mut requests = self.requests.lock();
                let best = requests
                    .iter()
                    .filter(|(_, r)| r.state == TextureState::Pending)
                    .max_by(|a, b| a.1.priority.total_cmp(&b.1.priority))
                    .map(|(id, _)| *id);
                let Some(image_id) = best else { return };

                let (signal_tx, signal_rx) = bounded(1);
                // Present above; the map is still locked
                let Some(request) = requests.get_mut(&image_id) else {
                    return;
                };
                request.state = TextureState::Started;
                request.last_chunk_at = Instant::now();
                request.signal = Some(signal_tx);
                self.slots.lock()[slot] = Some(image_id);

                let entry = ImageRequestEntry {
                    image_id,
                    discard_level: request.discard_level,
                    priority: request.priority,
                    starting_packet: first_missing(&request.seen),
                    image_type: request.image_type,
                };
                (image_id, slot, signal_rx, entry)
            };

            let (image_id, slot, signal, entry) = admitted;
            debug!(%image_id, slot, "texture admitted");
            self.send_request(entry);
            if work_tx
                .send(WorkItem {
                    image_id,
                    slot,
                    signal,
                })
                .is_err()
            {
                return;
            }
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.lock().iter().position(|slot| slot.is_none())
    }

    fn send_request(&self, entry: ImageRequestEntry) {
        if let Err(e) = self
            .transport
            .send(Message::RequestImage { requests: vec![entry] }, true)
        {
            warn!("texture request send failed: {e}");
        }
    }

    fn worker_loop(self: Arc<Self>, work_rx: Receiver<WorkItem>) {
        while self.running.load(Ordering::Acquire) {
            let item = match work_rx.recv_timeout(ADMIT_INTERVAL) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.drive_slot(item);
        }
    }

    /// Block on one admitted request until it settles or times out.
    fn drive_slot(&self, item: WorkItem) {
        let status = loop {
            match item.signal.recv_timeout(self.config.stall_threshold) {
                Ok(status) => break status,
                Err(RecvTimeoutError::Disconnected) => break TransferStatus::Aborted,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::Acquire) {
                        break TransferStatus::Aborted;
                    }
                    match self.escalate(item.image_id) {
                        Escalation::Wait => {}
                        Escalation::Resend(entry) => self.send_request(entry),
                        Escalation::ForceTimeout => break TransferStatus::Timeout,
                    }
                }
            }
        };

        self.slots.lock()[item.slot] = None;
        if status == TransferStatus::Timeout {
            self.settle(item.image_id, TransferStatus::Timeout);
        }
        self.emit(TextureEvent {
            image_id: item.image_id,
            status,
        });
    }

    /// Stall handling: boost the priority and build a resume request from
    /// the first missing chunk. Forces the request out when the stall has
    /// outlived the hard timeout.
    fn escalate(&self, image_id: Uuid) -> Escalation {
        let mut requests = self.requests.lock();
        let Some(request) = requests.get_mut(&image_id) else {
            // Settled while the worker slept
            return Escalation::ForceTimeout;
        };

        let stalled_for = request.last_chunk_at.elapsed();
        if stalled_for < self.config.stall_threshold {
            // Data flowed recently; keep waiting
            return Escalation::Wait;
        }
        if stalled_for >= self.config.hard_timeout {
            return Escalation::ForceTimeout;
        }

        request.priority *= self.config.priority_boost;
        debug!(
            %image_id,
            priority = request.priority,
            resume_at = first_missing(&request.seen),
            "texture stalled, escalating"
        );
        Escalation::Resend(ImageRequestEntry {
            image_id,
            discard_level: request.discard_level,
            priority: request.priority,
            starting_packet: first_missing(&request.seen),
            image_type: request.image_type,
        })
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::ImageData {
                image_id,
                codec,
                size,
                data,
            } => self.on_chunk(image_id, 0, Some((codec, size as usize)), data),
            Message::ImagePacket {
                image_id,
                packet_index,
                data,
            } => self.on_chunk(image_id, packet_index as u32, None, data),
            Message::ImageNotInDatabase { image_id } => {
                debug!(%image_id, "texture not in database");
                self.settle(image_id, TransferStatus::NotFound);
            }
            _ => {}
        }
    }

    fn on_chunk(&self, image_id: Uuid, index: u32, header: Option<(u8, usize)>, data: Bytes) {
        {
            let mut requests = self.requests.lock();
            let Some(request) = requests.get_mut(&image_id) else {
                trace!(%image_id, "chunk for unknown texture dropped");
                return;
            };
            request.state = TextureState::Progress;
            request.last_chunk_at = Instant::now();
            request.seen.insert(index);
            if let Some((codec, _)) = header {
                request.codec = codec;
            }
        }

        let completed = {
            let mut reassembler = self.reassembler.lock();
            if let Some((_, size)) = header {
                reassembler.begin(image_id, Some(size));
            }
            match reassembler.accept(image_id, index, data, TransferStatus::Ok) {
                Accepted::Applied(done) => done,
                Accepted::Buffered | Accepted::Duplicate | Accepted::Inactive => None,
            }
        };

        if let Some(completed) = completed {
            let codec = self
                .requests
                .lock()
                .get(&image_id)
                .map(|r| r.codec)
                .unwrap_or(0);
            if completed.success {
                self.sink.store_texture(image_id, codec, &completed.data);
            }
            let status = completed.status;
            trace!(%image_id, bytes = completed.data.len(), "texture assembled");
            self.settle(image_id, status);
        }
    }

    /// Settle a request exactly once: the entry is destroyed and the
    /// terminal event carries the outcome. When a slot worker is attached,
    /// the worker frees the slot and emits the event; otherwise the event is
    /// emitted here.
    fn settle(&self, image_id: Uuid, status: TransferStatus) {
        let signal = {
            let mut requests = self.requests.lock();
            let Some(mut request) = requests.remove(&image_id) else {
                return;
            };
            request.signal.take()
        };
        self.reassembler.lock().remove(image_id);

        match signal {
            Some(signal) => {
                // Worker emits after freeing the slot
                let _ = signal.send(status);
            }
            None => self.emit(TextureEvent { image_id, status }),
        }
    }

    fn emit(&self, event: TextureEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_missing_from_sparse_set() {
        let seen: BTreeSet<u32> = [0, 1, 3, 4].into_iter().collect();
        assert_eq!(first_missing(&seen), 2);
    }

    #[test]
    fn test_first_missing_empty_and_contiguous() {
        assert_eq!(first_missing(&BTreeSet::new()), 0);
        let seen: BTreeSet<u32> = [0, 1, 2].into_iter().collect();
        assert_eq!(first_missing(&seen), 3);
        let seen: BTreeSet<u32> = [1, 2].into_iter().collect();
        assert_eq!(first_missing(&seen), 0);
    }

}
