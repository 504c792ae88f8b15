//! Transfer manager
//!
//! Drives both asset protocols over one circuit: Xfer byte streams (download
//! and grant-gated upload) and transaction-keyed Transfer downloads, plus
//! asset upload. A pump thread consumes the transport's subscriber channel;
//! terminal outcomes fan out on event channels, exactly once per transfer.

use crate::config::AssetConfig;
use crate::download::AssetRequestParams;
use crate::reassembly::{Accepted, Reassembler};
use crate::sink::AssetSink;
use crate::status::TransferStatus;
use crate::upload::{UploadQueue, UploadStream};
use crate::xfer::{xfer_id_for_transaction, XferChunkOutcome, XferDownloads};
use crate::TransferError;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use lludp_protocol::Message;
use lludp_transport::ReliableTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// How often the pump thread runs its housekeeping tick
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal outcome of one transfer
#[derive(Debug, Clone)]
pub enum TransferEvent {
    XferDownloadDone {
        xfer_id: u64,
        status: TransferStatus,
        data: Vec<u8>,
    },
    XferUploadDone {
        transaction_id: Uuid,
        status: TransferStatus,
    },
    AssetDownloadDone {
        transaction_id: Uuid,
        status: TransferStatus,
        data: Vec<u8>,
    },
    /// The simulator acknowledged an asset upload
    AssetUploadAcked {
        asset_id: Uuid,
        asset_type: i8,
        status: TransferStatus,
    },
}

struct TransferMeta {
    asset_key: Uuid,
    asset_type: i32,
    /// Chunks that raced ahead of their info header
    early: Vec<(u32, TransferStatus, Bytes)>,
    declared: bool,
}

/// Transfer-protocol downloads keyed by transaction id
#[derive(Default)]
struct TransferDownloads {
    reassembler: Reassembler<Uuid>,
    meta: HashMap<Uuid, TransferMeta>,
}

struct Inner {
    transport: ReliableTransport,
    config: AssetConfig,
    sink: Arc<dyn AssetSink>,
    xfer_downloads: Mutex<XferDownloads>,
    uploads: Mutex<UploadQueue>,
    transfers: Mutex<TransferDownloads>,
    subscribers: Mutex<Vec<Sender<TransferEvent>>>,
    running: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Asset transfer frontend for one circuit.
///
/// Cheap to clone; all clones share the underlying state.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<Inner>,
}

impl TransferManager {
    /// Start a manager on an established circuit. Spawns the pump thread.
    pub fn new(
        transport: ReliableTransport,
        config: AssetConfig,
        sink: Arc<dyn AssetSink>,
    ) -> Result<TransferManager, TransferError> {
        let events = transport.subscribe();
        let inner = Arc::new(Inner {
            transport,
            config,
            sink,
            xfer_downloads: Mutex::new(XferDownloads::new()),
            uploads: Mutex::new(UploadQueue::new()),
            transfers: Mutex::new(TransferDownloads::default()),
            subscribers: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            pump: Mutex::new(None),
        });

        let pump_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("lludp-asset".to_string())
            .spawn(move || pump_inner.pump_loop(events))?;
        *inner.pump.lock() = Some(handle);

        Ok(TransferManager { inner })
    }

    /// Subscribe to terminal transfer events.
    pub fn events(&self) -> Receiver<TransferEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Start an Xfer download of a simulator-side file. The returned xfer id
    /// keys the eventual [`TransferEvent::XferDownloadDone`].
    pub fn request_xfer(
        &self,
        filename: &str,
        file_path: u8,
        vfile_id: Uuid,
        vfile_type: i16,
        delete_on_completion: bool,
        use_big_packets: bool,
    ) -> Result<u64, TransferError> {
        self.check_running()?;
        let xfer_id = xfer_id_for_transaction(Uuid::new_v4());
        self.inner.xfer_downloads.lock().begin(xfer_id);

        debug!(xfer_id, filename, "requesting xfer download");
        self.inner.transport.send(
            Message::RequestXfer {
                xfer_id,
                filename: filename.to_string(),
                file_path,
                delete_on_completion,
                use_big_packets,
                vfile_id,
                vfile_type,
            },
            true,
        )?;
        Ok(xfer_id)
    }

    /// Start a Transfer download. The returned transaction id keys the
    /// eventual [`TransferEvent::AssetDownloadDone`].
    pub fn request_asset(
        &self,
        params: AssetRequestParams,
        priority: f32,
    ) -> Result<Uuid, TransferError> {
        self.check_running()?;
        let transaction_id = Uuid::new_v4();
        {
            let mut transfers = self.inner.transfers.lock();
            transfers.meta.insert(
                transaction_id,
                TransferMeta {
                    asset_key: params.asset_key(),
                    asset_type: params.asset_type(),
                    early: Vec::new(),
                    declared: false,
                },
            );
        }

        debug!(%transaction_id, source = ?params.source(), "requesting asset download");
        self.inner.transport.send(
            Message::TransferRequest {
                transaction_id,
                channel: self.inner.config.transfer_channel,
                source: params.source(),
                priority,
                params: params.encode(),
            },
            true,
        )?;
        Ok(transaction_id)
    }

    /// Cancel an active Transfer download. Emits a terminal `Aborted` event
    /// and tells the simulator to stop sending.
    pub fn abort(&self, transaction_id: Uuid) -> Result<(), TransferError> {
        self.check_running()?;
        {
            let mut transfers = self.inner.transfers.lock();
            if transfers.meta.remove(&transaction_id).is_none() {
                return Err(TransferError::UnknownTransfer(transaction_id));
            }
            transfers.reassembler.remove(transaction_id);
        }

        self.inner.transport.send(
            Message::TransferAbort {
                transaction_id,
                channel: self.inner.config.transfer_channel,
            },
            true,
        )?;
        self.inner.emit(TransferEvent::AssetDownloadDone {
            transaction_id,
            status: TransferStatus::Aborted,
            data: Vec::new(),
        });
        Ok(())
    }

    /// Upload a new asset. Small payloads travel inline in the request;
    /// larger ones wait for the simulator's Xfer grant and stream chunked.
    pub fn upload_asset(
        &self,
        asset_type: i8,
        temp_file: bool,
        store_local: bool,
        data: Vec<u8>,
    ) -> Result<Uuid, TransferError> {
        self.check_running()?;
        let transaction_id = Uuid::new_v4();
        let inline = data.len() <= self.inner.config.inline_upload_budget;

        debug!(
            %transaction_id,
            bytes = data.len(),
            inline,
            "starting asset upload"
        );
        if inline {
            self.inner.transport.send(
                Message::AssetUploadRequest {
                    transaction_id,
                    asset_type,
                    temp_file,
                    store_local,
                    data: Bytes::from(data),
                },
                true,
            )?;
            return Ok(transaction_id);
        }

        // Chunked path: announce with an empty payload, then wait for the
        // grant naming our transaction
        self.inner.transport.send(
            Message::AssetUploadRequest {
                transaction_id,
                asset_type,
                temp_file,
                store_local,
                data: Bytes::new(),
            },
            true,
        )?;
        let stream = UploadStream::new(
            transaction_id,
            asset_type,
            data,
            self.inner.config.xfer_chunk_size,
        );
        self.inner.uploads.lock().enqueue(stream);
        Ok(transaction_id)
    }

    /// Stop the pump thread. Active transfers are dropped without events.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.pump.lock().take() {
            let _ = handle.join();
        }
    }

    fn check_running(&self) -> Result<(), TransferError> {
        if self.inner.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransferError::Closed)
        }
    }
}

impl Inner {
    fn pump_loop(self: Arc<Self>, events: Receiver<lludp_transport::InboundEvent>) {
        while self.running.load(Ordering::Acquire) {
            match events.recv_timeout(PUMP_INTERVAL) {
                Ok(event) => self.handle_message(event.message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("transport channel closed, stopping asset pump");
                    self.running.store(false, Ordering::Release);
                    break;
                }
            }
            self.tick();
        }
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::SendXferPacket {
                xfer_id,
                packet_index,
                data,
            } => self.on_xfer_packet(xfer_id, packet_index, data),
            Message::ConfirmXferPacket {
                xfer_id,
                packet_index,
            } => self.on_xfer_confirm(xfer_id, packet_index),
            Message::RequestXfer {
                xfer_id, vfile_id, ..
            } => self.on_upload_grant(vfile_id, xfer_id),
            Message::AbortXfer { xfer_id, .. } => self.on_xfer_abort(xfer_id),
            Message::TransferInfo {
                transaction_id,
                status,
                size,
                ..
            } => self.on_transfer_info(transaction_id, status, size),
            Message::TransferPacket {
                transaction_id,
                packet_index,
                status,
                data,
                ..
            } => self.on_transfer_packet(transaction_id, packet_index, status, data),
            Message::AssetUploadComplete {
                asset_id,
                asset_type,
                success,
            } => {
                let status = if success {
                    TransferStatus::Done
                } else {
                    TransferStatus::Error
                };
                self.emit(TransferEvent::AssetUploadAcked {
                    asset_id,
                    asset_type,
                    status,
                });
            }
            // Texture traffic and transport control belong to other layers
            _ => {}
        }
    }

    fn on_xfer_packet(&self, xfer_id: u64, packet_index: u32, data: Bytes) {
        let outcome = self
            .xfer_downloads
            .lock()
            .accept_packet(xfer_id, packet_index, data);
        match outcome {
            XferChunkOutcome::Confirm(index) => self.confirm_xfer(xfer_id, index),
            XferChunkOutcome::Finished(index, completed) => {
                self.confirm_xfer(xfer_id, index);
                self.emit(TransferEvent::XferDownloadDone {
                    xfer_id,
                    status: completed.status,
                    data: completed.data,
                });
            }
            XferChunkOutcome::ReConfirm(Some(index)) => self.confirm_xfer(xfer_id, index),
            XferChunkOutcome::ReConfirm(None) => {}
            XferChunkOutcome::Unknown => {
                trace!(xfer_id, "chunk for unknown xfer dropped");
            }
        }
    }

    fn confirm_xfer(&self, xfer_id: u64, packet_index: u32) {
        if let Err(e) = self.transport.send(
            Message::ConfirmXferPacket {
                xfer_id,
                packet_index,
            },
            false,
        ) {
            warn!(xfer_id, "xfer confirm failed: {e}");
        }
    }

    fn on_xfer_confirm(&self, xfer_id: u64, packet_index: u32) {
        let next = {
            let mut uploads = self.uploads.lock();
            let Some(stream) = uploads.active_mut(xfer_id) else {
                trace!(xfer_id, "confirm for unknown upload");
                return;
            };
            // Only the confirm for the chunk just sent advances the stream;
            // duplicate confirms are ignored
            if stream.last_sent() != Some(packet_index) {
                return;
            }
            match stream.next_packet(xfer_id) {
                Some(message) => Some(message),
                None => {
                    let finished = uploads.finish(xfer_id);
                    if let Some(stream) = finished {
                        self.emit(TransferEvent::XferUploadDone {
                            transaction_id: stream.transaction_id,
                            status: TransferStatus::Done,
                        });
                    }
                    None
                }
            }
        };
        if let Some(message) = next {
            if let Err(e) = self.transport.send(message, true) {
                warn!(xfer_id, "upload chunk send failed: {e}");
            }
        }
    }

    fn on_upload_grant(&self, vfile_id: Uuid, xfer_id: u64) {
        let first = {
            let mut uploads = self.uploads.lock();
            match uploads.grant(vfile_id, xfer_id) {
                Some(stream) => stream.next_packet(xfer_id),
                None => {
                    debug!(%vfile_id, "grant does not match the awaiting upload");
                    None
                }
            }
        };
        if let Some(message) = first {
            debug!(xfer_id, "upload granted, streaming");
            if let Err(e) = self.transport.send(message, true) {
                warn!(xfer_id, "first upload chunk send failed: {e}");
            }
        }
    }

    fn on_xfer_abort(&self, xfer_id: u64) {
        if self.xfer_downloads.lock().abort(xfer_id) {
            self.emit(TransferEvent::XferDownloadDone {
                xfer_id,
                status: TransferStatus::Aborted,
                data: Vec::new(),
            });
            return;
        }
        let aborted = self.uploads.lock().finish(xfer_id);
        if let Some(stream) = aborted {
            self.emit(TransferEvent::XferUploadDone {
                transaction_id: stream.transaction_id,
                status: TransferStatus::Aborted,
            });
        }
    }

    fn on_transfer_info(&self, transaction_id: Uuid, status_code: i32, size: u32) {
        let status = TransferStatus::from_code(status_code);
        let mut guard = self.transfers.lock();
        let transfers: &mut TransferDownloads = &mut guard;
        let Some(meta) = transfers.meta.get_mut(&transaction_id) else {
            trace!(%transaction_id, "info for unknown transfer");
            return;
        };

        if status == TransferStatus::Queued {
            trace!(%transaction_id, "transfer queued by simulator");
            return;
        }
        if status != TransferStatus::Ok {
            // Failure in the header: terminal, no payload applied
            transfers.meta.remove(&transaction_id);
            transfers.reassembler.remove(transaction_id);
            drop(guard);
            self.emit(TransferEvent::AssetDownloadDone {
                transaction_id,
                status,
                data: Vec::new(),
            });
            return;
        }

        meta.declared = true;
        let early = std::mem::take(&mut meta.early);
        transfers
            .reassembler
            .begin(transaction_id, Some(size as usize));
        drop(guard);

        trace!(%transaction_id, size, replayed = early.len(), "transfer declared");
        for (index, status, data) in early {
            self.feed_transfer_chunk(transaction_id, index, status, data);
        }
    }

    fn on_transfer_packet(
        &self,
        transaction_id: Uuid,
        packet_index: u32,
        status_code: i32,
        data: Bytes,
    ) {
        let status = TransferStatus::from_code(status_code);
        {
            let mut transfers = self.transfers.lock();
            let Some(meta) = transfers.meta.get_mut(&transaction_id) else {
                trace!(%transaction_id, "chunk for unknown transfer dropped");
                return;
            };
            if !meta.declared {
                // Raced ahead of the info header; replayed once it arrives
                meta.early.push((packet_index, status, data));
                return;
            }
        }
        self.feed_transfer_chunk(transaction_id, packet_index, status, data);
    }

    fn feed_transfer_chunk(
        &self,
        transaction_id: Uuid,
        packet_index: u32,
        status: TransferStatus,
        data: Bytes,
    ) {
        let completed = {
            let mut transfers = self.transfers.lock();
            match transfers
                .reassembler
                .accept(transaction_id, packet_index, data, status)
            {
                Accepted::Applied(Some(completed)) => {
                    transfers.meta.remove(&transaction_id).map(|m| (m, completed))
                }
                Accepted::Applied(None) | Accepted::Buffered => None,
                Accepted::Duplicate => {
                    trace!(%transaction_id, packet_index, "duplicate transfer chunk");
                    None
                }
                Accepted::Inactive => None,
            }
        };

        if let Some((meta, completed)) = completed {
            if completed.success {
                self.sink
                    .store_asset(meta.asset_key, meta.asset_type, &completed.data);
            }
            self.emit(TransferEvent::AssetDownloadDone {
                transaction_id,
                status: completed.status,
                data: completed.data,
            });
        }
    }

    /// Housekeeping: fail uploads whose grant never arrived.
    fn tick(&self) {
        let expired = self.uploads.lock().expire(self.config.upload_grant_timeout);
        if let Some(stream) = expired {
            self.emit(TransferEvent::XferUploadDone {
                transaction_id: stream.transaction_id,
                status: TransferStatus::Timeout,
            });
        }
    }

    fn emit(&self, event: TransferEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
