//! Reliable transport over one circuit
//!
//! Owns the socket, the receive thread, and the timer thread. Everything
//! above this layer talks to the simulator exclusively through
//! [`ReliableTransport::send`] and the subscriber channels.

use crate::circuit::{Circuit, CircuitStats};
use crate::config::TransportConfig;
use crate::reliable::AwaitingAck;
use bytes::BytesMut;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use lludp_io::socket::{SocketError, UdpEndpointSocket};
use lludp_io::time::{RateLimiter, Timer};
use lludp_protocol::header::{
    append_acks, max_acks_that_fit, strip_acks, PacketHeader, FLAG_APPENDED_ACKS, FLAG_RELIABLE,
    FLAG_ZEROCODED, HEADER_SIZE,
};
use lludp_protocol::{
    zero_decode, zero_encode, CodecError, InboundSequenceWindow, Message, PendingAcks,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Granularity of the receive-loop read timeout and the timer tick
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Most ACKs a single explicit flush message carries
const MAX_ACKS_PER_FLUSH: usize = 255;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No response from simulator within the connect timeout")]
    ConnectTimeout,

    #[error("Circuit is closed")]
    Closed,

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A parsed inbound packet handed to subscribers
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sequence: u32,
    pub reliable: bool,
    pub resent: bool,
    pub message: Message,
}

struct PingState {
    next_id: u8,
    /// Ping awaiting its completion, with the send time for RTT
    outstanding: Option<(u8, Instant)>,
}

struct Inner {
    socket: UdpEndpointSocket,
    circuit: Circuit,
    config: TransportConfig,
    awaiting: AwaitingAck,
    pending_acks: Mutex<PendingAcks>,
    window: Mutex<InboundSequenceWindow>,
    subscribers: Mutex<Vec<Sender<InboundEvent>>>,
    throttle: Option<Mutex<RateLimiter>>,
    ping: Mutex<PingState>,
    running: AtomicBool,
    /// Fires once, on the first inbound datagram
    alive_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Reliable UDP transport bound to one circuit.
///
/// Cheap to clone; all clones share the circuit. The circuit stays up until
/// [`disconnect`](Self::disconnect) or a fatal socket error.
#[derive(Clone)]
pub struct ReliableTransport {
    inner: Arc<Inner>,
}

impl ReliableTransport {
    /// Open a circuit to `remote`.
    ///
    /// Starts the receive and timer threads, sends an initial reliable
    /// probe, and blocks until the first inbound packet confirms the
    /// simulator is alive, or the connect timeout elapses.
    pub fn connect(
        remote: SocketAddr,
        config: TransportConfig,
    ) -> Result<ReliableTransport, TransportError> {
        let local = if remote.is_ipv4() {
            SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), 0)
        };

        let socket = UdpEndpointSocket::connect(local, remote)?;
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let (alive_tx, alive_rx) = bounded(1);
        let throttle = config
            .throttle
            .map(|t| Mutex::new(RateLimiter::new(t.rate_bytes_per_sec, t.burst_bytes)));

        let inner = Arc::new(Inner {
            socket,
            circuit: Circuit::new(remote),
            window: Mutex::new(InboundSequenceWindow::new(config.dedup_window)),
            config,
            awaiting: AwaitingAck::new(),
            pending_acks: Mutex::new(PendingAcks::new()),
            subscribers: Mutex::new(Vec::new()),
            throttle,
            ping: Mutex::new(PingState {
                next_id: 1,
                outstanding: None,
            }),
            running: AtomicBool::new(true),
            alive_tx: Mutex::new(Some(alive_tx)),
            threads: Mutex::new(Vec::new()),
        });

        let recv_inner = Arc::clone(&inner);
        let recv_thread = thread::Builder::new()
            .name("lludp-recv".to_string())
            .spawn(move || recv_inner.receive_loop())
            .map_err(SocketError::Io)?;
        inner.threads.lock().push(recv_thread);

        let transport = ReliableTransport { inner };

        // Reliable probe; any inbound datagram confirms liveness. The timer
        // thread is not running yet, so a lost probe is retried from here at
        // resend_timeout intervals until the remote speaks.
        let probe = Message::StartPingCheck {
            ping_id: 0,
            oldest_unacked: 0,
        };
        transport.send(probe.clone(), true)?;

        let deadline = Instant::now() + transport.inner.config.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !transport.inner.running.load(Ordering::Acquire) {
                transport.inner.stop_and_join();
                return Err(TransportError::ConnectTimeout);
            }
            let slice = remaining.min(transport.inner.config.resend_timeout);
            if alive_rx.recv_timeout(slice).is_ok() {
                break;
            }
            // The first probe is tracked reliably; retries only need to
            // elicit a reply
            if let Err(e) = transport.send(probe.clone(), false) {
                debug!("probe retry not sent: {e}");
            }
        }
        info!(%remote, "circuit established");

        let timer_inner = Arc::clone(&transport.inner);
        let timer_thread = thread::Builder::new()
            .name("lludp-timer".to_string())
            .spawn(move || timer_inner.timer_loop())
            .map_err(SocketError::Io)?;
        transport.inner.threads.lock().push(timer_thread);

        Ok(transport)
    }

    /// Send a message on the circuit.
    ///
    /// Messages whose encoding exceeds the MTU budget are split into
    /// independent sub-messages when the format allows it. Reliable sends
    /// are tracked until acknowledged.
    pub fn send(&self, message: Message, reliable: bool) -> Result<(), TransportError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let max_body = self.inner.config.mtu - HEADER_SIZE;
        for part in message.split(max_body) {
            self.inner.send_message(part, reliable)?;
        }
        Ok(())
    }

    /// Register a subscriber for inbound packets.
    ///
    /// Dropped receivers are pruned on the next dispatch.
    pub fn subscribe(&self) -> Receiver<InboundEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Ask the simulator to stop pushing updates without tearing down the
    /// circuit.
    pub fn pause(&self) -> Result<(), TransportError> {
        let serial = self.inner.circuit.next_pause_serial();
        self.send(Message::AgentPause { serial }, true)
    }

    /// Resume updates after a [`pause`](Self::pause).
    pub fn resume(&self) -> Result<(), TransportError> {
        let serial = self.inner.circuit.next_pause_serial();
        self.send(Message::AgentResume { serial }, true)
    }

    /// Tear the circuit down: graceful close signal, stop threads, release
    /// the socket. Idempotent.
    pub fn disconnect(&self) {
        if !self.inner.running.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.inner.send_message(Message::CloseCircuit, false) {
            debug!("close signal not sent: {e}");
        }
        self.inner.stop_and_join();
        info!(remote = %self.inner.circuit.remote(), "circuit closed");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.circuit.remote()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn stats(&self) -> CircuitStats {
        self.inner.circuit.stats()
    }

    /// Reliable packets still awaiting acknowledgement
    pub fn unacked_count(&self) -> usize {
        self.inner.awaiting.len()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

impl Inner {
    fn send_message(&self, message: Message, reliable: bool) -> Result<(), TransportError> {
        let sequence = self.circuit.next_sequence();
        let flags = if reliable { FLAG_RELIABLE } else { 0 };

        let mut buf = BytesMut::with_capacity(self.config.mtu);
        PacketHeader::new(flags, sequence).to_bytes(&mut buf);
        buf.extend_from_slice(&message.encode());
        let mut datagram = buf.to_vec();

        // Compress the body; fall back to the uncompressed form (flag
        // cleared) when encoding would not shrink it
        if let Some(encoded) = zero_encode(&datagram) {
            datagram = encoded;
            datagram[0] |= FLAG_ZEROCODED;
        }

        // Piggyback as many pending ACKs as the MTU budget allows
        let appended = {
            let mut pending = self.pending_acks.lock();
            let budget = max_acks_that_fit(datagram.len(), self.config.mtu);
            if budget > 0 && !pending.is_empty() {
                pending.take(budget)
            } else {
                Vec::new()
            }
        };
        if !appended.is_empty() {
            append_acks(&mut datagram, &appended);
            datagram[0] |= FLAG_APPENDED_ACKS;
        }

        trace!(
            message = message.name(),
            sequence,
            reliable,
            acks = appended.len(),
            "send"
        );
        self.transmit(&datagram)?;

        {
            let mut stats = self.circuit.stats_mut();
            stats.packets_sent += 1;
            stats.bytes_sent += datagram.len() as u64;
            stats.acks_sent += appended.len() as u64;
        }

        if reliable {
            self.awaiting.record(sequence, datagram);
        }
        Ok(())
    }

    /// Put a datagram on the wire, honoring the throttle hook.
    fn transmit(&self, datagram: &[u8]) -> Result<(), TransportError> {
        if let Some(limiter) = &self.throttle {
            loop {
                let wait = {
                    let mut limiter = limiter.lock();
                    if limiter.consume(datagram.len()) {
                        break;
                    }
                    limiter.time_to_available(datagram.len())
                };
                thread::sleep(wait.min(POLL_INTERVAL));
            }
        }
        self.socket.send(datagram)?;
        Ok(())
    }

    /// Drain pending ACKs into an explicit ACK message.
    fn flush_acks(&self) {
        let acks = self.pending_acks.lock().take(MAX_ACKS_PER_FLUSH);
        if acks.is_empty() {
            return;
        }
        let count = acks.len() as u64;
        if let Err(e) = self.send_message(Message::PacketAck { acks }, false) {
            warn!("ACK flush failed: {e}");
            return;
        }
        self.circuit.stats_mut().acks_sent += count;
    }

    fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        while self.running.load(Ordering::Acquire) {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(SocketError::Timeout) => continue,
                Err(e) => {
                    error!("socket error, terminating circuit: {e}");
                    self.running.store(false, Ordering::Release);
                    break;
                }
            };

            // First inbound datagram confirms the circuit is alive
            if let Some(tx) = self.alive_tx.lock().take() {
                let _ = tx.send(());
            }

            if let Err(e) = self.handle_datagram(&buf[..len]) {
                warn!("malformed datagram dropped: {e}");
            }
        }
        debug!("receive loop stopped");
    }

    fn handle_datagram(&self, datagram: &[u8]) -> Result<(), TransportError> {
        let header = PacketHeader::from_bytes(datagram)?;

        {
            let mut stats = self.circuit.stats_mut();
            stats.packets_received += 1;
            stats.bytes_received += datagram.len() as u64;
        }

        // Zero-coding covers only the body; the appended-ACK trailer and its
        // trailing count byte stay literal, which lets us locate the body end
        // before decompressing
        let decoded;
        let data: &[u8] = if header.is_zerocoded() {
            let body_len = if header.has_appended_acks() {
                let count = *datagram.last().ok_or(CodecError::TruncatedAckBlock)? as usize;
                datagram
                    .len()
                    .checked_sub(count * 4 + 1)
                    .ok_or(CodecError::TruncatedAckBlock)?
            } else {
                datagram.len()
            };
            decoded = zero_decode(datagram, body_len)?;
            &decoded
        } else {
            datagram
        };

        let (body_region, harvested) = if header.has_appended_acks() {
            strip_acks(data)?
        } else {
            (data, Vec::new())
        };

        if !harvested.is_empty() {
            self.awaiting.acknowledge_many(&harvested);
            self.circuit.stats_mut().acks_received += harvested.len() as u64;
        }

        let body = body_region
            .get(header.body_offset()..)
            .ok_or(CodecError::InsufficientData {
                expected: header.body_offset(),
                actual: body_region.len(),
            })?;
        let message = Message::decode(body)?;
        trace!(message = message.name(), sequence = header.sequence, "recv");

        // Acknowledgement bookkeeping comes before everything else: every
        // inbound reliable sequence is queued for ACK, duplicates included.
        // A duplicate is suppressed from all further handling.
        if header.is_reliable() {
            let fresh = self.window.lock().insert(header.sequence);
            self.pending_acks.lock().push(header.sequence);
            if !fresh {
                self.circuit.stats_mut().duplicates += 1;
                self.maybe_flush_acks();
                return Ok(());
            }
        }

        // Transport-internal messages are consumed here
        match &message {
            Message::PacketAck { acks } => {
                self.awaiting.acknowledge_many(acks);
                self.circuit.stats_mut().acks_received += acks.len() as u64;
                self.maybe_flush_acks();
                return Ok(());
            }
            Message::StartPingCheck { ping_id, .. } => {
                // The reply piggybacks pending ACKs, the ping's own sequence
                // among them when the ping was reliable
                self.send_message(Message::CompletePingCheck { ping_id: *ping_id }, false)?;
                return Ok(());
            }
            Message::CompletePingCheck { ping_id } => {
                let mut ping = self.ping.lock();
                if let Some((outstanding, sent_at)) = ping.outstanding.take() {
                    if outstanding == *ping_id {
                        let rtt = sent_at.elapsed();
                        self.circuit.stats_mut().last_ping_rtt = Some(rtt);
                        trace!(?rtt, "ping completed");
                    }
                }
                self.maybe_flush_acks();
                return Ok(());
            }
            _ => {}
        }

        let event = InboundEvent {
            sequence: header.sequence,
            reliable: header.is_reliable(),
            resent: header.is_resent(),
            message,
        };
        let close = matches!(event.message, Message::CloseCircuit);

        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }

        if close {
            info!("remote closed the circuit");
            self.running.store(false, Ordering::Release);
        }

        self.maybe_flush_acks();
        Ok(())
    }

    fn maybe_flush_acks(&self) {
        let due = self.pending_acks.lock().len() >= self.config.ack_batch_threshold;
        if due {
            self.flush_acks();
        }
    }

    fn timer_loop(self: Arc<Self>) {
        let mut resend_timer = Timer::new(self.config.resend_interval);
        let mut ping_timer = Timer::new(self.config.ping_interval);
        let mut stats_timer = Timer::new(self.config.stats_interval);

        while self.running.load(Ordering::Acquire) {
            thread::sleep(POLL_INTERVAL);

            if resend_timer.try_fire() {
                self.flush_acks();
                self.resend_pass();
            }

            if ping_timer.try_fire() {
                self.send_ping();
            }

            if stats_timer.try_fire() {
                debug!(stats = ?self.circuit.stats(), "circuit statistics");
            }
        }
        debug!("timer loop stopped");
    }

    fn resend_pass(&self) {
        let (resend, dropped) = self
            .awaiting
            .collect_due(self.config.resend_timeout, self.config.max_resends);

        for packet in &resend {
            debug!(
                sequence = packet.sequence,
                attempt = packet.resend_count,
                "resending reliable packet"
            );
            if let Err(e) = self.transmit(&packet.bytes) {
                warn!(sequence = packet.sequence, "resend failed: {e}");
            }
        }

        if !resend.is_empty() || dropped > 0 {
            let mut stats = self.circuit.stats_mut();
            stats.resends += resend.len() as u64;
            stats.packets_lost += dropped as u64;
        }
        if dropped > 0 {
            warn!(count = dropped, "reliable packets dropped after max resends");
        }
    }

    fn send_ping(&self) {
        let ping_id = {
            let mut ping = self.ping.lock();
            let id = ping.next_id;
            ping.next_id = ping.next_id.wrapping_add(1);
            ping.outstanding = Some((id, Instant::now()));
            id
        };
        let oldest_unacked = self
            .awaiting
            .oldest_unacked()
            .unwrap_or_else(|| self.circuit.current_sequence());

        if let Err(e) = self.send_message(
            Message::StartPingCheck {
                ping_id,
                oldest_unacked,
            },
            false,
        ) {
            warn!("ping failed: {e}");
        }
    }

    /// Stop both threads and wait for them. Safe to call more than once.
    fn stop_and_join(&self) {
        self.running.store(false, Ordering::Release);
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_when_unreachable() {
        // Nothing answers on this socket; connect must fail within the
        // configured timeout rather than hang
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let remote = silent.local_addr().unwrap();

        let config = TransportConfig {
            connect_timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        };

        let started = Instant::now();
        let result = ReliableTransport::connect(remote, config);
        assert!(matches!(result, Err(TransportError::ConnectTimeout)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
