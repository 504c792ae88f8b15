//! Shared test plumbing: a scriptable fake simulator endpoint
//!
//! Runs a plain UDP socket the stack can connect to, with helpers to decode
//! whatever the client sends (zero-coding and appended ACKs included) and to
//! inject wire traffic back.
#![allow(dead_code)]

use bytes::BytesMut;
use lludp_protocol::header::{strip_acks, PacketHeader};
use lludp_protocol::{zero_decode, Message};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// One datagram from the client, fully decoded
#[derive(Debug)]
pub struct ClientPacket {
    pub header: PacketHeader,
    pub message: Message,
    pub acks: Vec<u32>,
}

pub struct FakeSimulator {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    next_seq: u32,
    /// Acknowledge every reliable client packet automatically
    pub auto_ack: bool,
    /// Answer client pings automatically
    pub auto_pong: bool,
}

impl FakeSimulator {
    pub fn start() -> FakeSimulator {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake simulator");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("set read timeout");
        FakeSimulator {
            socket,
            peer: None,
            next_seq: 1,
            auto_ack: true,
            auto_pong: true,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("local addr")
    }

    /// Decode a raw client datagram, undoing zero-coding and splitting off
    /// the appended-ACK trailer.
    pub fn decode_datagram(buf: &[u8]) -> ClientPacket {
        let header = PacketHeader::from_bytes(buf).expect("parse header");
        let data = if header.is_zerocoded() {
            let body_len = if header.has_appended_acks() {
                let count = *buf.last().expect("nonempty datagram") as usize;
                buf.len() - (count * 4 + 1)
            } else {
                buf.len()
            };
            zero_decode(buf, body_len).expect("zero decode")
        } else {
            buf.to_vec()
        };
        let (body_region, acks) = if header.has_appended_acks() {
            strip_acks(&data).expect("strip acks")
        } else {
            (&data[..], Vec::new())
        };
        let message =
            Message::decode(&body_region[header.body_offset()..]).expect("decode message");
        ClientPacket {
            header,
            message,
            acks,
        }
    }

    /// Receive and decode the next client datagram, applying the automatic
    /// ACK/pong replies. Returns `None` when the timeout passes quietly.
    pub fn recv_packet(&mut self, timeout: Duration) -> Option<ClientPacket> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    self.peer = Some(from);
                    let packet = Self::decode_datagram(&buf[..len]);
                    if self.auto_ack && packet.header.is_reliable() {
                        self.send(
                            0,
                            &Message::PacketAck {
                                acks: vec![packet.header.sequence],
                            },
                        );
                    }
                    if self.auto_pong {
                        if let Message::StartPingCheck { ping_id, .. } = packet.message {
                            self.send(0, &Message::CompletePingCheck { ping_id });
                        }
                    }
                    return Some(packet);
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                }
            }
        }
    }

    /// Receive packets until one satisfies the predicate.
    pub fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Option<ClientPacket>
    where
        F: FnMut(&ClientPacket) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if let Some(packet) = self.recv_packet(remaining) {
                if pred(&packet) {
                    return Some(packet);
                }
            }
        }
    }

    /// Send a message with a fresh sequence number. `flags` is OR-ed onto
    /// the header; pass `FLAG_RELIABLE` for reliable traffic.
    pub fn send(&mut self, flags: u8, message: &Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.send_with_seq(flags, seq, message);
    }

    /// Send a message under an explicit sequence number, e.g. to fake a
    /// duplicate delivery.
    pub fn send_with_seq(&mut self, flags: u8, seq: u32, message: &Message) {
        let peer = self.peer.expect("no client yet");
        let mut buf = BytesMut::new();
        PacketHeader::new(flags, seq).to_bytes(&mut buf);
        buf.extend_from_slice(&message.encode());
        self.socket.send_to(&buf, peer).expect("send to client");
    }

    /// Sequence number the next `send` will use.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }
}
