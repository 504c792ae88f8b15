//! Packet header and appended-ACK trailer
//!
//! Every datagram starts with a 6-byte header: one flag byte, a big-endian
//! 32-bit sequence number, and a count of extra header bytes (usually zero).
//! When the appended-ACKs flag is set, the datagram ends with K big-endian
//! 32-bit ACK sequence numbers followed by a single count byte K.

use crate::CodecError;
use bytes::{Buf, BufMut, BytesMut};

/// Body is zero-run-length compressed
pub const FLAG_ZEROCODED: u8 = 0x80;
/// Sender expects an acknowledgement
pub const FLAG_RELIABLE: u8 = 0x40;
/// Retransmission of a previously sent sequence number
pub const FLAG_RESENT: u8 = 0x20;
/// ACK trailer appended after the body
pub const FLAG_APPENDED_ACKS: u8 = 0x10;

/// Size of the fixed header portion in bytes
pub const HEADER_SIZE: usize = 6;

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Flag bits (zero-coded, reliable, resent, appended-acks)
    pub flags: u8,
    /// Sequence number
    pub sequence: u32,
    /// Count of extra header bytes following byte 5
    pub extra: u8,
}

impl PacketHeader {
    pub fn new(flags: u8, sequence: u32) -> Self {
        PacketHeader {
            flags,
            sequence,
            extra: 0,
        }
    }

    /// Parse the fixed header from the front of a datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let flags = buf.get_u8();
        let sequence = buf.get_u32();
        let extra = buf.get_u8();

        Ok(PacketHeader {
            flags,
            sequence,
            extra,
        })
    }

    /// Serialize the header (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u32(self.sequence);
        buf.put_u8(self.extra);
    }

    /// Offset of the body within the datagram
    #[inline]
    pub fn body_offset(&self) -> usize {
        HEADER_SIZE + self.extra as usize
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.flags & FLAG_RELIABLE != 0
    }

    #[inline]
    pub fn is_resent(&self) -> bool {
        self.flags & FLAG_RESENT != 0
    }

    #[inline]
    pub fn is_zerocoded(&self) -> bool {
        self.flags & FLAG_ZEROCODED != 0
    }

    #[inline]
    pub fn has_appended_acks(&self) -> bool {
        self.flags & FLAG_APPENDED_ACKS != 0
    }
}

/// How many ACK numbers fit in the remaining MTU budget.
///
/// The trailer needs 4 bytes per ACK plus one trailing count byte, and the
/// count byte caps the block at 255 entries.
pub fn max_acks_that_fit(datagram_len: usize, mtu: usize) -> usize {
    let budget = mtu.saturating_sub(datagram_len);
    if budget < 5 {
        return 0;
    }
    ((budget - 1) / 4).min(255)
}

/// Append an ACK trailer to a serialized datagram.
///
/// The caller is responsible for setting [`FLAG_APPENDED_ACKS`] on byte 0.
pub fn append_acks(buf: &mut Vec<u8>, acks: &[u32]) {
    debug_assert!(!acks.is_empty() && acks.len() <= 255);
    for ack in acks {
        buf.extend_from_slice(&ack.to_be_bytes());
    }
    buf.push(acks.len() as u8);
}

/// Split a datagram into its body region and the appended ACK numbers.
///
/// Only valid when [`FLAG_APPENDED_ACKS`] is set. The returned slice excludes
/// the trailer.
pub fn strip_acks(datagram: &[u8]) -> Result<(&[u8], Vec<u32>), CodecError> {
    let count = *datagram.last().ok_or(CodecError::TruncatedAckBlock)? as usize;
    let trailer = count * 4 + 1;
    if datagram.len() < HEADER_SIZE + trailer {
        return Err(CodecError::TruncatedAckBlock);
    }

    let body_end = datagram.len() - trailer;
    let mut acks = Vec::with_capacity(count);
    let mut buf = &datagram[body_end..datagram.len() - 1];
    for _ in 0..count {
        acks.push(buf.get_u32());
    }

    Ok((&datagram[..body_end], acks))
}
