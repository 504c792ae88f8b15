//! LLUDP Protocol Core
//!
//! This crate implements the wire-level pieces of the simulator UDP protocol:
//! the zero-run-length codec, the packet header with its appended-ACK trailer,
//! sequence number arithmetic, duplicate detection, pending-ACK bookkeeping,
//! and the logical message set exchanged with a simulator. No I/O lives here.

pub mod acks;
pub mod dedup;
pub mod header;
pub mod message;
pub mod sequence;
pub mod zerocode;

pub use acks::PendingAcks;
pub use dedup::InboundSequenceWindow;
pub use header::{
    append_acks, max_acks_that_fit, strip_acks, PacketHeader, FLAG_APPENDED_ACKS, FLAG_RELIABLE,
    FLAG_RESENT, FLAG_ZEROCODED, HEADER_SIZE,
};
pub use message::{ImageRequestEntry, Message, TransferSource};
pub use sequence::SeqNumber;
pub use zerocode::{zero_decode, zero_encode};

use thiserror::Error;

/// Wire-level parse and codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Zero-coded run is truncated")]
    TruncatedRun,

    #[error("Appended-ACK trailer is truncated")]
    TruncatedAckBlock,

    #[error("Unknown message discriminant: {0:#06x}")]
    UnknownMessage(u16),

    #[error("Malformed {0} message")]
    BadMessage(&'static str),
}
