//! LLUDP Reliable Transport
//!
//! Turns an unreliable datagram socket into an ordered, acknowledged,
//! resendable channel to one simulator endpoint (a "circuit"): sequence
//! numbering, duplicate suppression, ACK piggybacking, bounded-retry
//! retransmission, and liveness pings.

pub mod circuit;
pub mod config;
pub mod reliable;
pub mod transport;

pub use circuit::{Circuit, CircuitStats};
pub use config::{ThrottleConfig, TransportConfig};
pub use reliable::{AwaitingAck, OutgoingPacket};
pub use transport::{InboundEvent, ReliableTransport, TransportError};
