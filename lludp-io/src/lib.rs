//! LLUDP I/O and Platform Abstraction
//!
//! UDP socket wrapper, monotonic timing, periodic timers, and the outgoing
//! throttle used by the transport layer.

pub mod socket;
pub mod time;

pub use socket::{SocketError, UdpEndpointSocket};
pub use time::{RateLimiter, Timer, Timestamp};
