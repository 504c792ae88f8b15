//! Transport tunables
//!
//! Everything timing- or size-related is configuration, not hard-coded: MTU,
//! resend policy, ACK batching, liveness timing, and the optional outgoing
//! throttle.

use std::time::Duration;

/// Outgoing throttle parameters (token bucket)
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Sustained rate in bytes per second
    pub rate_bytes_per_sec: u64,
    /// Burst allowance in bytes
    pub burst_bytes: u64,
}

/// Reliable transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum datagram size including header and ACK trailer
    pub mtu: usize,
    /// How long `connect` waits for the first inbound packet
    pub connect_timeout: Duration,
    /// Interval of the ack-flush/resend tick
    pub resend_interval: Duration,
    /// Age after which an unacknowledged reliable packet is resent
    pub resend_timeout: Duration,
    /// Resend attempts before a reliable packet is dropped as lost
    pub max_resends: u32,
    /// Pending-ACK count that triggers a proactive flush
    pub ack_batch_threshold: usize,
    /// Liveness ping interval
    pub ping_interval: Duration,
    /// Interval of the statistics log line
    pub stats_interval: Duration,
    /// Capacity of the inbound duplicate-detection window
    pub dedup_window: usize,
    /// OS receive buffer size override
    pub recv_buffer_size: Option<usize>,
    /// Outgoing throttle; `None` disables pacing
    pub throttle: Option<ThrottleConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: 1200,
            connect_timeout: Duration::from_secs(10),
            resend_interval: Duration::from_millis(500),
            resend_timeout: Duration::from_secs(3),
            max_resends: 3,
            ack_batch_threshold: 10,
            ping_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(60),
            dedup_window: 256,
            recv_buffer_size: None,
            throttle: None,
        }
    }
}
