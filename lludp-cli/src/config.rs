//! Configuration file support for the LLUDP CLI tools

use lludp_asset::TextureConfig;
use lludp_transport::{ThrottleConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Transport tuning section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Maximum datagram size
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Resend timeout in milliseconds
    #[serde(default = "default_resend_timeout")]
    pub resend_timeout_ms: u64,
    /// Resend attempts before a reliable packet is dropped
    #[serde(default = "default_max_resends")]
    pub max_resends: u32,
    /// Pending-ACK count that triggers a flush
    #[serde(default = "default_ack_batch")]
    pub ack_batch_threshold: usize,
    /// Liveness ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Outgoing throttle in bytes per second; omit to disable
    pub throttle_bytes_per_sec: Option<u64>,
}

fn default_mtu() -> usize {
    1200
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_resend_timeout() -> u64 {
    3000
}

fn default_max_resends() -> u32 {
    3
}

fn default_ack_batch() -> usize {
    10
}

fn default_ping_interval() -> u64 {
    5
}

impl Default for TransportSection {
    fn default() -> Self {
        TransportSection {
            mtu: default_mtu(),
            connect_timeout_secs: default_connect_timeout(),
            resend_timeout_ms: default_resend_timeout(),
            max_resends: default_max_resends(),
            ack_batch_threshold: default_ack_batch(),
            ping_interval_secs: default_ping_interval(),
            throttle_bytes_per_sec: None,
        }
    }
}

impl TransportSection {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            mtu: self.mtu,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            resend_timeout: Duration::from_millis(self.resend_timeout_ms),
            max_resends: self.max_resends,
            ack_batch_threshold: self.ack_batch_threshold,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            throttle: self.throttle_bytes_per_sec.map(|rate| ThrottleConfig {
                rate_bytes_per_sec: rate,
                burst_bytes: rate / 4,
            }),
            ..TransportConfig::default()
        }
    }
}

/// Texture scheduler tuning section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureSection {
    /// Concurrent download slots
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,
    /// Stall threshold in seconds
    #[serde(default = "default_stall_secs")]
    pub stall_secs: u64,
    /// Hard timeout in seconds
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,
    /// Priority multiplier applied on stall
    #[serde(default = "default_priority_boost")]
    pub priority_boost: f32,
}

fn default_worker_slots() -> usize {
    4
}

fn default_stall_secs() -> u64 {
    5
}

fn default_hard_timeout_secs() -> u64 {
    30
}

fn default_priority_boost() -> f32 {
    1.5
}

impl Default for TextureSection {
    fn default() -> Self {
        TextureSection {
            worker_slots: default_worker_slots(),
            stall_secs: default_stall_secs(),
            hard_timeout_secs: default_hard_timeout_secs(),
            priority_boost: default_priority_boost(),
        }
    }
}

impl TextureSection {
    pub fn to_texture_config(&self) -> TextureConfig {
        TextureConfig {
            worker_slots: self.worker_slots,
            stall_threshold: Duration::from_secs(self.stall_secs),
            hard_timeout: Duration::from_secs(self.hard_timeout_secs),
            priority_boost: self.priority_boost,
        }
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub texture: TextureSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transport.mtu, 1200);
        assert_eq!(parsed.texture.worker_slots, 4);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("[transport]\nmtu = 1400\n").unwrap();
        assert_eq!(parsed.transport.mtu, 1400);
        assert_eq!(parsed.transport.max_resends, 3);
        assert_eq!(parsed.texture.stall_secs, 5);
    }
}
