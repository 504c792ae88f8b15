//! LLUDP CLI Library
//!
//! Shared functionality for the LLUDP command-line tools.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, TextureSection, TransportSection};
pub use stats::{display_circuit_stats, format_bytes, format_duration, format_rtt};
