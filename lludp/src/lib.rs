//! LLUDP - Virtual World Simulator Transport
//!
//! High-level Rust API for the simulator UDP protocol: reliable circuits,
//! asset transfers, and texture download scheduling.

pub use lludp_asset as asset;
pub use lludp_io as io;
pub use lludp_protocol as protocol;
pub use lludp_transport as transport;

// Re-export commonly used types
pub use asset::{
    AssetConfig, AssetRequestParams, AssetSink, TextureConfig, TextureScheduler, TextureSink,
    TransferEvent, TransferManager, TransferStatus,
};
pub use protocol::{Message, SeqNumber};
pub use transport::{InboundEvent, ReliableTransport, TransportConfig};
