//! LLUDP Asset Layer
//!
//! The two asset transfer protocols (legacy Xfer byte streams and the
//! transaction-keyed Transfer protocol), asset upload, and the bounded
//! texture download scheduler. Everything here runs on top of a
//! [`ReliableTransport`](lludp_transport::ReliableTransport) handle and
//! reports terminal outcomes exactly once over channel fan-out.

pub mod config;
pub mod download;
pub mod manager;
pub mod reassembly;
pub mod sink;
pub mod status;
pub mod texture;
pub mod upload;
pub mod xfer;

pub use config::AssetConfig;
pub use download::AssetRequestParams;
pub use manager::{TransferEvent, TransferManager};
pub use reassembly::{Accepted, Completed, Reassembler};
pub use sink::{AssetSink, TextureSink};
pub use status::TransferStatus;
pub use texture::{TextureConfig, TextureEvent, TextureScheduler, TextureState};

use lludp_transport::TransportError;
use thiserror::Error;
use uuid::Uuid;

/// Asset-layer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timed out waiting for the upload grant")]
    GrantTimeout,

    #[error("Transfer {0} is not active")]
    UnknownTransfer(Uuid),

    #[error("Manager is shut down")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
