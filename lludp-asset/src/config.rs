//! Asset-layer tunables

use std::time::Duration;

/// Transfer manager configuration
#[derive(Debug, Clone)]
pub struct AssetConfig {
    /// Payload bytes per Xfer upload chunk
    pub xfer_chunk_size: usize,
    /// Largest payload sent inline in a single upload request; anything
    /// bigger goes through the chunked Xfer upload path
    pub inline_upload_budget: usize,
    /// How long one queued upload may wait for its grant before failing
    pub upload_grant_timeout: Duration,
    /// Channel number carried by Transfer protocol messages
    pub transfer_channel: u8,
}

impl Default for AssetConfig {
    fn default() -> Self {
        AssetConfig {
            xfer_chunk_size: 1000,
            inline_upload_budget: 1024,
            upload_grant_timeout: Duration::from_secs(30),
            transfer_channel: 2,
        }
    }
}
