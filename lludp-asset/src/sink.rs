//! Cache collaborator traits
//!
//! Successfully assembled payloads are handed to a sink implementation
//! alongside the completion event. The stack itself never persists anything.

use uuid::Uuid;

/// Receives completed asset downloads
pub trait AssetSink: Send + Sync {
    /// Store one assembled asset payload, keyed by the id the download was
    /// requested under.
    fn store_asset(&self, asset_id: Uuid, asset_type: i32, data: &[u8]);
}

/// Receives completed texture downloads
pub trait TextureSink: Send + Sync {
    /// Store one assembled texture, keyed by image id and codec.
    fn store_texture(&self, image_id: Uuid, codec: u8, data: &[u8]);
}

/// Sink that drops everything; useful when only the events matter
pub struct NullSink;

impl AssetSink for NullSink {
    fn store_asset(&self, _asset_id: Uuid, _asset_type: i32, _data: &[u8]) {}
}

impl TextureSink for NullSink {
    fn store_texture(&self, _image_id: Uuid, _codec: u8, _data: &[u8]) {}
}
