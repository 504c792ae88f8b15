//! Transfer download requests
//!
//! A Transfer download names its payload through a source-specific parameter
//! blob: a bare asset id, an inventory item with its ownership context, or an
//! estate-scoped lookup. The blob layout is fixed per source; the transport
//! treats it as opaque bytes.

use bytes::{BufMut, Bytes, BytesMut};
use lludp_protocol::TransferSource;
use uuid::Uuid;

/// What to download and where it lives
#[derive(Debug, Clone)]
pub enum AssetRequestParams {
    /// Plain asset lookup
    Asset { asset_id: Uuid, asset_type: i32 },
    /// Asset behind a simulator-side inventory item
    InventoryItem {
        agent_id: Uuid,
        session_id: Uuid,
        owner_id: Uuid,
        task_id: Uuid,
        item_id: Uuid,
        asset_type: i32,
    },
    /// Estate-scoped asset, e.g. the covenant
    Estate {
        agent_id: Uuid,
        session_id: Uuid,
        estate_asset_kind: i32,
    },
}

impl AssetRequestParams {
    pub fn source(&self) -> TransferSource {
        match self {
            AssetRequestParams::Asset { .. } => TransferSource::Asset,
            AssetRequestParams::InventoryItem { .. } => TransferSource::SimInventoryItem,
            AssetRequestParams::Estate { .. } => TransferSource::SimEstate,
        }
    }

    /// Id the assembled payload is stored under
    pub fn asset_key(&self) -> Uuid {
        match self {
            AssetRequestParams::Asset { asset_id, .. } => *asset_id,
            AssetRequestParams::InventoryItem { item_id, .. } => *item_id,
            AssetRequestParams::Estate { agent_id, .. } => *agent_id,
        }
    }

    pub fn asset_type(&self) -> i32 {
        match self {
            AssetRequestParams::Asset { asset_type, .. } => *asset_type,
            AssetRequestParams::InventoryItem { asset_type, .. } => *asset_type,
            AssetRequestParams::Estate {
                estate_asset_kind, ..
            } => *estate_asset_kind,
        }
    }

    /// Serialize the source-specific parameter blob.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(96);
        match self {
            AssetRequestParams::Asset {
                asset_id,
                asset_type,
            } => {
                buf.put_slice(asset_id.as_bytes());
                buf.put_i32(*asset_type);
            }
            AssetRequestParams::InventoryItem {
                agent_id,
                session_id,
                owner_id,
                task_id,
                item_id,
                asset_type,
            } => {
                buf.put_slice(agent_id.as_bytes());
                buf.put_slice(session_id.as_bytes());
                buf.put_slice(owner_id.as_bytes());
                buf.put_slice(task_id.as_bytes());
                buf.put_slice(item_id.as_bytes());
                buf.put_i32(*asset_type);
            }
            AssetRequestParams::Estate {
                agent_id,
                session_id,
                estate_asset_kind,
            } => {
                buf.put_slice(agent_id.as_bytes());
                buf.put_slice(session_id.as_bytes());
                buf.put_i32(*estate_asset_kind);
            }
        }
        buf.freeze()
    }
}
