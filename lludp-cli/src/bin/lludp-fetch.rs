//! LLUDP Fetch - Asset and texture downloader
//!
//! Opens a circuit, requests one asset or texture, and writes the assembled
//! payload to a file.

use clap::Parser;
use lludp_asset::{
    AssetConfig, AssetRequestParams, AssetSink, TextureScheduler, TextureSink, TransferEvent,
    TransferManager,
};
use lludp_cli::Config;
use lludp_transport::ReliableTransport;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "lludp-fetch")]
#[command(about = "LLUDP asset/texture fetcher", long_about = None)]
struct Args {
    /// Simulator endpoint to connect to
    #[arg(short, long)]
    remote: SocketAddr,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Asset id to download via the Transfer protocol
    #[arg(long, conflicts_with = "texture")]
    asset: Option<Uuid>,

    /// Asset type code for --asset
    #[arg(long, default_value = "0")]
    asset_type: i32,

    /// Texture id to download via the image pipeline
    #[arg(long)]
    texture: Option<Uuid>,

    /// Request priority
    #[arg(long, default_value = "100.0")]
    priority: f32,

    /// Output file
    #[arg(short, long)]
    output: String,

    /// Give up after this many seconds
    #[arg(long, default_value = "60")]
    timeout: u64,
}

/// Writes whatever the stack hands it straight to the output file
struct FileSink {
    path: String,
}

impl AssetSink for FileSink {
    fn store_asset(&self, asset_id: Uuid, asset_type: i32, data: &[u8]) {
        tracing::info!("Storing asset {asset_id} (type {asset_type}), {} bytes", data.len());
        if let Err(e) = fs::write(&self.path, data) {
            tracing::error!("Write failed: {e}");
        }
    }
}

impl TextureSink for FileSink {
    fn store_texture(&self, image_id: Uuid, codec: u8, data: &[u8]) {
        tracing::info!("Storing texture {image_id} (codec {codec}), {} bytes", data.len());
        if let Err(e) = fs::write(&self.path, data) {
            tracing::error!("Write failed: {e}");
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let timeout = Duration::from_secs(args.timeout);
    let sink = Arc::new(FileSink {
        path: args.output.clone(),
    });

    tracing::info!("Connecting to {}...", args.remote);
    let transport = ReliableTransport::connect(args.remote, config.transport.to_transport_config())?;

    if let Some(asset_id) = args.asset {
        let manager = TransferManager::new(transport.clone(), AssetConfig::default(), sink)?;
        let events = manager.events();
        let transaction_id = manager.request_asset(
            AssetRequestParams::Asset {
                asset_id,
                asset_type: args.asset_type,
            },
            args.priority,
        )?;
        tracing::info!("Requested asset {asset_id} as transaction {transaction_id}");

        loop {
            let event = events.recv_timeout(timeout)?;
            if let TransferEvent::AssetDownloadDone {
                transaction_id: done_id,
                status,
                data,
            } = event
            {
                if done_id == transaction_id {
                    tracing::info!("Download finished: {status:?}, {} bytes", data.len());
                    break;
                }
            }
        }
        manager.shutdown();
    } else if let Some(image_id) = args.texture {
        let scheduler =
            TextureScheduler::new(transport.clone(), config.texture.to_texture_config(), sink)?;
        let events = scheduler.events();
        scheduler.request_texture(image_id, 0, 0, args.priority)?;
        tracing::info!("Requested texture {image_id}");

        loop {
            let event = events.recv_timeout(timeout)?;
            if event.image_id == image_id {
                tracing::info!("Download finished: {:?}", event.status);
                break;
            }
        }
        scheduler.shutdown();
    } else {
        anyhow::bail!("Nothing to fetch: pass --asset or --texture");
    }

    transport.disconnect();
    Ok(())
}
