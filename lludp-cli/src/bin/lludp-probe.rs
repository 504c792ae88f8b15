//! LLUDP Probe - Circuit health checker
//!
//! Opens a circuit to a simulator endpoint, keeps it alive with pings, and
//! reports transport statistics until the requested duration elapses.

use clap::Parser;
use lludp_cli::{display_circuit_stats, format_duration, Config};
use lludp_transport::ReliableTransport;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "lludp-probe")]
#[command(about = "LLUDP circuit probe", long_about = None)]
struct Args {
    /// Simulator endpoint to connect to
    #[arg(short, long)]
    remote: SocketAddr,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// How long to keep the circuit open, in seconds (0 = forever)
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Statistics interval in seconds
    #[arg(long, default_value = "5")]
    stats: u64,

    /// Exercise pause/resume once mid-run
    #[arg(long)]
    pause: bool,
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

    tracing::info!("Connecting to {}...", args.remote);
    let started = Instant::now();
    let transport = ReliableTransport::connect(args.remote, config.transport.to_transport_config())?;
    tracing::info!(
        "Circuit established from {} in {}",
        transport.local_addr()?,
        format_duration(started.elapsed())
    );

    let deadline = (args.duration > 0).then(|| started + Duration::from_secs(args.duration));
    let mut next_stats = Instant::now() + Duration::from_secs(args.stats);
    let mut paused = false;

    while transport.is_connected() {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        thread::sleep(Duration::from_millis(200));

        if args.pause && !paused && started.elapsed() > Duration::from_secs(args.duration / 2) {
            tracing::info!("Pausing updates");
            transport.pause()?;
            thread::sleep(Duration::from_secs(1));
            tracing::info!("Resuming updates");
            transport.resume()?;
            paused = true;
        }

        if Instant::now() >= next_stats {
            display_circuit_stats(&transport.stats());
            next_stats += Duration::from_secs(args.stats);
        }
    }

    display_circuit_stats(&transport.stats());
    transport.disconnect();
    tracing::info!("Circuit closed after {}", format_duration(started.elapsed()));
    Ok(())
}
