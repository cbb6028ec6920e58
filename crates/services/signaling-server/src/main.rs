//! Rendezvous server binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 0.0.0.0:8080
//! cargo run -p watchsync-signaling-server
//!
//! # Custom port and shorter room lifetime
//! cargo run -p watchsync-signaling-server -- \
//!   --bind 127.0.0.1:9000 \
//!   --room-ttl-secs 600
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use watchsync_signaling::{ServerConfig, SignalingServer};

/// WatchSync rendezvous server
///
/// Pairs hosts and guests by room id and relays WebRTC negotiation frames.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "WATCHSYNC_SIGNALING_BIND")]
    bind: SocketAddr,

    /// Rooms older than this many seconds are removed
    #[arg(long, default_value_t = 3600, env = "WATCHSYNC_ROOM_TTL_SECS")]
    room_ttl_secs: u64,

    /// Seconds between stale room sweeps
    #[arg(long, default_value_t = 300, env = "WATCHSYNC_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("watchsync-signaling")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing()?;

    let config = ServerConfig {
        bind_addr: args.bind,
        room_ttl_secs: args.room_ttl_secs,
        sweep_interval_secs: args.sweep_interval_secs,
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_addr,
        room_ttl_secs = config.room_ttl_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "WatchSync rendezvous server starting"
    );

    let handle = SignalingServer::bind(config).await?.start();
    info!("Signaling server running on port {}", handle.addr().port());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, stopping rendezvous server...");
    handle.shutdown().await;
    info!("Rendezvous server shut down gracefully");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    // EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
