//! Feed simulator (reel-sim) - Main entry point
//!
//! Drives one feed against the simulated decoder backend and prints every
//! pool event as a JSON line on stdout. Logs go to stderr.
//!
//! Useful for eyeballing preload/eviction behaviour under a tuning file
//! before it ships:
//!
//! ```text
//! reel-sim --items 20 --script 1,2,3,4,3 --oom v3 --config tuning.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reel_common::config::ConfigResolver;
use reel_common::events::EventBus;
use reel_pool::decoder::{ItemUrlResolver, NoopViewTracker};
use reel_pool::sim::{self, SimBackend, SimFailure};
use reel_pool::{FeedDeps, FeedOptions, PlaybackCoordinator, PoolConfig, SharedPool};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for reel-sim
#[derive(Parser, Debug)]
#[command(name = "reel-sim")]
#[command(about = "Simulate a paged video feed against the decoder pool")]
#[command(version)]
struct Args {
    /// Number of items in the simulated feed
    #[arg(short, long, default_value = "12")]
    items: usize,

    /// Comma-separated page indices to scroll through
    #[arg(short, long, value_delimiter = ',', default_value = "1,2,3,4,3,2")]
    script: Vec<usize>,

    /// Time spent on each page
    #[arg(long, default_value = "1500")]
    dwell_ms: u64,

    /// Labels (v0, v1, ...) whose first two initializations run out of memory
    #[arg(long, value_delimiter = ',')]
    oom: Vec<String>,

    /// Simulated decoder initialization delay
    #[arg(long, default_value = "250")]
    init_delay_ms: u64,

    /// Open the feed as if from a profile grid (handles released on exit)
    #[arg(long)]
    from_profile: bool,

    /// Config file (overrides REEL_CONFIG and the platform default)
    #[arg(short, long, env = "REEL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = ConfigResolver::new()
        .load(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing (RUST_LOG wins over the config file)
    let level = toml_config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("reel_pool={level},reel_common={level},reel_sim={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = PoolConfig::from_settings(&toml_config.pool).context("Invalid [pool] configuration")?;
    info!(
        "reel-sim {} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    info!(
        "Starting reel-sim: {} items, window={}, cap={}, max_pool={}",
        args.items, config.preload_window, config.max_concurrent_inits, config.max_pool_size
    );

    let bus = EventBus::new(1024);
    let printer = tokio::spawn(print_events(bus.subscribe()));
    let shared = SharedPool::new(&config, bus);

    let backend = SimBackend::new().with_init_delay(Duration::from_millis(args.init_delay_ms));
    for label in &args.oom {
        backend.fail_times(label, SimFailure::OutOfMemory, 2);
    }

    let deps = FeedDeps {
        shared: Arc::clone(&shared),
        backend: Arc::new(backend.clone()),
        resolver: Arc::new(ItemUrlResolver),
        tracker: Arc::new(NoopViewTracker),
    };
    let options = FeedOptions {
        opened_from_profile: args.from_profile,
        ..FeedOptions::default()
    };
    let feed = PlaybackCoordinator::new(config, deps, sim::feed_items(args.items), options);

    feed.on_page_settled(0).await.context("Initial settle failed")?;
    tokio::time::sleep(Duration::from_millis(args.dwell_ms)).await;

    for index in args.script {
        if index >= args.items {
            warn!("Skipping page {} (feed has {} items)", index, args.items);
            continue;
        }
        feed.on_page_changed(index).await;
        tokio::time::sleep(Duration::from_millis(args.dwell_ms)).await;
    }

    feed.dispose().await;
    // Let late completions drain
    tokio::time::sleep(Duration::from_millis(args.init_delay_ms * 2)).await;

    let stats = shared.stats();
    info!(
        "Done: {} resident handles, {} live decoders, hit rate {:.0}%, {} evictions, max audible {}",
        shared.len().await,
        backend.live_decoders(),
        stats.hit_rate() * 100.0,
        stats.evictions,
        backend.max_audible()
    );
    for violation in backend.violations() {
        warn!("Decoder contract violation: {}", violation);
    }

    printer.abort();
    Ok(())
}

/// Print each pool event as one JSON line
async fn print_events(mut events: broadcast::Receiver<reel_common::events::PoolEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", event.to_json_line()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event printer lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
