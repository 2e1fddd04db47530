use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use flash_depth::{Engine, PipelineConfig, ReplayReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Replay a recorded depth capture through the update pipeline
#[derive(Debug, Parser)]
#[command(name = "replay", version)]
struct Args {
    /// CSV capture, one level per row
    path: PathBuf,

    /// Re-order buffer size per instrument (0 applies updates immediately)
    #[arg(long, default_value_t = 0)]
    buffer: usize,

    /// Sort the buffer by update time instead of update id
    #[arg(long)]
    sort_by_time: bool,

    /// Apply every update by exchange id
    #[arg(long)]
    by_id: bool,

    #[arg(long)]
    allow_duplicate_prices: bool,

    #[arg(long)]
    bypass_delete_verification: bool,

    /// Free pool nodes idle this long are released
    #[arg(long, default_value_t = 30)]
    pool_idle_ttl_secs: u64,

    /// Period of the node pool sweep
    #[arg(long, default_value_t = 1000)]
    sweep_every_ms: u64,

    /// Levels per side to print for each instrument at the end
    #[arg(long, default_value_t = 5)]
    top: usize,
}

impl Args {
    fn config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_buffer(self.buffer, !self.sort_by_time)
            .with_apply_by_identifier(self.by_id)
            .with_allow_duplicate_prices(self.allow_duplicate_prices)
            .with_bypass_delete_verification(self.bypass_delete_verification)
            .with_node_pool_idle_ttl(Duration::from_secs(self.pool_idle_ttl_secs))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut engine = Engine::new(args.config());
    let reader = ReplayReader::from_path(&args.path)?;

    // The replay loop stays on this thread; the sweeper runs on the runtime's worker
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()?;
    let _guard = runtime.enter();
    let sweeper = engine.spawn_pool_sweeper(Duration::from_millis(args.sweep_every_ms.max(1)));

    info!(path = %args.path.display(), "replay started");
    let start = Instant::now();
    let mut unreadable = 0u64;
    for event in reader {
        match event {
            Ok(event) => {
                // Rejections are logged by the pipeline
                let _ = engine.process_event(event);
            }
            Err(err) => {
                unreadable += 1;
                error!(%err, "skipping unreadable rows");
            }
        }
    }

    // Apply whatever is still parked in partially filled buffers
    let mut identifiers = engine.registry().identifiers();
    identifiers.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    for identifier in &identifiers {
        let _ = engine.pipeline().drain(identifier);
    }

    let elapsed = start.elapsed();
    sweeper.abort();
    let stats = engine.stats();
    println!("\n=== Replay Summary ===");
    println!("Events:      {}", stats.processed());
    println!("  snapshots: {}", stats.snapshots);
    println!("  updates:   {}", stats.updates);
    println!("  flushes:   {}", stats.flushes + stats.invalidations);
    println!("Rejected:    {}", stats.rejected);
    println!("Unreadable:  {}", unreadable);
    println!("Elapsed:     {:.3?}", elapsed);

    for identifier in &identifiers {
        let Some(depth) = engine.depth(identifier) else {
            continue;
        };
        let (bids, asks, options) = depth.retrieve_with_options();
        println!("\n--- {} (update {}) ---", identifier, options.last_update_id);
        println!("{:>14} {:>14} | {:<14} {:<14}", "bid amount", "bid", "ask", "ask amount");
        for row in 0..args.top.min(bids.len().max(asks.len())) {
            let bid = bids.get(row).map_or((String::new(), String::new()), |l| {
                (format!("{}", l.amount), format!("{}", l.price))
            });
            let ask = asks.get(row).map_or((String::new(), String::new()), |l| {
                (format!("{}", l.price), format!("{}", l.amount))
            });
            println!("{:>14} {:>14} | {:<14} {:<14}", bid.0, bid.1, ask.0, ask.1);
        }
        if let Some(spread) = depth.spread() {
            println!("spread: {spread}");
        }
    }
    Ok(())
}
