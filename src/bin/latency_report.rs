use flash_depth::{Engine, FeedEvent, Identifier, Level, MarketSegment, Snapshot, Update};
use hdrhistogram::Histogram;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Preparing Latency Benchmark...");

    // Setup: a 50-level book on each side
    let mut engine = Engine::default();
    let identifier = Identifier::new("bench", "ETH-USD", MarketSegment::Spot);
    engine.process_event(FeedEvent::Snapshot(Snapshot {
        identifier: identifier.clone(),
        bids: (0..50).map(|i| Level::new(3000.0 - i as f64, 1.0)).collect(),
        asks: (0..50).map(|i| Level::new(3001.0 + i as f64, 1.0)).collect(),
        last_update_id: 1,
        ..Default::default()
    }))?;

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;

    const ITERATIONS: i64 = 1_000_000;

    println!("Running {} iterations...", ITERATIONS);

    let mut total_duration = std::time::Duration::new(0, 0);
    let mut rng = 12345u64; // Simple LCG for speed

    for update_id in 2..ITERATIONS + 2 {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = rng >> 32;

        // Touch a random level in the top 50; one in four is a delete
        let offset = (r % 50) as f64;
        let amount = if r % 4 == 0 { 0.0 } else { 1.0 + (r % 10) as f64 };
        let (bids, asks) = if r % 2 == 0 {
            (vec![Level::new(3000.0 - offset, amount)], vec![])
        } else {
            (vec![], vec![Level::new(3001.0 + offset, amount)])
        };
        let event = FeedEvent::Update(
            identifier.clone(),
            Update {
                bids,
                asks,
                update_id,
                ..Default::default()
            },
        );

        // Critical measurement section
        let start = Instant::now();
        std::hint::black_box(engine.process_event(event)).ok();
        let elapsed = start.elapsed();

        // Outliers beyond the histogram bound are dropped
        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!("Throughput: {:.2} ops/sec", ITERATIONS as f64 / total_duration.as_secs_f64());
    println!("Rejected:   {}", engine.stats().rejected);
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");

    if let Some(depth) = engine.depth(&identifier) {
        println!(
            "Book: {} bids / {} asks, {} pooled nodes",
            depth.bid_len(),
            depth.ask_len(),
            depth.pool_capacity()
        );
    }

    println!("\nDistribution:");
    for v in histogram.iter_log(100_000, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:6} ns: {:10} count", v.value_iterated_to(), count);
        }
    }
    Ok(())
}
