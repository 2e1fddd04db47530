use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use flash_depth::{
    DepthRegistry, FeedEvent, Engine, Identifier, Level, MarketSegment, PipelineConfig, Side,
    Snapshot, Update, Wake,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::{io, time::Duration};

const LEVELS: usize = 15;

struct SharedStats {
    updates: AtomicU64,
    avg_latency_ns: AtomicU64,
    stop: AtomicBool,
}

// Helper to generate the ASCII Bar string
fn render_level_bars(levels: &[Level]) -> String {
    let mut out = String::new();
    let max_amount = levels.iter().map(|l| l.amount).fold(1.0, f64::max);

    for level in levels.iter().take(LEVELS) {
        let bar_len = ((level.amount / max_amount) * 20.0) as usize;
        let bar = "█".repeat(bar_len);
        out.push_str(&format!("{:>9.2} {:<20} {:>6.2}\n", level.price, bar, level.amount));
    }
    out
}

/// Synthetic feed: a random walk around a mid price, one level per update
fn run_writer(mut engine: Engine, identifier: Identifier, stats: Arc<SharedStats>) {
    let mut rng = 12345u64; // Simple LCG for speed
    let mut mid = 3000.0f64;
    let mut update_id = 1i64;

    let ladder = |mid: f64, side: Side| -> Vec<Level> {
        (1..=LEVELS)
            .map(|i| {
                let offset = i as f64 * 0.5;
                let price = if side == Side::Bid { mid - offset } else { mid + offset };
                Level::new(price, 1.0)
            })
            .collect()
    };
    let _ = engine.process_event(FeedEvent::Snapshot(Snapshot {
        identifier: identifier.clone(),
        bids: ladder(mid, Side::Bid),
        asks: ladder(mid, Side::Ask),
        last_update_id: update_id,
        ..Default::default()
    }));

    while !stats.stop.load(Ordering::Relaxed) {
        const BATCH_SIZE: u64 = 100;
        let start_batch = std::time::Instant::now();

        for _ in 0..BATCH_SIZE {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            // Use high 32 bits for better randomness (LCG low bits are poor)
            let r = rng >> 32;
            update_id += 1;

            if r % 200 == 0 {
                mid += ((r % 3) as f64 - 1.0) * 0.5;
            }

            let side = if r % 2 == 0 { Side::Bid } else { Side::Ask };
            let offset = (1 + r % 20) as f64 * 0.5;
            let price = if side == Side::Bid { mid - offset } else { mid + offset };
            let amount = if r % 5 == 0 { 0.0 } else { (r % 1000) as f64 / 100.0 + 0.01 };
            let level = Level::new(price, amount);
            let (bids, asks) = match side {
                Side::Bid => (vec![level], vec![]),
                Side::Ask => (vec![], vec![level]),
            };

            let _ = engine.process_event(FeedEvent::Update(
                identifier.clone(),
                Update {
                    bids,
                    asks,
                    update_id,
                    max_depth: 40,
                    ..Default::default()
                },
            ));
        }

        stats.updates.fetch_add(BATCH_SIZE, Ordering::Relaxed);
        let ns_per_op = start_batch.elapsed().as_nanos() as u64 / BATCH_SIZE;
        stats.avg_latency_ns.store(ns_per_op, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(2));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(DepthRegistry::default());
    let identifier = Identifier::new("synthetic", "ETH-USD", MarketSegment::Spot);
    let stats = Arc::new(SharedStats {
        updates: AtomicU64::new(0),
        avg_latency_ns: AtomicU64::new(0),
        stop: AtomicBool::new(false),
    });

    let writer = {
        let engine = Engine::with_registry(registry.clone(), PipelineConfig::default());
        let identifier = identifier.clone();
        let stats = stats.clone();
        thread::spawn(move || run_writer(engine, identifier, stats))
    };

    // The writer loads the first snapshot
    let depth = loop {
        if let Some(depth) = registry.get(&identifier) {
            break depth;
        }
        thread::sleep(Duration::from_millis(1));
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut last_updates = 0;
    let mut last_time = std::time::Instant::now();
    let mut throughput = 0.0;
    let mut stale_frames = 0u64;

    loop {
        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }

        // Redraw on change, or at least every 100ms
        if depth.wait_timeout(Duration::from_millis(100)) == Wake::TimedOut {
            stale_frames += 1;
        }

        let now = std::time::Instant::now();
        if now.duration_since(last_time).as_secs_f64() >= 1.0 {
            let current = stats.updates.load(Ordering::Relaxed);
            throughput = (current - last_updates) as f64;
            last_updates = current;
            last_time = now;
        }

        let (bids, asks, options) = depth.retrieve_with_options();
        let (bid_liquidity, _) = depth.total_bids_amount();
        let (ask_liquidity, _) = depth.total_asks_amount();

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([
                    Constraint::Length(3),  // Header
                    Constraint::Min(10),    // Book
                    Constraint::Length(8),  // Stats
                ])
                .split(f.size());

            let header = Block::default().borders(Borders::ALL).title("FLASH-DEPTH Ladder (synthetic feed)");
            let title = Paragraph::new(format!("{} | Press 'q' to quit", identifier))
                .block(header)
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::Cyan));
            f.render_widget(title, chunks[0]);

            let book_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);

            let bids_widget = Paragraph::new(render_level_bars(&bids))
                .block(Block::default().borders(Borders::ALL).title("BIDS").style(Style::default().fg(Color::Green)));
            let asks_widget = Paragraph::new(render_level_bars(&asks))
                .block(Block::default().borders(Borders::ALL).title("ASKS").style(Style::default().fg(Color::Red)));
            f.render_widget(bids_widget, book_chunks[0]);
            f.render_widget(asks_widget, book_chunks[1]);

            let spread = match (bids.first(), asks.first()) {
                (Some(bid), Some(ask)) => format!("{:.2}", ask.price - bid.price),
                _ => "-".to_string(),
            };
            let stats_text = format!(
                "Throughput: {:.0} updates/sec\nLatency (Avg Batch): {} ns\nLast update: {}\nLevels: {} bids ({:.2}) / {} asks ({:.2})\nSpread: {} | Idle redraws: {}",
                throughput,
                stats.avg_latency_ns.load(Ordering::Relaxed),
                options.last_update_id,
                bids.len(),
                bid_liquidity,
                asks.len(),
                ask_liquidity,
                spread,
                stale_frames,
            );
            let stats_block = Paragraph::new(stats_text)
                .block(Block::default().borders(Borders::ALL).title("Depth Telemetry"))
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(stats_block, chunks[2]);
        })?;
    }

    // Restore terminal
    stats.stop.store(true, Ordering::Relaxed);
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    let _ = writer.join();
    Ok(())
}
