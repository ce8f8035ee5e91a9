//! Synthetic order-flow driver: pumps seeded random batches through the
//! runtime and reports batch-commit latency percentiles plus final book
//! state for each instrument.

use hdrhistogram::Histogram;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use shard_lob::{EngineRuntime, OrderIdCell, RuntimeConfig, Side, IPO_HOLDER};
use std::time::Instant;

const TICKERS: [(&str, f64); 3] = [("AAPL", 100.0), ("TSLA", 250.0), ("SPY", 400.0)];
const BATCHES: usize = 200;
const BATCH_SIZE: usize = 1_000;
const SEED: u64 = 0x5EED_CAFE;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    println!("Preparing runtime...");
    let mut runtime = EngineRuntime::new(RuntimeConfig {
        num_workers: 4,
        default_capacity: BATCHES * BATCH_SIZE * 2,
        queue_capacity: BATCH_SIZE * 2,
        blocking: true,
        ..RuntimeConfig::default()
    });

    for (ticker, ipo_price) in TICKERS {
        runtime
            .register_stock(ticker, ipo_price, 1_000_000.0, None)
            .expect("register");
    }

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000_000, 3).unwrap();
    let mut cells: Vec<_> = (0..BATCH_SIZE).map(|_| OrderIdCell::new()).collect();
    let mut submitted = 0usize;
    let mut accepted = 0usize;

    println!(
        "Submitting {} batches of {} orders across {} instruments...",
        BATCHES,
        BATCH_SIZE,
        TICKERS.len()
    );
    let run_start = Instant::now();

    for _ in 0..BATCHES {
        for cell in cells.iter_mut() {
            *cell = OrderIdCell::new();
        }

        let start = Instant::now();
        for cell in cells.iter() {
            let (ticker, ipo_price) = TICKERS[rng.gen_range(0..TICKERS.len())];
            // Mostly buy pressure from user 1; the IPO holder supplies
            // occasional fresh asks near the top of the book.
            let outcome = if rng.gen_bool(0.8) {
                let price = ipo_price * rng.gen_range(0.95..1.0);
                runtime.limit_order(ticker, Side::Bid, price, rng.gen_range(1.0..10.0), cell, 1)
            } else {
                let price = ipo_price * rng.gen_range(1.0..1.05);
                runtime.limit_order(
                    ticker,
                    Side::Ask,
                    price,
                    rng.gen_range(1.0..10.0),
                    cell,
                    IPO_HOLDER,
                )
            };
            if outcome.is_ok() {
                submitted += 1;
            }
        }
        runtime.execute_batch();
        histogram.saturating_record(start.elapsed().as_nanos() as u64);

        accepted += cells.iter().filter(|c| c.is_ok()).count();
    }

    let elapsed = run_start.elapsed();
    let total = BATCHES * BATCH_SIZE;

    println!("\n=== Batch Commit Latency (ns, {BATCH_SIZE} orders/batch) ===");
    for q in [50.0, 90.0, 99.0, 99.9] {
        println!("  p{q:<5} {}", histogram.value_at_quantile(q / 100.0));
    }
    println!("  max   {}", histogram.max());

    println!("\n=== Throughput ===");
    println!("  submitted {submitted}/{total}, accepted {accepted}");
    println!(
        "  {:.0} orders/sec end-to-end",
        submitted as f64 / elapsed.as_secs_f64()
    );

    println!("\n=== Final Books ===");
    for (ticker, _) in TICKERS {
        let engine = runtime.get_engine(ticker).unwrap();
        let engine = engine.lock();
        println!(
            "  {ticker}: bid={:?} ask={:?} trades={} last={}",
            engine.best_bid(),
            engine.best_ask(),
            engine.num_trades(),
            engine.market_price(),
        );
        for (price, qty) in engine.market_depth(Side::Bid, 5) {
            println!("    bid {price:>10.2} x {qty:.0}");
        }
    }
}
