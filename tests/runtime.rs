//! Runtime integration: batch submission, shard routing, ownership
//! tracking, and drain-ordered reads.

use shard_lob::{
    AckCell, EngineRuntime, OrderIdCell, OrderStatus, RuntimeConfig, Side, IPO_HOLDER,
    NIL_ORDER_ID,
};

fn runtime(blocking: bool) -> EngineRuntime {
    EngineRuntime::new(RuntimeConfig {
        num_workers: 4,
        default_capacity: 50_000,
        queue_capacity: 4_096,
        blocking,
        ..RuntimeConfig::default()
    })
}

#[test]
fn test_basic_batch_orders() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cells: Vec<_> = (0..10).map(|_| OrderIdCell::new()).collect();
    for (i, cell) in cells.iter().enumerate() {
        rt.limit_order("AAPL", Side::Bid, 90.0 + i as f64, 10.0, cell, 1)
            .unwrap();
    }

    rt.execute_batch();

    for cell in &cells {
        assert!(cell.is_ok(), "Every order in the batch must place");
    }
    assert_eq!(rt.get_best_bid("AAPL"), 99.0);
}

#[test]
fn test_results_invisible_before_drain() {
    let mut rt = runtime(false);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cell = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &cell, 1)
        .unwrap();

    // Not flushed yet: the job has not run anywhere
    assert_eq!(cell.get(), NIL_ORDER_ID);

    rt.execute_batch(); // async commit
    rt.wait_for_completion();
    assert!(rt.all_jobs_completed());
    assert!(cell.is_ok());
}

#[test]
fn test_mixed_batch_operations() {
    let mut rt = runtime(true);
    rt.register_stock("TSLA", 200.0, 500.0, None).unwrap();

    let id1 = OrderIdCell::new();
    let id2 = OrderIdCell::new();
    rt.limit_order("TSLA", Side::Bid, 195.0, 10.0, &id1, 1)
        .unwrap();
    rt.limit_order("TSLA", Side::Bid, 190.0, 20.0, &id2, 1)
        .unwrap();
    rt.execute_batch();
    assert!(id1.is_ok() && id2.is_ok());

    // New order + market order + cancel + edit in one batch
    let id3 = OrderIdCell::new();
    let market = OrderIdCell::new();
    let cancelled = AckCell::new();
    let edited = OrderIdCell::new();

    rt.limit_order("TSLA", Side::Bid, 185.0, 15.0, &id3, 1)
        .unwrap();
    rt.market_order("TSLA", Side::Bid, 5.0, &market, 1).unwrap();
    rt.cancel_order("TSLA", id2.get(), &cancelled, 1).unwrap();
    rt.edit_order("TSLA", id1.get(), Side::Bid, 196.0, 12.0, &edited)
        .unwrap();
    rt.execute_batch();

    assert!(id3.is_ok());
    assert!(market.is_ok(), "IPO ask supplies market liquidity");
    assert!(cancelled.get());
    assert_eq!(edited.get(), id1.get(), "Edit preserves the id");

    let record = rt.get_order("TSLA", id1.get()).unwrap();
    assert_eq!(record.price, 196.0);
    assert_eq!(record.qty, 12.0);

    let gone = rt.get_order("TSLA", id2.get()).unwrap();
    assert_eq!(gone.status, OrderStatus::Cancelled);
}

#[test]
fn test_cancel_updates_positions() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cell = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &cell, 7)
        .unwrap();
    rt.execute_batch();
    assert_eq!(rt.get_positions(7, "AAPL"), vec![cell.get()]);

    let ack = AckCell::new();
    rt.cancel_order("AAPL", cell.get(), &ack, 7).unwrap();
    rt.execute_batch();

    assert!(ack.get());
    assert!(rt.get_positions(7, "AAPL").is_empty());
}

#[test]
fn test_cancel_failure_reported_in_cell() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let ack = AckCell::new();
    rt.cancel_order("AAPL", 9999, &ack, 1).unwrap();
    rt.execute_batch();
    assert!(!ack.get(), "Cancelling an unknown order fails in the cell");
}

#[test]
fn test_ask_requires_inventory() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cell = OrderIdCell::new();
    assert!(rt
        .limit_order("AAPL", Side::Ask, 101.0, 10.0, &cell, 1)
        .is_err());
    assert_eq!(cell.get(), NIL_ORDER_ID);

    // The IPO holder's open ask backs further sells
    assert!(rt.has_sufficient_shares(IPO_HOLDER, "AAPL", 500.0));
    assert!(rt
        .limit_order("AAPL", Side::Ask, 101.0, 10.0, &cell, IPO_HOLDER)
        .is_ok());
    rt.execute_batch();
    assert!(cell.is_ok());
}

#[test]
fn test_market_order_against_ipo_liquidity() {
    let mut rt = runtime(true);
    rt.register_stock("BTC", 50_000.0, 100.0, None).unwrap();

    let cell = OrderIdCell::new();
    rt.market_order("BTC", Side::Bid, 10.0, &cell, 1).unwrap();
    rt.execute_batch();

    let record = rt.get_order("BTC", cell.get()).unwrap();
    assert_eq!(record.status, OrderStatus::Filled);
    assert_eq!(rt.get_market_price("BTC"), 50_000.0);
}

#[test]
fn test_auto_batch_flush() {
    let mut rt = EngineRuntime::new(RuntimeConfig {
        num_workers: 2,
        batch_size: 5,
        blocking: true,
        ..RuntimeConfig::default()
    });
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cells: Vec<_> = (0..5).map(|_| OrderIdCell::new()).collect();
    for cell in &cells {
        rt.limit_order("AAPL", Side::Bid, 95.0, 1.0, cell, 1)
            .unwrap();
    }

    // The fifth submission hit the batch size and flushed the shard
    for cell in &cells {
        assert!(cell.is_ok(), "Auto-flush must have committed the batch");
    }
}

#[test]
fn test_multi_shard_stress() {
    const ORDERS_PER_TICKER: usize = 1_000;
    const QTY: f64 = 2.0;
    let tickers = ["IBM", "AMZN", "META"];

    let mut rt = runtime(false);
    for ticker in tickers {
        rt.register_stock(ticker, 10_000.0, 1_000.0, None).unwrap();
    }

    let mut cells = Vec::new();
    let mut top_price = [0.0f64; 3];

    // Interleave submissions across all three books
    for i in 0..ORDERS_PER_TICKER {
        for (t, ticker) in tickers.iter().enumerate() {
            let price = 50.0 + (t as f64) * 10.0 + ((i % 50) as f64) * 0.25;
            if price > top_price[t] {
                top_price[t] = price;
            }
            let cell = OrderIdCell::new();
            rt.limit_order(ticker, Side::Bid, price, QTY, &cell, 1)
                .unwrap();
            cells.push(cell);
        }
    }

    rt.execute_batch();
    rt.wait_for_completion();
    assert!(rt.all_jobs_completed());

    for cell in &cells {
        assert!(cell.is_ok(), "All {} orders must place", cells.len());
    }

    for (t, ticker) in tickers.iter().enumerate() {
        assert!(rt.is_engine_completed(ticker).unwrap());
        assert_eq!(
            rt.get_best_bid(ticker),
            top_price[t],
            "Best bid must be the highest submitted bid for {ticker}"
        );

        let positions = rt.get_positions(1, ticker);
        assert_eq!(positions.len(), ORDERS_PER_TICKER);

        let held: f64 = positions
            .iter()
            .map(|&id| rt.get_order(ticker, id).unwrap().qty)
            .sum();
        assert_eq!(held, ORDERS_PER_TICKER as f64 * QTY);
    }
}

#[test]
fn test_per_ticker_ordering_under_batching() {
    // Jobs for one instrument run in submission order: a cancel
    // submitted after the place it targets must succeed.
    let mut rt = runtime(false);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    // Place and immediately edit + cancel within the same batch window
    let placed = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &placed, 1)
        .unwrap();
    rt.execute_batch();
    rt.wait_for_completion();

    let edited = OrderIdCell::new();
    let ack = AckCell::new();
    rt.edit_order("AAPL", placed.get(), Side::Bid, 96.0, 10.0, &edited)
        .unwrap();
    rt.cancel_order("AAPL", placed.get(), &ack, 1).unwrap();
    rt.execute_batch();
    rt.wait_for_completion();

    assert_eq!(edited.get(), placed.get());
    assert!(ack.get(), "Cancel runs after the edit, order is open");
    assert_eq!(
        rt.get_order("AAPL", placed.get()).unwrap().status,
        OrderStatus::Cancelled
    );
}

#[test]
fn test_reset_clears_everything() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cell = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &cell, 1)
        .unwrap();
    rt.execute_batch();

    rt.reset();
    assert!(rt.list_tickers().is_empty());
    assert!(rt.get_positions(1, "AAPL").is_empty());

    // Re-register under the same name with different terms
    rt.register_stock("AAPL", 42.0, 10.0, None).unwrap();
    assert_eq!(rt.get_best_ask("AAPL"), 42.0);
}

#[test]
fn test_unregister_drains_first() {
    let mut rt = runtime(false);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let cell = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &cell, 1)
        .unwrap();
    rt.execute_batch();

    // Unregister waits for the shard, so the submitted job completed
    rt.unregister_stock("AAPL").unwrap();
    assert!(cell.is_ok());
    assert!(rt.get_engine("AAPL").is_none());
}

#[test]
fn test_orders_by_status_via_runtime() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    let keep = OrderIdCell::new();
    let gone = OrderIdCell::new();
    rt.limit_order("AAPL", Side::Bid, 95.0, 10.0, &keep, 1)
        .unwrap();
    rt.limit_order("AAPL", Side::Bid, 94.0, 10.0, &gone, 1)
        .unwrap();
    rt.execute_batch();

    let ack = AckCell::new();
    rt.cancel_order("AAPL", gone.get(), &ack, 1).unwrap();
    rt.execute_batch();

    let open: Vec<_> = rt
        .get_orders_by_status("AAPL", OrderStatus::Open)
        .into_iter()
        .filter(|o| o.side == Side::Bid)
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, keep.get());

    let cancelled = rt.get_orders_by_status("AAPL", OrderStatus::Cancelled);
    assert_eq!(cancelled.len(), 1);
}

#[test]
fn test_depth_through_runtime() {
    let mut rt = runtime(true);
    rt.register_stock("AAPL", 100.0, 1000.0, None).unwrap();

    for (price, qty) in [(95.0, 10.0), (94.0, 20.0), (95.0, 5.0)] {
        let cell = OrderIdCell::new();
        rt.limit_order("AAPL", Side::Bid, price, qty, &cell, 1)
            .unwrap();
    }
    rt.execute_batch();

    assert_eq!(
        rt.get_market_depth("AAPL", Side::Bid, 10),
        vec![(95.0, 15.0), (94.0, 20.0)]
    );
    assert_eq!(
        rt.get_market_depth("AAPL", Side::Ask, 10),
        vec![(100.0, 1000.0)],
        "IPO ask is the only ask level"
    );
}
