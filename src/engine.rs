//! Matching engine for one instrument.
//!
//! Owns the order arena and the book, assigns ids, admits orders (with
//! the crossing-limit price clamp), runs the matching loop, and keeps
//! the trade counters. All mutation happens on the shard worker that
//! owns this engine; the runtime serializes access.

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::error::RuntimeError;
use crate::events::{notify, MarketListener, OrderEvent, RejectReason};
use crate::order::{
    now_nanos, OrderId, OrderKind, OrderRecord, OrderStatus, Price, Quantity, Side, NIL_ORDER_ID,
    NO_PRICE,
};
use crate::order_book::OrderBook;

/// Event buffer for one engine operation. Most operations produce a
/// handful of events; matching sweeps may spill.
type EventBuf = SmallVec<[OrderEvent; 8]>;

/// Per-instrument matching engine.
pub struct OrderEngine {
    /// Order records; never freed before teardown so id queries work
    /// after fills and cancels
    orders: Arena<OrderRecord>,
    book: OrderBook,
    ticker: String,
    next_order_id: OrderId,
    /// The just-entered (or just-modified) order; implicit trigger for
    /// the matching pass
    recent_order_id: OrderId,
    last_trade_price: Price,
    num_trades: u64,
    verbose: bool,
    auto_match: bool,
    listener: Option<Box<dyn MarketListener>>,
}

impl OrderEngine {
    /// Create an engine for `ticker` with room for `capacity` orders.
    ///
    /// Auto-matching is on and notifications are off by default.
    pub fn new(ticker: impl Into<String>, capacity: usize) -> Self {
        Self {
            orders: Arena::with_capacity(capacity),
            book: OrderBook::new(),
            ticker: ticker.into(),
            next_order_id: 0,
            recent_order_id: NIL_ORDER_ID,
            last_trade_price: NO_PRICE,
            num_trades: 0,
            verbose: false,
            auto_match: true,
            listener: None,
        }
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admit a new order.
    ///
    /// Limit orders that cross are clamped to the best opposing price
    /// before insertion, so the book never holds a crossed rest. Market
    /// orders take the best opposing price, or are rejected when the
    /// opposing side is empty (the record is kept in `Rejected` state).
    /// When auto-matching is on the matching pass runs before returning.
    pub fn place_order(
        &mut self,
        side: Side,
        kind: OrderKind,
        price: Price,
        qty: Quantity,
    ) -> Result<OrderId, RuntimeError> {
        let id = self.next_order_id;
        self.next_order_id += 1;

        let record = OrderRecord::new(side, kind, qty, price, id);
        let slot = self
            .orders
            .insert(record)
            .ok_or(RuntimeError::OrderCapacity)?;
        self.book.index_order(id, slot);

        let mut events = EventBuf::new();

        match kind {
            OrderKind::Limit => {
                // A crossing limit is clamped to the best opposing price,
                // forcing immediate matchability instead of a crossed rest.
                match side {
                    Side::Ask => {
                        if let Some(best_bid) = self.book.best_bid() {
                            if price < best_bid {
                                self.orders[slot].price = best_bid;
                            }
                        }
                    }
                    Side::Bid => {
                        if let Some(best_ask) = self.book.best_ask() {
                            if price > best_ask {
                                self.orders[slot].price = best_ask;
                            }
                        }
                    }
                }
            }
            OrderKind::Market => match self.book.best(side.opposite()) {
                Some(best) => self.orders[slot].price = best,
                None => {
                    self.orders[slot].status = OrderStatus::Rejected;
                    events.push(OrderEvent::Reject {
                        id,
                        reason: RejectReason::NoLiquidity,
                    });
                    self.dispatch(events);
                    return Err(RuntimeError::NoOpposingLiquidity(side));
                }
            },
        }

        let record = self.orders[slot];
        self.book
            .insert_resting(side, record.price, record.level_key());

        events.push(OrderEvent::Open { id });
        self.recent_order_id = id;

        if self.auto_match {
            self.run_matching(&mut events);
        }
        if kind == OrderKind::Market {
            self.drop_market_residual(id, &mut events);
        }

        self.dispatch(events);
        Ok(id)
    }

    /// Cancel an open limit order. Market orders and orders that have
    /// already left the book cannot be cancelled.
    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), RuntimeError> {
        let slot = self
            .book
            .slot_of(id)
            .ok_or(RuntimeError::UnknownOrder(id))?;
        let record = self.orders[slot];
        if record.status != OrderStatus::Open || record.kind != OrderKind::Limit {
            return Err(RuntimeError::NotCancellable(id));
        }

        let removed = self
            .book
            .remove_resting(record.side, record.price, record.level_key());
        debug_assert!(removed, "an open limit order must be resting in its level");

        self.orders[slot].status = OrderStatus::Cancelled;

        let mut events = EventBuf::new();
        events.push(OrderEvent::Cancel { id });
        self.dispatch(events);
        Ok(())
    }

    /// Replace an open limit order's parameters in place.
    ///
    /// Semantically cancel-then-place, except the id is preserved and the
    /// record is mutated rather than reallocated. The timestamp is
    /// refreshed, so the order loses its time priority. Fails when the
    /// cancel half fails.
    pub fn edit_order(
        &mut self,
        id: OrderId,
        side: Side,
        price: Price,
        qty: Quantity,
    ) -> Result<OrderId, RuntimeError> {
        if let Err(err) = self.cancel_order(id) {
            if self.book.slot_of(id).is_some() {
                let mut events = EventBuf::new();
                events.push(OrderEvent::Reject {
                    id,
                    reason: RejectReason::ModifyFailed,
                });
                self.dispatch(events);
            }
            return Err(err);
        }

        let slot = self
            .book
            .slot_of(id)
            .expect("cancelled order must stay indexed");
        {
            let record = &mut self.orders[slot];
            record.side = side;
            record.qty = qty;
            record.price = price;
            record.timestamp = now_nanos();
            record.status = OrderStatus::Open;
        }

        // Same clamp as admission
        match side {
            Side::Ask => {
                if let Some(best_bid) = self.book.best_bid() {
                    if price < best_bid {
                        self.orders[slot].price = best_bid;
                    }
                }
            }
            Side::Bid => {
                if let Some(best_ask) = self.book.best_ask() {
                    if price > best_ask {
                        self.orders[slot].price = best_ask;
                    }
                }
            }
        }

        let record = self.orders[slot];
        self.book
            .insert_resting(side, record.price, record.level_key());
        self.recent_order_id = id;

        let mut events = EventBuf::new();
        events.push(OrderEvent::Modify { id });

        if self.auto_match {
            self.run_matching(&mut events);
        }

        self.dispatch(events);
        Ok(id)
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Match the recent order against the opposing book until it is done
    /// or no longer crosses.
    fn run_matching(&mut self, events: &mut EventBuf) {
        let Some(recent_slot) = self.book.slot_of(self.recent_order_id) else {
            return;
        };

        loop {
            let recent = self.orders[recent_slot];
            if recent.status != OrderStatus::Open || recent.qty <= 0.0 {
                break;
            }
            let (Some(best_ask), Some(best_bid)) = (self.book.best_ask(), self.book.best_bid())
            else {
                break;
            };

            let can_trade = match recent.side {
                Side::Ask => best_bid >= recent.price,
                Side::Bid => best_ask <= recent.price,
            };
            if !can_trade {
                break;
            }

            let Some((_, ask_id)) = self.book.level_head(Side::Ask, best_ask) else {
                break;
            };
            let Some((_, bid_id)) = self.book.level_head(Side::Bid, best_bid) else {
                break;
            };

            self.match_step(ask_id, bid_id, best_ask, best_bid, recent.side, events);
        }
    }

    /// Execute one fill between the best ask and the best bid.
    fn match_step(
        &mut self,
        ask_id: OrderId,
        bid_id: OrderId,
        ask_price: Price,
        bid_price: Price,
        taker_side: Side,
        events: &mut EventBuf,
    ) {
        let ask_slot = self
            .book
            .slot_of(ask_id)
            .expect("order at a level head must be indexed");
        let bid_slot = self
            .book
            .slot_of(bid_id)
            .expect("order at a level head must be indexed");

        let fill = self.orders[ask_slot].qty.min(self.orders[bid_slot].qty);
        self.orders[ask_slot].qty -= fill;
        self.orders[bid_slot].qty -= fill;

        // Trades print at the passive (resting) order's price
        let trade_price = match taker_side {
            Side::Ask => bid_price,
            Side::Bid => ask_price,
        };
        self.last_trade_price = trade_price;
        self.num_trades += 1;

        let ask_remaining = self.orders[ask_slot].qty;
        let bid_remaining = self.orders[bid_slot].qty;

        if ask_remaining <= 0.0 {
            self.orders[ask_slot].status = OrderStatus::Filled;
        }
        if bid_remaining <= 0.0 {
            self.orders[bid_slot].status = OrderStatus::Filled;
        }

        events.push(OrderEvent::Fill {
            id: ask_id,
            price: trade_price,
            qty: fill,
            remaining: ask_remaining,
        });
        events.push(OrderEvent::Fill {
            id: bid_id,
            price: trade_price,
            qty: fill,
            remaining: bid_remaining,
        });

        // Remove filled orders from their levels; the book cleans up an
        // emptied level and its ladder entry.
        if ask_remaining <= 0.0 {
            self.book.pop_level_head(Side::Ask, ask_price);
        }
        if bid_remaining <= 0.0 {
            self.book.pop_level_head(Side::Bid, bid_price);
        }
    }

    /// Market orders never rest: once matching halts with quantity left,
    /// the remainder is pulled from the book and the order is cancelled
    /// (the residual stays on the record).
    fn drop_market_residual(&mut self, id: OrderId, events: &mut EventBuf) {
        let Some(slot) = self.book.slot_of(id) else {
            return;
        };
        let record = self.orders[slot];
        if record.status != OrderStatus::Open {
            return;
        }

        self.book
            .remove_resting(record.side, record.price, record.level_key());
        self.orders[slot].status = OrderStatus::Cancelled;
        events.push(OrderEvent::Cancel { id });
    }

    // ========================================================================
    // Read Queries
    // ========================================================================

    /// Best bid price (highest resting buy).
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.book.best_bid()
    }

    /// Best ask price (lowest resting sell).
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.book.best_ask()
    }

    /// Price of the most recent trade, or the no-data sentinel before the
    /// first trade.
    #[inline]
    pub fn market_price(&self) -> Price {
        self.last_trade_price
    }

    /// Total number of executed fills.
    #[inline]
    pub fn num_trades(&self) -> u64 {
        self.num_trades
    }

    /// Look up an order by id. Works for orders in any state.
    #[inline]
    pub fn get_order(&self, id: OrderId) -> Option<&OrderRecord> {
        self.book.slot_of(id).map(|slot| self.orders.get(slot))
    }

    /// All orders currently in the given state (scan of the order index).
    pub fn orders_by_status(&self, status: OrderStatus) -> Vec<OrderRecord> {
        self.book
            .order_index
            .values()
            .map(|&slot| self.orders[slot])
            .filter(|record| record.status == status)
            .collect()
    }

    /// Up to `depth` `(price, total quantity)` pairs starting at the best
    /// price. Walks shallow clones of the ladder and level heaps; the
    /// book itself is untouched.
    pub fn market_depth(&self, side: Side, depth: usize) -> Vec<(Price, Quantity)> {
        let mut result = Vec::with_capacity(depth);
        let mut ladder = match side {
            Side::Bid => LadderWalk::Bid(self.book.bid_book.clone()),
            Side::Ask => LadderWalk::Ask(self.book.ask_book.clone()),
        };

        for _ in 0..depth {
            let Some(price) = ladder.pop_best() else {
                break;
            };
            let Some(level) = self.book.level(side, price) else {
                break;
            };

            let mut level = level.clone();
            let mut total: Quantity = 0.0;
            while let Some((_, id)) = level.pop() {
                if let Some(slot) = self.book.slot_of(id) {
                    total += self.orders[slot].qty;
                }
            }
            result.push((price, total));
        }
        result
    }

    /// Hash of the observable book state, for determinism checks.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.best_bid().map(Price::to_bits).hash(&mut hasher);
        self.best_ask().map(Price::to_bits).hash(&mut hasher);
        self.last_trade_price.to_bits().hash(&mut hasher);
        self.num_trades.hash(&mut hasher);
        self.book.indexed_orders().hash(&mut hasher);
        hasher.finish()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[inline]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn set_auto_match(&mut self, auto_match: bool) {
        self.auto_match = auto_match;
    }

    #[inline]
    pub fn auto_match(&self) -> bool {
        self.auto_match
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Install a strategy listener; hooks fire on this engine's shard.
    pub fn set_listener(&mut self, listener: Box<dyn MarketListener>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    fn dispatch(&mut self, events: EventBuf) {
        if events.is_empty() {
            return;
        }

        // Hooks borrow the engine read-only, so the listener steps aside
        // for the duration of the dispatch.
        let mut listener = self.listener.take();
        if let Some(l) = listener.as_mut() {
            for event in &events {
                match *event {
                    OrderEvent::Fill { id, price, qty, .. } => {
                        l.on_fill(&self.ticker, id, price, qty)
                    }
                    OrderEvent::Cancel { id } => l.on_cancel(&self.ticker, id),
                    OrderEvent::Reject { id, reason } => l.on_reject(&self.ticker, id, reason),
                    OrderEvent::Open { .. } | OrderEvent::Modify { .. } => {}
                }
            }
            l.on_book_update(&self.ticker, self);
        }
        self.listener = listener;

        if self.verbose {
            for event in &events {
                let id = match *event {
                    OrderEvent::Open { id }
                    | OrderEvent::Fill { id, .. }
                    | OrderEvent::Cancel { id }
                    | OrderEvent::Modify { id }
                    | OrderEvent::Reject { id, .. } => id,
                };
                if let Some(record) = self.get_order(id) {
                    notify(&self.ticker, event, record);
                }
            }
        }
    }
}

impl std::fmt::Debug for OrderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderEngine")
            .field("ticker", &self.ticker)
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("num_trades", &self.num_trades)
            .field("orders", &self.book.indexed_orders())
            .finish()
    }
}

/// Cloned ladder being walked best-first for depth queries.
enum LadderWalk {
    Bid(crate::heap::MaxHeap<crate::order::PriceKey>),
    Ask(crate::heap::MinHeap<crate::order::PriceKey>),
}

impl LadderWalk {
    fn pop_best(&mut self) -> Option<Price> {
        match self {
            LadderWalk::Bid(h) => h.pop().map(|k| k.value()),
            LadderWalk::Ask(h) => h.pop().map(|k| k.value()),
        }
    }
}
