//! Order Book - price ladders, per-price FIFO levels, and the order index.
//!
//! Each side is a heap of prices (max for bids, min for asks) paired with
//! a map from price to its level. A level is itself a min-heap of
//! `(timestamp, id)` pairs, giving FIFO order within the price. The order
//! index maps every order id ever admitted to its arena slot; records are
//! retained after they leave the book so queries by id keep working.
//!
//! Invariant: a price is in a side's heap iff that side's level map has a
//! non-empty level for it. Level cleanup happens here, on the last
//! removal.

use rustc_hash::FxHashMap;

use crate::arena::SlotIndex;
use crate::heap::{MaxHeap, MinHeap};
use crate::order::{OrderId, Price, PriceKey, Side, Timestamp};

/// FIFO queue of resting orders at one price: earliest arrival first,
/// order id breaking timestamp ties.
pub type OrderLevel = MinHeap<(Timestamp, OrderId)>;

/// The central book structure for one instrument.
pub struct OrderBook {
    /// Bid ladder (highest price at the root)
    pub(crate) bid_book: MaxHeap<PriceKey>,
    /// Ask ladder (lowest price at the root)
    pub(crate) ask_book: MinHeap<PriceKey>,
    /// Bid price -> resting orders at that price
    pub(crate) bid_levels: FxHashMap<PriceKey, OrderLevel>,
    /// Ask price -> resting orders at that price
    pub(crate) ask_levels: FxHashMap<PriceKey, OrderLevel>,
    /// Every admitted order id -> arena slot (never removed)
    pub(crate) order_index: FxHashMap<OrderId, SlotIndex>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bid_book: MaxHeap::new(),
            ask_book: MinHeap::new(),
            bid_levels: FxHashMap::default(),
            ask_levels: FxHashMap::default(),
            order_index: FxHashMap::default(),
        }
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Best bid price (highest buy), if any bids rest.
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bid_book.peek().map(|k| k.value())
    }

    /// Best ask price (lowest sell), if any asks rest.
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.ask_book.peek().map(|k| k.value())
    }

    /// Best price on a given side.
    #[inline]
    pub fn best(&self, side: Side) -> Option<Price> {
        match side {
            Side::Bid => self.best_bid(),
            Side::Ask => self.best_ask(),
        }
    }

    // ========================================================================
    // Order Index
    // ========================================================================

    /// Record the id -> arena slot mapping for a newly admitted order.
    #[inline]
    pub fn index_order(&mut self, id: OrderId, slot: SlotIndex) {
        self.order_index.insert(id, slot);
    }

    /// Arena slot of an order, if it was ever admitted.
    #[inline]
    pub fn slot_of(&self, id: OrderId) -> Option<SlotIndex> {
        self.order_index.get(&id).copied()
    }

    /// Total number of orders ever admitted (any status).
    #[inline]
    pub fn indexed_orders(&self) -> usize {
        self.order_index.len()
    }

    // ========================================================================
    // Resting Orders
    // ========================================================================

    /// Insert a resting order at `price`, creating the level (and the
    /// ladder entry) if this is the first order at that price.
    pub fn insert_resting(&mut self, side: Side, price: Price, key: (Timestamp, OrderId)) {
        let price = PriceKey(price);
        let (book, levels) = match side {
            Side::Bid => (&mut self.bid_book as &mut dyn LadderMut, &mut self.bid_levels),
            Side::Ask => (&mut self.ask_book as &mut dyn LadderMut, &mut self.ask_levels),
        };
        let level = levels.entry(price).or_insert_with(|| {
            book.push_price(price);
            OrderLevel::new()
        });
        level.push(key);
    }

    /// Remove a specific resting order, cleaning up the level and ladder
    /// entry if it was the last one. Returns false if the order was not
    /// found at that price.
    pub fn remove_resting(&mut self, side: Side, price: Price, key: (Timestamp, OrderId)) -> bool {
        let price = PriceKey(price);
        let (book, levels) = match side {
            Side::Bid => (&mut self.bid_book as &mut dyn LadderMut, &mut self.bid_levels),
            Side::Ask => (&mut self.ask_book as &mut dyn LadderMut, &mut self.ask_levels),
        };

        let Some(level) = levels.get_mut(&price) else {
            return false;
        };
        let Some(pos) = level.find(&key) else {
            return false;
        };
        level.pop_at(pos);

        if level.is_empty() {
            levels.remove(&price);
            book.remove_price(price);
        }
        true
    }

    /// Head of the level at `price` (oldest resting order), if any.
    #[inline]
    pub fn level_head(&self, side: Side, price: Price) -> Option<(Timestamp, OrderId)> {
        self.level(side, price).and_then(|l| l.peek().copied())
    }

    /// Pop the head of the level at `price`, cleaning up an emptied level
    /// and its ladder entry.
    pub fn pop_level_head(&mut self, side: Side, price: Price) -> Option<(Timestamp, OrderId)> {
        let price = PriceKey(price);
        let (book, levels) = match side {
            Side::Bid => (&mut self.bid_book as &mut dyn LadderMut, &mut self.bid_levels),
            Side::Ask => (&mut self.ask_book as &mut dyn LadderMut, &mut self.ask_levels),
        };

        let level = levels.get_mut(&price)?;
        let head = level.pop();
        if level.is_empty() {
            levels.remove(&price);
            book.remove_price(price);
        }
        head
    }

    /// The level at `price`, if one exists.
    #[inline]
    pub fn level(&self, side: Side, price: Price) -> Option<&OrderLevel> {
        let price = PriceKey(price);
        match side {
            Side::Bid => self.bid_levels.get(&price),
            Side::Ask => self.ask_levels.get(&price),
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Number of distinct bid prices.
    pub fn bid_level_count(&self) -> usize {
        self.bid_levels.len()
    }

    /// Number of distinct ask prices.
    pub fn ask_level_count(&self) -> usize {
        self.ask_levels.len()
    }

    /// True when neither side has resting orders.
    pub fn is_empty(&self) -> bool {
        self.bid_book.is_empty() && self.ask_book.is_empty()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("bid_levels", &self.bid_levels.len())
            .field("ask_levels", &self.ask_levels.len())
            .field("indexed_orders", &self.order_index.len())
            .finish()
    }
}

/// Erases the min/max polarity difference between the two ladders so the
/// side-switched paths above can share code.
trait LadderMut {
    fn push_price(&mut self, price: PriceKey);
    fn remove_price(&mut self, price: PriceKey);
}

impl LadderMut for MaxHeap<PriceKey> {
    fn push_price(&mut self, price: PriceKey) {
        self.push(price);
    }
    fn remove_price(&mut self, price: PriceKey) {
        if let Some(pos) = self.find(&price) {
            self.pop_at(pos);
        }
    }
}

impl LadderMut for MinHeap<PriceKey> {
    fn push_price(&mut self, price: PriceKey) {
        self.push(price);
    }
    fn remove_price(&mut self, price: PriceKey) {
        if let Some(pos) = self.find(&price) {
            self.pop_at(pos);
        }
    }
}
