//! Core order domain types: identifiers, sides, statuses, and the order
//! record stored in the engine arena.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// External order identifier. Monotonically increasing per engine, never
/// reused.
pub type OrderId = u32;

/// Failure sentinel written into result cells (all-ones).
pub const NIL_ORDER_ID: OrderId = OrderId::MAX;

/// Participant identifier.
pub type UserId = u32;

/// The IPO holder owns all initial shares of a newly registered stock.
pub const IPO_HOLDER: UserId = 0;

/// Real-valued price. Read queries use `-1.0` as the "no data" sentinel.
pub type Price = f64;

/// Sentinel for "no price available" (empty side, no trades yet).
pub const NO_PRICE: Price = -1.0;

/// Real-valued quantity.
pub type Quantity = f64;

/// Arrival timestamp, nanoseconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Ladders break equal timestamps by order id, so a coarse or repeated
/// reading still yields FIFO order within a level.
#[inline]
pub fn now_nanos() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as Timestamp
}

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Order type determines matching behavior
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum OrderKind {
    /// Limit order - rests in the book if not fully matched (default)
    #[default]
    Limit = 0,
    /// Market order - executes at the best opposing price, never rests
    Market = 1,
}

/// Order lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum OrderStatus {
    /// Resting or awaiting its matching pass
    Open = 0,
    /// Fully executed (remaining quantity is zero)
    Filled = 1,
    /// Removed by the owner, or a market order whose liquidity ran out
    Cancelled = 2,
    /// Refused at admission
    Rejected = 3,
}

/// A single order as stored in the engine arena.
///
/// Records are mutated in place during matching (quantity decrements,
/// status transitions) and retained until engine teardown so queries by
/// id keep working after the order leaves the book.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderRecord {
    /// Arrival time; refreshed on modify (losing time priority)
    pub timestamp: Timestamp,
    /// Remaining quantity to fill
    pub qty: Quantity,
    /// Limit price; for market orders, filled in at entry from the best
    /// opposing level
    pub price: Price,
    /// External order id
    pub id: OrderId,
    pub status: OrderStatus,
    pub kind: OrderKind,
    pub side: Side,
}

impl OrderRecord {
    #[inline]
    pub fn new(side: Side, kind: OrderKind, qty: Quantity, price: Price, id: OrderId) -> Self {
        Self {
            timestamp: now_nanos(),
            qty,
            price,
            id,
            status: OrderStatus::Open,
            kind,
            side,
        }
    }

    /// Heap key locating this order inside its price level.
    #[inline]
    pub(crate) fn level_key(&self) -> (Timestamp, OrderId) {
        (self.timestamp, self.id)
    }
}

/// Bit-exact `f64` wrapper usable as a heap element and hash-map key.
///
/// Prices entering the book are either caller-supplied values or copies
/// of values already stored in a ladder, so bit equality is the right
/// equivalence for locating a level.
#[derive(Clone, Copy, Debug)]
pub struct PriceKey(pub Price);

impl PriceKey {
    #[inline]
    pub fn value(self) -> Price {
        self.0
    }
}

impl PartialEq for PriceKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for PriceKey {}

impl PartialOrd for PriceKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriceKey {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for PriceKey {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<Price> for PriceKey {
    #[inline]
    fn from(p: Price) -> Self {
        PriceKey(p)
    }
}
