//! Lifecycle events, the strategy listener trait, and the notification
//! stream.
//!
//! Engines collect events while mutating the book and dispatch them once
//! the operation completes: first to the optional [`MarketListener`],
//! then - when the engine is verbose - as single-line notifications on
//! the `shard_lob::notify` tracing target.

use crate::engine::OrderEngine;
use crate::order::{OrderId, OrderRecord, Price, Quantity};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why an order was refused at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum RejectReason {
    /// Market order with nothing on the opposing side
    NoLiquidity = 0,
    /// Cancel half of a modify failed
    ModifyFailed = 1,
    /// Order arena is full
    Capacity = 2,
}

impl RejectReason {
    pub(crate) fn label(self) -> &'static str {
        match self {
            RejectReason::NoLiquidity => "NO MARKET LIQUIDITY",
            RejectReason::ModifyFailed => "MODIFY FAILED",
            RejectReason::Capacity => "ENGINE AT CAPACITY",
        }
    }
}

/// A lifecycle transition observed during one engine operation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderEvent {
    /// Order admitted and resting (or awaiting its matching pass)
    Open { id: OrderId },
    /// One fill step; `remaining == 0.0` means the order is done
    Fill {
        id: OrderId,
        price: Price,
        qty: Quantity,
        remaining: Quantity,
    },
    /// Open limit order removed by the owner (or market residual dropped)
    Cancel { id: OrderId },
    /// Order re-entered with new parameters, id preserved
    Modify { id: OrderId },
    /// Admission refused; the record is retained in `Rejected` state
    Reject { id: OrderId, reason: RejectReason },
}

/// Strategy callback contract.
///
/// Hooks run inline on the shard's worker thread right after the engine
/// operation that produced them, so implementations must not block.
/// `on_book_update` gets read-only access to the engine; follow-up orders
/// are submitted from the driver loop between batches.
///
/// All hooks default to no-ops - implement only what the strategy needs.
pub trait MarketListener: Send {
    /// The book changed (admission, fill, cancel, or modify).
    fn on_book_update(&mut self, _ticker: &str, _engine: &OrderEngine) {}

    /// One of the tracked orders traded.
    fn on_fill(&mut self, _ticker: &str, _id: OrderId, _price: Price, _qty: Quantity) {}

    /// An order was cancelled.
    fn on_cancel(&mut self, _ticker: &str, _id: OrderId) {}

    /// An order was rejected at admission.
    fn on_reject(&mut self, _ticker: &str, _id: OrderId, _reason: RejectReason) {}
}

/// Listener that does nothing; useful as a test stand-in.
pub struct NoOpListener;

impl MarketListener for NoOpListener {}

/// Emit the single-line notification for one event.
///
/// Format: `[TICKER] | [STATE] | TYPE: LIMIT|MARKET | ID: <id> |
/// SIDE: BUY|SELL | QTY: <qty> | PRICE: <price> | TIME: <epoch-nanos>`.
pub(crate) fn notify(ticker: &str, event: &OrderEvent, record: &OrderRecord) {
    let side = match record.side {
        crate::order::Side::Bid => "BUY",
        crate::order::Side::Ask => "SELL",
    };
    let kind = match record.kind {
        crate::order::OrderKind::Limit => "LIMIT",
        crate::order::OrderKind::Market => "MARKET",
    };

    let (state, qty) = match event {
        OrderEvent::Open { .. } => ("[OPEN]".to_string(), record.qty),
        OrderEvent::Fill { qty, remaining, .. } => {
            let state = if *remaining == 0.0 {
                "[FILLED]"
            } else {
                "[PARTIALLY FILLED]"
            };
            (state.to_string(), *qty)
        }
        OrderEvent::Cancel { .. } => ("[CANCELED]".to_string(), record.qty),
        OrderEvent::Modify { .. } => ("[MODIFIED]".to_string(), record.qty),
        OrderEvent::Reject { reason, .. } => (format!("[REJECTED: {}]", reason.label()), record.qty),
    };

    tracing::info!(
        target: "shard_lob::notify",
        "[{}] | {} | TYPE: {} | ID: {} | SIDE: {} | QTY: {} | PRICE: {} | TIME: {}",
        ticker,
        state,
        kind,
        record.id,
        side,
        qty,
        record.price,
        crate::order::now_nanos(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_labels() {
        assert_eq!(RejectReason::NoLiquidity.label(), "NO MARKET LIQUIDITY");
        assert_eq!(RejectReason::Capacity.label(), "ENGINE AT CAPACITY");
    }

    #[test]
    fn test_fill_event_full_vs_partial() {
        let full = OrderEvent::Fill {
            id: 1,
            price: 100.0,
            qty: 10.0,
            remaining: 0.0,
        };
        let partial = OrderEvent::Fill {
            id: 1,
            price: 100.0,
            qty: 5.0,
            remaining: 5.0,
        };
        assert_ne!(full, partial);
    }
}
