//! Error taxonomy for the runtime and engines.

use crate::order::{OrderId, Quantity, Side, UserId};
use thiserror::Error;

/// Failures surfaced by runtime operations and engine admission.
///
/// Async operations additionally write the sentinel into the caller's
/// result cell; errors never cross the submission boundary as panics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("price must be > 0")]
    InvalidPrice,

    #[error("quantity must be > 0")]
    InvalidQuantity,

    #[error("stock does not exist: {0}")]
    UnknownTicker(String),

    #[error("stock already exists: {0}")]
    TickerExists(String),

    #[error("user {user} does not have sufficient shares to sell {requested}")]
    InsufficientShares { user: UserId, requested: Quantity },

    #[error("no market liquidity on the {0:?} side")]
    NoOpposingLiquidity(Side),

    #[error("order does not exist: {0}")]
    UnknownOrder(OrderId),

    #[error("order {0} is not an open limit order")]
    NotCancellable(OrderId),

    #[error("job argument arena is full - flush the batch or raise the capacity")]
    ArenaFull,

    #[error("order arena is full")]
    OrderCapacity,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
