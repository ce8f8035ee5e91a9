//! # Shard-LOB
//!
//! A multi-instrument limit order book matching engine with a batched,
//! shard-parallel execution runtime for backtesting workloads.
//!
//! ## Design Principles
//!
//! - **Single-Writer Shards**: every instrument is pinned to one worker
//!   thread; its book is never mutated from two threads
//! - **Batch Commit**: submissions accumulate in per-shard double
//!   buffers and become visible to workers on flush
//! - **Arena Allocation**: orders and job arguments live in slabs
//!   addressed by 32-bit indices
//! - **Price-Time Priority**: heap ladders over price, FIFO heaps of
//!   `(timestamp, id)` inside each level
//!
//! ## Architecture
//!
//! ```text
//! [Driver Thread] --> validate --> [SPSC Double Buffer] x N shards
//!                                          |
//!                                   [Worker Thread]
//!                                          |
//!                              [OrderEngine -> OrderBook]
//! ```
//!
//! The driver thread owns submission; results come back through atomic
//! result cells once the owning shard drains.

pub mod arena;
pub mod double_buffer;
pub mod engine;
pub mod error;
pub mod events;
pub mod heap;
pub mod order;
pub mod order_book;
pub mod runtime;
pub mod scheduler;

// Re-exports for convenience
pub use arena::{Arena, SlotIndex, NIL_INDEX};
pub use double_buffer::DoubleBuffer;
pub use engine::OrderEngine;
pub use error::{Result, RuntimeError};
pub use events::{MarketListener, NoOpListener, OrderEvent, RejectReason};
pub use heap::{Heap, Max, MaxHeap, Min, MinHeap};
pub use order::{
    OrderId, OrderKind, OrderRecord, OrderStatus, Price, Quantity, Side, Timestamp, UserId,
    IPO_HOLDER, NIL_ORDER_ID, NO_PRICE,
};
pub use order_book::{OrderBook, OrderLevel};
pub use runtime::{AckCell, EngineId, EngineRuntime, OrderIdCell, RuntimeConfig};
pub use scheduler::{Job, JobScheduler, WorkerId};
