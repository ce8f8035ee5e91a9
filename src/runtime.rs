//! Engine runtime - the public operation surface over sharded engines.
//!
//! Owns the ticker registry, assigns each engine to a worker shard,
//! validates requests before they are enqueued (including the
//! share-ownership check for asks), tracks per-user holdings, and
//! commits batches to the scheduler.
//!
//! Submission is single-threaded: the driver thread is the only producer
//! for every shard queue. Reads are synchronous and see a submitted
//! write only after the owning shard has drained
//! ([`EngineRuntime::wait_for_completion`] or
//! [`EngineRuntime::is_engine_completed`]).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::Arena;
use crate::engine::OrderEngine;
use crate::error::{Result, RuntimeError};
use crate::order::{
    OrderId, OrderKind, OrderRecord, OrderStatus, Price, Quantity, Side, UserId, IPO_HOLDER,
    NIL_ORDER_ID, NO_PRICE,
};
use crate::scheduler::{Job, JobScheduler, WorkerId};

/// Monotonic engine identifier; also the job routing key.
pub type EngineId = u32;

/// Per-user order tracking: user -> ticker -> resting order ids.
type UserOrderMap = FxHashMap<UserId, FxHashMap<String, FxHashSet<OrderId>>>;

// ============================================================================
// Result Cells
// ============================================================================

/// Caller-provided cell an async order operation writes its id into.
/// Starts at the failure sentinel; read it after the batch has drained.
pub struct OrderIdCell(AtomicU32);

impl OrderIdCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU32::new(NIL_ORDER_ID)))
    }

    #[inline]
    pub fn get(&self) -> OrderId {
        self.0.load(Ordering::Acquire)
    }

    /// True once a non-sentinel id has been delivered.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.get() != NIL_ORDER_ID
    }

    #[inline]
    fn set(&self, id: OrderId) {
        self.0.store(id, Ordering::Release);
    }
}

/// Caller-provided cell a cancel writes its outcome into.
pub struct AckCell(AtomicBool);

impl AckCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn set(&self, ok: bool) {
        self.0.store(ok, Ordering::Release);
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Runtime construction parameters, fixed for the runtime's lifetime
/// (except where a setter exists).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Worker threads; engines are assigned round-robin by id
    pub num_workers: usize,
    /// Order-arena capacity for engines registered without an override
    pub default_capacity: usize,
    /// Auto-flush a shard once one of its engines accumulates this many
    /// submissions; 0 means manual batching only
    pub batch_size: usize,
    /// Per-buffer capacity of each shard queue
    pub queue_capacity: usize,
    /// Engines emit lifecycle notifications
    pub verbose: bool,
    /// `execute_batch` waits for the drain instead of returning at once
    pub blocking: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            default_capacity: 100_000,
            batch_size: 0,
            queue_capacity: 16_384,
            verbose: false,
            blocking: true,
        }
    }
}

// ============================================================================
// Job Plumbing
// ============================================================================

/// Parameters of one submitted operation, slabbed per worker. The job
/// holds the slot index; cleanup frees it after execution.
#[derive(Clone)]
struct OrderJobArgs {
    engine: Arc<Mutex<OrderEngine>>,
    side: Side,
    kind: OrderKind,
    price: Price,
    qty: Quantity,
    order_id: OrderId,
    user_id: UserId,
    result_id: Option<Arc<OrderIdCell>>,
    result_ack: Option<Arc<AckCell>>,
}

type ArgsArena = Arc<Mutex<Arena<OrderJobArgs>>>;

struct EngineSlot {
    engine: Arc<Mutex<OrderEngine>>,
    #[allow(dead_code)]
    ipo_shares: Quantity,
    engine_id: EngineId,
    worker_id: WorkerId,
    /// Submissions since this engine's shard last flushed
    batch_count: usize,
}

// ============================================================================
// Runtime
// ============================================================================

/// Registry of instruments plus the sharded execution machinery behind
/// the public operation surface.
pub struct EngineRuntime {
    scheduler: JobScheduler,
    engines: FxHashMap<String, EngineSlot>,
    /// One argument slab per worker shard
    arg_arenas: Vec<ArgsArena>,
    /// Written by workers inside job bodies, read here for validation
    user_orders: Arc<Mutex<UserOrderMap>>,
    next_engine_id: EngineId,
    num_workers: usize,
    default_capacity: usize,
    batch_size: usize,
    verbose: bool,
    blocking: bool,
}

impl EngineRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let num_workers = config.num_workers.max(1);
        // Both queue buffers can be in flight at once
        let arena_capacity = (2 * config.queue_capacity).max(config.batch_size);

        Self {
            scheduler: JobScheduler::new(num_workers, config.queue_capacity),
            engines: FxHashMap::default(),
            arg_arenas: (0..num_workers)
                .map(|_| Arc::new(Mutex::new(Arena::with_capacity(arena_capacity))))
                .collect(),
            user_orders: Arc::new(Mutex::new(UserOrderMap::default())),
            next_engine_id: 0,
            num_workers,
            default_capacity: config.default_capacity,
            batch_size: config.batch_size,
            verbose: config.verbose,
            blocking: config.blocking,
        }
    }

    // ========================================================================
    // Instrument Lifecycle
    // ========================================================================

    /// Register a new instrument and seed it with the IPO ask, owned by
    /// the reserved IPO holder (user 0).
    pub fn register_stock(
        &mut self,
        ticker: &str,
        ipo_price: Price,
        ipo_qty: Quantity,
        capacity: Option<usize>,
    ) -> Result<()> {
        if ipo_price <= 0.0 {
            return Err(RuntimeError::InvalidPrice);
        }
        if ipo_qty <= 0.0 {
            return Err(RuntimeError::InvalidQuantity);
        }
        if self.engines.contains_key(ticker) {
            return Err(RuntimeError::TickerExists(ticker.to_string()));
        }

        let engine_capacity = capacity.unwrap_or(self.default_capacity);
        let engine_id = self.next_engine_id;
        self.next_engine_id += 1;
        let worker_id = engine_id as usize % self.num_workers;

        let mut engine = OrderEngine::new(ticker, engine_capacity);
        engine.set_verbose(self.verbose);

        // The IPO resting liquidity; placed directly, before any jobs can
        // target this engine.
        let ipo_order = engine.place_order(Side::Ask, OrderKind::Limit, ipo_price, ipo_qty)?;
        self.user_orders
            .lock()
            .entry(IPO_HOLDER)
            .or_default()
            .entry(ticker.to_string())
            .or_default()
            .insert(ipo_order);

        self.engines.insert(
            ticker.to_string(),
            EngineSlot {
                engine: Arc::new(Mutex::new(engine)),
                ipo_shares: ipo_qty,
                engine_id,
                worker_id,
                batch_count: 0,
            },
        );

        if self.verbose {
            tracing::info!(
                target: "shard_lob::runtime",
                "registered {ticker} with IPO {ipo_qty} shares @ {ipo_price} (user {IPO_HOLDER}), shard {worker_id}"
            );
        }
        Ok(())
    }

    /// Remove an instrument after draining its shard. Per-user order ids
    /// for the ticker are dropped as well.
    pub fn unregister_stock(&mut self, ticker: &str) -> Result<()> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;

        self.scheduler.process_jobs_on(slot.worker_id);
        self.engines.remove(ticker);

        let mut users = self.user_orders.lock();
        for tickers in users.values_mut() {
            tickers.remove(ticker);
        }

        if self.verbose {
            tracing::info!(target: "shard_lob::runtime", "unregistered {ticker}");
        }
        Ok(())
    }

    /// Drain all shards and clear every engine, holding, and argument
    /// slab. Ticker names become reusable.
    pub fn reset(&mut self) {
        self.scheduler.process_jobs();
        self.engines.clear();
        self.user_orders.lock().clear();
        self.next_engine_id = 0;
        for arena in &self.arg_arenas {
            arena.lock().reset();
        }
    }

    // ========================================================================
    // Order Operations (async - results land in the caller's cells)
    // ========================================================================

    /// Submit a limit order. The assigned id (or the sentinel) is written
    /// into `result` when the owning shard executes the job.
    pub fn limit_order(
        &mut self,
        ticker: &str,
        side: Side,
        price: Price,
        qty: Quantity,
        result: &Arc<OrderIdCell>,
        user_id: UserId,
    ) -> Result<()> {
        if let Err(err) = self.validate_order(ticker, side, price, qty, user_id) {
            result.set(NIL_ORDER_ID);
            return Err(err);
        }
        self.enqueue_order(ticker, side, OrderKind::Limit, price, qty, user_id, result)
    }

    /// Submit a market order; the execution price is taken from the best
    /// opposing level when the job runs.
    pub fn market_order(
        &mut self,
        ticker: &str,
        side: Side,
        qty: Quantity,
        result: &Arc<OrderIdCell>,
        user_id: UserId,
    ) -> Result<()> {
        // Market orders carry no caller price; skip the price check.
        if let Err(err) = self.validate_order(ticker, side, 1.0, qty, user_id) {
            result.set(NIL_ORDER_ID);
            return Err(err);
        }
        self.enqueue_order(
            ticker,
            side,
            OrderKind::Market,
            NO_PRICE,
            qty,
            user_id,
            result,
        )
    }

    /// Submit a cancel. The outcome is written into `result`.
    pub fn cancel_order(
        &mut self,
        ticker: &str,
        order_id: OrderId,
        result: &Arc<AckCell>,
        user_id: UserId,
    ) -> Result<()> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;

        let args = OrderJobArgs {
            engine: Arc::clone(&slot.engine),
            side: Side::Bid, // unused by cancel
            kind: OrderKind::Limit,
            price: 0.0,
            qty: 0.0,
            order_id,
            user_id,
            result_id: None,
            result_ack: Some(Arc::clone(result)),
        };
        let engine_id = slot.engine_id;
        let worker_id = slot.worker_id;

        let (arena, idx) = self.slab_args(worker_id, args)?;
        let ticker_name = ticker.to_string();
        let user_orders = Arc::clone(&self.user_orders);

        let exec_arena = Arc::clone(&arena);
        let execute = move || {
            let args = exec_arena.lock()[idx].clone();
            let ok = args.engine.lock().cancel_order(args.order_id).is_ok();
            if let Some(cell) = &args.result_ack {
                cell.set(ok);
            }
            if ok {
                let mut users = user_orders.lock();
                if let Some(orders) = users
                    .get_mut(&args.user_id)
                    .and_then(|t| t.get_mut(&ticker_name))
                {
                    orders.remove(&args.order_id);
                }
            }
        };
        let cleanup = move || arena.lock().free(idx);

        self.submit_routed(worker_id, Job::new(execute, cleanup, engine_id as usize));
        self.bump_batch(ticker);
        Ok(())
    }

    /// Submit a modify (cancel + reinsert, id preserved). The preserved
    /// id (or the sentinel) is written into `result`.
    pub fn edit_order(
        &mut self,
        ticker: &str,
        order_id: OrderId,
        side: Side,
        price: Price,
        qty: Quantity,
        result: &Arc<OrderIdCell>,
    ) -> Result<()> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;

        let args = OrderJobArgs {
            engine: Arc::clone(&slot.engine),
            side,
            kind: OrderKind::Limit,
            price,
            qty,
            order_id,
            user_id: IPO_HOLDER, // edits do not change ownership
            result_id: Some(Arc::clone(result)),
            result_ack: None,
        };
        let engine_id = slot.engine_id;
        let worker_id = slot.worker_id;

        let (arena, idx) = self.slab_args(worker_id, args)?;

        let exec_arena = Arc::clone(&arena);
        let execute = move || {
            let args = exec_arena.lock()[idx].clone();
            let outcome = args
                .engine
                .lock()
                .edit_order(args.order_id, args.side, args.price, args.qty);
            if let Some(cell) = &args.result_id {
                cell.set(outcome.unwrap_or(NIL_ORDER_ID));
            }
        };
        let cleanup = move || arena.lock().free(idx);

        self.submit_routed(worker_id, Job::new(execute, cleanup, engine_id as usize));
        self.bump_batch(ticker);
        Ok(())
    }

    // ========================================================================
    // Read Queries (sync; order reads after the relevant drain)
    // ========================================================================

    /// Look up an order in any state.
    pub fn get_order(&self, ticker: &str, order_id: OrderId) -> Option<OrderRecord> {
        let slot = self.engines.get(ticker)?;
        let engine = slot.engine.lock();
        engine.get_order(order_id).copied()
    }

    /// Best bid, or the no-data sentinel when the side is empty or the
    /// ticker is unknown.
    pub fn get_best_bid(&self, ticker: &str) -> Price {
        self.engines
            .get(ticker)
            .and_then(|slot| slot.engine.lock().best_bid())
            .unwrap_or(NO_PRICE)
    }

    /// Best ask, or the no-data sentinel.
    pub fn get_best_ask(&self, ticker: &str) -> Price {
        self.engines
            .get(ticker)
            .and_then(|slot| slot.engine.lock().best_ask())
            .unwrap_or(NO_PRICE)
    }

    /// Last trade price, or the no-data sentinel before the first trade.
    pub fn get_market_price(&self, ticker: &str) -> Price {
        self.engines
            .get(ticker)
            .map(|slot| slot.engine.lock().market_price())
            .unwrap_or(NO_PRICE)
    }

    /// All of a ticker's orders in the given state.
    pub fn get_orders_by_status(&self, ticker: &str, status: OrderStatus) -> Vec<OrderRecord> {
        self.engines
            .get(ticker)
            .map(|slot| slot.engine.lock().orders_by_status(status))
            .unwrap_or_default()
    }

    /// Top-of-book ladder: up to `depth` `(price, quantity)` pairs.
    pub fn get_market_depth(
        &self,
        ticker: &str,
        side: Side,
        depth: usize,
    ) -> Vec<(Price, Quantity)> {
        self.engines
            .get(ticker)
            .map(|slot| slot.engine.lock().market_depth(side, depth))
            .unwrap_or_default()
    }

    /// Registered tickers, in no particular order.
    pub fn list_tickers(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    /// Shared handle to an instrument's engine.
    pub fn get_engine(&self, ticker: &str) -> Option<Arc<Mutex<OrderEngine>>> {
        self.engines.get(ticker).map(|slot| Arc::clone(&slot.engine))
    }

    /// Order ids the user holds for a ticker.
    pub fn get_positions(&self, user_id: UserId, ticker: &str) -> Vec<OrderId> {
        let users = self.user_orders.lock();
        users
            .get(&user_id)
            .and_then(|tickers| tickers.get(ticker))
            .map(|orders| orders.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Inventory check backing ask validation: the sum of remaining
    /// quantity over the user's OPEN ASK orders for the ticker.
    pub fn has_sufficient_shares(&self, user_id: UserId, ticker: &str, qty: Quantity) -> bool {
        let users = self.user_orders.lock();
        let Some(order_ids) = users.get(&user_id).and_then(|t| t.get(ticker)) else {
            return false;
        };
        let Some(slot) = self.engines.get(ticker) else {
            return false;
        };

        let engine = slot.engine.lock();
        let mut total: Quantity = 0.0;
        for &order_id in order_ids {
            if let Some(order) = engine.get_order(order_id) {
                if order.status == OrderStatus::Open && order.side == Side::Ask {
                    total += order.qty;
                }
            }
        }
        total >= qty
    }

    // ========================================================================
    // Batch Control
    // ========================================================================

    /// Commit every shard's pending batch. Waits for the drain in
    /// blocking mode, returns immediately otherwise.
    pub fn execute_batch(&mut self) {
        if self.blocking {
            self.scheduler.process_jobs();
        } else {
            self.scheduler.process_jobs_async();
        }
        for slot in self.engines.values_mut() {
            slot.batch_count = 0;
        }
    }

    /// Commit one shard's pending batch.
    pub fn execute_batch_on(&mut self, worker_id: WorkerId) {
        if self.blocking {
            self.scheduler.process_jobs_on(worker_id);
        } else {
            self.scheduler.process_jobs_on_async(worker_id);
        }
        for slot in self.engines.values_mut() {
            if slot.worker_id == worker_id {
                slot.batch_count = 0;
            }
        }
    }

    /// Block until every shard has drained.
    pub fn wait_for_completion(&self) {
        self.scheduler.wait_for_completion();
    }

    /// True when every shard has drained.
    pub fn all_jobs_completed(&self) -> bool {
        self.scheduler.is_complete()
    }

    /// True when the shard owning `ticker` has drained.
    pub fn is_engine_completed(&self, ticker: &str) -> Result<bool> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;
        Ok(self.scheduler.is_worker_complete(slot.worker_id))
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_blocking_mode(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub fn blocking_mode(&self) -> bool {
        self.blocking
    }

    /// Change the auto-flush threshold; counters restart from zero.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        for slot in self.engines.values_mut() {
            slot.batch_count = 0;
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Toggle auto-matching for one instrument.
    pub fn set_auto_match(&mut self, ticker: &str, auto_match: bool) -> Result<()> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;
        slot.engine.lock().set_auto_match(auto_match);
        Ok(())
    }

    pub fn get_auto_match(&self, ticker: &str) -> Result<bool> {
        let slot = self
            .engines
            .get(ticker)
            .ok_or_else(|| RuntimeError::UnknownTicker(ticker.to_string()))?;
        Ok(slot.engine.lock().auto_match())
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn validate_order(
        &self,
        ticker: &str,
        side: Side,
        price: Price,
        qty: Quantity,
        user_id: UserId,
    ) -> Result<()> {
        if !self.engines.contains_key(ticker) {
            return Err(RuntimeError::UnknownTicker(ticker.to_string()));
        }
        if price <= 0.0 {
            return Err(RuntimeError::InvalidPrice);
        }
        if qty <= 0.0 {
            return Err(RuntimeError::InvalidQuantity);
        }
        // Sells require inventory, like a cash brokerage account
        if side == Side::Ask && !self.has_sufficient_shares(user_id, ticker, qty) {
            return Err(RuntimeError::InsufficientShares {
                user: user_id,
                requested: qty,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue_order(
        &mut self,
        ticker: &str,
        side: Side,
        kind: OrderKind,
        price: Price,
        qty: Quantity,
        user_id: UserId,
        result: &Arc<OrderIdCell>,
    ) -> Result<()> {
        let slot = &self.engines[ticker];
        let args = OrderJobArgs {
            engine: Arc::clone(&slot.engine),
            side,
            kind,
            price,
            qty,
            order_id: NIL_ORDER_ID,
            user_id,
            result_id: Some(Arc::clone(result)),
            result_ack: None,
        };
        let engine_id = slot.engine_id;
        let worker_id = slot.worker_id;

        let (arena, idx) = match self.slab_args(worker_id, args) {
            Ok(pair) => pair,
            Err(err) => {
                result.set(NIL_ORDER_ID);
                return Err(err);
            }
        };
        let ticker_name = ticker.to_string();
        let user_orders = Arc::clone(&self.user_orders);

        let exec_arena = Arc::clone(&arena);
        let execute = move || {
            let args = exec_arena.lock()[idx].clone();
            let outcome = args
                .engine
                .lock()
                .place_order(args.side, args.kind, args.price, args.qty);
            match outcome {
                Ok(id) => {
                    if let Some(cell) = &args.result_id {
                        cell.set(id);
                    }
                    user_orders
                        .lock()
                        .entry(args.user_id)
                        .or_default()
                        .entry(ticker_name)
                        .or_default()
                        .insert(id);
                }
                Err(_) => {
                    if let Some(cell) = &args.result_id {
                        cell.set(NIL_ORDER_ID);
                    }
                }
            }
        };
        let cleanup = move || arena.lock().free(idx);

        self.submit_routed(worker_id, Job::new(execute, cleanup, engine_id as usize));
        self.bump_batch(ticker);
        Ok(())
    }

    /// The write side of a shard queue only frees up on a flush; when it
    /// is full, commit the shard's batch early instead of spinning.
    fn submit_routed(&self, worker_id: WorkerId, job: Job) {
        if self.scheduler.is_worker_full(worker_id) {
            self.scheduler.process_jobs_on_async(worker_id);
        }
        self.scheduler.submit(job);
    }

    /// Slab the args into the shard's arena; the returned index rides
    /// inside the job closures.
    fn slab_args(
        &self,
        worker_id: WorkerId,
        args: OrderJobArgs,
    ) -> Result<(ArgsArena, crate::arena::SlotIndex)> {
        let arena = Arc::clone(&self.arg_arenas[worker_id]);
        let idx = arena.lock().insert(args).ok_or(RuntimeError::ArenaFull)?;
        Ok((arena, idx))
    }

    fn bump_batch(&mut self, ticker: &str) {
        if self.batch_size == 0 {
            return;
        }
        let Some(slot) = self.engines.get_mut(ticker) else {
            return;
        };
        slot.batch_count += 1;
        if slot.batch_count >= self.batch_size {
            let worker_id = slot.worker_id;
            self.execute_batch_on(worker_id);
        }
    }
}

impl Default for EngineRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
