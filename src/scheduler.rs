//! Job scheduler - N worker threads, one double-buffered SPSC queue each.
//!
//! Jobs are routed by `owner_id % num_workers`, so every owner (engine)
//! lands on a fixed worker and all of its jobs execute in submission
//! order on that one thread. Flushing a queue commits the batch; workers
//! drain their read buffers and yield when idle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::double_buffer::DoubleBuffer;

pub type WorkerId = usize;

/// A unit of work: the operation itself plus a cleanup step that releases
/// the job's argument slot. Both run on the owning worker, in that order.
pub struct Job {
    execute: Box<dyn FnOnce() + Send + 'static>,
    cleanup: Box<dyn FnOnce() + Send + 'static>,
    /// Routing key; `owner_id % num_workers` picks the worker
    owner_id: usize,
}

impl Job {
    pub fn new(
        execute: impl FnOnce() + Send + 'static,
        cleanup: impl FnOnce() + Send + 'static,
        owner_id: usize,
    ) -> Self {
        Self {
            execute: Box::new(execute),
            cleanup: Box::new(cleanup),
            owner_id,
        }
    }

    #[inline]
    pub fn owner_id(&self) -> usize {
        self.owner_id
    }

    fn run(self) {
        (self.execute)();
        (self.cleanup)();
    }
}

struct Shared {
    queues: Vec<DoubleBuffer<Job>>,
    /// Jobs pushed per worker (written by the submitting thread)
    submitted: Vec<AtomicU64>,
    /// Jobs fully executed per worker (written by that worker).
    /// A queue reads empty the moment its last job is popped, while the
    /// job may still be running; completion is judged against these
    /// counters so drained means executed.
    completed: Vec<AtomicU64>,
    running: AtomicBool,
}

/// Sharded worker pool over per-worker SPSC queues.
///
/// Submission must come from a single driver thread - each queue has
/// exactly one producer (the submitter) and one consumer (its worker).
pub struct JobScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    num_workers: usize,
    batch_capacity: usize,
}

impl JobScheduler {
    /// Spawn `num_workers` workers, each with a queue holding up to
    /// `batch_capacity` jobs per buffer.
    pub fn new(num_workers: usize, batch_capacity: usize) -> Self {
        assert!(num_workers >= 1, "Need at least one worker");

        let shared = Arc::new(Shared {
            queues: (0..num_workers)
                .map(|_| DoubleBuffer::with_capacity(batch_capacity))
                .collect(),
            submitted: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
            completed: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
            running: AtomicBool::new(true),
        });

        let workers = (0..num_workers)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("lob-worker-{worker_id}"))
                    .spawn(move || worker_loop(shared, worker_id))
                    .expect("Failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers,
            num_workers,
            batch_capacity,
        }
    }

    /// Submit a job to its owner's queue, yielding and retrying while the
    /// queue is full or mid-swap. Returns the worker it landed on.
    pub fn submit(&self, job: Job) -> WorkerId {
        let worker_id = job.owner_id % self.num_workers;
        let queue = &self.shared.queues[worker_id];

        let mut job = job;
        loop {
            match queue.try_push(job) {
                Ok(()) => break,
                Err(returned) => {
                    job = returned;
                    thread::yield_now();
                }
            }
        }
        self.shared.submitted[worker_id].fetch_add(1, Ordering::Release);
        worker_id
    }

    /// Commit all pending batches and wait for every queue to drain.
    pub fn process_jobs(&self) {
        self.flush_all();
        self.wait_for_completion();
    }

    /// Commit all pending batches and return immediately.
    pub fn process_jobs_async(&self) {
        self.flush_all();
    }

    /// Commit one shard's batch and wait for that queue to drain.
    pub fn process_jobs_on(&self, worker_id: WorkerId) {
        self.shared.queues[worker_id].flush();
        self.wait_for_worker(worker_id);
    }

    /// Commit one shard's batch and return immediately.
    pub fn process_jobs_on_async(&self, worker_id: WorkerId) {
        self.shared.queues[worker_id].flush();
    }

    /// True when every submitted job has finished executing.
    pub fn is_complete(&self) -> bool {
        (0..self.num_workers).all(|w| self.is_worker_complete(w))
    }

    /// True when every job submitted to one shard has finished executing.
    pub fn is_worker_complete(&self, worker_id: WorkerId) -> bool {
        let submitted = self.shared.submitted[worker_id].load(Ordering::Acquire);
        let completed = self.shared.completed[worker_id].load(Ordering::Acquire);
        completed >= submitted
    }

    /// True when one shard's write buffer has no room before a flush.
    pub fn is_worker_full(&self, worker_id: WorkerId) -> bool {
        self.shared.queues[worker_id].is_full()
    }

    /// Spin-yield until every queue is drained.
    pub fn wait_for_completion(&self) {
        while !self.is_complete() {
            thread::yield_now();
        }
    }

    /// Spin-yield until one shard's queue is drained.
    pub fn wait_for_worker(&self, worker_id: WorkerId) {
        while !self.is_worker_complete(worker_id) {
            thread::yield_now();
        }
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    fn flush_all(&self) {
        for queue in &self.shared.queues {
            queue.flush();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Commit and drain whatever is still pending, then stop and join.
        self.flush_all();
        self.wait_for_completion();
        self.shared.running.store(false, Ordering::SeqCst);

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    while shared.running.load(Ordering::Acquire) {
        match shared.queues[worker_id].try_pop() {
            Some(job) => {
                job.run();
                shared.completed[worker_id].fetch_add(1, Ordering::Release);
            }
            None => thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counting_job(counter: &Arc<AtomicUsize>, owner_id: usize) -> Job {
        let counter = Arc::clone(counter);
        Job::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            || {},
            owner_id,
        )
    }

    #[test]
    fn test_jobs_run_after_flush() {
        let scheduler = JobScheduler::new(2, 64);
        let counter = Arc::new(AtomicUsize::new(0));

        for owner in 0..10 {
            scheduler.submit(counting_job(&counter, owner));
        }

        // Nothing runs before the batch is committed
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.process_jobs();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(scheduler.is_complete());
    }

    #[test]
    fn test_execute_then_cleanup_in_order() {
        let scheduler = JobScheduler::new(1, 16);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let l2 = Arc::clone(&log);
        scheduler.submit(Job::new(
            move || l1.lock().unwrap().push("execute"),
            move || l2.lock().unwrap().push("cleanup"),
            0,
        ));
        scheduler.process_jobs();

        assert_eq!(log.lock().unwrap().as_slice(), &["execute", "cleanup"]);
    }

    #[test]
    fn test_same_owner_same_worker_fifo() {
        let scheduler = JobScheduler::new(4, 256);
        let log = Arc::new(Mutex::new(Vec::new()));

        const OWNER: usize = 7;
        for i in 0..100usize {
            let log = Arc::clone(&log);
            scheduler.submit(Job::new(
                move || log.lock().unwrap().push(i),
                || {},
                OWNER,
            ));
        }
        scheduler.process_jobs();

        let seen = log.lock().unwrap().clone();
        let expected: Vec<usize> = (0..100).collect();
        assert_eq!(seen, expected, "One owner's jobs run in submission order");
    }

    #[test]
    fn test_routing_is_stable() {
        let scheduler = JobScheduler::new(3, 16);
        let job_a = Job::new(|| {}, || {}, 5);
        let job_b = Job::new(|| {}, || {}, 5);
        assert_eq!(scheduler.submit(job_a), scheduler.submit(job_b));
        scheduler.process_jobs();
    }

    #[test]
    fn test_per_shard_flush() {
        let scheduler = JobScheduler::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.submit(counting_job(&counter, 0)); // worker 0
        scheduler.submit(counting_job(&counter, 1)); // worker 1

        scheduler.process_jobs_on(0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_worker_complete(0));
        assert!(!scheduler.is_worker_complete(1));

        scheduler.process_jobs();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_async_flush_then_wait() {
        let scheduler = JobScheduler::new(2, 1024);
        let counter = Arc::new(AtomicUsize::new(0));

        for owner in 0..500 {
            scheduler.submit(counting_job(&counter, owner));
        }

        scheduler.process_jobs_async();
        scheduler.wait_for_completion();
        assert_eq!(counter.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn test_backpressure_push_past_capacity() {
        // More jobs than one buffer holds; submit yields through flushes
        let scheduler = JobScheduler::new(1, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        for batch in 0..4 {
            for _ in 0..8 {
                scheduler.submit(counting_job(&counter, 0));
            }
            if batch < 3 {
                scheduler.process_jobs_async();
            }
        }
        scheduler.process_jobs();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_drop_drains_pending_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = JobScheduler::new(2, 64);
            for owner in 0..20 {
                scheduler.submit(counting_job(&counter, owner));
            }
            // No explicit flush - Drop commits the batch
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
