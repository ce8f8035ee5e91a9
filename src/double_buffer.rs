//! Double-buffered SPSC queue with explicit flush.
//!
//! Two fixed-capacity slot arrays: the producer fills the write buffer,
//! the consumer drains the read buffer. `flush` publishes the pending
//! writes by swapping the two, after waiting for the consumer to finish
//! the current read buffer. This gives the scheduler its batch-commit
//! semantics: nothing submitted is visible to a worker until the batch
//! is flushed.
//!
//! # Contract
//!
//! Exactly one producer thread (calling `try_push` and `flush`) and one
//! consumer thread (calling `try_pop`). The scheduler guarantees this by
//! routing each owner to a fixed worker. All synchronization is atomic
//! flags and indices with release/acquire pairing plus cooperative
//! yield - no OS blocking primitives.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct DoubleBuffer<T> {
    /// The two slot arrays; `write_sel` picks the write side, the other
    /// is the read side.
    buffers: [UnsafeCell<Box<[Option<T>]>>; 2],

    /// Which buffer the producer is currently writing (0 or 1)
    write_sel: AtomicUsize,

    /// Producer wants to swap; producer sets, producer clears
    swap_requested: AtomicBool,

    /// Next slot the consumer will read
    read_index: AtomicUsize,

    /// Next slot the producer will write
    write_index: AtomicUsize,

    /// Number of valid slots in the read buffer
    read_size: AtomicUsize,

    capacity: usize,
}

// SAFETY: the SPSC protocol above partitions all slot access - the
// producer only touches the write buffer, the consumer only touches the
// read buffer while `read_index < read_size`, and `flush` swaps the two
// only after the consumer has drained. T just needs to be sendable
// across the handoff.
unsafe impl<T: Send> Send for DoubleBuffer<T> {}
unsafe impl<T: Send> Sync for DoubleBuffer<T> {}

impl<T> DoubleBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        let alloc = || {
            (0..capacity)
                .map(|_| None)
                .collect::<Vec<_>>()
                .into_boxed_slice()
        };
        Self {
            buffers: [UnsafeCell::new(alloc()), UnsafeCell::new(alloc())],
            write_sel: AtomicUsize::new(0),
            swap_requested: AtomicBool::new(false),
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
            read_size: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Producer: append a value to the write buffer.
    ///
    /// Fails (returning the value) while a swap is in progress or when
    /// the write buffer is full; the caller yields and retries.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        if self.swap_requested.load(Ordering::Acquire) {
            return Err(value);
        }

        let widx = self.write_index.load(Ordering::Relaxed);
        if widx >= self.capacity {
            return Err(value);
        }

        let sel = self.write_sel.load(Ordering::Relaxed);
        // SAFETY: only the producer touches the write buffer, and `widx`
        // is in bounds.
        unsafe {
            (*self.buffers[sel].get())[widx] = Some(value);
        }
        self.write_index.store(widx + 1, Ordering::Release);
        Ok(())
    }

    /// Producer: publish pending writes to the read side.
    ///
    /// Waits (yielding) until the consumer has drained the current read
    /// buffer, then swaps the buffers and resets the indices. No-op when
    /// nothing is pending.
    pub fn flush(&self) {
        let write_sz = self.write_index.load(Ordering::Acquire);
        if write_sz == 0 {
            return;
        }

        // Ask the consumer to finish the current read buffer
        self.swap_requested.store(true, Ordering::Release);
        while self.read_index.load(Ordering::Acquire) < self.read_size.load(Ordering::Acquire) {
            std::thread::yield_now();
        }

        // The consumer is out; swap and publish the new readable size.
        let sel = self.write_sel.load(Ordering::Relaxed);
        self.write_sel.store(1 - sel, Ordering::Relaxed);
        self.read_index.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        self.read_size.store(write_sz, Ordering::Release);

        self.swap_requested.store(false, Ordering::Release);
    }

    /// Consumer: take the next value from the read buffer.
    ///
    /// Returns `None` when the read buffer is drained; yields first if
    /// the producer is waiting to swap, so the swap can proceed.
    pub fn try_pop(&self) -> Option<T> {
        let size = self.read_size.load(Ordering::Acquire);
        let idx = self.read_index.load(Ordering::Acquire);

        if idx >= size {
            if self.swap_requested.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            return None;
        }

        let rsel = 1 - self.write_sel.load(Ordering::Relaxed);
        // SAFETY: `idx < read_size` keeps the producer out of this buffer
        // until `read_index` catches up to `read_size`.
        let value = unsafe { (*self.buffers[rsel].get())[idx].take() };
        self.read_index.store(idx + 1, Ordering::Release);

        debug_assert!(value.is_some(), "published slot must hold a value");
        value
    }

    /// True when both the read buffer is drained and nothing is pending
    /// on the write side.
    pub fn is_empty(&self) -> bool {
        let read_idx = self.read_index.load(Ordering::Acquire);
        let read_sz = self.read_size.load(Ordering::Acquire);
        let write_idx = self.write_index.load(Ordering::Acquire);
        read_idx >= read_sz && write_idx == 0
    }

    /// True when the write buffer has no room left before a flush.
    pub fn is_full(&self) -> bool {
        self.write_index.load(Ordering::Acquire) >= self.capacity
    }

    /// Values written but not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.write_index.load(Ordering::Acquire)
    }

    /// Values flushed but not yet popped.
    pub fn pending_reads(&self) -> usize {
        let idx = self.read_index.load(Ordering::Acquire);
        let size = self.read_size.load(Ordering::Acquire);
        size.saturating_sub(idx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_flush_pop_cycle() {
        let buf: DoubleBuffer<u32> = DoubleBuffer::with_capacity(4);

        assert!(buf.is_empty());
        assert!(buf.try_pop().is_none(), "Nothing readable before flush");

        buf.try_push(1).unwrap();
        buf.try_push(2).unwrap();
        assert_eq!(buf.pending_writes(), 2);
        assert!(buf.try_pop().is_none(), "Writes invisible until flush");

        buf.flush();
        assert_eq!(buf.pending_writes(), 0);
        assert_eq!(buf.pending_reads(), 2);

        assert_eq!(buf.try_pop(), Some(1));
        assert_eq!(buf.try_pop(), Some(2));
        assert_eq!(buf.try_pop(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_capacity_backpressure() {
        let buf: DoubleBuffer<u32> = DoubleBuffer::with_capacity(2);

        buf.try_push(1).unwrap();
        buf.try_push(2).unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.try_push(3), Err(3), "Full write buffer rejects");

        // Flushing frees the write side even before the reads drain
        buf.flush();
        assert!(!buf.is_full());
        buf.try_push(3).unwrap();

        assert_eq!(buf.try_pop(), Some(1));
        assert_eq!(buf.try_pop(), Some(2));
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let buf: DoubleBuffer<u32> = DoubleBuffer::with_capacity(2);
        buf.flush();
        assert!(buf.is_empty());
        assert_eq!(buf.pending_reads(), 0);
    }

    #[test]
    fn test_batches_arrive_in_order() {
        let buf: DoubleBuffer<u32> = DoubleBuffer::with_capacity(8);

        buf.try_push(1).unwrap();
        buf.flush();
        assert_eq!(buf.try_pop(), Some(1));

        buf.try_push(2).unwrap();
        buf.try_push(3).unwrap();
        buf.flush();
        assert_eq!(buf.try_pop(), Some(2));
        assert_eq!(buf.try_pop(), Some(3));
        assert_eq!(buf.try_pop(), None);
    }

    #[test]
    fn test_spsc_cross_thread() {
        const BATCHES: usize = 200;
        const BATCH: usize = 16;

        let buf: Arc<DoubleBuffer<usize>> = Arc::new(DoubleBuffer::with_capacity(BATCH));
        let consumer_buf = Arc::clone(&buf);

        let consumer = thread::spawn(move || {
            let mut seen = Vec::with_capacity(BATCHES * BATCH);
            while seen.len() < BATCHES * BATCH {
                match consumer_buf.try_pop() {
                    Some(v) => seen.push(v),
                    None => thread::yield_now(),
                }
            }
            seen
        });

        let mut next = 0usize;
        for _ in 0..BATCHES {
            for _ in 0..BATCH {
                let mut v = next;
                loop {
                    match buf.try_push(v) {
                        Ok(()) => break,
                        Err(back) => {
                            v = back;
                            thread::yield_now();
                        }
                    }
                }
                next += 1;
            }
            buf.flush();
        }

        let seen = consumer.join().unwrap();
        let expected: Vec<usize> = (0..BATCHES * BATCH).collect();
        assert_eq!(seen, expected, "FIFO across batches");
    }
}
