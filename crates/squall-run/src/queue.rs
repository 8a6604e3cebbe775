//! Bounded record channel with backpressure.
//!
//! A thin wrapper over `crossbeam-queue`'s lock-free `ArrayQueue`. When the
//! queue is full, producers block (short parks between retries) instead of
//! allocating; there is no unbounded buffering anywhere in the pipeline.
//! Stop-flag handling stays at the batch boundaries of the callers: a push
//! always lands, so a record that was executed is never lost between the
//! queue and the sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

/// Poll interval while blocked on a full or empty queue.
const BACKOFF: Duration = Duration::from_micros(100);

/// A bounded MPSC channel for query records.
pub struct RecordQueue<T> {
    inner: ArrayQueue<T>,
    open_producers: AtomicUsize,
}

impl<T> RecordQueue<T> {
    /// Creates a queue with the given capacity and producer count.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, producers: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: ArrayQueue::new(capacity),
            open_producers: AtomicUsize::new(producers),
        }
    }

    /// Blocks until the item is enqueued.
    ///
    /// The consumer keeps draining until every producer has left, so this
    /// always completes; backpressure shows up as time spent here.
    pub fn push_blocking(&self, mut item: T) {
        loop {
            match self.inner.push(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    std::thread::sleep(BACKOFF);
                }
            }
        }
    }

    /// Blocks until an item is available or every producer has finished.
    ///
    /// Deliberately ignores the stop flag: producers stop pushing as soon
    /// as the flag is raised, so the consumer drains what was already
    /// accepted and then sees the producers leave. Nothing that was
    /// successfully pushed is ever lost.
    pub fn pop_blocking(&self) -> Option<T> {
        loop {
            if let Some(item) = self.inner.pop() {
                return Some(item);
            }
            if self.open_producers.load(Ordering::Acquire) == 0 {
                // Drain anything that raced in before the last producer left.
                return self.inner.pop();
            }
            std::thread::sleep(BACKOFF);
        }
    }

    /// Marks one producer as finished.
    pub fn producer_done(&self) {
        self.open_producers.fetch_sub(1, Ordering::Release);
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_pop_roundtrip() {
        let queue: RecordQueue<u64> = RecordQueue::new(4, 1);

        queue.push_blocking(1);
        queue.push_blocking(2);
        assert_eq!(queue.pop_blocking(), Some(1));
        assert_eq!(queue.pop_blocking(), Some(2));
    }

    #[test]
    fn pop_returns_none_when_producers_finish() {
        let queue: RecordQueue<u64> = RecordQueue::new(4, 1);

        queue.push_blocking(7);
        queue.producer_done();

        assert_eq!(queue.pop_blocking(), Some(7));
        assert_eq!(queue.pop_blocking(), None);
    }

    #[test]
    fn full_queue_blocks_producer_until_drained() {
        let queue: Arc<RecordQueue<u64>> = Arc::new(RecordQueue::new(1, 1));

        queue.push_blocking(1);

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                queue.push_blocking(2);
                queue.producer_done();
            })
        };

        // The producer cannot finish until the consumer makes room.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop_blocking(), Some(1));
        assert_eq!(queue.pop_blocking(), Some(2));
        producer.join().expect("producer panicked");
    }

    #[test]
    fn backpressure_bounds_the_queue() {
        let queue: Arc<RecordQueue<u64>> = Arc::new(RecordQueue::new(8, 1));

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    queue.push_blocking(i);
                }
                queue.producer_done();
            })
        };

        let mut received = Vec::new();
        while let Some(item) = queue.pop_blocking() {
            assert!(queue.len() <= 8);
            received.push(item);
        }
        producer.join().expect("producer panicked");
        assert_eq!(received.len(), 1000);
        // Within the single producer, order is preserved.
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
