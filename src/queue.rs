//! Bounded drop-oldest queue between frame producers and the dispatcher.
//!
//! `put` never blocks: when the queue already holds `capacity` unconsumed
//! items, the oldest one is evicted, the overflow hook fires, and the new item
//! is still enqueued. `get` blocks until an item is available and yields items
//! in FIFO order among those never evicted.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type OverflowHook = Box<dyn Fn() + Send + Sync>;

pub struct BoundedDropQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
    on_overflow: Option<OverflowHook>,
}

impl<T> BoundedDropQueue<T> {
    /// Create a queue holding at most `capacity` items. A zero capacity is
    /// rounded up to one so that `get` can always make progress.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            on_overflow: None,
        }
    }

    /// Install a hook invoked once per evicted item.
    pub fn with_overflow_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_overflow = Some(Box::new(hook));
        self
    }

    pub fn put(&self, item: T) {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };
        self.available.notify_one();

        // Evicted item is dropped and the hook runs outside the lock.
        if evicted.is_some() {
            if let Some(hook) = &self.on_overflow {
                hook();
            }
        }
    }

    /// Block until an item is available and return the oldest.
    pub fn get(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self
                .available
                .wait(items)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like `get`, but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(items, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            items = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn discards_oldest_items_on_overflow() {
        let queue = BoundedDropQueue::new(3);
        for i in 0..5 {
            queue.put(i);
        }
        assert_eq!(queue.get(), 2);
        assert_eq!(queue.get(), 3);
        assert_eq!(queue.get(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_hook_fires_once_per_eviction() {
        let overflows = Arc::new(AtomicUsize::new(0));
        let counter = overflows.clone();
        let queue = BoundedDropQueue::new(3).with_overflow_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for i in 0..5 {
            queue.put(i);
        }
        assert_eq!(overflows.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn consumed_slots_do_not_count_as_overflow() {
        let overflows = Arc::new(AtomicUsize::new(0));
        let counter = overflows.clone();
        let queue = BoundedDropQueue::new(2).with_overflow_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.put('a');
        queue.put('b');
        assert_eq!(queue.get(), 'a');
        queue.put('c');
        assert_eq!(overflows.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get(), 'b');
        assert_eq!(queue.get(), 'c');
    }

    #[test]
    fn get_timeout_returns_none_when_empty() {
        let queue: BoundedDropQueue<u8> = BoundedDropQueue::new(1);
        assert_eq!(queue.get_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn get_blocks_until_producer_puts() {
        let queue = Arc::new(BoundedDropQueue::new(4));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.put(42u32);
            })
        };
        assert_eq!(queue.get(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn zero_capacity_holds_one_item() {
        let queue = BoundedDropQueue::new(0);
        queue.put(1);
        queue.put(2);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.get(), 2);
    }
}
