//! Bounded blocking queue.
//!
//! The engine's queues must keep delivering items that were queued before
//! a close, and a close must wake producers blocked on a full queue, so
//! this is a condvar pair over a `VecDeque` rather than a channel.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A bounded FIFO queue for multiple producers and one consumer.
///
/// `push` blocks while the queue is full and never drops while the queue
/// is open. After [`close`](Self::close), pushes are discarded and pops
/// drain whatever is left, then report emptiness immediately.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append `value`, blocking while the queue is full. Dropped
    /// silently if the queue has been closed.
    pub fn push(&self, value: T) {
        let mut inner = self.inner.lock();
        while inner.items.len() >= inner.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return;
        }
        inner.items.push_back(value);
        self.not_empty.notify_one();
    }

    /// Wait up to `timeout` for an item. A zero timeout polls. A closed
    /// queue still yields queued items, then returns `None` without
    /// waiting.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(value);
            }
            if inner.closed || Instant::now() >= deadline {
                return None;
            }
            self.not_empty.wait_until(&mut inner, deadline);
        }
    }

    /// Close the queue, waking every blocked producer and consumer.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
