//! Bounded FIFO queues used to connect the pipeline's worker threads.
//!
//! Each queue is guarded by a single mutex with two condition variables
//! (not-empty, not-full). Producers and consumers never hold more than one
//! queue's mutex at a time. Every blocking wait takes a bounded timeout so a
//! [`Terminate`] flip is observed promptly instead of deadlocking a worker
//! that is parked on a full or empty queue.

mod terminate;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

pub use terminate::Terminate;

/// Outcome of a blocking push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item was enqueued.
    Pushed,
    /// Termination was observed before capacity became available; the item
    /// was dropped without being enqueued.
    Terminated,
}

struct Inner<T> {
    items: VecDeque<T>,
}

/// A bounded, blocking, single-producer/single-consumer-oriented FIFO.
///
/// Capacity is fixed at construction and is never exceeded: [`push_blocking`]
/// parks the caller on a condition variable while the queue is full.
///
/// [`push_blocking`]: BoundedQueue::push_blocking
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(Inner { items: VecDeque::with_capacity(capacity) }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `item`, blocking while the queue is full.
    ///
    /// The wait is re-checked every `poll_interval` so a concurrent
    /// [`Terminate::set`] is observed with bounded latency even though
    /// nothing else would otherwise wake this thread.
    pub fn push_blocking(
        &self,
        item: T,
        terminate: &Terminate,
        poll_interval: Duration,
    ) -> PushOutcome {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.items.len() < self.capacity {
                guard.items.push_back(item);
                self.not_empty.notify_one();
                return PushOutcome::Pushed;
            }
            if terminate.is_set() {
                debug!("queue: terminate observed while full, dropping item");
                return PushOutcome::Terminated;
            }
            trace!(capacity = self.capacity, "queue: full, producer waiting");
            let (g, _timeout) =
                self.not_full.wait_timeout_while(guard, poll_interval, |inner| {
                    inner.items.len() >= self.capacity && !terminate.is_set()
                }).unwrap();
            guard = g;
        }
    }

    /// Pop the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only once `terminate` is set *and* the queue is empty,
    /// matching the "drain to natural stopping point" shutdown semantics
    /// every worker uses for its own queue.
    pub fn pop_blocking(&self, terminate: &Terminate, poll_interval: Duration) -> Option<T> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if terminate.is_set() {
                debug!("queue: terminate observed while empty, stopping");
                return None;
            }
            trace!("queue: empty, consumer waiting");
            let (g, _timeout) =
                self.not_empty.wait_timeout_while(guard, poll_interval, |inner| {
                    inner.items.is_empty() && !terminate.is_set()
                }).unwrap();
            guard = g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const POLL: Duration = Duration::from_millis(20);

    #[test]
    fn push_then_pop_preserves_order() {
        let q = BoundedQueue::new(4);
        let term = Terminate::new();
        for i in 0..4 {
            assert_eq!(q.push_blocking(i, &term, POLL), PushOutcome::Pushed);
        }
        for i in 0..4 {
            assert_eq!(q.pop_blocking(&term, POLL), Some(i));
        }
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let q = Arc::new(BoundedQueue::new(2));
        let term = Terminate::new();
        assert_eq!(q.push_blocking(1, &term, POLL), PushOutcome::Pushed);
        assert_eq!(q.push_blocking(2, &term, POLL), PushOutcome::Pushed);
        assert_eq!(q.len(), 2);

        let q2 = q.clone();
        let term2 = term.clone();
        let blocked = thread::spawn(move || q2.push_blocking(3, &term2, POLL));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(q.len(), 2, "producer must block rather than exceed capacity");

        assert_eq!(q.pop_blocking(&term, POLL), Some(1));
        assert_eq!(blocked.join().unwrap(), PushOutcome::Pushed);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn pop_unblocks_on_terminate_when_empty() {
        let q: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(4));
        let term = Terminate::new();
        let q2 = q.clone();
        let term2 = term.clone();
        let handle = thread::spawn(move || q2.pop_blocking(&term2, POLL));

        thread::sleep(Duration::from_millis(60));
        term.set();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn push_unblocks_on_terminate_when_full() {
        let q = Arc::new(BoundedQueue::new(1));
        let term = Terminate::new();
        assert_eq!(q.push_blocking(1u8, &term, POLL), PushOutcome::Pushed);

        let q2 = q.clone();
        let term2 = term.clone();
        let handle = thread::spawn(move || q2.push_blocking(2u8, &term2, POLL));

        thread::sleep(Duration::from_millis(60));
        term.set();
        assert_eq!(handle.join().unwrap(), PushOutcome::Terminated);
    }
}
