//! Event dispatch queue: the sequenced ring protocol over polymorphic
//! work items.
//!
//! Slots hold pointers to heap-allocated [`WorkItem`]s instead of inline
//! records, so extraction is a single atomic pointer swap and the queue
//! supports three processing modes: single-consumer poll, multi-consumer
//! with a shared lock, and multi-consumer with a condition wait.
//!
//! Item lifecycle: Created → Queued (claimed + committed) → Dispatched
//! (popped, being invoked) → freed, unless the item moved itself elsewhere
//! during `invoke` (ownership transfer). An item is never queued twice.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::ring::{DEFAULT_BACKOFF, MIN_CAPACITY};
use crate::CachePadded;

/// A queued unit of work.
///
/// `invoke` consumes the box: an item that is finished simply returns and
/// is freed; an item that is not finished moves itself to its next owner
/// (for example by re-queueing on another [`EventQueue`]) before
/// returning.
pub trait WorkItem: Send {
    fn invoke(self: Box<Self>);
}

impl<F: FnOnce() + Send> WorkItem for F {
    fn invoke(self: Box<Self>) {
        (*self)()
    }
}

/// Thin-pointer wrapper so slots can hold an `AtomicPtr` to a trait
/// object.
struct Node {
    item: Box<dyn WorkItem>,
}

/// Lock/condvar pair shared by the consumers of one queue.
///
/// The critical section is deliberately minimized to slot extraction;
/// callables always run outside the lock.
pub struct DispatchGate {
    lock: Mutex<()>,
    cond: Condvar,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Wake one idle consumer, without blocking.
    ///
    /// Failing to acquire the lock means a consumer is already active and
    /// will pick the item up on its next extraction pass; that is not an
    /// error.
    pub fn wake(&self) {
        if let Ok(_guard) = self.lock.try_lock() {
            self.cond.notify_one();
        }
    }
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded multi-producer queue of polymorphic work items.
pub struct EventQueue {
    slots: Box<[AtomicPtr<Node>]>,
    mask: u64,
    capacity: u64,
    next: CachePadded<AtomicU64>,
    cursor: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    backoff: Duration,
}

impl EventQueue {
    /// Create a queue. `capacity` is rounded up to the next power of two
    /// with a floor of [`MIN_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        Self::with_backoff(capacity, DEFAULT_BACKOFF)
    }

    /// Like [`EventQueue::new`] with an explicit full-queue backoff sleep.
    pub fn with_backoff(capacity: usize, backoff: Duration) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            next: CachePadded::new(AtomicU64::new(1)),
            cursor: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(1)),
            backoff,
        }
    }

    /// Queue a work item, blocking (spin with short sleep) while the queue
    /// is full.
    pub fn push(&self, item: impl WorkItem + 'static) {
        self.push_boxed(Box::new(item));
    }

    /// Queue an already-boxed work item.
    pub fn push_boxed(&self, item: Box<dyn WorkItem>) {
        let raw = Box::into_raw(Box::new(Node { item }));
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        while seq - self.read.load(Ordering::Acquire) >= self.capacity {
            if self.backoff.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(self.backoff);
            }
        }
        let old = self.slots[(seq & self.mask) as usize].swap(raw, Ordering::AcqRel);
        debug_assert!(old.is_null());
        if !old.is_null() {
            drop(unsafe { Box::from_raw(old) });
        }
        while self
            .cursor
            .compare_exchange_weak(seq - 1, seq, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Extract the oldest committed, unread item.
    fn take_next(&self) -> Option<Box<Node>> {
        let read = self.read.load(Ordering::Relaxed);
        if read > self.cursor.load(Ordering::Acquire) {
            return None;
        }
        let raw = self.slots[(read & self.mask) as usize].swap(ptr::null_mut(), Ordering::AcqRel);
        self.read.store(read + 1, Ordering::Release);
        if raw.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(raw) })
        }
    }

    fn has_ready(&self) -> bool {
        self.read.load(Ordering::Relaxed) <= self.cursor.load(Ordering::Acquire)
    }

    /// Drain every committed item not yet read, invoking each. Single
    /// consumer: callers must not run `process` concurrently with any
    /// other processing mode on the same queue.
    ///
    /// Returns whether any item was invoked.
    pub fn process(&self) -> bool {
        let mut did = false;
        while let Some(node) = self.take_next() {
            node.item.invoke();
            did = true;
        }
        did
    }

    /// Multi-consumer drain. The gate's lock is held only while extracting
    /// the next item and released before the callable runs, so other
    /// consumers proceed concurrently.
    pub fn process_multi(&self, gate: &DispatchGate) -> bool {
        let mut did = false;
        loop {
            let node = {
                let _guard = gate.lock.lock().unwrap();
                self.take_next()
            };
            match node {
                Some(node) => {
                    node.item.invoke();
                    did = true;
                }
                None => break,
            }
        }
        did
    }

    /// Multi-consumer drain that waits on the gate's condition variable
    /// when the queue is empty, bounded by `max_wait` per wait cycle.
    ///
    /// Loops until `stop` is observed set, then returns after draining any
    /// remaining committed items. Shutdown is cooperative: worst-case
    /// latency is one `max_wait` interval.
    pub fn process_multiwait(
        &self,
        gate: &DispatchGate,
        stop: &AtomicBool,
        max_wait: Duration,
    ) -> bool {
        let mut did = false;
        loop {
            did |= self.process_multi(gate);
            if stop.load(Ordering::Acquire) {
                break;
            }
            let guard = gate.lock.lock().unwrap();
            if !self.has_ready() && !stop.load(Ordering::Acquire) {
                let _guard = self.cond_wait(gate, guard, max_wait);
            }
        }
        did |= self.process_multi(gate);
        did
    }

    fn cond_wait<'a>(
        &self,
        gate: &'a DispatchGate,
        guard: std::sync::MutexGuard<'a, ()>,
        max_wait: Duration,
    ) -> std::sync::MutexGuard<'a, ()> {
        let (guard, _timeout) = gate.cond.wait_timeout(guard, max_wait).unwrap();
        guard
    }

    /// Racy snapshot of the committed-but-unread item count.
    pub fn len(&self) -> usize {
        let cursor = self.cursor.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        cursor
            .wrapping_add(1)
            .saturating_sub(read)
            .min(self.capacity) as usize
    }

    /// Racy snapshot: no committed item is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue capacity after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let raw = slot.swap(ptr::null_mut(), Ordering::Relaxed);
            if !raw.is_null() {
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn process_runs_in_order() {
        let q = EventQueue::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            q.push(move || seen.lock().unwrap().push(i));
        }
        assert!(q.process());
        assert!(!q.process());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn ownership_transfer_requeues() {
        struct Hopper {
            target: Arc<EventQueue>,
            hops: Arc<AtomicUsize>,
        }
        impl WorkItem for Hopper {
            fn invoke(self: Box<Self>) {
                if self.hops.fetch_add(1, Ordering::SeqCst) == 0 {
                    let target = Arc::clone(&self.target);
                    target.push_boxed(self);
                }
            }
        }

        let q = Arc::new(EventQueue::new(8));
        let hops = Arc::new(AtomicUsize::new(0));
        q.push_boxed(Box::new(Hopper {
            target: Arc::clone(&q),
            hops: Arc::clone(&hops),
        }));
        assert!(q.process());
        // First invocation re-queued the item, second retired it.
        assert_eq!(hops.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn multiwait_drains_then_stops() {
        let q = Arc::new(EventQueue::new(16));
        let gate = Arc::new(DispatchGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let ran = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let q = Arc::clone(&q);
            let gate = Arc::clone(&gate);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                q.process_multiwait(&gate, &stop, Duration::from_millis(5));
            })
        };

        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            q.push(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
            gate.wake();
        }

        while ran.load(Ordering::SeqCst) < 10 {
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Release);
        gate.wake();
        consumer.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn drop_frees_unprocessed_items() {
        struct Guard(Arc<AtomicUsize>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let q = EventQueue::new(8);
            for _ in 0..3 {
                let guard = Guard(Arc::clone(&dropped));
                q.push(move || {
                    let _keep = &guard;
                });
            }
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }
}
