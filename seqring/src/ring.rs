//! Sequenced multi-producer/single-consumer bounded ring.
//!
//! Three monotonic 64-bit counters coordinate the ring:
//! - `next`: next sequence number to be claimed by a producer (starts at 1)
//! - `cursor`: highest committed, consumer-visible sequence (starts at 0)
//! - `read`: next sequence the consumer will pop (starts at 1)
//!
//! At any observation point `read - 1 <= cursor <= next - 1`; a sequence
//! `i` is in flight (claimed, not yet committed) exactly when
//! `cursor < i < next`. Producers never advance `next` past
//! `read + capacity`; a full ring is resolved by a short-sleep spin, never
//! by failing the call.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::CachePadded;

/// Smallest permitted ring capacity.
pub const MIN_CAPACITY: usize = 4;

/// Default full-ring backoff sleep.
pub const DEFAULT_BACKOFF: Duration = Duration::from_micros(10);

/// Shared ring state. Constructed through [`SeqRing::new`], which hands out
/// the producer/consumer handle pair.
pub struct SeqRing<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: u64,
    capacity: u64,
    /// Next sequence to claim.
    next: CachePadded<AtomicU64>,
    /// Highest committed sequence.
    cursor: CachePadded<AtomicU64>,
    /// Next sequence the consumer will pop.
    read: CachePadded<AtomicU64>,
    /// Sleep between full-ring spin attempts.
    backoff: Duration,
}

unsafe impl<T: Send> Send for SeqRing<T> {}
unsafe impl<T: Send> Sync for SeqRing<T> {}

impl<T: Default + Send> SeqRing<T> {
    /// Create a ring and split it into handles.
    ///
    /// `capacity` is rounded up to the next power of two, with a floor of
    /// [`MIN_CAPACITY`]. The capacity is fixed for the life of the ring.
    pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
        Self::with_backoff(capacity, DEFAULT_BACKOFF)
    }

    /// Like [`SeqRing::new`] with an explicit full-ring backoff sleep.
    ///
    /// The spin-with-sleep on a full ring is a deliberate low-latency
    /// tradeoff; `backoff` tunes the sleep granularity
    /// (microsecond-to-millisecond scale). A zero duration spins without
    /// sleeping.
    pub fn with_backoff(capacity: usize, backoff: Duration) -> (Producer<T>, Consumer<T>) {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let ring = Arc::new(Self {
            slots,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            next: CachePadded::new(AtomicU64::new(1)),
            cursor: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(1)),
            backoff,
        });

        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer { ring },
        )
    }
}

impl<T> SeqRing<T> {
    /// Claim the next sequence number. Unique per call across producers.
    fn claim_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Spin until the slot for `seq` is no longer occupied by an unread
    /// item from the previous lap.
    fn wait_writable(&self, seq: u64) {
        while seq - self.read.load(Ordering::Acquire) >= self.capacity {
            if self.backoff.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(self.backoff);
            }
        }
    }

    /// Publish `seq`: advance `cursor` from `seq - 1` to `seq`.
    ///
    /// The compare-and-set chain serializes commits into claim order, even
    /// though the slot writes of concurrent producers may complete in any
    /// order.
    fn publish(&self, seq: u64) {
        while self
            .cursor
            .compare_exchange_weak(seq - 1, seq, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn slot(&self, seq: u64) -> *mut T {
        self.slots[(seq & self.mask) as usize].get()
    }

    /// Committed-but-unread item count. Racy snapshot under concurrent
    /// producers: valid for metrics and backpressure heuristics, not for
    /// correctness decisions.
    fn used(&self) -> usize {
        let cursor = self.cursor.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        cursor
            .wrapping_add(1)
            .saturating_sub(read)
            .min(self.capacity) as usize
    }
}

/// Multi-producer handle. Clone freely; all clones feed the same ring.
pub struct Producer<T> {
    ring: Arc<SeqRing<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T: Default + Send> Producer<T> {
    /// Push an item, blocking (spin with short sleep) while the ring is
    /// full.
    ///
    /// The item is moved into the slot with a swap, so the write stays
    /// cheap even for types with heap payloads; the displaced value is the
    /// previous occupant's post-pop residue.
    pub fn push(&self, mut item: T) {
        let ring = &*self.ring;
        let seq = ring.claim_seq();
        ring.wait_writable(seq);
        unsafe {
            std::mem::swap(&mut *ring.slot(seq), &mut item);
        }
        ring.publish(seq);
    }

    /// Claim a slot for in-place construction.
    ///
    /// Every claim must be committed with [`Claim::commit`] exactly once.
    /// A claim that is never committed breaks the cursor chain and stalls
    /// the consumer permanently; this is a contract the caller must uphold,
    /// not a reported error.
    pub fn claim(&self) -> Claim<'_, T> {
        let ring = &*self.ring;
        let seq = ring.claim_seq();
        ring.wait_writable(seq);
        Claim { ring, seq }
    }

    /// Racy snapshot of the committed-but-unread item count.
    pub fn used(&self) -> usize {
        self.ring.used()
    }

    /// Racy snapshot: no committed item is waiting.
    pub fn is_empty(&self) -> bool {
        self.ring.used() == 0
    }

    /// Racy snapshot: every slot holds a committed, unread item.
    pub fn is_full(&self) -> bool {
        self.ring.used() as u64 == self.ring.capacity
    }

    /// Ring capacity after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.ring.capacity as usize
    }
}

/// A claimed, not-yet-committed slot.
///
/// The claimant has exclusive access to the slot until commit: the
/// consumer cannot reach it (it is past `cursor`) and no other producer
/// can claim the same physical slot (capacity gating blocks the next lap
/// until `read` passes this sequence).
pub struct Claim<'a, T> {
    ring: &'a SeqRing<T>,
    seq: u64,
}

impl<T> Claim<'_, T> {
    /// Sequence number of this claim.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Exclusive access to the claimed slot for in-place construction.
    pub fn slot(&mut self) -> &mut T {
        unsafe { &mut *self.ring.slot(self.seq) }
    }

    /// Commit the claim, making the slot visible to the consumer.
    ///
    /// Spins until the commit for the previous sequence has happened, so
    /// commits become visible in claim order regardless of which producer
    /// thread finishes writing first.
    pub fn commit(self) {
        self.ring.publish(self.seq);
    }
}

/// Single-consumer handle. Not cloneable; pop takes `&mut self`, which is
/// what makes concurrent pops unrepresentable.
pub struct Consumer<T> {
    ring: Arc<SeqRing<T>>,
}

impl<T: Default + Send> Consumer<T> {
    /// Pop the oldest committed item, or `None` without blocking.
    ///
    /// The slot is swapped out and left holding `T::default()`; popped
    /// slot residue is garbage to be overwritten, never re-read.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        if read > ring.cursor.load(Ordering::Acquire) {
            return None;
        }
        let item = unsafe { std::mem::take(&mut *ring.slot(read)) };
        ring.read.store(read + 1, Ordering::Release);
        Some(item)
    }

    /// Reset all counters to their initial values.
    ///
    /// Only safe when no producer is mid-push; unread items are abandoned
    /// in place and reclaimed when their slots are overwritten or the ring
    /// is dropped.
    pub fn clear(&mut self) {
        let ring = &*self.ring;
        ring.next.store(1, Ordering::Relaxed);
        ring.cursor.store(0, Ordering::Relaxed);
        ring.read.store(1, Ordering::Release);
    }

    /// Racy snapshot of the committed-but-unread item count.
    pub fn used(&self) -> usize {
        self.ring.used()
    }

    /// Racy snapshot: no committed item is waiting.
    pub fn is_empty(&self) -> bool {
        self.ring.used() == 0
    }

    /// Racy snapshot: every slot holds a committed, unread item.
    pub fn is_full(&self) -> bool {
        self.ring.used() as u64 == self.ring.capacity
    }

    /// Ring capacity after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.ring.capacity as usize
    }
}
