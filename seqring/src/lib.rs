//! Lock-free sequenced ring buffers for request/response bookkeeping.
//!
//! Two structures share the same claim/commit/pop protocol:
//! - [`SeqRing`]: a bounded multi-producer/single-consumer ring of inline
//!   records, split into a cloneable [`Producer`] and an exclusive
//!   [`Consumer`] handle.
//! - [`EventQueue`]: the same protocol over heap-allocated polymorphic
//!   work items, with single-consumer, locked multi-consumer, and
//!   condvar-wait processing modes.
//!
//! Protocol: producers claim a slot with a fetch_add on the `next` counter,
//! write the slot, then publish it by advancing `cursor` through a
//! compare-and-set chain that forces commits to become visible in claim
//! order. The consumer reads slots up to `cursor` and advances `read`.
//! A full ring blocks the producer in a short-sleep spin; the consumer
//! never blocks.

pub mod event_queue;
pub mod ring;

pub use event_queue::{DispatchGate, EventQueue, WorkItem};
pub use ring::{Claim, Consumer, Producer, SeqRing};

/// Pads a counter to its own cache line to avoid false sharing between
/// the producer and consumer sides.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
