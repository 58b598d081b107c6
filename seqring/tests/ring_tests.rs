//! Cross-thread ordering and blocking tests for the sequenced ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use seqring::SeqRing;

// =============================================================================
// Multi-producer ordering
// =============================================================================

#[test]
fn multi_producer_single_consumer_ordering() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2_000;

    let (tx, mut rx) = SeqRing::new(64);

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    tx.push((id, i));
                }
            })
        })
        .collect();

    let mut last_seen = vec![None::<u64>; PRODUCERS as usize];
    let mut total = 0u64;
    while total < PRODUCERS * PER_PRODUCER {
        if let Some((id, i)) = rx.pop() {
            // Items from one producer are claimed in call order, so they
            // must be delivered in call order.
            let prev = last_seen[id as usize].replace(i);
            match prev {
                None => assert_eq!(i, 0),
                Some(p) => assert_eq!(i, p + 1),
            }
            total += 1;
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(rx.pop(), None);
}

#[test]
fn single_producer_exact_sequence() {
    let (tx, mut rx) = SeqRing::new(8);
    let producer = thread::spawn(move || {
        for i in 0..10_000u64 {
            tx.push(i);
        }
    });

    let mut expected = 0u64;
    while expected < 10_000 {
        if let Some(v) = rx.pop() {
            assert_eq!(v, expected);
            expected += 1;
        }
    }
    producer.join().unwrap();
}

// =============================================================================
// Commit ordering
// =============================================================================

#[test]
fn out_of_order_commit_stalls_consumer() {
    let (tx, mut rx) = SeqRing::new(8);

    let mut first = tx.claim();
    *first.slot() = 1u64;
    let mut second = tx.claim();
    *second.slot() = 2u64;

    // Committing the later claim from another thread spins until the
    // earlier commit lands.
    let committed = AtomicBool::new(false);
    thread::scope(|s| {
        let late = s.spawn(|| {
            second.commit();
            committed.store(true, Ordering::Release);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!committed.load(Ordering::Acquire));
        assert_eq!(rx.pop(), None);

        first.commit();
        late.join().unwrap();
        assert!(committed.load(Ordering::Acquire));
    });

    assert_eq!(rx.pop(), Some(1));
    assert_eq!(rx.pop(), Some(2));
    assert_eq!(rx.pop(), None);
}

// =============================================================================
// Capacity pressure
// =============================================================================

#[test]
fn full_ring_blocks_producer_until_pop() {
    let (tx, mut rx) = SeqRing::new(4);
    for i in 0..4u64 {
        tx.push(i);
    }
    assert!(tx.is_full());

    let unblocked = Arc::new(AtomicBool::new(false));
    let blocked = {
        let tx = tx.clone();
        let unblocked = Arc::clone(&unblocked);
        thread::spawn(move || {
            tx.push(4);
            unblocked.store(true, Ordering::Release);
        })
    };

    thread::sleep(Duration::from_millis(20));
    assert!(!unblocked.load(Ordering::Acquire));

    assert_eq!(rx.pop(), Some(0));
    blocked.join().unwrap();
    assert!(unblocked.load(Ordering::Acquire));

    for expect in 1..=4u64 {
        assert_eq!(rx.pop(), Some(expect));
    }
}
