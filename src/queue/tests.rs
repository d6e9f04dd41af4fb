#![cfg(test)]

use std::collections::HashSet;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use super::*;

fn tag(value: usize) -> NonNull<u8> {
    NonNull::new(ptr::without_provenance_mut(value)).unwrap()
}

#[test]
fn test_capacity_preconditions() {
    assert_eq!(MpmcQueue::<u8>::new(100, 1).unwrap_err(), CapacityError::NotPowerOfTwo(100));
    assert_eq!(
        MpmcQueue::<u8>::new(64, 1).unwrap_err(),
        CapacityError::TooSmall { capacity: 64, threads: 1 },
        "Capacity must be strictly greater than 64 slots per thread."
    );
    assert!(MpmcQueue::<u8>::new(256, 4).unwrap_err().is_too_small());
    assert!(MpmcQueue::<u8>::new(1024, 0).unwrap_err().is_too_small());
    assert!(MpmcQueue::<u8>::new(0, 1).unwrap_err().is_not_power_of_two());

    let queue = MpmcQueue::<u8>::new(512, 4).unwrap();
    assert_eq!(queue.capacity(), 512);
    assert_eq!(queue.threads(), 4);
    assert!(queue.is_empty());
}

#[test]
fn test_single_thread_basics() {
    let queue = MpmcQueue::<u8>::new(128, 1).unwrap();
    for i in 1..=128 {
        queue.try_enqueue(tag(i)).unwrap();
    }
    assert_eq!(queue.len(), 128);

    let rejected = queue.try_enqueue(tag(999)).unwrap_err();
    assert_eq!(rejected.into_inner(), tag(999), "A full queue should hand the item back.");

    let mut seen = HashSet::new();
    while let Some(item) = queue.try_dequeue() {
        assert!(seen.insert(item.as_ptr().addr()), "An item was delivered twice.");
    }
    assert_eq!(seen, (1..=128).collect());
    assert!(queue.try_dequeue().is_none());

    queue.try_enqueue(tag(7)).unwrap();
    assert_eq!(queue.try_dequeue(), Some(tag(7)), "Freed slots should be reusable.");
}

#[test]
fn test_shuffled_index_is_a_bijection() {
    let queue = MpmcQueue::<u8>::new(1024, 4).unwrap();
    let slots: HashSet<_> = (0..1024).map(|i| queue.index(i)).collect();
    assert_eq!(slots.len(), 1024);
    assert!(slots.iter().all(|&slot| slot < 1024));

    assert_eq!(queue.index(0), 0);
    assert_eq!(queue.index(1), 256, "Consecutive tickets should land in different stripes.");
    assert_eq!(queue.index(4), 1);
    assert_eq!(queue.index(1024), queue.index(0), "Tickets should wrap with the capacity.");
}

#[test]
fn test_bulk_operations() {
    let queue = MpmcQueue::<u8>::new(128, 1).unwrap();
    let items: Vec<_> = (1..=200).map(tag).collect();

    assert_eq!(queue.try_enqueue_bulk(&items), 128, "Only the free slots should be filled.");
    assert_eq!(queue.try_enqueue_bulk(&items), 0);

    let mut out = Vec::new();
    assert_eq!(queue.try_dequeue_bulk(&mut out, 50), 50);
    assert_eq!(queue.try_dequeue_bulk(&mut out, 1000), 78);
    assert_eq!(queue.try_dequeue_bulk(&mut out, 1000), 0);

    let seen: HashSet<_> = out.iter().map(|item| item.as_ptr().addr()).collect();
    assert_eq!(seen, (1..=128).collect());
}

#[test]
fn test_concurrent_delivery_is_exactly_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let queue = MpmcQueue::<u8>::new(4096, 4).unwrap();
    let consumed = AtomicUsize::new(0);

    let mut delivered: Vec<usize> = thread::scope(|s| {
        for producer in 0..PRODUCERS {
            let queue = &queue;
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let item = tag(producer * PER_PRODUCER + i + 1);
                    while queue.try_enqueue(item).is_err() {
                        thread::yield_now();
                    }
                }
            });
        }

        let (queue, consumed) = (&queue, &consumed);
        let consumers: Vec<_> = (0..4)
            .map(|_| s.spawn(move || {
                let mut taken = Vec::new();
                while consumed.load(Ordering::Acquire) < TOTAL {
                    match queue.try_dequeue() {
                        Some(item) => {
                            taken.push(item.as_ptr().addr());
                            consumed.fetch_add(1, Ordering::AcqRel);
                        },
                        None => thread::yield_now(),
                    }
                }
                taken
            }))
            .collect();

        consumers.into_iter()
            .flat_map(|consumer| consumer.join().unwrap())
            .collect()
    });

    delivered.sort_unstable();
    assert_eq!(
        delivered,
        (1..=TOTAL).collect::<Vec<_>>(),
        "Every item should be delivered exactly once."
    );
    assert!(queue.is_empty());
}
