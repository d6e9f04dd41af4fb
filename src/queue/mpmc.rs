use std::fmt::{self, Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::queue::error::{CapacityError, Full};

/// The fewest slots each thread must have to itself.
const SLOTS_PER_THREAD: usize = 64;

/// Checks that a queue of `capacity` slots may be shared by `threads` threads.
///
/// # Errors
/// Fails if `capacity` isn't a power of two, or if it doesn't exceed 64 slots for every thread.
pub fn check_capacity(capacity: usize, threads: usize) -> Result<(), CapacityError> {
    if !capacity.is_power_of_two() {
        return Err(CapacityError::NotPowerOfTwo(capacity));
    }
    match threads.checked_mul(SLOTS_PER_THREAD) {
        Some(min) if threads > 0 && capacity > min => Ok(()),
        _ => Err(CapacityError::TooSmall { capacity, threads }),
    }
}

/// A bounded multi-producer multi-consumer queue of non-null pointers.
///
/// Producers first reserve capacity, then take a ticket from `tail` and publish into the slot
/// that ticket maps to. Consumers claim a published item, take a ticket from `head` and empty the
/// matching slot. Consecutive tickets are spread over `threads` stripes so that threads working
/// at the same time touch different cache lines. Every item enqueued is dequeued exactly once, but
/// there is no global FIFO order between concurrent operations.
///
/// The queue never dereferences or frees its items; whoever dequeues a pointer owns it.
pub struct MpmcQueue<T> {
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
    stripe_mask: usize,
    stripe_shift: u32,
    per_stripe_shift: u32,
    threads: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    /// Slots held by producers, released by consumers once an item has been taken.
    reserved: CachePadded<AtomicUsize>,
    /// Items published but not yet claimed.
    ready: CachePadded<AtomicUsize>,
}

impl<T> MpmcQueue<T> {
    /// Creates a queue with `capacity` slots for use by `threads` threads.
    ///
    /// # Errors
    /// See [`check_capacity`].
    pub fn new(capacity: usize, threads: usize) -> Result<MpmcQueue<T>, CapacityError> {
        check_capacity(capacity, threads)?;

        let stripes = threads.next_power_of_two();
        let per_stripe = capacity / stripes;

        Ok(MpmcQueue {
            slots: (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            mask: capacity - 1,
            stripe_mask: stripes - 1,
            stripe_shift: stripes.trailing_zeros(),
            per_stripe_shift: per_stripe.trailing_zeros(),
            threads,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            reserved: CachePadded::new(AtomicUsize::new(0)),
            ready: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// The number of published items not yet claimed by a consumer.
    pub fn len(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maps a ticket to its slot: ticket `i` lands in stripe `i % stripes`, at position
    /// `(i % capacity) / stripes` within it.
    pub(crate) fn index(&self, ticket: usize) -> usize {
        let stripe = (ticket & self.stripe_mask) << self.per_stripe_shift;
        stripe | ((ticket & self.mask) >> self.stripe_shift)
    }

    /// Enqueues `item`.
    ///
    /// # Errors
    /// Hands `item` back if every slot is already reserved.
    pub fn try_enqueue(&self, item: NonNull<T>) -> Result<(), Full<T>> {
        if self.reserve(1) == 0 {
            return Err(Full(item));
        }

        let ticket = self.tail.fetch_add(1, Ordering::Relaxed);
        self.publish(ticket, item);
        self.ready.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Enqueues as many of `items` as there is room for, in order, returning how many were
    /// taken.
    pub fn try_enqueue_bulk(&self, items: &[NonNull<T>]) -> usize {
        let count = self.reserve(items.len());
        if count == 0 {
            return 0;
        }

        let first = self.tail.fetch_add(count, Ordering::Relaxed);
        for (i, item) in items[..count].iter().enumerate() {
            self.publish(first.wrapping_add(i), *item);
        }
        self.ready.fetch_add(count, Ordering::Release);
        count
    }

    pub fn try_dequeue(&self) -> Option<NonNull<T>> {
        if self.claim(1) == 0 {
            return None;
        }

        let ticket = self.head.fetch_add(1, Ordering::Relaxed);
        let item = self.take(ticket);
        self.reserved.fetch_sub(1, Ordering::Release);
        Some(item)
    }

    /// Dequeues up to `max` items onto the end of `out`, returning how many were added.
    pub fn try_dequeue_bulk(&self, out: &mut Vec<NonNull<T>>, max: usize) -> usize {
        let count = self.claim(max);
        if count == 0 {
            return 0;
        }

        let first = self.head.fetch_add(count, Ordering::Relaxed);
        out.reserve(count);
        for i in 0..count {
            out.push(self.take(first.wrapping_add(i)));
        }
        self.reserved.fetch_sub(count, Ordering::Release);
        count
    }

    fn reserve(&self, want: usize) -> usize {
        let capacity = self.capacity();
        let mut reserved = self.reserved.load(Ordering::Relaxed);
        loop {
            let count = want.min(capacity - reserved);
            if count == 0 {
                return 0;
            }
            let claimed = self.reserved.compare_exchange_weak(
                reserved,
                reserved + count,
                Ordering::Acquire,
                Ordering::Relaxed,
            );
            match claimed {
                Ok(_) => return count,
                Err(current) => reserved = current,
            }
        }
    }

    fn claim(&self, want: usize) -> usize {
        let mut ready = self.ready.load(Ordering::Relaxed);
        loop {
            let count = want.min(ready);
            if count == 0 {
                return 0;
            }
            let claimed = self.ready
                .compare_exchange_weak(ready, ready - count, Ordering::Acquire, Ordering::Relaxed);
            match claimed {
                Ok(_) => return count,
                Err(current) => ready = current,
            }
        }
    }

    fn publish(&self, ticket: usize, item: NonNull<T>) {
        let slot = &self.slots[self.index(ticket)];
        let backoff = Backoff::new();
        let item = item.as_ptr();
        // The consumer of the previous lap may still be on its way to this slot.
        while slot
            .compare_exchange_weak(ptr::null_mut(), item, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    fn take(&self, ticket: usize) -> NonNull<T> {
        let slot = &self.slots[self.index(ticket)];
        let backoff = Backoff::new();
        loop {
            // The producer holding this ticket may not have published yet.
            if let Some(item) = NonNull::new(slot.swap(ptr::null_mut(), Ordering::Acquire)) {
                return item;
            }
            backoff.snooze();
        }
    }
}

impl<T> Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("capacity", &self.capacity())
            .field("threads", &self.threads)
            .field("len", &self.len())
            .finish()
    }
}
