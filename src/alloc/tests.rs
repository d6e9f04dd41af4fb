#![cfg(test)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::{Arc, mpsc};
use std::thread;

use super::*;
use crate::alloc::header;
use crate::util::panic::assert_panics;
use crate::util::testing::SendPtr;

/// A small deterministic generator, good enough to shuffle allocation patterns.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

#[test]
fn test_alignment_and_offset() {
    let arena = SegmentArena::ring(8192);
    let mut ptrs = Vec::new();

    for align in [1, 2, 8, 64, 256] {
        for offset in [0, 3, 15] {
            let ptr = arena.allocate(16, align, offset).unwrap();
            assert_eq!(
                (ptr.as_ptr().addr() + offset) % align,
                0,
                "ptr + {offset} should be aligned to {align}"
            );
            ptrs.push(ptr);
        }
    }

    for ptr in ptrs {
        unsafe { arena.deallocate(ptr) };
    }
    assert!(arena.is_empty());
}

#[test]
fn test_invalid_requests() {
    let arena = SegmentArena::ring(1024);
    assert_panics!({ let _ = arena.allocate(8, 3, 0); }, "non power of two alignment");
    assert_panics!({ let _ = arena.allocate(8, 8, 8); }, "offset equal to the size");
    assert_panics!({ let _ = arena.allocate(8, 8, 20); }, "offset past the size");
    assert!(arena.is_empty());
}

#[test]
fn test_ring_out_of_space_and_full_reuse() {
    let arena = SegmentArena::ring(1024);
    let fill = |arena: &SegmentArena| {
        let mut ptrs = Vec::new();
        loop {
            match arena.allocate(100, 8, 0) {
                Ok(ptr) => ptrs.push(ptr),
                Err(error) => {
                    assert_eq!(error, OutOfSpace { size: 100, align: 8 });
                    break ptrs;
                },
            }
        }
    };

    let first = fill(&arena);
    assert!(!first.is_empty(), "A 1 KiB ring should hold at least one 100 byte allocation.");
    for ptr in &first {
        unsafe { arena.deallocate(*ptr) };
    }
    assert!(arena.is_empty());

    let second = fill(&arena);
    assert_eq!(
        first.len(),
        second.len(),
        "Freeing everything should make the whole ring reusable."
    );
    assert_eq!(first[0], second[0]);
    for ptr in second {
        unsafe { arena.deallocate(ptr) };
    }
}

#[test]
fn test_ring_wraps_around() {
    let arena = SegmentArena::ring(1024);
    let blocks: Vec<_> = (0..4).map(|_| arena.allocate(200, 8, 0).unwrap()).collect();
    assert!(arena.allocate(200, 8, 0).is_err(), "The space after the tail should be exhausted.");

    unsafe {
        arena.deallocate(blocks[0]);
        arena.deallocate(blocks[1]);
    }
    let wrapped = arena.allocate(200, 8, 0).unwrap();
    assert!(wrapped < blocks[2], "The allocation should wrap to the start of the segment.");
    assert_eq!(wrapped, blocks[0]);

    unsafe {
        arena.deallocate(blocks[2]);
        arena.deallocate(blocks[3]);
        arena.deallocate(wrapped);
    }
    assert!(arena.is_empty());
}

#[test]
fn test_exclusivity_under_random_traffic() {
    let arena = SegmentArena::stack(1024, magnify::double);
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    let check = |(ptr, len, tag): &(NonNull<u8>, usize, u8)| {
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) };
        assert!(bytes.iter().all(|b| b == tag), "An allocation was overwritten by another.");
    };

    for round in 0..4000 {
        if live.is_empty() || rng.below(3) > 0 {
            let len = 1 + rng.below(200);
            let align = [1, 8, 16, 64][rng.below(4)];
            let ptr = arena.allocate(len, align, 0).unwrap();
            assert_eq!(ptr.as_ptr().addr() % align, 0);
            let tag = (round % 251) as u8;
            unsafe { ptr.as_ptr().write_bytes(tag, len) };
            live.push((ptr, len, tag));
        } else {
            let entry = live.swap_remove(rng.below(live.len()));
            check(&entry);
            unsafe { arena.deallocate(entry.0) };
        }
    }

    let mut ranges: Vec<_> = live.iter().map(|(ptr, len, _)| (ptr.as_ptr().addr(), *len)).collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "Live allocations overlap.");
    }

    for entry in live.drain(..) {
        check(&entry);
        unsafe { arena.deallocate(entry.0) };
    }
    assert!(arena.is_empty());
}

#[test]
fn test_remote_frees_are_reclaimed() {
    let arena = SegmentArena::ring(4096);
    let ptrs: Vec<_> = (0..8).map(|_| SendPtr(arena.allocate(64, 8, 0).unwrap())).collect();

    thread::scope(|s| {
        let arena = &arena;
        s.spawn(move || {
            for ptr in ptrs {
                unsafe { arena.deallocate(ptr.get()) };
            }
        });
    });

    assert_eq!(arena.live(), 8, "Remote frees should only mark allocations.");
    assert!(arena.is_empty(), "The owner should reclaim every marked allocation.");
    assert_eq!(arena.live(), 0);

    let whole = arena.allocate(4096 - 64, 64, 0).unwrap();
    unsafe { arena.deallocate(whole) };
    assert!(arena.is_empty());
}

#[test]
fn test_ring_exclusivity_with_remote_frees() {
    const SEGMENT: usize = 8192;

    let arena = SegmentArena::ring(SEGMENT);
    let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    let intact = |ptr: NonNull<u8>, len: usize, tag: u8| {
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
        bytes.iter().all(|b| *b == tag)
    };

    thread::scope(|s| {
        let (sender, receiver) = mpsc::channel::<(SendPtr, usize, u8)>();
        let remote = {
            let arena = &arena;
            s.spawn(move || {
                let mut freed = 0usize;
                for (ptr, len, tag) in receiver {
                    let ptr = ptr.get();
                    assert!(intact(ptr, len, tag), "A remotely freed allocation was overwritten.");
                    unsafe { arena.deallocate(ptr) };
                    freed += 1;
                }
                freed
            })
        };

        let mut sent = 0usize;
        for round in 0..20_000 {
            if live.is_empty() || rng.below(3) > 0 {
                let len = 1 + rng.below(300);
                let align = [1, 8, 16, 64][rng.below(4)];
                let ptr = match arena.allocate(len, align, 0) {
                    Ok(ptr) => ptr,
                    Err(_) => {
                        // Full: hand back the oldest owner-held block, or wait for the remote side.
                        if !live.is_empty() {
                            let (ptr, len, tag) = live.remove(0);
                            assert!(intact(ptr, len, tag));
                            unsafe { arena.deallocate(ptr) };
                        } else {
                            thread::yield_now();
                        }
                        continue;
                    },
                };
                assert_eq!(ptr.as_ptr().addr() % align, 0);

                let start = ptr.as_ptr().addr();
                for (other, other_len, _) in &live {
                    let other = other.as_ptr().addr();
                    assert!(
                        start + len <= other || other + other_len <= start,
                        "A new allocation overlaps a live one."
                    );
                }

                let tag = (round % 251) as u8;
                unsafe { ptr.as_ptr().write_bytes(tag, len) };
                live.push((ptr, len, tag));
            } else {
                let (ptr, len, tag) = live.swap_remove(rng.below(live.len()));
                if rng.below(2) == 0 {
                    sender.send((SendPtr(ptr), len, tag)).unwrap();
                    sent += 1;
                } else {
                    assert!(intact(ptr, len, tag), "An allocation was overwritten by another.");
                    unsafe { arena.deallocate(ptr) };
                }
            }
        }

        for (ptr, len, tag) in live.drain(..) {
            assert!(intact(ptr, len, tag));
            unsafe { arena.deallocate(ptr) };
        }
        drop(sender);
        assert_eq!(remote.join().unwrap(), sent);
    });

    assert!(arena.is_empty(), "Every allocation should be reclaimed once its frees have landed.");
    let whole = arena.allocate(SEGMENT - 64, 64, 0).unwrap();
    unsafe { arena.deallocate(whole) };
    assert!(arena.is_empty());
}

#[test]
fn test_lifo_collapse() {
    let arena = SegmentArena::ring(1024);
    let a = arena.allocate(32, 8, 0).unwrap();
    let b = arena.allocate(32, 8, 0).unwrap();
    let c = arena.allocate(32, 8, 0).unwrap();

    unsafe { arena.deallocate(b) };
    assert_eq!(arena.live(), 3, "A middle allocation is only marked.");

    unsafe { arena.deallocate(c) };
    assert_eq!(arena.live(), 1, "Freeing the tail should also retire marked predecessors.");

    let d = arena.allocate(32, 8, 0).unwrap();
    assert_eq!(d, b, "The space after the remaining tail should be reused.");

    unsafe {
        arena.deallocate(d);
        arena.deallocate(a);
    }
    assert!(arena.is_empty());
}

#[test]
fn test_non_owner_panics() {
    let arena = SegmentArena::ring(1024);
    thread::scope(|s| {
        s.spawn(|| {
            assert_panics!({ let _ = arena.allocate(8, 8, 0); });
            assert_panics!({ arena.purge(); });
            assert!(!arena.is_owned_by_current_thread());
        });
    });
    assert!(arena.is_empty());
}

#[test]
fn test_stack_growth_and_purge() {
    let arena = SegmentArena::stack(256, magnify::double);
    let ptrs: Vec<_> = (0..20).map(|_| arena.allocate(100, 8, 0).unwrap()).collect();
    assert!(arena.segments() > 1, "The arena should have grown.");
    let grown = arena.capacity();
    assert!(grown > 256);

    assert_eq!(arena.purge(), 0, "Segments holding live allocations must be kept.");

    for ptr in ptrs.into_iter().rev() {
        unsafe { arena.deallocate(ptr) };
    }
    assert!(arena.is_empty());

    let released = arena.purge();
    assert!(released > 0);
    assert_eq!(arena.segments(), 1, "An empty arena keeps only its largest segment.");
    assert_eq!(arena.capacity() + released, grown);

    let ptr = arena.allocate(100, 8, 0).unwrap();
    unsafe { arena.deallocate(ptr) };
}

#[test]
fn test_stack_request_larger_than_growth() {
    let arena = SegmentArena::stack(128, magnify::exact);
    let big = arena.allocate(4000, 64, 0).unwrap();
    assert_eq!(big.as_ptr().addr() % 64, 0);
    assert!(arena.capacity() >= 4000 + 128);
    unsafe { arena.deallocate(big) };
    assert!(arena.is_empty());
}

#[test]
fn test_leak_panics_on_drop() {
    assert_panics!({
        let arena = SegmentArena::ring(256);
        let _ = arena.allocate(8, 8, 0);
    });
}

#[test]
fn test_double_free_panics() {
    let arena = SegmentArena::ring(256);
    let a = arena.allocate(8, 8, 0).unwrap();
    let b = arena.allocate(8, 8, 0).unwrap();
    unsafe { arena.deallocate(b) };
    if cfg!(debug_assertions) {
        assert_panics!({
            unsafe { header::mark(header::header_of(a)) };
            unsafe { arena.deallocate(a) };
        });
    } else {
        unsafe { arena.deallocate(a) };
    }
    assert!(arena.is_empty());
}

#[test]
fn test_registry_routes_frees() {
    let registry = ArenaRegistry::new(3, 1024, 1024, magnify::double, Arc::new(Heap));
    assert!(registry.is_main_thread());
    assert_eq!(registry.local_index(), Some(0));

    let main = SendPtr(registry.allocate(Layout::new::<u64>()));

    let remote = thread::scope(|s| {
        let registry = &registry;
        s.spawn(move || {
            registry.claim(1);
            assert_eq!(registry.local_index(), Some(1));
            assert!(!registry.is_main_thread());

            let ptr = registry.allocate(Layout::new::<[u8; 48]>());
            assert_eq!(unsafe { header::arena_of(ptr) }, 1);
            unsafe { registry.deallocate(main.get()) };
            SendPtr(ptr)
        }).join().unwrap()
    });

    unsafe { registry.deallocate(remote.get()) };
    assert!(
        registry.arena(0).unwrap().is_empty(),
        "The main arena should reclaim the remote free."
    );
}

#[test]
fn test_registry_shared_arena() {
    let registry = ArenaRegistry::new(2, 1024, 1024, magnify::double, Arc::new(Heap));

    let ptr = thread::scope(|s| {
        s.spawn(|| {
            assert_eq!(registry.local_index(), None);
            let ptr = registry.allocate(Layout::new::<[u64; 4]>());
            assert_eq!(unsafe { header::arena_of(ptr) } as usize, registry.threads());
            assert_eq!(registry.purge_local(), 0);
            SendPtr(ptr)
        }).join().unwrap()
    });

    let shared = registry.arena(registry.threads()).unwrap();
    assert!(!shared.is_owned_by_current_thread(), "The shared arena should be unbound.");
    unsafe { registry.deallocate(ptr.get()) };
}

#[test]
fn test_registry_claims() {
    let registry = ArenaRegistry::new(3, 512, 512, magnify::double, Arc::new(Heap));
    assert_panics!({ registry.claim(0); }, "the main arena is never claimable");
    assert_panics!({ registry.claim(3); }, "the shared arena is never claimable");

    thread::scope(|s| {
        s.spawn(|| registry.claim(2)).join().unwrap();
        s.spawn(|| {
            assert_panics!({ registry.claim(2); }, "a claimed arena can't be claimed again");
        }).join().unwrap();
    });
}
