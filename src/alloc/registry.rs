use std::alloc::Layout;
use std::cell::Cell;
use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::alloc::arena::{Growth, Magnifier, SegmentArena};
use crate::alloc::header::{self, Request};
use crate::alloc::panic::{AlreadyClaimedPanic, ForeignPointerPanic};
use crate::alloc::system::SystemAlloc;
use crate::util::panic::Panic;
use crate::util::result::ResultExtension;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The registry and arena index last resolved on this thread.
    static LOCAL: Cell<(u64, usize)> = const { Cell::new((0, 0)) };
}

/// A table of arenas, one per thread of a pool.
///
/// Index 0 is the main arena, owned by the thread which created the registry. Indices
/// `1..threads` are worker arenas, which each worker claims as it starts. One more arena is
/// shared between every other thread, guarded by a lock and lent to whichever thread holds it.
/// Frees are routed by the arena index stored in each allocation's header, so any thread may free
/// anything the registry handed out.
pub struct ArenaRegistry {
    id: u64,
    arenas: Box<[SegmentArena]>,
    shared: Mutex<()>,
}

impl ArenaRegistry {
    /// Creates a registry for `threads` threads (the main thread included). Every arena grows as
    /// a stack using `magnifier`.
    ///
    /// # Panics
    /// Panics if either size is zero.
    pub fn new(
        threads: usize,
        main_size: usize,
        worker_size: usize,
        magnifier: Magnifier,
        system: Arc<dyn SystemAlloc>,
    ) -> ArenaRegistry {
        let threads = threads.max(1);
        let arenas: Box<[SegmentArena]> = (0..=threads)
            .map(|index| {
                let size = if index == 0 { main_size } else { worker_size };
                let growth = Growth::Stack(magnifier);
                SegmentArena::unowned(index as u32, growth, size, Arc::clone(&system))
            })
            .collect();
        arenas[0].try_claim();

        ArenaRegistry {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            arenas,
            shared: Mutex::new(()),
        }
    }

    /// The number of threads with an arena of their own.
    pub fn threads(&self) -> usize {
        self.arenas.len() - 1
    }

    fn shared_index(&self) -> usize {
        self.arenas.len() - 1
    }

    /// Binds worker arena `index` to the calling thread.
    ///
    /// # Panics
    /// Panics if `index` doesn't name a worker arena, or if another thread already claimed it.
    pub fn claim(&self, index: usize) {
        if index == 0 || index >= self.shared_index() || !self.arenas[index].try_claim() {
            AlreadyClaimedPanic(index).panic()
        }
        LOCAL.with(|local| local.set((self.id, index)));
    }

    /// The index of the arena owned by the calling thread, if it has one.
    pub fn local_index(&self) -> Option<usize> {
        let (id, index) = LOCAL.with(Cell::get);
        if id == self.id && self.arenas[index].is_owned_by_current_thread() {
            return Some(index);
        }

        let index = self.arenas[..self.shared_index()]
            .iter()
            .position(SegmentArena::is_owned_by_current_thread)?;
        LOCAL.with(|local| local.set((self.id, index)));
        Some(index)
    }

    pub fn is_main_thread(&self) -> bool {
        self.arenas[0].is_owned_by_current_thread()
    }

    pub fn arena(&self, index: usize) -> Option<&SegmentArena> {
        self.arenas.get(index)
    }

    /// Allocates from the calling thread's arena, or from the shared arena if it has none.
    pub fn allocate(&self, layout: Layout) -> NonNull<u8> {
        let request = Request::new(layout.size(), layout.align(), 0);
        match self.local_index() {
            // Stack arenas only fail by aborting.
            Some(index) => self.arenas[index].allocate_request(request).throw(),
            None => self.with_shared(|arena| arena.allocate_request(request).throw()),
        }
    }

    /// Frees an allocation made by any arena of this registry.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](ArenaRegistry::allocate) on this registry and
    /// not freed since.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // SAFETY: Forwarded from the caller.
        let index = unsafe { header::arena_of(ptr) } as usize;
        let Some(arena) = self.arenas.get(index) else {
            ForeignPointerPanic.panic()
        };

        if index == self.shared_index() && self.local_index().is_none() {
            // SAFETY: Forwarded from the caller.
            self.with_shared(|arena| unsafe { arena.deallocate(ptr) })
        } else {
            // SAFETY: Forwarded from the caller, the header names the arena which made `ptr`.
            unsafe { arena.deallocate(ptr) }
        }
    }

    /// Purges the calling thread's arena, returning the number of bytes released.
    pub fn purge_local(&self) -> usize {
        match self.local_index() {
            Some(index) => self.arenas[index].purge(),
            None => self.with_shared(SegmentArena::purge),
        }
    }

    fn with_shared<R>(&self, f: impl FnOnce(&SegmentArena) -> R) -> R {
        let _lock = self.shared.lock();
        let arena = &self.arenas[self.shared_index()];
        let _binding = Binding::new(arena);
        f(arena)
    }
}

impl Debug for ArenaRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaRegistry")
            .field("id", &self.id)
            .field("threads", &self.threads())
            .finish_non_exhaustive()
    }
}

/// Lends the shared arena to the current thread until dropped.
struct Binding<'a>(&'a SegmentArena);

impl<'a> Binding<'a> {
    fn new(arena: &'a SegmentArena) -> Binding<'a> {
        arena.bind();
        Binding(arena)
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        self.0.unbind();
    }
}
