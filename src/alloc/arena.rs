use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::fmt::{self, Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use derive_more::IsVariant;
use tracing::{debug, trace};

use crate::alloc::error::OutOfSpace;
use crate::alloc::header::{self, Header, Placement, Request};
use crate::alloc::panic::{
    DoubleFreePanic, ForeignPointerPanic, LeakedAllocationsPanic, NotOwnerPanic,
};
use crate::alloc::segment::Segment;
use crate::alloc::system::{self, SystemAlloc};
use crate::util::option::OptionExtension;
use crate::util::panic::Panic;
use crate::util::thread as token;

/// Maps the size of the newest segment to the size of the next one.
pub type Magnifier = fn(usize) -> usize;

/// How an arena behaves once its current segment is full.
#[derive(Debug, Clone, Copy, IsVariant)]
pub enum Growth {
    /// Wrap around within a single segment, failing with [`OutOfSpace`] when no gap fits.
    Ring,
    /// Append segments sized by the [`Magnifier`], failing only if the system allocator does.
    Stack(Magnifier),
}

/// An allocator owned by a single thread, which any thread may free into.
///
/// Allocations are kept in a doubly linked list through their headers, in the order they were
/// made. The owner allocates after the newest allocation (the tail) and reclaims space from the
/// oldest (the head) once it has been freed, so a steady stream of short-lived allocations cycles
/// through the same memory. Freeing out of order is allowed: the allocation is marked and its
/// space is reclaimed when the head reaches it.
///
/// Every method except [`deallocate`](SegmentArena::deallocate) panics when called from a thread
/// other than the owner.
pub struct SegmentArena {
    index: u32,
    owner: AtomicU64,
    growth: Growth,
    system: Arc<dyn SystemAlloc>,
    state: UnsafeCell<State>,
}

// SAFETY: `state` is only reached by the owning thread, see `with_state`. Other threads only read
// `owner` and mark headers, both of which are atomic.
unsafe impl Send for SegmentArena {}
// SAFETY: As above.
unsafe impl Sync for SegmentArena {}

impl SegmentArena {
    /// Creates a ring arena over one segment of `capacity` bytes, owned by the current thread.
    pub fn ring(capacity: usize) -> SegmentArena {
        SegmentArena::with_system(Growth::Ring, capacity, system::default_system())
    }

    /// Creates a growable arena, owned by the current thread, starting with a segment of `initial`
    /// bytes.
    pub fn stack(initial: usize, magnifier: Magnifier) -> SegmentArena {
        SegmentArena::with_system(Growth::Stack(magnifier), initial, system::default_system())
    }

    /// Creates an arena owned by the current thread drawing segments from `system`.
    ///
    /// # Panics
    /// Panics if `initial` is zero or too large to describe as a [`Layout`].
    pub fn with_system(
        growth: Growth,
        initial: usize,
        system: Arc<dyn SystemAlloc>,
    ) -> SegmentArena {
        let arena = SegmentArena::unowned(0, growth, initial, system);
        arena.owner.store(token::token(), Ordering::Relaxed);
        arena
    }

    pub(crate) fn unowned(
        index: u32,
        growth: Growth,
        initial: usize,
        system: Arc<dyn SystemAlloc>,
    ) -> SegmentArena {
        let segment = Segment::acquire_or_abort(&*system, initial);
        SegmentArena {
            index,
            owner: AtomicU64::new(0),
            growth,
            system,
            state: UnsafeCell::new(State::new(segment)),
        }
    }

    pub const fn index(&self) -> u32 {
        self.index
    }

    pub const fn growth(&self) -> Growth {
        self.growth
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == token::token()
    }

    /// Takes ownership of an unowned arena. Returns whether the current thread owns the arena
    /// afterwards.
    pub(crate) fn try_claim(&self) -> bool {
        let me = token::token();
        match self.owner.compare_exchange(0, me, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => true,
            Err(current) => current == me,
        }
    }

    /// Lends the arena to the current thread. The caller must guarantee that no other thread is
    /// bound at the same time.
    pub(crate) fn bind(&self) {
        self.owner.store(token::token(), Ordering::Relaxed);
    }

    pub(crate) fn unbind(&self) {
        self.owner.store(0, Ordering::Relaxed);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        if !self.is_owned_by_current_thread() {
            NotOwnerPanic.panic()
        }
        // SAFETY: Only the owning thread gets here, and it never nests calls to `with_state`.
        f(unsafe { &mut *self.state.get() })
    }

    /// Allocates `size` bytes such that `ptr + offset` is aligned to `align`.
    ///
    /// # Errors
    /// Returns [`OutOfSpace`] if this is a ring arena and there is no gap large enough. A stack
    /// arena never fails and aborts through [`std::alloc::handle_alloc_error`] if its system can't
    /// provide another segment.
    ///
    /// # Panics
    /// Panics if `align` isn't a power of two, if `offset` isn't smaller than a non-zero `size`, or
    /// if the current thread doesn't own the arena.
    pub fn allocate(
        &self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Result<NonNull<u8>, OutOfSpace> {
        self.allocate_request(Request::new(size, align, offset))
    }

    /// Allocates space for `layout`. See [`allocate`](SegmentArena::allocate).
    pub fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>, OutOfSpace> {
        self.allocate(layout.size(), layout.align(), 0)
    }

    pub(crate) fn allocate_request(&self, request: Request) -> Result<NonNull<u8>, OutOfSpace> {
        let index = self.index;
        let growth = self.growth;
        let system = &*self.system;

        self.with_state(|state| {
            let placement = match growth {
                Growth::Ring => state.place_ring(request)
                    .ok_or(OutOfSpace { size: request.size, align: request.align })?,
                Growth::Stack(magnifier) => state.place_stack(request, magnifier, system, index),
            };
            // SAFETY: The placement was found in this arena's free space.
            Ok(unsafe { state.link(index, placement) })
        })
    }

    /// Frees an allocation made by this arena. On the owning thread the newest allocation gives
    /// its space back immediately, anything else is marked and reclaimed once the oldest
    /// allocation reaches it. Other threads can only mark.
    ///
    /// # Safety
    /// `ptr` must have been returned by this arena and not freed since.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // SAFETY: Forwarded from the caller.
        if cfg!(debug_assertions) && unsafe { header::arena_of(ptr) } != self.index {
            ForeignPointerPanic.panic()
        }

        let header = header::header_of(ptr);
        if self.is_owned_by_current_thread() {
            // SAFETY: Forwarded from the caller.
            self.with_state(|state| unsafe { state.retire(header) })
        } else {
            // SAFETY: Forwarded from the caller, and marking is all a non-owner does.
            unsafe { header::mark(header) }
        }
    }

    /// Returns true if every allocation has been reclaimed.
    pub fn is_empty(&self) -> bool {
        self.with_state(|state| {
            state.reclaim_head();
            state.is_empty()
        })
    }

    /// The number of allocations that haven't been reclaimed yet, including those freed by other
    /// threads but not yet walked past.
    pub fn live(&self) -> usize {
        self.with_state(|state| state.live)
    }

    /// The total size of the segments currently held.
    pub fn capacity(&self) -> usize {
        self.with_state(|state| state.segments.iter().map(Segment::len).sum())
    }

    pub fn segments(&self) -> usize {
        self.with_state(|state| state.segments.len())
    }

    /// Reclaims what it can, then hands idle segments back to the system. A stack arena keeps the
    /// segments still in use, or only its largest segment if it is empty. Returns the number of
    /// bytes released.
    pub fn purge(&self) -> usize {
        let index = self.index;
        let growth = self.growth;
        let system = &*self.system;

        self.with_state(|state| {
            state.reclaim_head();
            let released = match growth {
                Growth::Ring => 0,
                // SAFETY: The segments were all drawn from this arena's system.
                Growth::Stack(_) => unsafe { state.release_idle(system) },
            };
            if released > 0 {
                trace!(arena = index, released, "purged segment arena");
            }
            released
        })
    }
}

impl Drop for SegmentArena {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.reclaim_head();
        let live = state.live;
        for segment in state.segments.drain(..) {
            // SAFETY: The arena is gone, so nothing should point into its segments.
            unsafe { segment.release(&*self.system) };
        }

        if live > 0 && !thread::panicking() {
            LeakedAllocationsPanic(live).panic()
        }
    }
}

impl Debug for SegmentArena {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentArena")
            .field("index", &self.index)
            .field("growth", &self.growth)
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct State {
    segments: Vec<Segment>,
    /// The stack segment allocations are bumped from. Later segments are unused.
    current: usize,
    head: *mut Header,
    tail: *mut Header,
    live: usize,
}

impl State {
    fn new(segment: Segment) -> State {
        State {
            segments: vec![segment],
            current: 0,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            live: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.tail.is_null()
    }

    /// The first free address in `segment` after the tail, or its start if the tail is elsewhere.
    fn frontier(&self, segment: &Segment) -> usize {
        if !self.tail.is_null() && segment.contains(self.tail.addr()) {
            // SAFETY: The tail is a linked header.
            unsafe { (*self.tail).end.get() }
        } else {
            segment.start()
        }
    }

    fn try_place_ring(&self, request: Request) -> Option<Placement> {
        let segment = &self.segments[0];
        let base = segment.base();
        if self.is_empty() {
            return header::place(base, segment.start(), segment.end(), request);
        }

        let head = self.head.addr();
        let frontier = self.frontier(segment);
        if head <= self.tail.addr() {
            header::place(base, frontier, segment.end(), request)
                .or_else(|| header::place(base, segment.start(), head, request))
        } else {
            header::place(base, frontier, head, request)
        }
    }

    fn place_ring(&mut self, request: Request) -> Option<Placement> {
        self.try_place_ring(request).or_else(|| {
            if self.reclaim_head() {
                self.try_place_ring(request)
            } else {
                None
            }
        })
    }

    fn try_place_current(&self, request: Request) -> Option<Placement> {
        let segment = &self.segments[self.current];
        header::place(segment.base(), self.frontier(segment), segment.end(), request)
    }

    fn place_stack(
        &mut self,
        request: Request,
        magnifier: Magnifier,
        system: &dyn SystemAlloc,
        index: u32,
    ) -> Placement {
        if let Some(placement) = self.try_place_current(request) {
            return placement;
        }

        self.reclaim_head();
        if self.is_empty() {
            self.current = 0;
        }
        loop {
            if let Some(placement) = self.try_place_current(request) {
                return placement;
            }
            if self.current + 1 == self.segments.len() {
                break;
            }
            self.current += 1;
        }

        self.grow(request, magnifier, system, index);
        // SAFETY: The new segment is at least as large as the request's span.
        unsafe { self.try_place_current(request).unreachable() }
    }

    fn grow(
        &mut self,
        request: Request,
        magnifier: Magnifier,
        system: &dyn SystemAlloc,
        index: u32,
    ) {
        let span = request.span();
        let last = self.segments.last().map_or(span, Segment::len);
        let mut len = magnifier(last);
        if len < span {
            len = magnifier(span).max(span);
        }

        self.segments.push(Segment::acquire_or_abort(system, len));
        self.current = self.segments.len() - 1;
        debug!(arena = index, len, segments = self.segments.len(), "segment arena grew");
    }

    /// # Safety
    /// `placement` must lie in free space within one of the segments.
    unsafe fn link(&mut self, index: u32, placement: Placement) -> NonNull<u8> {
        let Placement { header, payload, end } = placement;
        // SAFETY: The caller guarantees the slot is free, and `place` aligned it for a header.
        unsafe { header.write(Header::new(index, self.tail, end)) };

        if self.tail.is_null() {
            self.head = header;
        } else {
            // SAFETY: The tail is a linked header.
            unsafe { (*self.tail).next.set(header) };
        }
        self.tail = header;
        self.live += 1;
        payload
    }

    /// Walks the head forward over marked allocations. Returns whether anything was reclaimed.
    fn reclaim_head(&mut self) -> bool {
        let mut reclaimed = false;
        while !self.head.is_null() {
            // SAFETY: The head is a linked header.
            let head = unsafe { &*self.head };
            if !head.is_marked() {
                break;
            }

            reclaimed = true;
            self.live -= 1;
            let next = head.next.get();
            if next.is_null() {
                self.head = ptr::null_mut();
                self.tail = ptr::null_mut();
            } else {
                // SAFETY: Every header after the head is linked.
                unsafe { (*next).prev.set(ptr::null_mut()) };
                self.head = next;
            }
        }
        reclaimed
    }

    /// Frees an allocation on the owning thread.
    ///
    /// # Safety
    /// `header` must belong to a live allocation linked into this state.
    unsafe fn retire(&mut self, header: *mut Header) {
        if header != self.tail {
            // SAFETY: Forwarded from the caller.
            unsafe { header::mark(header) };
            if header == self.head {
                self.reclaim_head();
            }
            return;
        }

        // SAFETY: Forwarded from the caller.
        if cfg!(debug_assertions) && unsafe { (*header).is_marked() } {
            DoubleFreePanic.panic()
        }

        // The newest allocation unlinks directly, taking any marked predecessors with it.
        self.live -= 1;
        // SAFETY: The tail and everything before it are linked headers.
        let mut tail = unsafe { (*header).prev.get() };
        // SAFETY: As above.
        while !tail.is_null() && unsafe { (*tail).is_marked() } {
            self.live -= 1;
            // SAFETY: As above.
            tail = unsafe { (*tail).prev.get() };
        }

        if tail.is_null() {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
        } else {
            // SAFETY: As above.
            unsafe { (*tail).next.set(ptr::null_mut()) };
            self.tail = tail;
        }
    }

    /// # Safety
    /// Every segment must have been drawn from `system`.
    unsafe fn release_idle(&mut self, system: &dyn SystemAlloc) -> usize {
        let (keep_from, keep_to) = if self.is_empty() {
            let largest = self.segments.iter()
                .enumerate()
                .max_by_key(|(_, segment)| segment.len())
                .map_or(0, |(i, _)| i);
            (largest, largest)
        } else {
            let head = self.head.addr();
            // SAFETY: The head always lies in one of the segments.
            let first = unsafe {
                self.segments.iter().position(|segment| segment.contains(head)).unreachable()
            };
            (first, self.current)
        };

        let mut released = 0;
        let mut kept = Vec::with_capacity(keep_to - keep_from + 1);
        for (i, segment) in self.segments.drain(..).enumerate() {
            if (keep_from..=keep_to).contains(&i) {
                kept.push(segment);
            } else {
                released += segment.len();
                // SAFETY: Nothing lives outside of the kept range, and the caller guarantees the
                // segment came from `system`.
                unsafe { segment.release(system) };
            }
        }
        self.segments = kept;
        self.current = keep_to - keep_from;
        released
    }
}
