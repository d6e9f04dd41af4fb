//! The bookkeeping prefix written in front of every arena allocation, and the arithmetic used to
//! place one.

use std::cell::Cell;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::alloc::panic::{DoubleFreePanic, InvalidAlignmentPanic, OffsetPanic};
use crate::util::panic::Panic;

/// Only `marked` may be touched by a thread other than the arena's owner, and `arena` may be read
/// by anyone holding the allocation. Everything else belongs to the owner.
#[repr(C)]
pub(crate) struct Header {
    marked: AtomicBool,
    arena: u32,
    pub prev: Cell<*mut Header>,
    pub next: Cell<*mut Header>,
    /// One past the last payload byte.
    pub end: Cell<usize>,
}

pub(crate) const HEADER_SIZE: usize = mem::size_of::<Header>();
pub(crate) const HEADER_ALIGN: usize = mem::align_of::<Header>();

impl Header {
    pub const fn new(arena: u32, prev: *mut Header, end: usize) -> Header {
        Header {
            marked: AtomicBool::new(false),
            arena,
            prev: Cell::new(prev),
            next: Cell::new(ptr::null_mut()),
            end: Cell::new(end),
        }
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }
}

/// A checked allocation request. `payload + offset` is aligned to `align`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Request {
    pub size: usize,
    pub align: usize,
    pub offset: usize,
}

impl Request {
    pub fn new(size: usize, align: usize, offset: usize) -> Request {
        if !align.is_power_of_two() {
            InvalidAlignmentPanic(align).panic()
        }
        // A zero sized request may still carry a zero offset.
        if offset != 0 && offset >= size {
            OffsetPanic { offset, size }.panic()
        }
        Request { size, align, offset }
    }

    /// The most space placing this request can consume, starting from any address aligned for a
    /// header.
    pub fn span(&self) -> usize {
        HEADER_ALIGN
            .saturating_add(HEADER_SIZE)
            .saturating_add(self.align)
            .saturating_add(self.size)
    }
}

pub(crate) struct Placement {
    pub header: *mut Header,
    pub payload: NonNull<u8>,
    pub end: usize,
}

/// Places `request` with its header at or after `from` and its payload ending at or before
/// `limit`. `base` provides the provenance for the returned pointers and must cover the whole
/// range.
pub(crate) fn place(
    base: *mut u8,
    from: usize,
    limit: usize,
    request: Request,
) -> Option<Placement> {
    let header_min = from.checked_next_multiple_of(HEADER_ALIGN)?;
    let payload = header_min
        .checked_add(HEADER_SIZE + request.offset)?
        .checked_next_multiple_of(request.align)?
        - request.offset;
    let header = (payload - HEADER_SIZE) & !(HEADER_ALIGN - 1);
    let end = payload.checked_add(request.size)?;
    if end > limit {
        return None;
    }

    Some(Placement {
        header: base.with_addr(header).cast(),
        payload: NonNull::new(base.with_addr(payload))?,
        end,
    })
}

/// Finds the header of an allocation from its payload pointer. The header always sits in the
/// aligned slot closest below the payload.
pub(crate) fn header_of(payload: NonNull<u8>) -> *mut Header {
    let ptr = payload.as_ptr();
    ptr.with_addr((ptr.addr() - HEADER_SIZE) & !(HEADER_ALIGN - 1)).cast()
}

/// Reads the index of the arena which made an allocation.
///
/// # Safety
/// `payload` must be a live allocation made by an arena.
pub(crate) unsafe fn arena_of(payload: NonNull<u8>) -> u32 {
    let header = header_of(payload);
    // SAFETY: The caller guarantees the header is initialized, and `arena` never changes while the
    // allocation is live.
    unsafe { (&raw const (*header).arena).read() }
}

/// Marks an allocation as freed, without touching any of the owner's fields.
///
/// # Safety
/// `header` must belong to a live allocation made by an arena.
pub(crate) unsafe fn mark(header: *mut Header) {
    // SAFETY: The caller guarantees the header is initialized, and `marked` is atomic so it may
    // be shared with the owner.
    let marked = unsafe { &*(&raw const (*header).marked) };
    if marked.swap(true, Ordering::Release) && cfg!(debug_assertions) {
        DoubleFreePanic.panic()
    }
}
