use std::alloc::Layout;
use std::ptr::NonNull;

use crate::alloc::panic::SegmentSizePanic;
use crate::alloc::system::SystemAlloc;
use crate::util::panic::Panic;

pub(crate) const SEGMENT_ALIGN: usize = 64;

/// A block of memory owned by an arena. Segments don't release themselves, the arena hands them
/// back to the system it drew them from.
#[derive(Debug)]
pub(crate) struct Segment {
    base: NonNull<u8>,
    len: usize,
}

impl Segment {
    pub fn layout(len: usize) -> Layout {
        match Layout::from_size_align(len, SEGMENT_ALIGN) {
            Ok(layout) if len > 0 => layout,
            _ => SegmentSizePanic(len).panic(),
        }
    }

    pub fn acquire(system: &dyn SystemAlloc, len: usize) -> Option<Segment> {
        system.acquire(Segment::layout(len))
            .map(|base| Segment { base, len })
    }

    /// Acquires a segment or aborts through the global allocation error handler.
    pub fn acquire_or_abort(system: &dyn SystemAlloc, len: usize) -> Segment {
        Segment::acquire(system, len)
            .unwrap_or_else(|| std::alloc::handle_alloc_error(Segment::layout(len)))
    }

    pub const fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn start(&self) -> usize {
        self.base.as_ptr().addr()
    }

    pub fn end(&self) -> usize {
        self.start() + self.len
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        (self.start()..self.end()).contains(&addr)
    }

    /// # Safety
    /// The segment must have been acquired from `system`, and nothing may point into it any more.
    pub unsafe fn release(self, system: &dyn SystemAlloc) {
        // SAFETY: Forwarded from the caller, and the layout is the one used to acquire it.
        unsafe { system.release(self.base, Segment::layout(self.len)) }
    }
}
