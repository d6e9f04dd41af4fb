//! The service arenas draw their segments from.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// A source of large, aligned blocks of memory.
///
/// # Safety
/// A block returned by [`acquire`](SystemAlloc::acquire) must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()` and disjoint from every other live block
/// until it is handed back to [`release`](SystemAlloc::release).
pub unsafe trait SystemAlloc: Send + Sync {
    /// Acquires a block fitting `layout`, returning `None` if the system is out of memory.
    /// `layout` never has a size of zero.
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a block to the system.
    ///
    /// # Safety
    /// `ptr` must have been acquired from this allocator with the same `layout`, and must not be
    /// used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Segments drawn from the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

// SAFETY: The global allocator upholds the same contract for non-zero layouts.
unsafe impl SystemAlloc for Heap {
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: Segment layouts are never zero-sized.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded from the caller.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

#[cfg(all(feature = "system-libc", unix))]
pub use self::libc_impl::Libc;

#[cfg(all(feature = "system-libc", unix))]
mod libc_impl {
    use std::alloc::Layout;
    use std::mem;
    use std::ptr::{self, NonNull};

    use super::SystemAlloc;
    use crate::alloc::panic::InvalidAlignmentPanic;
    use crate::util::panic::{Panic, UnexpectedErrorPanic};

    /// Segments drawn straight from `posix_memalign`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Libc;

    // SAFETY: posix_memalign returns fresh blocks of at least the requested size and alignment.
    unsafe impl SystemAlloc for Libc {
        fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
            let align = layout.align().max(mem::size_of::<*mut libc::c_void>());
            let mut block = ptr::null_mut();
            // SAFETY: `block` is a valid out pointer and `align` is a power of two multiple of the
            // pointer size.
            match unsafe { libc::posix_memalign(&mut block, align, layout.size()) } {
                0 => NonNull::new(block.cast()),
                libc::ENOMEM => None,
                libc::EINVAL => InvalidAlignmentPanic(align).panic(),
                e => UnexpectedErrorPanic(e).panic(),
            }
        }

        unsafe fn release(&self, ptr: NonNull<u8>, _layout: Layout) {
            // SAFETY: The caller guarantees `ptr` came from posix_memalign and is no longer used.
            unsafe { libc::free(ptr.as_ptr().cast()) }
        }
    }
}

/// The allocator new arenas use unless told otherwise: [`Libc`] where it's available, otherwise
/// [`Heap`].
pub fn default_system() -> Arc<dyn SystemAlloc> {
    #[cfg(all(feature = "system-libc", unix))]
    {
        Arc::new(Libc)
    }
    #[cfg(not(all(feature = "system-libc", unix)))]
    {
        Arc::new(Heap)
    }
}
