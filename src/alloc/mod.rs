//! Thread-affine segment arenas which hand out the memory for in-flight tasks.
//!
//! # Method
//! Every allocation is prefixed by a small header linking it to its neighbours. The owning thread
//! bumps forward from the newest allocation and walks the oldest allocation forward as blocks are
//! freed, so allocation and release are both `O(1)` amortized without a lock. Any other thread may
//! free a block, but it can only mark the header; the owner reclaims marked blocks the next time
//! it walks past them.
//!
//! Two growth policies are available through [`Growth`]: a ring over a single segment which wraps
//! back to its start and reports [`OutOfSpace`] when full, and a stack of segments which grows by
//! a [`Magnifier`] and only fails if the [`SystemAlloc`] underneath it does.
//!
//! [`ArenaRegistry`] assigns one arena per thread of a pool, plus a shared arena behind a lock for
//! threads that don't have one.

pub mod arena;
pub mod error;
pub mod magnify;
pub mod panic;
pub mod registry;
pub mod system;

pub(crate) mod header;
mod segment;

#[cfg(test)]
mod tests;

#[doc(inline)]
pub use arena::{Growth, Magnifier, SegmentArena};
#[doc(inline)]
pub use error::OutOfSpace;
#[doc(inline)]
pub use registry::ArenaRegistry;
#[doc(inline)]
pub use system::{Heap, SystemAlloc, default_system};
#[cfg(all(feature = "system-libc", unix))]
#[doc(inline)]
pub use system::Libc;
