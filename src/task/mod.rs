//! Units of work submitted to a [`WorkerPool`](crate::pool::WorkerPool), and the futures which
//! carry their results back.
//!
//! A task lives in a single arena allocation made by the submitting thread: a function pointer
//! which knows the concrete job type, followed by the job itself. Whichever thread dequeues the
//! task moves the job out, frees the block and runs it, so the block is released before any user
//! code can panic.

pub(crate) mod block;
pub mod error;
pub mod future;

#[doc(inline)]
pub use error::TaskPanic;
#[doc(inline)]
pub use future::Future;
