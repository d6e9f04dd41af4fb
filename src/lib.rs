//! This crate is a small task runtime built around thread-affine memory: a pool of worker threads,
//! a lock-free queue feeding them, and the arenas every task is allocated from.
//!
//! # Purpose
//! Short-lived tasks tend to spend a surprising amount of their time in the global allocator. Here,
//! every task is allocated from an arena owned by the thread submitting it, and freed by whichever
//! thread ends up running it. The owner gets lock-free bump allocation, and other threads only ever
//! flip a flag in the allocation's header.
//!
//! # Method
//! - [`alloc`]: segment arenas (ring and growable stack variants) and the per-thread registry
//!   which routes frees back to the arena that made the allocation.
//! - [`queue`]: a bounded multi-producer multi-consumer queue of pointers, with slots striped so
//!   that neighbouring operations don't share a cache line.
//! - [`pool`]: the worker pool itself, which parks idle workers and only wakes as many as the
//!   backlog can keep busy.
//! - [`task`]: the [`Future`](task::Future) returned for tasks with a result. Waiting on one runs
//!   other queued tasks rather than blocking.
//!
//! # Error Handling
//! Recoverable failures (a full queue, a ring arena out of space, a bad configuration) are
//! returned as strongly typed errors. Broken preconditions, like freeing into an arena from the
//! wrong registry or draining the auxiliary queue from a worker, panic with a dedicated type, since
//! there's nothing sensible for the caller to do about them at runtime.
//!
//! # Dependencies
//! `parking_lot` provides the locks and condition variables workers park on, `crossbeam-utils` the
//! cache padding and backoff for the queue, and `tracing` the logging. The default `system-libc`
//! feature draws arena segments straight from `posix_memalign` through `libc`.
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::missing_const_for_fn)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_inception)]

pub mod alloc;
pub mod pool;
pub mod queue;
pub mod task;

pub(crate) mod util;

#[doc(inline)]
pub use pool::{PoolConfig, WorkerPool};
#[doc(inline)]
pub use task::{Future, TaskPanic};
