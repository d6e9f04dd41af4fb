//! A fixed set of worker threads fed through a shared [`MpmcQueue`](crate::queue::MpmcQueue).
//!
//! # Method
//! Workers drain the queue until it is empty, then park on a condition variable. A submitter only
//! wakes a parked worker when the tasks in flight outnumber the threads currently processing, so
//! a burst of submissions wakes as many workers as it can keep busy and no more. Shutdown stops
//! workers only once the queue is empty, and the dropping thread then runs anything submitted in
//! the meantime.
//!
//! The thread which creates a pool is its main thread. It owns the auxiliary queue, whose tasks
//! only ever run on the main thread, and it receives the panics of detached tasks.

pub mod config;
pub mod error;
pub mod panic;
pub mod pool;

pub(crate) mod shared;
mod worker;


#[doc(inline)]
pub use config::{PanicHandler, PoolConfig, hardware_threads};
#[doc(inline)]
pub use error::{ConfigError, PoolError, Rejected};
#[doc(inline)]
pub use pool::WorkerPool;
