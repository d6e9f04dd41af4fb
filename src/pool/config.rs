use std::fmt::{self, Debug, Formatter};
use std::num::NonZero;
use std::sync::Arc;
use std::thread;

use tracing::error;

use crate::alloc::{Magnifier, SystemAlloc, default_system, magnify};
use crate::pool::error::ConfigError;
use crate::queue;
use crate::task::TaskPanic;

/// Receives the panics of detached tasks, on the pool's main thread whenever possible.
pub type PanicHandler = Arc<dyn Fn(TaskPanic) + Send + Sync>;

const KIB: usize = 1024;
const MIN_QUEUE_CAPACITY: usize = 1024;

/// The number of threads the hardware can run at once, or 1 if that can't be determined.
pub fn hardware_threads() -> usize {
    thread::available_parallelism().map_or(1, NonZero::get)
}

/// The smallest valid queue capacity for `threads` threads, but never less than 1024 slots.
fn default_capacity(threads: usize) -> usize {
    threads.saturating_mul(64)
        .saturating_add(1)
        .checked_next_power_of_two()
        .unwrap_or(usize::MAX)
        .max(MIN_QUEUE_CAPACITY)
}

/// Settings for a [`WorkerPool`](super::WorkerPool), built up from [`PoolConfig::default`].
///
/// Queue capacities that aren't set explicitly follow the number of workers.
#[derive(Clone)]
pub struct PoolConfig {
    workers: usize,
    main_arena_size: usize,
    worker_arena_size: usize,
    queue_capacity: Option<usize>,
    aux_capacity: Option<usize>,
    magnifier: Magnifier,
    thread_name: String,
    stack_size: Option<usize>,
    system: Arc<dyn SystemAlloc>,
    panic_handler: PanicHandler,
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> PoolConfig {
        self.workers = workers;
        self
    }

    pub fn with_main_arena_size(mut self, size: usize) -> PoolConfig {
        self.main_arena_size = size;
        self
    }

    pub fn with_worker_arena_size(mut self, size: usize) -> PoolConfig {
        self.worker_arena_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> PoolConfig {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_aux_capacity(mut self, capacity: usize) -> PoolConfig {
        self.aux_capacity = Some(capacity);
        self
    }

    pub fn with_magnifier(mut self, magnifier: Magnifier) -> PoolConfig {
        self.magnifier = magnifier;
        self
    }

    /// Worker threads are named `{name}-{index}`.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> PoolConfig {
        self.thread_name = name.into();
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> PoolConfig {
        self.stack_size = Some(size);
        self
    }

    pub fn with_system(mut self, system: Arc<dyn SystemAlloc>) -> PoolConfig {
        self.system = system;
        self
    }

    pub fn with_panic_handler(
        mut self,
        handler: impl Fn(TaskPanic) + Send + Sync + 'static,
    ) -> PoolConfig {
        self.panic_handler = Arc::new(handler);
        self
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Workers plus the main thread.
    pub const fn threads(&self) -> usize {
        self.workers.saturating_add(1)
    }

    pub const fn main_arena_size(&self) -> usize {
        self.main_arena_size
    }

    pub const fn worker_arena_size(&self) -> usize {
        self.worker_arena_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or_else(|| default_capacity(self.threads()))
    }

    pub fn aux_capacity(&self) -> usize {
        self.aux_capacity.unwrap_or_else(|| default_capacity(self.threads()))
    }

    pub const fn magnifier(&self) -> Magnifier {
        self.magnifier
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub const fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn system(&self) -> &Arc<dyn SystemAlloc> {
        &self.system
    }

    pub fn panic_handler(&self) -> &PanicHandler {
        &self.panic_handler
    }

    /// # Errors
    /// Fails if there are no workers, if either arena size is zero, or if a queue capacity isn't
    /// a power of two above 64 slots per thread.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.main_arena_size == 0 || self.worker_arena_size == 0 {
            return Err(ConfigError::ArenaSize);
        }
        queue::check_capacity(self.queue_capacity(), self.threads())?;
        queue::check_capacity(self.aux_capacity(), self.threads())?;
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            workers: hardware_threads().saturating_sub(1).max(1),
            main_arena_size: 256 * KIB,
            worker_arena_size: 64 * KIB,
            queue_capacity: None,
            aux_capacity: None,
            magnifier: magnify::double,
            thread_name: String::from("segment-worker"),
            stack_size: None,
            system: default_system(),
            panic_handler: Arc::new(|panic: TaskPanic| error!(%panic, "detached task panicked")),
        }
    }
}

impl Debug for PoolConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("workers", &self.workers)
            .field("main_arena_size", &self.main_arena_size)
            .field("worker_arena_size", &self.worker_arena_size)
            .field("queue_capacity", &self.queue_capacity())
            .field("aux_capacity", &self.aux_capacity())
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::CapacityError;

    #[test]
    fn test_default_capacity() {
        assert_eq!(default_capacity(2), 1024, "Small pools should still get 1024 slots.");
        assert_eq!(default_capacity(16), 2048, "16 threads need more than 1024 slots.");
        assert_eq!(default_capacity(32), 4096);
    }

    #[test]
    fn test_validate() {
        let config = PoolConfig::default().with_workers(3);
        assert_eq!(config.threads(), 4);
        assert!(config.validate().is_ok());

        assert_eq!(PoolConfig::default().with_workers(0).validate(), Err(ConfigError::NoWorkers));
        assert_eq!(
            PoolConfig::default().with_worker_arena_size(0).validate(),
            Err(ConfigError::ArenaSize)
        );
        assert_eq!(
            PoolConfig::default().with_queue_capacity(1000).validate(),
            Err(ConfigError::Capacity(CapacityError::NotPowerOfTwo(1000)))
        );
        assert!(
            PoolConfig::default().with_workers(3).with_aux_capacity(256).validate()
                .is_err_and(|error| error.is_capacity()),
            "256 slots can't serve 4 threads."
        );
    }
}
