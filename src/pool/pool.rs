use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::pool::config::PoolConfig;
use crate::pool::error::{PoolError, Rejected};
use crate::pool::panic::NotMainThreadPanic;
use crate::pool::shared::Shared;
use crate::pool::worker;
use crate::task::Future;
use crate::task::block::{self, Completing, Detached};
use crate::task::future::FutureState;
use crate::util::panic::Panic;

/// A pool of worker threads running closures submitted from any thread.
///
/// Each task is allocated from the submitting thread's arena and freed by whichever thread runs
/// it. Submitting never blocks idly: if the queue is full, the submitter runs queued tasks until
/// there is room.
///
/// Dropping the pool runs every task still queued before it returns, so tasks may borrow nothing
/// but `'static` data, while [`Future`]s borrow the pool itself.
///
/// # Examples
/// ```
/// use segment_runtime::pool::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::new(PoolConfig::default().with_workers(2)).unwrap();
/// let futures: Vec<_> = (0..10u64).map(|i| pool.submit_future_task(move || i * i)).collect();
/// let sum: u64 = futures.into_iter().map(|future| future.value()).sum();
/// assert_eq!(sum, 285);
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Starts a pool whose main thread is the calling thread.
    ///
    /// # Errors
    /// Fails if `config` is invalid or a worker thread can't be spawned. Workers started before a
    /// spawn failure are shut down again.
    pub fn new(config: PoolConfig) -> Result<WorkerPool, PoolError> {
        config.validate()?;

        let mut pool = WorkerPool {
            shared: Arc::new(Shared::new(&config)?),
            workers: Vec::with_capacity(config.workers()),
            config,
        };

        for index in 1..=pool.config.workers() {
            let shared = Arc::clone(&pool.shared);
            let mut builder = thread::Builder::new()
                .name(format!("{}-{index}", pool.config.thread_name()));
            if let Some(size) = pool.config.stack_size() {
                builder = builder.stack_size(size);
            }
            pool.workers.push(builder.spawn(move || worker::run(&shared, index))?);
        }

        info!(
            workers = pool.config.workers(),
            queue_capacity = pool.config.queue_capacity(),
            aux_capacity = pool.config.aux_capacity(),
            "worker pool started"
        );
        Ok(pool)
    }

    /// Starts a pool with [`PoolConfig::default`].
    ///
    /// # Errors
    /// Fails if a worker thread can't be spawned.
    pub fn with_defaults() -> Result<WorkerPool, PoolError> {
        WorkerPool::new(PoolConfig::default())
    }

    /// Queues `f` to run on any thread of the pool. If it panics, the panic is handed to the
    /// configured panic handler.
    pub fn submit_task<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = block::allocate(&self.shared.registry, Detached(f));
        self.shared.submit(task);
    }

    /// Queues `f` unless the queue is full.
    ///
    /// # Errors
    /// Hands `f` back in a [`Rejected`] if there is no room.
    pub fn try_submit_task<F>(&self, f: F) -> Result<(), Rejected<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = block::allocate(&self.shared.registry, Detached(f));
        self.shared.try_submit(task).map_err(|task| {
            // SAFETY: The task was never enqueued, so nothing else can run it.
            let Detached(f) = unsafe { block::take::<Detached<F>>(task, &self.shared.registry) };
            Rejected(f)
        })
    }

    /// Queues `f` on the auxiliary queue. Auxiliary tasks only run on the main thread, through
    /// [`drain_aux`](WorkerPool::drain_aux), while it waits on a [`Future`], or when the pool is
    /// dropped.
    pub fn submit_task_aux<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = block::allocate(&self.shared.registry, Detached(f));
        self.shared.submit_aux(task);
    }

    /// Queues `f` and returns a [`Future`] for its result. A panic in `f` is caught and carried by
    /// the future instead of reaching the panic handler.
    pub fn submit_future_task<F, R>(&self, f: F) -> Future<'_, R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = FutureState::allocate(&self.shared.registry);
        let task = block::allocate(&self.shared.registry, Completing { f, state });
        self.shared.submit(task);
        Future::new(state, &self.shared)
    }

    /// Runs every queued auxiliary task on the calling thread, returning how many ran.
    ///
    /// # Panics
    /// Panics if called from any thread but the one which created the pool.
    pub fn drain_aux(&self) -> usize {
        if !self.is_main_thread() {
            NotMainThreadPanic.panic()
        }
        self.shared.drain_aux()
    }

    /// Runs one queued task on the calling thread, returning whether there was one.
    pub fn help(&self) -> bool {
        self.shared.help_once()
    }

    /// Hands the calling thread's idle arena segments back to the system, returning the number of
    /// bytes released.
    pub fn purge(&self) -> usize {
        self.shared.registry.purge_local()
    }

    /// The number of main queue tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_main_thread(&self) -> bool {
        self.shared.registry.is_main_thread()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        debug!(pending = self.pending(), "worker pool shutting down");
        self.shared.shut_down();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(String::from);
            if handle.join().is_err() {
                error!(worker = ?name, "worker thread panicked");
            }
        }

        let drained = self.shared.drain_all();
        debug!(drained, "worker pool stopped");
    }
}
