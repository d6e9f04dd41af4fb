use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use crate::alloc::ArenaRegistry;
use crate::pool::config::{PanicHandler, PoolConfig};
use crate::queue::{CapacityError, Full, MpmcQueue};
use crate::task::TaskPanic;
use crate::task::block::{self, Relay, TaskHeader};

/// How long a waiting thread parks before looking for work again.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);
/// The most auxiliary tasks dequeued at once.
const AUX_BATCH: usize = 64;

/// Whether a task counts towards the backlog workers are woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Main,
    Aux,
}

/// Why an idle worker stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Idle {
    Retry,
    Stop,
}

/// State shared between a pool, its workers and its futures.
pub(crate) struct Shared {
    pub registry: ArenaRegistry,
    pub queue: MpmcQueue<TaskHeader>,
    pub aux: MpmcQueue<TaskHeader>,
    running: AtomicBool,
    /// Main queue tasks submitted and not yet finished.
    num_tasks: AtomicU32,
    /// Threads currently taking tasks from the main queue.
    num_processing: AtomicU32,
    num_sleeping: AtomicU32,
    /// Threads parked until some future finishes.
    waiters: AtomicU32,
    sleep_lock: Mutex<()>,
    wake: Condvar,
    done_lock: Mutex<()>,
    done: Condvar,
    panic_handler: PanicHandler,
}

impl Shared {
    pub fn new(config: &PoolConfig) -> Result<Shared, CapacityError> {
        let threads = config.threads();
        Ok(Shared {
            registry: ArenaRegistry::new(
                threads,
                config.main_arena_size(),
                config.worker_arena_size(),
                config.magnifier(),
                config.system().clone(),
            ),
            queue: MpmcQueue::new(config.queue_capacity(), threads)?,
            aux: MpmcQueue::new(config.aux_capacity(), threads)?,
            running: AtomicBool::new(true),
            num_tasks: AtomicU32::new(0),
            num_processing: AtomicU32::new(0),
            num_sleeping: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
            done_lock: Mutex::new(()),
            done: Condvar::new(),
            panic_handler: config.panic_handler().clone(),
        })
    }

    pub fn pending(&self) -> usize {
        self.num_tasks.load(Ordering::SeqCst) as usize
    }

    /// Enqueues a task on the main queue, running other tasks on the calling thread while the
    /// queue is full.
    pub fn submit(&self, task: NonNull<TaskHeader>) {
        self.num_tasks.fetch_add(1, Ordering::SeqCst);
        let mut task = task;
        while let Err(Full(rejected)) = self.queue.try_enqueue(task) {
            task = rejected;
            if !self.help_once() {
                thread::yield_now();
            }
        }
        self.wake_one();
    }

    /// Enqueues a task on the main queue, handing it back if the queue is full.
    pub fn try_submit(&self, task: NonNull<TaskHeader>) -> Result<(), NonNull<TaskHeader>> {
        self.num_tasks.fetch_add(1, Ordering::SeqCst);
        match self.queue.try_enqueue(task) {
            Ok(()) => {
                self.wake_one();
                Ok(())
            },
            Err(Full(task)) => {
                self.num_tasks.fetch_sub(1, Ordering::SeqCst);
                Err(task)
            },
        }
    }

    /// Enqueues a task on the auxiliary queue. The main thread makes room by running auxiliary
    /// tasks itself, anyone else waits for it.
    pub fn submit_aux(&self, task: NonNull<TaskHeader>) {
        let mut task = task;
        while let Err(Full(rejected)) = self.aux.try_enqueue(task) {
            task = rejected;
            if !(self.registry.is_main_thread() && self.run_aux_once()) {
                thread::yield_now();
            }
        }
    }

    /// Wakes one sleeping worker if the backlog outgrows the threads processing it.
    fn wake_one(&self) {
        if self.num_sleeping.load(Ordering::SeqCst) > 0
            && self.num_tasks.load(Ordering::SeqCst) > self.num_processing.load(Ordering::SeqCst)
        {
            let _lock = self.sleep_lock.lock();
            self.wake.notify_one();
        }
    }

    /// Runs one unit of pending work on the calling thread: an auxiliary task if this is the main
    /// thread and one is queued, otherwise a main queue task. Returns whether anything ran.
    pub fn help_once(&self) -> bool {
        if self.registry.is_main_thread() && self.run_aux_once() {
            return true;
        }

        let processing = Processing::start(&self.num_processing);
        let task = self.queue.try_dequeue();
        if let Some(task) = task {
            // SAFETY: Every queued task is a fresh block from this registry, dequeued once.
            unsafe { self.execute(task, Source::Main) };
        }
        drop(processing);

        if task.is_none() {
            self.wake_one();
        }
        task.is_some()
    }

    fn run_aux_once(&self) -> bool {
        match self.aux.try_dequeue() {
            Some(task) => {
                // SAFETY: Every queued task is a fresh block from this registry, dequeued once.
                unsafe { self.execute(task, Source::Aux) };
                true
            },
            None => false,
        }
    }

    /// Runs every queued auxiliary task in batches, returning how many ran. Callers check that
    /// they are allowed to.
    pub fn drain_aux(&self) -> usize {
        let mut batch = Vec::with_capacity(AUX_BATCH);
        let mut ran = 0;
        while self.aux.try_dequeue_bulk(&mut batch, AUX_BATCH) > 0 {
            for task in batch.drain(..) {
                // SAFETY: Every queued task is a fresh block from this registry, dequeued once.
                unsafe { self.execute(task, Source::Aux) };
                ran += 1;
            }
        }
        ran
    }

    /// Runs everything left in both queues until they stay empty.
    pub fn drain_all(&self) -> usize {
        let mut ran = 0;
        loop {
            ran += self.drain_aux();
            while let Some(task) = self.queue.try_dequeue() {
                // SAFETY: Every queued task is a fresh block from this registry, dequeued once.
                unsafe { self.execute(task, Source::Main) };
                ran += 1;
            }
            if self.queue.is_empty() && self.aux.is_empty() {
                return ran;
            }
        }
    }

    /// Runs a dequeued task, relaying its panic if it had no future to carry it.
    ///
    /// # Safety
    /// `task` must be a block allocated from this registry which hasn't been run before.
    pub unsafe fn execute(&self, task: NonNull<TaskHeader>, source: Source) {
        // SAFETY: Forwarded from the caller.
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| unsafe { block::execute(task, self) }));
        if source == Source::Main {
            self.num_tasks.fetch_sub(1, Ordering::SeqCst);
        }
        if let Err(payload) = result {
            self.relay_panic(TaskPanic::new(payload));
        }
    }

    fn relay_panic(&self, panic: TaskPanic) {
        if self.registry.is_main_thread() {
            return self.report_panic(panic);
        }

        let relay = block::allocate(&self.registry, Relay(panic));
        if let Err(Full(relay)) = self.aux.try_enqueue(relay) {
            warn!("auxiliary queue is full, reporting a task panic off the main thread");
            // SAFETY: The relay was never enqueued.
            let Relay(panic) = unsafe { block::take::<Relay>(relay, &self.registry) };
            self.report_panic(panic);
        }
    }

    /// Hands a panic to the handler. A panic raised by the handler itself is logged and dropped
    /// so it never unwinds through the pool's bookkeeping.
    pub fn report_panic(&self, panic: TaskPanic) {
        let handler = &self.panic_handler;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(panic))) {
            let nested = TaskPanic::new(payload);
            error!(panic = %nested, "panic handler panicked");
        }
    }

    /// Parks the calling thread until `done` holds or a short timeout passes.
    pub fn park_until(&self, done: impl Fn() -> bool) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut lock = self.done_lock.lock();
        if !done() {
            self.done.wait_for(&mut lock, PARK_TIMEOUT);
        }
        drop(lock);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn notify_completion(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _lock = self.done_lock.lock();
            self.done.notify_all();
        }
    }

    pub fn start_processing(&self) {
        self.num_processing.fetch_add(1, Ordering::SeqCst);
    }

    /// Parks an idle worker until there is a backlog to help with or the pool shuts down.
    pub fn idle(&self) -> Idle {
        let mut lock = self.sleep_lock.lock();
        self.num_sleeping.fetch_add(1, Ordering::SeqCst);
        self.num_processing.fetch_sub(1, Ordering::SeqCst);

        let idle = loop {
            if self.num_tasks.load(Ordering::SeqCst) > self.num_processing.load(Ordering::SeqCst) {
                break Idle::Retry;
            }
            if !self.running.load(Ordering::SeqCst) {
                break Idle::Stop;
            }
            self.wake.wait(&mut lock);
        };

        self.num_sleeping.fetch_sub(1, Ordering::SeqCst);
        if idle == Idle::Retry {
            self.num_processing.fetch_add(1, Ordering::SeqCst);
        }
        idle
    }

    /// Tells idle workers to stop once the backlog is gone.
    pub fn shut_down(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _lock = self.sleep_lock.lock();
        self.wake.notify_all();
    }
}

/// Counts the calling thread as processing the main queue until dropped.
struct Processing<'a>(&'a AtomicU32);

impl<'a> Processing<'a> {
    fn start(counter: &'a AtomicU32) -> Processing<'a> {
        counter.fetch_add(1, Ordering::SeqCst);
        Processing(counter)
    }
}

impl Drop for Processing<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
