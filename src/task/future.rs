use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::alloc::ArenaRegistry;
use crate::pool::shared::Shared;
use crate::task::error::TaskPanic;

/// Where a task leaves its outcome, allocated from the submitting thread's arena.
pub(crate) struct FutureState<R> {
    finished: AtomicBool,
    outcome: UnsafeCell<MaybeUninit<Result<R, TaskPanic>>>,
}

impl<R> FutureState<R> {
    pub fn allocate(registry: &ArenaRegistry) -> NonNull<FutureState<R>> {
        let state = registry.allocate(Layout::new::<FutureState<R>>()).cast::<FutureState<R>>();
        // SAFETY: The block is fresh and laid out for a `FutureState<R>`.
        unsafe {
            state.write(FutureState {
                finished: AtomicBool::new(false),
                outcome: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
        state
    }

    /// # Safety
    /// `state` must be live and not yet completed.
    pub unsafe fn complete(state: NonNull<FutureState<R>>, outcome: Result<R, TaskPanic>) {
        // SAFETY: Only the job writes the outcome, and the future doesn't read it before
        // `finished` is set.
        unsafe {
            let state = state.as_ref();
            (*state.outcome.get()).write(outcome);
            state.finished.store(true, Ordering::SeqCst);
        }
    }
}

/// The pending result of a task submitted with
/// [`submit_future_task`](crate::pool::WorkerPool::submit_future_task).
///
/// Waiting doesn't block idly: the waiting thread runs other queued tasks until the result is
/// ready, only parking briefly when there is nothing it can run. Dropping an unfinished future
/// waits for it.
///
/// A task's panic is only resumed through [`value`](Future::value) or returned by
/// [`try_value`](Future::try_value). Dropping the future instead discards the panic with a
/// warning, and it never reaches the pool's panic handler.
pub struct Future<'p, R> {
    state: NonNull<FutureState<R>>,
    shared: &'p Shared,
    _marker: PhantomData<R>,
}

// SAFETY: The state is only read after the job has finished with it, and freeing it from another
// thread is routed through the registry.
unsafe impl<R: Send> Send for Future<'_, R> {}

impl<'p, R> Future<'p, R> {
    pub(crate) fn new(state: NonNull<FutureState<R>>, shared: &'p Shared) -> Future<'p, R> {
        Future {
            state,
            shared,
            _marker: PhantomData,
        }
    }

    fn state(&self) -> &FutureState<R> {
        // SAFETY: The state is freed only once the future is consumed or dropped.
        unsafe { self.state.as_ref() }
    }

    pub fn is_finished(&self) -> bool {
        self.state().finished.load(Ordering::SeqCst)
    }

    /// Helps run queued work until the task has finished. Returns false if it had already
    /// finished, without doing anything.
    pub fn wait(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        while !self.is_finished() {
            if !self.shared.help_once() {
                self.shared.park_until(|| self.is_finished());
            }
        }
        true
    }

    /// Waits for the task and returns its result.
    ///
    /// # Panics
    /// Resumes the task's panic on the calling thread if it panicked.
    pub fn value(self) -> R {
        match self.try_value() {
            Ok(value) => value,
            Err(panic) => panic.resume(),
        }
    }

    /// Waits for the task, returning its result or the panic it raised.
    ///
    /// # Errors
    /// Returns the [`TaskPanic`] caught while running the task.
    pub fn try_value(self) -> Result<R, TaskPanic> {
        self.wait();
        let this = ManuallyDrop::new(self);
        // SAFETY: The task has finished, so the outcome is initialized, and `this` is never
        // dropped so the outcome is read once.
        let outcome = unsafe { (*this.state().outcome.get()).assume_init_read() };
        this.release();
        outcome
    }

    fn release(&self) {
        // SAFETY: The state was allocated by this registry and is no longer used.
        unsafe { self.shared.registry.deallocate(self.state.cast()) }
    }
}

impl<R> Drop for Future<'_, R> {
    fn drop(&mut self) {
        self.wait();
        // SAFETY: The task has finished and the outcome hasn't been read.
        let outcome = unsafe { (*self.state().outcome.get()).assume_init_read() };
        self.release();
        if let Err(panic) = &outcome {
            warn!(%panic, "future dropped without observing its task's panic");
        }
    }
}

impl<R> Debug for Future<'_, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
