use std::alloc::Layout;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use crate::alloc::ArenaRegistry;
use crate::pool::shared::Shared;
use crate::task::error::TaskPanic;
use crate::task::future::FutureState;

/// The payload of a task block, consumed by running it.
pub(crate) trait Job: Send + 'static {
    fn run(self, shared: &Shared);
}

/// The type-erased front of every task block. Queues only ever hold pointers to this.
#[repr(C)]
pub(crate) struct TaskHeader {
    run: unsafe fn(NonNull<TaskHeader>, &Shared),
}

#[repr(C)]
struct RawTask<J> {
    header: TaskHeader,
    job: J,
}

/// Writes `job` into a block allocated from the calling thread's arena.
pub(crate) fn allocate<J: Job>(registry: &ArenaRegistry, job: J) -> NonNull<TaskHeader> {
    let block = registry.allocate(Layout::new::<RawTask<J>>()).cast::<RawTask<J>>();
    // SAFETY: The block is fresh and laid out for a `RawTask<J>`.
    unsafe {
        block.write(RawTask {
            header: TaskHeader { run: run::<J> },
            job,
        });
    }
    block.cast()
}

/// Moves the job out of its block and frees the block.
///
/// # Safety
/// `task` must come from [`allocate`] with the same `J` on this registry, and must not have been
/// taken or run before.
pub(crate) unsafe fn take<J: Job>(task: NonNull<TaskHeader>, registry: &ArenaRegistry) -> J {
    let block = task.cast::<RawTask<J>>();
    // SAFETY: The caller guarantees the block holds an initialized job of type `J` which is read
    // exactly once.
    let job = unsafe { ptr::read(&raw const (*block.as_ptr()).job) };
    // SAFETY: The block was allocated by this registry and nothing refers to it any more.
    unsafe { registry.deallocate(block.cast()) };
    job
}

/// # Safety
/// As for [`take`], with `J` matching the job the block was built with.
unsafe fn run<J: Job>(task: NonNull<TaskHeader>, shared: &Shared) {
    // SAFETY: Forwarded from the caller.
    let job = unsafe { take::<J>(task, &shared.registry) };
    job.run(shared);
}

/// Runs a task and frees its block.
///
/// # Safety
/// `task` must come from [`allocate`] on the registry of `shared` and must not have been taken or
/// run before.
pub(crate) unsafe fn execute(task: NonNull<TaskHeader>, shared: &Shared) {
    // SAFETY: The header is initialized by `allocate` and never written again.
    let run = unsafe { task.as_ref().run };
    // SAFETY: `run` was instantiated for the job type the block holds.
    unsafe { run(task, shared) }
}

/// A closure whose result nobody waits for. Panics escape to the pool, which relays them.
pub(crate) struct Detached<F>(pub F);

impl<F: FnOnce() + Send + 'static> Job for Detached<F> {
    fn run(self, _shared: &Shared) {
        (self.0)();
    }
}

/// A closure whose outcome, panic included, is written to a [`FutureState`].
pub(crate) struct Completing<F, R> {
    pub f: F,
    pub state: NonNull<FutureState<R>>,
}

// SAFETY: The state is written once by the job, and only read by its future after the write is
// published.
unsafe impl<F: Send, R: Send> Send for Completing<F, R> {}

impl<F, R> Job for Completing<F, R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    fn run(self, shared: &Shared) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(self.f)).map_err(TaskPanic::new);
        // SAFETY: The future keeps its state alive until it has observed completion.
        unsafe { FutureState::complete(self.state, outcome) };
        shared.notify_completion();
    }
}

/// Carries a panic from a detached task to the thread which owns the pool.
pub(crate) struct Relay(pub TaskPanic);

impl Job for Relay {
    fn run(self, shared: &Shared) {
        shared.report_panic(self.0);
    }
}
