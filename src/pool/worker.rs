use std::thread;

use tracing::debug;

use crate::pool::shared::{Idle, Shared, Source};

/// The body of worker thread `index`: take tasks until the main queue is empty, purge the arena,
/// then wait for more work or for shutdown.
pub(crate) fn run(shared: &Shared, index: usize) {
    shared.registry.claim(index);
    debug!(worker = index, "worker started");

    shared.start_processing();
    let mut ran = 0usize;
    loop {
        while let Some(task) = shared.queue.try_dequeue() {
            // SAFETY: Every queued task is a fresh block from this registry, dequeued once.
            unsafe { shared.execute(task, Source::Main) };
            ran += 1;
        }

        shared.registry.purge_local();
        match shared.idle() {
            Idle::Retry => thread::yield_now(),
            Idle::Stop => break,
        }
    }

    debug!(worker = index, ran, "worker stopped");
}
