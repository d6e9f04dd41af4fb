use std::time::Instant;

use segment_runtime::{PoolConfig, WorkerPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TASKS: u64 = 10_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = match WorkerPool::new(PoolConfig::default().with_thread_name("demo")) {
        Ok(pool) => pool,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        },
    };

    let start = Instant::now();
    let futures: Vec<_> = (0..TASKS).map(|i| pool.submit_future_task(move || i * i)).collect();
    let sum: u64 = futures.into_iter().map(|future| future.value()).sum();
    info!(tasks = TASKS, sum, elapsed = ?start.elapsed(), "squared on the pool");

    for i in 0..4 {
        pool.submit_task_aux(move || info!(i, "auxiliary task ran on the main thread"));
    }
    pool.submit_task(|| panic!("a detached task failing on purpose"));
    while pool.pending() > 0 {
        pool.help();
    }
    let drained = pool.drain_aux();
    info!(drained, released = pool.purge(), "drained the auxiliary queue");
}
