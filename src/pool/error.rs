use std::error;
use std::fmt::{self, Debug, Formatter};
use std::io;

use derive_more::{Display, Error, From, IsVariant};

use crate::queue::CapacityError;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, From, Error, IsVariant)]
pub enum ConfigError {
    #[display("a pool needs at least one worker")]
    NoWorkers,
    #[display("arena segments must be larger than zero bytes")]
    ArenaSize,
    #[from]
    Capacity(CapacityError),
}

#[derive(Debug, Display, From, Error, IsVariant)]
pub enum PoolError {
    #[display("invalid pool configuration: {_0}")]
    Config(ConfigError),
    #[display("failed to spawn a worker thread: {_0}")]
    Spawn(io::Error),
}

impl From<CapacityError> for PoolError {
    fn from(value: CapacityError) -> Self {
        PoolError::Config(value.into())
    }
}

/// Returned by [`WorkerPool::try_submit_task`](super::WorkerPool::try_submit_task) when the queue
/// is full, handing the closure back.
pub struct Rejected<F>(pub F);

impl<F> Rejected<F> {
    pub fn into_inner(self) -> F {
        self.0
    }
}

impl<F> Debug for Rejected<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejected").finish_non_exhaustive()
    }
}

impl<F> fmt::Display for Rejected<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "task rejected, the queue is full")
    }
}

impl<F> error::Error for Rejected<F> {}
