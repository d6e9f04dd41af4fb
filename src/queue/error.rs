use std::error;
use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;

use derive_more::{Display, Error, IsVariant};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Error, IsVariant)]
pub enum CapacityError {
    #[display("queue capacity {_0} is not a power of two")]
    NotPowerOfTwo(#[error(not(source))] usize),
    #[display("queue capacity {capacity} must exceed 64 slots for each of {threads} threads")]
    TooSmall {
        capacity: usize,
        threads: usize,
    },
}

/// Returned by [`MpmcQueue::try_enqueue`](super::MpmcQueue::try_enqueue) when every slot is
/// reserved, handing the rejected item back.
pub struct Full<T>(pub NonNull<T>);

impl<T> Full<T> {
    pub fn into_inner(self) -> NonNull<T> {
        self.0
    }
}

impl<T> Debug for Full<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Full").field(&self.0).finish()
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T> error::Error for Full<T> {}
