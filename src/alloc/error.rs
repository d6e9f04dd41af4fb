use derive_more::{Display, Error};

/// Returned by a ring arena which can't fit a request, even after reclaiming every freed
/// allocation it could reach.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Error)]
#[display("arena out of space for {size} bytes aligned to {align}")]
pub struct OutOfSpace {
    pub size: usize,
    pub align: usize,
}
