use derive_more::{Display, Error};

use crate::util::panic::Panic;

#[derive(Debug, Display, Error)]
#[display("allocation offset {offset} must be smaller than the allocation size {size}")]
pub struct OffsetPanic {
    pub offset: usize,
    pub size: usize,
}
impl Panic for OffsetPanic {}

#[derive(Debug, Display, Error)]
#[display("alignment {_0} is not a power of two")]
pub struct InvalidAlignmentPanic(#[error(not(source))] pub usize);
impl Panic for InvalidAlignmentPanic {}

#[derive(Debug, Display, Error)]
#[display("invalid segment size {_0}")]
pub struct SegmentSizePanic(#[error(not(source))] pub usize);
impl Panic for SegmentSizePanic {}

#[derive(Debug, Display, Error)]
#[display("arena accessed by a thread that doesn't own it")]
pub struct NotOwnerPanic;
impl Panic for NotOwnerPanic {}

#[derive(Debug, Display, Error)]
#[display("arena {_0} can't be claimed by this thread")]
pub struct AlreadyClaimedPanic(#[error(not(source))] pub usize);
impl Panic for AlreadyClaimedPanic {}

#[derive(Debug, Display, Error)]
#[display("pointer wasn't allocated by this arena")]
pub struct ForeignPointerPanic;
impl Panic for ForeignPointerPanic {}

#[derive(Debug, Display, Error)]
#[display("allocation freed twice")]
pub struct DoubleFreePanic;
impl Panic for DoubleFreePanic {}

#[derive(Debug, Display, Error)]
#[display("arena dropped with {_0} live allocations")]
pub struct LeakedAllocationsPanic(#[error(not(source))] pub usize);
impl Panic for LeakedAllocationsPanic {}
