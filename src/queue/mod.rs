//! A bounded lock-free queue of raw pointers, shared by any number of producers and consumers.

pub mod error;
pub mod mpmc;

#[cfg(test)]
mod tests;

#[doc(inline)]
pub use error::{CapacityError, Full};
#[doc(inline)]
pub use mpmc::{MpmcQueue, check_capacity};
