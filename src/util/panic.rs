use std::error::Error;

use derive_more::{Display, Error};

/// An error type describing a violated precondition. Rather than being returned, these are raised
/// through [`panic`](Panic::panic) because the caller has broken an invariant that can't be
/// recovered from at runtime.
pub trait Panic: Error {
    /// Panics with the message of the implementing type.
    fn panic(&self) -> ! {
        panic!("{}", self)
    }
}

#[derive(Debug, Display, Error)]
#[display("unexpected OS error with code: {_0}")]
pub struct UnexpectedErrorPanic(#[error(not(source))] pub i32);
impl Panic for UnexpectedErrorPanic {}

#[allow(unused_macros)]
macro_rules! assert_panics {
    ($run:block) => {
        assert_panics!($run, "assertion failed to panic")
    };
    ($run:block, $msg:literal) => {
        assert!(
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $run)).is_err(),
            $msg
        );
        println!("^ panic caught");
    };
}

#[allow(unused_imports)]
pub(crate) use assert_panics;
