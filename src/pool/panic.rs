use derive_more::{Display, Error};

use crate::util::panic::Panic;

#[derive(Debug, Display, Error)]
#[display("the auxiliary queue can only be drained by the thread which created the pool")]
pub struct NotMainThreadPanic;
impl Panic for NotMainThreadPanic {}
