use std::any::Any;
use std::error;
use std::fmt::{self, Debug, Formatter};
use std::panic;

/// A panic caught while running a task, holding the original payload.
pub struct TaskPanic {
    payload: Box<dyn Any + Send>,
}

impl TaskPanic {
    pub fn new(payload: Box<dyn Any + Send>) -> TaskPanic {
        TaskPanic { payload }
    }

    /// The panic message, if the payload was a string.
    pub fn message(&self) -> Option<&str> {
        self.payload.downcast_ref::<&'static str>()
            .copied()
            .or_else(|| self.payload.downcast_ref::<String>().map(String::as_str))
    }

    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }

    /// Continues unwinding with the original payload on the calling thread.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl Debug for TaskPanic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPanic")
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "task panicked: {message}"),
            None => write!(f, "task panicked with a non-string payload"),
        }
    }
}

impl error::Error for TaskPanic {}
