//! Cheap identity for the calling thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Returns a process-unique, non-zero token for the calling thread. Unlike
/// [`ThreadId`](std::thread::ThreadId), a token fits in an atomic, which lets arenas record their
/// owner without a lock. Zero is reserved for "no owner".
pub fn token() -> u64 {
    TOKEN.with(|token| match token.get() {
        0 => {
            let new = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            token.set(new);
            new
        },
        existing => existing,
    })
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_tokens_are_stable_and_distinct() {
        let here = token();
        assert_ne!(here, 0, "Zero is reserved for unowned arenas.");
        assert_eq!(token(), here, "A thread should keep its token.");

        let there = thread::spawn(token).join().expect("token thread panicked");
        assert_ne!(here, there, "Different threads should receive different tokens.");
    }
}
