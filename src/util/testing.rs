#![cfg(test)]

use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts how many times it (or any of its clones) has been dropped.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(pub Arc<AtomicUsize>);

impl DropCounter {
    pub fn new() -> DropCounter {
        DropCounter::default()
    }

    pub fn drops(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Deref for DropCounter {
    type Target = Arc<AtomicUsize>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A drop guard which bumps the shared count of a [`DropCounter`].
#[derive(Debug)]
pub struct Counted(pub Arc<AtomicUsize>);

impl Counted {
    pub fn new(counter: &DropCounter) -> Counted {
        Counted(Arc::clone(&counter.0))
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lets tests hand raw allocation pointers to other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPtr(pub NonNull<u8>);

// SAFETY: Tests only use the pointer for frees and byte checks that the test itself synchronizes.
unsafe impl Send for SendPtr {}

impl SendPtr {
    pub fn get(self) -> NonNull<u8> {
        self.0
    }
}

/// Installs a test-writer subscriber so `tracing` output shows up under
/// `cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
