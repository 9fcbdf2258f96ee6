//! Process-wide sequence numbers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing sequence numbers.
///
/// One allocator is owned by each proxy instance and shared through `Arc`.
/// Request order and response order keys come from the same counter, so a
/// number is never reused for either purpose.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: AtomicU64,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number. The first call returns 1.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently allocated number (0 if none yet).
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}
