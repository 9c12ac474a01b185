//! Single-slot, last-writer-wins frame holder

use super::sample::Sample;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds only the most recent sample offered to it.
///
/// Writers replace the slot and readers clone the shared payload, so the
/// lock is held only for a pointer swap.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Sample>>,
    version: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held sample
    pub fn store(&self, sample: Sample) {
        *self.latest.lock() = Some(sample);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Most recent sample, if any has arrived
    pub fn latest(&self) -> Option<Sample> {
        self.latest.lock().clone()
    }

    /// Incremented on every store
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        *self.latest.lock() = None;
    }
}
