//! Recent-history duplicate filter for primary video frames

use crate::media::MediaTime;
use std::collections::VecDeque;

/// Number of frame end points remembered
pub const DEDUP_WINDOW: usize = 20;

/// Bounded FIFO of the end points (presentation + duration) of the most
/// recently accepted frames.
///
/// A frame whose end point is at or before any remembered end point is
/// rejected. Frames older than the window's horizon are not detected.
#[derive(Debug)]
pub struct DedupWindow {
    ends: VecDeque<MediaTime>,
    capacity: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW)
    }
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ends: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `end` and return true, or return false for a duplicate
    pub fn accept(&mut self, end: MediaTime) -> bool {
        if self.ends.iter().any(|seen| *seen >= end) {
            return false;
        }
        if self.ends.len() == self.capacity {
            self.ends.pop_front();
        }
        self.ends.push_back(end);
        true
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    #[cfg(test)]
    pub fn reset(&mut self) {
        self.ends.clear();
    }
}
