//! Pause-gap timestamp correction
//!
//! Samples arriving while paused are discarded. The first sample after a
//! resume measures the gap since the last sample admitted before the pause
//! and grows the cumulative offset by it; every admitted sample is moved
//! back by that offset so the encoded timeline stays continuous.

use crate::media::{MediaTime, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPhase {
    Running,
    Paused,
    /// Resumed, gap not measured yet
    Resuming,
}

#[derive(Debug)]
pub struct TimingCorrector {
    phase: TimingPhase,
    offset: MediaTime,
    /// Latest corrected end point admitted
    last_end: Option<MediaTime>,
    discarded: u64,
}

impl Default for TimingCorrector {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingCorrector {
    pub fn new() -> Self {
        Self {
            phase: TimingPhase::Running,
            offset: MediaTime::ZERO,
            last_end: None,
            discarded: 0,
        }
    }

    pub fn phase(&self) -> TimingPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.phase == TimingPhase::Paused
    }

    /// Cumulative paused duration removed from the timeline
    pub fn offset(&self) -> MediaTime {
        self.offset
    }

    /// Samples discarded while paused
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Returns false if already paused
    pub fn pause(&mut self) -> bool {
        if self.phase == TimingPhase::Paused {
            return false;
        }
        self.phase = TimingPhase::Paused;
        true
    }

    /// Returns false if not paused
    pub fn resume(&mut self) -> bool {
        if self.phase != TimingPhase::Paused {
            return false;
        }
        self.phase = TimingPhase::Resuming;
        true
    }

    /// Correct a sample, or `None` if it arrived while paused
    pub fn admit(&mut self, sample: Sample) -> Option<Sample> {
        match self.phase {
            TimingPhase::Paused => {
                self.discarded += 1;
                return None;
            }
            TimingPhase::Resuming => {
                if let Some(last_end) = self.last_end {
                    let gap = (sample.presentation() - self.offset) - last_end;
                    if gap.is_positive() {
                        self.offset += gap;
                        tracing::debug!("Removed {} pause gap, offset now {}", gap, self.offset);
                    }
                }
                self.phase = TimingPhase::Running;
            }
            TimingPhase::Running => {}
        }

        let corrected = if self.offset.is_zero() {
            sample
        } else {
            sample.retimed(self.offset)
        };
        let end = corrected.end();
        if self.last_end.map_or(true, |last| end > last) {
            self.last_end = Some(end);
        }
        Some(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SampleKind, VideoFrame};

    fn frame(ms: i64) -> Sample {
        Sample::video(
            SampleKind::Video,
            VideoFrame::packed(1, 1, vec![0; 4]),
            MediaTime::from_millis(ms),
            MediaTime::from_millis(33),
        )
    }

    fn admitted_ms(timing: &mut TimingCorrector, ms: i64) -> Option<i64> {
        timing.admit(frame(ms)).map(|s| s.presentation().as_millis())
    }

    #[test]
    fn test_no_offset_without_pause() {
        let mut timing = TimingCorrector::new();
        for ms in [0, 33, 66] {
            assert_eq!(admitted_ms(&mut timing, ms), Some(ms));
        }
        assert!(timing.offset().is_zero());
    }

    #[test]
    fn test_pause_drops_and_resume_removes_gap() {
        let mut timing = TimingCorrector::new();
        for ms in [0, 33, 66, 99, 132] {
            admitted_ms(&mut timing, ms);
        }
        assert!(timing.pause());
        assert_eq!(admitted_ms(&mut timing, 165), None);
        assert_eq!(admitted_ms(&mut timing, 198), None);
        assert_eq!(timing.discarded(), 2);

        assert!(timing.resume());
        assert_eq!(admitted_ms(&mut timing, 5165), Some(165));
        assert_eq!(admitted_ms(&mut timing, 5198), Some(198));
        assert_eq!(timing.offset(), MediaTime::from_millis(5000));
    }

    #[test]
    fn test_offset_accumulates_across_cycles() {
        let mut timing = TimingCorrector::new();
        admitted_ms(&mut timing, 0);

        timing.pause();
        timing.resume();
        assert_eq!(admitted_ms(&mut timing, 1033), Some(33));

        timing.pause();
        timing.resume();
        assert_eq!(admitted_ms(&mut timing, 3066), Some(66));
        assert_eq!(timing.offset(), MediaTime::from_millis(3000));
    }

    #[test]
    fn test_offset_never_decreases() {
        let mut timing = TimingCorrector::new();
        admitted_ms(&mut timing, 100);
        timing.pause();
        timing.resume();
        // Late sample from before the pause
        assert_eq!(admitted_ms(&mut timing, 90), Some(90));
        assert!(timing.offset().is_zero());
    }

    #[test]
    fn test_resume_before_any_sample_applies_no_offset() {
        let mut timing = TimingCorrector::new();
        timing.pause();
        timing.resume();
        assert_eq!(admitted_ms(&mut timing, 4000), Some(4000));
        assert!(!timing.resume());
    }
}
