//! Recording state management
//!
//! Defines the session state machine states, the per-cycle capture segments
//! used for elapsed time, and the `RecordingSession` shared by the pipeline.

use super::timing::TimingCorrector;
use crate::capture::{CaptureTarget, StreamType};
use crate::media::{MediaTime, Sample};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;

/// State of the recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Resolving the target and building the pipeline
    Configuring,
    Capturing,
    Paused,
    /// Stopping sources and closing output files
    Finalizing,
}

impl SessionState {
    /// Whether a session exists that `stop` can finalize
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Capturing | SessionState::Paused)
    }
}

/// One uninterrupted capture period
///
/// A new segment begins at start and at every resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSegment {
    pub index: usize,

    /// Duration of this segment in milliseconds
    pub duration_ms: f64,

    /// Milliseconds since the session was created
    pub process_time_start_ms: f64,

    pub process_time_end_ms: f64,

    pub unix_start_ms: u64,

    pub unix_end_ms: u64,

    #[serde(skip)]
    open: bool,
}

impl CaptureSegment {
    /// Begin a segment now
    pub fn new(index: usize, process_time_ms: f64) -> Self {
        let now = Utc::now();
        Self {
            index,
            duration_ms: 0.0,
            process_time_start_ms: process_time_ms,
            process_time_end_ms: process_time_ms,
            unix_start_ms: now.timestamp_millis() as u64,
            unix_end_ms: now.timestamp_millis() as u64,
            open: true,
        }
    }

    /// Close the segment
    pub fn end(&mut self, process_time_ms: f64) {
        if !self.open {
            return;
        }
        self.open = false;
        self.process_time_end_ms = process_time_ms;
        self.duration_ms = self.process_time_end_ms - self.process_time_start_ms;
        self.unix_end_ms = Utc::now().timestamp_millis() as u64;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Live state of one recording, shared by the router and the coordinator
pub struct RecordingSession {
    pub id: Uuid,
    pub stream_type: StreamType,
    pub target: CaptureTarget,
    created: Instant,
    /// Wall clock time the first sample reached the writer
    started_at: OnceLock<DateTime<Utc>>,
    pub timing: Mutex<TimingCorrector>,
    first_frame: OnceLock<Sample>,
    segments: Mutex<Vec<CaptureSegment>>,
}

impl RecordingSession {
    pub fn new(target: CaptureTarget, stream_type: StreamType) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_type,
            target,
            created: Instant::now(),
            started_at: OnceLock::new(),
            timing: Mutex::new(TimingCorrector::new()),
            first_frame: OnceLock::new(),
            segments: Mutex::new(Vec::new()),
        }
    }

    fn process_time_ms(&self) -> f64 {
        self.created.elapsed().as_secs_f64() * 1000.0
    }

    /// Record the wall-clock start. Only the first call has effect.
    pub fn mark_started(&self) -> bool {
        self.started_at.set(Utc::now()).is_ok()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    /// Retain the first routed video frame for the preview
    pub fn retain_first_frame(&self, sample: &Sample) {
        let _ = self.first_frame.set(sample.clone());
    }

    pub fn first_frame(&self) -> Option<&Sample> {
        self.first_frame.get()
    }

    /// Begin a segment, closing any open one
    pub fn begin_segment(&self) {
        let now = self.process_time_ms();
        let mut segments = self.segments.lock();
        if let Some(open) = segments.last_mut() {
            open.end(now);
        }
        let index = segments.len();
        segments.push(CaptureSegment::new(index, now));
    }

    pub fn end_segment(&self) {
        let now = self.process_time_ms();
        if let Some(open) = self.segments.lock().last_mut() {
            open.end(now);
        }
    }

    pub fn segments(&self) -> Vec<CaptureSegment> {
        self.segments.lock().clone()
    }

    /// Captured time, excluding pauses
    pub fn elapsed(&self) -> MediaTime {
        let now = self.process_time_ms();
        let total_ms: f64 = self
            .segments
            .lock()
            .iter()
            .map(|s| {
                if s.is_open() {
                    now - s.process_time_start_ms
                } else {
                    s.duration_ms
                }
            })
            .sum();
        MediaTime::from_secs_f64(total_ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SampleKind, VideoFrame};

    fn session() -> RecordingSession {
        RecordingSession::new(CaptureTarget::Display { display_id: 0 }, StreamType::Screen)
    }

    #[test]
    fn test_segment_end_is_idempotent() {
        let mut segment = CaptureSegment::new(0, 100.0);
        segment.end(350.0);
        segment.end(900.0);
        assert_eq!(segment.duration_ms, 250.0);
        assert!(!segment.is_open());
    }

    #[test]
    fn test_started_once() {
        let session = session();
        assert!(session.started_at().is_none());
        assert!(session.mark_started());
        let first = session.started_at();
        assert!(!session.mark_started());
        assert_eq!(session.started_at(), first);
        assert!(session.segments().is_empty());
    }

    #[test]
    fn test_elapsed_excludes_closed_gap() {
        let session = session();
        session.begin_segment();
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.end_segment();
        let paused_at = session.elapsed();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(session.elapsed(), paused_at);

        session.begin_segment();
        assert_eq!(session.segments().len(), 2);
        assert!(session.elapsed() >= paused_at);
        assert!(session.elapsed() < paused_at + MediaTime::from_millis(40));
    }

    #[test]
    fn test_first_frame_retained_once() {
        let session = session();
        let a = Sample::video(SampleKind::Video, VideoFrame::packed(1, 1, vec![1; 4]), MediaTime::ZERO, MediaTime::ZERO);
        let b = Sample::video(SampleKind::Video, VideoFrame::packed(1, 1, vec![2; 4]), MediaTime::ZERO, MediaTime::ZERO);
        session.retain_first_frame(&a);
        session.retain_first_frame(&b);
        assert_eq!(session.first_frame().and_then(|s| s.frame()).map(|f| f.data[0]), Some(1));
    }
}
