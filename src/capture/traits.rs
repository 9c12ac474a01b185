//! Capture trait definitions
//!
//! Platform-agnostic contract every capture adapter implements, plus the
//! sink adapters push their samples into.

use crate::media::{FrameSlot, Sample, SampleKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// OS permission a capture source depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    Screen,
    Camera,
    Microphone,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionKind::Screen => "Screen recording",
            PermissionKind::Camera => "Camera",
            PermissionKind::Microphone => "Microphone",
        };
        f.write_str(name)
    }
}

/// Errors raised by capture adapters and backends
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("{0} permission denied")]
    PermissionDenied(PermissionKind),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Target not resolvable: {0}")]
    UnresolvedTarget(String),

    #[error("Source is already running")]
    AlreadyRunning,

    #[error("Source was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("Source is not running")]
    NotRunning,

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Runtime failure reported by a running source
#[derive(Debug, Clone)]
pub struct StreamFault {
    pub source: String,
    pub message: String,
}

/// Producer side of the routing lanes.
///
/// `send` never blocks: when a lane is full the sample is dropped and
/// counted. Camera overlay frames skip the lanes and replace the
/// compositor's latest-frame slot.
#[derive(Clone)]
pub struct SampleSink {
    video: mpsc::Sender<Sample>,
    audio: mpsc::Sender<Sample>,
    overlay: Arc<FrameSlot>,
    faults: mpsc::UnboundedSender<StreamFault>,
    dropped: Arc<AtomicU64>,
}

impl SampleSink {
    pub fn new(
        video: mpsc::Sender<Sample>,
        audio: mpsc::Sender<Sample>,
        overlay: Arc<FrameSlot>,
        faults: mpsc::UnboundedSender<StreamFault>,
    ) -> Self {
        Self {
            video,
            audio,
            overlay,
            faults,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand a sample to the pipeline. Returns false if it was dropped.
    pub fn send(&self, sample: Sample) -> bool {
        let lane = match sample.kind {
            SampleKind::CameraOverlay => {
                self.overlay.store(sample);
                return true;
            }
            SampleKind::Video => &self.video,
            SampleKind::SystemAudio | SampleKind::Microphone => &self.audio,
        };

        match lane.try_send(sample) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(sample)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::debug!("Lane full, dropped {:?} sample ({} total)", sample.kind, dropped);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Report a runtime stream failure; the session stops and finalizes
    pub fn fail(&self, source: &str, message: impl Into<String>) {
        let fault = StreamFault {
            source: source.to_string(),
            message: message.into(),
        };
        tracing::error!("Capture source {} failed: {}", fault.source, fault.message);
        let _ = self.faults.send(fault);
    }

    /// Samples dropped because a lane was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A live capture mechanism producing timestamped samples.
///
/// Sources are single use: once stopped they cannot be started again.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Identifier used in logs and fault reports
    fn id(&self) -> &str;

    /// Sample kinds this source emits
    fn kinds(&self) -> Vec<SampleKind>;

    /// Start delivering samples into `sink`.
    ///
    /// Returns once the underlying stream has confirmed it is running.
    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()>;

    /// Stop delivery and release OS handles
    async fn stop(&mut self) -> CaptureResult<()>;

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTime, VideoFrame};

    fn frame_sample(kind: SampleKind) -> Sample {
        Sample::video(
            kind,
            VideoFrame::packed(1, 1, vec![0, 0, 0, 255]),
            MediaTime::ZERO,
            MediaTime::from_millis(33),
        )
    }

    #[test]
    fn test_full_lane_drops_without_blocking() {
        let (video_tx, _video_rx) = mpsc::channel(1);
        let (audio_tx, _audio_rx) = mpsc::channel(1);
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();
        let sink = SampleSink::new(video_tx, audio_tx, Arc::new(FrameSlot::new()), fault_tx);

        assert!(sink.send(frame_sample(SampleKind::Video)));
        assert!(!sink.send(frame_sample(SampleKind::Video)));
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_overlay_frames_bypass_lanes() {
        let (video_tx, mut video_rx) = mpsc::channel(1);
        let (audio_tx, _audio_rx) = mpsc::channel(1);
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();
        let slot = Arc::new(FrameSlot::new());
        let sink = SampleSink::new(video_tx, audio_tx, slot.clone(), fault_tx);

        assert!(sink.send(frame_sample(SampleKind::CameraOverlay)));
        assert!(video_rx.try_recv().is_err());
        assert!(slot.latest().is_some());
    }

    #[test]
    fn test_fail_reports_fault() {
        let (video_tx, _video_rx) = mpsc::channel(1);
        let (audio_tx, _audio_rx) = mpsc::channel(1);
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let sink = SampleSink::new(video_tx, audio_tx, Arc::new(FrameSlot::new()), fault_tx);

        sink.fail("screen", "window closed");
        let fault = fault_rx.try_recv().unwrap();
        assert_eq!(fault.source, "screen");
        assert_eq!(fault.message, "window closed");
    }
}
