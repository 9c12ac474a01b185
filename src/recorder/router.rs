//! Sample router
//!
//! Decides for every corrected sample whether it reaches an encoder input.
//! Shared by the video and audio lanes; each piece of mutable state has its
//! own lock or atomic so the lanes never wait on each other for long.
//!
//! Video path:
//! 1. timing correction (paused samples are dropped)
//! 2. pending frame save
//! 3. duplicate filter on the frame end point
//! 4. overlay settling gate
//! 5. input readiness, then compositing
//! 6. one-time writer session start, then append
//!
//! Audio goes straight to its track once the writer session has started.
//! Audio-only sessions start the session on their first audio sample.

use super::compositor::Compositor;
use super::coordinator::RecordingEvent;
use super::dedup::DedupWindow;
use super::state::RecordingSession;
use crate::media::{still, FrameSlot, MediaTime, Payload, Sample, SampleKind};
use crate::writer::pool::unique_path;
use crate::writer::{AppendOutcome, EncoderInput, TrackKind, WriterError, WriterPool};
use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Paused,
    BeforeSessionStart,
    Duplicate,
    OverlaySettling,
    NotReady,
    InputFinished,
    NoInput,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Appended,
    /// Stored as the latest camera frame
    Held,
    Dropped(DropReason),
}

/// Snapshot of router counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterCounts {
    pub appended: u64,
    pub held: u64,
    pub paused: u64,
    pub before_session_start: u64,
    pub duplicate: u64,
    pub overlay_settling: u64,
    pub not_ready: u64,
    pub input_finished: u64,
    pub no_input: u64,
    pub malformed: u64,
}

impl RouterCounts {
    pub fn dropped(&self) -> u64 {
        self.paused
            + self.before_session_start
            + self.duplicate
            + self.overlay_settling
            + self.not_ready
            + self.input_finished
            + self.no_input
            + self.malformed
    }
}

#[derive(Debug, Default)]
pub struct RouterStats {
    appended: AtomicU64,
    held: AtomicU64,
    paused: AtomicU64,
    before_session_start: AtomicU64,
    duplicate: AtomicU64,
    overlay_settling: AtomicU64,
    not_ready: AtomicU64,
    input_finished: AtomicU64,
    no_input: AtomicU64,
    malformed: AtomicU64,
}

impl RouterStats {
    fn record(&self, outcome: RouteOutcome) {
        let counter = match outcome {
            RouteOutcome::Appended => &self.appended,
            RouteOutcome::Held => &self.held,
            RouteOutcome::Dropped(reason) => match reason {
                DropReason::Paused => &self.paused,
                DropReason::BeforeSessionStart => &self.before_session_start,
                DropReason::Duplicate => &self.duplicate,
                DropReason::OverlaySettling => &self.overlay_settling,
                DropReason::NotReady => &self.not_ready,
                DropReason::InputFinished => &self.input_finished,
                DropReason::NoInput => &self.no_input,
                DropReason::Malformed => &self.malformed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> RouterCounts {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RouterCounts {
            appended: load(&self.appended),
            held: load(&self.held),
            paused: load(&self.paused),
            before_session_start: load(&self.before_session_start),
            duplicate: load(&self.duplicate),
            overlay_settling: load(&self.overlay_settling),
            not_ready: load(&self.not_ready),
            input_finished: load(&self.input_finished),
            no_input: load(&self.no_input),
            malformed: load(&self.malformed),
        }
    }
}

/// Holds back video frames after a presenter overlay mode change.
///
/// Each change bumps a generation; a delayed `settle` only re-opens the gate
/// if no newer change happened in the meantime.
#[derive(Debug)]
pub struct OverlayGate {
    safe: AtomicBool,
    generation: AtomicU64,
}

impl Default for OverlayGate {
    fn default() -> Self {
        Self {
            safe: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }
}

impl OverlayGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_safe(&self) -> bool {
        self.safe.load(Ordering::Acquire)
    }

    /// Close the gate; returns the generation to settle later
    pub fn mark_unsafe(&self) -> u64 {
        self.safe.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Re-open the gate if `generation` is still the latest change
    pub fn settle(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        self.safe.store(true, Ordering::Release);
        true
    }
}

pub struct SampleRouter {
    session: Arc<RecordingSession>,
    writer: Arc<WriterPool>,
    video_track: Option<TrackKind>,
    audio_led: bool,
    dedup: Mutex<DedupWindow>,
    compositor: Mutex<Compositor>,
    camera_slot: Arc<FrameSlot>,
    gate: Arc<OverlayGate>,
    save_pending: AtomicBool,
    stills_dir: PathBuf,
    events: broadcast::Sender<RecordingEvent>,
    stats: RouterStats,
}

impl SampleRouter {
    pub fn new(
        session: Arc<RecordingSession>,
        writer: Arc<WriterPool>,
        compositor: Compositor,
        camera_slot: Arc<FrameSlot>,
        gate: Arc<OverlayGate>,
        events: broadcast::Sender<RecordingEvent>,
    ) -> Self {
        let plan = writer.plan();
        let video_track = plan.tracks.iter().copied().find(TrackKind::is_video);
        let audio_led = plan.audio_led();
        let stills_dir = plan.output_dir.clone();
        Self {
            session,
            writer,
            video_track,
            audio_led,
            dedup: Mutex::new(DedupWindow::default()),
            compositor: Mutex::new(compositor),
            camera_slot,
            gate,
            save_pending: AtomicBool::new(false),
            stills_dir,
            events,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterCounts {
        self.stats.counts()
    }

    /// Save the next routed video frame as a PNG
    pub fn request_frame_save(&self) {
        self.save_pending.store(true, Ordering::Release);
    }

    /// Route one sample. Never blocks on the encoders.
    pub fn route(&self, sample: Sample) -> RouteOutcome {
        let outcome = match sample.kind {
            SampleKind::CameraOverlay => {
                self.camera_slot.store(sample);
                RouteOutcome::Held
            }
            SampleKind::Video => self.route_video(sample),
            SampleKind::SystemAudio | SampleKind::Microphone => self.route_audio(sample),
        };
        self.stats.record(outcome);
        if let RouteOutcome::Dropped(reason) = outcome {
            tracing::trace!("Dropped sample: {:?}", reason);
        }
        outcome
    }

    fn route_video(&self, sample: Sample) -> RouteOutcome {
        let Some(track) = self.video_track else {
            return RouteOutcome::Dropped(DropReason::NoInput);
        };
        let Some(input) = self.writer.input(track) else {
            return RouteOutcome::Dropped(DropReason::NoInput);
        };
        let Some(sample) = self.session.timing.lock().admit(sample) else {
            return RouteOutcome::Dropped(DropReason::Paused);
        };

        if self.save_pending.swap(false, Ordering::AcqRel) {
            self.save_still(&sample);
        }

        if !self.dedup.lock().accept(sample.end()) {
            return RouteOutcome::Dropped(DropReason::Duplicate);
        }
        if !self.gate.is_safe() {
            return RouteOutcome::Dropped(DropReason::OverlaySettling);
        }
        if input.is_finished() {
            return RouteOutcome::Dropped(DropReason::InputFinished);
        }
        if !input.is_ready() {
            return RouteOutcome::Dropped(DropReason::NotReady);
        }

        let Some(rendered) = sample.frame().and_then(|frame| self.compositor.lock().render(frame)) else {
            return RouteOutcome::Dropped(DropReason::Malformed);
        };
        let output = Sample {
            kind: SampleKind::Video,
            timing: sample.timing,
            payload: Payload::Video(rendered),
        };

        self.start_session(output.presentation());
        let first = self.session.first_frame().is_none();
        let retained = first.then(|| output.clone());
        let outcome = self.append(input, output);
        if let (RouteOutcome::Appended, Some(frame)) = (outcome, retained) {
            self.session.retain_first_frame(&frame);
        }
        outcome
    }

    fn route_audio(&self, sample: Sample) -> RouteOutcome {
        let Some(input) = TrackKind::for_sample(sample.kind, false).and_then(|track| self.writer.input(track)) else {
            return RouteOutcome::Dropped(DropReason::NoInput);
        };
        let Some(sample) = self.session.timing.lock().admit(sample) else {
            return RouteOutcome::Dropped(DropReason::Paused);
        };

        if self.writer.session_start().is_none() {
            if !self.audio_led {
                return RouteOutcome::Dropped(DropReason::BeforeSessionStart);
            }
            self.start_session(sample.presentation());
        }
        if input.is_finished() {
            return RouteOutcome::Dropped(DropReason::InputFinished);
        }
        if !input.is_ready() {
            return RouteOutcome::Dropped(DropReason::NotReady);
        }
        self.append(input, sample)
    }

    fn start_session(&self, at: MediaTime) {
        if self.writer.start_session_at(at) {
            self.session.mark_started();
            tracing::info!("Session {} clock started at {}", self.session.id, at);
        }
    }

    fn append(&self, input: &EncoderInput, sample: Sample) -> RouteOutcome {
        match input.append(sample) {
            Ok(AppendOutcome::Accepted) => RouteOutcome::Appended,
            Ok(AppendOutcome::NotReady) => RouteOutcome::Dropped(DropReason::NotReady),
            Ok(AppendOutcome::OutOfOrder) => RouteOutcome::Dropped(DropReason::Duplicate),
            Err(WriterError::InputFinished(_)) => RouteOutcome::Dropped(DropReason::InputFinished),
            Err(e) => {
                tracing::warn!("Append to {} input failed: {}", input.kind(), e);
                RouteOutcome::Dropped(DropReason::InputFinished)
            }
        }
    }

    fn save_still(&self, sample: &Sample) {
        let Some(frame) = sample.frame().cloned() else {
            return;
        };
        let stem = format!("Capture at {}", Local::now().format("%Y-%m-%d %H.%M.%S"));
        let path = unique_path(&self.stills_dir, &stem, "png");
        let events = self.events.clone();

        let spawned = std::thread::Builder::new()
            .name("frame-save".to_string())
            .spawn(move || match still::write_png(&frame, &path) {
                Ok(()) => {
                    tracing::info!("Saved frame to {:?}", path);
                    let _ = events.send(RecordingEvent::FrameSaved { path });
                }
                Err(e) => tracing::warn!("Failed to save frame: {}", e),
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn frame save thread: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureTarget, ResolvedTarget, StreamType};
    use crate::recorder::config::{RecorderSettings, StreamConfiguration};
    use crate::media::{AudioChunk, VideoFrame};
    use crate::writer::{AudioEncoding, MediaBackend, MediaJob, TrackSink, VideoEncoding, WriterPlan};
    use std::path::Path;
    use std::sync::Barrier;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    type Log = Arc<Mutex<Vec<(TrackKind, i64)>>>;

    struct LogSink {
        kind: TrackKind,
        log: Log,
        gate: Option<Arc<Barrier>>,
    }

    impl TrackSink for LogSink {
        fn write(&mut self, sample: &Sample, start: MediaTime) -> Result<(), WriterError> {
            if let Some(gate) = &self.gate {
                gate.wait();
            }
            self.log.lock().push((self.kind, (sample.presentation() - start).as_millis()));
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct LogMedia {
        log: Log,
        video_gate: Option<Arc<Barrier>>,
    }

    impl MediaBackend for LogMedia {
        fn open_video_track(&self, path: &Path, _: &VideoEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
            let kind = if path.ends_with("overlay.mp4") {
                TrackKind::CameraOverlay
            } else {
                TrackKind::Video
            };
            Ok(Box::new(LogSink { kind, log: self.log.clone(), gate: self.video_gate.clone() }))
        }

        fn open_audio_track(&self, path: &Path, _: &AudioEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
            let kind = if path.file_name().map_or(false, |n| n.to_string_lossy().starts_with("mic")) {
                TrackKind::Microphone
            } else {
                TrackKind::SystemAudio
            };
            Ok(Box::new(LogSink { kind, log: self.log.clone(), gate: None }))
        }

        fn run(&self, _: &MediaJob) -> Result<(), WriterError> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        router: SampleRouter,
        session: Arc<RecordingSession>,
        writer: Arc<WriterPool>,
        gate: Arc<OverlayGate>,
        slot: Arc<FrameSlot>,
        log: Log,
        events: broadcast::Receiver<RecordingEvent>,
    }

    fn fixture(stream_type: StreamType, settings: RecorderSettings, media: LogMedia) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = RecorderSettings {
            output_dir: dir.path().to_path_buf(),
            ..settings
        };
        let target = ResolvedTarget {
            target: CaptureTarget::Display { display_id: 0 },
            stream_type,
            width: 4,
            height: 4,
            display_id: Some(0),
        };
        let (config, _) = StreamConfiguration::derive(&target, &settings).unwrap();
        let overlay = settings.camera_overlay.enabled;
        let plan = WriterPlan::new(stream_type, config.clone(), &settings, overlay, "rec".to_string());
        let log = media.log.clone();
        let writer = Arc::new(WriterPool::create(plan, Arc::new(media)).unwrap());
        let session = Arc::new(RecordingSession::new(target.target.clone(), stream_type));
        let slot = Arc::new(FrameSlot::new());
        let gate = Arc::new(OverlayGate::new());
        let mut compositor = Compositor::new(&config);
        if overlay {
            compositor = compositor.with_camera(settings.camera_overlay.clone(), slot.clone());
        }
        let (events_tx, events) = broadcast::channel(16);
        let router = SampleRouter::new(session.clone(), writer.clone(), compositor, slot.clone(), gate.clone(), events_tx);
        Fixture { _dir: dir, router, session, writer, gate, slot, log, events }
    }

    fn screen() -> Fixture {
        let settings = RecorderSettings {
            record_system_audio: true,
            ..Default::default()
        };
        fixture(StreamType::Screen, settings, LogMedia::default())
    }

    fn frame(ms: i64) -> Sample {
        Sample::video(SampleKind::Video, VideoFrame::packed(4, 4, vec![7; 64]), MediaTime::from_millis(ms), MediaTime::from_millis(33))
    }

    fn audio(kind: SampleKind, ms: i64) -> Sample {
        Sample::audio(kind, AudioChunk::new(48_000, 2, vec![0.0; 960]), MediaTime::from_millis(ms))
    }

    fn finish(f: &Fixture) -> Vec<(TrackKind, i64)> {
        f.writer.finish();
        f.log.lock().clone()
    }

    #[test]
    fn test_scenario_a_in_order_frames_all_accepted() {
        let f = screen();
        for i in 0..10 {
            assert_eq!(f.router.route(frame(i * 33)), RouteOutcome::Appended);
        }
        assert_eq!(f.writer.session_start(), Some(MediaTime::ZERO));
        assert!(f.session.started_at().is_some());
        assert_eq!(f.router.stats().dropped(), 0);

        let times: Vec<i64> = finish(&f).into_iter().map(|(_, t)| t).collect();
        assert_eq!(times, (0..10).map(|i| i * 33).collect::<Vec<_>>());
    }

    #[test]
    fn test_scenario_b_pause_gap_removed() {
        let f = screen();
        for i in 0..5 {
            f.router.route(frame(i * 33));
        }
        f.session.timing.lock().pause();
        assert_eq!(f.router.route(frame(165)), RouteOutcome::Dropped(DropReason::Paused));
        assert_eq!(f.router.route(frame(198)), RouteOutcome::Dropped(DropReason::Paused));
        f.session.timing.lock().resume();
        assert_eq!(f.router.route(frame(5165)), RouteOutcome::Appended);

        let log = finish(&f);
        assert_eq!(log.len(), 6);
        assert_eq!(log.last().map(|(_, t)| *t), Some(165));
        assert_eq!(f.router.stats().paused, 2);
    }

    #[test]
    fn test_scenario_d_duplicate_frame_dropped() {
        let f = screen();
        assert_eq!(f.router.route(frame(100)), RouteOutcome::Appended);
        assert_eq!(f.router.route(frame(100)), RouteOutcome::Dropped(DropReason::Duplicate));
        assert_eq!(finish(&f).len(), 1);
        assert_eq!(f.router.stats().duplicate, 1);
    }

    #[test]
    fn test_scenario_e_screen_frame_before_camera_passes_through() {
        let settings = RecorderSettings {
            camera_overlay: crate::recorder::config::CameraOverlaySettings {
                enabled: true,
                ..Default::default()
            },
            record_system_audio: false,
            ..Default::default()
        };
        let f = fixture(StreamType::Screen, settings, LogMedia::default());
        let screen_frame = frame(0);
        assert_eq!(f.router.route(screen_frame.clone()), RouteOutcome::Appended);

        let kept = f.session.first_frame().and_then(|s| s.frame()).map(|fr| fr.sequence);
        assert_eq!(kept, screen_frame.frame().map(|fr| fr.sequence));

        let camera = Sample::video(SampleKind::CameraOverlay, VideoFrame::packed(2, 2, vec![255; 16]), MediaTime::ZERO, MediaTime::ZERO);
        assert_eq!(f.router.route(camera), RouteOutcome::Held);
        assert!(f.slot.latest().is_some());
        assert_eq!(finish(&f), vec![(TrackKind::CameraOverlay, 0)]);
    }

    #[test]
    fn test_not_ready_input_drops_without_blocking() {
        let barrier = Arc::new(Barrier::new(2));
        let media = LogMedia {
            video_gate: Some(barrier.clone()),
            ..Default::default()
        };
        let settings = RecorderSettings {
            record_system_audio: false,
            encoder_queue_capacity: 1,
            ..Default::default()
        };
        let f = fixture(StreamType::Screen, settings, media);
        let input = f.writer.input(TrackKind::Video).unwrap().clone();

        // The worker takes the first frame and blocks inside the sink
        assert_eq!(f.router.route(frame(0)), RouteOutcome::Appended);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !input.is_ready() && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(f.router.route(frame(33)), RouteOutcome::Appended);

        let begin = Instant::now();
        assert_eq!(f.router.route(frame(66)), RouteOutcome::Dropped(DropReason::NotReady));
        assert!(begin.elapsed() < Duration::from_millis(100));

        barrier.wait();
        barrier.wait();
        assert_eq!(finish(&f).len(), 2);
        assert_eq!(f.router.stats().not_ready, 1);
    }

    #[test]
    fn test_audio_waits_for_video_session_start() {
        let f = screen();
        assert_eq!(
            f.router.route(audio(SampleKind::SystemAudio, 0)),
            RouteOutcome::Dropped(DropReason::BeforeSessionStart)
        );
        assert_eq!(f.router.route(frame(10)), RouteOutcome::Appended);
        assert_eq!(f.router.route(audio(SampleKind::SystemAudio, 20)), RouteOutcome::Appended);
        assert_eq!(
            f.router.route(audio(SampleKind::Microphone, 20)),
            RouteOutcome::Dropped(DropReason::NoInput)
        );
    }

    #[test]
    fn test_audio_only_session_started_by_audio() {
        let settings = RecorderSettings {
            record_microphone: true,
            ..Default::default()
        };
        let f = fixture(StreamType::SystemAudio, settings, LogMedia::default());
        assert_eq!(f.router.route(frame(0)), RouteOutcome::Dropped(DropReason::NoInput));
        assert_eq!(f.router.route(audio(SampleKind::Microphone, 50)), RouteOutcome::Appended);
        assert_eq!(f.router.route(audio(SampleKind::SystemAudio, 60)), RouteOutcome::Appended);
        assert_eq!(f.writer.session_start(), Some(MediaTime::from_millis(50)));

        let mut log = finish(&f);
        log.sort();
        assert_eq!(log, vec![(TrackKind::SystemAudio, 10), (TrackKind::Microphone, 0)]);
    }

    #[test]
    fn test_overlay_gate_holds_frames_until_settled() {
        let f = screen();
        let first = f.gate.mark_unsafe();
        assert_eq!(f.router.route(frame(0)), RouteOutcome::Dropped(DropReason::OverlaySettling));

        let second = f.gate.mark_unsafe();
        assert!(!f.gate.settle(first));
        assert_eq!(f.router.route(frame(33)), RouteOutcome::Dropped(DropReason::OverlaySettling));

        assert!(f.gate.settle(second));
        assert_eq!(f.router.route(frame(66)), RouteOutcome::Appended);
    }

    #[test]
    fn test_frames_after_finish_rejected() {
        let f = screen();
        f.router.route(frame(0));
        f.writer.finish();
        assert_eq!(f.router.route(frame(33)), RouteOutcome::Dropped(DropReason::InputFinished));
    }

    #[tokio::test]
    async fn test_frame_save_writes_png_and_keeps_routing() {
        let mut f = screen();
        f.router.request_frame_save();
        assert_eq!(f.router.route(frame(0)), RouteOutcome::Appended);

        let event = tokio::time::timeout(Duration::from_secs(5), f.events.recv()).await.unwrap().unwrap();
        match event {
            RecordingEvent::FrameSaved { path } => {
                assert!(path.is_file());
                assert!(path.file_name().unwrap().to_string_lossy().starts_with("Capture at "));
            }
            other => panic!("unexpected event {:?}", other),
        }
        f.writer.finish();
    }
}
