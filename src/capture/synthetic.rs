//! Synthetic capture backend
//!
//! Produces deterministic test-pattern video and sine-tone audio without
//! touching any OS capture API, or hands the running sink to the caller so
//! samples can be injected by hand. Used by the test suite and the binary's
//! dry-run mode.

use super::backend::{CaptureBackend, CapturePlan};
use super::target::{CaptureTarget, ResolvedTarget};
use super::traits::{CaptureError, CaptureResult, CaptureSource, PermissionKind, SampleSink};
use crate::media::{AudioChunk, MediaTime, Sample, SampleKind, VideoFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Audio chunk length for generated tones
const TONE_CHUNK_MS: u32 = 20;

/// Handle for injecting samples into a manually driven session
#[derive(Clone, Default)]
pub struct SyntheticFeed {
    sink: Arc<Mutex<Option<SampleSink>>>,
}

impl SyntheticFeed {
    /// Whether a session is currently attached
    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Push one sample; false if no session is attached or the lane was full
    pub fn push(&self, sample: Sample) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(sample),
            None => false,
        }
    }

    /// Report a stream failure as the capture source would
    pub fn fail(&self, message: &str) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => {
                sink.fail("synthetic", message);
                true
            }
            None => false,
        }
    }

    fn attach(&self, sink: SampleSink) {
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        self.sink.lock().take();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Generated,
    Manual,
}

pub struct SyntheticBackend {
    width: u32,
    height: u32,
    mode: Mode,
    screen_permission: bool,
    grant_on_request: bool,
    camera_permission: bool,
    feed: SyntheticFeed,
    settings_opened: Mutex<Vec<PermissionKind>>,
}

impl SyntheticBackend {
    /// Backend generating a test pattern of `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: Mode::Generated,
            screen_permission: true,
            grant_on_request: false,
            camera_permission: true,
            feed: SyntheticFeed::default(),
            settings_opened: Mutex::new(Vec::new()),
        }
    }

    /// Produce nothing on its own; samples come from `feed()`
    pub fn manual(mut self) -> Self {
        self.mode = Mode::Manual;
        self
    }

    /// Screen permission state. `grant_on_request` makes the request succeed.
    pub fn with_screen_permission(mut self, granted: bool, grant_on_request: bool) -> Self {
        self.screen_permission = granted;
        self.grant_on_request = grant_on_request;
        self
    }

    pub fn with_camera_permission(mut self, granted: bool) -> Self {
        self.camera_permission = granted;
        self
    }

    pub fn feed(&self) -> SyntheticFeed {
        self.feed.clone()
    }

    /// Settings panes opened so far
    pub fn opened_settings(&self) -> Vec<PermissionKind> {
        self.settings_opened.lock().clone()
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn screen_permission(&self) -> bool {
        self.screen_permission
    }

    fn request_screen_permission(&self) -> bool {
        self.screen_permission || self.grant_on_request
    }

    async fn camera_permission(&self) -> bool {
        self.camera_permission
    }

    fn open_permission_settings(&self, kind: PermissionKind) {
        tracing::info!("Synthetic backend: open {} settings", kind);
        self.settings_opened.lock().push(kind);
    }

    async fn resolve(&self, target: &CaptureTarget) -> CaptureResult<ResolvedTarget> {
        let stream_type = target
            .stream_type()
            .ok_or_else(|| CaptureError::UnresolvedTarget(format!("{:?} selects nothing", target)))?;

        let (width, height) = match target {
            CaptureTarget::Area { rect, .. } => (rect.width, rect.height),
            _ => (self.width, self.height),
        };
        let display_id = match target {
            CaptureTarget::Display { display_id } | CaptureTarget::Area { display_id, .. } => Some(*display_id),
            CaptureTarget::Windows { .. } | CaptureTarget::Applications { .. } | CaptureTarget::AudioOnly => Some(0),
            CaptureTarget::ExternalDevice { .. } | CaptureTarget::Camera { .. } => None,
        };

        Ok(ResolvedTarget {
            target: target.clone(),
            stream_type,
            width,
            height,
            display_id,
        })
    }

    fn open_sources(&self, plan: &CapturePlan) -> CaptureResult<Vec<Box<dyn CaptureSource>>> {
        if self.mode == Mode::Manual {
            return Ok(vec![Box::new(FeedSource {
                feed: self.feed.clone(),
                running: false,
                stopped: false,
            })]);
        }

        let config = &plan.config;
        let mut primary = Vec::new();
        if !plan.resolved.stream_type.is_audio_only() {
            primary.push(Generator::Frames {
                kind: SampleKind::Video,
                width: plan.resolved.width,
                height: plan.resolved.height,
                fps: config.frame_rate,
            });
        }
        if plan.system_audio || plan.resolved.stream_type.is_audio_only() {
            primary.push(Generator::Tone {
                kind: SampleKind::SystemAudio,
                rate: config.audio_sample_rate,
                channels: config.audio_channels,
                frequency: 440.0,
            });
        }

        let mut sources: Vec<Box<dyn CaptureSource>> = vec![Box::new(SyntheticSource::new("synthetic-screen", primary))];
        if plan.camera_overlay {
            sources.push(Box::new(SyntheticSource::new(
                "synthetic-camera",
                vec![Generator::Frames {
                    kind: SampleKind::CameraOverlay,
                    width: 320,
                    height: 240,
                    fps: 30,
                }],
            )));
        }
        if plan.microphone {
            sources.push(Box::new(SyntheticSource::new(
                "synthetic-microphone",
                vec![Generator::Tone {
                    kind: SampleKind::Microphone,
                    rate: config.audio_sample_rate,
                    channels: 1,
                    frequency: 660.0,
                }],
            )));
        }
        Ok(sources)
    }
}

/// Source that attaches its sink to a `SyntheticFeed`
struct FeedSource {
    feed: SyntheticFeed,
    running: bool,
    stopped: bool,
}

#[async_trait]
impl CaptureSource for FeedSource {
    fn id(&self) -> &str {
        "synthetic-feed"
    }

    fn kinds(&self) -> Vec<SampleKind> {
        vec![
            SampleKind::Video,
            SampleKind::SystemAudio,
            SampleKind::Microphone,
            SampleKind::CameraOverlay,
        ]
    }

    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        if self.running {
            return Err(CaptureError::AlreadyRunning);
        }
        self.feed.attach(sink);
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        self.stopped = true;
        self.feed.detach();
        if !std::mem::replace(&mut self.running, false) {
            return Err(CaptureError::NotRunning);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[derive(Debug, Clone, Copy)]
enum Generator {
    Frames {
        kind: SampleKind,
        width: u32,
        height: u32,
        fps: u32,
    },
    Tone {
        kind: SampleKind,
        rate: u32,
        channels: u16,
        frequency: f32,
    },
}

/// Test-pattern source with one producer thread per generator
pub struct SyntheticSource {
    id: String,
    generators: Vec<Generator>,
    running: Arc<AtomicBool>,
    stopped: bool,
    threads: Vec<JoinHandle<()>>,
}

impl SyntheticSource {
    fn new(id: &str, generators: Vec<Generator>) -> Self {
        Self {
            id: id.to_string(),
            generators,
            running: Arc::new(AtomicBool::new(false)),
            stopped: false,
            threads: Vec::new(),
        }
    }
}

#[async_trait]
impl CaptureSource for SyntheticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kinds(&self) -> Vec<SampleKind> {
        self.generators
            .iter()
            .map(|g| match g {
                Generator::Frames { kind, .. } | Generator::Tone { kind, .. } => *kind,
            })
            .collect()
    }

    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        for (i, generator) in self.generators.iter().copied().enumerate() {
            let sink = sink.clone();
            let running = self.running.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", self.id, i))
                .spawn(move || match generator {
                    Generator::Frames { kind, width, height, fps } => {
                        produce_frames(kind, width, height, fps, &running, &sink)
                    }
                    Generator::Tone { kind, rate, channels, frequency } => {
                        produce_tone(kind, rate, channels, frequency, &running, &sink)
                    }
                });
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(CaptureError::Backend(e.to_string()));
                }
            }
        }
        tracing::info!("Synthetic source {} started", self.id);
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        self.stopped = true;
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let threads = std::mem::take(&mut self.threads);
        let _ = tokio::task::spawn_blocking(move || {
            for handle in threads {
                let _ = handle.join();
            }
        })
        .await;
        if !was_running {
            return Err(CaptureError::NotRunning);
        }
        tracing::info!("Synthetic source {} stopped", self.id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Solid frame whose colour cycles with `index`, with a bar sweeping across
pub fn test_pattern(width: u32, height: u32, index: u64) -> VideoFrame {
    let (w, h) = (width.max(1), height.max(1));
    let shade = (index % 256) as u8;
    let bar = (index % u64::from(w)) as u32;
    let mut data = Vec::with_capacity(w as usize * h as usize * 4);
    for _ in 0..h {
        for x in 0..w {
            if x == bar {
                data.extend_from_slice(&[255, 255, 255, 255]);
            } else {
                data.extend_from_slice(&[shade, 128, 255 - shade, 255]);
            }
        }
    }
    VideoFrame::packed(w, h, data)
}

/// Interleaved sine tone chunk starting at frame `offset`
pub fn tone_chunk(rate: u32, channels: u16, frequency: f32, offset: u64, frames: usize) -> AudioChunk {
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames as u64 {
        let t = (offset + i) as f32 / rate as f32;
        let value = (TAU * frequency * t).sin() * 0.2;
        samples.extend(std::iter::repeat(value).take(channels as usize));
    }
    AudioChunk::new(rate, channels, samples)
}

fn produce_frames(kind: SampleKind, width: u32, height: u32, fps: u32, running: &AtomicBool, sink: &SampleSink) {
    let fps = fps.max(1);
    let interval = Duration::from_secs_f64(1.0 / fps as f64);
    let duration = MediaTime::from_rational(1, fps as i32);
    let mut index = 0u64;
    while running.load(Ordering::SeqCst) {
        let frame = test_pattern(width, height, index);
        sink.send(Sample::video(kind, frame, MediaTime::host_now(), duration));
        index += 1;
        std::thread::sleep(interval);
    }
}

fn produce_tone(
    kind: SampleKind,
    rate: u32,
    channels: u16,
    frequency: f32,
    running: &AtomicBool,
    sink: &SampleSink,
) {
    let frames = (rate * TONE_CHUNK_MS / 1000).max(1) as usize;
    let mut offset = 0u64;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(u64::from(TONE_CHUNK_MS)));
        let chunk = tone_chunk(rate, channels, frequency, offset, frames);
        let presentation = MediaTime::host_now() - chunk.duration();
        sink.send(Sample::audio(kind, chunk, presentation));
        offset += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamType;
    use crate::media::FrameSlot;
    use crate::recorder::config::{RecorderSettings, StreamConfiguration};
    use tokio::sync::mpsc;

    fn sink() -> (SampleSink, mpsc::Receiver<Sample>, mpsc::Receiver<Sample>) {
        let (video_tx, video_rx) = mpsc::channel(256);
        let (audio_tx, audio_rx) = mpsc::channel(256);
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();
        (
            SampleSink::new(video_tx, audio_tx, Arc::new(FrameSlot::new()), fault_tx),
            video_rx,
            audio_rx,
        )
    }

    async fn plan(backend: &SyntheticBackend, target: CaptureTarget) -> CapturePlan {
        let resolved = backend.resolve(&target).await.unwrap();
        let (config, _) = StreamConfiguration::derive(&resolved, &RecorderSettings::default()).unwrap();
        CapturePlan {
            resolved,
            config,
            system_audio: true,
            microphone: false,
            microphone_device: None,
            camera_overlay: false,
            camera_device: None,
        }
    }

    #[test]
    fn test_pattern_geometry() {
        let frame = test_pattern(8, 4, 3);
        assert!(frame.is_well_formed());
        assert_eq!(frame.data.len(), 8 * 4 * 4);
        // Bar at column 3
        assert_eq!(&frame.data[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_tone_chunk_interleaved() {
        let chunk = tone_chunk(48_000, 2, 440.0, 0, 960);
        assert_eq!(chunk.frames(), 960);
        assert_eq!(chunk.duration(), MediaTime::from_millis(20));
        assert_eq!(chunk.samples[2], chunk.samples[3]);
    }

    #[tokio::test]
    async fn test_area_resolves_to_rect_size() {
        let backend = SyntheticBackend::new(1920, 1080);
        let target = CaptureTarget::parse("area:0:10,10,640,360").unwrap();
        let resolved = backend.resolve(&target).await.unwrap();
        assert_eq!((resolved.width, resolved.height), (640, 360));
        assert_eq!(resolved.stream_type, StreamType::ScreenArea);
    }

    #[tokio::test]
    async fn test_generated_source_produces_both_kinds() {
        let backend = SyntheticBackend::new(64, 36);
        let plan = plan(&backend, CaptureTarget::Display { display_id: 0 }).await;
        let mut sources = backend.open_sources(&plan).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kinds(), vec![SampleKind::Video, SampleKind::SystemAudio]);

        let (sink, mut video_rx, mut audio_rx) = sink();
        sources[0].start(sink).await.unwrap();
        let frame = video_rx.recv().await.unwrap();
        let audio = audio_rx.recv().await.unwrap();
        sources[0].stop().await.unwrap();

        assert_eq!(frame.frame().map(|f| (f.width, f.height)), Some((64, 36)));
        assert_eq!(audio.kind, SampleKind::SystemAudio);
        assert!(!sources[0].is_running());
        assert!(matches!(sources[0].stop().await, Err(CaptureError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_manual_feed_attaches_while_running() {
        let backend = SyntheticBackend::new(4, 4).manual();
        let feed = backend.feed();
        let plan = plan(&backend, CaptureTarget::Display { display_id: 0 }).await;
        let mut sources = backend.open_sources(&plan).unwrap();

        assert!(!feed.is_attached());
        let (sink, mut video_rx, _audio_rx) = sink();
        sources[0].start(sink).await.unwrap();
        assert!(feed.push(Sample::video(
            SampleKind::Video,
            test_pattern(4, 4, 0),
            MediaTime::ZERO,
            MediaTime::from_millis(33),
        )));
        assert!(video_rx.recv().await.is_some());

        sources[0].stop().await.unwrap();
        assert!(!feed.is_attached());
        assert!(!feed.fail("late"));
    }
}
