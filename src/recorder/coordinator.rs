//! Recording coordinator
//!
//! Owns the session state machine and wires the pipeline together:
//! capture sources -> routing lanes -> sample router -> writer pool.
//! Finalization (stop) closes the pipeline back to front and runs the
//! post-processing steps.

use super::compositor::Compositor;
use super::config::{AudioFormat, CodecFallback, EncoderMode, RecorderSettings, StreamConfiguration, VideoCodec};
use super::lanes::Lanes;
use super::router::{OverlayGate, RouterCounts, SampleRouter};
use super::state::{RecordingSession, SessionState};
use crate::capture::{
    CaptureBackend, CapturePlan, CaptureSource, CaptureTarget, NativeBackend, PermissionKind, SampleSink, StreamFault,
};
use crate::media::{still, FrameSlot, MediaTime};
use crate::postprocess::{remux_audio_tracks, transcode_to_mp3};
use crate::utils::error::{ConfigError, RecorderError, RecorderResult};
use crate::utils::SleepGuard;
use crate::writer::pool::{recording_stem, LayoutKind};
use crate::writer::{FfmpegBackend, MediaBackend, TrackKind, WriterOutcome, WriterPlan, WriterPool, WriterStatus};
use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Started,
    Paused,
    Resumed,
    /// The requested codec was replaced after the capability probe
    CodecFallback {
        from: (VideoCodec, EncoderMode),
        to: (VideoCodec, EncoderMode),
    },
    /// Camera permission denied; recording continues without the overlay
    CameraUnavailable,
    /// A capture source failed; the session is being stopped
    StreamError(String),
    Finalizing,
    Completed {
        path: PathBuf,
        preview_png: Option<PathBuf>,
    },
    Failed {
        message: String,
    },
    FrameSaved {
        path: PathBuf,
    },
}

/// Result of a finished session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RecordingOutcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        path: PathBuf,
        preview_png: Option<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        message: String,
        /// Output kept on disk when a post-processing step failed
        preserved: Option<PathBuf>,
    },
}

/// Pipeline of the running session
struct ActiveSession {
    session: Arc<RecordingSession>,
    settings: RecorderSettings,
    config: StreamConfiguration,
    writer: Arc<WriterPool>,
    router: Arc<SampleRouter>,
    gate: Arc<OverlayGate>,
    sources: Vec<Box<dyn CaptureSource>>,
    sink: Option<SampleSink>,
    lanes: Option<Lanes>,
    sleep_guard: SleepGuard,
}

/// Manages the recording lifecycle
pub struct RecordingCoordinator {
    state: Arc<RwLock<SessionState>>,
    capture: Arc<dyn CaptureBackend>,
    media: Arc<dyn MediaBackend>,
    active: Option<ActiveSession>,
    faults: Option<mpsc::UnboundedReceiver<StreamFault>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingCoordinator {
    pub fn new(capture: Arc<dyn CaptureBackend>, media: Arc<dyn MediaBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            capture,
            media,
            active: None,
            faults: None,
            event_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: RecordingEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        tracing::debug!("Session state {:?} -> {:?}", previous, state);
    }

    /// Id of the running session
    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.session.id)
    }

    /// Captured time of the running session, excluding pauses
    pub fn elapsed(&self) -> MediaTime {
        self.active
            .as_ref()
            .map(|a| a.session.elapsed())
            .unwrap_or(MediaTime::ZERO)
    }

    /// Router counters of the running session
    pub fn stats(&self) -> Option<RouterCounts> {
        self.active.as_ref().map(|a| a.router.stats())
    }

    /// Runtime faults of the session started last. Taken once.
    pub fn take_faults(&mut self) -> Option<mpsc::UnboundedReceiver<StreamFault>> {
        self.faults.take()
    }

    /// Start a session recording `target`
    pub async fn start(&mut self, target: CaptureTarget, settings: RecorderSettings) -> RecorderResult<Uuid> {
        if self.state() != SessionState::Idle {
            return Err(RecorderError::AlreadyRecording);
        }
        self.set_state(SessionState::Configuring);
        tracing::info!("Starting recording of {:?} into {:?}", target, settings.output_dir);

        match self.configure(target, settings).await {
            Ok((active, faults)) => {
                let id = active.session.id;
                active.session.begin_segment();
                self.active = Some(active);
                self.faults = Some(faults);
                self.set_state(SessionState::Capturing);
                self.emit(RecordingEvent::Started);
                tracing::info!("Recording {} started", id);
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn configure(
        &mut self,
        target: CaptureTarget,
        settings: RecorderSettings,
    ) -> RecorderResult<(ActiveSession, mpsc::UnboundedReceiver<StreamFault>)> {
        settings.validate()?;
        prepare_output_dir(&settings)?;

        let stream_type = target
            .stream_type()
            .ok_or_else(|| ConfigError::UnresolvedTarget(format!("{:?} selects nothing", target)))?;

        if stream_type.uses_screen_capture() && !self.ensure_screen_permission() {
            return Err(RecorderError::Permission(PermissionKind::Screen));
        }
        if !stream_type.uses_screen_capture() && !self.capture.camera_permission().await {
            self.capture.open_permission_settings(PermissionKind::Camera);
            return Err(RecorderError::Permission(PermissionKind::Camera));
        }

        let resolved = self.capture.resolve(&target).await?;
        tracing::info!("Resolved {} target: {}x{}", stream_type, resolved.width, resolved.height);

        let mut overlay =
            settings.camera_overlay.enabled && stream_type.uses_screen_capture() && !stream_type.is_audio_only();
        if overlay && !self.capture.camera_permission().await {
            tracing::warn!("Camera permission denied, recording without camera overlay");
            self.capture.open_permission_settings(PermissionKind::Camera);
            self.emit(RecordingEvent::CameraUnavailable);
            overlay = false;
        }

        let (config, fallback) = StreamConfiguration::derive(&resolved, &settings)?;
        if let Some(CodecFallback { from, to }) = fallback {
            self.emit(RecordingEvent::CodecFallback { from, to });
        }

        let session = Arc::new(RecordingSession::new(target, stream_type));
        let plan = WriterPlan::new(
            stream_type,
            config.clone(),
            &settings,
            overlay,
            recording_stem(Local::now()),
        );
        let writer = Arc::new(WriterPool::create(plan, self.media.clone())?);

        let camera_slot = Arc::new(FrameSlot::new());
        let mut compositor = Compositor::new(&config);
        if overlay {
            compositor = compositor.with_camera(settings.camera_overlay.clone(), camera_slot.clone());
        }
        let gate = Arc::new(OverlayGate::new());
        let router = Arc::new(SampleRouter::new(
            session.clone(),
            writer.clone(),
            compositor,
            camera_slot.clone(),
            gate.clone(),
            self.event_tx.clone(),
        ));

        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (lanes, sink) = match Lanes::spawn(router.clone(), settings.sample_queue_capacity, camera_slot, fault_tx) {
            Ok(spawned) => spawned,
            Err(e) => {
                writer.cancel();
                return Err(e.into());
            }
        };

        let capture_plan = CapturePlan {
            resolved,
            config: config.clone(),
            system_audio: stream_type.is_audio_only()
                || (settings.record_system_audio && stream_type.supports_system_audio()),
            microphone: settings.record_microphone,
            microphone_device: settings.microphone_device.clone(),
            camera_overlay: overlay,
            camera_device: settings.camera_overlay.device_id.clone(),
        };

        let sources = match self.capture.open_sources(&capture_plan) {
            Ok(sources) => sources,
            Err(e) => {
                abort_pipeline(Vec::new(), sink, lanes, &writer).await;
                return Err(e.into());
            }
        };
        let sources = match start_sources(sources, &sink).await {
            Ok(sources) => sources,
            Err((started, e)) => {
                abort_pipeline(started, sink, lanes, &writer).await;
                return Err(e);
            }
        };

        let active = ActiveSession {
            session,
            settings,
            config,
            writer,
            router,
            gate,
            sources,
            sink: Some(sink),
            lanes: Some(lanes),
            sleep_guard: SleepGuard::acquire(),
        };
        Ok((active, fault_rx))
    }

    /// Check screen recording access, prompting once
    fn ensure_screen_permission(&self) -> bool {
        if self.capture.screen_permission() {
            return true;
        }
        tracing::warn!("Screen recording permission missing, requesting");
        if self.capture.request_screen_permission() {
            return true;
        }
        self.capture.open_permission_settings(PermissionKind::Screen);
        false
    }

    /// Pause capture. Samples are dropped until `resume`.
    pub fn pause(&mut self) -> RecorderResult<()> {
        match self.state() {
            SessionState::Capturing => {}
            SessionState::Paused => return Ok(()),
            _ => return Err(RecorderError::NotRecording),
        }
        let Some(active) = &self.active else {
            return Err(RecorderError::NotRecording);
        };

        active.session.timing.lock().pause();
        active.session.end_segment();
        self.set_state(SessionState::Paused);
        self.emit(RecordingEvent::Paused);
        tracing::info!("Recording paused");
        Ok(())
    }

    pub fn resume(&mut self) -> RecorderResult<()> {
        match self.state() {
            SessionState::Paused => {}
            SessionState::Capturing => return Ok(()),
            _ => return Err(RecorderError::NotRecording),
        }
        let Some(active) = &self.active else {
            return Err(RecorderError::NotRecording);
        };

        active.session.timing.lock().resume();
        active.session.begin_segment();
        self.set_state(SessionState::Capturing);
        self.emit(RecordingEvent::Resumed);
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Save the next captured video frame as a PNG next to the recording
    pub fn save_current_frame(&self) -> RecorderResult<()> {
        if self.state() != SessionState::Capturing {
            return Err(RecorderError::NotRecording);
        }
        let Some(active) = &self.active else {
            return Err(RecorderError::NotRecording);
        };
        if active.session.stream_type.is_audio_only() {
            tracing::warn!("Frame save requested for an audio-only recording");
            return Ok(());
        }
        active.router.request_frame_save();
        Ok(())
    }

    /// Hold back video frames while the presenter overlay mode settles
    pub fn overlay_mode_changed(&self, active_overlay: bool) {
        let Some(active) = &self.active else {
            return;
        };
        let generation = active.gate.mark_unsafe();
        let gate = active.gate.clone();
        let delay = Duration::from_secs_f64(active.settings.presenter_overlay_delay_secs.max(0.0));
        tracing::info!(
            "Presenter overlay {}, holding frames for {:?}",
            if active_overlay { "on" } else { "off" },
            delay
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if gate.settle(generation) {
                tracing::debug!("Presenter overlay settled");
            }
        });
    }

    /// Stop the session and finalize its output.
    ///
    /// The coordinator is back in `Idle` whatever the outcome.
    pub async fn stop(&mut self) -> RecorderResult<RecordingOutcome> {
        if !self.state().is_active() {
            return Err(RecorderError::NotRecording);
        }
        let Some(active) = self.active.take() else {
            return Err(RecorderError::NotRecording);
        };
        self.faults = None;

        tracing::info!("Stopping recording {}", active.session.id);
        self.set_state(SessionState::Finalizing);
        self.emit(RecordingEvent::Finalizing);

        let outcome = self.finalize(active).await;

        self.set_state(SessionState::Idle);
        match &outcome {
            RecordingOutcome::Completed { path, preview_png } => {
                tracing::info!("Recording saved to {:?}", path);
                self.emit(RecordingEvent::Completed {
                    path: path.clone(),
                    preview_png: preview_png.clone(),
                });
            }
            RecordingOutcome::Failed { message, preserved } => {
                tracing::error!("Recording failed: {} (preserved: {:?})", message, preserved);
                self.emit(RecordingEvent::Failed {
                    message: message.clone(),
                });
            }
        }
        Ok(outcome)
    }

    async fn finalize(&self, mut active: ActiveSession) -> RecordingOutcome {
        active.session.end_segment();

        for source in active.sources.iter_mut() {
            if let Err(e) = source.stop().await {
                tracing::warn!("Stopping {} failed: {}", source.id(), e);
            }
        }
        active.sources.clear();
        active.sink.take();
        if let Some(lanes) = active.lanes.take() {
            if tokio::task::spawn_blocking(move || lanes.join()).await.is_err() {
                tracing::error!("Failed to join routing lanes");
            }
        }
        tracing::info!("Pipeline drained: {:?}", active.router.stats());

        let writer = active.writer.clone();
        let written = match tokio::task::spawn_blocking(move || writer.finish()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return RecordingOutcome::Failed {
                    message: format!("writer task failed: {}", e),
                    preserved: None,
                }
            }
        };
        active.sleep_guard.release();

        let path = match (&written.status, &written.path) {
            (WriterStatus::Completed, Some(path)) => path.clone(),
            (WriterStatus::Failed(message), _) => {
                return RecordingOutcome::Failed {
                    message: message.clone(),
                    preserved: None,
                }
            }
            (status, _) => {
                return RecordingOutcome::Failed {
                    message: format!("writer finished as {:?}", status),
                    preserved: None,
                }
            }
        };

        let path = match self.post_process(&active, &written, path).await {
            Ok(path) => path,
            Err((e, preserved)) => {
                return RecordingOutcome::Failed {
                    message: e.to_string(),
                    preserved: Some(preserved),
                }
            }
        };

        let preview_png = if active.settings.preview && written.has_video {
            write_preview(&active.session).await
        } else {
            None
        };

        RecordingOutcome::Completed { path, preview_png }
    }

    /// Remux and transcode as configured. On failure returns the file left on disk.
    async fn post_process(
        &self,
        active: &ActiveSession,
        written: &WriterOutcome,
        path: PathBuf,
    ) -> Result<PathBuf, (RecorderError, PathBuf)> {
        let settings = &active.settings;

        if written.layout == LayoutKind::Container && written.audio_tracks >= 2 && settings.remux_audio {
            let volumes: Vec<f32> = active
                .writer
                .plan()
                .tracks
                .iter()
                .filter_map(|track| match track {
                    TrackKind::SystemAudio => Some(settings.system_volume),
                    TrackKind::Microphone => Some(settings.microphone_volume),
                    _ => None,
                })
                .collect();
            let media = self.media.clone();
            let target = path.clone();
            let has_video = written.has_video;
            let remuxed = tokio::task::spawn_blocking(move || {
                remux_audio_tracks(media.as_ref(), &target, has_video, &volumes)
            })
            .await;
            match remuxed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err((e.into(), path)),
                Err(e) => return Err((RecorderError::Finalization(e.to_string()), path)),
            }
        }

        let audio_only = active.session.stream_type.is_audio_only();
        if audio_only && written.layout != LayoutKind::Package && active.config.audio_format == AudioFormat::Mp3 {
            let media = self.media.clone();
            let input = path.clone();
            let transcoded = tokio::task::spawn_blocking(move || transcode_to_mp3(media.as_ref(), &input)).await;
            return match transcoded {
                Ok(Ok(mp3)) => Ok(mp3),
                Ok(Err(e)) => Err((e.into(), path)),
                Err(e) => Err((RecorderError::Finalization(e.to_string()), path)),
            };
        }

        Ok(path)
    }
}

fn prepare_output_dir(settings: &RecorderSettings) -> Result<(), ConfigError> {
    let dir = &settings.output_dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        return Err(ConfigError::InvalidOutputPath(format!("{}: {}", dir.display(), e)));
    }
    if !dir.is_dir() {
        return Err(ConfigError::InvalidOutputPath(format!("{} is not a directory", dir.display())));
    }
    Ok(())
}

/// Start every source in order. On failure returns the ones already running.
async fn start_sources(
    sources: Vec<Box<dyn CaptureSource>>,
    sink: &SampleSink,
) -> Result<Vec<Box<dyn CaptureSource>>, (Vec<Box<dyn CaptureSource>>, RecorderError)> {
    let mut started = Vec::with_capacity(sources.len());
    for mut source in sources {
        tracing::info!("Starting capture source {} ({:?})", source.id(), source.kinds());
        if let Err(e) = source.start(sink.clone()).await {
            tracing::error!("Capture source {} failed to start: {}", source.id(), e);
            return Err((started, e.into()));
        }
        started.push(source);
    }
    Ok(started)
}

/// Tear down a pipeline that never reached `Capturing`
async fn abort_pipeline(mut sources: Vec<Box<dyn CaptureSource>>, sink: SampleSink, lanes: Lanes, writer: &Arc<WriterPool>) {
    for source in sources.iter_mut() {
        if let Err(e) = source.stop().await {
            tracing::warn!("Stopping {} failed: {}", source.id(), e);
        }
    }
    drop(sources);
    drop(sink);
    let writer = writer.clone();
    let _ = tokio::task::spawn_blocking(move || {
        lanes.join();
        writer.cancel();
    })
    .await;
}

async fn write_preview(session: &RecordingSession) -> Option<PathBuf> {
    let frame = session.first_frame()?.frame()?.clone();
    match tokio::task::spawn_blocking(move || still::write_preview(&frame)).await {
        Ok(Ok(path)) => Some(path),
        Ok(Err(e)) => {
            tracing::warn!("Failed to write preview: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!("Preview task failed: {}", e);
            None
        }
    }
}

/// Cloneable handle to the recorder.
///
/// Runtime stream faults reported by capture sources stop the session they
/// belong to, through the same path as a user stop.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<tokio::sync::Mutex<RecordingCoordinator>>,
    events: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    pub fn new(capture: Arc<dyn CaptureBackend>, media: Arc<dyn MediaBackend>) -> Self {
        let coordinator = RecordingCoordinator::new(capture, media);
        let events = coordinator.event_tx.clone();
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(coordinator)),
            events,
        }
    }

    /// Recorder using the OS capture APIs and the ffmpeg on `PATH`
    pub fn native() -> Self {
        Self::new(Arc::new(NativeBackend::new()), Arc::new(FfmpegBackend::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self, target: CaptureTarget, settings: RecorderSettings) -> RecorderResult<Uuid> {
        let mut coordinator = self.inner.lock().await;
        let id = coordinator.start(target, settings).await?;
        if let Some(faults) = coordinator.take_faults() {
            self.watch_faults(id, faults);
        }
        Ok(id)
    }

    pub async fn pause(&self) -> RecorderResult<()> {
        self.inner.lock().await.pause()
    }

    pub async fn resume(&self) -> RecorderResult<()> {
        self.inner.lock().await.resume()
    }

    pub async fn stop(&self) -> RecorderResult<RecordingOutcome> {
        self.inner.lock().await.stop().await
    }

    pub async fn save_current_frame(&self) -> RecorderResult<()> {
        self.inner.lock().await.save_current_frame()
    }

    pub async fn overlay_mode_changed(&self, active: bool) {
        self.inner.lock().await.overlay_mode_changed(active)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state()
    }

    pub async fn elapsed(&self) -> MediaTime {
        self.inner.lock().await.elapsed()
    }

    pub async fn stats(&self) -> Option<RouterCounts> {
        self.inner.lock().await.stats()
    }

    fn watch_faults(&self, id: Uuid, mut faults: mpsc::UnboundedReceiver<StreamFault>) {
        let recorder = self.clone();
        tokio::spawn(async move {
            let Some(fault) = faults.recv().await else {
                return;
            };
            let mut coordinator = recorder.inner.lock().await;
            if coordinator.session_id() != Some(id) || !coordinator.state().is_active() {
                return;
            }
            let message = format!("{}: {}", fault.source, fault.message);
            tracing::error!("Stream error in session {}: {}", id, message);
            coordinator.emit(RecordingEvent::StreamError(message));
            if let Err(e) = coordinator.stop().await {
                tracing::error!("Failed to stop after stream error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticBackend;
    use crate::writer::{AudioEncoding, MediaJob, TrackSink, VideoEncoding, WriterError};
    use crate::media::Sample;
    use std::path::Path;
    use tempfile::TempDir;

    /// Writes one line per sample into each track file
    struct TextSink {
        path: PathBuf,
        lines: Vec<String>,
    }

    impl TrackSink for TextSink {
        fn write(&mut self, sample: &Sample, start: MediaTime) -> Result<(), WriterError> {
            self.lines.push((sample.presentation() - start).as_millis().to_string());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
            if self.lines.is_empty() {
                return Ok(None);
            }
            std::fs::write(&self.path, self.lines.join("\n"))?;
            Ok(Some(self.path))
        }
    }

    struct TextMedia;

    impl MediaBackend for TextMedia {
        fn open_video_track(&self, path: &Path, _: &VideoEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
            Ok(Box::new(TextSink { path: path.to_path_buf(), lines: Vec::new() }))
        }

        fn open_audio_track(&self, path: &Path, _: &AudioEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
            Ok(Box::new(TextSink { path: path.to_path_buf(), lines: Vec::new() }))
        }

        fn run(&self, job: &MediaJob) -> Result<(), WriterError> {
            std::fs::write(job.output(), job.name())?;
            Ok(())
        }
    }

    fn coordinator(backend: SyntheticBackend) -> RecordingCoordinator {
        RecordingCoordinator::new(Arc::new(backend), Arc::new(TextMedia))
    }

    fn settings(dir: &TempDir) -> RecorderSettings {
        RecorderSettings {
            output_dir: dir.path().to_path_buf(),
            frame_rate: 30,
            record_system_audio: false,
            preview: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_screen_permission_opens_settings() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SyntheticBackend::new(64, 64).with_screen_permission(false, false);
        let mut coordinator = RecordingCoordinator::new(Arc::new(backend), Arc::new(TextMedia));

        let err = coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::Permission(PermissionKind::Screen)));
        assert_eq!(coordinator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_granted_on_request_starts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SyntheticBackend::new(64, 64).manual().with_screen_permission(false, true);
        let mut coordinator = coordinator(backend);

        coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings(&dir))
            .await
            .unwrap();
        assert_eq!(coordinator.state(), SessionState::Capturing);
        assert!(matches!(
            coordinator.start(CaptureTarget::AudioOnly, settings(&dir)).await,
            Err(RecorderError::AlreadyRecording)
        ));

        let outcome = coordinator.stop().await.unwrap();
        assert!(matches!(outcome, RecordingOutcome::Failed { ref message, .. } if message == "No media was captured"));
        assert_eq!(coordinator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_camera_denied_degrades_to_screen_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SyntheticBackend::new(64, 64).manual().with_camera_permission(false);
        let mut coordinator = coordinator(backend);
        let mut events = coordinator.subscribe();

        let mut settings = settings(&dir);
        settings.camera_overlay.enabled = true;
        coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings)
            .await
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), RecordingEvent::CameraUnavailable));
        assert!(matches!(events.recv().await.unwrap(), RecordingEvent::Started));
        let _ = coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_output_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let mut coordinator = coordinator(SyntheticBackend::new(64, 64).manual());

        let mut settings = settings(&dir);
        settings.output_dir = file;
        let err = coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings)
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::Config(ConfigError::InvalidOutputPath(_))));
        assert_eq!(coordinator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_pause_resume_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator(SyntheticBackend::new(64, 64).manual());
        assert!(matches!(coordinator.pause(), Err(RecorderError::NotRecording)));

        coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings(&dir))
            .await
            .unwrap();
        coordinator.pause().unwrap();
        assert_eq!(coordinator.state(), SessionState::Paused);
        coordinator.pause().unwrap();
        assert!(matches!(coordinator.save_current_frame(), Err(RecorderError::NotRecording)));
        coordinator.resume().unwrap();
        assert_eq!(coordinator.state(), SessionState::Capturing);

        let _ = coordinator.stop().await.unwrap();
        assert!(matches!(coordinator.stop().await, Err(RecorderError::NotRecording)));
        assert!(matches!(coordinator.resume(), Err(RecorderError::NotRecording)));
    }

    #[tokio::test]
    async fn test_stop_leaves_no_work_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator(SyntheticBackend::new(64, 64).manual());
        coordinator
            .start(CaptureTarget::Display { display_id: 0 }, settings(&dir))
            .await
            .unwrap();
        let _ = coordinator.stop().await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
