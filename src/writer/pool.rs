//! Writer pool: the encoder inputs of one session and their finalization
//!
//! Three output layouts exist:
//! - `Container`: one track file per input in a hidden work directory,
//!   muxed into the final container once every input has finished
//! - `AudioFile`: a single system audio track written straight to the output
//! - `Package`: system and microphone tracks written into a package directory

use super::input::EncoderInput;
use super::{AudioEncoding, MediaBackend, MediaJob, TrackKind, VideoEncoding, WriterError};
use crate::capture::StreamType;
use crate::media::MediaTime;
use crate::project::package::{self, PackageInfo, PackageTrack, PACKAGE_EXTENSION};
use crate::recorder::config::{AudioFormat, RecorderSettings, StreamConfiguration};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// File name stem for a recording started at `now`
pub fn recording_stem(now: DateTime<Local>) -> String {
    format!("Recording at {}", now.format("%Y-%m-%d %H.%M.%S"))
}

/// First `<stem>.<ext>` in `dir` that does not exist yet
pub fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !candidate.exists() {
        return candidate;
    }
    (2..)
        .map(|n| dir.join(format!("{} {}.{}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Container,
    AudioFile,
    Package,
}

/// Where a session's output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    Container { path: PathBuf, work_dir: PathBuf },
    AudioFile { path: PathBuf },
    Package { path: PathBuf },
}

impl OutputLayout {
    /// Final output path
    pub fn path(&self) -> &Path {
        match self {
            OutputLayout::Container { path, .. }
            | OutputLayout::AudioFile { path }
            | OutputLayout::Package { path } => path,
        }
    }
}

/// Writer status, mirroring the lifecycle of a container writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "message")]
pub enum WriterStatus {
    /// Session clock not started yet
    Unknown,
    Writing,
    Completed,
    Failed(String),
    Cancelled,
}

/// Tracks and layout chosen for a session
#[derive(Debug, Clone)]
pub struct WriterPlan {
    pub stream_type: StreamType,
    pub config: StreamConfiguration,
    pub output_dir: PathBuf,
    pub file_stem: String,
    pub tracks: Vec<TrackKind>,
    pub layout: LayoutKind,
    pub queue_capacity: usize,
    pub system_volume: f32,
    pub microphone_volume: f32,
}

impl WriterPlan {
    pub fn new(
        stream_type: StreamType,
        config: StreamConfiguration,
        settings: &RecorderSettings,
        overlay: bool,
        file_stem: String,
    ) -> Self {
        let mut tracks = Vec::new();
        if stream_type.is_audio_only() {
            tracks.push(TrackKind::SystemAudio);
        } else {
            tracks.push(if overlay {
                TrackKind::CameraOverlay
            } else {
                TrackKind::Video
            });
            if settings.record_system_audio && stream_type.supports_system_audio() {
                tracks.push(TrackKind::SystemAudio);
            }
        }
        if settings.record_microphone {
            tracks.push(TrackKind::Microphone);
        }

        let layout = match (stream_type.is_audio_only(), settings.record_microphone, settings.remux_audio) {
            (false, _, _) => LayoutKind::Container,
            (true, false, _) => LayoutKind::AudioFile,
            (true, true, true) => LayoutKind::Container,
            (true, true, false) => LayoutKind::Package,
        };

        Self {
            stream_type,
            config,
            output_dir: settings.output_dir.clone(),
            file_stem,
            tracks,
            layout,
            queue_capacity: settings.encoder_queue_capacity,
            system_volume: settings.system_volume,
            microphone_volume: settings.microphone_volume,
        }
    }

    /// Whether audio samples start the writer session
    pub fn audio_led(&self) -> bool {
        self.stream_type.is_audio_only()
    }

    /// Format audio tracks are encoded in
    pub fn audio_format(&self) -> AudioFormat {
        match self.layout {
            LayoutKind::Container => self.config.audio_format.for_container(),
            LayoutKind::AudioFile | LayoutKind::Package => self.config.audio_format.recorded(),
        }
    }

    fn final_extension(&self) -> &'static str {
        match self.layout {
            LayoutKind::Container if self.stream_type.is_audio_only() => "m4a",
            LayoutKind::Container => self.config.video_format.extension(),
            LayoutKind::AudioFile => self.audio_format().extension(),
            LayoutKind::Package => PACKAGE_EXTENSION,
        }
    }

    fn audio_encoding(&self) -> AudioEncoding {
        AudioEncoding {
            format: self.audio_format(),
            sample_rate: self.config.audio_sample_rate,
            channels: self.config.audio_channels,
        }
    }
}

/// Result of finalizing a writer pool
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOutcome {
    pub status: WriterStatus,
    pub path: Option<PathBuf>,
    pub layout: LayoutKind,
    pub has_video: bool,
    /// Audio tracks present in the output
    pub audio_tracks: usize,
}

pub struct WriterPool {
    plan: WriterPlan,
    layout: OutputLayout,
    media: Arc<dyn MediaBackend>,
    inputs: Vec<Arc<EncoderInput>>,
    session_start: Arc<OnceLock<MediaTime>>,
    status: Mutex<WriterStatus>,
}

impl WriterPool {
    /// Prepare the output location and open one encoder input per planned track
    pub fn create(plan: WriterPlan, media: Arc<dyn MediaBackend>) -> Result<Self, WriterError> {
        fs::create_dir_all(&plan.output_dir)?;

        let path = unique_path(&plan.output_dir, &plan.file_stem, plan.final_extension());
        let layout = match plan.layout {
            LayoutKind::Container => {
                let work_dir = plan.output_dir.join(format!(".{}.work", plan.file_stem));
                fs::create_dir_all(&work_dir)?;
                OutputLayout::Container { path, work_dir }
            }
            LayoutKind::AudioFile => OutputLayout::AudioFile { path },
            LayoutKind::Package => {
                fs::create_dir_all(&path)?;
                OutputLayout::Package { path }
            }
        };

        let session_start = Arc::new(OnceLock::new());
        let mut pool = Self {
            plan,
            layout,
            media,
            inputs: Vec::new(),
            session_start,
            status: Mutex::new(WriterStatus::Unknown),
        };

        for &kind in &pool.plan.tracks.clone() {
            let track_path = pool.track_path(kind);
            let sink = if kind.is_video() {
                let encoding = VideoEncoding {
                    config: pool.plan.config.clone(),
                };
                pool.media.open_video_track(&track_path, &encoding)
            } else {
                pool.media.open_audio_track(&track_path, &pool.plan.audio_encoding())
            };
            let sink = match sink {
                Ok(sink) => sink,
                Err(e) => {
                    pool.cancel();
                    return Err(e);
                }
            };
            pool.inputs.push(Arc::new(EncoderInput::spawn(
                kind,
                sink,
                pool.plan.queue_capacity,
                pool.session_start.clone(),
            )));
        }

        tracing::info!(
            "Writer pool ready: {:?} -> {:?}",
            pool.plan.tracks,
            pool.layout.path()
        );
        Ok(pool)
    }

    fn track_path(&self, kind: TrackKind) -> PathBuf {
        let audio_ext = self.plan.audio_format().extension();
        match &self.layout {
            OutputLayout::Container { work_dir, .. } => {
                let ext = if kind.is_video() {
                    self.plan.config.video_format.extension()
                } else {
                    audio_ext
                };
                work_dir.join(format!("{}.{}", kind.label(), ext))
            }
            OutputLayout::AudioFile { path } => path.clone(),
            OutputLayout::Package { path } => {
                let track = match kind {
                    TrackKind::Microphone => PackageTrack::Microphone,
                    _ => PackageTrack::System,
                };
                package::member_path(path, track, audio_ext)
            }
        }
    }

    pub fn plan(&self) -> &WriterPlan {
        &self.plan
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn input(&self, kind: TrackKind) -> Option<&Arc<EncoderInput>> {
        self.inputs.iter().find(|input| input.kind() == kind)
    }

    pub fn status(&self) -> WriterStatus {
        self.status.lock().clone()
    }

    pub fn session_start(&self) -> Option<MediaTime> {
        self.session_start.get().copied()
    }

    /// Start the writer's session clock at `at`. Only the first call has effect.
    pub fn start_session_at(&self, at: MediaTime) -> bool {
        if self.session_start.set(at).is_err() {
            return false;
        }
        *self.status.lock() = WriterStatus::Writing;
        tracing::info!("Writer session started at {}", at);
        true
    }

    fn fail(&self, message: String) -> WriterOutcome {
        tracing::error!("Writer finished with failure: {}", message);
        self.remove_outputs();
        *self.status.lock() = WriterStatus::Failed(message.clone());
        WriterOutcome {
            status: WriterStatus::Failed(message),
            path: None,
            layout: self.plan.layout,
            has_video: false,
            audio_tracks: 0,
        }
    }

    /// Finish every input, wait for the encoders and produce the final output.
    ///
    /// Blocks until all track files are flushed.
    pub fn finish(&self) -> WriterOutcome {
        for input in &self.inputs {
            input.mark_finished();
        }

        let mut files: Vec<(TrackKind, PathBuf)> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for input in &self.inputs {
            match input.join() {
                Ok(Some(path)) => files.push((input.kind(), path)),
                Ok(None) => tracing::debug!("{} track produced no data", input.kind()),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if self.session_start.get().is_none() {
            return self.fail(WriterError::NoMedia.to_string());
        }
        if !errors.is_empty() {
            return self.fail(errors.join("; "));
        }
        if files.is_empty() {
            return self.fail(WriterError::NoMedia.to_string());
        }

        let has_video = files.iter().any(|(kind, _)| kind.is_video());
        let audio_tracks = files.iter().filter(|(kind, _)| !kind.is_video()).count();

        let result = match &self.layout {
            OutputLayout::Container { path, work_dir } => {
                let result = self.assemble_container(&files, path);
                if let Err(e) = fs::remove_dir_all(work_dir) {
                    tracing::warn!("Failed to remove work directory {:?}: {}", work_dir, e);
                }
                result
            }
            OutputLayout::AudioFile { .. } => Ok(()),
            OutputLayout::Package { path } => self.write_package_info(&files, path),
        };

        if let Err(e) = result {
            return self.fail(e.to_string());
        }

        *self.status.lock() = WriterStatus::Completed;
        tracing::info!(
            "Writer completed: {:?} (video: {}, audio tracks: {})",
            self.layout.path(),
            has_video,
            audio_tracks
        );
        WriterOutcome {
            status: WriterStatus::Completed,
            path: Some(self.layout.path().to_path_buf()),
            layout: self.plan.layout,
            has_video,
            audio_tracks,
        }
    }

    fn assemble_container(&self, files: &[(TrackKind, PathBuf)], output: &Path) -> Result<(), WriterError> {
        if let [(_, only)] = files {
            fs::rename(only, output)?;
            return Ok(());
        }

        let mut ordered = files.to_vec();
        ordered.sort_by_key(|(kind, _)| *kind);
        let job = MediaJob::Mux {
            inputs: ordered.into_iter().map(|(_, path)| path).collect(),
            output: output.to_path_buf(),
        };
        self.media.run(&job)
    }

    fn write_package_info(&self, files: &[(TrackKind, PathBuf)], path: &Path) -> Result<(), WriterError> {
        for kind in [TrackKind::SystemAudio, TrackKind::Microphone] {
            if !files.iter().any(|(k, _)| *k == kind) {
                return Err(WriterError::InputFailed(kind, "no audio was captured".to_string()));
            }
        }

        let format = self.plan.audio_format();
        let info = PackageInfo::new(
            format.extension(),
            &format!("{:?}", format).to_lowercase(),
            self.plan.config.audio_format == AudioFormat::Mp3,
            self.plan.system_volume,
            self.plan.microphone_volume,
        );
        package::write_info(path, &info).map_err(|e| match e {
            package::PackageError::Io(io) => WriterError::Io(io),
            other => WriterError::Ffmpeg(other.to_string()),
        })
    }

    fn remove_outputs(&self) {
        let result = match &self.layout {
            OutputLayout::Container { work_dir, .. } if work_dir.exists() => fs::remove_dir_all(work_dir),
            OutputLayout::AudioFile { path } if path.exists() => fs::remove_file(path),
            OutputLayout::Package { path } if path.exists() => fs::remove_dir_all(path),
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to clean up partial output: {}", e);
        }
    }

    /// Abandon the session: finish inputs, discard anything written
    pub fn cancel(&self) {
        for input in &self.inputs {
            input.mark_finished();
        }
        for input in &self.inputs {
            let _ = input.join();
        }
        self.remove_outputs();
        *self.status.lock() = WriterStatus::Cancelled;
        tracing::info!("Writer cancelled");
    }
}
