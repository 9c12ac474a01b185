//! Encoder/writer pool
//!
//! - `EncoderInput` typed, bounded input per output track
//! - `WriterPool` owns the inputs of a session and finalizes its output
//! - `MediaBackend` encodes tracks and runs offline media jobs (FFmpeg)

pub mod bitrate;
pub mod ffmpeg;
pub mod input;
pub mod pool;

pub use ffmpeg::FfmpegBackend;
pub use input::{AppendOutcome, EncoderInput};
pub use pool::{OutputLayout, WriterOutcome, WriterPlan, WriterPool, WriterStatus};

use crate::media::{MediaTime, Sample, SampleKind};
use crate::recorder::config::{AudioFormat, StreamConfiguration};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} input already finished")]
    InputFinished(TrackKind),

    #[error("{0} input failed: {1}")]
    InputFailed(TrackKind, String),

    #[error("Writer session has not started")]
    SessionNotStarted,

    #[error("No media was captured")]
    NoMedia,

    #[error("Unexpected sample: {0}")]
    UnexpectedSample(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

/// Output track of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    /// Primary video
    Video,
    /// Primary video with the camera composited on top
    CameraOverlay,
    SystemAudio,
    Microphone,
}

impl TrackKind {
    /// Track receiving samples of `kind`, given whether the session composites a camera
    pub fn for_sample(kind: SampleKind, overlay: bool) -> Option<TrackKind> {
        match kind {
            SampleKind::Video if overlay => Some(TrackKind::CameraOverlay),
            SampleKind::Video => Some(TrackKind::Video),
            SampleKind::SystemAudio => Some(TrackKind::SystemAudio),
            SampleKind::Microphone => Some(TrackKind::Microphone),
            SampleKind::CameraOverlay => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, TrackKind::Video | TrackKind::CameraOverlay)
    }

    /// Short name used for intermediate files
    pub fn label(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::CameraOverlay => "overlay",
            TrackKind::SystemAudio => "sys",
            TrackKind::Microphone => "mic",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackKind::Video => "video",
            TrackKind::CameraOverlay => "camera overlay video",
            TrackKind::SystemAudio => "system audio",
            TrackKind::Microphone => "microphone",
        };
        f.write_str(name)
    }
}

/// Video track encoding parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoding {
    pub config: StreamConfiguration,
}

/// Audio track encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncoding {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Consumer of one track's samples, producing one file
pub trait TrackSink: Send {
    /// Write a sample. `session_start` is the writer's session clock origin.
    fn write(&mut self, sample: &Sample, session_start: MediaTime) -> Result<(), WriterError>;

    /// Flush and close. Returns the written file, or `None` if nothing was written.
    fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError>;
}

/// Offline processing jobs run after capture
#[derive(Debug, Clone, PartialEq)]
pub enum MediaJob {
    /// Combine single-track files into one container without re-encoding
    Mux { inputs: Vec<PathBuf>, output: PathBuf },

    /// Mix every audio track of `input` into a single track
    MixdownAudio {
        input: PathBuf,
        volumes: Vec<f32>,
        format: AudioFormat,
        output: PathBuf,
    },

    /// Video of `video` (if any) plus all audio of `audio`, stream copied
    Compose {
        video: Option<PathBuf>,
        audio: PathBuf,
        output: PathBuf,
    },

    /// Re-encode audio to MP3
    Transcode { input: PathBuf, output: PathBuf },
}

impl MediaJob {
    pub fn name(&self) -> &'static str {
        match self {
            MediaJob::Mux { .. } => "mux",
            MediaJob::MixdownAudio { .. } => "mixdown",
            MediaJob::Compose { .. } => "compose",
            MediaJob::Transcode { .. } => "transcode",
        }
    }

    pub fn output(&self) -> &Path {
        match self {
            MediaJob::Mux { output, .. }
            | MediaJob::MixdownAudio { output, .. }
            | MediaJob::Compose { output, .. }
            | MediaJob::Transcode { output, .. } => output,
        }
    }
}

/// Encoding and media processing backend
pub trait MediaBackend: Send + Sync {
    fn open_video_track(&self, path: &Path, encoding: &VideoEncoding) -> Result<Box<dyn TrackSink>, WriterError>;

    fn open_audio_track(&self, path: &Path, encoding: &AudioEncoding) -> Result<Box<dyn TrackSink>, WriterError>;

    /// Run a job to completion (blocking)
    fn run(&self, job: &MediaJob) -> Result<(), WriterError>;
}
