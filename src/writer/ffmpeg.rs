//! FFmpeg-backed track encoders and media jobs
//!
//! Video tracks receive raw BGRA frames on stdin and audio tracks receive
//! interleaved `f32le` PCM. Argument construction is kept in pure functions
//! so it can be tested without an FFmpeg binary.

use super::{AudioEncoding, MediaBackend, MediaJob, TrackSink, VideoEncoding, WriterError};
use crate::media::{MediaTime, Sample};
use crate::recorder::config::{AudioFormat, EncoderMode, StreamConfiguration, VideoCodec, VideoFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Longest run of repeated frames written to fill a video gap
const MAX_FILL_SECONDS: u64 = 10;

/// Audio gaps shorter than this are closed rather than filled with silence
const AUDIO_GAP_TOLERANCE: MediaTime = MediaTime::from_millis(50);

const QUIET: [&str; 5] = ["-hide_banner", "-loglevel", "error", "-nostats", "-y"];

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn video_encoder_name(codec: VideoCodec, encoder: EncoderMode) -> &'static str {
    match (codec, encoder) {
        (VideoCodec::H264, EncoderMode::Hardware) => "h264_videotoolbox",
        (VideoCodec::H265, EncoderMode::Hardware) => "hevc_videotoolbox",
        (VideoCodec::H264, EncoderMode::Software) => "libx264",
        (VideoCodec::H265, EncoderMode::Software) => "libx265",
    }
}

/// Arguments for encoding raw BGRA frames from stdin into `output`
pub fn video_encoder_args(config: &StreamConfiguration, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = QUIET.iter().map(|s| s.to_string()).collect();
    args.extend([
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "bgra".to_string(),
        "-video_size".to_string(),
        format!("{}x{}", config.width, config.height),
        "-framerate".to_string(),
        config.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        video_encoder_name(config.codec, config.encoder).to_string(),
        "-b:v".to_string(),
        config.bitrate.to_string(),
        "-g".to_string(),
        (config.frame_rate * 2).to_string(),
    ]);

    if config.encoder == EncoderMode::Software {
        args.extend(["-preset".to_string(), "veryfast".to_string()]);
    }

    if config.alpha {
        match config.encoder {
            EncoderMode::Hardware => args.extend([
                "-pix_fmt".to_string(),
                "bgra".to_string(),
                "-alpha_quality".to_string(),
                "0.75".to_string(),
            ]),
            EncoderMode::Software => {
                args.extend(["-pix_fmt".to_string(), "yuva420p".to_string()])
            }
        }
    } else if config.hdr {
        args.extend([
            "-pix_fmt".to_string(),
            "p010le".to_string(),
            "-color_primaries".to_string(),
            "bt2020".to_string(),
            "-color_trc".to_string(),
            "smpte2084".to_string(),
            "-colorspace".to_string(),
            "bt2020nc".to_string(),
        ]);
    } else {
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
    }

    if config.codec == VideoCodec::H265 {
        args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
    }
    if config.video_format == VideoFormat::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.push(path_arg(output));
    args
}

fn audio_codec_args(format: AudioFormat) -> Vec<String> {
    let args: &[&str] = match format {
        AudioFormat::Aac => &["-c:a", "aac", "-b:a", "256k"],
        AudioFormat::Alac => &["-c:a", "alac"],
        AudioFormat::Flac => &["-c:a", "flac"],
        AudioFormat::Opus => &["-c:a", "libopus", "-b:a", "192k"],
        AudioFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "2"],
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// Arguments for encoding interleaved f32 PCM from stdin into `output`
pub fn audio_encoder_args(
    input_rate: u32,
    input_channels: u16,
    encoding: &AudioEncoding,
    output: &Path,
) -> Vec<String> {
    // Opus only supports a fixed set of rates; 48 kHz covers every input
    let output_rate = if encoding.format == AudioFormat::Opus {
        48_000
    } else {
        encoding.sample_rate
    };

    let mut args: Vec<String> = QUIET.iter().map(|s| s.to_string()).collect();
    args.extend([
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        input_rate.to_string(),
        "-ac".to_string(),
        input_channels.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-ar".to_string(),
        output_rate.to_string(),
        "-ac".to_string(),
        encoding.channels.to_string(),
    ]);
    args.extend(audio_codec_args(encoding.format));
    args.push(path_arg(output));
    args
}

/// Build the amix filter graph mixing every audio track of input 0
pub fn mixdown_filter(volumes: &[f32]) -> String {
    let mut graph = String::new();
    for (i, volume) in volumes.iter().enumerate() {
        graph.push_str(&format!("[0:a:{}]volume={:.2}[a{}];", i, volume, i));
    }
    for i in 0..volumes.len() {
        graph.push_str(&format!("[a{}]", i));
    }
    graph.push_str(&format!(
        "amix=inputs={}:duration=longest:normalize=0[mix]",
        volumes.len()
    ));
    graph
}

/// Arguments for an offline job
pub fn job_args(job: &MediaJob) -> Vec<String> {
    let mut args: Vec<String> = QUIET.iter().map(|s| s.to_string()).collect();
    match job {
        MediaJob::Mux { inputs, output } => {
            for input in inputs {
                args.extend(["-i".to_string(), path_arg(input)]);
            }
            for i in 0..inputs.len() {
                args.extend(["-map".to_string(), i.to_string()]);
            }
            args.extend(["-c".to_string(), "copy".to_string(), path_arg(output)]);
        }
        MediaJob::MixdownAudio {
            input,
            volumes,
            format,
            output,
        } => {
            args.extend([
                "-i".to_string(),
                path_arg(input),
                "-filter_complex".to_string(),
                mixdown_filter(volumes),
                "-map".to_string(),
                "[mix]".to_string(),
            ]);
            args.extend(audio_codec_args(*format));
            args.push(path_arg(output));
        }
        MediaJob::Compose {
            video,
            audio,
            output,
        } => {
            let audio_index = match video {
                Some(video) => {
                    args.extend(["-i".to_string(), path_arg(video)]);
                    1
                }
                None => 0,
            };
            args.extend(["-i".to_string(), path_arg(audio)]);
            if video.is_some() {
                args.extend(["-map".to_string(), "0:v".to_string()]);
            }
            args.extend([
                "-map".to_string(),
                format!("{}:a", audio_index),
                "-c".to_string(),
                "copy".to_string(),
                path_arg(output),
            ]);
        }
        MediaJob::Transcode { input, output } => {
            args.extend(["-i".to_string(), path_arg(input), "-vn".to_string()]);
            args.extend(audio_codec_args(AudioFormat::Mp3));
            args.push(path_arg(output));
        }
    }
    args
}

/// A running FFmpeg child fed through stdin
struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegProcess {
    fn spawn(binary: &Path, args: &[String]) -> Result<Self, WriterError> {
        tracing::info!("Starting FFmpeg: {:?}", args);
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WriterError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WriterError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), WriterError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WriterError::Ffmpeg("FFmpeg stdin closed".to_string()))?;
        stdin
            .write_all(bytes)
            .map_err(|e| WriterError::Ffmpeg(format!("Failed to write to FFmpeg: {}", e)))
    }

    fn finish(mut self) -> Result<(), WriterError> {
        // Close stdin to signal EOF
        drop(self.stdin.take());

        let output = self
            .child
            .wait_with_output()
            .map_err(|e| WriterError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WriterError::Ffmpeg(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Video track encoder converting timestamped frames to constant frame rate
struct FfmpegVideoSink {
    binary: PathBuf,
    path: PathBuf,
    config: StreamConfiguration,
    process: Option<FfmpegProcess>,
    next_index: u64,
    last_frame: Option<Vec<u8>>,
    frames_written: u64,
}

impl FfmpegVideoSink {
    fn frame_index(&self, relative: MediaTime) -> u64 {
        let fps = self.config.frame_rate as i128;
        let nanos = relative.as_nanos().max(0) as i128;
        ((nanos * fps + 500_000_000) / 1_000_000_000) as u64
    }
}

impl TrackSink for FfmpegVideoSink {
    fn write(&mut self, sample: &Sample, session_start: MediaTime) -> Result<(), WriterError> {
        let frame = sample
            .frame()
            .ok_or_else(|| WriterError::UnexpectedSample("audio sample on video track".to_string()))?;

        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(WriterError::UnexpectedSample(format!(
                "{}x{} frame on {}x{} track",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }

        let relative = sample.presentation() - session_start;
        if relative < MediaTime::ZERO {
            return Ok(());
        }

        let index = self.frame_index(relative);
        if index < self.next_index {
            // Slot already filled at this frame rate
            return Ok(());
        }

        if self.process.is_none() {
            let args = video_encoder_args(&self.config, &self.path);
            self.process = Some(FfmpegProcess::spawn(&self.binary, &args)?);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(WriterError::Ffmpeg("FFmpeg process missing".to_string()));
        };

        let bytes = frame.packed_bytes();
        let max_fill = self.config.frame_rate as u64 * MAX_FILL_SECONDS;
        let gap = (index - self.next_index).min(max_fill);
        let filler = self.last_frame.as_deref().unwrap_or(bytes.as_slice());
        for _ in 0..gap {
            process.write(filler)?;
        }
        process.write(&bytes)?;

        self.frames_written += gap + 1;
        self.next_index = index + 1;
        self.last_frame = Some(bytes);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
        let Some(process) = self.process else {
            return Ok(None);
        };
        process.finish()?;
        tracing::info!(
            "Video track finished: {} frames, output: {:?}",
            self.frames_written,
            self.path
        );
        Ok(Some(self.path))
    }
}

/// Audio track encoder filling timeline gaps with silence
struct FfmpegAudioSink {
    binary: PathBuf,
    path: PathBuf,
    encoding: AudioEncoding,
    process: Option<FfmpegProcess>,
    input_format: Option<(u32, u16)>,
    written_frames: i64,
    skipped_chunks: u64,
}

impl TrackSink for FfmpegAudioSink {
    fn write(&mut self, sample: &Sample, session_start: MediaTime) -> Result<(), WriterError> {
        let chunk = sample
            .chunk()
            .ok_or_else(|| WriterError::UnexpectedSample("video sample on audio track".to_string()))?;
        if chunk.channels == 0 || chunk.sample_rate == 0 {
            return Ok(());
        }

        match self.input_format {
            None => {
                let args = audio_encoder_args(chunk.sample_rate, chunk.channels, &self.encoding, &self.path);
                self.process = Some(FfmpegProcess::spawn(&self.binary, &args)?);
                self.input_format = Some((chunk.sample_rate, chunk.channels));
            }
            Some(format) if format != (chunk.sample_rate, chunk.channels) => {
                self.skipped_chunks += 1;
                if self.skipped_chunks == 1 {
                    tracing::warn!(
                        "Audio format changed mid-track ({:?} -> {}Hz/{}ch), skipping",
                        format,
                        chunk.sample_rate,
                        chunk.channels
                    );
                }
                return Ok(());
            }
            Some(_) => {}
        }
        let Some(process) = self.process.as_mut() else {
            return Err(WriterError::Ffmpeg("FFmpeg process missing".to_string()));
        };

        let channels = chunk.channels as usize;
        let rate = chunk.sample_rate;
        let mut at = (sample.presentation() - session_start).to_frames(rate);
        let mut samples: &[f32] = &chunk.samples;

        if at < self.written_frames {
            // Overlaps what was already written, or starts before the session
            let skip = (self.written_frames - at) as usize;
            if skip >= chunk.frames() {
                return Ok(());
            }
            samples = &samples[skip * channels..];
            at = self.written_frames;
        }

        let gap = at - self.written_frames;
        if gap > AUDIO_GAP_TOLERANCE.to_frames(rate) {
            let silence = vec![0u8; gap as usize * channels * std::mem::size_of::<f32>()];
            process.write(&silence)?;
            self.written_frames += gap;
        }

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        process.write(&bytes)?;
        self.written_frames += (samples.len() / channels) as i64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
        let Some(process) = self.process else {
            return Ok(None);
        };
        process.finish()?;
        tracing::info!(
            "Audio track finished: {} frames, output: {:?}",
            self.written_frames,
            self.path
        );
        Ok(Some(self.path))
    }
}

/// Production media backend driving the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: PathBuf,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the binary can be executed
    pub fn probe(&self) -> Result<(), WriterError> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .output()
            .map_err(|e| {
                WriterError::Ffmpeg(format!(
                    "FFmpeg not found ({}). Please install FFmpeg: brew install ffmpeg",
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(WriterError::Ffmpeg("FFmpeg -version failed".to_string()));
        }
        Ok(())
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_video_track(&self, path: &Path, encoding: &VideoEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
        Ok(Box::new(FfmpegVideoSink {
            binary: self.binary.clone(),
            path: path.to_path_buf(),
            config: encoding.config.clone(),
            process: None,
            next_index: 0,
            last_frame: None,
            frames_written: 0,
        }))
    }

    fn open_audio_track(&self, path: &Path, encoding: &AudioEncoding) -> Result<Box<dyn TrackSink>, WriterError> {
        Ok(Box::new(FfmpegAudioSink {
            binary: self.binary.clone(),
            path: path.to_path_buf(),
            encoding: *encoding,
            process: None,
            input_format: None,
            written_frames: 0,
            skipped_chunks: 0,
        }))
    }

    fn run(&self, job: &MediaJob) -> Result<(), WriterError> {
        let args = job_args(job);
        tracing::info!("Running FFmpeg {} job: {:?}", job.name(), args);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WriterError::Ffmpeg(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WriterError::Ffmpeg(format!(
                "{} failed with {}: {}",
                job.name(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
