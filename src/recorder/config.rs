//! Recorder settings and per-session stream configuration
//!
//! `RecorderSettings` is the user-facing preference set, read once at session
//! start. `StreamConfiguration` is derived from it and the resolved capture
//! target and stays fixed for the whole session.

use crate::capture::ResolvedTarget;
use crate::utils::error::{ConfigError, RecorderError};
use crate::writer::bitrate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest frame the H.264 hardware encoder accepts
pub const H264_HARDWARE_MAX: (u32, u32) = (4096, 2304);

/// Video container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Mov,
}

impl VideoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Mov => "mov",
        }
    }
}

/// Video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
}

/// Hardware or software video encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    Hardware,
    Software,
}

/// What to do when the H.264 hardware path cannot handle the frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodecFallbackPolicy {
    /// Switch to H.265 on the hardware encoder
    SwitchToHevc,
    /// Keep H.264 and encode in software
    Software,
    /// Refuse to start
    Reject,
}

/// Encoding quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    pub fn factor(&self) -> f64 {
        match self {
            Quality::Low => 0.3,
            Quality::Medium => 0.7,
            Quality::High => 1.0,
        }
    }
}

/// Audio output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Aac,
    Alac,
    Flac,
    Opus,
    Mp3,
}

impl AudioFormat {
    /// Extension of the file the delivered recording ends up in
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Aac | AudioFormat::Alac => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "ogg",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Format tracks are encoded in while recording. MP3 is recorded as AAC
    /// and transcoded afterwards.
    pub fn recorded(&self) -> AudioFormat {
        match self {
            AudioFormat::Mp3 => AudioFormat::Aac,
            other => *other,
        }
    }

    /// Format used for audio tracks inside an MPEG-4 container
    pub fn for_container(&self) -> AudioFormat {
        match self {
            AudioFormat::Alac | AudioFormat::Flac => AudioFormat::Alac,
            _ => AudioFormat::Aac,
        }
    }

    pub fn is_lossy(&self) -> bool {
        matches!(self, AudioFormat::Aac | AudioFormat::Opus | AudioFormat::Mp3)
    }
}

/// Corner the camera overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Fill used where the captured content does not cover the output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFill {
    Black,
    White,
    Clear,
}

impl BackgroundFill {
    pub fn rgba(&self) -> [u8; 4] {
        match self {
            BackgroundFill::Black => [0, 0, 0, 255],
            BackgroundFill::White => [255, 255, 255, 255],
            BackgroundFill::Clear => [0, 0, 0, 0],
        }
    }
}

/// Camera overlay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraOverlaySettings {
    pub enabled: bool,
    pub device_id: Option<String>,
    /// Overlay width as a percentage of the output width
    pub size_percent: f64,
    pub corner: OverlayCorner,
    /// Distance from the frame edges in pixels
    pub margin: u32,
}

impl Default for CameraOverlaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: None,
            size_percent: 20.0,
            corner: OverlayCorner::BottomRight,
            margin: 20,
        }
    }
}

/// User settings consumed at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    pub output_dir: PathBuf,
    pub video_format: VideoFormat,
    pub codec: VideoCodec,
    pub encoder: EncoderMode,
    pub codec_fallback: CodecFallbackPolicy,
    pub quality: Quality,
    pub frame_rate: u32,
    pub show_cursor: bool,
    pub hdr: bool,
    pub alpha_channel: bool,
    pub audio_format: AudioFormat,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub record_system_audio: bool,
    pub record_microphone: bool,
    pub microphone_device: Option<String>,
    /// Merge system and microphone audio into one track after recording
    pub remux_audio: bool,
    pub system_volume: f32,
    pub microphone_volume: f32,
    pub camera_overlay: CameraOverlaySettings,
    pub background: BackgroundFill,
    /// Seconds to hold back frames after a presenter overlay mode change
    pub presenter_overlay_delay_secs: f64,
    /// Capacity of each routing lane
    pub sample_queue_capacity: usize,
    /// Capacity of each encoder input queue
    pub encoder_queue_capacity: usize,
    /// Produce a PNG preview of the first frame on completion
    pub preview: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            video_format: VideoFormat::Mp4,
            codec: VideoCodec::H264,
            encoder: EncoderMode::Hardware,
            codec_fallback: CodecFallbackPolicy::SwitchToHevc,
            quality: Quality::Medium,
            frame_rate: 60,
            show_cursor: true,
            hdr: false,
            alpha_channel: false,
            audio_format: AudioFormat::Aac,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            record_system_audio: true,
            record_microphone: false,
            microphone_device: None,
            remux_audio: true,
            system_volume: 1.0,
            microphone_volume: 1.0,
            camera_overlay: CameraOverlaySettings::default(),
            background: BackgroundFill::Black,
            presenter_overlay_delay_secs: 1.0,
            sample_queue_capacity: 64,
            encoder_queue_capacity: 16,
            preview: true,
        }
    }
}

impl RecorderSettings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, RecorderError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ConfigError::UnsupportedFormatCombination(format!("{}: {}", path.display(), e)).into()
        })
    }

    /// Reject settings that cannot produce a valid recording
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::UnsupportedFormatCombination(msg.to_string()));

        if self.frame_rate == 0 || self.frame_rate > 240 {
            return invalid("frame rate must be between 1 and 240");
        }
        if self.audio_sample_rate == 0 || self.audio_channels == 0 {
            return invalid("audio sample rate and channel count must be non-zero");
        }
        if self.alpha_channel && (self.codec != VideoCodec::H265 || self.video_format != VideoFormat::Mov) {
            return invalid("alpha channel requires H.265 in a .mov container");
        }
        if self.hdr && self.codec != VideoCodec::H265 {
            return invalid("HDR requires H.265");
        }
        let size = self.camera_overlay.size_percent;
        if self.camera_overlay.enabled && !(size > 0.0 && size <= 100.0) {
            return invalid("camera overlay size must be within (0, 100] percent");
        }
        if self.sample_queue_capacity == 0 || self.encoder_queue_capacity == 0 {
            return invalid("queue capacities must be non-zero");
        }
        Ok(())
    }
}

/// Colour space of the encoded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    Srgb,
    Bt2020Pq,
}

/// Codec change made by the capability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecFallback {
    pub from: (VideoCodec, EncoderMode),
    pub to: (VideoCodec, EncoderMode),
}

/// Immutable per-session stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfiguration {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub color_space: ColorSpace,
    pub show_cursor: bool,
    pub hdr: bool,
    pub alpha: bool,
    pub codec: VideoCodec,
    pub encoder: EncoderMode,
    pub video_format: VideoFormat,
    pub bitrate: u64,
    pub background: BackgroundFill,
    pub audio_format: AudioFormat,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl StreamConfiguration {
    /// Build the configuration for a resolved target.
    ///
    /// Runs the hardware capability probe and applies the fallback policy;
    /// the returned `CodecFallback` describes any change that was made.
    pub fn derive(
        target: &ResolvedTarget,
        settings: &RecorderSettings,
    ) -> Result<(Self, Option<CodecFallback>), RecorderError> {
        settings.validate()?;

        let (width, height) = if target.stream_type.is_audio_only() {
            (2, 2)
        } else {
            (even(target.width), even(target.height))
        };

        let mut codec = settings.codec;
        let mut encoder = settings.encoder;
        let mut fallback = None;

        if !target.stream_type.is_audio_only()
            && codec == VideoCodec::H264
            && encoder == EncoderMode::Hardware
            && exceeds_h264_hardware(width, height)
        {
            let to = match settings.codec_fallback {
                CodecFallbackPolicy::SwitchToHevc => (VideoCodec::H265, EncoderMode::Hardware),
                CodecFallbackPolicy::Software => (VideoCodec::H264, EncoderMode::Software),
                CodecFallbackPolicy::Reject => {
                    return Err(RecorderError::Capability(format!(
                        "{}x{} exceeds the H.264 hardware encoder limit of {}x{}",
                        width, height, H264_HARDWARE_MAX.0, H264_HARDWARE_MAX.1
                    )));
                }
            };
            tracing::warn!(
                "{}x{} unsupported by H.264 hardware encoder, falling back to {:?}/{:?}",
                width,
                height,
                to.0,
                to.1
            );
            fallback = Some(CodecFallback {
                from: (codec, encoder),
                to,
            });
            codec = to.0;
            encoder = to.1;
        }

        let config = Self {
            width,
            height,
            frame_rate: settings.frame_rate,
            color_space: if settings.hdr {
                ColorSpace::Bt2020Pq
            } else {
                ColorSpace::Srgb
            },
            show_cursor: settings.show_cursor,
            hdr: settings.hdr,
            alpha: settings.alpha_channel,
            codec,
            encoder,
            video_format: settings.video_format,
            bitrate: bitrate::target_bitrate(width, height, settings.frame_rate, codec, settings.quality),
            background: settings.background,
            audio_format: settings.audio_format,
            audio_sample_rate: settings.audio_sample_rate,
            audio_channels: settings.audio_channels,
        };

        tracing::info!(
            "Stream configuration: {}x{} @ {}fps, {:?}/{:?}, {} bps",
            config.width,
            config.height,
            config.frame_rate,
            config.codec,
            config.encoder,
            config.bitrate
        );

        Ok((config, fallback))
    }
}

fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

fn exceeds_h264_hardware(width: u32, height: u32) -> bool {
    let (long, short) = if width >= height {
        (width, height)
    } else {
        (height, width)
    };
    long > H264_HARDWARE_MAX.0 || short > H264_HARDWARE_MAX.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureTarget, StreamType};

    fn display_target(width: u32, height: u32) -> ResolvedTarget {
        ResolvedTarget {
            target: CaptureTarget::Display { display_id: 0 },
            stream_type: StreamType::Screen,
            width,
            height,
            display_id: Some(0),
        }
    }

    #[test]
    fn test_settings_defaults_from_partial_json() {
        let settings: RecorderSettings =
            serde_json::from_str(r#"{"frameRate": 30, "audioFormat": "mp3", "futureKey": 1}"#)
                .unwrap();
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.audio_format, AudioFormat::Mp3);
        assert_eq!(settings.codec, VideoCodec::H264);
        assert!(settings.remux_audio);
    }

    #[test]
    fn test_validate_rejects_alpha_without_hevc_mov() {
        let settings = RecorderSettings {
            alpha_channel: true,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::UnsupportedFormatCombination(_))
        ));

        let settings = RecorderSettings {
            alpha_channel: true,
            codec: VideoCodec::H265,
            video_format: VideoFormat::Mov,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_dimensions_rounded_even() {
        let (config, fallback) =
            StreamConfiguration::derive(&display_target(1441, 901), &RecorderSettings::default())
                .unwrap();
        assert_eq!((config.width, config.height), (1440, 900));
        assert!(fallback.is_none());
    }

    #[test]
    fn test_oversized_h264_falls_back_to_hevc() {
        let (config, fallback) =
            StreamConfiguration::derive(&display_target(6016, 3384), &RecorderSettings::default())
                .unwrap();
        assert_eq!(config.codec, VideoCodec::H265);
        assert_eq!(
            fallback,
            Some(CodecFallback {
                from: (VideoCodec::H264, EncoderMode::Hardware),
                to: (VideoCodec::H265, EncoderMode::Hardware),
            })
        );
    }

    #[test]
    fn test_oversized_h264_software_or_reject() {
        let settings = RecorderSettings {
            codec_fallback: CodecFallbackPolicy::Software,
            ..Default::default()
        };
        let (config, _) = StreamConfiguration::derive(&display_target(5120, 2880), &settings).unwrap();
        assert_eq!((config.codec, config.encoder), (VideoCodec::H264, EncoderMode::Software));

        let settings = RecorderSettings {
            codec_fallback: CodecFallbackPolicy::Reject,
            ..Default::default()
        };
        let result = StreamConfiguration::derive(&display_target(5120, 2880), &settings);
        assert!(matches!(result, Err(RecorderError::Capability(_))));
    }

    #[test]
    fn test_portrait_within_limit_keeps_h264() {
        let (config, fallback) =
            StreamConfiguration::derive(&display_target(2160, 3840), &RecorderSettings::default())
                .unwrap();
        assert_eq!(config.codec, VideoCodec::H264);
        assert!(fallback.is_none());
    }

    #[test]
    fn test_mp3_recorded_as_aac() {
        assert_eq!(AudioFormat::Mp3.recorded(), AudioFormat::Aac);
        assert_eq!(AudioFormat::Flac.for_container(), AudioFormat::Alac);
        assert_eq!(AudioFormat::Opus.extension(), "ogg");
    }
}
