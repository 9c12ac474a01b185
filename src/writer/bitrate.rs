//! Target bitrate model
//!
//! bitrate = resolution x frame-rate factor x codec efficiency x quality,
//! where quality is scaled down logarithmically as resolution and frame rate
//! grow, and the result never drops below [`MIN_BITRATE`].

use crate::recorder::config::{Quality, VideoCodec};

/// Lower bound for any computed bitrate, in bits per second
pub const MIN_BITRATE: u64 = 200_000;

/// Smallest edge length fed into the model
const MIN_EDGE: u32 = 600;

fn codec_factor(codec: VideoCodec) -> f64 {
    match codec {
        VideoCodec::H264 => 0.9,
        VideoCodec::H265 => 0.5,
    }
}

/// Compute the target video bitrate in bits per second
pub fn target_bitrate(width: u32, height: u32, frame_rate: u32, codec: VideoCodec, quality: Quality) -> u64 {
    let resolution = width.max(MIN_EDGE) as f64 * height.max(MIN_EDGE) as f64;
    let fps_factor = frame_rate.max(1) as f64 / 8.0;

    let complexity = (resolution.sqrt() * fps_factor).max(1.0);
    let scale = (1.0 - complexity.log10() / 6.0).clamp(0.1, 1.0);

    let bitrate = resolution * fps_factor * codec_factor(codec) * quality.factor() * scale;
    if !bitrate.is_finite() {
        return MIN_BITRATE;
    }
    (bitrate as u64).max(MIN_BITRATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_holds_everywhere() {
        for &(w, h) in &[(2, 2), (320, 240), (1920, 1080), (7680, 4320)] {
            for &fps in &[1, 15, 30, 60, 120, 240] {
                for codec in [VideoCodec::H264, VideoCodec::H265] {
                    for quality in [Quality::Low, Quality::Medium, Quality::High] {
                        assert!(target_bitrate(w, h, fps, codec, quality) >= MIN_BITRATE);
                    }
                }
            }
        }
    }

    #[test]
    fn test_tiny_capture_hits_floor() {
        assert_eq!(target_bitrate(2, 2, 1, VideoCodec::H265, Quality::Low), MIN_BITRATE);
    }

    #[test]
    fn test_quality_and_codec_ordering() {
        let low = target_bitrate(1920, 1080, 60, VideoCodec::H264, Quality::Low);
        let medium = target_bitrate(1920, 1080, 60, VideoCodec::H264, Quality::Medium);
        let high = target_bitrate(1920, 1080, 60, VideoCodec::H264, Quality::High);
        assert!(low < medium && medium < high);

        let hevc = target_bitrate(1920, 1080, 60, VideoCodec::H265, Quality::High);
        assert!(hevc < high);
    }

    #[test]
    fn test_growth_is_sublinear() {
        let hd = target_bitrate(1920, 1080, 60, VideoCodec::H264, Quality::High);
        let uhd = target_bitrate(3840, 2160, 60, VideoCodec::H264, Quality::High);
        assert!(uhd > hd);
        assert!(uhd < hd * 4);
    }
}
