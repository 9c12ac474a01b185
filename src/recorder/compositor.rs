//! Frame compositor
//!
//! Fits every primary video frame to the session's output size and, when a
//! camera overlay is configured, draws the most recent camera frame into a
//! corner of it.
//!
//! Pixel data is BGRA throughout. The image buffers below are typed as RGBA
//! but scaling and alpha blending treat the colour channels independently,
//! so no swizzle is needed.

use super::config::{BackgroundFill, CameraOverlaySettings, OverlayCorner, StreamConfiguration};
use crate::media::{FrameSlot, VideoFrame};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::sync::Arc;

struct CachedOverlay {
    version: u64,
    image: RgbaImage,
}

pub struct Compositor {
    width: u32,
    height: u32,
    background: BackgroundFill,
    overlay: Option<(CameraOverlaySettings, Arc<FrameSlot>)>,
    cached: Option<CachedOverlay>,
    composited: u64,
}

impl Compositor {
    pub fn new(config: &StreamConfiguration) -> Self {
        Self {
            width: config.width,
            height: config.height,
            background: config.background,
            overlay: None,
            cached: None,
            composited: 0,
        }
    }

    /// Composite camera frames from `slot` onto every output frame
    pub fn with_camera(mut self, settings: CameraOverlaySettings, slot: Arc<FrameSlot>) -> Self {
        self.overlay = Some((settings, slot));
        self
    }

    /// Frames that received a camera overlay
    pub fn composited(&self) -> u64 {
        self.composited
    }

    /// Produce the frame to encode for `frame`.
    ///
    /// Returns the input unchanged when it already matches the output size
    /// and no camera frame is available.
    pub fn render(&mut self, frame: &VideoFrame) -> Option<VideoFrame> {
        let camera = self.camera_image();
        let sized = frame.width == self.width && frame.height == self.height;

        if sized && camera.is_none() {
            return Some(frame.clone());
        }

        let mut canvas = self.fit(frame)?;
        if let Some(camera) = camera {
            let (x, y) = self.overlay_origin(camera.width(), camera.height());
            imageops::overlay(&mut canvas, &camera, x, y);
            self.composited += 1;
        }
        Some(VideoFrame::packed(self.width, self.height, canvas.into_raw()))
    }

    /// Scale `frame` down to fit the output, centred on the background fill
    fn fit(&self, frame: &VideoFrame) -> Option<RgbaImage> {
        if !frame.is_well_formed() {
            tracing::warn!("Dropping malformed {}x{} frame", frame.width, frame.height);
            return None;
        }
        let source = RgbaImage::from_raw(frame.width, frame.height, frame.packed_bytes())?;
        if frame.width == self.width && frame.height == self.height {
            return Some(source);
        }

        let scale = (self.width as f64 / frame.width as f64)
            .min(self.height as f64 / frame.height as f64)
            .min(1.0);
        let scaled_w = ((frame.width as f64 * scale).round() as u32).clamp(1, self.width);
        let scaled_h = ((frame.height as f64 * scale).round() as u32).clamp(1, self.height);

        let mut canvas = RgbaImage::from_pixel(self.width, self.height, Rgba(self.background.rgba()));
        let x = i64::from((self.width - scaled_w) / 2);
        let y = i64::from((self.height - scaled_h) / 2);
        if (scaled_w, scaled_h) == (frame.width, frame.height) {
            imageops::replace(&mut canvas, &source, x, y);
        } else {
            let resized = imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle);
            imageops::replace(&mut canvas, &resized, x, y);
        }
        Some(canvas)
    }

    /// Scaled camera image, rebuilt only when a new camera frame arrived
    fn camera_image(&mut self) -> Option<RgbaImage> {
        let (settings, slot) = self.overlay.as_ref()?;
        let version = slot.version();
        if let Some(cached) = &self.cached {
            if cached.version == version {
                return Some(cached.image.clone());
            }
        }

        let sample = slot.latest()?;
        let frame = sample.frame()?;
        if !frame.is_well_formed() {
            return None;
        }
        let source = RgbaImage::from_raw(frame.width, frame.height, frame.packed_bytes())?;

        let target_w = ((self.width as f64 * settings.size_percent / 100.0).round() as u32).clamp(1, self.width);
        let target_h = ((target_w as f64 * frame.height as f64 / frame.width as f64).round() as u32)
            .clamp(1, self.height);
        let image = imageops::resize(&source, target_w, target_h, FilterType::Triangle);

        self.cached = Some(CachedOverlay {
            version,
            image: image.clone(),
        });
        Some(image)
    }

    fn overlay_origin(&self, overlay_w: u32, overlay_h: u32) -> (i64, i64) {
        let Some((settings, _)) = &self.overlay else {
            return (0, 0);
        };
        let margin = settings.margin;
        let left = i64::from(margin);
        let top = i64::from(margin);
        let right = i64::from(self.width.saturating_sub(overlay_w + margin));
        let bottom = i64::from(self.height.saturating_sub(overlay_h + margin));
        match settings.corner {
            OverlayCorner::TopLeft => (left, top),
            OverlayCorner::TopRight => (right, top),
            OverlayCorner::BottomLeft => (left, bottom),
            OverlayCorner::BottomRight => (right, bottom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureTarget, ResolvedTarget, StreamType};
    use crate::media::{MediaTime, Sample, SampleKind};
    use crate::recorder::config::RecorderSettings;

    fn config(width: u32, height: u32) -> StreamConfiguration {
        let target = ResolvedTarget {
            target: CaptureTarget::Display { display_id: 0 },
            stream_type: StreamType::Screen,
            width,
            height,
            display_id: Some(0),
        };
        StreamConfiguration::derive(&target, &RecorderSettings::default()).unwrap().0
    }

    fn solid(width: u32, height: u32, bgra: [u8; 4]) -> VideoFrame {
        VideoFrame::packed(width, height, bgra.repeat((width * height) as usize))
    }

    fn pixel(frame: &VideoFrame, x: u32, y: u32) -> [u8; 4] {
        let at = y as usize * frame.stride + x as usize * 4;
        [frame.data[at], frame.data[at + 1], frame.data[at + 2], frame.data[at + 3]]
    }

    fn overlay_settings(corner: OverlayCorner) -> CameraOverlaySettings {
        CameraOverlaySettings {
            enabled: true,
            device_id: None,
            size_percent: 25.0,
            corner,
            margin: 2,
        }
    }

    #[test]
    fn test_matching_frame_passes_through() {
        let mut compositor = Compositor::new(&config(8, 8));
        let frame = solid(8, 8, [10, 20, 30, 255]);
        let out = compositor.render(&frame).unwrap();
        assert_eq!(out.sequence, frame.sequence);
    }

    #[test]
    fn test_no_camera_frame_passes_screen_through() {
        let slot = Arc::new(FrameSlot::new());
        let mut compositor = Compositor::new(&config(16, 16)).with_camera(overlay_settings(OverlayCorner::BottomRight), slot);
        let frame = solid(16, 16, [1, 2, 3, 255]);
        let out = compositor.render(&frame).unwrap();
        assert_eq!(out.sequence, frame.sequence);
        assert_eq!(compositor.composited(), 0);
    }

    #[test]
    fn test_camera_drawn_in_corner() {
        let slot = Arc::new(FrameSlot::new());
        slot.store(Sample::video(
            SampleKind::CameraOverlay,
            solid(8, 8, [0, 0, 255, 255]),
            MediaTime::ZERO,
            MediaTime::from_millis(33),
        ));
        let mut compositor = Compositor::new(&config(16, 16)).with_camera(overlay_settings(OverlayCorner::BottomRight), slot);

        let out = compositor.render(&solid(16, 16, [0, 0, 0, 255])).unwrap();
        assert_eq!((out.width, out.height), (16, 16));
        // 25% of 16 is a 4x4 overlay at (10, 10)
        assert_eq!(pixel(&out, 11, 11), [0, 0, 255, 255]);
        assert_eq!(pixel(&out, 1, 1), [0, 0, 0, 255]);
        assert_eq!(pixel(&out, 15, 15), [0, 0, 0, 255]);
        assert_eq!(compositor.composited(), 1);
    }

    #[test]
    fn test_smaller_frame_centred_on_background() {
        let mut compositor = Compositor::new(&config(8, 8));
        let out = compositor.render(&solid(4, 4, [9, 9, 9, 255])).unwrap();
        assert_eq!((out.width, out.height), (8, 8));
        assert_eq!(pixel(&out, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&out, 3, 3), [9, 9, 9, 255]);
    }

    #[test]
    fn test_larger_frame_scaled_down() {
        let mut compositor = Compositor::new(&config(8, 4));
        let out = compositor.render(&solid(16, 16, [50, 60, 70, 255])).unwrap();
        assert_eq!((out.width, out.height), (8, 4));
        // 4x4 content centred between black bars
        assert_eq!(pixel(&out, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&out, 4, 2), [50, 60, 70, 255]);
    }
}
