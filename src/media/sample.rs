//! Sample buffers flowing through the capture pipeline

use super::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes per pixel for the BGRA layout every video frame uses
pub const BYTES_PER_PIXEL: usize = 4;

/// Logical source of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleKind {
    /// Primary video (screen, window, application, area, or a camera/device
    /// when it is the recording target itself)
    Video,
    /// System audio output
    SystemAudio,
    /// Microphone input
    Microphone,
    /// Camera frames composited onto the primary video
    CameraOverlay,
}

impl SampleKind {
    pub fn is_audio(self) -> bool {
        matches!(self, SampleKind::SystemAudio | SampleKind::Microphone)
    }
}

/// Timing information attached to a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub presentation: MediaTime,
    pub decode: Option<MediaTime>,
    pub duration: MediaTime,
}

impl SampleTiming {
    pub fn new(presentation: MediaTime, duration: MediaTime) -> Self {
        Self {
            presentation,
            decode: None,
            duration,
        }
    }

    /// Presentation end point (`presentation + duration`)
    pub fn end(&self) -> MediaTime {
        self.presentation + self.duration
    }

    /// Move both presentation and decode timestamps earlier by `offset`
    pub fn shifted_back(&self, offset: MediaTime) -> Self {
        Self {
            presentation: self.presentation - offset,
            decode: self.decode.map(|d| d - offset),
            duration: self.duration,
        }
    }
}

/// A BGRA video frame
///
/// Pixel data is shared so that retimed copies and the compositor's camera
/// slot never copy the image.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    pub data: Arc<[u8]>,
    /// Monotonic sequence number assigned at creation
    pub sequence: u64,
}

static FRAME_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl VideoFrame {
    pub fn new(width: u32, height: u32, stride: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride,
            data: data.into(),
            sequence: FRAME_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Create a tightly packed frame
    pub fn packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(width, height, width as usize * BYTES_PER_PIXEL, data)
    }

    /// Build a frame from RGBA pixels, swizzling into BGRA
    pub fn from_rgba(width: u32, height: u32, mut rgba: Vec<u8>) -> Self {
        for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
        Self::packed(width, height, rgba)
    }

    /// Build a frame from an RGBA image buffer
    pub fn from_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw())
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn is_packed(&self) -> bool {
        self.stride == self.row_bytes()
    }

    /// Whether the buffer is large enough for the declared geometry
    pub fn is_well_formed(&self) -> bool {
        if self.width == 0 || self.height == 0 || self.stride < self.row_bytes() {
            return false;
        }
        let needed = self.stride * (self.height as usize - 1) + self.row_bytes();
        self.data.len() >= needed
    }

    /// Pixel rows without stride padding
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let row_bytes = self.row_bytes();
        (0..self.height as usize).map(move |y| {
            let start = y * self.stride;
            &self.data[start..start + row_bytes]
        })
    }

    /// Tightly packed BGRA bytes
    pub fn packed_bytes(&self) -> Vec<u8> {
        if self.is_packed() {
            return self.data[..self.row_bytes() * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(self.row_bytes() * self.height as usize);
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        out
    }

    /// Convert to an RGBA image buffer
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        if !self.is_well_formed() {
            return None;
        }
        let mut rgba = self.packed_bytes();
        for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
        image::RgbaImage::from_raw(self.width, self.height, rgba)
    }
}

/// Interleaved 32-bit float PCM
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<[f32]>,
}

impl AudioChunk {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples: samples.into(),
        }
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> MediaTime {
        MediaTime::from_frames(self.frames() as u64, self.sample_rate)
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Video(VideoFrame),
    Audio(AudioChunk),
}

/// One timestamped buffer from a capture adapter
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    pub timing: SampleTiming,
    pub payload: Payload,
}

impl Sample {
    pub fn video(kind: SampleKind, frame: VideoFrame, presentation: MediaTime, duration: MediaTime) -> Self {
        Self {
            kind,
            timing: SampleTiming::new(presentation, duration),
            payload: Payload::Video(frame),
        }
    }

    /// Audio sample whose duration is derived from the frame count
    pub fn audio(kind: SampleKind, chunk: AudioChunk, presentation: MediaTime) -> Self {
        let duration = chunk.duration();
        Self {
            kind,
            timing: SampleTiming::new(presentation, duration),
            payload: Payload::Audio(chunk),
        }
    }

    pub fn presentation(&self) -> MediaTime {
        self.timing.presentation
    }

    pub fn end(&self) -> MediaTime {
        self.timing.end()
    }

    /// Copy sharing the payload with every timing entry moved back by `offset`
    pub fn retimed(&self, offset: MediaTime) -> Sample {
        Sample {
            kind: self.kind,
            timing: self.timing.shifted_back(offset),
            payload: self.payload.clone(),
        }
    }

    /// Same payload and timing relabelled as another kind
    pub fn with_kind(mut self, kind: SampleKind) -> Sample {
        self.kind = kind;
        self
    }

    pub fn frame(&self) -> Option<&VideoFrame> {
        match &self.payload {
            Payload::Video(frame) => Some(frame),
            Payload::Audio(_) => None,
        }
    }

    pub fn chunk(&self) -> Option<&AudioChunk> {
        match &self.payload {
            Payload::Audio(chunk) => Some(chunk),
            Payload::Video(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, bgra: [u8; 4]) -> VideoFrame {
        let data = bgra.repeat((width * height) as usize);
        VideoFrame::packed(width, height, data)
    }

    #[test]
    fn test_retimed_shares_payload() {
        let frame = solid_frame(2, 2, [1, 2, 3, 255]);
        let mut sample = Sample::video(
            SampleKind::Video,
            frame,
            MediaTime::from_millis(5165),
            MediaTime::from_millis(33),
        );
        sample.timing.decode = Some(MediaTime::from_millis(5160));

        let retimed = sample.retimed(MediaTime::from_millis(5000));
        assert_eq!(retimed.presentation(), MediaTime::from_millis(165));
        assert_eq!(retimed.timing.decode, Some(MediaTime::from_millis(160)));
        assert_eq!(retimed.timing.duration, MediaTime::from_millis(33));

        let (Payload::Video(a), Payload::Video(b)) = (&sample.payload, &retimed.payload) else {
            panic!("expected video payloads");
        };
        assert!(Arc::ptr_eq(&a.data, &b.data));
    }

    #[test]
    fn test_padded_rows_are_packed() {
        // 2x2 frame with 4 bytes of padding per row
        let mut data = Vec::new();
        for y in 0..2u8 {
            data.extend_from_slice(&[y, y, y, 255, y, y, y, 255]);
            data.extend_from_slice(&[0xAA; 4]);
        }
        let frame = VideoFrame::new(2, 2, 12, data);
        assert!(frame.is_well_formed());
        assert_eq!(frame.packed_bytes().len(), 16);
        assert!(!frame.packed_bytes().contains(&0xAA));
    }

    #[test]
    fn test_image_conversion_swizzles() {
        let frame = solid_frame(1, 1, [10, 20, 30, 255]);
        let image = frame.to_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10, 255]);

        let back = VideoFrame::from_image(image);
        assert_eq!(&back.data[..], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_audio_duration() {
        let chunk = AudioChunk::new(48_000, 2, vec![0.0; 960 * 2]);
        assert_eq!(chunk.frames(), 960);
        let sample = Sample::audio(SampleKind::Microphone, chunk, MediaTime::ZERO);
        assert_eq!(sample.end(), MediaTime::from_millis(20));
    }
}
