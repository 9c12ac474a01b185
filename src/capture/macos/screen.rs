//! Screen, window, application and system audio capture via ScreenCaptureKit
//!
//! One `SCStream` per session carries both the video frames and (when
//! requested) system audio. Sample buffers arrive on ScreenCaptureKit's own
//! queues and are converted into `Sample`s right there.
//!
//! SCK presentation timestamps are rebased onto `MediaTime::host_now()` with
//! a single per-stream offset so they line up with camera and microphone
//! samples.

use crate::capture::backend::CapturePlan;
use crate::capture::target::{CaptureRect, CaptureTarget, ResolvedTarget, StreamType};
use crate::capture::traits::{CaptureError, CaptureResult, CaptureSource, SampleSink};
use crate::media::{AudioChunk, MediaTime, Sample, SampleKind, VideoFrame, BYTES_PER_PIXEL};
use crate::recorder::config::StreamConfiguration;
use async_trait::async_trait;
use screencapturekit::cv::CVPixelBufferLockFlags;
use screencapturekit::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

fn shareable_content() -> CaptureResult<SCShareableContent> {
    SCShareableContent::get().map_err(|e| CaptureError::Backend(format!("shareable content: {:?}", e)))
}

fn find_display(content: &SCShareableContent, display_id: Option<u32>) -> CaptureResult<SCDisplay> {
    let displays = content.displays();
    let found = match display_id {
        Some(id) => displays.into_iter().find(|d| d.display_id() == id),
        None => displays.into_iter().next(),
    };
    found.ok_or_else(|| match display_id {
        Some(id) => CaptureError::UnresolvedTarget(format!("display {} not found", id)),
        None => CaptureError::UnresolvedTarget("no display available".to_string()),
    })
}

fn window_bundle_id(window: &SCWindow) -> Option<String> {
    window.owning_application().map(|app| app.bundle_identifier())
}

/// Resolve a screen-based target to its capture surface. Blocking.
pub fn resolve(target: &CaptureTarget, stream_type: StreamType) -> CaptureResult<ResolvedTarget> {
    let content = shareable_content()?;
    let resolved = |width: u32, height: u32, display_id: u32| ResolvedTarget {
        target: target.clone(),
        stream_type,
        width,
        height,
        display_id: Some(display_id),
    };

    match target {
        CaptureTarget::Display { display_id } => {
            let display = find_display(&content, Some(*display_id))?;
            Ok(resolved(display.width(), display.height(), display.display_id()))
        }
        CaptureTarget::Windows { window_ids } => {
            let windows = content.windows();
            for id in window_ids {
                if !windows.iter().any(|w| w.window_id() == *id) {
                    return Err(CaptureError::UnresolvedTarget(format!("window {} not found", id)));
                }
            }
            let display = find_display(&content, None)?;
            if let [id] = window_ids.as_slice() {
                if let Some(window) = windows.iter().find(|w| w.window_id() == *id) {
                    let frame = window.frame();
                    return Ok(resolved(frame.width as u32, frame.height as u32, display.display_id()));
                }
            }
            Ok(resolved(display.width(), display.height(), display.display_id()))
        }
        CaptureTarget::Applications { bundle_ids, display_id } => {
            let has_window = content
                .windows()
                .iter()
                .any(|w| window_bundle_id(w).map_or(false, |b| bundle_ids.contains(&b)));
            if !has_window {
                return Err(CaptureError::UnresolvedTarget(format!(
                    "no windows for {}",
                    bundle_ids.join(", ")
                )));
            }
            let display = find_display(&content, *display_id)?;
            Ok(resolved(display.width(), display.height(), display.display_id()))
        }
        CaptureTarget::Area { display_id, rect } => {
            let display = find_display(&content, Some(*display_id))?;
            if !rect.fits_within(display.width(), display.height()) {
                return Err(CaptureError::UnresolvedTarget(format!(
                    "area {:?} exceeds display {}",
                    rect, display_id
                )));
            }
            Ok(resolved(rect.width, rect.height, display.display_id()))
        }
        CaptureTarget::AudioOnly => {
            let display = find_display(&content, None)?;
            Ok(resolved(2, 2, display.display_id()))
        }
        CaptureTarget::ExternalDevice { .. } | CaptureTarget::Camera { .. } => Err(CaptureError::Unsupported(
            format!("{} is not a screen capture target", stream_type),
        )),
    }
}

/// Content filter for a resolved target
fn content_filter(content: &SCShareableContent, resolved: &ResolvedTarget) -> CaptureResult<(SCContentFilter, u32, u32)> {
    let display = find_display(content, resolved.display_id)?;
    let (display_w, display_h) = (display.width(), display.height());
    let windows = content.windows();

    let keep: Option<Box<dyn Fn(&SCWindow) -> bool>> = match &resolved.target {
        CaptureTarget::Windows { window_ids } if window_ids.len() == 1 => {
            let window = windows
                .iter()
                .find(|w| w.window_id() == window_ids[0])
                .ok_or_else(|| CaptureError::UnresolvedTarget(format!("window {} closed", window_ids[0])))?;
            let filter = SCContentFilter::create().with_window(window).build();
            return Ok((filter, resolved.width, resolved.height));
        }
        CaptureTarget::Windows { window_ids } => {
            let ids = window_ids.clone();
            Some(Box::new(move |w: &SCWindow| ids.contains(&w.window_id())))
        }
        CaptureTarget::Applications { bundle_ids, .. } => {
            let bundles = bundle_ids.clone();
            Some(Box::new(move |w: &SCWindow| {
                window_bundle_id(w).map_or(false, |b| bundles.contains(&b))
            }))
        }
        _ => None,
    };

    let excluded: Vec<&SCWindow> = match &keep {
        Some(keep) => windows.iter().filter(|w| !keep(w)).collect(),
        None => Vec::new(),
    };
    let filter = SCContentFilter::create()
        .with_display(&display)
        .with_excluding_windows(&excluded)
        .build();
    Ok((filter, display_w, display_h))
}

fn stream_configuration(
    width: u32,
    height: u32,
    config: &StreamConfiguration,
    system_audio: bool,
) -> SCStreamConfiguration {
    let fps = config.frame_rate.max(1) as i32;
    let sc_config = SCStreamConfiguration::new()
        .with_width(width)
        .with_height(height)
        .with_pixel_format(PixelFormat::BGRA)
        .with_shows_cursor(config.show_cursor)
        .with_minimum_frame_interval(&CMTime::new(1, fps));

    if system_audio {
        sc_config
            .with_captures_audio(true)
            .with_excludes_current_process_audio(true)
            .with_sample_rate(config.audio_sample_rate as i32)
            .with_channel_count(i32::from(config.audio_channels))
    } else {
        sc_config
    }
}

/// Maps SCK presentation timestamps onto the host clock
#[derive(Default)]
struct HostRebase {
    offset: OnceLock<MediaTime>,
}

impl HostRebase {
    fn rebase(&self, pts: MediaTime) -> MediaTime {
        let offset = *self.offset.get_or_init(|| MediaTime::host_now() - pts);
        pts + offset
    }
}

struct OutputHandler {
    sink: SampleSink,
    clock: Arc<HostRebase>,
    crop: Option<CaptureRect>,
    video: bool,
    frame_duration: MediaTime,
    sample_rate: u32,
    frames: Arc<AtomicU64>,
}

impl OutputHandler {
    fn on_screen(&self, sample: &CMSampleBuffer) {
        let Some(pixel_buffer) = sample.image_buffer() else {
            return;
        };
        let Ok(guard) = pixel_buffer.lock(CVPixelBufferLockFlags::READ_ONLY) else {
            return;
        };

        let width = guard.width() as u32;
        let height = guard.height() as u32;
        let stride = guard.bytes_per_row();
        let pixels = guard.as_slice();

        let frame = match self.crop {
            Some(rect) => match crop(pixels, width, height, stride, rect) {
                Some(frame) => frame,
                None => return,
            },
            None => VideoFrame::new(width, height, stride, pixels.to_vec()),
        };

        let pts = sample.presentation_timestamp();
        let presentation = self.clock.rebase(MediaTime::from_rational(pts.value, pts.timescale));
        self.sink
            .send(Sample::video(SampleKind::Video, frame, presentation, self.frame_duration));
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn on_audio(&self, sample: &CMSampleBuffer) {
        let Some(buffers) = sample.audio_buffer_list() else {
            return;
        };

        let mut planes: Vec<Vec<f32>> = Vec::new();
        let mut interleaved_channels = 0u16;
        for buffer in buffers.iter() {
            let bytes = buffer.data();
            let channels = buffer.number_channels as u16;
            if bytes.is_empty() || channels == 0 {
                continue;
            }
            let samples: Vec<f32> = bytes
                .chunks_exact(std::mem::size_of::<f32>())
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            interleaved_channels = channels;
            planes.push(samples);
        }

        let (channels, samples) = match planes.len() {
            0 => return,
            1 => (interleaved_channels, planes.remove(0)),
            n => (n as u16, interleave(&planes)),
        };

        let pts = sample.presentation_timestamp();
        let presentation = self.clock.rebase(MediaTime::from_rational(pts.value, pts.timescale));
        let chunk = AudioChunk::new(self.sample_rate, channels, samples);
        self.sink.send(Sample::audio(SampleKind::SystemAudio, chunk, presentation));
    }
}

impl SCStreamOutputTrait for OutputHandler {
    fn did_output_sample_buffer(&self, sample: CMSampleBuffer, of_type: SCStreamOutputType) {
        match of_type {
            SCStreamOutputType::Screen if self.video => self.on_screen(&sample),
            SCStreamOutputType::Audio => self.on_audio(&sample),
            _ => {}
        }
    }
}

struct StreamObserver {
    sink: SampleSink,
    running: Arc<AtomicBool>,
}

impl SCStreamDelegateTrait for StreamObserver {
    fn did_stop_with_error(&self, error: SCError) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.sink.fail("screen", format!("stream stopped: {:?}", error));
        }
    }
}

/// Interleave planar channel buffers of equal length
fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

/// Copy `rect` out of a BGRA buffer
fn crop(pixels: &[u8], width: u32, height: u32, stride: usize, rect: CaptureRect) -> Option<VideoFrame> {
    if rect.x + rect.width > width || rect.y + rect.height > height {
        return None;
    }
    let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
    let mut data = Vec::with_capacity(row_bytes * rect.height as usize);
    for y in rect.y..rect.y + rect.height {
        let start = y as usize * stride + rect.x as usize * BYTES_PER_PIXEL;
        data.extend_from_slice(pixels.get(start..start + row_bytes)?);
    }
    Some(VideoFrame::packed(rect.width, rect.height, data))
}

/// ScreenCaptureKit capture source
pub struct ScreenSource {
    resolved: ResolvedTarget,
    config: StreamConfiguration,
    system_audio: bool,
    stream: Option<SCStream>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    stopped: bool,
}

impl ScreenSource {
    pub fn new(plan: &CapturePlan) -> Self {
        Self {
            resolved: plan.resolved.clone(),
            config: plan.config.clone(),
            system_audio: plan.system_audio || plan.resolved.stream_type.is_audio_only(),
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            stopped: false,
        }
    }
}

#[async_trait]
impl CaptureSource for ScreenSource {
    fn id(&self) -> &str {
        "screen"
    }

    fn kinds(&self) -> Vec<SampleKind> {
        let mut kinds = Vec::new();
        if !self.resolved.stream_type.is_audio_only() {
            kinds.push(SampleKind::Video);
        }
        if self.system_audio {
            kinds.push(SampleKind::SystemAudio);
        }
        kinds
    }

    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        if self.stream.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let resolved = self.resolved.clone();
        let config = self.config.clone();
        let system_audio = self.system_audio;
        let running = self.running.clone();
        let frames = self.frames.clone();

        let stream = tokio::task::spawn_blocking(move || -> CaptureResult<SCStream> {
            let content = shareable_content()?;
            let (filter, width, height) = content_filter(&content, &resolved)?;
            let audio_only = resolved.stream_type.is_audio_only();
            let (width, height) = if audio_only { (2, 2) } else { (width, height) };
            let sc_config = stream_configuration(width, height, &config, system_audio);

            let crop = match &resolved.target {
                CaptureTarget::Area { rect, .. } => Some(*rect),
                _ => None,
            };
            let handler = OutputHandler {
                sink: sink.clone(),
                clock: Arc::new(HostRebase::default()),
                crop,
                video: !audio_only,
                frame_duration: MediaTime::from_rational(1, config.frame_rate.max(1) as i32),
                sample_rate: config.audio_sample_rate,
                frames,
            };
            let observer = StreamObserver {
                sink,
                running: running.clone(),
            };

            let mut stream = SCStream::new_with_delegate(&filter, &sc_config, observer);
            let handler = Arc::new(handler);
            // SCK expects a screen output even when only audio is consumed
            stream.add_output_handler(SharedHandler(handler.clone()), SCStreamOutputType::Screen);
            if system_audio {
                stream.add_output_handler(SharedHandler(handler), SCStreamOutputType::Audio);
            }

            running.store(true, Ordering::SeqCst);
            if let Err(e) = stream.start_capture() {
                running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Backend(format!("start_capture: {:?}", e)));
            }
            Ok(stream)
        })
        .await
        .map_err(|e| CaptureError::Backend(e.to_string()))??;

        self.stream = Some(stream);
        tracing::info!(
            "ScreenCaptureKit stream started for {} ({}x{}, system audio: {})",
            self.resolved.stream_type,
            self.resolved.width,
            self.resolved.height,
            self.system_audio
        );
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        self.stopped = true;
        self.running.store(false, Ordering::SeqCst);

        let Some(mut stream) = self.stream.take() else {
            return Err(CaptureError::NotRunning);
        };
        let result = tokio::task::spawn_blocking(move || stream.stop_capture().map_err(|e| format!("{:?}", e)))
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        tracing::info!(
            "ScreenCaptureKit stream stopped after {} frames",
            self.frames.load(Ordering::Relaxed)
        );
        result.map_err(|e| CaptureError::Backend(format!("stop_capture: {}", e)))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Lets one handler serve both output types
struct SharedHandler(Arc<OutputHandler>);

impl SCStreamOutputTrait for SharedHandler {
    fn did_output_sample_buffer(&self, sample: CMSampleBuffer, of_type: SCStreamOutputType) {
        self.0.did_output_sample_buffer(sample, of_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_planar_audio() {
        let planes = vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]];
        assert_eq!(interleave(&planes), vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_crop_respects_stride() {
        // 4x2 frame with 8 bytes of row padding, pixel value = column index
        let mut pixels = Vec::new();
        for _ in 0..2 {
            for x in 0..4u8 {
                pixels.extend_from_slice(&[x, x, x, 255]);
            }
            pixels.extend_from_slice(&[0; 8]);
        }
        let rect = CaptureRect { x: 1, y: 1, width: 2, height: 1 };
        let frame = crop(&pixels, 4, 2, 24, rect).unwrap();
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(&frame.data[..], &[1, 1, 1, 255, 2, 2, 2, 255]);

        let outside = CaptureRect { x: 3, y: 0, width: 2, height: 1 };
        assert!(crop(&pixels, 4, 2, 24, outside).is_none());
    }

    #[test]
    fn test_rebase_keeps_spacing() {
        let clock = HostRebase::default();
        let a = clock.rebase(MediaTime::from_millis(1_000_000));
        let b = clock.rebase(MediaTime::from_millis(1_000_033));
        assert_eq!(b - a, MediaTime::from_millis(33));
    }
}
