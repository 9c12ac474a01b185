//! Microphone capture using cpal
//!
//! The input stream lives on its own thread (`cpal::Stream` is not `Send`).
//! Chunks are delivered in the device's native rate and channel layout; the
//! audio encoder resamples.

use super::traits::{CaptureError, CaptureResult, CaptureSource, SampleSink};
use crate::media::{AudioChunk, MediaTime, Sample, SampleKind};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// An audio input device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneDevice {
    pub name: String,
    pub is_default: bool,
}

/// List audio input devices of the default host
pub fn list_devices() -> Vec<MicrophoneDevice> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| MicrophoneDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

fn find_device(name: Option<&str>) -> CaptureResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("no default input device".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Backend(e.to_string()))?
            .find(|device| device.name().map_or(false, |n| n == wanted))
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("microphone {}", wanted))),
    }
}

/// Convert i16 PCM to f32 in [-1, 1)
pub fn i16_to_f32(data: &[i16]) -> Vec<f32> {
    data.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub struct MicrophoneSource {
    device: Option<String>,
    preferred_rate: u32,
    preferred_channels: u16,
    running: Arc<AtomicBool>,
    stopped: bool,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    pub fn new(device: Option<String>, preferred_rate: u32, preferred_channels: u16) -> Self {
        Self {
            device,
            preferred_rate,
            preferred_channels,
            running: Arc::new(AtomicBool::new(false)),
            stopped: false,
            thread: None,
        }
    }

    async fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::error!("Microphone thread panicked");
            }
        }
    }
}

#[async_trait]
impl CaptureSource for MicrophoneSource {
    fn id(&self) -> &str {
        "microphone"
    }

    fn kinds(&self) -> Vec<SampleKind> {
        vec![SampleKind::Microphone]
    }

    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let (started_tx, started_rx) = oneshot::channel();
        let device = self.device.clone();
        let preferred = (self.preferred_rate, self.preferred_channels);
        let running = self.running.clone();
        self.running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || run_stream(device, preferred, running, sink, started_tx))
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        self.thread = Some(handle);

        match started_rx.await {
            Ok(Ok((rate, channels))) => {
                tracing::info!("Microphone started: {} Hz, {} channels", rate, channels);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.join_thread().await;
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                self.join_thread().await;
                Err(CaptureError::Backend("microphone thread exited before starting".to_string()))
            }
        }
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        self.stopped = true;
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.join_thread().await;
        if !was_running {
            return Err(CaptureError::NotRunning);
        }
        tracing::info!("Microphone stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Pick the device's default config, preferring the session rate when the
/// device supports it
fn input_config(device: &cpal::Device, preferred: (u32, u16)) -> CaptureResult<(StreamConfig, SampleFormat)> {
    let default = device
        .default_input_config()
        .map_err(|e| CaptureError::Backend(format!("no input config: {}", e)))?;
    let sample_format = default.sample_format();
    let mut config: StreamConfig = default.into();

    let supports_preferred = device.supported_input_configs().map_or(false, |mut ranges| {
        ranges.any(|range| {
            range.sample_format() == sample_format
                && range.channels() == config.channels
                && range.min_sample_rate().0 <= preferred.0
                && range.max_sample_rate().0 >= preferred.0
        })
    });
    if supports_preferred {
        config.sample_rate = cpal::SampleRate(preferred.0);
    }
    Ok((config, sample_format))
}

fn run_stream(
    device_name: Option<String>,
    preferred: (u32, u16),
    running: Arc<AtomicBool>,
    sink: SampleSink,
    started: oneshot::Sender<CaptureResult<(u32, u16)>>,
) {
    let opened = find_device(device_name.as_deref()).and_then(|device| {
        let (config, format) = input_config(&device, preferred)?;
        let stream = build_stream(&device, &config, format, &sink)?;
        stream
            .play()
            .map_err(|e| CaptureError::Backend(format!("failed to start input stream: {}", e)))?;
        Ok((stream, config))
    });

    let (stream, config) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = started.send(Err(e));
            return;
        }
    };
    let _ = started.send(Ok((config.sample_rate.0, config.channels)));

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    sink: &SampleSink,
) -> CaptureResult<cpal::Stream> {
    let rate = config.sample_rate.0;
    let channels = config.channels;
    let failed = Arc::new(AtomicBool::new(false));
    let error_sink = sink.clone();
    let on_error = move |err: cpal::StreamError| {
        if !failed.swap(true, Ordering::SeqCst) {
            error_sink.fail("microphone", err.to_string());
        }
    };

    let deliver = {
        let sink = sink.clone();
        move |samples: Vec<f32>| {
            let chunk = AudioChunk::new(rate, channels, samples);
            let presentation = MediaTime::host_now() - chunk.duration();
            sink.send(Sample::audio(SampleKind::Microphone, chunk, presentation));
        }
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data.to_vec()),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| deliver(i16_to_f32(data)),
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Unsupported(format!("input sample format {:?}", other)));
        }
    };
    stream.map_err(|e| CaptureError::Backend(format!("failed to build input stream: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_conversion_range() {
        let converted = i16_to_f32(&[0, i16::MAX, i16::MIN, -16384]);
        assert_eq!(converted[0], 0.0);
        assert!(converted[1] < 1.0 && converted[1] > 0.999);
        assert_eq!(converted[2], -1.0);
        assert_eq!(converted[3], -0.5);
    }

    #[tokio::test]
    async fn test_stopped_source_cannot_restart() {
        let mut source = MicrophoneSource::new(None, 48_000, 2);
        assert!(matches!(source.stop().await, Err(CaptureError::NotRunning)));

        let (video_tx, _v) = tokio::sync::mpsc::channel(1);
        let (audio_tx, _a) = tokio::sync::mpsc::channel(1);
        let (fault_tx, _f) = tokio::sync::mpsc::unbounded_channel();
        let sink = SampleSink::new(
            video_tx,
            audio_tx,
            Arc::new(crate::media::FrameSlot::new()),
            fault_tx,
        );
        assert!(matches!(source.start(sink).await, Err(CaptureError::AlreadyStopped)));
    }
}
