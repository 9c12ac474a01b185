//! Camera and external device capture using nokhwa
//!
//! The camera is opened and read on a dedicated thread since nokhwa's
//! `Camera` is not `Send` on every platform. Frames are decoded to RGBA,
//! swizzled to BGRA and stamped with the host clock on arrival.

use super::traits::{CaptureError, CaptureResult, CaptureSource, SampleSink};
use crate::media::{MediaTime, Sample, SampleKind, VideoFrame};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Consecutive frame errors after which the stream counts as failed
const MAX_FRAME_ERRORS: u32 = 30;

/// A video capture device known to the OS
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: String,
    pub name: String,
}

/// List attached cameras and external video devices
pub fn list_devices() -> Vec<CameraDevice> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| CameraDevice {
                id: match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                },
                name: info.human_name().to_string(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Map a device id to a nokhwa index. Numeric ids are indices, anything
/// else is matched by the backend as a unique id.
pub fn camera_index(device_id: Option<&str>) -> CameraIndex {
    match device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    }
}

fn requested_format() -> RequestedFormat<'static> {
    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution)
}

/// Open `device_id` briefly and report its native resolution. Blocking.
pub fn probe_resolution(device_id: Option<&str>) -> CaptureResult<(u32, u32)> {
    let index = camera_index(device_id);
    let camera = Camera::new(index.clone(), requested_format())
        .map_err(|e| CaptureError::DeviceNotFound(format!("camera {}: {}", index, e)))?;
    let resolution = camera.camera_format().resolution();
    tracing::debug!(
        "Camera {} resolves to {}x{}",
        index,
        resolution.width(),
        resolution.height()
    );
    Ok((resolution.width(), resolution.height()))
}

/// Camera authorisation, prompting the user when it is undetermined
#[cfg(target_os = "macos")]
pub async fn request_permission() -> bool {
    if nokhwa::nokhwa_check() {
        return true;
    }

    let (tx, rx) = oneshot::channel();
    let tx = parking_lot::Mutex::new(Some(tx));
    nokhwa::nokhwa_initialize(move |granted| {
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(granted);
        }
    });
    let granted = rx.await.unwrap_or(false);
    tracing::info!("Camera permission granted: {}", granted);
    granted
}

#[cfg(not(target_os = "macos"))]
pub async fn request_permission() -> bool {
    true
}

/// nokhwa-backed capture source.
///
/// Emits `SampleKind::Video` when the camera is the recording target, or
/// `SampleKind::CameraOverlay` when it feeds the compositor.
pub struct CameraSource {
    id: String,
    device_id: Option<String>,
    kind: SampleKind,
    frame_rate: u32,
    running: Arc<AtomicBool>,
    stopped: bool,
    thread: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(device_id: Option<String>, kind: SampleKind, frame_rate: u32) -> Self {
        let id = match kind {
            SampleKind::CameraOverlay => "camera-overlay",
            _ => "camera",
        };
        Self {
            id: id.to_string(),
            device_id,
            kind,
            frame_rate: frame_rate.max(1),
            running: Arc::new(AtomicBool::new(false)),
            stopped: false,
            thread: None,
        }
    }
}

#[async_trait]
impl CaptureSource for CameraSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kinds(&self) -> Vec<SampleKind> {
        vec![self.kind]
    }

    async fn start(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::AlreadyStopped);
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let (started_tx, started_rx) = oneshot::channel();
        let worker = CameraWorker {
            id: self.id.clone(),
            index: camera_index(self.device_id.as_deref()),
            kind: self.kind,
            frame_rate: self.frame_rate,
            running: self.running.clone(),
        };
        self.running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name(format!("{}-capture", self.id))
            .spawn(move || worker.run(sink, started_tx))
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        self.thread = Some(handle);

        match started_rx.await {
            Ok(Ok(())) => {
                tracing::info!("Camera source {} started", self.id);
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
                Err(CaptureError::Backend("camera thread exited before starting".to_string()))
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
        tracing::info!("Camera source {} stopped", self.id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl CameraSource {
    async fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::error!("Camera thread for {} panicked", self.id);
            }
        }
    }
}

struct CameraWorker {
    id: String,
    index: CameraIndex,
    kind: SampleKind,
    frame_rate: u32,
    running: Arc<AtomicBool>,
}

impl CameraWorker {
    fn run(self, sink: SampleSink, started: oneshot::Sender<CaptureResult<()>>) {
        let mut camera = match Camera::new(self.index.clone(), requested_format()) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = started.send(Err(CaptureError::DeviceNotFound(format!("camera {}: {}", self.index, e))));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = started.send(Err(CaptureError::Backend(format!("failed to open camera stream: {}", e))));
            return;
        }

        let format = camera.camera_format();
        let fps = if format.frame_rate() > 0 {
            format.frame_rate()
        } else {
            self.frame_rate
        };
        let duration = MediaTime::from_rational(1, fps as i32);
        tracing::info!(
            "Camera {} opened: {}x{} @ {}fps ({:?})",
            self.index,
            format.resolution().width(),
            format.resolution().height(),
            fps,
            format.format()
        );
        let _ = started.send(Ok(()));

        let mut errors = 0u32;
        let mut delivered = 0u64;
        while self.running.load(Ordering::SeqCst) {
            let decoded = camera.frame().and_then(|buffer| buffer.decode_image::<RgbAFormat>());
            match decoded {
                Ok(image) => {
                    errors = 0;
                    let (width, height) = (image.width(), image.height());
                    let frame = VideoFrame::from_rgba(width, height, image.into_raw());
                    sink.send(Sample::video(self.kind, frame, MediaTime::host_now(), duration));
                    delivered += 1;
                }
                Err(e) => {
                    errors += 1;
                    tracing::debug!("Camera frame error: {}", e);
                    if errors >= MAX_FRAME_ERRORS {
                        sink.fail(&self.id, format!("camera stopped delivering frames: {}", e));
                        break;
                    }
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {}", e);
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Camera {} delivered {} frames", self.index, delivered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_index_from_device_id() {
        assert!(matches!(camera_index(None), CameraIndex::Index(0)));
        assert!(matches!(camera_index(Some("2")), CameraIndex::Index(2)));
        assert!(matches!(camera_index(Some("0x1420000005ac8600")), CameraIndex::String(s) if s == "0x1420000005ac8600"));
    }

    #[test]
    fn test_overlay_source_identity() {
        let source = CameraSource::new(None, SampleKind::CameraOverlay, 30);
        assert_eq!(source.id(), "camera-overlay");
        assert_eq!(source.kinds(), vec![SampleKind::CameraOverlay]);
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_single_use() {
        let mut source = CameraSource::new(None, SampleKind::Video, 30);
        assert!(matches!(source.stop().await, Err(CaptureError::NotRunning)));
        assert!(matches!(source.stop().await, Err(CaptureError::AlreadyStopped)));
    }
}
