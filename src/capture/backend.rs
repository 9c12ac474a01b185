//! Capture backends
//!
//! A backend owns everything platform specific about starting a session:
//! permission checks, resolving a `CaptureTarget` against the live system and
//! building the capture sources a session needs.

use super::camera::{self, CameraSource};
use super::microphone::MicrophoneSource;
use super::target::{CaptureTarget, ResolvedTarget, StreamType};
use super::traits::{CaptureError, CaptureResult, CaptureSource, PermissionKind};
use crate::media::SampleKind;
use crate::recorder::config::StreamConfiguration;
use async_trait::async_trait;

/// Everything a backend needs to open the sources of one session
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub resolved: ResolvedTarget,
    pub config: StreamConfiguration,
    pub system_audio: bool,
    pub microphone: bool,
    pub microphone_device: Option<String>,
    pub camera_overlay: bool,
    pub camera_device: Option<String>,
}

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Whether screen recording is currently allowed
    fn screen_permission(&self) -> bool;

    /// Ask the OS for screen recording access. May show a system prompt.
    fn request_screen_permission(&self) -> bool;

    /// Camera authorisation, prompting the user if undetermined
    async fn camera_permission(&self) -> bool;

    /// Open the system settings pane for `kind`
    fn open_permission_settings(&self, kind: PermissionKind);

    /// Resolve `target` against the live system
    async fn resolve(&self, target: &CaptureTarget) -> CaptureResult<ResolvedTarget>;

    /// Build the (not yet started) sources for a session
    fn open_sources(&self, plan: &CapturePlan) -> CaptureResult<Vec<Box<dyn CaptureSource>>>;
}

/// Backend talking to the real OS capture APIs
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureBackend for NativeBackend {
    fn screen_permission(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            super::macos::permissions::has_screen_recording_permission()
        }
        #[cfg(not(target_os = "macos"))]
        {
            true
        }
    }

    fn request_screen_permission(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            super::macos::permissions::request_screen_recording_permission()
        }
        #[cfg(not(target_os = "macos"))]
        {
            true
        }
    }

    async fn camera_permission(&self) -> bool {
        camera::request_permission().await
    }

    fn open_permission_settings(&self, kind: PermissionKind) {
        #[cfg(target_os = "macos")]
        super::macos::permissions::open_privacy_settings(kind);
        #[cfg(not(target_os = "macos"))]
        tracing::info!("No settings pane for {} permission on this platform", kind);
    }

    async fn resolve(&self, target: &CaptureTarget) -> CaptureResult<ResolvedTarget> {
        let stream_type = target
            .stream_type()
            .ok_or_else(|| CaptureError::UnresolvedTarget(format!("{:?} selects nothing", target)))?;

        match target {
            CaptureTarget::Camera { device_id } => resolve_camera(target, stream_type, device_id.clone()).await,
            CaptureTarget::ExternalDevice { device_id } => {
                resolve_camera(target, stream_type, Some(device_id.clone())).await
            }
            _ => resolve_screen(target, stream_type).await,
        }
    }

    fn open_sources(&self, plan: &CapturePlan) -> CaptureResult<Vec<Box<dyn CaptureSource>>> {
        let mut sources: Vec<Box<dyn CaptureSource>> = Vec::new();
        let frame_rate = plan.config.frame_rate;

        match &plan.resolved.target {
            CaptureTarget::Camera { device_id } => {
                sources.push(Box::new(CameraSource::new(device_id.clone(), SampleKind::Video, frame_rate)));
            }
            CaptureTarget::ExternalDevice { device_id } => {
                sources.push(Box::new(CameraSource::new(
                    Some(device_id.clone()),
                    SampleKind::Video,
                    frame_rate,
                )));
            }
            _ => sources.push(open_screen(plan)?),
        }

        if plan.camera_overlay {
            sources.push(Box::new(CameraSource::new(
                plan.camera_device.clone(),
                SampleKind::CameraOverlay,
                frame_rate,
            )));
        }

        if plan.microphone {
            sources.push(Box::new(MicrophoneSource::new(
                plan.microphone_device.clone(),
                plan.config.audio_sample_rate,
                plan.config.audio_channels,
            )));
        }

        Ok(sources)
    }
}

async fn resolve_camera(
    target: &CaptureTarget,
    stream_type: StreamType,
    device_id: Option<String>,
) -> CaptureResult<ResolvedTarget> {
    let (width, height) = tokio::task::spawn_blocking(move || camera::probe_resolution(device_id.as_deref()))
        .await
        .map_err(|e| CaptureError::Backend(e.to_string()))??;

    Ok(ResolvedTarget {
        target: target.clone(),
        stream_type,
        width,
        height,
        display_id: None,
    })
}

#[cfg(target_os = "macos")]
async fn resolve_screen(target: &CaptureTarget, stream_type: StreamType) -> CaptureResult<ResolvedTarget> {
    let target = target.clone();
    tokio::task::spawn_blocking(move || super::macos::screen::resolve(&target, stream_type))
        .await
        .map_err(|e| CaptureError::Backend(e.to_string()))?
}

#[cfg(not(target_os = "macos"))]
async fn resolve_screen(_target: &CaptureTarget, stream_type: StreamType) -> CaptureResult<ResolvedTarget> {
    Err(CaptureError::Unsupported(format!("{} capture requires macOS", stream_type)))
}

#[cfg(target_os = "macos")]
fn open_screen(plan: &CapturePlan) -> CaptureResult<Box<dyn CaptureSource>> {
    Ok(Box::new(super::macos::screen::ScreenSource::new(plan)))
}

#[cfg(not(target_os = "macos"))]
fn open_screen(plan: &CapturePlan) -> CaptureResult<Box<dyn CaptureSource>> {
    Err(CaptureError::Unsupported(format!(
        "{} capture requires macOS",
        plan.resolved.stream_type
    )))
}
