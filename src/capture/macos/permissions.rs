//! macOS permission handling
//!
//! Screen recording access goes through CoreGraphics; the camera prompt is
//! handled by nokhwa (see `capture::camera`).

use crate::capture::PermissionKind;
use core_graphics::access::ScreenCaptureAccess;

/// Check if screen recording permission is granted
pub fn has_screen_recording_permission() -> bool {
    ScreenCaptureAccess::preflight()
}

/// Request screen recording permission.
///
/// Shows the system prompt the first time; returns the state afterwards.
pub fn request_screen_recording_permission() -> bool {
    let granted = ScreenCaptureAccess::request();
    tracing::info!("Screen recording permission granted: {}", granted);
    granted
}

fn settings_url(kind: PermissionKind) -> &'static str {
    match kind {
        PermissionKind::Screen => "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture",
        PermissionKind::Camera => "x-apple.systempreferences:com.apple.preference.security?Privacy_Camera",
        PermissionKind::Microphone => "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone",
    }
}

/// Open System Settings at the privacy pane for `kind`
pub fn open_privacy_settings(kind: PermissionKind) {
    match std::process::Command::new("open").arg(settings_url(kind)).output() {
        Ok(output) if output.status.success() => {}
        Ok(_) => tracing::warn!("Failed to open {} preferences", kind),
        Err(e) => tracing::warn!("Failed to run open for {} preferences: {}", kind, e),
    }
}
