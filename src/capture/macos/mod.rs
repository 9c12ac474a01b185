//! macOS capture implementations
//!
//! ScreenCaptureKit for screens, windows, applications and system audio.

pub mod permissions;
pub mod screen;
