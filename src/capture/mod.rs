//! Capture source adapters
//!
//! Every native capture mechanism is wrapped in a `CaptureSource` that
//! pushes timestamped samples into a `SampleSink`. A `CaptureBackend`
//! resolves targets, checks permissions and builds the sources for a session.

pub mod backend;
pub mod camera;
pub mod microphone;
pub mod synthetic;
pub mod target;
pub mod traits;

#[cfg(target_os = "macos")]
pub mod macos;

pub use backend::{CaptureBackend, CapturePlan, NativeBackend};
pub use synthetic::{SyntheticBackend, SyntheticFeed};
pub use target::{CaptureRect, CaptureTarget, ResolvedTarget, StreamType};
pub use traits::{CaptureError, CaptureResult, CaptureSource, PermissionKind, SampleSink, StreamFault};
