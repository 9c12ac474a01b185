//! Open ScreenRec - screen, window, audio and camera recording for macOS.
//!
//! Capture sources feed timestamped samples through a timing corrector and
//! router into per-track encoders; finalization produces a single media file
//! (or a dual-track audio package) in the configured output directory.

pub mod capture;
pub mod media;
pub mod postprocess;
pub mod project;
pub mod recorder;
pub mod utils;
pub mod writer;

pub use capture::{CaptureTarget, StreamType};
pub use recorder::{Recorder, RecorderSettings, RecordingEvent, RecordingOutcome, SessionState};
pub use utils::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_screenrec_lib=debug,open_screenrec=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
