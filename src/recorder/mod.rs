//! Recording system module
//!
//! - `SampleRouter` admits, retimes and dispatches samples to the writers
//! - `RecordingCoordinator` drives the session state machine
//! - `Recorder` is the cloneable handle applications hold

pub mod compositor;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod lanes;
pub mod router;
pub mod state;
pub mod timing;

pub use config::{RecorderSettings, StreamConfiguration};
pub use coordinator::{Recorder, RecordingCoordinator, RecordingEvent, RecordingOutcome};
pub use router::{DropReason, RouteOutcome, RouterCounts, SampleRouter};
pub use state::{CaptureSegment, RecordingSession, SessionState};
