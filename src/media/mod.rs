//! Media primitives shared by capture, routing and encoding
//!
//! - `MediaTime` nanosecond timestamps on a common host clock
//! - `Sample` video/audio buffers with their timing
//! - `FrameSlot` latest-frame holder used for camera compositing
//! - PNG still output

pub mod sample;
pub mod slot;
pub mod still;
pub mod time;

pub use sample::{AudioChunk, Payload, Sample, SampleKind, SampleTiming, VideoFrame};
pub use slot::FrameSlot;
pub use time::MediaTime;
