//! Post-capture processing run during finalization
//!
//! Both steps leave the finalized recording untouched unless they succeed.

pub mod remux;
pub mod transcode;

pub use remux::{remux_audio_tracks, RemuxError};
pub use transcode::{transcode_to_mp3, TranscodeError};
