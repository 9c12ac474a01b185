//! Shared utilities

pub mod error;
pub mod power;

pub use error::{ConfigError, ErrorResponse, RecorderError, RecorderResult};
pub use power::SleepGuard;
