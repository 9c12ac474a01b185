//! Error types and handling
//!
//! `RecorderError` is the only error type returned by the recorder's public
//! API. Capture, writer and post-processing errors are converted into it at
//! the coordinator boundary.

use crate::capture::{CaptureError, PermissionKind};
use crate::postprocess::{RemuxError, TranscodeError};
use crate::writer::WriterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems detected before any capture starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Output directory is not usable: {0}")]
    InvalidOutputPath(String),

    #[error("Capture target could not be resolved: {0}")]
    UnresolvedTarget(String),

    #[error("Unsupported format combination: {0}")]
    UnsupportedFormatCombination(String),
}

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0} permission not granted")]
    Permission(PermissionKind),

    #[error("Encoder capability error: {0}")]
    Capability(String),

    #[error("Capture stream error: {0}")]
    Stream(String),

    #[error("Finalization error: {0}")]
    Finalization(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CaptureError> for RecorderError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(kind) => RecorderError::Permission(kind),
            CaptureError::UnresolvedTarget(msg) | CaptureError::DeviceNotFound(msg) => {
                RecorderError::Config(ConfigError::UnresolvedTarget(msg))
            }
            CaptureError::Unsupported(msg) => {
                RecorderError::Config(ConfigError::UnresolvedTarget(msg))
            }
            other => RecorderError::Stream(other.to_string()),
        }
    }
}

impl From<WriterError> for RecorderError {
    fn from(error: WriterError) -> Self {
        match error {
            WriterError::Io(e) => RecorderError::Io(e),
            other => RecorderError::Finalization(other.to_string()),
        }
    }
}

impl From<RemuxError> for RecorderError {
    fn from(error: RemuxError) -> Self {
        RecorderError::Finalization(error.to_string())
    }
}

impl From<TranscodeError> for RecorderError {
    fn from(error: TranscodeError) -> Self {
        RecorderError::Finalization(error.to_string())
    }
}

/// Error response for the notification layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        let code = match error {
            RecorderError::Config(ConfigError::InvalidOutputPath(_)) => "INVALID_OUTPUT_PATH",
            RecorderError::Config(ConfigError::UnresolvedTarget(_)) => "UNRESOLVED_TARGET",
            RecorderError::Config(ConfigError::UnsupportedFormatCombination(_)) => {
                "UNSUPPORTED_FORMAT"
            }
            RecorderError::Permission(_) => "PERMISSION_DENIED",
            RecorderError::Capability(_) => "CAPABILITY_ERROR",
            RecorderError::Stream(_) => "STREAM_ERROR",
            RecorderError::Finalization(_) => "FINALIZATION_ERROR",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::Io(_) => "IO_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_errors_map_to_taxonomy() {
        let err: RecorderError = CaptureError::PermissionDenied(PermissionKind::Screen).into();
        assert!(matches!(err, RecorderError::Permission(PermissionKind::Screen)));

        let err: RecorderError = CaptureError::UnresolvedTarget("window 42".into()).into();
        assert!(matches!(
            err,
            RecorderError::Config(ConfigError::UnresolvedTarget(_))
        ));

        let err: RecorderError = CaptureError::Backend("stream died".into()).into();
        assert!(matches!(err, RecorderError::Stream(_)));
    }

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(RecorderError::Config(
            ConfigError::InvalidOutputPath("/nope".into()),
        ));
        assert_eq!(response.code, "INVALID_OUTPUT_PATH");
        assert!(response.message.contains("/nope"));

        let response = ErrorResponse::from(RecorderError::Permission(PermissionKind::Camera));
        assert_eq!(response.code, "PERMISSION_DENIED");
        assert_eq!(response.message, "Camera permission not granted");
    }
}
