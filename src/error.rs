//! Error types and handling
//!
//! Common error types used across the recording pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device error: {0}")]
    Device(String),

    #[error("encoder not found: {0}")]
    EncoderNotFound(String),

    #[error("encoder launch failed: {0}")]
    SpawnFailed(String),

    #[error("codec '{0}' is not supported by the installed encoder")]
    CodecUnsupported(String),

    #[error("output directory error: {0}")]
    Path(String),

    #[error("recording invalid: {0}")]
    Integrity(String),

    #[error("session error: {0}")]
    Session(String),
}

/// Error response for a UI or IPC layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Device(_) => "DEVICE_ERROR",
            RecorderError::EncoderNotFound(_) => "ENCODER_NOT_FOUND",
            RecorderError::SpawnFailed(_) => "SPAWN_FAILED",
            RecorderError::CodecUnsupported(_) => "CODEC_UNSUPPORTED",
            RecorderError::Path(_) => "PATH_ERROR",
            RecorderError::Integrity(_) => "INTEGRITY_ERROR",
            RecorderError::Session(_) => "SESSION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response: ErrorResponse = RecorderError::Device("no input".into()).into();
        assert_eq!(response.code, "DEVICE_ERROR");
        assert!(response.message.contains("no input"));

        let response: ErrorResponse = RecorderError::EncoderNotFound("ffmpeg".into()).into();
        assert_eq!(response.code, "ENCODER_NOT_FOUND");
    }
}
