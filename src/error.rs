//! Error types and handling
//!
//! Stable error kinds shared by the capture, session and post-processing layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which detector channel a result or failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorChannel {
    Hand,
    Pose,
}

impl fmt::Display for DetectorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorChannel::Hand => f.write_str("hand"),
            DetectorChannel::Pose => f.write_str("pose"),
        }
    }
}

/// Closed set of capture device failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    #[error("video encoding failed")]
    EncodingFailure,

    #[error("storage exhausted")]
    StorageExhausted,

    #[error("invalid capture configuration")]
    InvalidConfiguration,

    #[error("no data was produced")]
    NoData,

    #[error("internal encoder fault")]
    EncoderFault,

    #[error("capture source became inactive")]
    SourceInactive,
}

impl CaptureErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureErrorKind::EncodingFailure => "ENCODING_FAILURE",
            CaptureErrorKind::StorageExhausted => "STORAGE_EXHAUSTED",
            CaptureErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
            CaptureErrorKind::NoData => "NO_DATA",
            CaptureErrorKind::EncoderFault => "ENCODER_FAULT",
            CaptureErrorKind::SourceInactive => "SOURCE_INACTIVE",
        }
    }
}

/// Session-level failures surfaced on `ProcessingCompleted`
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{channel} detector unavailable: {detail}")]
    DetectorInit {
        channel: DetectorChannel,
        detail: String,
    },

    #[error("capture failed: {0}")]
    Capture(CaptureErrorKind),

    #[error("no landmarks were recorded for this session")]
    BufferEmpty,

    #[error("failed to write artifact: {0}")]
    Serialization(#[from] std::io::Error),

    #[error("failed to decode recorded video: {0}")]
    Decode(String),

    #[error("post-processing task failed: {0}")]
    Task(String),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::DetectorInit { .. } => "DETECTOR_INIT_ERROR",
            SessionError::Capture(kind) => kind.code(),
            SessionError::BufferEmpty => "BUFFER_EMPTY",
            SessionError::Serialization(_) => "SERIALIZATION_ERROR",
            SessionError::Decode(_) => "DECODE_ERROR",
            SessionError::Task(_) => "TASK_ERROR",
        }
    }
}

/// Error shape handed to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&SessionError> for ErrorReport {
    fn from(error: &SessionError) -> Self {
        ErrorReport {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<SessionError> for ErrorReport {
    fn from(error: SessionError) -> Self {
        ErrorReport::from(&error)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_report_uses_stable_code() {
        let report = ErrorReport::from(SessionError::Capture(CaptureErrorKind::StorageExhausted));
        assert_eq!(report.code, "STORAGE_EXHAUSTED");
        assert_eq!(report.message, "capture failed: storage exhausted");
    }

    #[test]
    fn test_io_error_maps_to_serialization() {
        let err: SessionError = std::io::Error::other("disk gone").into();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
