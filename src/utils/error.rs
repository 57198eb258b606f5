//! Error types and handling
//!
//! Application-wide error type and the code/message pair reported at the
//! command boundary.

use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::encoder::EncoderError;
use crate::recorder::RecordingError;
use crate::sink::SinkError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Error response for the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

fn sink_code(error: &SinkError) -> &'static str {
    match error {
        SinkError::Cancelled => "DESTINATION_CANCELLED",
        SinkError::InvalidDestination(_) => "INVALID_DESTINATION",
        SinkError::Closed | SinkError::Io(_) => "SINK_ERROR",
    }
}

impl AppError {
    /// Stable upper-snake code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(e) => match e {
                CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
                CaptureError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
                CaptureError::NotSupported(_) => "NOT_SUPPORTED",
                CaptureError::Unavailable(_) => "SOURCE_UNAVAILABLE",
                CaptureError::Platform(_) | CaptureError::Io(_) => "PLATFORM_ERROR",
            },
            AppError::Encoder(_) => "ENCODER_ERROR",
            AppError::Sink(e) => sink_code(e),
            AppError::Recording(e) => match e {
                RecordingError::Destination(e) => sink_code(e),
                RecordingError::Encoder(_) => "ENCODER_ERROR",
                RecordingError::Aborted(_) => "RECORDING_ERROR",
            },
            AppError::Task(_) => "TASK_ERROR",
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
