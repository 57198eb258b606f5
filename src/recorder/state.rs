//! Recording state
//!
//! Status, events and errors shared by the session and the controller.

use crate::encoder::EncoderError;
use crate::sink::SinkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Where the one recording slot is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    /// No recording in progress
    #[default]
    Idle,
    /// Encoder running, chunks flowing to the sink
    Recording,
    /// Encoder asked to stop; waiting for the last chunk and the close
    Finalizing,
}

impl RecordingStatus {
    /// Whether a session occupies the slot
    pub fn is_busy(self) -> bool {
        self != RecordingStatus::Idle
    }
}

/// Outcome of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub id: Uuid,
    pub destination: String,
    pub bytes_written: u64,
    pub chunks_written: u64,
    pub empty_chunks_skipped: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
}

/// Events emitted during a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum RecordingEvent {
    Started { id: Uuid, destination: String },
    Finalizing { id: Uuid },
    Stopped(RecordingSummary),
    Failed { id: Uuid, message: String },
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Destination unavailable: {0}")]
    Destination(#[source] SinkError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Recording aborted: {0}")]
    Aborted(String),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_idle() {
        assert_eq!(RecordingStatus::default(), RecordingStatus::Idle);
        assert!(!RecordingStatus::Idle.is_busy());
        assert!(RecordingStatus::Finalizing.is_busy());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RecordingStatus::Finalizing).unwrap();
        assert_eq!(json, "\"finalizing\"");
    }
}
