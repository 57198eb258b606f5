//! Capture trait definitions
//!
//! Platform-agnostic types and traits for capture sources.

use super::track::MediaSource;
use crate::config::CaptureConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while acquiring a capture source
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// The three independently toggled capture sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Camera,
    Screen,
    Microphone,
}

impl CaptureKind {
    pub const ALL: [CaptureKind; 3] = [CaptureKind::Camera, CaptureKind::Screen, CaptureKind::Microphone];

    /// Kind of track this source yields
    pub fn track_kind(self) -> TrackKind {
        match self {
            CaptureKind::Camera | CaptureKind::Screen => TrackKind::Video,
            CaptureKind::Microphone => TrackKind::Audio,
        }
    }
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureKind::Camera => write!(f, "camera"),
            CaptureKind::Screen => write!(f, "screen"),
            CaptureKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// Media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Requested video shape; `None` leaves the choice to the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

/// Requested audio format; `None` takes the device default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Acquisition request for one capture source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl MediaConstraints {
    /// Build the request issued when a kind is toggled on
    ///
    /// Camera asks for a fixed width, screen for a frame rate and an ideal
    /// resolution, microphone for the device defaults. All are single-media.
    pub fn for_kind(kind: CaptureKind, config: &CaptureConfig) -> Self {
        match kind {
            CaptureKind::Camera => Self {
                video: Some(VideoConstraints {
                    width: Some(config.camera_width),
                    ..Default::default()
                }),
                audio: None,
            },
            CaptureKind::Screen => Self {
                video: Some(VideoConstraints {
                    width: Some(config.screen_width),
                    height: Some(config.screen_height),
                    frame_rate: Some(config.screen_frame_rate),
                }),
                audio: None,
            },
            CaptureKind::Microphone => Self {
                video: None,
                audio: Some(AudioConstraints::default()),
            },
        }
    }
}

/// Something that can grant live media sources
///
/// Implementations resolve to a source holding zero or more live tracks, or
/// fail when the user declines, no device exists, or the picker is closed.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, kind: CaptureKind, constraints: &MediaConstraints) -> CaptureResult<MediaSource>;
}

/// Notified by the source registry whenever a kind becomes active or inactive
///
/// Calls happen outside the registry's lock and must not block.
pub trait SourceObserver: Send + Sync {
    fn source_started(&self, kind: CaptureKind, source: &MediaSource);

    fn source_stopped(&self, kind: CaptureKind);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_per_kind() {
        let config = CaptureConfig::default();

        let camera = MediaConstraints::for_kind(CaptureKind::Camera, &config);
        assert_eq!(camera.video.as_ref().and_then(|v| v.width), Some(720));
        assert!(camera.audio.is_none());

        let screen = MediaConstraints::for_kind(CaptureKind::Screen, &config);
        let video = screen.video.unwrap();
        assert_eq!(video.frame_rate, Some(60));
        assert_eq!((video.width, video.height), (Some(1920), Some(1080)));

        let mic = MediaConstraints::for_kind(CaptureKind::Microphone, &config);
        assert!(mic.video.is_none());
        assert_eq!(mic.audio, Some(AudioConstraints::default()));
    }

    #[test]
    fn test_track_kind() {
        assert_eq!(CaptureKind::Camera.track_kind(), TrackKind::Video);
        assert_eq!(CaptureKind::Screen.track_kind(), TrackKind::Video);
        assert_eq!(CaptureKind::Microphone.track_kind(), TrackKind::Audio);
    }
}
