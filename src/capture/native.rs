//! Native media devices
//!
//! Routes each capture kind to the backend chosen in configuration. Native
//! camera and microphone support is compiled in with the `webcam` and
//! `microphone` features; without them those kinds report `NotSupported`.

use super::screen::FfmpegScreenCapture;
use super::synthetic::SyntheticDevices;
use super::track::MediaSource;
use super::traits::{CaptureError, CaptureKind, CaptureResult, MediaConstraints, MediaDevices};
use crate::config::{CaptureBackend, CaptureConfig};
use async_trait::async_trait;

pub struct NativeDevices {
    config: CaptureConfig,
    screen: FfmpegScreenCapture,
    synthetic: SyntheticDevices,
}

impl NativeDevices {
    pub fn new(config: CaptureConfig) -> Self {
        let screen = FfmpegScreenCapture::new(config.ffmpeg_path.clone(), config.screen_device.clone());
        Self {
            config,
            screen,
            synthetic: SyntheticDevices::new(),
        }
    }

    fn backend(&self, kind: CaptureKind) -> CaptureBackend {
        match kind {
            CaptureKind::Camera => self.config.camera_backend,
            CaptureKind::Screen => self.config.screen_backend,
            CaptureKind::Microphone => self.config.microphone_backend,
        }
    }

    #[cfg(feature = "webcam")]
    async fn open_camera(&self, constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        super::webcam::open(&constraints.video.clone().unwrap_or_default()).await
    }

    #[cfg(not(feature = "webcam"))]
    async fn open_camera(&self, _constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        Err(CaptureError::NotSupported(
            "camera capture requires the `webcam` feature".to_string(),
        ))
    }

    #[cfg(feature = "microphone")]
    async fn open_microphone(&self, constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        super::audio::open(&constraints.audio.clone().unwrap_or_default()).await
    }

    #[cfg(not(feature = "microphone"))]
    async fn open_microphone(&self, _constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        Err(CaptureError::NotSupported(
            "microphone capture requires the `microphone` feature".to_string(),
        ))
    }
}

#[async_trait]
impl MediaDevices for NativeDevices {
    async fn acquire(&self, kind: CaptureKind, constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        if self.backend(kind) == CaptureBackend::Synthetic {
            return self.synthetic.acquire(kind, constraints).await;
        }

        match kind {
            CaptureKind::Camera => self.open_camera(constraints).await,
            CaptureKind::Screen => {
                let video = constraints.video.clone().unwrap_or_default();
                self.screen.open(&video).await
            }
            CaptureKind::Microphone => self.open_microphone(constraints).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_backend_is_routed() {
        let config = CaptureConfig {
            screen_backend: CaptureBackend::Synthetic,
            ..Default::default()
        };
        let devices = NativeDevices::new(config.clone());
        let constraints = MediaConstraints::for_kind(CaptureKind::Screen, &config);

        let source = devices.acquire(CaptureKind::Screen, &constraints).await.unwrap();
        let frame = source.video_track().unwrap().latest_frame().unwrap();
        assert_eq!((frame.width, frame.height), (1920, 1080));
        source.stop();
    }

    #[cfg(not(feature = "webcam"))]
    #[tokio::test]
    async fn test_camera_without_feature_is_not_supported() {
        let devices = NativeDevices::new(CaptureConfig::default());
        let constraints = MediaConstraints::for_kind(CaptureKind::Camera, &CaptureConfig::default());
        let result = devices.acquire(CaptureKind::Camera, &constraints).await;
        assert!(matches!(result, Err(CaptureError::NotSupported(_))));
    }
}
