//! Live preview surfaces
//!
//! Enabling a video source routes its track into the matching surface. The
//! compositor draws from these surfaces, so what is previewed is exactly
//! what gets recorded.

use super::track::{MediaSource, MediaTrack, VideoFrame};
use super::traits::{CaptureError, CaptureKind, CaptureResult, SourceObserver};
use parking_lot::RwLock;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

/// Holds the track currently shown for one video source
pub struct PreviewSurface {
    name: &'static str,
    track: RwLock<Option<MediaTrack>>,
}

impl PreviewSurface {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            track: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn attach(&self, track: MediaTrack) {
        tracing::debug!("Preview '{}' showing track {}", self.name, track.id());
        *self.track.write() = Some(track);
    }

    pub fn detach(&self) {
        if self.track.write().take().is_some() {
            tracing::debug!("Preview '{}' cleared", self.name);
        }
    }

    /// The routed track, if it is still live
    pub fn track(&self) -> Option<MediaTrack> {
        self.track.read().as_ref().filter(|t| t.is_live()).cloned()
    }

    pub fn is_showing(&self) -> bool {
        self.track().is_some()
    }

    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.track().and_then(|t| t.latest_frame())
    }

    /// Write the frame currently on screen as a PNG
    pub fn snapshot_png(&self, path: &Path) -> CaptureResult<()> {
        let frame = self
            .current_frame()
            .ok_or_else(|| CaptureError::Unavailable(format!("no {} frame to snapshot", self.name)))?;
        write_png(&frame, path)?;
        tracing::info!("Saved {} preview snapshot to {:?}", self.name, path);
        Ok(())
    }
}

/// Encode an RGBA frame to a PNG file
pub fn write_png(frame: &VideoFrame, path: &Path) -> CaptureResult<()> {
    if frame.data.len() != frame.expected_len() {
        return Err(CaptureError::Platform(format!(
            "frame size mismatch: got {}, expected {} ({}x{}x4)",
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        )));
    }

    let file = std::fs::File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| CaptureError::Platform(format!("PNG header error: {}", e)))?;
    writer
        .write_image_data(&frame.data)
        .map_err(|e| CaptureError::Platform(format!("PNG encode error: {}", e)))?;
    writer
        .finish()
        .map_err(|e| CaptureError::Platform(format!("PNG finish error: {}", e)))?;
    Ok(())
}

/// The camera and screen preview surfaces
pub struct Previews {
    pub camera: PreviewSurface,
    pub screen: PreviewSurface,
}

impl Previews {
    pub fn new() -> Self {
        Self {
            camera: PreviewSurface::new("camera"),
            screen: PreviewSurface::new("screen"),
        }
    }

    pub fn for_kind(&self, kind: CaptureKind) -> Option<&PreviewSurface> {
        match kind {
            CaptureKind::Camera => Some(&self.camera),
            CaptureKind::Screen => Some(&self.screen),
            CaptureKind::Microphone => None,
        }
    }
}

impl Default for Previews {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceObserver for Previews {
    fn source_started(&self, kind: CaptureKind, source: &MediaSource) {
        if let (Some(surface), Some(track)) = (self.for_kind(kind), source.video_track()) {
            surface.attach(track.clone());
        }
    }

    fn source_stopped(&self, kind: CaptureKind) {
        if let Some(surface) = self.for_kind(kind) {
            surface.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_observer_routes_video_tracks() {
        let previews = Previews::new();
        let track = MediaTrack::video("camera");
        track.push_frame(VideoFrame::solid(4, 4, [10, 20, 30, 255]));

        previews.source_started(CaptureKind::Camera, &MediaSource::new(vec![track.clone()]));
        assert!(previews.camera.is_showing());
        assert!(!previews.screen.is_showing());
        assert_eq!(previews.camera.current_frame().unwrap().pixel(0, 0), Some([10, 20, 30, 255]));

        previews.source_stopped(CaptureKind::Camera);
        assert!(!previews.camera.is_showing());
    }

    #[test]
    fn test_ended_track_is_not_shown() {
        let surface = PreviewSurface::new("screen");
        let track = MediaTrack::video("screen");
        surface.attach(track.clone());
        track.stop();
        assert!(surface.track().is_none());
    }

    #[test]
    fn test_snapshot_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");

        let surface = PreviewSurface::new("screen");
        assert!(matches!(surface.snapshot_png(&path), Err(CaptureError::Unavailable(_))));

        let track = MediaTrack::video("screen");
        track.push_frame(VideoFrame::solid(8, 6, [255, 0, 0, 255]));
        surface.attach(track);
        surface.snapshot_png(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
