//! Live media tracks
//!
//! A `MediaTrack` is a cheap-clone handle shared between the producer (a
//! device thread, an FFmpeg grab, the compositor, the mixer) and any number
//! of consumers. Video tracks hold the latest frame; audio tracks fan out
//! sample blocks. Stopping a track is synchronous and visible to every
//! holder at once.

use super::traits::TrackKind;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Audio blocks buffered per consumer before it starts lagging
const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// One RGBA8 video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows
    pub data: Vec<u8>,
    /// Milliseconds since the producer started
    pub timestamp_ms: f64,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_ms: f64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp_ms,
        }
    }

    /// A frame filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(width as usize * height as usize);
        Self::new(width, height, data, 0.0)
    }

    /// Expected byte length for the declared dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// RGBA value at (x, y), or `None` outside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// A block of interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}

enum Media {
    Video(watch::Sender<Option<Arc<VideoFrame>>>),
    Audio(broadcast::Sender<Arc<AudioBuffer>>),
}

struct TrackInner {
    id: Uuid,
    kind: TrackKind,
    label: String,
    ended: watch::Sender<bool>,
    media: Media,
}

/// Shared handle to a live (or ended) media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a live video track with no frame yet
    pub fn video(label: impl Into<String>) -> Self {
        let (frames, _) = watch::channel(None);
        Self::with_media(TrackKind::Video, label.into(), Media::Video(frames))
    }

    /// Create a live audio track
    pub fn audio(label: impl Into<String>) -> Self {
        let (blocks, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        Self::with_media(TrackKind::Audio, label.into(), Media::Audio(blocks))
    }

    fn with_media(kind: TrackKind, label: String, media: Media) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                kind,
                label,
                ended,
                media,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_live(&self) -> bool {
        !*self.inner.ended.borrow()
    }

    /// End the track for every holder. Idempotent.
    pub fn stop(&self) {
        let stopped_now = self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        });
        if stopped_now {
            if let Media::Video(frames) = &self.inner.media {
                frames.send_replace(None);
            }
            tracing::debug!("Track stopped: {} ({})", self.inner.label, self.inner.id);
        }
    }

    /// Resolve once the track has ended, whoever ended it
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Publish a frame. Returns `false` once the track has ended, which tells
    /// the producer to stop.
    pub fn push_frame(&self, frame: VideoFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.inner.media {
            Media::Video(frames) => {
                frames.send_replace(Some(Arc::new(frame)));
                true
            }
            Media::Audio(_) => false,
        }
    }

    /// Most recent frame of a live video track
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        match &self.inner.media {
            Media::Video(frames) if self.is_live() => frames.borrow().clone(),
            _ => None,
        }
    }

    /// Receiver notified on every new frame
    pub fn subscribe_frames(&self) -> Option<watch::Receiver<Option<Arc<VideoFrame>>>> {
        match &self.inner.media {
            Media::Video(frames) => Some(frames.subscribe()),
            Media::Audio(_) => None,
        }
    }

    /// Publish an audio block. Returns `false` once the track has ended.
    pub fn push_audio(&self, buffer: AudioBuffer) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.inner.media {
            Media::Audio(blocks) => {
                // No subscribers is not an error: nobody is listening yet.
                let _ = blocks.send(Arc::new(buffer));
                true
            }
            Media::Video(_) => false,
        }
    }

    /// Receiver for audio blocks published from now on
    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<Arc<AudioBuffer>>> {
        match &self.inner.media {
            Media::Audio(blocks) => Some(blocks.subscribe()),
            Media::Video(_) => None,
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A granted capture source: the tracks one acquisition produced
#[derive(Debug, Clone, Default)]
pub struct MediaSource {
    tracks: Vec<MediaTrack>,
}

impl MediaSource {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// Stop every track, releasing the device
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Resolve when any track ends. A source without tracks never ends.
    pub async fn ended(&self) {
        if self.tracks.is_empty() {
            return std::future::pending().await;
        }
        let mut set = tokio::task::JoinSet::new();
        for track in self.tracks.iter().cloned() {
            set.spawn(async move { track.ended().await });
        }
        let _ = set.join_next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent_and_clears_frame() {
        let track = MediaTrack::video("camera");
        assert!(track.push_frame(VideoFrame::solid(2, 2, [1, 2, 3, 255])));
        assert!(track.latest_frame().is_some());

        track.stop();
        track.stop();

        assert!(!track.is_live());
        assert!(track.latest_frame().is_none());
        assert!(!track.push_frame(VideoFrame::solid(2, 2, [1, 2, 3, 255])));
    }

    #[test]
    fn test_clones_share_state() {
        let track = MediaTrack::audio("mic");
        let other = track.clone();
        other.stop();
        assert!(!track.is_live());
        assert_eq!(track, other);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let audio = MediaTrack::audio("mic");
        assert!(!audio.push_frame(VideoFrame::solid(1, 1, [0; 4])));
        assert!(audio.subscribe_frames().is_none());

        let video = MediaTrack::video("screen");
        assert!(!video.push_audio(AudioBuffer::new(48_000, 1, vec![0.0])));
        assert!(video.subscribe_audio().is_none());
    }

    #[test]
    fn test_frame_pixel_lookup() {
        let frame = VideoFrame::solid(3, 2, [9, 8, 7, 255]);
        assert_eq!(frame.data.len(), frame.expected_len());
        assert_eq!(frame.pixel(2, 1), Some([9, 8, 7, 255]));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[tokio::test]
    async fn test_source_ended_fires_on_any_track() {
        let video = MediaTrack::video("screen");
        let source = MediaSource::new(vec![video.clone()]);

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { source.ended().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        video.stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("ended() should resolve")
            .unwrap();
        assert!(!source.is_live());
    }
}
