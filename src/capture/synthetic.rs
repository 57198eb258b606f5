//! Synthetic capture devices
//!
//! Deterministic stand-ins for camera, screen and microphone: solid-colour
//! video at the requested size and rate, and a quiet tone for audio. Each
//! kind can be denied (to exercise the permission path) or revoked (to
//! simulate the OS ending a share).

use super::track::{AudioBuffer, MediaSource, MediaTrack, VideoFrame};
use super::traits::{CaptureError, CaptureKind, CaptureResult, MediaConstraints, MediaDevices};
use crate::mixer::oscillator::{Oscillator, Waveform};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Fill colour of synthetic camera frames
pub const CAMERA_COLOR: [u8; 4] = [220, 80, 60, 255];
/// Fill colour of synthetic screen frames
pub const SCREEN_COLOR: [u8; 4] = [30, 90, 200, 255];

const DEFAULT_CAMERA_HEIGHT_RATIO: (u32, u32) = (3, 4);
const DEFAULT_FRAME_RATE: u32 = 30;
const AUDIO_BLOCK: Duration = Duration::from_millis(10);
const TONE_FREQUENCY: f32 = 440.0;
const TONE_GAIN: f32 = 0.25;

pub struct SyntheticDevices {
    denied: Mutex<HashSet<CaptureKind>>,
    issued: Mutex<HashMap<CaptureKind, Vec<MediaSource>>>,
    latency: Mutex<Option<Duration>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            denied: Mutex::new(HashSet::new()),
            issued: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
        }
    }

    /// Fail future acquisitions of `kind` with a permission error
    pub fn deny(&self, kind: CaptureKind) {
        self.denied.lock().insert(kind);
    }

    pub fn allow(&self, kind: CaptureKind) {
        self.denied.lock().remove(&kind);
    }

    /// Delay every acquisition, like a permission prompt the user takes a
    /// moment to answer
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// End the newest live source of `kind` from the device side
    pub fn revoke(&self, kind: CaptureKind) -> bool {
        let issued = self.issued.lock();
        match issued.get(&kind).and_then(|s| s.iter().rev().find(|s| s.is_live())) {
            Some(source) => {
                tracing::info!("Synthetic {} revoked", kind);
                source.stop();
                true
            }
            None => false,
        }
    }

    /// Every source handed out for `kind`, oldest first
    pub fn issued(&self, kind: CaptureKind) -> Vec<MediaSource> {
        self.issued.lock().get(&kind).cloned().unwrap_or_default()
    }

    pub fn acquisition_count(&self, kind: CaptureKind) -> usize {
        self.issued.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    fn video_source(kind: CaptureKind, constraints: &MediaConstraints) -> MediaSource {
        let video = constraints.video.clone().unwrap_or_default();
        let width = video.width.unwrap_or(1280).max(1);
        let height = video
            .height
            .unwrap_or(width * DEFAULT_CAMERA_HEIGHT_RATIO.0 / DEFAULT_CAMERA_HEIGHT_RATIO.1)
            .max(1);
        let fps = video.frame_rate.unwrap_or(DEFAULT_FRAME_RATE).max(1);
        let color = match kind {
            CaptureKind::Screen => SCREEN_COLOR,
            _ => CAMERA_COLOR,
        };

        let template = VideoFrame::solid(width, height, color);
        let track = MediaTrack::video(format!("synthetic {}", kind));
        // First frame is available as soon as the source is granted.
        track.push_frame(template.clone());

        let producer = track.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut frame = template.clone();
                frame.timestamp_ms = started.elapsed().as_secs_f64() * 1000.0;
                if !producer.push_frame(frame) {
                    break;
                }
            }
        });

        MediaSource::new(vec![track])
    }

    fn audio_source(constraints: &MediaConstraints) -> MediaSource {
        let audio = constraints.audio.clone().unwrap_or_default();
        let sample_rate = audio.sample_rate.unwrap_or(48_000);
        let channels = audio.channels.unwrap_or(1).max(1);
        let frames_per_block = (sample_rate as u64 * AUDIO_BLOCK.as_millis() as u64 / 1000) as usize;

        let track = MediaTrack::audio("synthetic microphone");
        let producer = track.clone();
        tokio::spawn(async move {
            let mut tone = Oscillator::new(Waveform::Sine, TONE_FREQUENCY, sample_rate);
            let mut ticker = tokio::time::interval(AUDIO_BLOCK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut samples = vec![0.0; frames_per_block * channels as usize];
                tone.render_add(&mut samples, channels, TONE_GAIN);
                if !producer.push_audio(AudioBuffer::new(sample_rate, channels, samples)) {
                    break;
                }
            }
        });

        MediaSource::new(vec![track])
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, kind: CaptureKind, constraints: &MediaConstraints) -> CaptureResult<MediaSource> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.denied.lock().contains(&kind) {
            return Err(CaptureError::PermissionDenied(format!("{} access denied", kind)));
        }

        let source = match kind {
            CaptureKind::Camera | CaptureKind::Screen => Self::video_source(kind, constraints),
            CaptureKind::Microphone => Self::audio_source(constraints),
        };
        self.issued.lock().entry(kind).or_default().push(source.clone());
        Ok(source)
    }
}
