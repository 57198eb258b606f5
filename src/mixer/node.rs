//! Mix nodes
//!
//! A node is pulled once per render quantum and adds its contribution into
//! the shared output block.

use super::oscillator::{Oscillator, Waveform};
use crate::capture::{AudioBuffer, MediaTrack};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Something that can render into a block of interleaved samples
pub trait MixNode: Send {
    fn label(&self) -> &str;

    /// Add one block (`out.len() / channels` frames) into `out`
    fn render_add(&mut self, out: &mut [f32], channels: u16);
}

/// The always-connected tone source
pub struct ToneNode {
    oscillator: Oscillator,
}

impl ToneNode {
    pub fn new(waveform: Waveform, frequency: f32, sample_rate: u32) -> Self {
        Self {
            oscillator: Oscillator::new(waveform, frequency, sample_rate),
        }
    }
}

impl MixNode for ToneNode {
    fn label(&self) -> &str {
        "oscillator"
    }

    fn render_add(&mut self, out: &mut [f32], channels: u16) {
        self.oscillator.render_add(out, channels, 1.0);
    }
}

/// Adapts a live audio track to the graph's format
///
/// Incoming blocks are channel-mapped and resampled (nearest sample) to the
/// graph rate as they arrive. At most one second is buffered; beyond that the
/// oldest frames are dropped. An underrun renders silence.
pub struct LiveInput {
    track: MediaTrack,
    receiver: Option<broadcast::Receiver<Arc<AudioBuffer>>>,
    sample_rate: u32,
    channels: u16,
    pending: VecDeque<f32>,
    dropped_frames: u64,
}

impl LiveInput {
    pub fn new(track: MediaTrack, sample_rate: u32, channels: u16) -> Self {
        let receiver = track.subscribe_audio();
        Self {
            track,
            receiver,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            pending: VecDeque::new(),
            dropped_frames: 0,
        }
    }

    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    /// Frames currently queued
    pub fn buffered_frames(&self) -> usize {
        self.pending.len() / self.channels as usize
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn capacity_samples(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }

    /// Move everything the track has published into the pending queue
    fn drain(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            return;
        };
        let mut blocks = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(block) => blocks.push(block),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Microphone input lagged, {} block(s) skipped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        for block in blocks {
            self.push(&block);
        }
    }

    /// Convert one block to the graph format and queue it
    pub fn push(&mut self, block: &AudioBuffer) {
        let in_channels = block.channels.max(1) as usize;
        let in_frames = block.frames();
        if in_frames == 0 {
            return;
        }
        let out_channels = self.channels as usize;
        let out_frames = (in_frames as u64 * self.sample_rate as u64 / block.sample_rate.max(1) as u64) as usize;

        for frame in 0..out_frames {
            let src = ((frame as u64 * block.sample_rate as u64 / self.sample_rate as u64) as usize).min(in_frames - 1);
            let input = &block.samples[src * in_channels..(src + 1) * in_channels];
            for ch in 0..out_channels {
                let value = if in_channels == 1 {
                    input[0]
                } else if out_channels == 1 {
                    input.iter().sum::<f32>() / in_channels as f32
                } else {
                    input[ch.min(in_channels - 1)]
                };
                self.pending.push_back(value);
            }
        }

        let capacity = self.capacity_samples();
        if self.pending.len() > capacity {
            let excess = self.pending.len() - capacity;
            self.pending.drain(..excess);
            self.dropped_frames += (excess / out_channels) as u64;
        }
    }
}

impl MixNode for LiveInput {
    fn label(&self) -> &str {
        self.track.label()
    }

    fn render_add(&mut self, out: &mut [f32], _channels: u16) {
        self.drain();
        for sample in out.iter_mut() {
            match self.pending.pop_front() {
                Some(value) => *sample += value,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated_to_stereo() {
        let track = MediaTrack::audio("mic");
        let mut input = LiveInput::new(track, 48_000, 2);
        input.push(&AudioBuffer::new(48_000, 1, vec![0.1, 0.2]));

        let mut out = vec![0.0; 4];
        input.render_add(&mut out, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let track = MediaTrack::audio("mic");
        let mut input = LiveInput::new(track, 48_000, 1);
        input.push(&AudioBuffer::new(48_000, 1, vec![0.5]));

        let mut out = vec![0.0; 3];
        input.render_add(&mut out, 1);
        assert_eq!(out, vec![0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_resamples_to_graph_rate() {
        let track = MediaTrack::audio("mic");
        let mut input = LiveInput::new(track, 48_000, 1);
        input.push(&AudioBuffer::new(24_000, 1, vec![0.25; 240]));
        assert_eq!(input.buffered_frames(), 480);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let track = MediaTrack::audio("mic");
        let mut input = LiveInput::new(track, 100, 1);
        input.push(&AudioBuffer::new(100, 1, vec![1.0; 100]));
        input.push(&AudioBuffer::new(100, 1, vec![2.0; 50]));

        assert_eq!(input.buffered_frames(), 100);
        assert_eq!(input.dropped_frames(), 50);
        let mut out = vec![0.0; 1];
        input.render_add(&mut out, 1);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn test_drains_published_blocks() {
        let track = MediaTrack::audio("mic");
        let mut input = LiveInput::new(track.clone(), 48_000, 1);
        track.push_audio(AudioBuffer::new(48_000, 1, vec![0.3; 4]));

        let mut out = vec![0.0; 4];
        input.render_add(&mut out, 1);
        assert_eq!(out, vec![0.3; 4]);
    }
}
