//! Media encoders
//!
//! An encoder consumes a combined video + audio stream and emits encoded
//! container bytes as a sequence of chunks, one per timeslice, followed by a
//! single `Stopped` event once it has flushed after `stop()`.

pub mod ffmpeg;
pub mod scripted;

use crate::capture::MediaTrack;
use crate::config::RecorderConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use ffmpeg::{FfmpegEncoderFactory, FfmpegWebmEncoder};
pub use scripted::{ScriptedEncoder, ScriptedEncoderFactory};

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Encoder already started")]
    AlreadyStarted,

    #[error("Encoder not started")]
    NotStarted,

    #[error("Unsupported stream: {0}")]
    UnsupportedStream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EncoderResult<T> = Result<T, EncoderError>;

/// Format and rate settings for one encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    pub mime_type: String,
    pub video_bits_per_second: u64,
    pub audio_bits_per_second: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub video_codec: String,
    pub audio_codec: String,
    pub ffmpeg_path: PathBuf,
    /// Encoded chunks buffered before the encoder is held back
    pub event_capacity: usize,
}

impl EncoderOptions {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            mime_type: config.encoder.mime_type.clone(),
            video_bits_per_second: config.encoder.video_bits_per_second,
            audio_bits_per_second: config.encoder.audio_bits_per_second,
            width: config.compositor.width,
            height: config.compositor.height,
            frame_rate: config.compositor.capture_fps,
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            video_codec: config.encoder.video_codec.clone(),
            audio_codec: config.encoder.audio_codec.clone(),
            ffmpeg_path: config.encoder.ffmpeg_path.clone(),
            event_capacity: config.sink.queue_capacity.max(1),
        }
    }
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self::from_config(&RecorderConfig::default())
    }
}

/// Something an encoder reports
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// One timeslice of output. May be empty.
    DataAvailable(Vec<u8>),
    /// The encoder has flushed everything and will emit nothing more
    Stopped,
    Error(String),
}

/// The video and audio tracks bound into one recording
#[derive(Debug, Clone)]
pub struct CombinedStream {
    pub video: MediaTrack,
    pub audio: MediaTrack,
}

impl CombinedStream {
    pub fn new(video: MediaTrack, audio: MediaTrack) -> Self {
        Self { video, audio }
    }
}

#[async_trait]
pub trait MediaEncoder: Send {
    /// Begin encoding, emitting a chunk every `timeslice`
    async fn start(&mut self, timeslice: Duration) -> EncoderResult<()>;

    /// Stop producing data. A final chunk and `Stopped` follow.
    async fn stop(&mut self) -> EncoderResult<()>;

    /// Next event, or `None` after `Stopped` has been delivered
    async fn next_event(&mut self) -> Option<EncoderEvent>;

    fn is_active(&self) -> bool;
}

/// Builds an encoder for each recording
pub trait EncoderFactory: Send + Sync {
    fn create(&self, stream: CombinedStream, options: &EncoderOptions) -> EncoderResult<Box<dyn MediaEncoder>>;
}
