//! Recorder configuration
//!
//! Every knob has a default matching the stock recorder: a 1920x1080 canvas
//! captured at 30fps, an 8 Mbit/s WebM encode sliced every 200ms, and a
//! 48kHz stereo mix. A JSON file may override any subset of the fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable pointing at a JSON config file
pub const CONFIG_ENV_VAR: &str = "OPEN_SCREENRECORDER_CONFIG";

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    pub compositor: CompositorConfig,
    pub capture: CaptureConfig,
    pub audio: AudioConfig,
    pub encoder: EncoderConfig,
    pub sink: SinkConfig,
}

impl RecorderConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded recorder config from {:?}", path);
        Ok(config)
    }

    /// Load from `OPEN_SCREENRECORDER_CONFIG` if set, otherwise defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Reject values that would stall a loop or produce an empty frame
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.compositor;
        if c.width == 0 || c.height == 0 {
            return Err(ConfigError::Invalid("canvas dimensions must be non-zero".into()));
        }
        if c.capture_fps == 0 || c.render_fps == 0 {
            return Err(ConfigError::Invalid("frame rates must be non-zero".into()));
        }
        if c.inset_divisor == 0 {
            return Err(ConfigError::Invalid("inset divisor must be non-zero".into()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 || self.audio.render_quantum == 0 {
            return Err(ConfigError::Invalid("audio format must be non-zero".into()));
        }
        if self.encoder.timeslice_ms == 0 {
            return Err(ConfigError::Invalid("encoder timeslice must be non-zero".into()));
        }
        if self.sink.queue_capacity == 0 {
            return Err(ConfigError::Invalid("chunk queue capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Composition surface and layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositorConfig {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Rate at which the canvas is turned into output frames
    pub capture_fps: u32,
    /// Render loop rate (display refresh)
    pub render_fps: u32,
    /// Picture-in-picture inset is canvas / divisor on each axis
    pub inset_divisor: u32,
    /// Gap between the inset and the bottom-right canvas edges
    pub inset_margin: u32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            capture_fps: 30,
            render_fps: 60,
            inset_divisor: 4,
            inset_margin: 10,
        }
    }
}

impl CompositorConfig {
    /// Render loop period. A zero rate counts as 1 fps.
    pub fn render_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_fps.max(1) as f64)
    }

    /// Output track period. A zero rate counts as 1 fps.
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.capture_fps.max(1) as f64)
    }
}

/// Which implementation serves a capture kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Real hardware (FFmpeg grab, nokhwa, cpal)
    Native,
    /// Generated test patterns
    Synthetic,
}

/// Acquisition constraints and backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Requested camera width
    pub camera_width: u32,
    /// Requested screen frame rate
    pub screen_frame_rate: u32,
    /// Ideal screen width
    pub screen_width: u32,
    /// Ideal screen height
    pub screen_height: u32,
    pub camera_backend: CaptureBackend,
    pub screen_backend: CaptureBackend,
    pub microphone_backend: CaptureBackend,
    /// FFmpeg input device for screen grabs (e.g. ":0.0", "1:none", "desktop")
    pub screen_device: Option<String>,
    /// FFmpeg binary used for screen grabs
    pub ffmpeg_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_width: 720,
            screen_frame_rate: 60,
            screen_width: 1920,
            screen_height: 1080,
            camera_backend: CaptureBackend::Native,
            screen_backend: CaptureBackend::Native,
            microphone_backend: CaptureBackend::Native,
            screen_device: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Audio mixing graph format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames rendered per block
    pub render_quantum: usize,
    /// Frequency of the always-on oscillator; 0 keeps it silent
    pub oscillator_frequency: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            render_quantum: 128,
            oscillator_frequency: 0.0,
        }
    }
}

/// Encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderConfig {
    pub mime_type: String,
    pub video_bits_per_second: u64,
    pub audio_bits_per_second: u64,
    /// Interval between emitted chunks
    pub timeslice_ms: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub ffmpeg_path: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
            video_bits_per_second: 8_000_000,
            audio_bits_per_second: 128_000,
            timeslice_ms: 200,
            video_codec: "libvpx".to_string(),
            audio_codec: "libopus".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl EncoderConfig {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }
}

/// Destination and write-queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SinkConfig {
    pub suggested_name: String,
    pub type_description: String,
    pub type_mime: String,
    pub type_extension: String,
    /// Where the non-interactive picker places recordings
    pub directory: Option<PathBuf>,
    /// Chunks buffered between encoder and disk before the encoder is held back
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            suggested_name: "recording.webm".to_string(),
            type_description: "WebM Video".to_string(),
            type_mime: "video/webm".to_string(),
            type_extension: ".webm".to_string(),
            directory: None,
            queue_capacity: 64,
        }
    }
}
