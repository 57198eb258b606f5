//! Open ScreenRecorder - camera, screen and microphone, composited into one
//! WebM recording streamed straight to disk.
//!
//! The [`controller::SessionController`] is the entry point: it owns the
//! source registry, the compositor, the audio mixing graph and the single
//! recording slot.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod mixer;
pub mod recorder;
pub mod sink;
pub mod utils;

pub use config::RecorderConfig;
pub use controller::{Backends, ControllerStatus, SessionController};
pub use recorder::{RecordingEvent, RecordingStatus, RecordingSummary};
pub use utils::{AppError, AppResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_screenrecorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
