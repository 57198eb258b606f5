//! Recording sessions
//!
//! A session binds the composited video and mixed audio into one encoder
//! and streams its output to the chosen destination.

pub mod session;
pub mod state;

pub use session::{RecordingSession, SessionSetup};
pub use state::{RecordingError, RecordingEvent, RecordingResult, RecordingStatus, RecordingSummary};
