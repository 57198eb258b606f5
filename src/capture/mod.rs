//! Capture sources
//!
//! Camera, screen and microphone acquisition, the live track model they
//! produce, preview routing, and the registry that keeps at most one active
//! source per kind.

pub mod native;
pub mod preview;
pub mod registry;
pub mod screen;
pub mod synthetic;
pub mod track;
pub mod traits;

#[cfg(feature = "microphone")]
pub mod audio;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use native::NativeDevices;
pub use preview::{PreviewSurface, Previews};
pub use registry::{SourceEvent, SourceRegistry};
pub use synthetic::SyntheticDevices;
pub use track::{AudioBuffer, MediaSource, MediaTrack, VideoFrame};
pub use traits::{
    AudioConstraints, CaptureError, CaptureKind, CaptureResult, MediaConstraints, MediaDevices, SourceObserver,
    TrackKind, VideoConstraints,
};
