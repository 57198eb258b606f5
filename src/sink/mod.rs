//! Streaming sinks
//!
//! A sink accepts encoded chunks one at a time, in order, and is complete
//! only once `close()` succeeds.

pub mod file;
pub mod memory;
pub mod picker;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileSink;
pub use memory::{MemoryPicker, MemorySink, SinkOp};
pub use picker::{
    DestinationHandle, DestinationPicker, FileHandle, FileInfo, FilePickerAcceptType, PathPicker, SavePickerOptions,
    WellKnownDirectory,
};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Destination selection cancelled")]
    Cancelled,

    #[error("Sink is closed")]
    Closed,

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SinkResult<T> = Result<T, SinkError>;

#[async_trait]
pub trait StreamingSink: Send {
    /// Append one chunk. Must not be called concurrently.
    async fn write(&mut self, chunk: &[u8]) -> SinkResult<()>;

    /// Finalize the destination. No writes are valid afterwards.
    async fn close(&mut self) -> SinkResult<()>;

    /// Human-readable destination, for logs and summaries
    fn destination(&self) -> String;
}

/// Ask the picker for a destination and open it for writing
///
/// A picker that returns nothing is a cancelled request.
pub async fn open(picker: &dyn DestinationPicker, options: &SavePickerOptions) -> SinkResult<Box<dyn StreamingSink>> {
    let handle = picker.pick(options).await?.ok_or(SinkError::Cancelled)?;
    tracing::info!("Opening sink for {}", handle.name());
    handle.create_writable(false).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_picker_opens_nothing() {
        let picker = MemoryPicker::cancelling();
        let result = open(&picker, &SavePickerOptions::default()).await;
        assert!(matches!(result, Err(SinkError::Cancelled)));
        assert_eq!(picker.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_open_returns_writable_sink() {
        let picker = MemoryPicker::new();
        let mut sink = open(&picker, &SavePickerOptions::default()).await.unwrap();
        sink.write(b"abc").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(picker.opened_count(), 1);
        assert_eq!(picker.ops(), vec![SinkOp::Write(3), SinkOp::Close]);
    }
}
