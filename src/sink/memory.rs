//! In-memory sink and picker
//!
//! Records every operation so recordings can be checked without touching
//! the disk. Sinks opened by the same picker share one log.

use super::picker::{DestinationHandle, DestinationPicker, SavePickerOptions};
use super::{SinkError, SinkResult, StreamingSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Write(usize),
    Close,
}

#[derive(Default)]
struct Shared {
    ops: Vec<SinkOp>,
    data: Vec<u8>,
    opened: usize,
    fail_writes: bool,
    write_delay: Option<Duration>,
}

pub struct MemorySink {
    shared: Arc<Mutex<Shared>>,
    closed: bool,
}

#[async_trait]
impl StreamingSink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        let delay = self.shared.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut shared = self.shared.lock();
        if shared.fail_writes {
            return Err(SinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
        }
        shared.ops.push(SinkOp::Write(chunk.len()));
        shared.data.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.closed = true;
        self.shared.lock().ops.push(SinkOp::Close);
        Ok(())
    }

    fn destination(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryHandle {
    name: String,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl DestinationHandle for MemoryHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn create_writable(&self, _keep_existing_data: bool) -> SinkResult<Box<dyn StreamingSink>> {
        self.shared.lock().opened += 1;
        Ok(Box::new(MemorySink {
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

/// Picker whose destinations live in memory
#[derive(Clone, Default)]
pub struct MemoryPicker {
    cancel: bool,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A picker the user always dismisses
    pub fn cancelling() -> Self {
        Self {
            cancel: true,
            ..Default::default()
        }
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.shared.lock().fail_writes = true;
    }

    /// Slow every write down, like a congested disk
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.shared.lock().write_delay = delay;
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        self.shared.lock().ops.clone()
    }

    pub fn data(&self) -> Vec<u8> {
        self.shared.lock().data.clone()
    }

    /// Number of sinks opened through this picker
    pub fn opened_count(&self) -> usize {
        self.shared.lock().opened
    }
}

#[async_trait]
impl DestinationPicker for MemoryPicker {
    async fn pick(&self, options: &SavePickerOptions) -> SinkResult<Option<Box<dyn DestinationHandle>>> {
        if self.cancel {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryHandle {
            name: options.suggested_name.clone(),
            shared: self.shared.clone(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_ops_across_sinks() {
        let picker = MemoryPicker::new();
        let handle = picker.pick(&SavePickerOptions::default()).await.unwrap().unwrap();
        assert_eq!(handle.name(), "recording.webm");

        let mut sink = handle.create_writable(false).await.unwrap();
        sink.write(&[1, 2]).await.unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.write(&[3]).await, Err(SinkError::Closed)));

        assert_eq!(picker.ops(), vec![SinkOp::Write(2), SinkOp::Close]);
        assert_eq!(picker.data(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let picker = MemoryPicker::new();
        picker.fail_writes();
        let handle = picker.pick(&SavePickerOptions::default()).await.unwrap().unwrap();
        let mut sink = handle.create_writable(false).await.unwrap();
        assert!(matches!(sink.write(&[1]).await, Err(SinkError::Io(_))));
        assert!(picker.ops().is_empty());
    }
}
