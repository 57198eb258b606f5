//! Scripted encoder
//!
//! Emits a fixed list of chunk sizes as soon as it starts and `Stopped` when
//! stopped. Used to drive recordings without FFmpeg.

use super::{CombinedStream, EncoderError, EncoderEvent, EncoderFactory, EncoderOptions, EncoderResult, MediaEncoder};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct ScriptedEncoder {
    chunks: Vec<usize>,
    stop_delay: Option<Duration>,
    error: Option<String>,
    events_tx: Option<mpsc::UnboundedSender<EncoderEvent>>,
    events_rx: mpsc::UnboundedReceiver<EncoderEvent>,
    started: bool,
    stopped: bool,
}

impl ScriptedEncoder {
    pub fn new(chunks: Vec<usize>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            chunks,
            stop_delay: None,
            error: None,
            events_tx: Some(events_tx),
            events_rx,
            started: false,
            stopped: false,
        }
    }

    /// Delay `Stopped` after `stop()`, keeping the session in finalizing
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Report an encoder error right after the scripted chunks
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

#[async_trait]
impl MediaEncoder for ScriptedEncoder {
    async fn start(&mut self, _timeslice: Duration) -> EncoderResult<()> {
        if self.started {
            return Err(EncoderError::AlreadyStarted);
        }
        self.started = true;
        if let Some(events) = &self.events_tx {
            for (i, size) in self.chunks.iter().enumerate() {
                let _ = events.send(EncoderEvent::DataAvailable(vec![i as u8; *size]));
            }
            if let Some(message) = &self.error {
                let _ = events.send(EncoderEvent::Error(message.clone()));
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> EncoderResult<()> {
        if !self.started {
            return Err(EncoderError::NotStarted);
        }
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        // Dropping the sender after `Stopped` ends the event stream
        if let Some(events) = self.events_tx.take() {
            match self.stop_delay {
                Some(delay) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(EncoderEvent::Stopped);
                    });
                }
                None => {
                    let _ = events.send(EncoderEvent::Stopped);
                }
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<EncoderEvent> {
        self.events_rx.recv().await
    }

    fn is_active(&self) -> bool {
        self.started && !self.stopped
    }
}

#[derive(Default)]
struct FactoryState {
    streams: Vec<CombinedStream>,
    fail_next: Option<String>,
}

/// Hands out scripted encoders and remembers what they were bound to
#[derive(Clone, Default)]
pub struct ScriptedEncoderFactory {
    chunks: Vec<usize>,
    stop_delay: Option<Duration>,
    error: Option<String>,
    state: Arc<Mutex<FactoryState>>,
}

impl ScriptedEncoderFactory {
    pub fn new(chunks: Vec<usize>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Every created encoder fails mid-stream with `message`
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Make the next `create` fail
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Streams bound by each created encoder, oldest first
    pub fn streams(&self) -> Vec<CombinedStream> {
        self.state.lock().streams.clone()
    }
}

impl EncoderFactory for ScriptedEncoderFactory {
    fn create(&self, stream: CombinedStream, _options: &EncoderOptions) -> EncoderResult<Box<dyn MediaEncoder>> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(EncoderError::UnsupportedStream(message));
        }
        state.streams.push(stream);

        let mut encoder = ScriptedEncoder::new(self.chunks.clone());
        if let Some(delay) = self.stop_delay {
            encoder = encoder.with_stop_delay(delay);
        }
        if let Some(message) = &self.error {
            encoder = encoder.with_error(message.clone());
        }
        Ok(Box::new(encoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emits_script_then_stopped() {
        let mut encoder = ScriptedEncoder::new(vec![3, 0]);
        encoder.start(Duration::from_millis(200)).await.unwrap();
        assert!(encoder.is_active());
        encoder.stop().await.unwrap();
        assert!(!encoder.is_active());

        assert_eq!(encoder.next_event().await, Some(EncoderEvent::DataAvailable(vec![0, 0, 0])));
        assert_eq!(encoder.next_event().await, Some(EncoderEvent::DataAvailable(vec![])));
        assert_eq!(encoder.next_event().await, Some(EncoderEvent::Stopped));
        assert_eq!(encoder.next_event().await, None);
    }

    #[tokio::test]
    async fn test_scripted_error_follows_chunks() {
        let mut encoder = ScriptedEncoder::new(vec![2]).with_error("vp8 crashed");
        encoder.start(Duration::from_millis(200)).await.unwrap();

        assert_eq!(encoder.next_event().await, Some(EncoderEvent::DataAvailable(vec![0, 0])));
        assert_eq!(encoder.next_event().await, Some(EncoderEvent::Error("vp8 crashed".to_string())));
    }

    #[test]
    fn test_factory_failure_is_one_shot() {
        use crate::capture::MediaTrack;

        let factory = ScriptedEncoderFactory::new(vec![]);
        let stream = CombinedStream::new(MediaTrack::video("v"), MediaTrack::audio("a"));
        factory.fail_next("boom");
        assert!(factory.create(stream.clone(), &EncoderOptions::default()).is_err());
        assert!(factory.create(stream, &EncoderOptions::default()).is_ok());
        assert_eq!(factory.created_count(), 1);
    }
}
