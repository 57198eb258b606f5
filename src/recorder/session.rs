//! One recording, from destination pick to sink close
//!
//! The session opens the destination first, then binds and starts the
//! encoder. A driver task forwards encoder output into a bounded chunk queue
//! drained by a single writer, so each write resolves before the next one
//! starts and a slow disk holds the encoder back instead of growing memory.

use super::state::{RecordingError, RecordingEvent, RecordingResult, RecordingStatus, RecordingSummary};
use crate::encoder::{CombinedStream, EncoderEvent, EncoderFactory, EncoderOptions, MediaEncoder};
use crate::sink::{self, DestinationPicker, SavePickerOptions, SinkResult, StreamingSink};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything a session needs to start
pub struct SessionSetup<'a> {
    pub stream: CombinedStream,
    pub picker: &'a dyn DestinationPicker,
    pub picker_options: SavePickerOptions,
    pub encoders: &'a dyn EncoderFactory,
    pub encoder_options: EncoderOptions,
    pub timeslice: Duration,
    /// Chunks queued between encoder and sink
    pub queue_capacity: usize,
    pub status: Arc<watch::Sender<RecordingStatus>>,
    pub events: broadcast::Sender<RecordingEvent>,
}

/// Handle to a running (or finished) recording
pub struct RecordingSession {
    id: Uuid,
    destination: String,
    stop: Option<oneshot::Sender<()>>,
    done: Arc<AtomicBool>,
    driver: JoinHandle<RecordingResult<RecordingSummary>>,
}

#[derive(Debug, Default)]
struct WriteStats {
    bytes: u64,
    chunks: u64,
    empty: u64,
}

impl RecordingSession {
    /// Open the destination, start the encoder and begin forwarding chunks
    ///
    /// A declined or failed destination returns before anything else is
    /// created. An encoder failure closes the already opened sink.
    pub async fn start(setup: SessionSetup<'_>) -> RecordingResult<Self> {
        let id = Uuid::new_v4();
        let mut sink = sink::open(setup.picker, &setup.picker_options)
            .await
            .map_err(RecordingError::Destination)?;
        let destination = sink.destination();

        let mut encoder = match setup.encoders.create(setup.stream, &setup.encoder_options) {
            Ok(encoder) => encoder,
            Err(e) => {
                abandon_sink(sink.as_mut()).await;
                return Err(e.into());
            }
        };
        if let Err(e) = encoder.start(setup.timeslice).await {
            abandon_sink(sink.as_mut()).await;
            return Err(e.into());
        }

        setup.status.send_replace(RecordingStatus::Recording);
        let _ = setup.events.send(RecordingEvent::Started {
            id,
            destination: destination.clone(),
        });
        tracing::info!(
            "Recording {} started to {} ({} bps, {}ms slices)",
            id,
            destination,
            setup.encoder_options.video_bits_per_second,
            setup.timeslice.as_millis()
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));
        let driver = tokio::spawn(drive(Driver {
            id,
            destination: destination.clone(),
            encoder,
            sink,
            stop: stop_rx,
            queue_capacity: setup.queue_capacity.max(1),
            status: setup.status,
            events: setup.events,
            done: done.clone(),
        }));

        Ok(Self {
            id,
            destination,
            stop: Some(stop_tx),
            done,
            driver,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Ask the encoder to stop. Returns `false` if a stop was already requested.
    pub fn request_stop(&mut self) -> bool {
        match self.stop.take() {
            Some(stop) => {
                let _ = stop.send(());
                true
            }
            None => false,
        }
    }

    /// Whether the session has closed its sink (or failed) and released the slot
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait for the recording to end
    pub async fn wait(self) -> RecordingResult<RecordingSummary> {
        self.driver
            .await
            .map_err(|e| RecordingError::Aborted(e.to_string()))?
    }
}

struct Driver {
    id: Uuid,
    destination: String,
    encoder: Box<dyn MediaEncoder>,
    sink: Box<dyn StreamingSink>,
    stop: oneshot::Receiver<()>,
    queue_capacity: usize,
    status: Arc<watch::Sender<RecordingStatus>>,
    events: broadcast::Sender<RecordingEvent>,
    done: Arc<AtomicBool>,
}

async fn drive(driver: Driver) -> RecordingResult<RecordingSummary> {
    let Driver {
        id,
        destination,
        mut encoder,
        sink,
        mut stop,
        queue_capacity,
        status,
        events,
        done,
    } = driver;

    let started_at = Utc::now();
    let started = Instant::now();
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(queue_capacity);
    let mut writer = tokio::spawn(write_chunks(sink, chunk_rx));
    let mut chunk_tx = Some(chunk_tx);
    let mut writer_result = None;
    let mut stop_requested = false;
    let mut failure: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut stop, if !stop_requested => {
                stop_requested = true;
                status.send_replace(RecordingStatus::Finalizing);
                let _ = events.send(RecordingEvent::Finalizing { id });
                tracing::info!("Recording {} finalizing", id);
                if let Err(e) = encoder.stop().await {
                    failure = Some(format!("Failed to stop encoder: {}", e));
                    break;
                }
            }
            event = encoder.next_event() => match event {
                Some(EncoderEvent::DataAvailable(chunk)) => {
                    let Some(tx) = chunk_tx.as_ref() else { continue };
                    // Waits while the queue is full
                    if tx.send(chunk).await.is_err() {
                        // Writer gave up; its result carries the reason
                        break;
                    }
                }
                Some(EncoderEvent::Error(message)) => {
                    tracing::error!("Recording {} encoder error: {}", id, message);
                    failure.get_or_insert(message);
                    if !stop_requested {
                        stop_requested = true;
                        status.send_replace(RecordingStatus::Finalizing);
                        let _ = events.send(RecordingEvent::Finalizing { id });
                        let _ = encoder.stop().await;
                    }
                }
                Some(EncoderEvent::Stopped) | None => {
                    tracing::debug!("Recording {} encoder stopped", id);
                    break;
                }
            },
            result = &mut writer => {
                writer_result = Some(result);
                break;
            }
        }
    }

    // Closing the queue lets the writer drain what is left and close the sink
    chunk_tx.take();
    let writer_result = match writer_result {
        Some(result) => result,
        None => writer.await,
    };

    let stats = match writer_result {
        Ok((stats, Ok(()))) => stats,
        Ok((stats, Err(e))) => {
            failure.get_or_insert(format!("Sink error: {}", e));
            stats
        }
        Err(e) => {
            failure.get_or_insert(format!("Writer task failed: {}", e));
            WriteStats::default()
        }
    };

    if failure.is_some() && encoder.is_active() {
        if let Err(e) = encoder.stop().await {
            tracing::warn!("Failed to stop encoder after failure: {}", e);
        }
    }
    drop(encoder);

    let outcome = match failure {
        Some(message) => {
            tracing::error!("Recording {} failed: {}", id, message);
            let _ = events.send(RecordingEvent::Failed {
                id,
                message: message.clone(),
            });
            Err(RecordingError::Aborted(message))
        }
        None => {
            let summary = RecordingSummary {
                id,
                destination,
                bytes_written: stats.bytes,
                chunks_written: stats.chunks,
                empty_chunks_skipped: stats.empty,
                started_at,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
            tracing::info!(
                "Recording {} complete: {} bytes in {} chunks ({} empty skipped)",
                id,
                summary.bytes_written,
                summary.chunks_written,
                summary.empty_chunks_skipped
            );
            let _ = events.send(RecordingEvent::Stopped(summary.clone()));
            Ok(summary)
        }
    };

    done.store(true, Ordering::SeqCst);
    status.send_replace(RecordingStatus::Idle);
    outcome
}

/// Write chunks in arrival order, then close the sink once
async fn write_chunks(
    mut sink: Box<dyn StreamingSink>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
) -> (WriteStats, SinkResult<()>) {
    let mut stats = WriteStats::default();
    while let Some(chunk) = chunks.recv().await {
        if chunk.is_empty() {
            stats.empty += 1;
            continue;
        }
        if let Err(e) = sink.write(&chunk).await {
            tracing::error!("Write to {} failed after {} bytes: {}", sink.destination(), stats.bytes, e);
            return (stats, Err(e));
        }
        stats.bytes += chunk.len() as u64;
        stats.chunks += 1;
    }
    let result = sink.close().await;
    (stats, result)
}

/// Close a sink that will never receive data
async fn abandon_sink(sink: &mut dyn StreamingSink) {
    if let Err(e) = sink.close().await {
        tracing::warn!("Failed to close unused sink {}: {}", sink.destination(), e);
    }
}
