//! Microphone capture using cpal
//!
//! cpal streams are not `Send`, so the stream is built and kept alive on a
//! dedicated thread for as long as the track is live.

use super::track::{AudioBuffer, MediaSource, MediaTrack};
use super::traits::{AudioConstraints, CaptureError, CaptureResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::time::Duration;
use tokio::sync::oneshot;

/// Open the default input device
pub async fn open(constraints: &AudioConstraints) -> CaptureResult<MediaSource> {
    let constraints = constraints.clone();
    let track = MediaTrack::audio("microphone");
    let producer = track.clone();
    let (ready_tx, ready_rx) = oneshot::channel::<CaptureResult<()>>();

    std::thread::spawn(move || {
        let host = cpal::default_host();
        let device = match host.default_input_device() {
            Some(d) => d,
            None => {
                let _ = ready_tx.send(Err(CaptureError::DeviceNotFound("no default input device".to_string())));
                return;
            }
        };

        let supported = match device.default_input_config() {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(CaptureError::Platform(format!(
                    "Failed to query input config: {}",
                    e
                ))));
                return;
            }
        };

        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.config();
        if let Some(rate) = constraints.sample_rate {
            config.sample_rate = cpal::SampleRate(rate);
        }
        if let Some(channels) = constraints.channels {
            config.channels = channels;
        }
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let on_error = |err: cpal::StreamError| tracing::error!("Microphone stream error: {}", err);
        let stream = match sample_format {
            SampleFormat::F32 => {
                let track = producer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        track.push_audio(AudioBuffer::new(sample_rate, channels, data.to_vec()));
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let track = producer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let samples = data.iter().map(|&s| s as f32 / 32768.0).collect();
                        track.push_audio(AudioBuffer::new(sample_rate, channels, samples));
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::U16 => {
                let track = producer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let samples = data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect();
                        track.push_audio(AudioBuffer::new(sample_rate, channels, samples));
                    },
                    on_error,
                    None,
                )
            }
            other => {
                let _ = ready_tx.send(Err(CaptureError::NotSupported(format!(
                    "sample format {:?}",
                    other
                ))));
                return;
            }
        };

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(CaptureError::Platform(format!(
                    "Failed to build input stream: {}",
                    e
                ))));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(CaptureError::Platform(format!(
                "Failed to start input stream: {}",
                e
            ))));
            return;
        }

        tracing::info!("Microphone stream started: {}Hz, {} channel(s)", sample_rate, channels);
        let _ = ready_tx.send(Ok(()));

        while producer.is_live() {
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        tracing::info!("Microphone stream stopped");
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(MediaSource::new(vec![track])),
        Ok(Err(e)) => {
            track.stop();
            Err(e)
        }
        Err(_) => {
            track.stop();
            Err(CaptureError::Platform("microphone thread exited before starting".to_string()))
        }
    }
}
