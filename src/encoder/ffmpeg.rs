//! WebM encoding through FFmpeg
//!
//! Video goes in as raw RGBA on stdin at the canvas rate. Audio goes in as
//! interleaved f32le over a loopback TCP socket that FFmpeg connects to as
//! its second input. The muxed WebM comes back on stdout and is cut into one
//! chunk per timeslice.

use super::{
    CombinedStream, EncoderError, EncoderEvent, EncoderFactory, EncoderOptions, EncoderResult, MediaEncoder,
};
use crate::capture::{MediaTrack, VideoFrame};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Bytes of FFmpeg stderr kept for error reports
const STDERR_TAIL: usize = 4096;
const READ_BUFFER: usize = 64 * 1024;

pub struct FfmpegWebmEncoder {
    options: EncoderOptions,
    stream: CombinedStream,
    events: Option<mpsc::Receiver<EncoderEvent>>,
    stop: Option<watch::Sender<bool>>,
    started: bool,
    stopped: bool,
}

impl FfmpegWebmEncoder {
    pub fn new(stream: CombinedStream, options: EncoderOptions) -> EncoderResult<Self> {
        if options.mime_type != "video/webm" {
            return Err(EncoderError::UnsupportedStream(format!(
                "mime type {} (only video/webm)",
                options.mime_type
            )));
        }
        Ok(Self {
            options,
            stream,
            events: None,
            stop: None,
            started: false,
            stopped: false,
        })
    }

    /// FFmpeg arguments for an encode whose audio arrives on `audio_port`
    pub fn args(&self, audio_port: u16) -> Vec<String> {
        let o = &self.options;
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            // Input 0: composited video
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", o.width, o.height),
            "-r".to_string(),
            o.frame_rate.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            // Input 1: mixed audio
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            o.sample_rate.to_string(),
            "-ac".to_string(),
            o.channels.to_string(),
            "-i".to_string(),
            format!("tcp://127.0.0.1:{}", audio_port),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a".to_string(),
            "-c:v".to_string(),
            o.video_codec.clone(),
            "-b:v".to_string(),
            o.video_bits_per_second.to_string(),
            "-deadline".to_string(),
            "realtime".to_string(),
            "-cpu-used".to_string(),
            "8".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            o.audio_codec.clone(),
            "-b:a".to_string(),
            o.audio_bits_per_second.to_string(),
            "-f".to_string(),
            "webm".to_string(),
            "-cluster_time_limit".to_string(),
            "1000".to_string(),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl MediaEncoder for FfmpegWebmEncoder {
    async fn start(&mut self, timeslice: Duration) -> EncoderResult<()> {
        if self.started {
            return Err(EncoderError::AlreadyStarted);
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let audio_port = listener.local_addr()?.port();
        let args = self.args(audio_port);

        tracing::info!("Starting FFmpeg WebM encoder: {:?}", args);

        let mut process = Command::new(&self.options.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stderr".to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(self.options.event_capacity.max(1));

        tokio::spawn(feed_video(
            stdin,
            self.stream.video.clone(),
            self.options.clone(),
            stop_rx.clone(),
        ));
        tokio::spawn(feed_audio(listener, self.stream.audio.clone(), stop_rx));
        let stderr_tail = tokio::spawn(read_tail(stderr));
        tokio::spawn(collect_output(process, stdout, stderr_tail, timeslice, events_tx));

        self.events = Some(events_rx);
        self.stop = Some(stop_tx);
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> EncoderResult<()> {
        let stop = self.stop.as_ref().ok_or(EncoderError::NotStarted)?;
        if !self.stopped {
            tracing::info!("Stopping FFmpeg encoder");
            stop.send_replace(true);
            self.stopped = true;
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<EncoderEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    fn is_active(&self) -> bool {
        self.started && !self.stopped
    }
}

/// Write the newest canvas frame to FFmpeg once per frame interval
///
/// A constant-rate stream keeps the raw video timeline aligned with wall
/// time; frames with the wrong size are replaced by the last good one.
async fn feed_video(mut stdin: ChildStdin, track: MediaTrack, options: EncoderOptions, mut stop: watch::Receiver<bool>) {
    let blank = VideoFrame::solid(options.width, options.height, [0, 0, 0, 255]);
    let mut last: Arc<VideoFrame> = Arc::new(blank);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / options.frame_rate.max(1) as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if !track.is_live() {
            tracing::warn!("Video track ended, closing encoder input");
            break;
        }
        if let Some(frame) = track.latest_frame() {
            if frame.width == options.width && frame.height == options.height && frame.data.len() == frame.expected_len() {
                last = frame;
            }
        }
        if let Err(e) = stdin.write_all(&last.data).await {
            tracing::warn!("Failed to write frame to encoder: {}", e);
            break;
        }
        written += 1;
    }

    if let Err(e) = stdin.shutdown().await {
        tracing::debug!("Encoder stdin already closed: {}", e);
    }
    tracing::info!("Encoder video input closed after {} frames", written);
}

/// Accept FFmpeg's audio connection and stream the mix into it
async fn feed_audio(listener: TcpListener, track: MediaTrack, mut stop: watch::Receiver<bool>) {
    let Some(mut blocks) = track.subscribe_audio() else {
        tracing::error!("Audio track has no sample stream");
        return;
    };

    let mut socket = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::error!("Encoder audio input failed to connect: {}", e);
                return;
            }
        },
        _ = stop.changed() => return,
    };
    tracing::debug!("Encoder audio input connected");

    loop {
        tokio::select! {
            block = blocks.recv() => match block {
                Ok(block) => {
                    let bytes: Vec<u8> = block.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                    if let Err(e) = socket.write_all(&bytes).await {
                        tracing::warn!("Failed to write audio to encoder: {}", e);
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Encoder audio input lagged, {} block(s) skipped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = stop.changed() => break,
        }
    }

    if let Err(e) = socket.shutdown().await {
        tracing::debug!("Encoder audio socket already closed: {}", e);
    }
    tracing::info!("Encoder audio input closed");
}

/// Keep the last few KB of a stream
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(n) = reader.read(&mut buf).await {
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > STDERR_TAIL {
            tail.drain(..tail.len() - STDERR_TAIL);
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Cut stdout into timeslice chunks, then report the process exit
async fn collect_output<R: AsyncRead + Unpin>(
    mut process: Child,
    mut stdout: R,
    stderr_tail: tokio::task::JoinHandle<String>,
    timeslice: Duration,
    events: mpsc::Sender<EncoderEvent>,
) {
    let mut pending = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    total += n as u64;
                }
                Err(e) => {
                    let _ = events.send(EncoderEvent::Error(format!("Failed to read encoder output: {}", e))).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if events.send(EncoderEvent::DataAvailable(std::mem::take(&mut pending))).await.is_err() {
                    tracing::warn!("Encoder output dropped, nobody is listening");
                    break;
                }
            }
        }
    }

    let _ = events.send(EncoderEvent::DataAvailable(pending)).await;

    let status = process.wait().await;
    let tail = stderr_tail.await.unwrap_or_default();
    match status {
        Ok(status) if status.success() => {
            tracing::info!("FFmpeg encoder finished: {} bytes", total);
        }
        Ok(status) => {
            tracing::error!("FFmpeg encoder exited with {}: {}", status, tail);
            let _ = events
                .send(EncoderEvent::Error(format!("FFmpeg exited with {}: {}", status, tail.trim())))
                .await;
        }
        Err(e) => {
            tracing::error!("Failed to wait for FFmpeg: {}", e);
            let _ = events.send(EncoderEvent::Error(format!("Failed to wait for FFmpeg: {}", e))).await;
        }
    }
    let _ = events.send(EncoderEvent::Stopped).await;
}

/// Creates an FFmpeg encoder per recording
#[derive(Debug, Default, Clone)]
pub struct FfmpegEncoderFactory;

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self, stream: CombinedStream, options: &EncoderOptions) -> EncoderResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(FfmpegWebmEncoder::new(stream, options.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn stream() -> CombinedStream {
        CombinedStream::new(MediaTrack::video("canvas"), MediaTrack::audio("mix"))
    }

    #[test]
    fn test_args_encode_webm_at_bitrate() {
        let encoder = FfmpegWebmEncoder::new(stream(), EncoderOptions::default()).unwrap();
        let args = encoder.args(5555);

        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "1920x1080"));
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "30"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "8000000"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libvpx"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "libopus"));
        assert!(args.contains(&"tcp://127.0.0.1:5555".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_rejects_other_containers() {
        let options = EncoderOptions {
            mime_type: "video/mp4".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            FfmpegWebmEncoder::new(stream(), options),
            Err(EncoderError::UnsupportedStream(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let options = EncoderOptions {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-binary"),
            ..Default::default()
        };
        let mut encoder = FfmpegWebmEncoder::new(stream(), options).unwrap();
        assert!(matches!(
            encoder.start(Duration::from_millis(200)).await,
            Err(EncoderError::Ffmpeg(_))
        ));
        assert!(!encoder.is_active());
        assert!(matches!(encoder.stop().await, Err(EncoderError::NotStarted)));
    }
}
