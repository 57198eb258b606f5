//! Screen capture through FFmpeg
//!
//! FFmpeg grabs the desktop with the platform's device (x11grab, avfoundation,
//! gdigrab), scales it to the requested size and writes raw RGBA frames to
//! stdout. The grab process exiting on its own (display gone, share ended by
//! the OS) ends the track, which the registry treats as a revocation.

use super::track::{MediaSource, MediaTrack, VideoFrame};
use super::traits::{CaptureError, CaptureResult, VideoConstraints};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Screen grabber backed by an FFmpeg subprocess
pub struct FfmpegScreenCapture {
    binary: PathBuf,
    device: Option<String>,
}

impl FfmpegScreenCapture {
    pub fn new(binary: PathBuf, device: Option<String>) -> Self {
        Self { binary, device }
    }

    /// Platform input arguments, up to and including `-i <device>`
    fn input_args(&self, frame_rate: u32) -> Vec<String> {
        let fps = frame_rate.to_string();

        #[cfg(target_os = "macos")]
        {
            let device = self.device.clone().unwrap_or_else(|| "1:none".to_string());
            vec![
                "-f".into(),
                "avfoundation".into(),
                "-capture_cursor".into(),
                "1".into(),
                "-framerate".into(),
                fps,
                "-i".into(),
                device,
            ]
        }

        #[cfg(target_os = "windows")]
        {
            let device = self.device.clone().unwrap_or_else(|| "desktop".to_string());
            vec![
                "-f".into(),
                "gdigrab".into(),
                "-framerate".into(),
                fps,
                "-i".into(),
                device,
            ]
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let device = self
                .device
                .clone()
                .or_else(|| std::env::var("DISPLAY").ok())
                .unwrap_or_else(|| ":0.0".to_string());
            vec![
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                fps,
                "-i".into(),
                device,
            ]
        }
    }

    /// Full FFmpeg argument list for a grab at `width`x`height`
    fn args(&self, width: u32, height: u32, frame_rate: u32) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-loglevel".into(), "error".into()];
        args.extend(self.input_args(frame_rate));
        args.extend([
            "-vf".to_string(),
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2:black",
                width, height, width, height
            ),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "pipe:1".into(),
        ]);
        args
    }

    /// Start a grab and return a source with one video track
    pub async fn open(&self, constraints: &VideoConstraints) -> CaptureResult<MediaSource> {
        let width = constraints.width.unwrap_or(1920);
        let height = constraints.height.unwrap_or(1080);
        let frame_rate = constraints.frame_rate.unwrap_or(60);
        let args = self.args(width, height, frame_rate);

        tracing::info!("Starting FFmpeg screen grab: {:?}", args);

        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::NotSupported(format!("FFmpeg not found at {:?}", self.binary))
                }
                _ => CaptureError::Platform(format!("Failed to start FFmpeg screen grab: {}", e)),
            })?;

        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Platform("Failed to capture FFmpeg stdout".to_string()))?;

        let track = MediaTrack::video("screen");
        let producer = track.clone();
        let frame_size = width as usize * height as usize * 4;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut buffer = vec![0u8; frame_size];
            let mut frames: u64 = 0;

            loop {
                tokio::select! {
                    read = stdout.read_exact(&mut buffer) => {
                        if let Err(e) = read {
                            tracing::info!("Screen grab ended after {} frames: {}", frames, e);
                            break;
                        }
                        let frame = VideoFrame::new(
                            width,
                            height,
                            buffer.clone(),
                            started.elapsed().as_secs_f64() * 1000.0,
                        );
                        if !producer.push_frame(frame) {
                            break;
                        }
                        frames += 1;
                    }
                    _ = producer.ended() => break,
                }
            }

            if let Err(e) = process.start_kill() {
                tracing::debug!("Screen grab already exited: {}", e);
            }
            match process.wait_with_output().await {
                Ok(output) if !output.status.success() && producer.is_live() => {
                    tracing::warn!(
                        "FFmpeg screen grab exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to reap FFmpeg screen grab: {}", e),
            }
            // Stopping here covers the process dying on its own.
            producer.stop();
        });

        Ok(MediaSource::new(vec![track]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_scale_and_emit_rgba() {
        let grab = FfmpegScreenCapture::new(PathBuf::from("ffmpeg"), Some("test-device".into()));
        let args = grab.args(1920, 1080, 60);

        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "test-device");
        let fr = args.iter().position(|a| a == "-framerate").unwrap();
        assert_eq!(args[fr + 1], "60");
        assert!(args.iter().any(|a| a.starts_with("scale=1920:1080")));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "rgba"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_supported() {
        let grab = FfmpegScreenCapture::new(PathBuf::from("/nonexistent/ffmpeg-binary"), None);
        let result = grab.open(&VideoConstraints::default()).await;
        assert!(matches!(result, Err(CaptureError::NotSupported(_))));
    }
}
