//! Webcam capture using nokhwa
//!
//! The camera is opened and polled on a dedicated thread because nokhwa's
//! capture calls block until the device delivers a frame. Frames are decoded
//! to RGBA and downscaled to the requested width before publishing.

use super::track::{MediaSource, MediaTrack, VideoFrame};
use super::traits::{CaptureError, CaptureResult, VideoConstraints};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::time::Instant;
use tokio::sync::oneshot;

/// Open the default camera
pub async fn open(constraints: &VideoConstraints) -> CaptureResult<MediaSource> {
    let target_width = constraints.width;
    let track = MediaTrack::video("camera");
    let producer = track.clone();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    std::thread::spawn(move || {
        let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = match Camera::new(CameraIndex::Index(0), format) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("Failed to open camera: {:?}", e)));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = ready_tx.send(Err(format!("Failed to open camera stream: {:?}", e)));
            return;
        }

        let camera_format = camera.camera_format();
        tracing::info!(
            "Webcam opened: {}x{} @ {}fps",
            camera_format.resolution().width(),
            camera_format.resolution().height(),
            camera_format.frame_rate()
        );
        let _ = ready_tx.send(Ok(()));

        let started = Instant::now();
        let mut frames: u64 = 0;
        while producer.is_live() {
            let buffer = match camera.frame() {
                Ok(buffer) => buffer,
                Err(e) => {
                    tracing::warn!("Webcam frame error, ending capture: {:?}", e);
                    break;
                }
            };
            let image = match buffer.decode_image::<RgbAFormat>() {
                Ok(image) => image,
                Err(e) => {
                    tracing::debug!("Failed to decode webcam frame: {:?}", e);
                    continue;
                }
            };
            let (width, height) = (image.width(), image.height());
            let frame = VideoFrame::new(
                width,
                height,
                image.into_raw(),
                started.elapsed().as_secs_f64() * 1000.0,
            );
            let frame = match target_width {
                Some(target) if target < width => downscale(&frame, target),
                _ => frame,
            };
            if !producer.push_frame(frame) {
                break;
            }
            frames += 1;
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
        tracing::info!("Webcam captured {} frames", frames);
        producer.stop();
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(MediaSource::new(vec![track])),
        Ok(Err(message)) => {
            track.stop();
            Err(CaptureError::DeviceNotFound(message))
        }
        Err(_) => {
            track.stop();
            Err(CaptureError::Platform("webcam thread exited before opening".to_string()))
        }
    }
}

/// Nearest-neighbour downscale keeping the aspect ratio
fn downscale(frame: &VideoFrame, target_width: u32) -> VideoFrame {
    let target_height = (frame.height as u64 * target_width as u64 / frame.width as u64).max(1) as u32;
    let mut data = Vec::with_capacity(target_width as usize * target_height as usize * 4);
    for y in 0..target_height {
        let src_y = (y as u64 * frame.height as u64 / target_height as u64) as usize;
        for x in 0..target_width {
            let src_x = (x as u64 * frame.width as u64 / target_width as u64) as usize;
            let idx = (src_y * frame.width as usize + src_x) * 4;
            data.extend_from_slice(&frame.data[idx..idx + 4]);
        }
    }
    VideoFrame::new(target_width, target_height, data, frame.timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_keeps_aspect() {
        let frame = VideoFrame::solid(1280, 720, [1, 2, 3, 255]);
        let scaled = downscale(&frame, 720);
        assert_eq!((scaled.width, scaled.height), (720, 405));
        assert_eq!(scaled.data.len(), scaled.expected_len());
        assert_eq!(scaled.pixel(719, 404), Some([1, 2, 3, 255]));
    }
}
