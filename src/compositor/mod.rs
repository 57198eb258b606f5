//! Video compositor
//!
//! A render loop redraws the canvas from the preview surfaces at the display
//! rate, and a separate capture loop publishes the canvas on the output
//! track at the encode rate. Both run until shutdown, whether or not a
//! recording is in progress.

pub mod canvas;
pub mod layout;

use crate::capture::{MediaTrack, Previews, VideoFrame};
use crate::config::CompositorConfig;
use canvas::Canvas;
use layout::{Layer, LayoutPolicy, Placement};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Compositor {
    config: CompositorConfig,
    policy: LayoutPolicy,
    previews: Arc<Previews>,
    canvas: Mutex<Canvas>,
    output: MediaTrack,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    epoch: Instant,
}

impl Compositor {
    pub fn new(config: CompositorConfig, previews: Arc<Previews>) -> Arc<Self> {
        let policy = LayoutPolicy::from_config(&config);
        let canvas = Canvas::new(config.width, config.height);
        Arc::new(Self {
            config,
            policy,
            previews,
            canvas: Mutex::new(canvas),
            output: MediaTrack::video("composited canvas"),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            epoch: Instant::now(),
        })
    }

    pub fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the render and capture loops. Calling again is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let render = {
            let compositor: Weak<Self> = Arc::downgrade(self);
            let period = self.config.render_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match compositor.upgrade() {
                        Some(compositor) => {
                            compositor.render_once();
                        }
                        None => break,
                    }
                }
            })
        };

        let capture = {
            let compositor: Weak<Self> = Arc::downgrade(self);
            let period = self.config.capture_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match compositor.upgrade() {
                        Some(compositor) => {
                            if !compositor.capture_once() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            })
        };

        self.tasks.lock().extend([render, capture]);
        tracing::info!(
            "Compositor started: {}x{}, render {}fps, capture {}fps",
            self.config.width,
            self.config.height,
            self.config.render_fps,
            self.config.capture_fps
        );
    }

    /// Redraw the canvas from the current preview frames
    ///
    /// The layout follows which surfaces are showing; a surface without a
    /// frame yet leaves its area clear.
    pub fn render_once(&self) -> Vec<Placement> {
        let plan = self
            .policy
            .plan(self.previews.screen.is_showing(), self.previews.camera.is_showing());

        let mut canvas = self.canvas.lock();
        canvas.clear();
        for placement in &plan {
            let surface = match placement.layer {
                Layer::Screen => &self.previews.screen,
                Layer::Camera => &self.previews.camera,
            };
            if let Some(frame) = surface.current_frame() {
                canvas.draw_image(&frame, placement.rect);
            }
        }
        plan
    }

    /// Publish the canvas on the output track. Returns `false` once the
    /// track has ended.
    pub fn capture_once(&self) -> bool {
        let timestamp_ms = self.epoch.elapsed().as_secs_f64() * 1000.0;
        let frame = self.canvas.lock().snapshot(timestamp_ms);
        self.output.push_frame(frame)
    }

    /// The current canvas contents
    pub fn snapshot(&self) -> VideoFrame {
        let timestamp_ms = self.epoch.elapsed().as_secs_f64() * 1000.0;
        self.canvas.lock().snapshot(timestamp_ms)
    }

    /// Capturable track of the canvas at the encode rate
    pub fn current_output_track(&self) -> MediaTrack {
        self.output.clone()
    }

    /// Stop both loops and end the output track
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.output.stop();
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Compositor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{CAMERA_COLOR, SCREEN_COLOR};
    use std::time::Duration;

    fn small_config() -> CompositorConfig {
        CompositorConfig {
            width: 192,
            height: 108,
            inset_margin: 1,
            ..Default::default()
        }
    }

    fn showing(color: [u8; 4], width: u32, height: u32) -> MediaTrack {
        let track = MediaTrack::video("test");
        track.push_frame(VideoFrame::solid(width, height, color));
        track
    }

    #[test]
    fn test_blank_when_nothing_active() {
        let compositor = Compositor::new(small_config(), Arc::new(Previews::new()));
        assert!(compositor.render_once().is_empty());
        assert!(compositor.snapshot().data.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_camera_alone_fills_canvas() {
        let previews = Arc::new(Previews::new());
        previews.camera.attach(showing(CAMERA_COLOR, 72, 54));
        let compositor = Compositor::new(small_config(), previews);

        compositor.render_once();
        let frame = compositor.snapshot();
        assert_eq!(frame.pixel(0, 0), Some(CAMERA_COLOR));
        assert_eq!(frame.pixel(191, 107), Some(CAMERA_COLOR));
    }

    #[test]
    fn test_camera_inset_over_screen() {
        let previews = Arc::new(Previews::new());
        previews.screen.attach(showing(SCREEN_COLOR, 192, 108));
        previews.camera.attach(showing(CAMERA_COLOR, 72, 54));
        let compositor = Compositor::new(small_config(), previews);

        compositor.render_once();
        let frame = compositor.snapshot();
        // Inset is 48x27 at (143, 80)
        assert_eq!(frame.pixel(142, 80), Some(SCREEN_COLOR));
        assert_eq!(frame.pixel(143, 80), Some(CAMERA_COLOR));
        assert_eq!(frame.pixel(190, 106), Some(CAMERA_COLOR));
        assert_eq!(frame.pixel(191, 107), Some(SCREEN_COLOR));
        assert_eq!(frame.pixel(0, 0), Some(SCREEN_COLOR));
    }

    #[test]
    fn test_stopped_source_leaves_canvas() {
        let previews = Arc::new(Previews::new());
        let screen = showing(SCREEN_COLOR, 16, 9);
        previews.screen.attach(screen.clone());
        let compositor = Compositor::new(small_config(), previews);

        compositor.render_once();
        screen.stop();
        assert!(compositor.render_once().is_empty());
        assert!(compositor.snapshot().data.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_loops_publish_output() {
        let previews = Arc::new(Previews::new());
        previews.screen.attach(showing(SCREEN_COLOR, 16, 9));
        let compositor = Compositor::new(small_config(), previews);
        let mut frames = compositor.current_output_track().subscribe_frames().unwrap();

        compositor.start();
        compositor.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                frames.changed().await.unwrap();
                let frame = frames.borrow_and_update().clone();
                if frame.is_some_and(|f| f.pixel(0, 0) == Some(SCREEN_COLOR)) {
                    break;
                }
            }
        })
        .await
        .expect("screen should reach the output track");

        compositor.shutdown();
        assert!(!compositor.current_output_track().is_live());
    }
}
