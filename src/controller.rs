//! Session controller
//!
//! The single state machine behind the control surface. Four toggles, each
//! returning immediately with a handle to the spawned work, and a status
//! snapshot that subscribers see change as that work lands.

use crate::capture::{
    preview, CaptureError, CaptureKind, MediaDevices, Previews, SourceEvent, SourceObserver, SourceRegistry,
};
use crate::compositor::Compositor;
use crate::config::RecorderConfig;
use crate::encoder::{CombinedStream, EncoderFactory, EncoderOptions};
use crate::mixer::AudioMixingGraph;
use crate::recorder::{RecordingEvent, RecordingSession, RecordingStatus, SessionSetup};
use crate::sink::{DestinationPicker, SavePickerOptions};
use crate::utils::error::{AppError, AppResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// External collaborators the controller drives
pub struct Backends {
    pub devices: Arc<dyn MediaDevices>,
    pub picker: Arc<dyn DestinationPicker>,
    pub encoders: Arc<dyn EncoderFactory>,
}

/// What the control surface shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub camera: bool,
    pub screen: bool,
    pub microphone: bool,
    pub recording: RecordingStatus,
}

impl ControllerStatus {
    pub fn is_recording(&self) -> bool {
        self.recording.is_busy()
    }

    pub fn is_active(&self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Camera => self.camera,
            CaptureKind::Screen => self.screen,
            CaptureKind::Microphone => self.microphone,
        }
    }
}

struct ControllerInner {
    config: RecorderConfig,
    runtime: Handle,
    registry: Arc<SourceRegistry>,
    previews: Arc<Previews>,
    graph: Arc<AudioMixingGraph>,
    compositor: Arc<Compositor>,
    picker: Arc<dyn DestinationPicker>,
    encoders: Arc<dyn EncoderFactory>,
    recording: tokio::sync::Mutex<Option<RecordingSession>>,
    recording_status: Arc<watch::Sender<RecordingStatus>>,
    recording_events: broadcast::Sender<RecordingEvent>,
    status: watch::Sender<ControllerStatus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-clone handle to the recorder
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Build a controller on the process-wide audio graph
    ///
    /// Must be called from within a tokio runtime; the compositor starts
    /// immediately so previews update before any recording. Fails on a
    /// config that `RecorderConfig::validate` rejects.
    pub fn new(config: RecorderConfig, backends: Backends) -> AppResult<Self> {
        let graph = AudioMixingGraph::shared(config.audio.clone());
        Self::with_graph(config, backends, graph)
    }

    /// Build a controller on a specific audio graph
    pub fn with_graph(config: RecorderConfig, backends: Backends, graph: Arc<AudioMixingGraph>) -> AppResult<Self> {
        config.validate()?;
        let previews = Arc::new(Previews::new());
        let registry = SourceRegistry::new(
            backends.devices,
            config.capture.clone(),
            vec![
                previews.clone() as Arc<dyn SourceObserver>,
                graph.clone() as Arc<dyn SourceObserver>,
            ],
        );
        let compositor = Compositor::new(config.compositor.clone(), previews.clone());
        compositor.start();

        let (recording_status, _) = watch::channel(RecordingStatus::Idle);
        let (recording_events, _) = broadcast::channel(64);
        let (status, _) = watch::channel(ControllerStatus::default());

        let inner = Arc::new(ControllerInner {
            config,
            runtime: Handle::current(),
            registry,
            previews,
            graph,
            compositor,
            picker: backends.picker,
            encoders: backends.encoders,
            recording: tokio::sync::Mutex::new(None),
            recording_status: Arc::new(recording_status),
            recording_events,
            status,
            pump: Mutex::new(None),
        });
        let pump = spawn_status_pump(&inner);
        *inner.pump.lock() = Some(pump);

        tracing::info!("Session controller ready");
        Ok(Self { inner })
    }

    pub fn toggle_camera(&self) -> JoinHandle<AppResult<bool>> {
        self.toggle_source(CaptureKind::Camera)
    }

    pub fn toggle_screen(&self) -> JoinHandle<AppResult<bool>> {
        self.toggle_source(CaptureKind::Screen)
    }

    pub fn toggle_microphone(&self) -> JoinHandle<AppResult<bool>> {
        self.toggle_source(CaptureKind::Microphone)
    }

    /// Flip a source. The handle resolves to whether it is active afterwards.
    pub fn toggle_source(&self, kind: CaptureKind) -> JoinHandle<AppResult<bool>> {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let result = inner.registry.toggle(kind).await;
            inner.refresh();
            result.map_err(AppError::from)
        })
    }

    /// Start a recording when idle, otherwise stop the current one
    ///
    /// The handle resolves to the status the toggle moved to. Toggles are
    /// serialized, so a toggle issued while a start is pending stops that
    /// recording instead of starting a second one.
    pub fn toggle_recording(&self) -> JoinHandle<AppResult<RecordingStatus>> {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move { inner.toggle_recording().await })
    }

    pub fn status(&self) -> ControllerStatus {
        self.inner.current_status()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.inner.status.subscribe()
    }

    pub fn watch_recording(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.recording_events.subscribe()
    }

    pub fn source_events(&self) -> broadcast::Receiver<SourceEvent> {
        self.inner.registry.subscribe()
    }

    /// Resolve once no recording occupies the slot
    pub async fn recording_idle(&self) {
        let mut status = self.inner.recording_status.subscribe();
        let _ = status.wait_for(|s| *s == RecordingStatus::Idle).await;
    }

    /// Save the current camera or screen preview as a PNG
    pub fn snapshot(&self, kind: CaptureKind, path: &Path) -> AppResult<()> {
        let surface = self
            .inner
            .previews
            .for_kind(kind)
            .ok_or_else(|| CaptureError::NotSupported(format!("{} has no preview", kind)))?;
        surface.snapshot_png(path)?;
        Ok(())
    }

    /// Save the composited canvas as a PNG
    pub fn snapshot_canvas(&self, path: &Path) -> AppResult<()> {
        preview::write_png(&self.inner.compositor.snapshot(), path)?;
        tracing::info!("Saved canvas snapshot to {:?}", path);
        Ok(())
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.inner.registry
    }

    pub fn previews(&self) -> &Arc<Previews> {
        &self.inner.previews
    }

    pub fn graph(&self) -> &Arc<AudioMixingGraph> {
        &self.inner.graph
    }

    pub fn compositor(&self) -> &Arc<Compositor> {
        &self.inner.compositor
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    /// Stop every source, finish any recording and stop the compositor
    pub async fn shutdown(&self) -> AppResult<()> {
        tracing::info!("Shutting down session controller");
        let session = {
            let mut slot = self.inner.recording.lock().await;
            slot.take()
        };
        let result = match session {
            Some(mut session) if !session.is_finished() => {
                session.request_stop();
                session.wait().await.map(|_| ()).map_err(AppError::from)
            }
            _ => Ok(()),
        };

        self.inner.registry.stop_all();
        self.inner.compositor.shutdown();
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.refresh();
        result
    }
}

impl ControllerInner {
    fn current_status(&self) -> ControllerStatus {
        ControllerStatus {
            camera: self.registry.is_active(CaptureKind::Camera),
            screen: self.registry.is_active(CaptureKind::Screen),
            microphone: self.registry.is_active(CaptureKind::Microphone),
            recording: *self.recording_status.borrow(),
        }
    }

    /// Publish the current status if it changed
    fn refresh(&self) {
        let current = self.current_status();
        self.status.send_if_modified(|status| {
            if *status == current {
                false
            } else {
                *status = current;
                true
            }
        });
    }

    async fn toggle_recording(&self) -> AppResult<RecordingStatus> {
        let mut slot = self.recording.lock().await;

        if let Some(session) = slot.as_mut() {
            if !session.is_finished() {
                if session.request_stop() {
                    tracing::info!("Stopping recording {}", session.id());
                } else {
                    tracing::debug!("Recording {} already finalizing", session.id());
                }
                return Ok(RecordingStatus::Finalizing);
            }
        }
        *slot = None;

        // The mix is bound once; later microphone toggles reach it in place
        let audio = self.graph.ensure_graph();
        if let Some(mic) = self
            .registry
            .source(CaptureKind::Microphone)
            .and_then(|source| source.audio_track().cloned())
        {
            self.graph.attach_microphone(mic);
        }
        let stream = CombinedStream::new(self.compositor.current_output_track(), audio);

        let setup = SessionSetup {
            stream,
            picker: self.picker.as_ref(),
            picker_options: SavePickerOptions::from_config(&self.config.sink),
            encoders: self.encoders.as_ref(),
            encoder_options: EncoderOptions::from_config(&self.config),
            timeslice: self.config.encoder.timeslice(),
            queue_capacity: self.config.sink.queue_capacity,
            status: self.recording_status.clone(),
            events: self.recording_events.clone(),
        };

        let result = RecordingSession::start(setup).await;
        let outcome = match result {
            Ok(session) => {
                *slot = Some(session);
                Ok(RecordingStatus::Recording)
            }
            Err(e) => {
                tracing::warn!("Recording did not start: {}", e);
                Err(e.into())
            }
        };
        drop(slot);
        self.refresh();
        outcome
    }
}

/// Keep the published status in step with registry and recording changes,
/// including ones nobody toggled (revocations, session failures)
fn spawn_status_pump(inner: &Arc<ControllerInner>) -> JoinHandle<()> {
    let weak: Weak<ControllerInner> = Arc::downgrade(inner);
    let mut sources = inner.registry.subscribe();
    let mut recording = inner.recording_status.subscribe();
    inner.runtime.spawn(async move {
        loop {
            tokio::select! {
                event = sources.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = event {
                        break;
                    }
                }
                changed = recording.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            match weak.upgrade() {
                Some(inner) => inner.refresh(),
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticDevices;
    use crate::config::CompositorConfig;
    use crate::encoder::ScriptedEncoderFactory;
    use crate::sink::MemoryPicker;

    fn controller(picker: MemoryPicker, encoders: ScriptedEncoderFactory) -> SessionController {
        let config = RecorderConfig {
            compositor: CompositorConfig {
                width: 64,
                height: 36,
                ..Default::default()
            },
            ..Default::default()
        };
        let graph = AudioMixingGraph::new(config.audio.clone());
        SessionController::with_graph(
            config,
            Backends {
                devices: Arc::new(SyntheticDevices::new()),
                picker: Arc::new(picker),
                encoders: Arc::new(encoders),
            },
            graph,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = RecorderConfig {
            encoder: crate::config::EncoderConfig {
                timeslice_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let graph = AudioMixingGraph::new(config.audio.clone());
        let result = SessionController::with_graph(
            config,
            Backends {
                devices: Arc::new(SyntheticDevices::new()),
                picker: Arc::new(MemoryPicker::new()),
                encoders: Arc::new(ScriptedEncoderFactory::new(vec![])),
            },
            graph,
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_source_toggles_update_status() {
        let controller = controller(MemoryPicker::new(), ScriptedEncoderFactory::new(vec![]));
        let mut status = controller.subscribe();

        assert!(controller.toggle_camera().await.unwrap().unwrap());
        assert!(controller.status().camera);
        status.wait_for(|s| s.camera).await.unwrap();

        assert!(!controller.toggle_camera().await.unwrap().unwrap());
        assert!(!controller.status().camera);
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recording_binds_canvas_and_mix() {
        let encoders = ScriptedEncoderFactory::new(vec![1]);
        let controller = controller(MemoryPicker::new(), encoders.clone());

        let status = controller.toggle_recording().await.unwrap().unwrap();
        assert_eq!(status, RecordingStatus::Recording);

        let streams = encoders.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].video, controller.compositor().current_output_track());
        assert_eq!(Some(streams[0].audio.clone()), controller.graph().output_track());

        let status = controller.toggle_recording().await.unwrap().unwrap();
        assert_eq!(status, RecordingStatus::Finalizing);
        controller.recording_idle().await;
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_microphone_snapshot_is_not_supported() {
        let controller = controller(MemoryPicker::new(), ScriptedEncoderFactory::new(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let result = controller.snapshot(CaptureKind::Microphone, &dir.path().join("mic.png"));
        assert!(matches!(result, Err(AppError::Capture(CaptureError::NotSupported(_)))));
        controller.shutdown().await.unwrap();
    }
}
