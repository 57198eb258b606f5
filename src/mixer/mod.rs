//! Audio mixing graph
//!
//! One process-wide graph sums an always-on oscillator and, when enabled,
//! the microphone into a single destination track. The graph is built lazily
//! on first use and never torn down; the microphone is connected and
//! disconnected in place, so a consumer that bound the destination track
//! once keeps hearing the current mix.

pub mod node;
pub mod oscillator;

use crate::capture::{AudioBuffer, CaptureKind, MediaSource, MediaTrack, SourceObserver};
use crate::config::AudioConfig;
use node::{LiveInput, MixNode, ToneNode};
use oscillator::Waveform;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// How often the render loop wakes to catch up with the clock
const RENDER_TICK: Duration = Duration::from_millis(10);
/// Never render more than this far behind; older time is skipped
const MAX_CATCH_UP: Duration = Duration::from_millis(500);

static SHARED: OnceLock<Arc<AudioMixingGraph>> = OnceLock::new();

struct GraphContext {
    destination: MediaTrack,
}

struct Nodes {
    tone: Option<ToneNode>,
    microphone: Option<LiveInput>,
    rendered_frames: u64,
}

pub struct AudioMixingGraph {
    config: AudioConfig,
    context: OnceLock<GraphContext>,
    nodes: Mutex<Nodes>,
}

impl AudioMixingGraph {
    /// A private graph. Most callers want [`AudioMixingGraph::shared`].
    pub fn new(config: AudioConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            context: OnceLock::new(),
            nodes: Mutex::new(Nodes {
                tone: None,
                microphone: None,
                rendered_frames: 0,
            }),
        })
    }

    /// The process-wide graph. `config` only applies to the first call.
    pub fn shared(config: AudioConfig) -> Arc<Self> {
        SHARED.get_or_init(|| Self::new(config)).clone()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn is_built(&self) -> bool {
        self.context.get().is_some()
    }

    /// Build the graph on first call and return its destination track
    ///
    /// The oscillator is connected before the destination is published, so
    /// the output always has at least one source.
    pub fn ensure_graph(self: &Arc<Self>) -> MediaTrack {
        let context = self.context.get_or_init(|| {
            self.nodes.lock().tone = Some(ToneNode::new(
                Waveform::Square,
                self.config.oscillator_frequency,
                self.config.sample_rate,
            ));
            let destination = MediaTrack::audio("mixed audio");
            tracing::info!(
                "Audio graph built: {}Hz, {} channel(s), quantum {}",
                self.config.sample_rate,
                self.config.channels,
                self.config.render_quantum
            );
            self.spawn_render_loop();
            GraphContext { destination }
        });
        context.destination.clone()
    }

    /// Destination track, if the graph has been built
    pub fn output_track(&self) -> Option<MediaTrack> {
        self.context.get().map(|c| c.destination.clone())
    }

    /// Connect a live microphone track, replacing any connected one
    ///
    /// An ended track is refused. Its source stops the track before
    /// detaching, so a late attach cannot outlive the toggle-off. Returns
    /// whether the track is connected afterwards.
    pub fn attach_microphone(&self, track: MediaTrack) -> bool {
        let mut nodes = self.nodes.lock();
        if !track.is_live() {
            tracing::debug!("Ignoring ended microphone track: {}", track.label());
            return false;
        }
        if nodes.microphone.as_ref().is_some_and(|m| m.track() == &track) {
            return true;
        }
        tracing::info!("Microphone connected to mix: {}", track.label());
        nodes.microphone = Some(LiveInput::new(track, self.config.sample_rate, self.config.channels));
        true
    }

    /// Disconnect the microphone. The oscillator stays connected.
    pub fn detach_microphone(&self) {
        if self.nodes.lock().microphone.take().is_some() {
            tracing::info!("Microphone disconnected from mix");
        }
    }

    pub fn has_synthetic_source(&self) -> bool {
        self.nodes.lock().tone.is_some()
    }

    pub fn has_microphone(&self) -> bool {
        self.nodes.lock().microphone.is_some()
    }

    pub fn connected_node_count(&self) -> usize {
        let nodes = self.nodes.lock();
        nodes.tone.iter().count() + nodes.microphone.iter().count()
    }

    /// Render one quantum and publish it on the destination
    ///
    /// Returns `None` until the graph is built.
    pub fn render_quantum(&self) -> Option<AudioBuffer> {
        let context = self.context.get()?;
        let channels = self.config.channels;
        let mut block = vec![0.0f32; self.config.render_quantum * channels as usize];

        {
            let mut nodes = self.nodes.lock();
            if let Some(tone) = nodes.tone.as_mut() {
                tone.render_add(&mut block, channels);
            }
            if let Some(mic) = nodes.microphone.as_mut() {
                if mic.track().is_live() {
                    mic.render_add(&mut block, channels);
                }
            }
            nodes.rendered_frames += self.config.render_quantum as u64;
        }

        for sample in block.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        let buffer = AudioBuffer::new(self.config.sample_rate, channels, block);
        context.destination.push_audio(buffer.clone());
        Some(buffer)
    }

    pub fn rendered_frames(&self) -> u64 {
        self.nodes.lock().rendered_frames
    }

    fn spawn_render_loop(self: &Arc<Self>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime, audio graph will only render on demand");
                return;
            }
        };

        let graph: Weak<Self> = Arc::downgrade(self);
        let sample_rate = self.config.sample_rate as f64;
        let quantum = self.config.render_quantum as u64;
        handle.spawn(async move {
            let started = Instant::now();
            let mut skipped_frames: u64 = 0;
            let mut ticker = tokio::time::interval(RENDER_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(graph) = graph.upgrade() else {
                    break;
                };
                let due = (started.elapsed().as_secs_f64() * sample_rate) as u64;
                let mut rendered = graph.rendered_frames() + skipped_frames;
                let limit = (MAX_CATCH_UP.as_secs_f64() * sample_rate) as u64;
                if due.saturating_sub(rendered) > limit {
                    let skip = due - rendered - limit;
                    tracing::debug!("Audio graph fell behind, skipping {} frames", skip);
                    skipped_frames += skip;
                    rendered += skip;
                }
                while rendered + quantum <= due {
                    if graph.render_quantum().is_none() {
                        break;
                    }
                    rendered += quantum;
                }
            }
        });
    }
}

impl SourceObserver for AudioMixingGraph {
    fn source_started(&self, kind: CaptureKind, source: &MediaSource) {
        if kind != CaptureKind::Microphone || !self.is_built() {
            return;
        }
        if let Some(track) = source.audio_track() {
            self.attach_microphone(track.clone());
        }
    }

    fn source_stopped(&self, kind: CaptureKind) {
        if kind == CaptureKind::Microphone {
            self.detach_microphone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            channels: 1,
            render_quantum: 4,
            oscillator_frequency: 0.0,
        }
    }

    #[test]
    fn test_graph_is_built_once_with_oscillator() {
        let graph = AudioMixingGraph::new(test_config());
        assert!(graph.output_track().is_none());
        assert!(graph.render_quantum().is_none());

        let first = graph.ensure_graph();
        let second = graph.ensure_graph();
        assert_eq!(first, second);
        assert!(graph.has_synthetic_source());
        assert_eq!(graph.connected_node_count(), 1);
    }

    #[test]
    fn test_silent_oscillator_renders_zeros() {
        let graph = AudioMixingGraph::new(test_config());
        graph.ensure_graph();
        let block = graph.render_quantum().unwrap();
        assert_eq!(block.frames(), 4);
        assert!(block.is_silent());
    }

    #[test]
    fn test_microphone_attach_detach_keeps_oscillator() {
        let graph = AudioMixingGraph::new(test_config());
        graph.ensure_graph();

        let mic = MediaTrack::audio("mic");
        graph.attach_microphone(mic.clone());
        graph.attach_microphone(mic.clone());
        assert_eq!(graph.connected_node_count(), 2);

        mic.push_audio(AudioBuffer::new(8_000, 1, vec![0.5, 2.0, -3.0, 0.1]));
        let block = graph.render_quantum().unwrap();
        assert_eq!(block.samples, vec![0.5, 1.0, -1.0, 0.1]);

        graph.detach_microphone();
        assert!(graph.has_synthetic_source());
        assert!(!graph.has_microphone());
        assert_eq!(graph.connected_node_count(), 1);
    }

    #[test]
    fn test_ended_microphone_is_not_attached() {
        let graph = AudioMixingGraph::new(test_config());
        graph.ensure_graph();

        let mic = MediaTrack::audio("mic");
        mic.stop();
        assert!(!graph.attach_microphone(mic));
        assert!(!graph.has_microphone());
        assert_eq!(graph.connected_node_count(), 1);
    }

    #[test]
    fn test_observer_ignores_microphone_before_graph_exists() {
        let graph = AudioMixingGraph::new(test_config());
        let source = MediaSource::new(vec![MediaTrack::audio("mic")]);

        graph.source_started(CaptureKind::Microphone, &source);
        assert!(!graph.has_microphone());

        graph.ensure_graph();
        graph.source_started(CaptureKind::Microphone, &source);
        assert!(graph.has_microphone());
        graph.source_stopped(CaptureKind::Microphone);
        assert!(!graph.has_microphone());
    }

    #[tokio::test]
    async fn test_render_loop_publishes_blocks() {
        let graph = AudioMixingGraph::new(test_config());
        let output = graph.ensure_graph();
        let mut rx = output.subscribe_audio().unwrap();

        let block = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("render loop should publish")
            .unwrap();
        assert_eq!(block.channels, 1);
        assert!(graph.rendered_frames() > 0);
    }
}
