//! Source registry
//!
//! Holds at most one active source per capture kind. Toggling an active kind
//! stops its tracks synchronously; toggling an inactive kind issues an
//! acquisition and stores the result once it resolves. A source ended from
//! outside (e.g. the OS stops a screen share) is treated exactly like a
//! toggle-off.

use super::track::MediaSource;
use super::traits::{CaptureKind, CaptureResult, MediaConstraints, MediaDevices, SourceObserver};
use crate::config::CaptureConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Changes to the active set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SourceEvent {
    Activated { kind: CaptureKind },
    Deactivated { kind: CaptureKind },
    /// Ended from outside the application
    Revoked { kind: CaptureKind },
    Failed { kind: CaptureKind, message: String },
}

struct Entry {
    source: MediaSource,
    generation: u64,
}

#[derive(Default)]
struct Entries {
    active: HashMap<CaptureKind, Entry>,
    next_generation: u64,
}

/// Why an entry is being released
#[derive(Debug, Clone, Copy)]
enum Release {
    Toggled,
    Revoked,
    Shutdown,
}

pub struct SourceRegistry {
    devices: Arc<dyn MediaDevices>,
    config: CaptureConfig,
    observers: Vec<Arc<dyn SourceObserver>>,
    entries: Mutex<Entries>,
    events: broadcast::Sender<SourceEvent>,
}

impl SourceRegistry {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        config: CaptureConfig,
        observers: Vec<Arc<dyn SourceObserver>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            devices,
            config,
            observers,
            entries: Mutex::new(Entries::default()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self, kind: CaptureKind) -> bool {
        self.entries.lock().active.contains_key(&kind)
    }

    pub fn active_kinds(&self) -> Vec<CaptureKind> {
        let entries = self.entries.lock();
        CaptureKind::ALL
            .into_iter()
            .filter(|kind| entries.active.contains_key(kind))
            .collect()
    }

    pub fn source(&self, kind: CaptureKind) -> Option<MediaSource> {
        self.entries.lock().active.get(&kind).map(|e| e.source.clone())
    }

    /// Flip a kind on or off. Returns whether the kind is active afterwards.
    ///
    /// Turning off always succeeds. Turning on fails when acquisition fails,
    /// leaving the kind inactive.
    pub async fn toggle(self: &Arc<Self>, kind: CaptureKind) -> CaptureResult<bool> {
        if self.stop(kind) {
            return Ok(false);
        }
        self.activate(kind).await?;
        Ok(true)
    }

    /// Stop a kind if it is active. Returns whether anything was stopped.
    pub fn stop(&self, kind: CaptureKind) -> bool {
        let removed = self.entries.lock().active.remove(&kind);
        match removed {
            Some(entry) => {
                self.release(kind, entry.source, Release::Toggled);
                true
            }
            None => false,
        }
    }

    /// Stop every active kind
    pub fn stop_all(&self) {
        let drained: Vec<(CaptureKind, Entry)> = self.entries.lock().active.drain().collect();
        for (kind, entry) in drained {
            self.release(kind, entry.source, Release::Shutdown);
        }
    }

    async fn activate(self: &Arc<Self>, kind: CaptureKind) -> CaptureResult<()> {
        let constraints = MediaConstraints::for_kind(kind, &self.config);
        tracing::debug!("Acquiring {} with {:?}", kind, constraints);

        let source = match self.devices.acquire(kind, &constraints).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Failed to acquire {}: {}", kind, e);
                let _ = self.events.send(SourceEvent::Failed {
                    kind,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let (generation, replaced) = {
            let mut entries = self.entries.lock();
            entries.next_generation += 1;
            let generation = entries.next_generation;
            let replaced = entries.active.insert(
                kind,
                Entry {
                    source: source.clone(),
                    generation,
                },
            );
            (generation, replaced)
        };

        // Two acquisitions raced; the later one wins and the earlier tracks
        // must not stay live.
        if let Some(previous) = replaced {
            tracing::warn!("{} acquired twice, releasing the earlier source", kind);
            previous.source.stop();
        }

        for observer in &self.observers {
            observer.source_started(kind, &source);
        }
        self.watch_for_revocation(kind, source.clone(), generation);

        tracing::info!("{} active ({} track(s))", kind, source.tracks().len());
        let _ = self.events.send(SourceEvent::Activated { kind });
        Ok(())
    }

    fn watch_for_revocation(self: &Arc<Self>, kind: CaptureKind, source: MediaSource, generation: u64) {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            source.ended().await;
            if let Some(registry) = registry.upgrade() {
                registry.handle_ended(kind, generation);
            }
        });
    }

    /// A source ended. If it is still the registered one, nobody inside the
    /// application stopped it.
    fn handle_ended(&self, kind: CaptureKind, generation: u64) {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.active.get(&kind) {
                Some(entry) if entry.generation == generation => entries.active.remove(&kind),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            self.release(kind, entry.source, Release::Revoked);
        }
    }

    fn release(&self, kind: CaptureKind, source: MediaSource, reason: Release) {
        source.stop();
        for observer in &self.observers {
            observer.source_stopped(kind);
        }

        let event = match reason {
            Release::Revoked => {
                tracing::warn!("{} ended externally, marking inactive", kind);
                SourceEvent::Revoked { kind }
            }
            Release::Toggled | Release::Shutdown => {
                tracing::info!("{} stopped ({:?})", kind, reason);
                SourceEvent::Deactivated { kind }
            }
        };
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::preview::Previews;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::capture::traits::CaptureError;
    use std::time::Duration;

    fn registry_with(devices: Arc<SyntheticDevices>) -> (Arc<SourceRegistry>, Arc<Previews>) {
        let previews = Arc::new(Previews::new());
        let registry = SourceRegistry::new(
            devices,
            CaptureConfig::default(),
            vec![previews.clone() as Arc<dyn SourceObserver>],
        );
        (registry, previews)
    }

    #[tokio::test]
    async fn test_toggle_pairs_cancel() {
        let devices = Arc::new(SyntheticDevices::new());
        let (registry, _) = registry_with(devices.clone());

        assert!(registry.toggle(CaptureKind::Camera).await.unwrap());
        assert!(registry.toggle(CaptureKind::Microphone).await.unwrap());
        assert!(!registry.toggle(CaptureKind::Camera).await.unwrap());

        assert_eq!(registry.active_kinds(), vec![CaptureKind::Microphone]);
        for source in devices.issued(CaptureKind::Camera) {
            assert!(!source.is_live());
        }
    }

    #[tokio::test]
    async fn test_failed_acquisition_stays_inactive() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.deny(CaptureKind::Screen);
        let (registry, previews) = registry_with(devices.clone());
        let mut events = registry.subscribe();

        let result = registry.toggle(CaptureKind::Screen).await;
        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
        assert!(!registry.is_active(CaptureKind::Screen));
        assert!(!previews.screen.is_showing());
        assert!(matches!(events.recv().await.unwrap(), SourceEvent::Failed { kind: CaptureKind::Screen, .. }));

        devices.allow(CaptureKind::Screen);
        assert!(registry.toggle(CaptureKind::Screen).await.unwrap());
        assert!(previews.screen.is_showing());
    }

    #[tokio::test]
    async fn test_external_revocation_marks_inactive() {
        let devices = Arc::new(SyntheticDevices::new());
        let (registry, previews) = registry_with(devices.clone());
        let mut events = registry.subscribe();

        registry.toggle(CaptureKind::Screen).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Activated { kind: CaptureKind::Screen });

        assert!(devices.revoke(CaptureKind::Screen));
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("revocation should be observed")
            .unwrap();
        assert_eq!(event, SourceEvent::Revoked { kind: CaptureKind::Screen });
        assert!(!registry.is_active(CaptureKind::Screen));
        assert!(!previews.screen.is_showing());
    }

    #[tokio::test]
    async fn test_explicit_stop_is_not_reported_as_revocation() {
        let devices = Arc::new(SyntheticDevices::new());
        let (registry, _) = registry_with(devices);
        let mut events = registry.subscribe();

        registry.toggle(CaptureKind::Camera).await.unwrap();
        registry.toggle(CaptureKind::Camera).await.unwrap();
        // Re-enable so a stale watcher would have something to remove
        registry.toggle(CaptureKind::Camera).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SourceEvent::Activated { kind: CaptureKind::Camera },
                SourceEvent::Deactivated { kind: CaptureKind::Camera },
                SourceEvent::Activated { kind: CaptureKind::Camera },
            ]
        );
        assert!(registry.is_active(CaptureKind::Camera));
    }

    #[tokio::test]
    async fn test_stop_all_releases_everything() {
        let devices = Arc::new(SyntheticDevices::new());
        let (registry, _) = registry_with(devices.clone());
        for kind in CaptureKind::ALL {
            registry.toggle(kind).await.unwrap();
        }

        registry.stop_all();

        assert!(registry.active_kinds().is_empty());
        for kind in CaptureKind::ALL {
            assert!(devices.issued(kind).iter().all(|s| !s.is_live()));
        }
    }

    #[tokio::test]
    async fn test_racing_acquisitions_keep_the_last() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.set_latency(Some(Duration::from_millis(30)));
        let (registry, previews) = registry_with(devices.clone());

        let (first, second) = tokio::join!(registry.toggle(CaptureKind::Camera), registry.toggle(CaptureKind::Camera));
        assert!(first.unwrap());
        assert!(second.unwrap());

        let issued = devices.issued(CaptureKind::Camera);
        assert_eq!(issued.len(), 2);
        let live: Vec<&MediaSource> = issued.iter().filter(|s| s.is_live()).collect();
        assert_eq!(live.len(), 1);

        assert!(registry.is_active(CaptureKind::Camera));
        let current = registry.source(CaptureKind::Camera).unwrap();
        assert_eq!(current.video_track(), live[0].video_track());
        assert_eq!(previews.camera.track().as_ref(), current.video_track());

        // Replaced source ends without its watcher turning the kind off
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.is_active(CaptureKind::Camera));
    }
}
