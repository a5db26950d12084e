use std::collections::HashSet;
use std::path::PathBuf;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{device::DeviceId, device::Registry, error::Error};

/// A configured device appeared or disappeared from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// The device the event is about.
    pub device: DeviceId,

    /// Whether the device node now exists.
    pub present: bool,
}

/// Watches the filesystem locations of the configured devices.
///
/// Emits a [`PresenceEvent`] per appearance/disappearance, in arrival
/// order and without coalescing, plus one synthetic `present` event for
/// every device that already exists when the watcher starts. The stream
/// is infinite; to restart it, build a new watcher.
pub struct PresenceWatcher {
    rx: mpsc::UnboundedReceiver<PresenceEvent>,

    // Watching stops when this is dropped.
    _watcher: RecommendedWatcher,
}

impl PresenceWatcher {
    /// Watch the parent directories of all configured devices.
    ///
    /// Fails with [`Error::Watch`] if a parent directory cannot be
    /// watched (e.g. it does not exist).
    pub fn watch(registry: &Registry) -> Result<Self, Error> {
        let configured: HashSet<PathBuf> = registry
            .configured_devices()
            .iter()
            .map(|device| device.path.as_path().to_path_buf())
            .collect();

        let parents: HashSet<PathBuf> = configured
            .iter()
            .filter_map(|path| path.parent())
            .map(|parent| parent.to_path_buf())
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();

        let event_tx = tx.clone();
        let watched = configured.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(%e, "Filesystem watch error");
                    return;
                }
            };

            let present = match event.kind {
                EventKind::Create(_) => true,
                EventKind::Remove(_) => false,
                _ => return,
            };

            for path in event.paths {
                if !watched.contains(&path) {
                    trace!(?path, "Not a configured device, ignoring");
                    continue;
                }

                let device = DeviceId::from(path.to_string_lossy());
                debug!(%device, present, "Presence change");

                if event_tx.send(PresenceEvent { device, present }).is_err() {
                    // Receiver gone; nothing left to tell.
                    return;
                }
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        for parent in &parents {
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    Error::Watch(format!("Could not watch `{}`: {e}", parent.display()))
                })?;
        }

        // Only scan once the watches are established, so a device
        // plugged in around startup is either seen here or by inotify,
        // never missed. Sessions tolerate seeing it twice.
        for path in &configured {
            if path.exists() {
                let device = DeviceId::from(path.to_string_lossy());
                debug!(%device, "Device already present at startup");

                tx.send(PresenceEvent {
                    device,
                    present: true,
                })
                .expect("Receiver is alive, it is returned from this function");
            }
        }

        Ok(Self { rx, _watcher: watcher })
    }

    /// The next presence event. `None` means the watcher stopped.
    pub async fn recv(&mut self) -> Option<PresenceEvent> {
        self.rx.recv().await
    }
}
