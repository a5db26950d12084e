use std::collections::HashMap;
use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    config::Config,
    device::{DeviceConfig, DeviceId, Registry},
    error::Error,
    events::{Event, Events, TimestampedEvent},
    presence::PresenceWatcher,
    serial::SerialOpen,
    session::{Report, Session},
};

/// Watches over the whole forwarding operation.
///
/// Owns the registry, the presence watcher and one session task per
/// configured device, and routes presence events to the sessions that
/// want them. Serial devices coming and going is business as usual; the
/// dockserver link failing is not, and makes [`Supervisor::run`] return
/// the fatal error so the process can exit.
pub struct Supervisor {
    config: Config,
    registry: Registry,
    opener: Arc<dyn SerialOpen>,
    events: Events,
}

impl Supervisor {
    /// Validate the configuration and prepare a supervisor over it.
    pub fn new(config: Config, opener: Arc<dyn SerialOpen>) -> Result<Self, Error> {
        config.validate()?;

        let registry = Registry::new(config.devices.clone());

        Ok(Self {
            config,
            registry,
            opener,
            events: Events::new(1000),
        })
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.events.subscribe()
    }

    /// Run until the dockserver link fails.
    ///
    /// This only returns on an error: device-local problems are handled
    /// inside the sessions and do not end the run.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut watcher = PresenceWatcher::watch(&self.registry)?;

        let (report_tx, mut report_rx) = mpsc::unbounded_channel();

        let mut sessions: HashMap<DeviceId, (mpsc::UnboundedSender<bool>, JoinHandle<()>)> =
            HashMap::new();

        for configured in self.registry.configured_devices() {
            let device = DeviceConfig {
                path: configured.path.clone(),
                mode: self.registry.mode_for(&configured.path),
            };

            info!(path = %device.path, mode = %device.mode, "Watching device");

            let (presence_tx, presence_rx) = mpsc::unbounded_channel();
            let session = Session::new(
                device,
                &self.config,
                self.opener.clone(),
                presence_rx,
                report_tx.clone(),
            );

            let span = info_span!("session", device = %configured.path);
            let task = tokio::spawn(session.run().instrument(span));

            sessions.insert(configured.path.clone(), (presence_tx, task));
        }

        let result = loop {
            tokio::select! {
                presence = watcher.recv() => match presence {
                    Some(event) => {
                        debug!(device = %event.device, present = event.present, "Routing presence event");

                        if let Some((presence_tx, _)) = sessions.get(&event.device) {
                            let _ = presence_tx.send(event.present);
                        }
                    }
                    None => break Err(Error::Watch("The presence watcher stopped".into())),
                },
                report = report_rx.recv() => match report {
                    Some(Report::Phase { device, phase }) => {
                        self.events.send_event(Event::Phase { device, phase });
                    }
                    Some(Report::Fatal { device, error }) => {
                        error!(%device, %error, "Dockserver link failure, going down");
                        self.events.send_event(Event::LinkFailed { device });
                        break Err(error);
                    }
                    // We hold a sender ourselves, so this cannot happen
                    // while we are alive.
                    None => break Err(Error::Watch("Session reporting stopped".into())),
                },
            }
        };

        // Whatever ends the run ends every session with it.
        for (_, (_, task)) in sessions {
            task.abort();
        }

        result
    }
}
