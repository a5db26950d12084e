use std::{collections::VecDeque, fmt::Display};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{device::DeviceId, session::Phase};

/// Something observable that happened to a device's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// A session moved to a new phase.
    Phase {
        /// The device whose session moved.
        device: DeviceId,

        /// The phase it moved to.
        phase: Phase,
    },

    /// A session observed the dockserver link failing.
    /// The process is about to go down.
    LinkFailed {
        /// The device whose session observed the failure.
        device: DeviceId,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Phase { device, phase } => write!(f, "{device}: {phase}"),
            Event::LinkFailed { device } => write!(f, "{device}: dockserver link failed"),
        }
    }
}

/// An event and when it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimestampedEvent {
    /// The event.
    pub inner: Event,

    /// When the event happened.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TimestampedEvent {
    /// Stamp an event with the current time.
    pub fn new(inner: Event) -> Self {
        Self {
            inner,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for TimestampedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// An event logger and broadcaster.
#[derive(Debug)]
pub struct Events {
    log: VecDeque<TimestampedEvent>,
    log_size: usize,

    tx: broadcast::Sender<TimestampedEvent>,
    #[allow(dead_code)]
    rx: broadcast::Receiver<TimestampedEvent>,
}

impl Events {
    /// Create a new events handler.
    /// It will keep a log of at most `log_size` events.
    /// It may be subscribed to to receive any events it sees.
    pub fn new(log_size: usize) -> Self {
        let (tx, rx) = broadcast::channel(1024);
        Self {
            tx,
            rx,
            log: VecDeque::new(),
            log_size,
        }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Send an event. This will append it to the log and broadcast it to any subscribers.
    pub fn send_event(&mut self, event: Event) {
        let event = TimestampedEvent::new(event);
        debug!(%event, "Sending and storing event");
        self.log.push_front(event.clone());

        // Keep a log of at most this number recent events.
        // Truncate removes from the back, which means older events are split off first.
        self.log.truncate(self.log_size);

        self.tx.send(event).expect("Broadcast should work");
    }
}
