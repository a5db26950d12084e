//! Mock serial devices, useful to exercise the forwarding engine without
//! actual serial ports or hardware carrier lines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{
    device::{DeviceConfig, DeviceId},
    error::Error,
    serial::{error::SerialError, SerialHandle, SerialOpen, BYTE_CHANNEL_CAPACITY},
};

struct MockState {
    carrier_tx: watch::Sender<bool>,
    opened_tx: mpsc::UnboundedSender<MockPort>,
    fail_opens: usize,
    opens: usize,
}

type Shared = Arc<Mutex<HashMap<DeviceId, MockState>>>;

/// Opens mock devices instead of real serial ports.
///
/// Register devices with [`MockSerial::device`] before handing the
/// opener to a supervisor; opening an unregistered path fails the same
/// way a vanished real device would.
#[derive(Default)]
pub struct MockSerial {
    devices: Shared,
}

impl MockSerial {
    /// A mock opener with no devices yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock device and get its controller.
    pub fn device(&self, path: &str) -> MockDevice {
        let device = DeviceId::from(path);
        debug!(%device, "Registering mock device");

        let (carrier_tx, _) = watch::channel(false);
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();

        self.devices.lock().expect("Mutex works").insert(
            device.clone(),
            MockState {
                carrier_tx,
                opened_tx,
                fail_opens: 0,
                opens: 0,
            },
        );

        MockDevice {
            device,
            shared: self.devices.clone(),
            opened: opened_rx,
        }
    }
}

impl SerialOpen for MockSerial {
    fn open(&self, device: &DeviceConfig) -> Result<SerialHandle, Error> {
        let mut devices = self.devices.lock().expect("Mutex works");

        let state = devices.get_mut(&device.path).ok_or_else(|| Error::SerialOpen {
            device: device.path.clone(),
            reason: "No such device".into(),
        })?;

        state.opens += 1;

        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::SerialOpen {
                device: device.path.clone(),
                reason: "Device busy".into(),
            });
        }

        let (to_host_tx, from_wire_rx) = mpsc::channel(BYTE_CHANNEL_CAPACITY);
        let (to_wire_tx, from_host_rx) = mpsc::channel(BYTE_CHANNEL_CAPACITY);

        // The session side gets the handle, the test side gets the
        // opposite channel ends.
        let _ = state.opened_tx.send(MockPort {
            to_host: to_host_tx,
            from_host: from_host_rx,
        });

        Ok(SerialHandle::new(
            device.path.clone(),
            from_wire_rx,
            to_wire_tx,
            state.carrier_tx.subscribe(),
            None,
        ))
    }
}

/// Controls one registered mock device.
pub struct MockDevice {
    device: DeviceId,
    shared: Shared,
    opened: mpsc::UnboundedReceiver<MockPort>,
}

impl MockDevice {
    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut devices = self.shared.lock().expect("Mutex works");
        f(devices
            .get_mut(&self.device)
            .expect("A registered device stays registered"))
    }

    /// Raise or drop the simulated carrier-detect line.
    pub fn set_carrier(&self, up: bool) {
        self.with_state(|state| state.carrier_tx.send_replace(up));
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_opens(&self, n: usize) {
        self.with_state(|state| state.fail_opens = n);
    }

    /// How many times this device has been opened.
    pub fn opens(&self) -> usize {
        self.with_state(|state| state.opens)
    }

    /// Wait for the device to be opened, yielding the test-side port.
    pub async fn opened(&mut self) -> MockPort {
        self.opened
            .recv()
            .await
            .expect("The opener should be alive")
    }
}

/// The test side of one open of a mock device.
///
/// Dropping it is the mock equivalent of the line reaching end of
/// stream.
pub struct MockPort {
    to_host: mpsc::Sender<Result<Bytes, SerialError>>,
    from_host: mpsc::Receiver<Bytes>,
}

impl MockPort {
    /// Put bytes "on the wire" towards the host.
    pub async fn send(&self, bytes: impl Into<Bytes>) {
        self.to_host
            .send(Ok(bytes.into()))
            .await
            .expect("The handle should be alive");
    }

    /// The next chunk the host wrote to the device.
    /// `None` once the handle is gone.
    pub async fn written(&mut self) -> Option<Bytes> {
        self.from_host.recv().await
    }

    /// Whether the session side has released its handle.
    pub fn is_released(&self) -> bool {
        self.to_host.is_closed()
    }

    /// End this open with a serial error instead of a clean close.
    pub async fn fail(self) {
        let _ = self.to_host.send(Err(SerialError::Disconnected)).await;
    }
}
