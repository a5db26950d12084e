use bytes::Bytes;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{device::DeviceConfig, device::DeviceId, error::Error};

/// Serial port related errors.
pub mod error;

/// The native serial port driver.
pub mod port;

use error::SerialError;

/// Capacity of the byte channels between a port task and its handle.
/// Bounded so a stalled peer throttles the other side instead of
/// growing memory without limit.
pub(crate) const BYTE_CHANNEL_CAPACITY: usize = 32;

/// Something that can open serial devices.
///
/// This is the seam between the session state machine and the hardware:
/// the native driver ([`port::NativeSerial`]) opens real ttys, while
/// [`crate::mock::MockSerial`] opens in-memory devices for tests.
pub trait SerialOpen: Send + Sync {
    /// Open the device, yielding a live [`SerialHandle`].
    ///
    /// Fails with [`Error::SerialOpen`] if the device vanished between
    /// detection and open, or is busy.
    fn open(&self, device: &DeviceConfig) -> Result<SerialHandle, Error>;
}

/// An open serial device.
///
/// Bytes read from the wire arrive on a bounded channel, bytes sent onto
/// the wire go out on another, and the carrier-detect line state is
/// published on a watch channel. The handle exclusively owns the device;
/// dropping it closes the device and stops any I/O task behind it.
pub struct SerialHandle {
    device: DeviceId,
    pub(crate) from_wire: mpsc::Receiver<Result<Bytes, SerialError>>,
    pub(crate) to_wire: mpsc::Sender<Bytes>,
    pub(crate) carrier: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl SerialHandle {
    pub(crate) fn new(
        device: DeviceId,
        from_wire: mpsc::Receiver<Result<Bytes, SerialError>>,
        to_wire: mpsc::Sender<Bytes>,
        carrier: watch::Receiver<bool>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            device,
            from_wire,
            to_wire,
            carrier,
            task,
        }
    }

    /// Which device this handle has open.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }
}

impl Drop for SerialHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
