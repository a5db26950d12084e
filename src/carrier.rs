use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use crate::serial::SerialHandle;

/// The state of the carrier-detect line at some point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarrierEvent {
    /// Whether carrier is up.
    pub up: bool,
}

/// A subscription to a device's carrier-detect line.
///
/// The first event reflects the line state at subscription time; further
/// events are changes. Dropping the subscription cancels it. The stream
/// ends when the device behind the handle goes away.
pub struct CarrierEvents {
    inner: WatchStream<bool>,
}

impl CarrierEvents {
    /// Subscribe to carrier events for the given open device.
    pub fn subscribe(handle: &SerialHandle) -> Self {
        Self {
            inner: WatchStream::new(handle.carrier.clone()),
        }
    }

    /// The next carrier event.
    pub async fn next(&mut self) -> Option<CarrierEvent> {
        self.inner.next().await.map(|up| CarrierEvent { up })
    }
}
