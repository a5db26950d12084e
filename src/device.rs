use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A serial device, identified by its filesystem path.
/// Likely along the lines of "/dev/ttyUSB0".
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Borrow the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Borrow the path as a [`Path`].
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl<S: AsRef<str>> From<S> for DeviceId {
    fn from(path: S) -> Self {
        Self(path.as_ref().into())
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How carrier is established for a device.
///
/// This is a plain mode field consulted by the session state machine;
/// direct devices are not a different kind of device.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
pub enum CarrierMode {
    /// The device is treated as permanently carrier-up.
    /// For lines wired without modem control signals.
    Direct,

    /// The hardware carrier-detect line gates the session.
    #[default]
    Monitored,
}

impl FromStr for CarrierMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "monitored" => Ok(Self::Monitored),
            _ => Err(Error::BadConfig(format!(
                "Unknown carrier mode `{s}`, expected `direct` or `monitored`"
            ))),
        }
    }
}

impl Display for CarrierMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CarrierMode::Direct => write!(f, "direct"),
            CarrierMode::Monitored => write!(f, "monitored"),
        }
    }
}

/// A device as configured: its path plus the carrier mode.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct DeviceConfig {
    /// The device path.
    pub path: DeviceId,

    /// The carrier mode. Monitored when unspecified.
    #[serde(default)]
    pub mode: CarrierMode,
}

/// The configured set of devices. Built once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct Registry {
    devices: Vec<DeviceConfig>,
}

impl Registry {
    /// A registry over the given devices.
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self { devices }
    }

    /// All configured devices.
    pub fn configured_devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    /// The carrier mode for a device. Monitored if none was configured.
    pub fn mode_for(&self, device: &DeviceId) -> CarrierMode {
        self.devices
            .iter()
            .find(|d| &d.path == device)
            .map(|d| d.mode)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_monitored() {
        let registry = Registry::new(vec![DeviceConfig {
            path: "/dev/ttyS0".into(),
            mode: CarrierMode::Direct,
        }]);

        assert_eq!(
            registry.mode_for(&"/dev/ttyS0".into()),
            CarrierMode::Direct
        );
        assert_eq!(
            registry.mode_for(&"/dev/ttyUSB0".into()),
            CarrierMode::Monitored
        );
    }

    #[test]
    fn carrier_mode_from_str() {
        assert_eq!("direct".parse::<CarrierMode>(), Ok(CarrierMode::Direct));
        assert_eq!(
            "Monitored".parse::<CarrierMode>(),
            Ok(CarrierMode::Monitored)
        );
        assert!("dialup".parse::<CarrierMode>().is_err());
    }
}
