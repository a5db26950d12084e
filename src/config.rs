use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    cli::Cli,
    device::{CarrierMode, DeviceConfig},
    error::Error,
};

/// Where the dockserver accepts incoming network connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dockserver {
    /// Host name or address.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl Default for Dockserver {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8181,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_open_delay_ms() -> u64 {
    // Give udev time to finish setting up a freshly plugged device
    // before we open it.
    500
}

/// The configuration used for running the forwarder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The serial devices to forward.
    pub devices: Vec<DeviceConfig>,

    /// The dockserver endpoint each device's session connects to.
    #[serde(default)]
    pub dockserver: Dockserver,

    /// How long a dockserver connection attempt may take before it counts
    /// as a failure (which is fatal).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Settle time between a device node appearing and the serial open.
    #[serde(default = "default_open_delay_ms")]
    pub open_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: vec![],
            dockserver: Dockserver::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            open_delay_ms: default_open_delay_ms(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|problem| Error::BadConfig(format!("Not valid config .ron: {problem}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            devices: vec![
                DeviceConfig {
                    path: "/dev/ttyS0".into(),
                    mode: CarrierMode::Direct,
                },
                DeviceConfig {
                    path: "/dev/ttyUSB0".into(),
                    mode: CarrierMode::Monitored,
                },
                DeviceConfig {
                    path: "/dev/ttyUSB1".into(),
                    mode: CarrierMode::Monitored,
                },
            ],
            dockserver: Dockserver::default(),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Example config should serialize")
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(&p).map_err(|e| {
            Error::BadConfig(format!(
                "Could not read config file `{}`: {e}",
                p.as_ref().display()
            ))
        })?;

        Self::deserialize(&s)
    }

    /// Apply command line overrides on top of this configuration.
    ///
    /// A `--devices` list replaces the configured devices wholesale
    /// (all monitored). `--serial-options` entries then adjust modes and
    /// must reference configured devices.
    pub fn merge_cli(mut self, cli: &Cli) -> Result<Self, Error> {
        if let Some(devices) = &cli.devices {
            self.devices = devices
                .iter()
                .map(|path| DeviceConfig {
                    path: path.into(),
                    mode: CarrierMode::default(),
                })
                .collect();
        }

        if let Some(host) = &cli.server {
            self.dockserver.host = host.clone();
        }

        if let Some(port) = cli.port {
            self.dockserver.port = port;
        }

        for option in &cli.serial_options {
            let (path, mode) = option.split_once('=').ok_or_else(|| {
                Error::BadConfig(format!(
                    "Malformed serial option `{option}`, expected `path=mode`"
                ))
            })?;

            let mode: CarrierMode = mode.parse()?;

            let device = self
                .devices
                .iter_mut()
                .find(|device| device.path.as_str() == path)
                .ok_or_else(|| {
                    Error::BadConfig(format!(
                        "Serial option references `{path}` which is not a configured device"
                    ))
                })?;

            device.mode = mode;
        }

        Ok(self)
    }

    fn check_some_device_configured(&self) -> Result<(), Error> {
        if self.devices.is_empty() {
            Err(Error::BadConfig(
                "No serial devices configured. Use `--devices` or a config file.".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_paths_absolute(&self) -> Result<(), Error> {
        for device in &self.devices {
            if !device.path.as_path().is_absolute() {
                return Err(Error::BadConfig(format!(
                    "Device path `{}` is not absolute",
                    device.path
                )));
            }
        }

        Ok(())
    }

    fn check_duplicate_devices(&self) -> Result<(), Error> {
        let duplicates = self
            .devices
            .iter()
            .map(|device| &device.path)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "Each device may only be configured once. Duplicates: {duplicates:?}"
            )))
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.check_some_device_configured()?;
        self.check_paths_absolute()?;
        self.check_duplicate_devices()?;

        Ok(())
    }
}
