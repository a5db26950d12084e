use thiserror::Error;

use crate::device::DeviceId;

/// Errors that may occur in this library.
///
/// Device-local problems ([`Error::SerialOpen`]) are recovered from by the
/// owning session. Dockserver problems ([`Error::TcpConnect`],
/// [`Error::TcpLinkLost`]) are fatal for the whole process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The configuration is unusable.
    #[error("Bad config: {0}")]
    BadConfig(String),

    /// The filesystem watcher could not be set up, or stopped.
    #[error("Presence watching failed: {0}")]
    Watch(String),

    /// A device is present but could not be opened.
    /// Sessions log this and retry on the next presence event.
    #[error("Could not open serial device `{device}`: {reason}")]
    SerialOpen {
        /// The device that could not be opened.
        device: DeviceId,

        /// What the underlying driver had to say.
        reason: String,
    },

    /// A connection to the dockserver could not be established.
    #[error("Could not connect to the dockserver for device `{device}`: {reason}")]
    TcpConnect {
        /// The device whose session attempted the connection.
        device: DeviceId,

        /// Connect error or timeout description.
        reason: String,
    },

    /// The dockserver dropped an established connection.
    #[error("Lost the dockserver connection while forwarding `{device}`: {reason}")]
    TcpLinkLost {
        /// The device whose session was being forwarded.
        device: DeviceId,

        /// How the loss was observed.
        reason: String,
    },
}

impl Error {
    /// The process exit code for this error.
    ///
    /// Configuration problems and dockserver problems get distinct codes
    /// so a supervisor can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BadConfig(_) | Error::Watch(_) => 1,
            Error::TcpLinkLost { .. } => 2,
            Error::SerialOpen { .. } => 3,
            Error::TcpConnect { .. } => 4,
        }
    }

    /// Unwrap the bad-config message, else give the error back.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
