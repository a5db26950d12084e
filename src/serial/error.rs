use std::io;

use thiserror::Error;

/// Any error an open serial device might encounter.
#[derive(Debug, Error)]
pub enum SerialError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,
}
