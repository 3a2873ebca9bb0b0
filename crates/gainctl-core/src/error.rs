//! Error types for Gainctl core.

use thiserror::Error;

/// Core error type for Gainctl operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("No supported device found")]
    DeviceNotFound,

    #[error("Device busy, write retries exhausted")]
    TransportBusy,

    #[error("Timed out waiting for gain register response")]
    ReadTimeout,

    #[error("Device disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl Error {
    /// Whether the error is expected to clear up on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportBusy | Self::ReadTimeout)
    }
}

/// Result type alias for Gainctl core operations.
pub type Result<T> = std::result::Result<T, Error>;
