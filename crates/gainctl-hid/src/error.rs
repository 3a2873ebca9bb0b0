//! HID error types.

use thiserror::Error;

/// HID error type.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("No supported miniDSP device found")]
    DeviceNotFound,

    #[error("Device busy")]
    TransportBusy,

    #[error("Timed out waiting for gain register response")]
    ReadTimeout,

    #[error("Device channel is closed")]
    Closed,

    #[error("Failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HID API error: {0}")]
    Api(String),
}

impl From<HidError> for gainctl_core::Error {
    fn from(error: HidError) -> Self {
        match error {
            HidError::DeviceNotFound => Self::DeviceNotFound,
            HidError::TransportBusy => Self::TransportBusy,
            HidError::ReadTimeout => Self::ReadTimeout,
            other => Self::TransportDisconnected(other.to_string()),
        }
    }
}

/// Result type for HID operations.
pub type HidResult<T> = Result<T, HidError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use gainctl_core::Error;

    #[test]
    fn test_transient_errors_keep_their_kind() {
        assert_matches!(Error::from(HidError::ReadTimeout), Error::ReadTimeout);
        assert_matches!(Error::from(HidError::TransportBusy), Error::TransportBusy);
        assert_matches!(Error::from(HidError::DeviceNotFound), Error::DeviceNotFound);
    }

    #[test]
    fn test_other_errors_mean_disconnect() {
        assert_matches!(Error::from(HidError::Closed), Error::TransportDisconnected(_));
        assert_matches!(
            Error::from(HidError::Transport("read error".into())),
            Error::TransportDisconnected(msg) if msg.contains("read error")
        );
    }
}
