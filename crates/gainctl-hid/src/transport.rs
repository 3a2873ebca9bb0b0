//! Raw report transport.

use std::time::Duration;

use hidapi::HidDevice;

use crate::error::{HidError, HidResult};

/// Windows `ERROR_IO_PENDING`, reported when the device is still busy with a
/// previous output report.
const WIN_IO_PENDING: &str = "0x000003E5";

/// Moves raw reports to and from one device.
#[cfg_attr(test, mockall::automock)]
pub trait HidTransport: Send {
    /// Write one output report.
    ///
    /// # Errors
    /// `TransportBusy` if the OS reports the device busy, `Transport` otherwise.
    fn write(&mut self, data: &[u8]) -> HidResult<usize>;

    /// Read one input report, waiting at most `timeout`. Returns 0 on timeout.
    ///
    /// # Errors
    /// Returns `Transport` if the read fails.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> HidResult<usize>;
}

/// [`HidTransport`] over an open `hidapi` device.
pub struct HidApiTransport {
    device: HidDevice,
}

impl HidApiTransport {
    /// Wrap an open device.
    #[must_use]
    pub fn new(device: HidDevice) -> Self {
        Self { device }
    }
}

impl HidTransport for HidApiTransport {
    fn write(&mut self, data: &[u8]) -> HidResult<usize> {
        self.device.write(data).map_err(classify)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> HidResult<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.device.read_timeout(buf, millis).map_err(classify)
    }
}

/// Map a `hidapi` error onto our taxonomy.
fn classify(error: hidapi::HidError) -> HidError {
    let message = error.to_string();
    if is_busy(&message) { HidError::TransportBusy } else { HidError::Transport(message) }
}

fn is_busy(message: &str) -> bool {
    message.contains(WIN_IO_PENDING)
        || message.to_ascii_lowercase().contains("device or resource busy")
}
