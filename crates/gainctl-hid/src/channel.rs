//! Exclusive, serialized access to one miniDSP.

use std::ffi::CString;
use std::thread;
use std::time::{Duration, Instant};

use gainctl_core::{Gain, GainDevice, GainReading};
use hidapi::HidApi;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::device::{DeviceFilter, list_devices, resolve_path};
use crate::error::{HidError, HidResult};
use crate::frame::{self, REPORT_LEN};
use crate::transport::{HidApiTransport, HidTransport};

/// Timeouts and retry policy for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    /// How long a gain register read may wait for its response
    pub read_window: Duration,
    /// Timeout for each individual report read inside the window
    pub read_timeout: Duration,
    /// Timeout for the stale-report flush before a gain write
    pub flush_timeout: Duration,
    /// Busy retries before the final write attempt
    pub write_retries: u32,
    /// Sleep between busy retries
    pub retry_backoff: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            read_window: Duration::from_millis(300),
            read_timeout: Duration::from_millis(50),
            flush_timeout: Duration::from_millis(5),
            write_retries: 5,
            retry_backoff: Duration::from_millis(20),
        }
    }
}

/// Upper bound on reports discarded by one [`DeviceChannel::flush_input`].
const MAX_FLUSHED_REPORTS: usize = 256;

/// Sole owner of a device handle.
///
/// Every operation runs under one lock, so a gain request and its response
/// are never interleaved with other traffic from this process.
pub struct DeviceChannel<T: HidTransport = HidApiTransport> {
    transport: Mutex<Option<T>>,
    path: String,
    timing: ChannelTiming,
}

impl DeviceChannel<HidApiTransport> {
    /// Open `path`, or the first supported device when `path` is `None`.
    ///
    /// # Errors
    /// `DeviceNotFound` if nothing matches, `OpenFailed` if the open fails.
    pub fn open(
        api: &mut HidApi,
        path: Option<&str>,
        filter: &DeviceFilter,
        timing: ChannelTiming,
    ) -> HidResult<Self> {
        let devices = list_devices(api, filter)?;
        let path = resolve_path(&devices, path)?;

        let c_path = CString::new(path.clone())
            .map_err(|e| HidError::OpenFailed { path: path.clone(), reason: e.to_string() })?;
        let device = api
            .open_path(&c_path)
            .map_err(|e| HidError::OpenFailed { path: path.clone(), reason: e.to_string() })?;

        info!(path = %path, "Opened device");
        Ok(Self::new(HidApiTransport::new(device), path, timing))
    }
}

impl<T: HidTransport> DeviceChannel<T> {
    /// Wrap an already open transport.
    pub fn new(transport: T, path: impl Into<String>, timing: ChannelTiming) -> Self {
        Self { transport: Mutex::new(Some(transport)), path: path.into(), timing }
    }

    /// Platform path of the device.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the handle is still held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Run `f` against the transport under the channel lock.
    fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> HidResult<R>) -> HidResult<R> {
        let mut guard = self.transport.lock();
        let transport = guard.as_mut().ok_or(HidError::Closed)?;
        f(transport)
    }

    /// Send a gain request and wait for its response.
    ///
    /// # Errors
    /// `ReadTimeout` if no matching response arrives within the read window.
    pub fn read_gain_register(&self) -> HidResult<GainReading> {
        self.with_transport(|transport| {
            write_frame(transport, &frame::encode_gain_request(), &self.timing)?;

            let started = Instant::now();
            let mut buf = [0u8; REPORT_LEN];
            while started.elapsed() < self.timing.read_window {
                let len = transport.read_timeout(&mut buf, self.timing.read_timeout)?;
                if len == 0 {
                    continue;
                }
                let report = &buf[..len];
                match frame::decode_gain_response(report) {
                    Some(response) => {
                        return Ok(GainReading {
                            gain: response.gain,
                            muted: response.muted,
                            raw: frame::strip_report_id(report).to_vec(),
                        });
                    }
                    None => trace!(len, "Discarded unrelated report"),
                }
            }

            Err(HidError::ReadTimeout)
        })
    }

    /// Write a new gain after flushing one stale input report.
    ///
    /// # Errors
    /// Returns an error if the flush read or the write fails.
    pub fn write_gain(&self, gain: Gain) -> HidResult<()> {
        self.with_transport(|transport| {
            let mut buf = [0u8; REPORT_LEN];
            transport.read_timeout(&mut buf, self.timing.flush_timeout)?;
            debug!(%gain, raw = gain.to_raw(), "Writing gain");
            write_frame(transport, &frame::encode_write_gain(gain), &self.timing)
        })
    }

    /// Set or clear the digital mute bit.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn write_mute(&self, muted: bool) -> HidResult<()> {
        self.with_transport(|transport| {
            debug!(muted, "Writing mute");
            write_frame(transport, &frame::encode_write_mute(muted), &self.timing)
        })
    }

    /// Read and discard buffered input reports until none are left or a read fails.
    ///
    /// # Errors
    /// Returns `Closed` if the channel was closed.
    pub fn flush_input(&self) -> HidResult<usize> {
        self.with_transport(|transport| {
            let mut buf = [0u8; REPORT_LEN];
            let mut flushed = 0;
            while flushed < MAX_FLUSHED_REPORTS {
                match transport.read_timeout(&mut buf, self.timing.flush_timeout) {
                    Ok(0) => break,
                    Ok(_) => flushed += 1,
                    Err(e) => {
                        debug!(error = %e, "Stopped flushing on read error");
                        break;
                    }
                }
            }
            debug!(flushed, "Flushed pending input reports");
            Ok(flushed)
        })
    }

    /// Release the handle. Safe to call more than once.
    pub fn close(&self) {
        if self.transport.lock().take().is_some() {
            info!(path = %self.path, "Closed device");
        }
    }
}

/// Write a frame, retrying while the device reports busy.
fn write_frame<T: HidTransport>(
    transport: &mut T,
    frame: &[u8],
    timing: &ChannelTiming,
) -> HidResult<()> {
    for attempt in 1..=timing.write_retries {
        match transport.write(frame) {
            Ok(_) => return Ok(()),
            Err(HidError::TransportBusy) => {
                debug!(attempt, "Device busy, retrying write");
                thread::sleep(timing.retry_backoff);
            }
            Err(e) => return Err(e),
        }
    }
    transport.write(frame).map(|_| ())
}

impl<T: HidTransport> GainDevice for DeviceChannel<T> {
    fn read_gain(&self) -> gainctl_core::Result<GainReading> {
        Ok(self.read_gain_register()?)
    }

    fn write_gain(&self, gain: Gain) -> gainctl_core::Result<()> {
        Ok(DeviceChannel::write_gain(self, gain)?)
    }

    fn write_mute(&self, muted: bool) -> gainctl_core::Result<()> {
        Ok(DeviceChannel::write_mute(self, muted)?)
    }

    fn flush_input(&self) -> gainctl_core::Result<usize> {
        Ok(DeviceChannel::flush_input(self)?)
    }

    fn close(&self) {
        DeviceChannel::close(self);
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl<T: HidTransport> Drop for DeviceChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}
