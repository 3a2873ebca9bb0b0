//! The device seam used by the state machine and the poller.

use crate::error::Result;
use crate::gain::Gain;

/// One decoded read of the device's gain register.
#[derive(Debug, Clone, PartialEq)]
pub struct GainReading {
    /// Current analog gain
    pub gain: Gain,
    /// Digital mute bit
    pub muted: bool,
    /// Response report as received (report id stripped)
    pub raw: Vec<u8>,
}

/// Hardware that holds a gain register.
///
/// Implementations serialize their own I/O; every method may be called from
/// the poller thread and the worker thread concurrently.
pub trait GainDevice: Send + Sync {
    /// Perform one request/response cycle against the gain register.
    ///
    /// # Errors
    /// `ReadTimeout` when no matching response arrived in the read window,
    /// `TransportDisconnected` for anything else.
    fn read_gain(&self) -> Result<GainReading>;

    /// Write a new analog gain.
    ///
    /// # Errors
    /// Returns an error if the write fails after retries.
    fn write_gain(&self, gain: Gain) -> Result<()>;

    /// Set or clear the digital mute bit.
    ///
    /// # Errors
    /// Returns an error if the write fails after retries.
    fn write_mute(&self, muted: bool) -> Result<()>;

    /// Discard buffered input reports, returning how many were dropped.
    ///
    /// # Errors
    /// Returns an error if the device is gone.
    fn flush_input(&self) -> Result<usize>;

    /// Release the hardware handle. Idempotent.
    fn close(&self);

    /// Identifier of the underlying device, for logging.
    fn path(&self) -> &str;
}
