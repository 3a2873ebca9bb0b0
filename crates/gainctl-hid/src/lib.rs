//! Gainctl HID - miniDSP hardware integration.
//!
//! This crate speaks the miniDSP USB-HID protocol: it builds and parses the
//! fixed-size command frames, finds supported devices, and provides
//! [`DeviceChannel`], which serializes all I/O on one device and implements
//! [`gainctl_core::GainDevice`] for the state machine and the poller.

pub mod channel;
pub mod device;
pub mod error;
pub mod frame;
pub mod transport;

pub use channel::{ChannelTiming, DeviceChannel};
pub use device::{DeviceFilter, DeviceSummary, list_devices};
pub use error::{HidError, HidResult};
pub use transport::{HidApiTransport, HidTransport};
