//! Gainctl Core - gain model and the reconciling volume state machine.
//!
//! This crate holds the domain logic shared by the HID layer and the daemon:
//! the gain encoding, the mute regimes, the transition table that decides
//! whether a change came from the keyboard, the remote, or ourselves, and the
//! seams ([`GainDevice`], [`DisplaySink`]) through which it touches the world.

pub mod command;
pub mod device;
pub mod display;
pub mod error;
pub mod gain;
pub mod machine;
pub mod state;
pub mod suspend;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{Command, HotkeyAction, HotkeyFamily};
pub use device::{GainDevice, GainReading};
pub use display::{DisplaySink, OsdLabel};
pub use error::{Error, Result};
pub use gain::Gain;
pub use machine::VolumeStateMachine;
pub use state::{MuteRegime, Observation, VolumeEvent, VolumeState};
pub use suspend::{SuspendCounter, SuspendGuard};
