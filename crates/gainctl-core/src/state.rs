//! Volume state, mute regimes and events.

use crate::gain::Gain;

/// Why the controller believes the output is attenuated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteRegime {
    /// Nothing muted
    Normal,
    /// Gain was driven to the floor by a keyboard mute
    KeyboardMuted,
    /// The device's digital mute bit is set (usually by the remote)
    DigitalMuted,
}

impl MuteRegime {
    /// Classify a pair of mute flags. Digital mute wins over keyboard mute.
    #[must_use]
    pub fn from_flags(keyboard_muted: bool, digital_muted: bool) -> Self {
        match (keyboard_muted, digital_muted) {
            (_, true) => Self::DigitalMuted,
            (true, false) => Self::KeyboardMuted,
            (false, false) => Self::Normal,
        }
    }
}

/// Inputs to the volume state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeEvent {
    /// Keyboard or wheel volume change by a dB delta
    KeyboardVolume(f32),
    /// Keyboard mute key
    KeyboardMuteToggle,
    /// The poller saw the gain change without the mute bit flipping
    RemoteVolume(Gain),
    /// The poller saw the digital mute bit flip
    RemoteMuteToggle,
}

impl VolumeEvent {
    /// Whether this event came from the local keyboard/mouse.
    #[must_use]
    pub fn is_keyboard(&self) -> bool {
        matches!(self, Self::KeyboardVolume(_) | Self::KeyboardMuteToggle)
    }
}

/// Reconciliation state owned by the state machine.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct VolumeState {
    /// Gain is at the mute floor
    pub keyboard_muted: bool,
    /// Digital mute bit is set
    pub digital_muted: bool,
    /// Last known pre-mute gain
    pub saved_gain: Option<Gain>,
    /// Swallow the next remote volume event (echo of our own floor write)
    pub skip_next_rc_vol: bool,
    /// Suppress the save-on-remote-mute branch once
    pub skip_save_only: bool,
    /// Keyboard flag as it was before the poller's last update
    pub prev_keyboard_muted: bool,
    /// Digital flag as it was before the poller's last update
    pub prev_digital_muted: bool,
}

impl VolumeState {
    /// Regime according to the current flags.
    #[must_use]
    pub fn regime(&self) -> MuteRegime {
        MuteRegime::from_flags(self.keyboard_muted, self.digital_muted)
    }

    /// Regime according to the snapshot taken before the last poll update.
    #[must_use]
    pub fn prev_regime(&self) -> MuteRegime {
        MuteRegime::from_flags(self.prev_keyboard_muted, self.prev_digital_muted)
    }
}

/// A steady-state poll result, as handed from the poller to the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Gain read from the device
    pub gain: Gain,
    /// Digital mute bit read from the device
    pub digital_muted: bool,
    /// Whether the gain differs from the poller's previous reading
    pub gain_changed: bool,
    /// Suspend generation sampled before the read was issued
    pub generation: u64,
}
