//! Gain values and their hardware encoding.

use std::fmt;

/// A gain level in decibels, always inside `[Gain::FLOOR, Gain::CEILING]`.
///
/// The device stores attenuation as a single byte in 0.5 dB steps:
/// `raw = round(-2 * db)` and `db = -0.5 * raw`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Gain(f32);

impl Gain {
    /// Lowest gain the hardware accepts. Also the level written for a keyboard mute.
    pub const FLOOR: Self = Self(-127.0);
    /// Highest gain (no attenuation).
    pub const CEILING: Self = Self(0.0);
    /// Levels at or below this are shown as "Mute".
    pub const MUTE_THRESHOLD_DB: f32 = -126.9;
    /// Change applied by one key press or scroll notch.
    pub const STEP_DB: f32 = 0.5;

    /// Create a gain, clamping into the supported range.
    #[must_use]
    pub fn from_db(db: f32) -> Self {
        if db.is_nan() {
            return Self::FLOOR;
        }
        Self(db.clamp(Self::FLOOR.0, Self::CEILING.0))
    }

    /// Decode a raw register byte.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        Self::from_db(-0.5 * f32::from(raw))
    }

    /// Encode as a raw register byte (0..=254).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_raw(self) -> u8 {
        // Clamped on construction, so the product is within 0.0..=254.0.
        (-2.0 * self.0).round() as u8
    }

    /// The level in decibels.
    #[must_use]
    pub fn db(self) -> f32 {
        self.0
    }

    /// Whether this level renders as "Mute".
    #[must_use]
    pub fn is_muted(self) -> bool {
        self.0 <= Self::MUTE_THRESHOLD_DB
    }

    /// Whether this is exactly 0.0 dB, which the firmware reports as noise.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.to_raw() == 0
    }

    /// Shift by `delta_db`, clamping into range.
    #[must_use]
    pub fn offset(self, delta_db: f32) -> Self {
        Self::from_db(self.0 + delta_db)
    }
}

impl From<Gain> for f32 {
    fn from(gain: Gain) -> Self {
        gain.0
    }
}

impl From<f32> for Gain {
    fn from(db: f32) -> Self {
        Self::from_db(db)
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} dB", self.0)
    }
}
