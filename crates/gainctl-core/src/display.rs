//! On-screen display seam.

use std::fmt;

use crate::gain::Gain;

/// Receiver of "show this level" requests.
///
/// Implementations own their own rendering, debouncing and animation.
pub trait DisplaySink: Send + Sync {
    /// Show a gain level. Levels at or below the mute threshold should be
    /// rendered as "Mute" (see [`OsdLabel::for_gain`]).
    fn show(&self, gain: Gain);
}

/// What an OSD should render for a given gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OsdLabel {
    /// Output is at the hard mute floor
    Mute,
    /// A numeric level
    Level(Gain),
}

impl OsdLabel {
    /// Classify a gain for display.
    #[must_use]
    pub fn for_gain(gain: Gain) -> Self {
        if gain.is_muted() { Self::Mute } else { Self::Level(gain) }
    }
}

impl fmt::Display for OsdLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mute => f.write_str("Mute"),
            Self::Level(gain) => write!(f, "{gain}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_renders_as_mute() {
        assert_eq!(OsdLabel::for_gain(Gain::FLOOR), OsdLabel::Mute);
        assert_eq!(OsdLabel::for_gain(Gain::from_db(-126.9)).to_string(), "Mute");
    }

    #[test]
    fn test_level_renders_in_db() {
        let label = OsdLabel::for_gain(Gain::from_db(-126.5));
        assert_eq!(label, OsdLabel::Level(Gain::from_db(-126.5)));
        assert_eq!(label.to_string(), "-126.5 dB");
    }
}
