//! Text commands.
//!
//! Commands are parsed from lines typed by the user (or sent by a launcher
//! script) and routed by the daemon to the hotkey handle or the session.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// A hotkey family that can be enabled or disabled as a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyFamily {
    /// Media volume keys
    Media,
    /// Left Alt + F10/F11/F12
    Alt,
    /// Shift + wheel and Shift + middle click
    ShiftMouse,
}

impl FromStr for HotkeyFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "media" => Ok(Self::Media),
            "alt" => Ok(Self::Alt),
            "shift" | "mouse" => Ok(Self::ShiftMouse),
            other => Err(Error::InvalidCommand(format!("unknown hotkey family '{other}'"))),
        }
    }
}

impl fmt::Display for HotkeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Media => "media",
            Self::Alt => "alt",
            Self::ShiftMouse => "shift",
        })
    }
}

/// What a hotkey asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    VolumeUp,
    VolumeDown,
    ToggleMute,
}

impl FromStr for HotkeyAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Self::VolumeUp),
            "down" => Ok(Self::VolumeDown),
            "mute" => Ok(Self::ToggleMute),
            other => Err(Error::InvalidCommand(format!("unknown hotkey action '{other}'"))),
        }
    }
}

/// A user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Raise the gain by one step
    VolumeUp,
    /// Lower the gain by one step
    VolumeDown,
    /// Toggle keyboard mute
    ToggleMute,
    /// Ignore hotkeys until resumed
    Pause,
    /// Resume hotkey handling
    Resume,
    /// Enable or disable a hotkey family
    SetHotkeys { family: HotkeyFamily, enabled: bool },
    /// A key from a hook, subject to pause and family switches
    Key { family: HotkeyFamily, action: HotkeyAction },
    /// A Shift + wheel scroll, in raw wheel delta units
    Wheel { delta: i32 },
    /// List supported devices
    ListDevices,
    /// Switch to the device at `path`
    UseDevice { path: String },
    /// Restart polling with a new interval
    SetPollInterval { interval: Duration },
    /// Print the current state
    Status,
    /// Request shutdown
    Shutdown,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(Error::InvalidCommand("empty command".into()));
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "up" | "+" => Self::VolumeUp,
            "down" | "-" => Self::VolumeDown,
            "mute" | "m" => Self::ToggleMute,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "devices" | "list" => Self::ListDevices,
            "status" => Self::Status,
            "quit" | "exit" => Self::Shutdown,
            "use" => {
                let path = words.collect::<Vec<_>>().join(" ");
                if path.is_empty() {
                    return Err(Error::InvalidCommand("use: missing device path".into()));
                }
                return Ok(Self::UseDevice { path });
            }
            "interval" => {
                let ms = words
                    .next()
                    .ok_or_else(|| Error::InvalidCommand("interval: missing value".into()))?;
                let ms: u64 = ms.trim_end_matches("ms").parse().map_err(|_| {
                    Error::InvalidCommand(format!("interval: '{ms}' is not a number"))
                })?;
                Self::SetPollInterval { interval: Duration::from_millis(ms) }
            }
            "hotkeys" => {
                let family = words
                    .next()
                    .ok_or_else(|| Error::InvalidCommand("hotkeys: missing family".into()))?
                    .parse()?;
                let enabled = match words.next().map(str::to_ascii_lowercase).as_deref() {
                    Some("on" | "true" | "1") => true,
                    Some("off" | "false" | "0") => false,
                    _ => return Err(Error::InvalidCommand("hotkeys: expected on|off".into())),
                };
                Self::SetHotkeys { family, enabled }
            }
            "key" => {
                let family = words
                    .next()
                    .ok_or_else(|| Error::InvalidCommand("key: missing family".into()))?
                    .parse()?;
                let action = words
                    .next()
                    .ok_or_else(|| Error::InvalidCommand("key: missing action".into()))?
                    .parse()?;
                Self::Key { family, action }
            }
            "wheel" => {
                let delta = words
                    .next()
                    .ok_or_else(|| Error::InvalidCommand("wheel: missing delta".into()))?;
                let delta = delta.parse().map_err(|_| {
                    Error::InvalidCommand(format!("wheel: '{delta}' is not a number"))
                })?;
                Self::Wheel { delta }
            }
            other => return Err(Error::InvalidCommand(format!("unknown command '{other}'"))),
        };

        if let Some(extra) = words.next() {
            return Err(Error::InvalidCommand(format!("unexpected argument '{extra}'")));
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("up".parse::<Command>().unwrap(), Command::VolumeUp);
        assert_eq!("-".parse::<Command>().unwrap(), Command::VolumeDown);
        assert_eq!("  MUTE ".parse::<Command>().unwrap(), Command::ToggleMute);
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Shutdown);
    }

    #[test]
    fn test_parse_use_keeps_spaces_in_path() {
        assert_eq!(
            "use /dev/hidraw 3".parse::<Command>().unwrap(),
            Command::UseDevice { path: "/dev/hidraw 3".into() }
        );
        assert_matches!("use".parse::<Command>(), Err(Error::InvalidCommand(_)));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            "interval 200".parse::<Command>().unwrap(),
            Command::SetPollInterval { interval: Duration::from_millis(200) }
        );
        assert_eq!(
            "interval 50ms".parse::<Command>().unwrap(),
            Command::SetPollInterval { interval: Duration::from_millis(50) }
        );
        assert_matches!("interval fast".parse::<Command>(), Err(Error::InvalidCommand(_)));
    }

    #[test]
    fn test_parse_hotkeys() {
        assert_eq!(
            "hotkeys shift off".parse::<Command>().unwrap(),
            Command::SetHotkeys { family: HotkeyFamily::ShiftMouse, enabled: false }
        );
        assert_matches!("hotkeys media maybe".parse::<Command>(), Err(Error::InvalidCommand(_)));
        assert_matches!("hotkeys numpad on".parse::<Command>(), Err(Error::InvalidCommand(_)));
    }

    #[test]
    fn test_parse_hook_input() {
        assert_eq!(
            "key alt mute".parse::<Command>().unwrap(),
            Command::Key { family: HotkeyFamily::Alt, action: HotkeyAction::ToggleMute }
        );
        assert_eq!("wheel -240".parse::<Command>().unwrap(), Command::Wheel { delta: -240 });
        assert_matches!("key media louder".parse::<Command>(), Err(Error::InvalidCommand(_)));
        assert_matches!("wheel".parse::<Command>(), Err(Error::InvalidCommand(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!("".parse::<Command>(), Err(Error::InvalidCommand(_)));
        assert_matches!("louder".parse::<Command>(), Err(Error::InvalidCommand(_)));
        assert_matches!("up twice".parse::<Command>(), Err(Error::InvalidCommand(_)));
    }
}
