//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use gainctl_core::HotkeyFamily;
use gainctl_hid::DeviceFilter;
use gainctl_hid::device::{MINIDSP_PIDS, MINIDSP_VIDS};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Poll intervals accepted from the config file or at runtime.
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 10..=1000;
/// Poll interval used when none (or an invalid one) is configured.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Polling settings
    #[serde(default)]
    pub polling: PollingConfig,
    /// Hotkey settings
    #[serde(default)]
    pub hotkeys: HotkeysConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Accepted USB vendor IDs (hex)
    #[serde(default = "default_vids")]
    pub vendor_ids: Vec<String>,
    /// Accepted USB product IDs (hex)
    #[serde(default = "default_pids")]
    pub product_ids: Vec<String>,
    /// Open this HID path instead of the first supported device
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { vendor_ids: default_vids(), product_ids: default_pids(), path: None }
    }
}

fn default_vids() -> Vec<String> {
    MINIDSP_VIDS.iter().map(|id| format!("{id:04x}")).collect()
}

fn default_pids() -> Vec<String> {
    MINIDSP_PIDS.iter().map(|id| format!("{id:04x}")).collect()
}

impl DeviceConfig {
    /// Build the allow-list filter.
    ///
    /// # Errors
    /// Returns an error if an ID is not valid hex.
    pub fn filter(&self) -> Result<DeviceFilter> {
        Ok(DeviceFilter {
            vendor_ids: parse_ids(&self.vendor_ids).context("Invalid vendor_ids")?,
            product_ids: parse_ids(&self.product_ids).context("Invalid product_ids")?,
        })
    }
}

fn parse_ids(ids: &[String]) -> Result<Vec<u16>> {
    if ids.is_empty() {
        bail!("list is empty");
    }
    ids.iter()
        .map(|id| {
            let digits = id.trim().trim_start_matches("0x").trim_start_matches("0X");
            u16::from_str_radix(digits, 16).with_context(|| format!("'{id}' is not a hex USB ID"))
        })
        .collect()
}

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingConfig {
    /// Milliseconds between gain register reads
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: default_interval_ms() }
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl PollingConfig {
    /// The configured interval, or the default if it is out of range.
    #[must_use]
    pub fn interval(&self) -> Duration {
        if POLL_INTERVAL_RANGE_MS.contains(&self.interval_ms) {
            Duration::from_millis(self.interval_ms)
        } else {
            warn!(
                interval_ms = self.interval_ms,
                default_ms = DEFAULT_POLL_INTERVAL_MS,
                "Poll interval out of range, using default"
            );
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        }
    }
}

/// Validate a poll interval requested at runtime.
///
/// # Errors
/// Returns an error if the interval is outside [`POLL_INTERVAL_RANGE_MS`].
pub fn validate_interval(interval: Duration) -> Result<Duration> {
    let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if !POLL_INTERVAL_RANGE_MS.contains(&ms) {
        bail!(
            "poll interval {ms} ms outside {}..={} ms",
            POLL_INTERVAL_RANGE_MS.start(),
            POLL_INTERVAL_RANGE_MS.end()
        );
    }
    Ok(interval)
}

/// Hotkey family switches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotkeysConfig {
    /// Media volume keys
    #[serde(default = "default_true")]
    pub media: bool,
    /// Left Alt + F10/F11/F12
    #[serde(default = "default_true")]
    pub alt: bool,
    /// Shift + wheel / middle click
    #[serde(default = "default_true")]
    pub shift: bool,
}

impl Default for HotkeysConfig {
    fn default() -> Self {
        Self { media: true, alt: true, shift: true }
    }
}

impl HotkeysConfig {
    /// Whether a family is enabled.
    #[must_use]
    pub fn enabled(&self, family: HotkeyFamily) -> bool {
        match family {
            HotkeyFamily::Media => self.media,
            HotkeyFamily::Alt => self.alt,
            HotkeyFamily::ShiftMouse => self.shift,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Load configuration from the default location or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Load configuration from `config_path`, falling back to defaults if absent.
pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "gainctl", "Gainctl")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
