//! miniDSP device discovery.

use hidapi::{DeviceInfo, HidApi};
use tracing::{debug, info};

use crate::error::{HidError, HidResult};

/// miniDSP USB vendor IDs (current and legacy).
pub const MINIDSP_VIDS: &[u16] = &[0x2752, 0x04D8];
/// Supported product IDs (before and after Dirac activation).
pub const MINIDSP_PIDS: &[u16] = &[0x0011, 0x0044, 0x003F];

/// Vendor/product allow-lists a device must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Accepted vendor IDs
    pub vendor_ids: Vec<u16>,
    /// Accepted product IDs
    pub product_ids: Vec<u16>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self { vendor_ids: MINIDSP_VIDS.to_vec(), product_ids: MINIDSP_PIDS.to_vec() }
    }
}

impl DeviceFilter {
    /// Whether a vendor/product pair is supported.
    #[must_use]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_ids.contains(&vendor_id) && self.product_ids.contains(&product_id)
    }
}

/// A supported device found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Platform HID path, used to open the device
    pub path: String,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Product string, if the device reports one
    pub product: Option<String>,
}

impl DeviceSummary {
    fn from_info(info: &DeviceInfo) -> Self {
        Self {
            path: info.path().to_string_lossy().into_owned(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            product: info.product_string().map(str::to_string),
        }
    }
}

/// List every connected device the filter accepts.
///
/// # Errors
/// Returns an error if the HID device list cannot be refreshed.
pub fn list_devices(api: &mut HidApi, filter: &DeviceFilter) -> HidResult<Vec<DeviceSummary>> {
    api.refresh_devices().map_err(|e| HidError::Api(e.to_string()))?;

    let devices: Vec<_> = api
        .device_list()
        .filter(|info| filter.matches(info.vendor_id(), info.product_id()))
        .map(DeviceSummary::from_info)
        .collect();

    debug!(count = devices.len(), "Enumerated miniDSP devices");
    Ok(devices)
}

/// Pick the path to open: the requested one, or the first supported device.
///
/// # Errors
/// Returns `DeviceNotFound` if no path was requested and no device matches.
pub fn resolve_path(devices: &[DeviceSummary], requested: Option<&str>) -> HidResult<String> {
    if let Some(path) = requested {
        return Ok(path.to_string());
    }

    let first = devices.first().ok_or(HidError::DeviceNotFound)?;
    info!(
        path = %first.path,
        vendor_id = format_args!("{:04x}", first.vendor_id),
        product_id = format_args!("{:04x}", first.product_id),
        product = first.product.as_deref().unwrap_or("unknown"),
        "miniDSP device detected"
    );
    Ok(first.path.clone())
}
