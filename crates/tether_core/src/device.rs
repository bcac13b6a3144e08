//! Output Device Naming and Enumeration

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_OUTPUT_NAME;
use crate::error::{OutputError, OutputResult};

/// Separator between host API and device in a device name
pub const HOST_SEPARATOR: &str = "::";

/// Source of device names for an output host
///
/// Names are `"<host>::<device>"`; [`DEFAULT_OUTPUT_NAME`] always resolves
/// to the system default output. The registry is queried on demand, never
/// cached, so hot-plugged devices show up on the next call.
pub trait DeviceRegistry {
    /// All output devices in host enumeration order
    fn list_devices(&self) -> OutputResult<Vec<String>>;

    /// Name of the system default output, if there is one
    fn default_device(&self) -> OutputResult<Option<String>>;

    /// Index of `name` in [`list_devices`](Self::list_devices)
    fn resolve_index(&self, name: &str) -> OutputResult<usize> {
        let target = if name == DEFAULT_OUTPUT_NAME {
            self.default_device()?
                .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))?
        } else {
            name.to_string()
        };

        self.list_devices()?
            .iter()
            .position(|device| *device == target)
            .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))
    }
}

/// Build `"<host>::<device>"`
pub fn device_label(host: &str, device: &str) -> String {
    format!("{}{}{}", host, HOST_SEPARATOR, device)
}

/// Split a device label into host and device parts
pub fn split_label(label: &str) -> Option<(&str, &str)> {
    label.split_once(HOST_SEPARATOR)
}

/// Represents an output device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Position in the registry's enumeration order
    pub index: usize,

    /// `"<host>::<device>"`
    pub name: String,

    /// Host API the device belongs to
    pub host: String,

    /// Whether this is the system default output
    pub is_default: bool,

    /// Supported sample rates (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    /// Maximum supported channels
    pub max_channels: u16,
}

impl AudioDevice {
    pub fn supports_rate(&self, rate: u32) -> bool {
        self.sample_rates.contains(&rate)
    }
}
