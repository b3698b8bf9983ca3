//! Node configuration. Hosts build it from their own config sources.

use std::time::Duration;

use serde::Deserialize;

use crate::ids::{DEFAULT_CHARACTERISTIC_CODE, DEFAULT_SERVICE_CODE};

/// Default role switch period in milliseconds.
pub const DEFAULT_ROLE_SWITCH_MS: u64 = 5000;

/// Device name the bulletin-board firmware advertises; used by name-filtered scans.
pub const DEFAULT_NAME_FILTER: &str = "ESP32_S3_NimBLE";

/// How scans recognize mesh peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Match peers advertising the mesh service id.
    #[default]
    Service,
    /// Match peers by advertised device name.
    Name,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Local device name; also the origin id of authored envelopes.
    pub device_name: Option<String>,
    /// 4-hex-digit short code of the mesh service.
    pub service_code: String,
    /// 4-hex-digit short code of the envelope characteristic.
    pub characteristic_code: String,
    /// Period of the central/peripheral role switch.
    pub role_switch_interval_ms: u64,
    pub scan_mode: ScanMode,
    /// Device name matched when `scan_mode` is `name`.
    pub name_filter: String,
    /// Include the device name in advertisements.
    pub include_device_name: bool,
}

impl NodeConfig {
    pub fn role_switch_interval(&self) -> Duration {
        Duration::from_millis(self.role_switch_interval_ms.max(1))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            service_code: DEFAULT_SERVICE_CODE.to_string(),
            characteristic_code: DEFAULT_CHARACTERISTIC_CODE.to_string(),
            role_switch_interval_ms: DEFAULT_ROLE_SWITCH_MS,
            scan_mode: ScanMode::Service,
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            include_device_name: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = NodeConfig::default();
        assert_eq!(c.role_switch_interval(), Duration::from_millis(5000));
        assert_eq!(c.scan_mode, ScanMode::Service);
        assert_eq!(c.service_code, "0001");
        assert_eq!(c.characteristic_code, "0002");
        assert!(!c.include_device_name);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let c = NodeConfig {
            role_switch_interval_ms: 0,
            ..NodeConfig::default()
        };
        assert_eq!(c.role_switch_interval(), Duration::from_millis(1));
    }
}
