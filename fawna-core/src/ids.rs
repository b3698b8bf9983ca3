//! Mesh service and characteristic identifiers, derived from short codes.

use uuid::Uuid;

use crate::config::NodeConfig;

/// Fixed template the short codes are embedded into: `xxxxxxxx-0000-1000-BEEF-00805F9B34FC`.
/// Same shape as the Bluetooth base UUID, with a private `BEEF` clock sequence.
const BASE_UUID: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0xBE, 0xEF, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFC,
];

/// Default short code of the mesh service.
pub const DEFAULT_SERVICE_CODE: &str = "0001";
/// Default short code of the envelope characteristic.
pub const DEFAULT_CHARACTERISTIC_CODE: &str = "0002";
/// Origin id used when the device has no name.
pub const UNKNOWN_DEVICE_NAME: &str = "UnknownDevice";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid identifier format: {0:?} (expected {1} hex digits)")]
    InvalidIdentifierFormat(String, usize),
}

fn parse_hex(code: &str, digits: usize) -> Result<u32, IdError> {
    let invalid = || IdError::InvalidIdentifierFormat(code.to_string(), digits);
    if code.len() != digits || !code.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    u32::from_str_radix(code, 16).map_err(|_| invalid())
}

/// Embed a 16-bit short code (4 hex digits) at bytes 2..4 of the template.
pub fn uuid_from_short_code16(code: &str) -> Result<Uuid, IdError> {
    let value = parse_hex(code, 4)? as u16;
    let mut bytes = BASE_UUID;
    bytes[2..4].copy_from_slice(&value.to_be_bytes());
    Ok(Uuid::from_bytes(bytes))
}

/// Embed a 32-bit short code (8 hex digits) at bytes 0..4 of the template.
pub fn uuid_from_short_code32(code: &str) -> Result<Uuid, IdError> {
    let value = parse_hex(code, 8)?;
    let mut bytes = BASE_UUID;
    bytes[0..4].copy_from_slice(&value.to_be_bytes());
    Ok(Uuid::from_bytes(bytes))
}

pub fn derive_service_id(short_code: &str) -> Result<Uuid, IdError> {
    uuid_from_short_code16(short_code)
}

pub fn derive_characteristic_id(short_code: &str) -> Result<Uuid, IdError> {
    uuid_from_short_code16(short_code)
}

/// Radio-visible identity of the local node. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    name: String,
    service_id: Uuid,
    characteristic_id: Uuid,
}

impl NodeIdentity {
    pub fn new(name: impl Into<String>, service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            name: name.into(),
            service_id,
            characteristic_id,
        }
    }

    /// Derive the identity from config. A missing or blank device name becomes `UnknownDevice`.
    pub fn from_config(config: &NodeConfig) -> Result<Self, IdError> {
        let name = config
            .device_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME);
        Ok(Self::new(
            name,
            derive_service_id(&config.service_code)?,
            derive_characteristic_id(&config.characteristic_code)?,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn characteristic_id(&self) -> Uuid {
        self.characteristic_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_code16_layout() {
        let id = derive_service_id("0001").unwrap();
        assert_eq!(id.to_string(), "00000001-0000-1000-beef-00805f9b34fc");
        let id = derive_characteristic_id("abCD").unwrap();
        assert_eq!(id.to_string(), "0000abcd-0000-1000-beef-00805f9b34fc");
    }

    #[test]
    fn short_code32_layout() {
        let id = uuid_from_short_code32("12345678").unwrap();
        assert_eq!(id.to_string(), "12345678-0000-1000-beef-00805f9b34fc");
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(
            derive_service_id("0001").unwrap(),
            derive_service_id("0001").unwrap()
        );
        assert_ne!(
            derive_service_id("0001").unwrap(),
            derive_characteristic_id("0002").unwrap()
        );
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!(matches!(
            derive_service_id("1"),
            Err(IdError::InvalidIdentifierFormat(_, 4))
        ));
        assert!(derive_service_id("00001").is_err());
        assert!(derive_service_id("00g1").is_err());
        assert!(derive_service_id("+001").is_err());
        assert!(uuid_from_short_code32("0001").is_err());
    }

    #[test]
    fn identity_from_config_falls_back_to_unknown_name() {
        let mut config = NodeConfig::default();
        config.device_name = Some("   ".into());
        let identity = NodeIdentity::from_config(&config).unwrap();
        assert_eq!(identity.name(), UNKNOWN_DEVICE_NAME);
        assert_eq!(identity.service_id(), derive_service_id("0001").unwrap());
        assert_eq!(
            identity.characteristic_id(),
            derive_characteristic_id("0002").unwrap()
        );

        config.device_name = Some("pixel-7".into());
        assert_eq!(NodeIdentity::from_config(&config).unwrap().name(), "pixel-7");

        config.service_code = "zz".into();
        assert!(NodeIdentity::from_config(&config).is_err());
    }
}
