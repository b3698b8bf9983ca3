//! Boundary contracts with the embedding platform: permissions, BLE radio primitives,
//! per-peer links, radio events, and the UI notification sink.
//!
//! Every radio call is fire-and-continue. Outcomes that the stack reports later
//! (connection established, services discovered, data received) come back as
//! [`RadioEvent`]s through the node's event queue.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::MeshError;

/// Runtime authorizations the core checks before touching the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Scan,
    Connect,
    Advertise,
    /// Coarse location; some stacks require it for scanning.
    Location,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Scan,
        Capability::Connect,
        Capability::Advertise,
        Capability::Location,
    ];

    /// Bit used by hosts that pass permissions as a mask.
    pub fn bit(self) -> u32 {
        match self {
            Capability::Scan => 1,
            Capability::Connect => 1 << 1,
            Capability::Advertise => 1 << 2,
            Capability::Location => 1 << 3,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Scan => "scan",
            Capability::Connect => "connect",
            Capability::Advertise => "advertise",
            Capability::Location => "location",
        };
        f.write_str(s)
    }
}

/// Radio hardware address of a peer. Unique key of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        PeerAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        PeerAddress(s.to_string())
    }
}

/// Radio failure of a single operation. Never fatal; the next role switch retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("permission denied: {0}")]
    PermissionDenied(Capability),
    #[error("radio unavailable")]
    RadioUnavailable,
    #[error("write to {0} failed: {1}")]
    PeerWriteFailed(PeerAddress, String),
    #[error("radio operation failed: {0}")]
    Other(String),
}

/// Which peers a scan reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    Service(Uuid),
    DeviceName(String),
}

impl ScanFilter {
    /// Whether an advertisement with this name and these services passes the filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        match self {
            ScanFilter::Service(id) => services.contains(id),
            ScanFilter::DeviceName(want) => name == Some(want.as_str()),
        }
    }
}

/// Connectable advertisement of the mesh service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub service_id: Uuid,
    /// Present only when the device name is configured to be advertised.
    pub device_name: Option<String>,
    pub connectable: bool,
}

/// Platform permission check.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self, capability: Capability) -> bool;
}

/// Grants everything. For platforms without runtime permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn is_granted(&self, _capability: Capability) -> bool {
        true
    }
}

/// BLE radio primitives. Stop calls must be idempotent.
pub trait Radio: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn start_scan(&self, filter: &ScanFilter) -> Result<(), RadioError>;
    fn stop_scan(&self) -> Result<(), RadioError>;
    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError>;
    fn stop_advertising(&self) -> Result<(), RadioError>;
    /// Begin connecting. Reported later as `Connected` or `ConnectFailed`.
    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError>;
}

/// One open radio link to a neighbor.
pub trait PeerLink: Send + Sync {
    /// Write one envelope to the peer's mesh characteristic.
    fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), RadioError>;
    /// Begin service discovery. Reported later as `ServicesDiscovered`.
    fn discover_services(&self) -> Result<(), RadioError>;
    /// Release the link. Called at most once per link.
    fn close(&self);
}

/// Asynchronous notifications from the radio stack.
pub enum RadioEvent {
    PeerDiscovered {
        address: PeerAddress,
        name: Option<String>,
    },
    Connected {
        address: PeerAddress,
        name: Option<String>,
        link: Arc<dyn PeerLink>,
    },
    ConnectFailed {
        address: PeerAddress,
        reason: String,
    },
    ServicesDiscovered {
        address: PeerAddress,
        services: Vec<Uuid>,
    },
    Disconnected {
        address: PeerAddress,
    },
    DataReceived {
        address: PeerAddress,
        payload: Vec<u8>,
    },
}

impl fmt::Debug for RadioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioEvent::PeerDiscovered { address, name } => f
                .debug_struct("PeerDiscovered")
                .field("address", address)
                .field("name", name)
                .finish(),
            RadioEvent::Connected { address, name, .. } => f
                .debug_struct("Connected")
                .field("address", address)
                .field("name", name)
                .finish_non_exhaustive(),
            RadioEvent::ConnectFailed { address, reason } => f
                .debug_struct("ConnectFailed")
                .field("address", address)
                .field("reason", reason)
                .finish(),
            RadioEvent::ServicesDiscovered { address, services } => f
                .debug_struct("ServicesDiscovered")
                .field("address", address)
                .field("services", services)
                .finish(),
            RadioEvent::Disconnected { address } => f
                .debug_struct("Disconnected")
                .field("address", address)
                .finish(),
            RadioEvent::DataReceived { address, payload } => f
                .debug_struct("DataReceived")
                .field("address", address)
                .field("len", &payload.len())
                .finish(),
        }
    }
}

/// Outward notifications to the UI layer.
pub trait NotificationSink: Send + Sync {
    /// A new envelope was accepted (authored locally or received).
    fn on_message(&self, _envelope: &Envelope) {}
    /// The set of connected peers changed.
    fn on_peers_changed(&self) {}
    /// A recovered failure the UI may want to surface.
    fn on_failure(&self, _error: &MeshError) {}
}

/// Sink that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl NotificationSink for SilentSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_filter_matching() {
        let service = Uuid::from_u128(1);
        let by_service = ScanFilter::Service(service);
        assert!(by_service.matches(None, &[Uuid::from_u128(2), service]));
        assert!(!by_service.matches(Some("node"), &[]));

        let by_name = ScanFilter::DeviceName("ESP32_S3_NimBLE".into());
        assert!(by_name.matches(Some("ESP32_S3_NimBLE"), &[]));
        assert!(!by_name.matches(Some("ESP32"), &[service]));
        assert!(!by_name.matches(None, &[service]));
    }

    #[test]
    fn capability_bits_are_distinct() {
        let mask = Capability::ALL.iter().fold(0, |m, c| m | c.bit());
        assert_eq!(mask, 0b1111);
    }
}
