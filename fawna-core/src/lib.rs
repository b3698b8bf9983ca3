//! Fawna mesh relay core.
//! Time-shares one BLE radio between scanning and advertising, links up with nearby
//! nodes and floods text envelopes across the mesh with hop counting and dedup.
//! Radio access is behind traits; hosts either run the tokio driver or poll commands.

pub mod config;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod platform;
pub mod registry;
pub mod relay;
pub mod scheduler;

pub mod host;
pub mod node;
pub mod runtime;

pub mod ffi;

pub use config::{NodeConfig, ScanMode};
pub use envelope::{decode, encode, extract_id, Envelope, EnvelopeError, MessageId};
pub use error::MeshError;
pub use ids::{derive_characteristic_id, derive_service_id, IdError, NodeIdentity};
pub use node::NodeContext;
pub use platform::{
    Advertisement, Capability, NotificationSink, PeerAddress, PeerLink, PermissionGate, Radio,
    RadioError, RadioEvent, ScanFilter,
};
pub use relay::RelayOutcome;
pub use runtime::{event_channel, EventReceiver, EventSender, MeshNode};
pub use scheduler::Role;
