//! Failures the node reports to its observability sink.

use crate::envelope::EnvelopeError;
use crate::ids::IdError;
use crate::platform::{Capability, PeerAddress, RadioError};

/// Everything the core can report. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Identifier(#[from] IdError),

    #[error("from {from}: {source}")]
    Envelope {
        from: PeerAddress,
        #[source]
        source: EnvelopeError,
    },

    #[error(transparent)]
    Radio(#[from] RadioError),
}

impl MeshError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, MeshError::Radio(RadioError::PermissionDenied(_)))
    }

    pub fn denied_capability(&self) -> Option<Capability> {
        match self {
            MeshError::Radio(RadioError::PermissionDenied(c)) => Some(*c),
            _ => None,
        }
    }
}
