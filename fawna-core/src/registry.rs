//! Connected peers, keyed by radio address, with the best known hop distance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::platform::{PeerAddress, PeerLink, RadioError};

struct LinkInner {
    link: Arc<dyn PeerLink>,
    closed: AtomicBool,
}

/// Shared handle to a platform link. Clones share one close-once flag, so the
/// platform sees exactly one `close` however many teardown paths race.
#[derive(Clone)]
pub struct LinkHandle(Arc<LinkInner>);

impl LinkHandle {
    pub fn new(link: Arc<dyn PeerLink>) -> Self {
        LinkHandle(Arc::new(LinkInner {
            link,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), RadioError> {
        if self.is_closed() {
            return Err(RadioError::Other("link closed".into()));
        }
        self.0.link.write(characteristic, payload)
    }

    pub fn discover_services(&self) -> Result<(), RadioError> {
        self.0.link.discover_services()
    }

    /// Close the link. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.0.link.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A live link to one neighbor.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    pub address: PeerAddress,
    pub name: Option<String>,
    /// Hop count of the latest envelope received from this peer; 0 until one arrives.
    pub hop_distance: u32,
    pub link: LinkHandle,
}

impl PeerConnection {
    pub fn new(address: PeerAddress, name: Option<String>, link: LinkHandle) -> Self {
        Self {
            address,
            name,
            hop_distance: 0,
            link,
        }
    }
}

/// At most one connection per address.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerAddress, PeerConnection>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. If the address is already connected the registry keeps the
    /// existing entry and hands the new one back so the caller can close its link.
    pub fn add(&mut self, peer: PeerConnection) -> Result<(), PeerConnection> {
        if self.peers.contains_key(&peer.address) {
            return Err(peer);
        }
        self.peers.insert(peer.address.clone(), peer);
        Ok(())
    }

    /// Remove a peer. Absent addresses are a no-op.
    pub fn remove(&mut self, address: &PeerAddress) -> Option<PeerConnection> {
        self.peers.remove(address)
    }

    /// Overwrite the hop distance with the latest observation. Returns false if unknown.
    pub fn update_hop_distance(&mut self, address: &PeerAddress, hops: u32) -> bool {
        match self.peers.get_mut(address) {
            Some(peer) => {
                peer.hop_distance = hops;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every peer except `address`.
    pub fn all_except(&self, address: &PeerAddress) -> Vec<PeerConnection> {
        self.peers
            .values()
            .filter(|p| p.address != *address)
            .cloned()
            .collect()
    }

    /// Snapshot of every peer.
    pub fn all(&self) -> Vec<PeerConnection> {
        self.peers.values().cloned().collect()
    }

    pub fn get(&self, address: &PeerAddress) -> Option<&PeerConnection> {
        self.peers.get(address)
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn hop_distances(&self) -> BTreeMap<PeerAddress, u32> {
        self.peers
            .iter()
            .map(|(a, p)| (a.clone(), p.hop_distance))
            .collect()
    }

    /// Remove every peer (teardown).
    pub fn drain(&mut self) -> Vec<PeerConnection> {
        std::mem::take(&mut self.peers).into_values().collect()
    }
}
