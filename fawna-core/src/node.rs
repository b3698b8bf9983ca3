//! Node context: the one owner of all mutable mesh state.
//!
//! Radio callbacks, the role timer and UI calls may arrive on different threads. They
//! all go through a single coarse lock on [`NodeState`]; envelope writes to peers happen
//! after the lock is released, on a snapshot of the registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::discovery::{ConnectOutcome, Discovery, RadioActivity};
use crate::envelope::{self, Envelope, MessageId};
use crate::error::MeshError;
use crate::ids::{IdError, NodeIdentity};
use crate::platform::{
    Capability, NotificationSink, PeerAddress, PeerLink, PermissionGate, Radio, RadioEvent,
};
use crate::registry::{LinkHandle, PeerConnection, PeerRegistry};
use crate::relay::{self, Admission, RelayOutcome, RelayState};
use crate::scheduler::{Role, RoleScheduler};

struct NodeState {
    running: bool,
    scheduler: RoleScheduler,
    activity: RadioActivity,
    peers: PeerRegistry,
    /// Addresses with a connect in flight.
    pending: HashSet<PeerAddress>,
    relay: RelayState,
}

/// Owned mesh context. Its useful life is the span between `start` and `stop`.
pub struct NodeContext {
    identity: NodeIdentity,
    discovery: Discovery,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<NodeState>,
}

impl NodeContext {
    pub fn new(
        config: &NodeConfig,
        radio: Arc<dyn Radio>,
        permissions: Arc<dyn PermissionGate>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, IdError> {
        let identity = NodeIdentity::from_config(config)?;
        let discovery = Discovery::new(radio, permissions, &identity, config);
        Ok(Self {
            identity,
            discovery,
            sink,
            state: Mutex::new(NodeState {
                running: false,
                scheduler: RoleScheduler::new(config.role_switch_interval()),
                activity: RadioActivity::default(),
                peers: PeerRegistry::new(),
                pending: HashSet::new(),
                relay: RelayState::new(),
            }),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, error: MeshError) {
        tracing::warn!(error = %error, "mesh operation failed");
        self.sink.on_failure(&error);
    }

    /// Enter the central role and begin scanning. No-op if already running.
    pub fn start(&self) {
        let result = {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.running {
                return;
            }
            state.running = true;
            state.scheduler.reset();
            state.pending.clear();
            self.discovery
                .enter(state.scheduler.role(), &mut state.activity)
        };
        tracing::info!(name = %self.identity.name(), service = %self.identity.service_id(), "node started");
        if let Err(e) = result {
            self.report(e.into());
        }
    }

    /// Stop scanning and advertising and close every open link.
    pub fn stop(&self) {
        let (peers, errors) = {
            let mut guard = self.state();
            let state = &mut *guard;
            if !state.running {
                return;
            }
            state.running = false;
            state.pending.clear();
            let errors = self.discovery.stop_all(&mut state.activity);
            (state.peers.drain(), errors)
        };
        for e in errors {
            tracing::debug!(error = %e, "stopping radio during teardown failed");
        }
        let had_peers = !peers.is_empty();
        for peer in peers {
            peer.link.close();
        }
        if had_peers {
            self.sink.on_peers_changed();
        }
        tracing::info!("node stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn role(&self) -> Role {
        self.state().scheduler.role()
    }

    pub fn role_switch_interval(&self) -> Duration {
        self.state().scheduler.interval()
    }

    /// Role timer callback: flip the role and swap the radio function. The role flips
    /// even when the radio refuses; failures are reported.
    pub fn tick(&self) -> Role {
        let (to, errors) = {
            let mut guard = self.state();
            let state = &mut *guard;
            if !state.running {
                return state.scheduler.role();
            }
            let switch = state.scheduler.tick();
            if switch.to == Role::Central {
                // A fresh scan cycle retries connects the stack never answered.
                state.pending.clear();
            }
            let errors = self.discovery.switch_role(switch, &mut state.activity);
            (switch.to, errors)
        };
        tracing::debug!(role = %to, "role switched");
        for e in errors {
            self.report(e.into());
        }
        to
    }

    /// Entry point for every radio callback.
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::PeerDiscovered { address, name } => {
                let result = {
                    let mut guard = self.state();
                    let state = &mut *guard;
                    if !state.running {
                        return;
                    }
                    self.discovery
                        .on_peer_discovered(&address, &state.peers, &mut state.pending)
                };
                tracing::trace!(%address, ?name, "scan result");
                if let Err(e) = result {
                    self.report(e.into());
                }
            }
            RadioEvent::Connected {
                address,
                name,
                link,
            } => self.on_connected(address, name, link),
            RadioEvent::ConnectFailed { address, reason } => {
                self.state().pending.remove(&address);
                tracing::info!(%address, %reason, "connect failed");
            }
            RadioEvent::ServicesDiscovered { address, services } => {
                if self.discovery.offers_mesh_service(&services) {
                    tracing::info!(%address, "mesh service discovered");
                } else {
                    tracing::warn!(%address, ?services, "peer has no mesh service, disconnecting");
                    self.teardown(&address);
                }
            }
            RadioEvent::Disconnected { address } => {
                tracing::info!(%address, "disconnected");
                self.teardown(&address);
            }
            RadioEvent::DataReceived { address, payload } => {
                self.on_envelope_received(&payload, &address);
            }
        }
    }

    fn on_connected(&self, address: PeerAddress, name: Option<String>, link: Arc<dyn PeerLink>) {
        let link = LinkHandle::new(link);
        let outcome = {
            let mut guard = self.state();
            let state = &mut *guard;
            if !state.running {
                None
            } else {
                let peer = PeerConnection::new(address.clone(), name, link.clone());
                Some(
                    self.discovery
                        .on_connected(peer, &mut state.peers, &mut state.pending),
                )
            }
        };
        match outcome {
            None => {
                tracing::debug!(%address, "connected after stop, closing");
                link.close();
            }
            Some(ConnectOutcome::Registered) => {
                tracing::info!(%address, "connected");
                self.sink.on_peers_changed();
            }
            Some(ConnectOutcome::RegisteredWithoutDiscovery(e)) => {
                self.report(e.into());
                self.sink.on_peers_changed();
            }
            Some(ConnectOutcome::Duplicate) => {}
        }
    }

    fn teardown(&self, address: &PeerAddress) {
        let removed = self.state().peers.remove(address);
        if let Some(peer) = removed {
            peer.link.close();
            self.sink.on_peers_changed();
        }
    }

    /// Handle one inbound record from `from`: drop malformed records and duplicates,
    /// otherwise mark processed, record the sender's hop distance and forward with
    /// hop count + 1 to every other peer.
    ///
    /// The id is checked before the full decode, so a broken record carrying an
    /// already processed id counts as `Duplicate` and is not reported.
    pub fn on_envelope_received(&self, bytes: &[u8], from: &PeerAddress) -> RelayOutcome {
        if let Ok(id) = envelope::extract_id(bytes) {
            if self.state().relay.is_processed(&id) {
                tracing::debug!(%from, message_id = %id, "duplicate dropped");
                return RelayOutcome::Duplicate(id);
            }
        }
        let envelope = match envelope::decode(bytes) {
            Ok(e) => e,
            Err(source) => {
                self.report(MeshError::Envelope {
                    from: from.clone(),
                    source,
                });
                return RelayOutcome::Malformed;
            }
        };
        let targets = {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.relay.admit(&envelope, bytes) == Admission::Duplicate {
                return RelayOutcome::Duplicate(envelope.message_id);
            }
            state.peers.update_hop_distance(from, envelope.hop_count);
            state.peers.all_except(from)
        };
        tracing::info!(
            %from,
            message_id = %envelope.message_id,
            hop_count = envelope.hop_count,
            peers = targets.len(),
            "relaying envelope"
        );
        self.sink.on_message(&envelope);
        let (written, failed) = self.forward(&targets, &envelope.relayed());
        RelayOutcome::Forwarded {
            message_id: envelope.message_id,
            written,
            failed,
        }
    }

    /// Author a post and send it to every connected peer.
    pub fn post(&self, content: &str) -> MessageId {
        let envelope = Envelope::new(self.identity.name(), content);
        let raw = envelope::encode(&envelope);
        let targets = {
            let mut state = self.state();
            state.relay.admit(&envelope, &raw);
            state.peers.all()
        };
        tracing::info!(message_id = %envelope.message_id, peers = targets.len(), "posting");
        self.sink.on_message(&envelope);
        self.forward(&targets, &envelope);
        envelope.message_id
    }

    fn forward(&self, targets: &[PeerConnection], envelope: &Envelope) -> (usize, usize) {
        if targets.is_empty() {
            return (0, 0);
        }
        if let Err(e) = self.discovery.authorize(&[Capability::Connect]) {
            self.report(e.into());
            return (0, targets.len());
        }
        let out = relay::fan_out(targets, self.identity.characteristic_id(), envelope);
        let counts = (out.written.len(), out.failed.len());
        for (_, e) in out.failed {
            self.report(e.into());
        }
        counts
    }

    /// Every processed record, in processing order.
    pub fn read_all(&self) -> Vec<String> {
        self.state().relay.read_all()
    }

    pub fn post_count(&self) -> usize {
        self.state().relay.record_count()
    }

    /// One raw record by position, oldest first, without copying the whole log.
    pub fn post_at(&self, index: usize) -> Option<String> {
        self.state().relay.record(index).map(str::to_owned)
    }

    /// Connected peers and their latest hop distance.
    pub fn list_peers(&self) -> BTreeMap<PeerAddress, u32> {
        self.state().peers.hop_distances()
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.state().relay.is_processed(id)
    }

    pub fn processed_count(&self) -> usize {
        self.state().relay.processed().len()
    }
}
