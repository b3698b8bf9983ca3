//! Scan / advertise / connect workflow on top of the platform radio.
//!
//! Every operation checks the permission gate and radio power first and short-circuits
//! with `PermissionDenied` or `RadioUnavailable`. Nothing here retries: the role
//! scheduler's next switch is the retry.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{NodeConfig, ScanMode};
use crate::ids::NodeIdentity;
use crate::platform::{
    Advertisement, Capability, PeerAddress, PermissionGate, Radio, RadioError, ScanFilter,
};
use crate::registry::{LinkHandle, PeerConnection, PeerRegistry};
use crate::scheduler::{Role, RoleSwitch};

/// Radio functions this node believes are running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RadioActivity {
    pub scanning: bool,
    pub advertising: bool,
}

/// Result of a `Connected` event.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Registered; service discovery was requested.
    Registered,
    /// Registered, but service discovery could not be started.
    RegisteredWithoutDiscovery(RadioError),
    /// Address already connected; the new link was closed.
    Duplicate,
}

pub struct Discovery {
    radio: Arc<dyn Radio>,
    permissions: Arc<dyn PermissionGate>,
    filter: ScanFilter,
    advertisement: Advertisement,
}

impl Discovery {
    pub fn new(
        radio: Arc<dyn Radio>,
        permissions: Arc<dyn PermissionGate>,
        identity: &NodeIdentity,
        config: &NodeConfig,
    ) -> Self {
        let filter = match config.scan_mode {
            ScanMode::Service => ScanFilter::Service(identity.service_id()),
            ScanMode::Name => ScanFilter::DeviceName(config.name_filter.clone()),
        };
        let advertisement = Advertisement {
            service_id: identity.service_id(),
            device_name: config
                .include_device_name
                .then(|| identity.name().to_string()),
            connectable: true,
        };
        Self {
            radio,
            permissions,
            filter,
            advertisement,
        }
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn service_id(&self) -> Uuid {
        self.advertisement.service_id
    }

    /// Fail with `PermissionDenied` for the first missing capability.
    pub fn authorize(&self, capabilities: &[Capability]) -> Result<(), RadioError> {
        match capabilities
            .iter()
            .find(|c| !self.permissions.is_granted(**c))
        {
            Some(c) => Err(RadioError::PermissionDenied(*c)),
            None => Ok(()),
        }
    }

    fn ready(&self, capabilities: &[Capability]) -> Result<(), RadioError> {
        self.authorize(capabilities)?;
        if !self.radio.is_enabled() {
            return Err(RadioError::RadioUnavailable);
        }
        Ok(())
    }

    pub fn start_scan(&self, activity: &mut RadioActivity) -> Result<(), RadioError> {
        self.ready(&[Capability::Scan, Capability::Location])?;
        self.radio.start_scan(&self.filter)?;
        activity.scanning = true;
        tracing::info!(filter = ?self.filter, "scanning started");
        Ok(())
    }

    /// No-op when not scanning.
    pub fn stop_scan(&self, activity: &mut RadioActivity) -> Result<(), RadioError> {
        if !activity.scanning {
            return Ok(());
        }
        activity.scanning = false;
        self.radio.stop_scan()?;
        tracing::info!("scanning stopped");
        Ok(())
    }

    /// Stop any previous advertisement, then start a connectable one.
    pub fn start_advertising(&self, activity: &mut RadioActivity) -> Result<(), RadioError> {
        self.ready(&[Capability::Advertise])?;
        if let Err(e) = self.radio.stop_advertising() {
            tracing::debug!(error = %e, "stopping previous advertisement failed");
        }
        activity.advertising = false;
        self.radio.start_advertising(&self.advertisement)?;
        activity.advertising = true;
        tracing::info!(service = %self.advertisement.service_id, "advertising started");
        Ok(())
    }

    /// No-op when not advertising.
    pub fn stop_advertising(&self, activity: &mut RadioActivity) -> Result<(), RadioError> {
        if !activity.advertising {
            return Ok(());
        }
        activity.advertising = false;
        self.radio.stop_advertising()?;
        tracing::info!("advertising stopped");
        Ok(())
    }

    /// Start the radio function of `role`.
    pub fn enter(&self, role: Role, activity: &mut RadioActivity) -> Result<(), RadioError> {
        match role {
            Role::Central => self.start_scan(activity),
            Role::Peripheral => self.start_advertising(activity),
        }
    }

    /// Stop the old role's function and start the new one. Both halves are attempted;
    /// failures are returned for reporting.
    pub fn switch_role(&self, switch: RoleSwitch, activity: &mut RadioActivity) -> Vec<RadioError> {
        let stopped = match switch.from {
            Role::Central => self.stop_scan(activity),
            Role::Peripheral => self.stop_advertising(activity),
        };
        let started = self.enter(switch.to, activity);
        [stopped, started].into_iter().filter_map(Result::err).collect()
    }

    /// Stop both radio functions.
    pub fn stop_all(&self, activity: &mut RadioActivity) -> Vec<RadioError> {
        [self.stop_scan(activity), self.stop_advertising(activity)]
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Connect to a discovered peer unless it is connected or already being dialed.
    /// Returns whether a connection attempt was issued.
    pub fn on_peer_discovered(
        &self,
        address: &PeerAddress,
        registry: &PeerRegistry,
        pending: &mut HashSet<PeerAddress>,
    ) -> Result<bool, RadioError> {
        if registry.contains(address) || pending.contains(address) {
            return Ok(false);
        }
        self.ready(&[Capability::Connect])?;
        self.radio.connect(address)?;
        pending.insert(address.clone());
        tracing::info!(%address, "discovered peer, connecting");
        Ok(true)
    }

    /// Register a new link and ask it for its services.
    pub fn on_connected(
        &self,
        peer: PeerConnection,
        registry: &mut PeerRegistry,
        pending: &mut HashSet<PeerAddress>,
    ) -> ConnectOutcome {
        pending.remove(&peer.address);
        let link: LinkHandle = peer.link.clone();
        if let Err(rejected) = registry.add(peer) {
            tracing::debug!(address = %rejected.address, "already connected, closing new link");
            rejected.link.close();
            return ConnectOutcome::Duplicate;
        }
        match self
            .authorize(&[Capability::Connect])
            .and_then(|_| link.discover_services())
        {
            Ok(()) => ConnectOutcome::Registered,
            Err(e) => ConnectOutcome::RegisteredWithoutDiscovery(e),
        }
    }

    /// Whether a discovered service list can carry mesh envelopes.
    pub fn offers_mesh_service(&self, services: &[Uuid]) -> bool {
        services.contains(&self.advertisement.service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostPermissions, HostRadio, RadioCommand};
    use crate::ids::{derive_service_id, NodeIdentity};

    fn setup(config: NodeConfig) -> (Discovery, Arc<HostRadio>, Arc<HostPermissions>) {
        let radio = Arc::new(HostRadio::new());
        let perms = Arc::new(HostPermissions::all());
        let identity = NodeIdentity::from_config(&config).unwrap();
        let d = Discovery::new(radio.clone(), perms.clone(), &identity, &config);
        (d, radio, perms)
    }

    #[test]
    fn filter_follows_scan_mode() {
        let (d, _, _) = setup(NodeConfig::default());
        assert_eq!(
            d.filter(),
            &ScanFilter::Service(derive_service_id("0001").unwrap())
        );
        let (d, _, _) = setup(NodeConfig {
            scan_mode: ScanMode::Name,
            ..NodeConfig::default()
        });
        assert_eq!(d.filter(), &ScanFilter::DeviceName("ESP32_S3_NimBLE".into()));
    }

    #[test]
    fn advertisement_name_is_a_toggle() {
        let (d, _, _) = setup(NodeConfig {
            device_name: Some("node-a".into()),
            ..NodeConfig::default()
        });
        assert_eq!(d.advertisement().device_name, None);
        assert!(d.advertisement().connectable);
        let (d, _, _) = setup(NodeConfig {
            device_name: Some("node-a".into()),
            include_device_name: true,
            ..NodeConfig::default()
        });
        assert_eq!(d.advertisement().device_name.as_deref(), Some("node-a"));
    }

    #[test]
    fn scan_requires_permission_and_power() {
        let (d, radio, perms) = setup(NodeConfig::default());
        let mut activity = RadioActivity::default();

        perms.revoke(Capability::Location);
        assert_eq!(
            d.start_scan(&mut activity),
            Err(RadioError::PermissionDenied(Capability::Location))
        );
        perms.grant(Capability::Location);

        radio.set_enabled(false);
        assert_eq!(d.start_scan(&mut activity), Err(RadioError::RadioUnavailable));
        assert!(!activity.scanning);
        assert!(radio.drain_commands().is_empty());

        radio.set_enabled(true);
        d.start_scan(&mut activity).unwrap();
        assert!(activity.scanning);
        assert!(matches!(
            radio.drain_commands().as_slice(),
            [RadioCommand::StartScan(ScanFilter::Service(_))]
        ));
    }

    #[test]
    fn advertising_stops_previous_first() {
        let (d, radio, _) = setup(NodeConfig::default());
        let mut activity = RadioActivity::default();
        d.start_advertising(&mut activity).unwrap();
        let cmds = radio.drain_commands();
        assert!(matches!(
            cmds.as_slice(),
            [RadioCommand::StopAdvertising, RadioCommand::StartAdvertising(_)]
        ));
        assert!(activity.advertising);
    }

    #[test]
    fn stops_are_idempotent() {
        let (d, radio, _) = setup(NodeConfig::default());
        let mut activity = RadioActivity::default();
        assert!(d.stop_scan(&mut activity).is_ok());
        assert!(d.stop_advertising(&mut activity).is_ok());
        assert!(d.stop_all(&mut activity).is_empty());
        assert!(radio.drain_commands().is_empty());

        d.start_scan(&mut activity).unwrap();
        d.stop_scan(&mut activity).unwrap();
        d.stop_scan(&mut activity).unwrap();
        let cmds = radio.drain_commands();
        assert_eq!(
            cmds.iter()
                .filter(|c| matches!(c, RadioCommand::StopScan))
                .count(),
            1
        );
    }

    #[test]
    fn switch_role_reports_failures_but_still_stops() {
        let (d, radio, perms) = setup(NodeConfig::default());
        let mut activity = RadioActivity::default();
        d.start_scan(&mut activity).unwrap();
        radio.drain_commands();

        perms.revoke(Capability::Advertise);
        let errors = d.switch_role(
            RoleSwitch {
                from: Role::Central,
                to: Role::Peripheral,
            },
            &mut activity,
        );
        assert_eq!(errors, vec![RadioError::PermissionDenied(Capability::Advertise)]);
        assert!(!activity.scanning);
        assert!(!activity.advertising);
        assert!(matches!(radio.drain_commands().as_slice(), [RadioCommand::StopScan]));
    }

    #[test]
    fn discovered_peer_is_dialed_once() {
        let (d, radio, _) = setup(NodeConfig::default());
        let registry = PeerRegistry::new();
        let mut pending = HashSet::new();
        let addr = PeerAddress::from("AA:01");
        assert_eq!(d.on_peer_discovered(&addr, &registry, &mut pending), Ok(true));
        assert_eq!(d.on_peer_discovered(&addr, &registry, &mut pending), Ok(false));
        assert!(matches!(
            radio.drain_commands().as_slice(),
            [RadioCommand::Connect(a)] if *a == addr
        ));
    }

    #[test]
    fn connect_denied_without_permission() {
        let (d, radio, perms) = setup(NodeConfig::default());
        perms.revoke(Capability::Connect);
        let mut pending = HashSet::new();
        assert_eq!(
            d.on_peer_discovered(&"AA:01".into(), &PeerRegistry::new(), &mut pending),
            Err(RadioError::PermissionDenied(Capability::Connect))
        );
        assert!(pending.is_empty());
        assert!(radio.drain_commands().is_empty());
    }

    #[test]
    fn connected_registers_and_discovers_services() {
        let (d, radio, _) = setup(NodeConfig::default());
        let mut registry = PeerRegistry::new();
        let mut pending = HashSet::new();
        let addr = PeerAddress::from("AA:01");
        d.on_peer_discovered(&addr, &registry, &mut pending).unwrap();

        let peer = PeerConnection::new(addr.clone(), None, LinkHandle::new(radio.link(&addr)));
        assert!(matches!(
            d.on_connected(peer, &mut registry, &mut pending),
            ConnectOutcome::Registered
        ));
        assert!(pending.is_empty());
        assert!(registry.contains(&addr));

        let dup = PeerConnection::new(addr.clone(), None, LinkHandle::new(radio.link(&addr)));
        assert!(matches!(
            d.on_connected(dup, &mut registry, &mut pending),
            ConnectOutcome::Duplicate
        ));
        let cmds = radio.drain_commands();
        assert!(cmds
            .iter()
            .any(|c| matches!(c, RadioCommand::DiscoverServices(a) if *a == addr)));
        assert!(cmds
            .iter()
            .any(|c| matches!(c, RadioCommand::Disconnect(a) if *a == addr)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mesh_service_check() {
        let (d, _, _) = setup(NodeConfig::default());
        assert!(d.offers_mesh_service(&[derive_service_id("0001").unwrap()]));
        assert!(!d.offers_mesh_service(&[derive_service_id("0002").unwrap()]));
    }
}
