//! Host-driven radio: the core queues radio commands, the embedding platform (Android
//! JNI, a test harness) polls and executes them, then feeds outcomes back as events.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::platform::{
    Advertisement, Capability, PeerAddress, PeerLink, PermissionGate, Radio, RadioError,
    ScanFilter,
};

/// A radio operation for the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan(ScanFilter),
    StopScan,
    StartAdvertising(Advertisement),
    StopAdvertising,
    Connect(PeerAddress),
    DiscoverServices(PeerAddress),
    Write {
        address: PeerAddress,
        characteristic: Uuid,
        payload: Vec<u8>,
    },
    Disconnect(PeerAddress),
}

impl RadioCommand {
    /// Tab-separated line for hosts that read commands as text. Payload is the last
    /// field so it may contain tabs.
    pub fn to_host_line(&self) -> String {
        let mut s = String::new();
        let _ = match self {
            RadioCommand::StartScan(ScanFilter::Service(id)) => write!(s, "start_scan\tservice\t{}", id),
            RadioCommand::StartScan(ScanFilter::DeviceName(name)) => {
                write!(s, "start_scan\tname\t{}", name)
            }
            RadioCommand::StopScan => write!(s, "stop_scan"),
            RadioCommand::StartAdvertising(ad) => write!(
                s,
                "start_advertising\t{}\t{}\t{}",
                ad.service_id,
                ad.device_name.as_deref().unwrap_or(""),
                ad.connectable as u8
            ),
            RadioCommand::StopAdvertising => write!(s, "stop_advertising"),
            RadioCommand::Connect(a) => write!(s, "connect\t{}", a),
            RadioCommand::DiscoverServices(a) => write!(s, "discover_services\t{}", a),
            RadioCommand::Write {
                address,
                characteristic,
                payload,
            } => write!(
                s,
                "write\t{}\t{}\t{}",
                address,
                characteristic,
                String::from_utf8_lossy(payload)
            ),
            RadioCommand::Disconnect(a) => write!(s, "disconnect\t{}", a),
        };
        s
    }
}

type CommandQueue = Arc<Mutex<VecDeque<RadioCommand>>>;

fn lock(queue: &CommandQueue) -> MutexGuard<'_, VecDeque<RadioCommand>> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}

/// Radio that records commands instead of touching hardware.
#[derive(Debug)]
pub struct HostRadio {
    enabled: AtomicBool,
    commands: CommandQueue,
}

impl HostRadio {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            commands: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Host reports the adapter being powered on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn poll_command(&self) -> Option<RadioCommand> {
        lock(&self.commands).pop_front()
    }

    /// Put a polled command back at the head of the queue.
    pub fn requeue(&self, command: RadioCommand) {
        lock(&self.commands).push_front(command);
    }

    pub fn drain_commands(&self) -> Vec<RadioCommand> {
        lock(&self.commands).drain(..).collect()
    }

    /// Link whose operations are queued as commands addressed to `address`.
    pub fn link(&self, address: &PeerAddress) -> Arc<dyn PeerLink> {
        Arc::new(HostLink {
            address: address.clone(),
            commands: self.commands.clone(),
        })
    }

    fn push(&self, command: RadioCommand) {
        lock(&self.commands).push_back(command);
    }
}

impl Default for HostRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for HostRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn start_scan(&self, filter: &ScanFilter) -> Result<(), RadioError> {
        self.push(RadioCommand::StartScan(filter.clone()));
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        self.push(RadioCommand::StopScan);
        Ok(())
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError> {
        self.push(RadioCommand::StartAdvertising(advertisement.clone()));
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), RadioError> {
        self.push(RadioCommand::StopAdvertising);
        Ok(())
    }

    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError> {
        self.push(RadioCommand::Connect(address.clone()));
        Ok(())
    }
}

struct HostLink {
    address: PeerAddress,
    commands: CommandQueue,
}

impl PeerLink for HostLink {
    fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), RadioError> {
        lock(&self.commands).push_back(RadioCommand::Write {
            address: self.address.clone(),
            characteristic,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn discover_services(&self) -> Result<(), RadioError> {
        lock(&self.commands).push_back(RadioCommand::DiscoverServices(self.address.clone()));
        Ok(())
    }

    fn close(&self) {
        lock(&self.commands).push_back(RadioCommand::Disconnect(self.address.clone()));
    }
}

/// Granted capabilities as a bitmask (see `Capability::bit`), updated by the host.
#[derive(Debug)]
pub struct HostPermissions {
    mask: AtomicU32,
}

impl HostPermissions {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            mask: AtomicU32::new(mask),
        }
    }

    pub fn all() -> Self {
        Self::from_mask(Capability::ALL.iter().fold(0, |m, c| m | c.bit()))
    }

    pub fn none() -> Self {
        Self::from_mask(0)
    }

    pub fn set_mask(&self, mask: u32) {
        self.mask.store(mask, Ordering::Release);
    }

    pub fn mask(&self) -> u32 {
        self.mask.load(Ordering::Acquire)
    }

    pub fn grant(&self, capability: Capability) {
        self.mask.fetch_or(capability.bit(), Ordering::AcqRel);
    }

    pub fn revoke(&self, capability: Capability) {
        self.mask.fetch_and(!capability.bit(), Ordering::AcqRel);
    }
}

impl PermissionGate for HostPermissions {
    fn is_granted(&self, capability: Capability) -> bool {
        self.mask() & capability.bit() != 0
    }
}
