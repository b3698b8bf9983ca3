//! LAN stand-in for the BLE radio. Advertising is a periodic UDP multicast `Advert`,
//! scanning is filtering received adverts, and a connection is a TCP link to the
//! advertised transport port. Peer address = `ip:transport_port`.
//!
//! Of two nodes that see each other, only the one with the lower node id dials, so a
//! pair never ends up with two crossing links.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fawna_core::{
    Advertisement, EventSender, NodeIdentity, PeerAddress, PeerLink, Radio, RadioError,
    RadioEvent, ScanFilter,
};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::transport::{handshake, spawn_link};
use crate::wire::{decode_frame, encode_frame, Frame};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const ADVERT_INTERVAL: Duration = Duration::from_secs(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared with the background tasks.
struct Shared {
    node_id: Uuid,
    name: String,
    services: Vec<Uuid>,
    advert_target: SocketAddr,
    transport_port: u16,
    events: EventSender,
    scan: Mutex<Option<ScanFilter>>,
    /// Node id last advertised from each peer address.
    seen: Mutex<HashMap<PeerAddress, Uuid>>,
}

impl Shared {
    fn new(
        node_id: Uuid,
        name: String,
        services: Vec<Uuid>,
        advert_target: SocketAddr,
        transport_port: u16,
        events: EventSender,
    ) -> Self {
        Self {
            node_id,
            name,
            services,
            advert_target,
            transport_port,
            events,
            scan: Mutex::new(None),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn hello(&self) -> Frame {
        Frame::Hello {
            node_id: self.node_id,
            name: self.name.clone(),
            services: self.services.clone(),
            transport_port: self.transport_port,
        }
    }

    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event queue closed, dropping radio event");
        }
    }
}

pub struct LanRadio {
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    runtime: Handle,
    advertiser: Mutex<Option<JoinHandle<()>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LanRadio {
    /// Bind the advert socket and the link listener and start their receive loops.
    pub async fn bind(
        identity: &NodeIdentity,
        discovery_port: u16,
        transport_port: u16,
        events: EventSender,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(make_multicast_socket(discovery_port)?);
        let listener = TcpListener::bind(("0.0.0.0", transport_port)).await?;
        let shared = Arc::new(Shared::new(
            Uuid::new_v4(),
            identity.name().to_string(),
            vec![identity.service_id()],
            SocketAddr::from((MULTICAST_GROUP, discovery_port)),
            transport_port,
            events,
        ));
        let tasks = vec![
            tokio::spawn(advert_recv_loop(socket.clone(), shared.clone())),
            tokio::spawn(accept_loop(listener, shared.clone())),
        ];
        tracing::info!(discovery_port, transport_port, node_id = %shared.node_id, "LAN radio bound");
        Ok(Self::from_parts(shared, socket, tasks))
    }

    fn from_parts(shared: Arc<Shared>, socket: Arc<UdpSocket>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            shared,
            socket,
            runtime: Handle::current(),
            advertiser: Mutex::new(None),
            tasks,
        }
    }
}

impl Drop for LanRadio {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(task) = lock(&self.advertiser).take() {
            task.abort();
        }
    }
}

impl Radio for LanRadio {
    fn is_enabled(&self) -> bool {
        true
    }

    fn start_scan(&self, filter: &ScanFilter) -> Result<(), RadioError> {
        *lock(&self.shared.scan) = Some(filter.clone());
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        *lock(&self.shared.scan) = None;
        Ok(())
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError> {
        if !advertisement.connectable {
            return Err(RadioError::Other("only connectable adverts are supported".into()));
        }
        let frame = Frame::Advert {
            node_id: self.shared.node_id,
            name: advertisement.device_name.clone(),
            services: vec![advertisement.service_id],
            transport_port: self.shared.transport_port,
        };
        let bytes = encode_frame(&frame).map_err(|e| RadioError::Other(e.to_string()))?;
        let dest = self.shared.advert_target;
        let socket = self.socket.clone();
        let task = self.runtime.spawn(async move {
            loop {
                if let Err(e) = socket.send_to(&bytes, dest).await {
                    tracing::debug!(error = %e, "advert send failed");
                }
                tokio::time::sleep(ADVERT_INTERVAL).await;
            }
        });
        if let Some(previous) = lock(&self.advertiser).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), RadioError> {
        if let Some(task) = lock(&self.advertiser).take() {
            task.abort();
        }
        Ok(())
    }

    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError> {
        let target: SocketAddr = address
            .as_str()
            .parse()
            .map_err(|_| RadioError::Other(format!("not a socket address: {}", address)))?;
        let remote = lock(&self.shared.seen).get(address).copied();
        if remote.map_or(false, |id| id < self.shared.node_id) {
            tracing::debug!(%address, "peer has the lower node id, waiting for it to dial");
            self.shared.emit(RadioEvent::ConnectFailed {
                address: address.clone(),
                reason: "peer dials this node".into(),
            });
            return Ok(());
        }
        let shared = self.shared.clone();
        let address = address.clone();
        self.runtime.spawn(async move {
            match dial(&shared, target, address.clone()).await {
                Ok(event) => shared.emit(event),
                Err(e) => shared.emit(RadioEvent::ConnectFailed {
                    address,
                    reason: e.to_string(),
                }),
            }
        });
        Ok(())
    }
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn dial(
    shared: &Shared,
    target: SocketAddr,
    address: PeerAddress,
) -> std::io::Result<RadioEvent> {
    let mut stream = TcpStream::connect(target).await?;
    let mut buf = Vec::new();
    let remote = handshake(&mut stream, &shared.hello(), &mut buf).await?;
    let link: Arc<dyn PeerLink> = Arc::new(spawn_link(
        stream,
        buf,
        address.clone(),
        &remote,
        shared.events.clone(),
    ));
    Ok(RadioEvent::Connected {
        address,
        name: Some(remote.name),
        link,
    })
}

async fn advert_recv_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!(error = %e, "advert socket failed");
                return;
            }
        };
        let Ok((frame, _)) = decode_frame(&buf[..n]) else {
            continue;
        };
        if let Some(event) = on_advert(&shared, frame, from) {
            shared.emit(event);
        }
    }
}

/// Turn one received advert into a scan result, if a scan is running and it matches.
fn on_advert(shared: &Shared, frame: Frame, from: SocketAddr) -> Option<RadioEvent> {
    let Frame::Advert {
        node_id,
        name,
        services,
        transport_port,
    } = frame
    else {
        return None;
    };
    if node_id == shared.node_id {
        return None;
    }
    let address = PeerAddress::new(SocketAddr::new(from.ip(), transport_port).to_string());
    lock(&shared.seen).insert(address.clone(), node_id);
    let passes = lock(&shared.scan)
        .as_ref()
        .map_or(false, |f| f.matches(name.as_deref(), &services));
    passes.then_some(RadioEvent::PeerDiscovered { address, name })
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let (mut stream, from) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let remote = match handshake(&mut stream, &shared.hello(), &mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(%from, error = %e, "inbound handshake failed");
                    return;
                }
            };
            let address = PeerAddress::new(SocketAddr::new(from.ip(), remote.transport_port).to_string());
            tracing::debug!(%address, node_id = %remote.node_id, "inbound link");
            let link: Arc<dyn PeerLink> = Arc::new(spawn_link(
                stream,
                buf,
                address.clone(),
                &remote,
                shared.events.clone(),
            ));
            shared.emit(RadioEvent::Connected {
                address,
                name: Some(remote.name),
                link,
            });
        });
    }
}
