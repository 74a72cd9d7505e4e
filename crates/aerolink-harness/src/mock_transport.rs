//! Deterministic in-memory link transport
//!
//! Provides a mock airspace connecting a central-side transport and any
//! number of nodes without hardware dependencies. Nodes are either
//! scripted (their services and failure behavior declared up front) or
//! live peripherals driven by a `PeripheralTask` through the
//! [`aerolink_core::PeripheralTransport`] seam, which makes full loop-back
//! scenarios possible.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use aerolink_core::transport::{
    CharacteristicInfo, LinkEvent, LinkTransport, PeripheralEvent, PeripheralTransport,
};
use aerolink_core::{
    AdvertisedIdentity, CharacteristicHandle, CharacteristicId, LinkError, LinkHandle,
    PeerAddress, PeerHandle, ServiceHandle, ServiceId,
};

// ----------------------------------------------------------------------------
// Node Specification
// ----------------------------------------------------------------------------

/// A characteristic a mock node exposes
#[derive(Debug, Clone, Copy)]
pub struct MockCharacteristic {
    pub id: CharacteristicId,
    pub supports_notify: bool,
}

impl MockCharacteristic {
    pub fn notifiable(id: CharacteristicId) -> Self {
        Self {
            id,
            supports_notify: true,
        }
    }

    pub fn write_only(id: CharacteristicId) -> Self {
        Self {
            id,
            supports_notify: false,
        }
    }
}

/// Declarative description of a scripted node
#[derive(Debug, Clone)]
pub struct MockNodeSpec {
    pub address: PeerAddress,
    pub advertised: Vec<ServiceId>,
    pub gatt: HashMap<ServiceId, Vec<MockCharacteristic>>,
    pub refuse_connect: bool,
}

impl MockNodeSpec {
    pub fn new(address: PeerAddress) -> Self {
        Self {
            address,
            advertised: Vec::new(),
            gatt: HashMap::new(),
            refuse_connect: false,
        }
    }

    /// Advertise a service (without necessarily exposing it)
    pub fn advertising(mut self, service: ServiceId) -> Self {
        self.advertised.push(service);
        self
    }

    /// Expose a service with the given characteristics
    pub fn with_service(
        mut self,
        service: ServiceId,
        characteristics: Vec<MockCharacteristic>,
    ) -> Self {
        self.gatt.insert(service, characteristics);
        self
    }

    /// Advertise and expose a full identity with a notifiable characteristic
    pub fn with_identity(self, identity: AdvertisedIdentity) -> Self {
        self.advertising(identity.service).with_service(
            identity.service,
            vec![MockCharacteristic::notifiable(identity.characteristic)],
        )
    }

    /// Refuse every connection attempt
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connect = true;
        self
    }
}

// ----------------------------------------------------------------------------
// Airspace State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CharBinding {
    address: PeerAddress,
    id: CharacteristicId,
    supports_notify: bool,
}

struct Node {
    advertised: Vec<ServiceId>,
    advertising: bool,
    gatt: HashMap<ServiceId, Vec<MockCharacteristic>>,
    refuse_connect: bool,
    attached: Option<LinkHandle>,
    last_value: Vec<u8>,
    /// Characteristic of the identity currently on air (live nodes)
    active_characteristic: Option<CharacteristicId>,
    /// Writes received by this node
    received: Vec<Vec<u8>>,
    /// Event channel of the live peripheral driving this node, if any
    peripheral_tx: Option<mpsc::UnboundedSender<PeripheralEvent>>,
    peripheral_rx: Option<mpsc::UnboundedReceiver<PeripheralEvent>>,
}

/// Call counters, for asserting on transport interactions
#[derive(Debug, Clone, Copy, Default)]
pub struct AirspaceStats {
    pub start_scan_calls: u32,
    pub stop_scan_calls: u32,
    pub connect_attempts: u32,
    pub disconnects: u32,
}

struct Inner {
    nodes: HashMap<PeerAddress, Node>,
    scanning: bool,
    central_tx: mpsc::UnboundedSender<LinkEvent>,
    central_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    next_handle: u64,
    links: HashMap<LinkHandle, PeerAddress>,
    services: HashMap<ServiceHandle, (PeerAddress, ServiceId)>,
    characteristics: HashMap<CharacteristicHandle, CharBinding>,
    subscribed: HashSet<CharacteristicHandle>,
    stats: AirspaceStats,
}

impl Inner {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Invalidate every handle resolved against a node
    fn purge_bindings(&mut self, address: PeerAddress) {
        self.services.retain(|_, (a, _)| *a != address);
        let stale: Vec<CharacteristicHandle> = self
            .characteristics
            .iter()
            .filter(|(_, b)| b.address == address)
            .map(|(h, _)| *h)
            .collect();
        for handle in stale {
            self.characteristics.remove(&handle);
            self.subscribed.remove(&handle);
        }
    }

    /// Drop the link to a node, notifying both sides
    fn sever(&mut self, address: PeerAddress, reason: &str) {
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        let Some(link) = node.attached.take() else {
            return;
        };
        self.links.remove(&link);
        if let Some(tx) = &node.peripheral_tx {
            let _ = tx.send(PeripheralEvent::CentralDisconnected);
        }
        let _ = self.central_tx.send(LinkEvent::LinkLost {
            link,
            reason: reason.to_string(),
        });
        self.purge_bindings(address);
    }
}

// ----------------------------------------------------------------------------
// Mock Airspace
// ----------------------------------------------------------------------------

/// Shared in-memory radio environment
#[derive(Clone)]
pub struct MockAirspace {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockAirspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAirspace {
    pub fn new() -> Self {
        let (central_tx, central_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes: HashMap::new(),
                scanning: false,
                central_tx,
                central_rx: Some(central_rx),
                next_handle: 0,
                links: HashMap::new(),
                services: HashMap::new(),
                characteristics: HashMap::new(),
                subscribed: HashSet::new(),
                stats: AirspaceStats::default(),
            })),
        }
    }

    /// The central-side transport for this airspace
    pub fn central(&self) -> MockCentral {
        MockCentral {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Add a scripted node that advertises persistently
    pub fn add_node(&self, spec: MockNodeSpec) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            spec.address,
            Node {
                advertised: spec.advertised,
                advertising: true,
                gatt: spec.gatt,
                refuse_connect: spec.refuse_connect,
                attached: None,
                last_value: Vec::new(),
                active_characteristic: None,
                received: Vec::new(),
                peripheral_tx: None,
                peripheral_rx: None,
            },
        );
    }

    /// Register a live peripheral node covering the given identities and
    /// return its transport end
    pub fn create_peripheral(
        &self,
        address: PeerAddress,
        identities: &[AdvertisedIdentity],
    ) -> MockPeripheral {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut gatt = HashMap::new();
        for identity in identities {
            gatt.insert(
                identity.service,
                vec![MockCharacteristic::notifiable(identity.characteristic)],
            );
        }
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            address,
            Node {
                advertised: Vec::new(),
                advertising: false,
                gatt,
                refuse_connect: false,
                attached: None,
                last_value: Vec::new(),
                active_characteristic: None,
                received: Vec::new(),
                peripheral_tx: Some(tx),
                peripheral_rx: Some(rx),
            },
        );
        MockPeripheral {
            inner: Arc::clone(&self.inner),
            address,
        }
    }

    /// Emit one advertisement from a node
    pub fn advertise_node(&self, address: PeerAddress) {
        let inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get(&address) {
            let _ = inner.central_tx.send(LinkEvent::AdvertisementObserved {
                address,
                services: node.advertised.clone(),
            });
        }
    }

    /// Simulate radio loss of the link to a node
    pub fn drop_link_to(&self, address: PeerAddress) {
        self.inner.lock().unwrap().sever(address, "radio loss");
    }

    /// Take a node on or off the air (scripted nodes re-announce on every
    /// fresh scan while on air)
    pub fn set_advertising(&self, address: PeerAddress, advertising: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&address) {
            node.advertising = advertising;
        }
    }

    /// Push a value change from a scripted node on one of its
    /// characteristics; delivered only to subscribed handles
    pub fn notify_from(
        &self,
        address: PeerAddress,
        characteristic: CharacteristicId,
        payload: &[u8],
    ) {
        let inner = self.inner.lock().unwrap();
        let handles: Vec<CharacteristicHandle> = inner
            .characteristics
            .iter()
            .filter(|(h, b)| {
                b.address == address && b.id == characteristic && inner.subscribed.contains(*h)
            })
            .map(|(h, _)| *h)
            .collect();
        for handle in handles {
            let _ = inner.central_tx.send(LinkEvent::ValueChanged {
                characteristic: handle,
                payload: payload.to_vec(),
            });
        }
    }

    /// Values written to a node by the central
    pub fn writes_to(&self, address: PeerAddress) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&address)
            .map(|n| n.received.clone())
            .unwrap_or_default()
    }

    /// Services a node currently has on air
    pub fn advertised_services(&self, address: PeerAddress) -> Vec<ServiceId> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&address)
            .map(|n| n.advertised.clone())
            .unwrap_or_default()
    }

    /// Whether the central side is currently scanning
    pub fn is_scanning(&self) -> bool {
        self.inner.lock().unwrap().scanning
    }

    /// Whether a central is attached to the node
    pub fn is_attached(&self, address: PeerAddress) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&address)
            .map(|n| n.attached.is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> AirspaceStats {
        self.inner.lock().unwrap().stats
    }
}

// ----------------------------------------------------------------------------
// Central-Side Transport
// ----------------------------------------------------------------------------

/// Central end of the mock airspace
#[derive(Clone)]
pub struct MockCentral {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl LinkTransport for MockCentral {
    async fn start_scan(&self, _filter: &[ServiceId]) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.scanning = true;
        inner.stats.start_scan_calls += 1;
        // Everything currently on air re-announces to the fresh scan
        let announcements: Vec<(PeerAddress, Vec<ServiceId>)> = inner
            .nodes
            .iter()
            .filter(|(_, n)| n.advertising)
            .map(|(a, n)| (*a, n.advertised.clone()))
            .collect();
        for (address, services) in announcements {
            let _ = inner
                .central_tx
                .send(LinkEvent::AdvertisementObserved { address, services });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.scanning = false;
        inner.stats.stop_scan_calls += 1;
        Ok(())
    }

    async fn connect(&self, peer: &PeerHandle) -> Result<LinkHandle, LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.connect_attempts += 1;
        let handle = LinkHandle(inner.mint());
        let node = inner
            .nodes
            .get_mut(&peer.address)
            .ok_or_else(|| LinkError::Transport("unknown address".into()))?;
        if node.refuse_connect {
            return Err(LinkError::ConnectRefused("connection refused".into()));
        }
        if node.attached.is_some() {
            return Err(LinkError::ConnectRefused("peer busy".into()));
        }
        node.attached = Some(handle);
        if let Some(tx) = &node.peripheral_tx {
            let _ = tx.send(PeripheralEvent::CentralConnected);
        }
        let address = peer.address;
        inner.links.insert(handle, address);
        debug!("mock link {:?} to {}", handle, address);
        Ok(handle)
    }

    async fn disconnect(&self, link: LinkHandle) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.disconnects += 1;
        let Some(address) = inner.links.remove(&link) else {
            return Ok(());
        };
        if let Some(node) = inner.nodes.get_mut(&address) {
            node.attached = None;
            if let Some(tx) = &node.peripheral_tx {
                let _ = tx.send(PeripheralEvent::CentralDisconnected);
            }
        }
        inner.purge_bindings(address);
        Ok(())
    }

    async fn resolve_service(
        &self,
        link: LinkHandle,
        service: ServiceId,
    ) -> Result<Option<ServiceHandle>, LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let address = *inner
            .links
            .get(&link)
            .ok_or_else(|| LinkError::Transport("stale link handle".into()))?;
        let known = inner
            .nodes
            .get(&address)
            .map(|n| n.gatt.contains_key(&service))
            .unwrap_or(false);
        if !known {
            return Ok(None);
        }
        let handle = ServiceHandle(inner.mint());
        inner.services.insert(handle, (address, service));
        Ok(Some(handle))
    }

    async fn resolve_characteristic(
        &self,
        service: ServiceHandle,
        characteristic: CharacteristicId,
    ) -> Result<Option<CharacteristicInfo>, LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let (address, service_id) = *inner
            .services
            .get(&service)
            .ok_or_else(|| LinkError::Transport("stale service handle".into()))?;
        let spec = inner.nodes.get(&address).and_then(|n| {
            n.gatt
                .get(&service_id)
                .and_then(|chars| chars.iter().find(|c| c.id == characteristic).copied())
        });
        let Some(spec) = spec else {
            return Ok(None);
        };
        let handle = CharacteristicHandle(inner.mint());
        inner.characteristics.insert(
            handle,
            CharBinding {
                address,
                id: spec.id,
                supports_notify: spec.supports_notify,
            },
        );
        Ok(Some(CharacteristicInfo {
            handle,
            supports_notify: spec.supports_notify,
        }))
    }

    async fn subscribe(&self, characteristic: CharacteristicHandle) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let binding = *inner
            .characteristics
            .get(&characteristic)
            .ok_or_else(|| LinkError::Transport("stale characteristic handle".into()))?;
        if !binding.supports_notify {
            return Err(LinkError::SubscriptionFailed(
                "characteristic is not notifiable".into(),
            ));
        }
        inner.subscribed.insert(characteristic);
        Ok(())
    }

    async fn write(
        &self,
        characteristic: CharacteristicHandle,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let binding = *inner
            .characteristics
            .get(&characteristic)
            .ok_or_else(|| LinkError::Transport("stale characteristic handle".into()))?;
        let node = inner
            .nodes
            .get_mut(&binding.address)
            .ok_or_else(|| LinkError::Transport("node vanished".into()))?;
        node.received.push(payload.to_vec());
        if let Some(tx) = &node.peripheral_tx {
            let _ = tx.send(PeripheralEvent::WriteReceived {
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>, LinkError> {
        let inner = self.inner.lock().unwrap();
        let binding = inner
            .characteristics
            .get(&characteristic)
            .ok_or_else(|| LinkError::Transport("stale characteristic handle".into()))?;
        Ok(inner
            .nodes
            .get(&binding.address)
            .map(|n| n.last_value.clone())
            .unwrap_or_default())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.inner.lock().unwrap().central_rx.take()
    }
}

// ----------------------------------------------------------------------------
// Peripheral-Side Transport
// ----------------------------------------------------------------------------

/// Peripheral end of the mock airspace, bound to one node
#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<Mutex<Inner>>,
    address: PeerAddress,
}

impl MockPeripheral {
    pub fn address(&self) -> PeerAddress {
        self.address
    }
}

#[async_trait]
impl PeripheralTransport for MockPeripheral {
    async fn advertise(&self, identity: &AdvertisedIdentity) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| LinkError::Transport("node vanished".into()))?;
        node.advertised = vec![identity.service];
        node.active_characteristic = Some(identity.characteristic);
        node.advertising = true;
        let services = node.advertised.clone();
        let _ = inner.central_tx.send(LinkEvent::AdvertisementObserved {
            address: self.address,
            services,
        });
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&self.address) {
            node.advertising = false;
        }
        Ok(())
    }

    async fn disconnect_central(&self) -> Result<(), LinkError> {
        self.inner
            .lock()
            .unwrap()
            .sever(self.address, "peer terminated connection");
        Ok(())
    }

    async fn set_value(&self, payload: &[u8]) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| LinkError::Transport("node vanished".into()))?;
        node.last_value = payload.to_vec();
        Ok(())
    }

    async fn notify(&self) -> Result<(), LinkError> {
        let inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get(&self.address) else {
            return Err(LinkError::Transport("node vanished".into()));
        };
        let Some(active) = node.active_characteristic else {
            return Ok(());
        };
        let handles: Vec<CharacteristicHandle> = inner
            .characteristics
            .iter()
            .filter(|(h, b)| {
                b.address == self.address && b.id == active && inner.subscribed.contains(*h)
            })
            .map(|(h, _)| *h)
            .collect();
        for handle in handles {
            let _ = inner.central_tx.send(LinkEvent::ValueChanged {
                characteristic: handle,
                payload: node.last_value.clone(),
            });
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeripheralEvent>> {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get_mut(&self.address)
            .and_then(|n| n.peripheral_rx.take())
    }
}
