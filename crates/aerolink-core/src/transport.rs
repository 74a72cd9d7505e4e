//! Abstract link transport consumed by the lifecycle layer
//!
//! The underlying wireless stack (scanning primitives, attribute protocol,
//! radio I/O) lives behind these traits and is never implemented here.
//! Asynchronous transport callbacks are delivered as typed events on a
//! queue the driver takes ownership of; the driver's state machines consume
//! them on their own turn.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::types::{
    AdvertisedIdentity, CharacteristicHandle, CharacteristicId, LinkHandle, PeerAddress,
    PeerHandle, ServiceHandle, ServiceId,
};

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Events the transport raises on the central side
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// An advertisement was observed while scanning
    AdvertisementObserved {
        address: PeerAddress,
        services: Vec<ServiceId>,
    },
    /// An established link was lost (peer disconnect, timeout, radio error)
    LinkLost { link: LinkHandle, reason: String },
    /// A subscribed characteristic changed value; zero-length payloads are
    /// valid updates
    ValueChanged {
        characteristic: CharacteristicHandle,
        payload: Vec<u8>,
    },
}

/// Events the transport raises on the peripheral side
#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    /// A central attached to the advertised identity
    CentralConnected,
    /// The attached central detached
    CentralDisconnected,
    /// The attached central wrote to the active characteristic
    WriteReceived { payload: Vec<u8> },
}

// ----------------------------------------------------------------------------
// Resolved Characteristic
// ----------------------------------------------------------------------------

/// Result of resolving a characteristic on a live link
#[derive(Debug, Clone, Copy)]
pub struct CharacteristicInfo {
    /// Transport token for the resolved characteristic
    pub handle: CharacteristicHandle,
    /// Whether the characteristic supports change notification
    pub supports_notify: bool,
}

// ----------------------------------------------------------------------------
// Central-Side Transport
// ----------------------------------------------------------------------------

/// Central-side transport operations (scanning and outbound links).
///
/// Implementations typically permit one scan and one outbound connection
/// attempt at a time; the driver serializes them.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Begin a restartable discovery scan for the given services
    async fn start_scan(&self, filter: &[ServiceId]) -> Result<(), LinkError>;

    /// Halt scanning
    async fn stop_scan(&self) -> Result<(), LinkError>;

    /// Attempt an outbound connection to a discovered peer
    async fn connect(&self, peer: &PeerHandle) -> Result<LinkHandle, LinkError>;

    /// Tear down an established link
    async fn disconnect(&self, link: LinkHandle) -> Result<(), LinkError>;

    /// Look up a service on the remote; `None` when the peer does not
    /// expose it
    async fn resolve_service(
        &self,
        link: LinkHandle,
        service: ServiceId,
    ) -> Result<Option<ServiceHandle>, LinkError>;

    /// Look up a characteristic within a resolved service; `None` when the
    /// service does not contain it
    async fn resolve_characteristic(
        &self,
        service: ServiceHandle,
        characteristic: CharacteristicId,
    ) -> Result<Option<CharacteristicInfo>, LinkError>;

    /// Register for change notifications on a resolved characteristic
    async fn subscribe(&self, characteristic: CharacteristicHandle) -> Result<(), LinkError>;

    /// Write an opaque payload to a resolved characteristic
    async fn write(
        &self,
        characteristic: CharacteristicHandle,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Read the current value of a resolved characteristic
    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>, LinkError>;

    /// Take the event queue; yields `None` when already taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;
}

// ----------------------------------------------------------------------------
// Peripheral-Side Transport
// ----------------------------------------------------------------------------

/// Peripheral-side transport operations (advertising and the single
/// attached central)
#[async_trait]
pub trait PeripheralTransport: Send + Sync {
    /// Replace the current advertisement with the given identity
    async fn advertise(&self, identity: &AdvertisedIdentity) -> Result<(), LinkError>;

    /// Stop advertising entirely
    async fn stop_advertising(&self) -> Result<(), LinkError>;

    /// Drop the attached central, if any
    async fn disconnect_central(&self) -> Result<(), LinkError>;

    /// Stage an outgoing value on the active characteristic
    async fn set_value(&self, payload: &[u8]) -> Result<(), LinkError>;

    /// Push the staged value to the attached central
    async fn notify(&self) -> Result<(), LinkError>;

    /// Take the event queue; yields `None` when already taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeripheralEvent>>;
}
