//! Core identifier and handle types for the telemetry link layer
//!
//! This module defines the fundamental types used throughout the link layer,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// Radio address of a remote node (6-byte, as carried in advertisements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Create a new address from 6 bytes
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create an address from the first 6 bytes of a longer identifier
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut addr = [0u8; 6];
        let len = core::cmp::min(bytes.len(), 6);
        addr[..len].copy_from_slice(&bytes[..len]);
        Self(addr)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ----------------------------------------------------------------------------
// Service and Characteristic Identifiers
// ----------------------------------------------------------------------------

/// 128-bit identifier of a remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Create a service identifier from a 128-bit value
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 128-bit identifier of a characteristic within a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacteristicId(Uuid);

impl CharacteristicId {
    /// Create a characteristic identifier from a 128-bit value
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Registry-issued identifier for a connection session, stable for the life
/// of the session and used to address the external notification consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Transport Handles
// ----------------------------------------------------------------------------

/// Opaque token for an established link, minted by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkHandle(pub u64);

/// Opaque token for a resolved remote service, minted by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceHandle(pub u64);

/// Opaque token for a resolved remote characteristic, minted by the
/// transport; only meaningful while the link it was resolved on is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicHandle(pub u64);

// ----------------------------------------------------------------------------
// Advertised Identity
// ----------------------------------------------------------------------------

/// One service/characteristic pair a node can expose or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvertisedIdentity {
    /// Service identifier carried in the advertisement
    pub service: ServiceId,
    /// Telemetry characteristic within that service
    pub characteristic: CharacteristicId,
}

impl AdvertisedIdentity {
    pub fn new(service: ServiceId, characteristic: CharacteristicId) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Handle
// ----------------------------------------------------------------------------

/// Snapshot of a matching advertisement: the remote address plus the service
/// set it advertised. Owned by the peer registry; superseded only when the
/// owning session permits replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    /// Radio address the advertisement came from
    pub address: PeerAddress,
    /// Services the advertisement carried
    pub services: Vec<ServiceId>,
}

impl PeerHandle {
    pub fn new(address: PeerAddress, services: Vec<ServiceId>) -> Self {
        Self { address, services }
    }

    /// Whether this peer advertised the given service
    pub fn advertises(&self, service: ServiceId) -> bool {
        self.services.contains(&service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_display() {
        let addr = PeerAddress::new([0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56]);
        assert_eq!(addr.to_string(), "abcdef123456");
    }

    #[test]
    fn test_peer_address_from_short_slice() {
        let addr = PeerAddress::from_bytes(&[1, 2, 3]);
        assert_eq!(addr.as_bytes(), &[1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_service_id_const() {
        const ID: ServiceId = ServiceId::from_u128(0x0000FE40_cc7a_482a_984a_7f2ed5b3e58f);
        assert_eq!(ID.to_string(), "0000fe40-cc7a-482a-984a-7f2ed5b3e58f");
    }

    #[test]
    fn test_peer_handle_advertises() {
        let s1 = ServiceId::from_u128(1);
        let s2 = ServiceId::from_u128(2);
        let peer = PeerHandle::new(PeerAddress::new([1; 6]), vec![s1]);
        assert!(peer.advertises(s1));
        assert!(!peer.advertises(s2));
    }
}
