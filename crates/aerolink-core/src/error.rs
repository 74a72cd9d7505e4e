//! Error types for the telemetry link layer

use thiserror::Error;

use crate::types::{CharacteristicId, ServiceId};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Failures surfaced by the link transport or the lifecycle layer.
///
/// Every variant except [`LinkError::SubscriptionUnsupported`] is absorbed by
/// the owning session and converted into a reconnect; none propagate as
/// process-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("discovery timed out")]
    DiscoveryTimeout,

    #[error("connection refused by peer: {0}")]
    ConnectRefused(String),

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("service {0} not present on peer")]
    ServiceNotFound(ServiceId),

    #[error("characteristic {0} not present in service")]
    CharacteristicNotFound(CharacteristicId),

    #[error("characteristic does not support change notifications")]
    SubscriptionUnsupported,

    #[error("failed to register for notifications: {0}")]
    SubscriptionFailed(String),

    #[error("link lost unexpectedly: {0}")]
    UnexpectedDisconnect(String),

    #[error("remote attribute resolution timed out")]
    ResolutionTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport event channel closed or already taken")]
    EventChannelClosed,
}

impl LinkError {
    /// Whether the failure still permits an established, write-only session
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, LinkError::SubscriptionUnsupported)
    }
}
