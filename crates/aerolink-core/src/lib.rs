//! Peer-connection lifecycle layer for short-range wireless telemetry links
//!
//! This crate implements the session layer shared by both ends of a
//! telemetry link: how a node discovers a peer, binds a logical channel to
//! it, sustains it, detects loss, and recovers. The wireless stack itself
//! (scanning primitives, attribute protocol, radio I/O) is consumed through
//! the traits in [`transport`] and never implemented here.
//!
//! ## Architecture
//!
//! - [`config`] - timeouts, backoff, rotation and publish cadence
//! - [`error`] - the failure taxonomy absorbed by sessions
//! - [`protocol`] - deployment-fixed service/characteristic identifiers
//! - [`types`] - addresses, identifiers, and opaque transport handles
//! - [`transport`] - the abstract link transport seams
//! - [`session`] - the per-peer connection state machine
//! - [`scan`] / [`registry`] / [`router`] - central-side coordination
//! - [`rotator`] / [`publisher`] - peripheral-side coordination
//! - [`central`] / [`peripheral`] - async driver tasks for each role
//!
//! All state machines are synchronous and pure: transport callbacks are
//! enqueued as typed events, and the driver tasks consume them
//! deterministically on their own turn, executing the effects each turn
//! yields. Every wire-level failure a session encounters converges on a
//! single recovery path; only an explicit abandon removes a session.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aerolink_core::{CentralConfig, CentralTask, LinkTransport, protocol};
//! use tokio::sync::mpsc;
//!
//! # async fn example<T: LinkTransport + 'static>(transport: T) -> Result<(), aerolink_core::LinkError> {
//! let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
//! let mut task = CentralTask::new(
//!     transport,
//!     protocol::sensor_identities(),
//!     CentralConfig::default(),
//!     updates_tx,
//! );
//! let handle = task.handle();
//!
//! tokio::spawn(async move { task.run().await });
//!
//! while let Some((session, payload)) = updates_rx.recv().await {
//!     println!("{}: {} bytes", session, payload.len());
//! }
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod central;
pub mod config;
pub mod error;
pub mod peripheral;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod rotator;
pub mod router;
pub mod scan;
pub mod session;
pub mod transport;
pub mod types;

// Public API exports
pub use central::{CentralCommand, CentralHandle, CentralTask, SessionStatus};
pub use config::{
    CentralConfig, PeripheralConfig, PublisherConfig, RotatorConfig, SessionConfig,
};
pub use error::LinkError;
pub use peripheral::{PeripheralCommand, PeripheralHandle, PeripheralTask};
pub use publisher::{TelemetryPublisher, TelemetrySource};
pub use registry::PeerRegistry;
pub use rotator::{AdvertisingRotator, RotatorEffect};
pub use router::NotificationRouter;
pub use scan::{ScanController, ScanEffect};
pub use session::{ConnectionSession, SessionEffect, SessionEvent, SessionState};
pub use transport::{
    CharacteristicInfo, LinkEvent, LinkTransport, PeripheralEvent, PeripheralTransport,
};
pub use types::{
    AdvertisedIdentity, CharacteristicHandle, CharacteristicId, LinkHandle, PeerAddress,
    PeerHandle, ServiceHandle, ServiceId, SessionId,
};
