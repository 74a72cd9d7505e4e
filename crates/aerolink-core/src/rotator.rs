//! Advertising identity rotation for the peripheral role
//!
//! The peripheral exposes a fixed, ordered set of identities but advertises
//! exactly one at a time. Rotation only happens while no central is
//! attached: a detach schedules the next identity after a grace delay, and
//! an attached central that sits idle past the dwell duration is kicked so
//! the rotation can proceed.

use std::time::Instant;

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::config::RotatorConfig;
use crate::error::LinkError;
use crate::types::AdvertisedIdentity;

// ----------------------------------------------------------------------------
// Rotator Effects
// ----------------------------------------------------------------------------

/// Transport work requested by the rotator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotatorEffect {
    /// Replace the advertisement with this identity
    Advertise(AdvertisedIdentity),
    /// Drop the attached central to un-freeze rotation
    DisconnectCentral,
}

// ----------------------------------------------------------------------------
// Advertising Rotator
// ----------------------------------------------------------------------------

/// Cycles the advertised identity across the configured set
#[derive(Debug)]
pub struct AdvertisingRotator {
    identities: Vec<AdvertisedIdentity>,
    active: usize,
    attached: bool,
    last_activity: Option<Instant>,
    switch_due: Option<Instant>,
    config: RotatorConfig,
}

impl AdvertisingRotator {
    /// Create a rotator over a non-empty, ordered identity set
    pub fn new(
        identities: Vec<AdvertisedIdentity>,
        config: RotatorConfig,
    ) -> Result<Self, LinkError> {
        if identities.is_empty() {
            return Err(LinkError::InvalidConfig(
                "rotation requires at least one advertised identity".into(),
            ));
        }
        Ok(Self {
            identities,
            active: 0,
            attached: false,
            last_activity: None,
            switch_due: None,
            config,
        })
    }

    /// The identity currently advertised; there is always exactly one
    pub fn active_identity(&self) -> &AdvertisedIdentity {
        &self.identities[self.active]
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// A central attached: freeze rotation and arm the dwell timer
    pub fn on_central_attached(&mut self, now: Instant) {
        self.attached = true;
        self.last_activity = Some(now);
        self.switch_due = None;
        info!("central attached on {}", self.active_identity().service);
    }

    /// The central detached: schedule the next identity after the grace
    /// delay so the transport can settle
    pub fn on_central_detached(&mut self, now: Instant) {
        self.attached = false;
        self.last_activity = None;
        self.switch_due = Some(now + self.config.grace);
        debug!("central detached, rotation scheduled");
    }

    /// Ingest traffic from the attached central re-arms the dwell timer
    pub fn note_activity(&mut self, now: Instant) {
        if self.attached {
            self.last_activity = Some(now);
        }
    }

    /// Advance time-based behavior: perform a scheduled switch, or kick an
    /// attached central whose dwell has expired
    pub fn tick(&mut self, now: Instant) -> SmallVec<[RotatorEffect; 1]> {
        let mut effects = SmallVec::new();
        if self.attached {
            if let Some(last) = self.last_activity {
                if now.duration_since(last) >= self.config.dwell {
                    info!(
                        "dwell expired on {}, kicking central",
                        self.active_identity().service
                    );
                    // Re-arm so the kick is not re-issued every pass while
                    // the detach callback is in flight
                    self.last_activity = Some(now);
                    effects.push(RotatorEffect::DisconnectCentral);
                }
            }
        } else if let Some(due) = self.switch_due {
            if now >= due {
                self.switch_due = None;
                self.active = (self.active + 1) % self.identities.len();
                info!("advertising identity {}", self.active_identity().service);
                effects.push(RotatorEffect::Advertise(*self.active_identity()));
            }
        }
        effects
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
