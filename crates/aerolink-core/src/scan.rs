//! Discovery scan control
//!
//! Drives the transport's lazy, restartable discovery scan and filters
//! observed advertisements against the wanted service set. Scanning and
//! outbound connection attempts are mutually exclusive on constrained
//! transports, so the controller tracks the single attempt slot and latches
//! resume requests that arrive while it is occupied.

use std::collections::HashSet;

use tracing::debug;

use crate::types::{PeerAddress, PeerHandle, ServiceId};

// ----------------------------------------------------------------------------
// Scan Effects
// ----------------------------------------------------------------------------

/// Transport work requested by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEffect {
    StartScan(Vec<ServiceId>),
    StopScan,
}

// ----------------------------------------------------------------------------
// Scan Controller
// ----------------------------------------------------------------------------

/// Gates discovery scanning for the central driver
#[derive(Debug)]
pub struct ScanController {
    filter: Vec<ServiceId>,
    scanning: bool,
    attempt_in_flight: bool,
    resume_pending: bool,
    /// Addresses already reported and still tracked; duplicates from these
    /// are suppressed until `forget` is called
    reported: HashSet<PeerAddress>,
}

impl ScanController {
    /// Create a controller for the given wanted service set
    pub fn new(filter: Vec<ServiceId>) -> Self {
        Self {
            filter,
            scanning: false,
            attempt_in_flight: false,
            resume_pending: false,
            reported: HashSet::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn filter(&self) -> &[ServiceId] {
        &self.filter
    }

    /// Begin (or restart) scanning, unless a connection attempt occupies
    /// the transport; in that case the request is latched
    pub fn start(&mut self) -> Option<ScanEffect> {
        if self.attempt_in_flight {
            self.resume_pending = true;
            return None;
        }
        if self.scanning {
            return None;
        }
        self.scanning = true;
        Some(ScanEffect::StartScan(self.filter.clone()))
    }

    /// Halt scanning (e.g. when a matching peer was found, before connecting)
    pub fn stop(&mut self) -> Option<ScanEffect> {
        if !self.scanning {
            return None;
        }
        self.scanning = false;
        Some(ScanEffect::StopScan)
    }

    /// Restart scanning after a session entered `Reconnecting` or was
    /// abandoned; same latching rules as `start`
    pub fn resume(&mut self) -> Option<ScanEffect> {
        self.start()
    }

    /// A connection attempt took the transport's single attempt slot
    pub fn on_attempt_started(&mut self) {
        self.attempt_in_flight = true;
    }

    /// The attempt concluded (success or failure); replays a latched resume
    pub fn on_attempt_finished(&mut self) -> Option<ScanEffect> {
        self.attempt_in_flight = false;
        if self.resume_pending {
            self.resume_pending = false;
            return self.start();
        }
        None
    }

    /// Filter one observed advertisement. Yields a handle exactly once per
    /// distinct address until that address is forgotten.
    pub fn on_advertisement(
        &mut self,
        address: PeerAddress,
        services: &[ServiceId],
    ) -> Option<PeerHandle> {
        if !services.iter().any(|s| self.filter.contains(s)) {
            return None;
        }
        if !self.reported.insert(address) {
            debug!("suppressing duplicate advertisement from {}", address);
            return None;
        }
        debug!("discovered matching peer {}", address);
        Some(PeerHandle::new(address, services.to_vec()))
    }

    /// Allow an address to be reported again (its session lost the link or
    /// was abandoned)
    pub fn forget(&mut self, address: PeerAddress) {
        self.reported.remove(&address);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
