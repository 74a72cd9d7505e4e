//! Outgoing telemetry push for the peripheral role
//!
//! While a central is attached, the publisher samples the telemetry source
//! at a fixed period and hands each value to the driver for staging and
//! notification. Detachment disarms the timer immediately, so no value is
//! emitted after the central is gone.

use std::time::Instant;

use tracing::debug;

use crate::config::PublisherConfig;

// ----------------------------------------------------------------------------
// Telemetry Source
// ----------------------------------------------------------------------------

/// Produces the opaque payloads the peripheral pushes upstream
pub trait TelemetrySource: Send + Sync {
    /// Sample the next outgoing value
    fn sample(&mut self) -> Vec<u8>;
}

impl<F> TelemetrySource for F
where
    F: FnMut() -> Vec<u8> + Send + Sync,
{
    fn sample(&mut self) -> Vec<u8> {
        self()
    }
}

// ----------------------------------------------------------------------------
// Telemetry Publisher
// ----------------------------------------------------------------------------

/// Paces the peripheral's outgoing value pushes
pub struct TelemetryPublisher {
    source: Box<dyn TelemetrySource>,
    config: PublisherConfig,
    attached: bool,
    next_due: Option<Instant>,
}

impl TelemetryPublisher {
    /// Create a publisher over the given source
    pub fn new(source: Box<dyn TelemetrySource>, config: PublisherConfig) -> Self {
        Self {
            source,
            config,
            attached: false,
            next_due: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// A central attached: publish immediately, then on every period
    pub fn on_attached(&mut self, now: Instant) {
        self.attached = true;
        self.next_due = Some(now);
    }

    /// The central detached: stop without emitting a partial value
    pub fn on_detached(&mut self) {
        self.attached = false;
        self.next_due = None;
        debug!("publisher disarmed");
    }

    /// Sample and return the next value when one is due
    pub fn tick(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.attached {
            return None;
        }
        let due = self.next_due?;
        if now < due {
            return None;
        }
        self.next_due = Some(now + self.config.period);
        Some(self.source.sample())
    }
}

impl core::fmt::Debug for TelemetryPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TelemetryPublisher")
            .field("attached", &self.attached)
            .field("period", &self.config.period)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
