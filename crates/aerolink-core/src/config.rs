//! Configuration for the lifecycle layer

use std::time::Duration;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Timeouts and reconnect policy for a connection session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Maximum time to wait for a connection attempt
    pub connect_timeout: Duration,
    /// Maximum time to wait for service/characteristic resolution
    pub resolve_timeout: Duration,
    /// Maximum time to wait for notification registration
    pub subscribe_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt
    pub backoff_base: Duration,
    /// Ceiling for the reconnect delay
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection attempt timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set resolution timeout
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Set subscription timeout
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set reconnect backoff base and ceiling
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }
}

// ----------------------------------------------------------------------------
// Central Configuration
// ----------------------------------------------------------------------------

/// Configuration for the central (collector) driver task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CentralConfig {
    /// Per-session timeouts and reconnect policy
    pub session: SessionConfig,
    /// Scheduler pass interval for the driver loop
    pub tick_interval: Duration,
    /// Cadence for the optional uplink writer; `None` disables it
    pub uplink_period: Option<Duration>,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            tick_interval: Duration::from_millis(100),
            uplink_period: None,
        }
    }
}

impl CentralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-session policy
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the driver tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Enable the periodic uplink writer
    pub fn with_uplink_period(mut self, period: Duration) -> Self {
        self.uplink_period = Some(period);
        self
    }
}

// ----------------------------------------------------------------------------
// Rotator Configuration
// ----------------------------------------------------------------------------

/// Timing for the rotating-advertisement peripheral
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RotatorConfig {
    /// How long an attached central may hold the active identity without
    /// activity before it is kicked to force rotation
    pub dwell: Duration,
    /// Settle delay between a detach and advertising the next identity
    pub grace: Duration,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(3),
            grace: Duration::from_millis(500),
        }
    }
}

impl RotatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attached dwell duration
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    /// Set the post-detach grace delay
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

// ----------------------------------------------------------------------------
// Publisher Configuration
// ----------------------------------------------------------------------------

/// Cadence for the peripheral's outgoing telemetry push
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PublisherConfig {
    /// Interval between pushed values while a central is attached
    pub period: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
        }
    }
}

impl PublisherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the publish period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

// ----------------------------------------------------------------------------
// Peripheral Configuration
// ----------------------------------------------------------------------------

/// Configuration for the peripheral (sensor node) driver task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PeripheralConfig {
    /// Rotation timing
    pub rotator: RotatorConfig,
    /// Telemetry push cadence
    pub publisher: PublisherConfig,
    /// Scheduler pass interval for the driver loop
    pub tick_interval: Duration,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            rotator: RotatorConfig::default(),
            publisher: PublisherConfig::default(),
            tick_interval: Duration::from_millis(50),
        }
    }
}

impl PeripheralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rotation timing
    pub fn with_rotator(mut self, rotator: RotatorConfig) -> Self {
        self.rotator = rotator;
        self
    }

    /// Set the publish cadence
    pub fn with_publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = publisher;
        self
    }

    /// Set the driver tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
