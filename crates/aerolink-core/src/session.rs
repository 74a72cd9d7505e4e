//! Per-peer connection session state machine
//!
//! One `ConnectionSession` tracks one remote peer through discovery,
//! connection, service/characteristic binding, subscription, loss, and
//! recovery. The machine is synchronous and pure: transport callbacks are
//! fed in as [`SessionEvent`]s, and each turn yields the [`SessionEffect`]s
//! the driver must execute. Every wire-level failure converges on
//! `Reconnecting`; only an explicit abandon removes a session.

use std::time::{Duration, Instant};

use smallvec::{smallvec, SmallVec};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::LinkError;
use crate::types::{
    AdvertisedIdentity, CharacteristicHandle, CharacteristicId, LinkHandle, PeerHandle,
    ServiceHandle, ServiceId, SessionId,
};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a matching discovery
    Idle,
    /// Outbound connection attempt in flight
    Connecting,
    /// Link up; locating the target service
    ResolvingService,
    /// Service found; locating the target characteristic
    ResolvingCharacteristic,
    /// Characteristic found; registering for notifications
    Subscribing,
    /// Established with change notifications flowing
    Subscribed,
    /// Established without notifications (write-only channel)
    Connected,
    /// Link just dropped; transient, cleared within the same turn
    Disconnected,
    /// Holding for the backoff delay before re-entering discovery
    Reconnecting,
    /// Removed by external command; terminal
    Abandoned,
}

impl SessionState {
    /// State name for logging
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::ResolvingService => "ResolvingService",
            SessionState::ResolvingCharacteristic => "ResolvingCharacteristic",
            SessionState::Subscribing => "Subscribing",
            SessionState::Subscribed => "Subscribed",
            SessionState::Connected => "Connected",
            SessionState::Disconnected => "Disconnected",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Abandoned => "Abandoned",
        }
    }

    /// Whether the session holds a bound characteristic
    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Subscribed | SessionState::Connected)
    }

    /// Whether an attempt currently occupies the transport's single
    /// connection-attempt slot
    pub fn is_attempting(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::ResolvingService
                | SessionState::ResolvingCharacteristic
                | SessionState::Subscribing
        )
    }
}

// ----------------------------------------------------------------------------
// Session Events and Effects
// ----------------------------------------------------------------------------

/// Inputs to the session machine, enqueued by transport callbacks or the
/// driver and consumed on the session's own turn
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A matching peer was discovered (or re-discovered)
    Discovered,
    /// The outbound connection attempt succeeded
    LinkUp(LinkHandle),
    /// The outbound connection attempt failed
    ConnectFailed(LinkError),
    /// The target service was located on the remote
    ServiceFound(ServiceHandle),
    /// The remote does not expose the target service
    ServiceMissing,
    /// The target characteristic was located
    CharacteristicFound {
        handle: CharacteristicHandle,
        supports_notify: bool,
    },
    /// The resolved service does not contain the target characteristic
    CharacteristicMissing,
    /// Notification registration succeeded
    SubscribeOk,
    /// Resolution or subscription failed at the transport level
    ResolutionFailed(LinkError),
    /// The established link dropped
    LinkLost(String),
    /// External command: release everything and park the machine
    Abandon,
}

/// Work the driver must execute after a session turn
#[derive(Debug, Clone)]
pub enum SessionEffect {
    /// Attempt an outbound connection (suspends scanning)
    Connect(PeerHandle),
    /// Look up the target service on the new link
    ResolveService(LinkHandle, ServiceId),
    /// Look up the target characteristic in the resolved service
    ResolveCharacteristic(ServiceHandle, CharacteristicId),
    /// Register for change notifications
    Subscribe(CharacteristicHandle),
    /// Tear down a held link
    Disconnect(LinkHandle),
    /// Backoff elapsed: discovery may run again for this peer
    ResumeScan,
}

/// Effect batch produced by one session turn
pub type SessionEffects = SmallVec<[SessionEffect; 2]>;

// ----------------------------------------------------------------------------
// Connection Session
// ----------------------------------------------------------------------------

/// State machine for one tracked peer
#[derive(Debug)]
pub struct ConnectionSession {
    id: SessionId,
    peer: PeerHandle,
    target: AdvertisedIdentity,
    state: SessionState,
    link: Option<LinkHandle>,
    /// Characteristic resolved but not yet subscribed; promoted to `bound`
    /// only when the session establishes
    pending: Option<CharacteristicHandle>,
    bound: Option<CharacteristicHandle>,
    retry_count: u32,
    last_transition: Instant,
    deadline: Option<Instant>,
    notify_unsupported: bool,
    last_error: Option<LinkError>,
    config: SessionConfig,
}

impl ConnectionSession {
    /// Create a session for a freshly discovered peer
    pub fn new(
        id: SessionId,
        peer: PeerHandle,
        target: AdvertisedIdentity,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            peer,
            target,
            state: SessionState::Idle,
            link: None,
            pending: None,
            bound: None,
            retry_count: 0,
            last_transition: now,
            deadline: None,
            notify_unsupported: false,
            last_error: None,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn target(&self) -> AdvertisedIdentity {
        self.target
    }

    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    /// Bound characteristic; `Some` iff the session is established
    pub fn bound(&self) -> Option<CharacteristicHandle> {
        self.bound
    }

    /// Consecutive failures since the last successful bind
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the session last changed state
    pub fn last_transition(&self) -> Instant {
        self.last_transition
    }

    /// Most recent failure absorbed by this session
    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    /// Whether the bound characteristic declined notification support
    pub fn notify_unsupported(&self) -> bool {
        self.notify_unsupported
    }

    /// A session may be superseded by a new discovery only when idle or
    /// abandoned; live sessions are never interrupted
    pub fn can_replace(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Abandoned)
    }

    /// Swap in a newer peer handle for the same target (idle sessions only)
    pub fn adopt_peer(&mut self, peer: PeerHandle) {
        debug_assert!(self.can_replace());
        self.peer = peer;
    }

    /// Process one event; returns the effects the driver must execute
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> SessionEffects {
        match (self.state, event) {
            (SessionState::Idle, SessionEvent::Discovered) => {
                self.set_state(SessionState::Connecting, now);
                self.deadline = Some(now + self.config.connect_timeout);
                smallvec![SessionEffect::Connect(self.peer.clone())]
            }

            (SessionState::Connecting, SessionEvent::LinkUp(link)) => {
                self.link = Some(link);
                self.set_state(SessionState::ResolvingService, now);
                self.deadline = Some(now + self.config.resolve_timeout);
                smallvec![SessionEffect::ResolveService(link, self.target.service)]
            }

            (SessionState::Connecting, SessionEvent::ConnectFailed(err)) => {
                warn!("connection to {} failed: {}", self.peer.address, err);
                self.fail(err, now)
            }

            (SessionState::ResolvingService, SessionEvent::ServiceFound(service)) => {
                self.set_state(SessionState::ResolvingCharacteristic, now);
                self.deadline = Some(now + self.config.resolve_timeout);
                smallvec![SessionEffect::ResolveCharacteristic(
                    service,
                    self.target.characteristic
                )]
            }

            (SessionState::ResolvingService, SessionEvent::ServiceMissing) => {
                warn!(
                    "peer {} does not expose service {}, disconnecting",
                    self.peer.address, self.target.service
                );
                self.fail(LinkError::ServiceNotFound(self.target.service), now)
            }

            (
                SessionState::ResolvingCharacteristic,
                SessionEvent::CharacteristicFound {
                    handle,
                    supports_notify,
                },
            ) => {
                if supports_notify {
                    self.pending = Some(handle);
                    self.set_state(SessionState::Subscribing, now);
                    self.deadline = Some(now + self.config.subscribe_timeout);
                    smallvec![SessionEffect::Subscribe(handle)]
                } else {
                    // Write-only channel is still a valid connected session
                    self.notify_unsupported = true;
                    self.last_error = Some(LinkError::SubscriptionUnsupported);
                    self.establish(handle, SessionState::Connected, now);
                    SmallVec::new()
                }
            }

            (SessionState::ResolvingCharacteristic, SessionEvent::CharacteristicMissing) => {
                warn!(
                    "service {} on {} lacks characteristic {}, disconnecting",
                    self.target.service, self.peer.address, self.target.characteristic
                );
                self.fail(
                    LinkError::CharacteristicNotFound(self.target.characteristic),
                    now,
                )
            }

            (SessionState::Subscribing, SessionEvent::SubscribeOk) => {
                let handle = match self.pending.take() {
                    Some(handle) => handle,
                    None => {
                        warn!("{}: subscribe ack without pending characteristic", self.id);
                        return self.fail(
                            LinkError::SubscriptionFailed("no pending characteristic".into()),
                            now,
                        );
                    }
                };
                self.establish(handle, SessionState::Subscribed, now);
                SmallVec::new()
            }

            (
                SessionState::ResolvingService
                | SessionState::ResolvingCharacteristic
                | SessionState::Subscribing,
                SessionEvent::ResolutionFailed(err),
            ) => {
                warn!("{}: resolution failed: {}", self.id, err);
                self.fail(err, now)
            }

            (_, SessionEvent::LinkLost(reason)) if self.link.is_some() => {
                info!("{}: link to {} lost: {}", self.id, self.peer.address, reason);
                self.set_state(SessionState::Disconnected, now);
                self.last_error = Some(LinkError::UnexpectedDisconnect(reason));
                // The link is already gone; no disconnect effect to issue
                self.link = None;
                self.pending = None;
                self.bound = None;
                self.begin_reconnect(now);
                SmallVec::new()
            }

            (_, SessionEvent::Abandon) => {
                let mut effects = SmallVec::new();
                if let Some(link) = self.link.take() {
                    effects.push(SessionEffect::Disconnect(link));
                }
                self.pending = None;
                self.bound = None;
                self.deadline = None;
                self.set_state(SessionState::Abandoned, now);
                effects
            }

            // Stale events (late callbacks after a state change) are dropped
            (state, event) => {
                debug!(
                    "{}: ignoring {:?} in state {}",
                    self.id,
                    event,
                    state.name()
                );
                SmallVec::new()
            }
        }
    }

    /// Advance time-based behavior: per-state deadlines and the reconnect
    /// backoff. Called once per scheduler pass.
    pub fn tick(&mut self, now: Instant) -> SessionEffects {
        match self.state {
            SessionState::Connecting if self.deadline_passed(now) => {
                warn!("{}: connection attempt timed out", self.id);
                self.fail(LinkError::ConnectTimeout, now)
            }
            SessionState::ResolvingService
            | SessionState::ResolvingCharacteristic
            | SessionState::Subscribing
                if self.deadline_passed(now) =>
            {
                warn!("{}: resolution timed out in {}", self.id, self.state.name());
                self.fail(LinkError::ResolutionTimeout, now)
            }
            SessionState::Reconnecting if self.deadline_passed(now) => {
                self.deadline = None;
                self.set_state(SessionState::Idle, now);
                smallvec![SessionEffect::ResumeScan]
            }
            _ => SmallVec::new(),
        }
    }

    /// Reconnect delay for the current retry count: exponential with a cap
    fn backoff(&self) -> Duration {
        let shift = self.retry_count.saturating_sub(1).min(16);
        let delay = self.config.backoff_base.saturating_mul(1u32 << shift);
        delay.min(self.config.backoff_max)
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Shared failure path: every wire-level fault converges here
    fn fail(&mut self, err: LinkError, now: Instant) -> SessionEffects {
        let mut effects = SmallVec::new();
        if let Some(link) = self.link.take() {
            effects.push(SessionEffect::Disconnect(link));
        }
        self.pending = None;
        self.bound = None;
        self.last_error = Some(err);
        self.begin_reconnect(now);
        effects
    }

    fn begin_reconnect(&mut self, now: Instant) {
        self.retry_count += 1;
        self.set_state(SessionState::Reconnecting, now);
        self.deadline = Some(now + self.backoff());
        debug!(
            "{}: retry {} in {:?}",
            self.id,
            self.retry_count,
            self.backoff()
        );
    }

    fn establish(&mut self, handle: CharacteristicHandle, state: SessionState, now: Instant) {
        self.bound = Some(handle);
        self.retry_count = 0;
        self.deadline = None;
        self.set_state(state, now);
        info!(
            "{}: established with {} ({})",
            self.id,
            self.peer.address,
            state.name()
        );
    }

    fn set_state(&mut self, to: SessionState, now: Instant) {
        debug!("{}: {} -> {}", self.id, self.state.name(), to.name());
        self.state = to;
        self.last_transition = now;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerAddress;
    use std::time::Duration;

    fn test_target() -> AdvertisedIdentity {
        AdvertisedIdentity::new(ServiceId::from_u128(0x10), CharacteristicId::from_u128(0x11))
    }

    fn test_peer() -> PeerHandle {
        PeerHandle::new(
            PeerAddress::new([1, 2, 3, 4, 5, 6]),
            vec![ServiceId::from_u128(0x10)],
        )
    }

    fn test_session(now: Instant) -> ConnectionSession {
        ConnectionSession::new(
            SessionId::new(1),
            test_peer(),
            test_target(),
            SessionConfig::default()
                .with_backoff(Duration::from_millis(100), Duration::from_secs(2)),
            now,
        )
    }

    /// Walk the session to the Subscribing state
    fn drive_to_subscribing(session: &mut ConnectionSession, now: Instant) {
        session.handle(SessionEvent::Discovered, now);
        session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);
        session.handle(SessionEvent::ServiceFound(ServiceHandle(8)), now);
        session.handle(
            SessionEvent::CharacteristicFound {
                handle: CharacteristicHandle(9),
                supports_notify: true,
            },
            now,
        );
    }

    #[test]
    fn test_happy_path_to_subscribed() {
        let now = Instant::now();
        let mut session = test_session(now);
        assert_eq!(session.state(), SessionState::Idle);

        let effects = session.handle(SessionEvent::Discovered, now);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(matches!(effects.as_slice(), [SessionEffect::Connect(_)]));

        let effects = session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);
        assert_eq!(session.state(), SessionState::ResolvingService);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::ResolveService(LinkHandle(7), _)]
        ));

        let effects = session.handle(SessionEvent::ServiceFound(ServiceHandle(8)), now);
        assert_eq!(session.state(), SessionState::ResolvingCharacteristic);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::ResolveCharacteristic(ServiceHandle(8), _)]
        ));

        let effects = session.handle(
            SessionEvent::CharacteristicFound {
                handle: CharacteristicHandle(9),
                supports_notify: true,
            },
            now,
        );
        assert_eq!(session.state(), SessionState::Subscribing);
        // Not yet bound while the subscription is pending
        assert!(session.bound().is_none());
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Subscribe(CharacteristicHandle(9))]
        ));

        session.handle(SessionEvent::SubscribeOk, now);
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(session.bound(), Some(CharacteristicHandle(9)));
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_write_only_channel_reaches_connected() {
        let now = Instant::now();
        let mut session = test_session(now);
        session.handle(SessionEvent::Discovered, now);
        session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);
        session.handle(SessionEvent::ServiceFound(ServiceHandle(8)), now);
        let effects = session.handle(
            SessionEvent::CharacteristicFound {
                handle: CharacteristicHandle(9),
                supports_notify: false,
            },
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.bound(), Some(CharacteristicHandle(9)));
        assert!(session.notify_unsupported());
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_service_missing_disconnects_and_reconnects() {
        let now = Instant::now();
        let mut session = test_session(now);
        session.handle(SessionEvent::Discovered, now);
        session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);

        let effects = session.handle(SessionEvent::ServiceMissing, now);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.retry_count(), 1);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Disconnect(LinkHandle(7))]
        ));
    }

    #[test]
    fn test_characteristic_missing_disconnects_and_reconnects() {
        let now = Instant::now();
        let mut session = test_session(now);
        session.handle(SessionEvent::Discovered, now);
        session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);
        session.handle(SessionEvent::ServiceFound(ServiceHandle(8)), now);

        let effects = session.handle(SessionEvent::CharacteristicMissing, now);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.retry_count(), 1);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Disconnect(LinkHandle(7))]
        ));
    }

    #[test]
    fn test_connect_failure_has_no_link_to_release() {
        let now = Instant::now();
        let mut session = test_session(now);
        session.handle(SessionEvent::Discovered, now);
        let effects = session.handle(
            SessionEvent::ConnectFailed(LinkError::ConnectRefused("busy".into())),
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.retry_count(), 1);
    }

    #[test]
    fn test_retry_count_monotonic_until_bind() {
        let now = Instant::now();
        let mut session = test_session(now);
        let mut t = now;

        for expected in 1..=4u32 {
            session.handle(SessionEvent::Discovered, t);
            session.handle(
                SessionEvent::ConnectFailed(LinkError::ConnectTimeout),
                t,
            );
            assert_eq!(session.retry_count(), expected);

            // Let the backoff elapse so the session returns to Idle
            t += Duration::from_secs(60);
            let effects = session.tick(t);
            assert_eq!(session.state(), SessionState::Idle);
            assert!(matches!(effects.as_slice(), [SessionEffect::ResumeScan]));
        }

        // A successful bind resets the counter
        session.handle(SessionEvent::Discovered, t);
        session.handle(SessionEvent::LinkUp(LinkHandle(1)), t);
        session.handle(SessionEvent::ServiceFound(ServiceHandle(2)), t);
        session.handle(
            SessionEvent::CharacteristicFound {
                handle: CharacteristicHandle(3),
                supports_notify: true,
            },
            t,
        );
        session.handle(SessionEvent::SubscribeOk, t);
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let now = Instant::now();
        let mut session = test_session(now);
        let mut t = now;
        let mut last_delay = Duration::ZERO;

        for round in 0..8 {
            session.handle(SessionEvent::Discovered, t);
            session.handle(SessionEvent::ConnectFailed(LinkError::ConnectTimeout), t);
            let delay = session.backoff();
            if round > 0 {
                assert!(delay >= last_delay);
            }
            assert!(delay <= Duration::from_secs(2));
            last_delay = delay;
            t += Duration::from_secs(60);
            session.tick(t);
        }
        assert_eq!(last_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_timeout_forces_reconnecting_on_tick() {
        let now = Instant::now();
        let mut session = test_session(now);
        session.handle(SessionEvent::Discovered, now);
        session.handle(SessionEvent::LinkUp(LinkHandle(7)), now);
        assert_eq!(session.state(), SessionState::ResolvingService);

        // Before the deadline nothing happens
        assert!(session.tick(now + Duration::from_millis(10)).is_empty());
        assert_eq!(session.state(), SessionState::ResolvingService);

        // Past the deadline the stalled resolution is abandoned
        let effects = session.tick(now + Duration::from_secs(10));
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.retry_count(), 1);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Disconnect(LinkHandle(7))]
        ));
        assert_eq!(
            session.last_error(),
            Some(&LinkError::ResolutionTimeout)
        );
    }

    #[test]
    fn test_link_lost_clears_binding() {
        let now = Instant::now();
        let mut session = test_session(now);
        drive_to_subscribing(&mut session, now);
        session.handle(SessionEvent::SubscribeOk, now);
        assert!(session.bound().is_some());

        let effects = session.handle(SessionEvent::LinkLost("radio error".into()), now);
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert!(session.bound().is_none());
        assert!(session.link().is_none());
        assert_eq!(session.retry_count(), 1);
    }

    #[test]
    fn test_abandon_releases_link_mid_attempt() {
        let now = Instant::now();
        let mut session = test_session(now);
        drive_to_subscribing(&mut session, now);

        let effects = session.handle(SessionEvent::Abandon, now);
        assert_eq!(session.state(), SessionState::Abandoned);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Disconnect(LinkHandle(7))]
        ));
        assert!(session.bound().is_none());
        assert!(session.can_replace());
    }

    #[test]
    fn test_stale_events_ignored() {
        let now = Instant::now();
        let mut session = test_session(now);

        // Subscribe ack with no attempt in flight
        let effects = session.handle(SessionEvent::SubscribeOk, now);
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Idle);

        // Discovery while already connecting is not a restart
        session.handle(SessionEvent::Discovered, now);
        let effects = session.handle(SessionEvent::Discovered, now);
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_bound_iff_established() {
        let now = Instant::now();
        let mut session = test_session(now);
        assert!(!session.state().is_established() && session.bound().is_none());

        drive_to_subscribing(&mut session, now);
        assert!(!session.state().is_established() && session.bound().is_none());

        session.handle(SessionEvent::SubscribeOk, now);
        assert!(session.state().is_established() && session.bound().is_some());

        session.handle(SessionEvent::LinkLost("gone".into()), now);
        assert!(!session.state().is_established() && session.bound().is_none());
    }
}
