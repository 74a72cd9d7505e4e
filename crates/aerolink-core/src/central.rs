//! Central (collector) driver task
//!
//! Owns the scan controller, the peer registry, and the notification
//! router, and is the single writer of all session state. Transport
//! callbacks arrive as queued events; session effects are executed inline
//! on the driver's turn, each call bounded by a timeout whose expiry feeds
//! the matching failure event back into the session. Executing effects
//! sequentially also guarantees at most one connection attempt is ever in
//! flight, which is what the constrained transport requires.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::CentralConfig;
use crate::error::LinkError;
use crate::publisher::TelemetrySource;
use crate::registry::PeerRegistry;
use crate::router::NotificationRouter;
use crate::scan::{ScanController, ScanEffect};
use crate::session::{SessionEffect, SessionEffects, SessionEvent, SessionState};
use crate::transport::{LinkEvent, LinkTransport};
use crate::types::{AdvertisedIdentity, CharacteristicHandle, LinkHandle, ServiceId, SessionId};

// ----------------------------------------------------------------------------
// Commands and Status
// ----------------------------------------------------------------------------

/// External commands accepted by the central task
#[derive(Debug, Clone)]
pub enum CentralCommand {
    /// Permanently remove the session tracking a service
    Abandon(ServiceId),
    /// Stop the task, releasing held links
    Shutdown,
}

/// Cloneable handle for sending commands into a running central task
#[derive(Debug, Clone)]
pub struct CentralHandle {
    commands: mpsc::UnboundedSender<CentralCommand>,
}

impl CentralHandle {
    /// Abandon the session for a tracked service
    pub fn abandon(&self, service: ServiceId) {
        let _ = self.commands.send(CentralCommand::Abandon(service));
    }

    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.commands.send(CentralCommand::Shutdown);
    }
}

/// Externally observable session state, emitted after every session turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub session: SessionId,
    pub service: ServiceId,
    pub state: SessionState,
    pub retry_count: u32,
}

// ----------------------------------------------------------------------------
// Uplink Writer
// ----------------------------------------------------------------------------

/// Periodic write of a fresh sample to every established session
struct Uplink {
    source: Box<dyn TelemetrySource>,
    period: Duration,
    next_due: Option<Instant>,
}

// ----------------------------------------------------------------------------
// Central Task
// ----------------------------------------------------------------------------

/// Driver task for the central role
pub struct CentralTask<T: LinkTransport> {
    transport: T,
    config: CentralConfig,
    scan: ScanController,
    registry: PeerRegistry,
    router: NotificationRouter,
    commands: Option<mpsc::UnboundedReceiver<CentralCommand>>,
    command_tx: mpsc::UnboundedSender<CentralCommand>,
    status_tx: Option<mpsc::UnboundedSender<SessionStatus>>,
    uplink: Option<Uplink>,
    /// Session currently holding the transport's single attempt slot
    attempting: Option<SessionId>,
    running: bool,
}

impl<T: LinkTransport> CentralTask<T> {
    /// Create a central task tracking the given identities. Inbound
    /// notifications are forwarded to `notifications` as
    /// `(session, payload)` pairs.
    pub fn new(
        transport: T,
        targets: Vec<AdvertisedIdentity>,
        config: CentralConfig,
        notifications: mpsc::UnboundedSender<(SessionId, Vec<u8>)>,
    ) -> Self {
        let filter: Vec<ServiceId> = targets.iter().map(|t| t.service).collect();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            scan: ScanController::new(filter),
            registry: PeerRegistry::new(targets, config.session.clone()),
            router: NotificationRouter::new(notifications),
            config,
            commands: Some(command_rx),
            command_tx,
            status_tx: None,
            uplink: None,
            attempting: None,
            running: false,
        }
    }

    /// Attach a periodic uplink writer; requires `uplink_period` in the
    /// configuration
    pub fn with_uplink(mut self, source: Box<dyn TelemetrySource>) -> Self {
        match self.config.uplink_period {
            Some(period) => {
                self.uplink = Some(Uplink {
                    source,
                    period,
                    next_due: None,
                });
            }
            None => warn!("uplink source given but no uplink period configured"),
        }
        self
    }

    /// Command handle for a task about to be spawned
    pub fn handle(&self) -> CentralHandle {
        CentralHandle {
            commands: self.command_tx.clone(),
        }
    }

    /// Subscribe to per-turn session status updates
    pub fn status_events(&mut self) -> mpsc::UnboundedReceiver<SessionStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.status_tx = Some(tx);
        rx
    }

    /// Main driver loop; runs until shutdown or transport loss
    pub async fn run(&mut self) -> Result<(), LinkError> {
        let mut events = self
            .transport
            .take_events()
            .ok_or(LinkError::EventChannelClosed)?;
        let mut commands = self.commands.take().ok_or(LinkError::EventChannelClosed)?;

        info!(
            "central task starting, tracking {} identities",
            self.registry.targets().len()
        );

        if let Some(effect) = self.scan.start() {
            self.apply_scan_effect(effect).await;
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.running = true;

        while self.running {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("transport event channel closed, stopping");
                        break;
                    }
                },
                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command).await;
                    }
                },
                _ = ticker.tick() => self.handle_tick().await,
            }
        }

        self.release_all().await;
        info!("central task stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event and command handling
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: LinkEvent) {
        let now = Instant::now();
        match event {
            LinkEvent::AdvertisementObserved { address, services } => {
                let Some(peer) = self.scan.on_advertisement(address, &services) else {
                    return;
                };
                match self.registry.on_discovered(peer, now) {
                    Some((id, effects)) => self.run_effects(id, effects).await,
                    None => {
                        // No session accepted the discovery; allow the
                        // address to be reported again later
                        self.scan.forget(address);
                    }
                }
            }
            LinkEvent::LinkLost { link, reason } => {
                let Some(id) = self.registry.session_id_by_link(link) else {
                    debug!("link loss on untracked link {:?}", link);
                    return;
                };
                self.router.unbind_session(id);
                let effects = self
                    .registry
                    .handle_event(id, SessionEvent::LinkLost(reason), now);
                self.run_effects(id, effects).await;
            }
            LinkEvent::ValueChanged {
                characteristic,
                payload,
            } => {
                self.router.on_value_changed(characteristic, payload);
            }
        }
    }

    async fn handle_command(&mut self, command: CentralCommand) {
        let now = Instant::now();
        match command {
            CentralCommand::Abandon(service) => {
                let Some((id, address, effects)) = self.registry.abandon(service, now) else {
                    debug!("abandon for untracked service {}", service);
                    return;
                };
                info!("{}: session for {} abandoned", id, service);
                self.router.unbind_session(id);
                self.scan.forget(address);
                self.run_effects(id, effects).await;
                if self.registry.wants_discovery() {
                    if let Some(effect) = self.scan.resume() {
                        self.apply_scan_effect(effect).await;
                    }
                }
            }
            CentralCommand::Shutdown => {
                info!("central task shutting down");
                self.running = false;
            }
        }
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();
        for (id, effects) in self.registry.tick(now) {
            self.run_effects(id, effects).await;
        }
        self.run_uplink(now).await;
    }

    // ------------------------------------------------------------------
    // Effect execution
    // ------------------------------------------------------------------

    /// Drain an effect batch, feeding each outcome straight back into the
    /// session until the turn produces no further work
    async fn run_effects(&mut self, id: SessionId, effects: SessionEffects) {
        let mut queue: VecDeque<SessionEffect> = effects.into_iter().collect();
        while let Some(effect) = queue.pop_front() {
            let followups = self.execute_effect(id, effect).await;
            queue.extend(followups);
        }
        self.after_session_turn(id).await;
    }

    async fn execute_effect(&mut self, id: SessionId, effect: SessionEffect) -> SessionEffects {
        let session_cfg = self.config.session.clone();
        match effect {
            SessionEffect::Connect(peer) => {
                // A connection attempt always suspends scanning
                if let Some(e) = self.scan.stop() {
                    self.apply_scan_effect(e).await;
                }
                self.scan.on_attempt_started();
                self.attempting = Some(id);
                debug!("{}: connecting to {}", id, peer.address);
                let event =
                    match timeout(session_cfg.connect_timeout, self.transport.connect(&peer)).await
                    {
                        Ok(Ok(link)) => SessionEvent::LinkUp(link),
                        Ok(Err(err)) => SessionEvent::ConnectFailed(err),
                        Err(_) => SessionEvent::ConnectFailed(LinkError::ConnectTimeout),
                    };
                self.registry.handle_event(id, event, Instant::now())
            }
            SessionEffect::ResolveService(link, service) => {
                let event = match timeout(
                    session_cfg.resolve_timeout,
                    self.transport.resolve_service(link, service),
                )
                .await
                {
                    Ok(Ok(Some(handle))) => SessionEvent::ServiceFound(handle),
                    Ok(Ok(None)) => SessionEvent::ServiceMissing,
                    Ok(Err(err)) => SessionEvent::ResolutionFailed(err),
                    Err(_) => SessionEvent::ResolutionFailed(LinkError::ResolutionTimeout),
                };
                self.registry.handle_event(id, event, Instant::now())
            }
            SessionEffect::ResolveCharacteristic(service, characteristic) => {
                let event = match timeout(
                    session_cfg.resolve_timeout,
                    self.transport.resolve_characteristic(service, characteristic),
                )
                .await
                {
                    Ok(Ok(Some(info))) => SessionEvent::CharacteristicFound {
                        handle: info.handle,
                        supports_notify: info.supports_notify,
                    },
                    Ok(Ok(None)) => SessionEvent::CharacteristicMissing,
                    Ok(Err(err)) => SessionEvent::ResolutionFailed(err),
                    Err(_) => SessionEvent::ResolutionFailed(LinkError::ResolutionTimeout),
                };
                self.registry.handle_event(id, event, Instant::now())
            }
            SessionEffect::Subscribe(characteristic) => {
                let event = match timeout(
                    session_cfg.subscribe_timeout,
                    self.transport.subscribe(characteristic),
                )
                .await
                {
                    Ok(Ok(())) => SessionEvent::SubscribeOk,
                    Ok(Err(err)) => SessionEvent::ResolutionFailed(err),
                    Err(_) => SessionEvent::ResolutionFailed(LinkError::ResolutionTimeout),
                };
                self.registry.handle_event(id, event, Instant::now())
            }
            SessionEffect::Disconnect(link) => {
                if let Err(err) = self.transport.disconnect(link).await {
                    warn!("{}: disconnect failed: {}", id, err);
                }
                SessionEffects::new()
            }
            SessionEffect::ResumeScan => {
                // The peer may advertise again now; let it be reported
                if let Some(session) = self.registry.session(id) {
                    self.scan.forget(session.peer().address);
                }
                if let Some(e) = self.scan.resume() {
                    self.apply_scan_effect(e).await;
                }
                SessionEffects::new()
            }
        }
    }

    /// Bookkeeping once a session's turn has fully drained
    async fn after_session_turn(&mut self, id: SessionId) {
        let snapshot = self
            .registry
            .session(id)
            .map(|s| (s.state(), s.retry_count(), s.bound(), s.target().service));

        if let Some((state, retry_count, bound, service)) = snapshot {
            if state.is_established() && !self.router.is_bound(id) {
                if let Some(characteristic) = bound {
                    self.router.bind(characteristic, id);
                }
            }
            self.emit_status(SessionStatus {
                session: id,
                service,
                state,
                retry_count,
            });
        }

        // Free the attempt slot once the attempt concludes either way
        if self.attempting == Some(id) {
            let concluded = snapshot
                .map(|(state, ..)| !state.is_attempting())
                .unwrap_or(true);
            if concluded {
                self.attempting = None;
                if let Some(e) = self.scan.on_attempt_finished() {
                    self.apply_scan_effect(e).await;
                }
                if self.registry.wants_discovery() {
                    if let Some(e) = self.scan.resume() {
                        self.apply_scan_effect(e).await;
                    }
                }
            }
        }
    }

    async fn run_uplink(&mut self, now: Instant) {
        let payload = match self.uplink.as_mut() {
            Some(uplink) => {
                if let Some(due) = uplink.next_due {
                    if now < due {
                        return;
                    }
                }
                uplink.next_due = Some(now + uplink.period);
                uplink.source.sample()
            }
            None => return,
        };

        let targets: Vec<(SessionId, CharacteristicHandle)> = self
            .registry
            .sessions()
            .filter(|s| s.state().is_established())
            .filter_map(|s| s.bound().map(|ch| (s.id(), ch)))
            .collect();

        for (id, characteristic) in targets {
            match timeout(
                self.config.session.resolve_timeout,
                self.transport.write(characteristic, &payload),
            )
            .await
            {
                Ok(Ok(())) => debug!("{}: uplink wrote {} bytes", id, payload.len()),
                Ok(Err(err)) => warn!("{}: uplink write failed: {}", id, err),
                Err(_) => warn!("{}: uplink write timed out", id),
            }
        }
    }

    async fn apply_scan_effect(&self, effect: ScanEffect) {
        let result = match effect {
            ScanEffect::StartScan(filter) => self.transport.start_scan(&filter).await,
            ScanEffect::StopScan => self.transport.stop_scan().await,
        };
        if let Err(err) = result {
            warn!("scan control failed: {}", err);
        }
    }

    fn emit_status(&mut self, status: SessionStatus) {
        let receiver_gone = match &self.status_tx {
            Some(tx) => tx.send(status).is_err(),
            None => false,
        };
        if receiver_gone {
            self.status_tx = None;
        }
    }

    /// Release every held link and stop scanning on the way out
    async fn release_all(&mut self) {
        if let Some(effect) = self.scan.stop() {
            self.apply_scan_effect(effect).await;
        }
        let links: Vec<LinkHandle> = self.registry.sessions().filter_map(|s| s.link()).collect();
        for link in links {
            if let Err(err) = self.transport.disconnect(link).await {
                warn!("shutdown disconnect failed: {}", err);
            }
        }
    }
}
