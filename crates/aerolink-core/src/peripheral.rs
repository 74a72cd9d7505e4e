//! Peripheral (sensor node) driver task
//!
//! Owns the advertising rotator and the telemetry publisher. Connect and
//! disconnect callbacks from the transport gate rotation and publishing;
//! ingest writes from the attached central are handed off to an unbounded
//! queue so the transport's event delivery path never blocks.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::PeripheralConfig;
use crate::error::LinkError;
use crate::publisher::{TelemetryPublisher, TelemetrySource};
use crate::rotator::{AdvertisingRotator, RotatorEffect};
use crate::transport::{PeripheralEvent, PeripheralTransport};
use crate::types::AdvertisedIdentity;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// External commands accepted by the peripheral task
#[derive(Debug, Clone)]
pub enum PeripheralCommand {
    /// Stop the task, dropping the attached central and the advertisement
    Shutdown,
}

/// Cloneable handle for sending commands into a running peripheral task
#[derive(Debug, Clone)]
pub struct PeripheralHandle {
    commands: mpsc::UnboundedSender<PeripheralCommand>,
}

impl PeripheralHandle {
    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.commands.send(PeripheralCommand::Shutdown);
    }
}

// ----------------------------------------------------------------------------
// Peripheral Task
// ----------------------------------------------------------------------------

/// Driver task for the peripheral role
pub struct PeripheralTask<P: PeripheralTransport> {
    transport: P,
    config: PeripheralConfig,
    rotator: AdvertisingRotator,
    publisher: TelemetryPublisher,
    /// Ingest queue: values written by the attached central
    ingest: mpsc::UnboundedSender<Vec<u8>>,
    commands: Option<mpsc::UnboundedReceiver<PeripheralCommand>>,
    command_tx: mpsc::UnboundedSender<PeripheralCommand>,
    running: bool,
}

impl<P: PeripheralTransport> PeripheralTask<P> {
    /// Create a peripheral task rotating over the given identities and
    /// publishing values from `source`. Central writes are forwarded to
    /// `ingest`.
    pub fn new(
        transport: P,
        identities: Vec<AdvertisedIdentity>,
        source: Box<dyn TelemetrySource>,
        config: PeripheralConfig,
        ingest: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<Self, LinkError> {
        let rotator = AdvertisingRotator::new(identities, config.rotator.clone())?;
        let publisher = TelemetryPublisher::new(source, config.publisher.clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Ok(Self {
            transport,
            config,
            rotator,
            publisher,
            ingest,
            commands: Some(command_rx),
            command_tx,
            running: false,
        })
    }

    /// Command handle for a task about to be spawned
    pub fn handle(&self) -> PeripheralHandle {
        PeripheralHandle {
            commands: self.command_tx.clone(),
        }
    }

    /// The identity currently on air
    pub fn active_identity(&self) -> AdvertisedIdentity {
        *self.rotator.active_identity()
    }

    /// Main driver loop; runs until shutdown or transport loss
    pub async fn run(&mut self) -> Result<(), LinkError> {
        let mut events = self
            .transport
            .take_events()
            .ok_or(LinkError::EventChannelClosed)?;
        let mut commands = self.commands.take().ok_or(LinkError::EventChannelClosed)?;

        info!(
            "peripheral task starting, advertising {}",
            self.rotator.active_identity().service
        );
        if let Err(err) = self.transport.advertise(self.rotator.active_identity()).await {
            warn!("initial advertise failed: {}", err);
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.running = true;

        while self.running {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("transport event channel closed, stopping");
                        break;
                    }
                },
                command = commands.recv() => {
                    if let Some(PeripheralCommand::Shutdown) = command {
                        info!("peripheral task shutting down");
                        self.running = false;
                    }
                },
                _ = ticker.tick() => self.handle_tick().await,
            }
        }

        if self.rotator.is_attached() {
            if let Err(err) = self.transport.disconnect_central().await {
                warn!("shutdown disconnect failed: {}", err);
            }
        }
        if let Err(err) = self.transport.stop_advertising().await {
            warn!("stop advertising failed: {}", err);
        }
        info!("peripheral task stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: PeripheralEvent) {
        let now = Instant::now();
        match event {
            PeripheralEvent::CentralConnected => {
                self.rotator.on_central_attached(now);
                self.publisher.on_attached(now);
            }
            PeripheralEvent::CentralDisconnected => {
                self.rotator.on_central_detached(now);
                self.publisher.on_detached();
            }
            PeripheralEvent::WriteReceived { payload } => {
                self.rotator.note_activity(now);
                if self.ingest.send(payload).is_err() {
                    warn!("ingest consumer dropped, discarding write");
                }
            }
        }
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();

        for effect in self.rotator.tick(now) {
            match effect {
                RotatorEffect::Advertise(identity) => {
                    if let Err(err) = self.transport.advertise(&identity).await {
                        warn!("advertise failed: {}", err);
                    }
                }
                RotatorEffect::DisconnectCentral => {
                    if let Err(err) = self.transport.disconnect_central().await {
                        warn!("disconnect of idle central failed: {}", err);
                    }
                }
            }
        }

        if let Some(payload) = self.publisher.tick(now) {
            match self.transport.set_value(&payload).await {
                Ok(()) => {
                    if let Err(err) = self.transport.notify().await {
                        warn!("notify failed: {}", err);
                    }
                }
                Err(err) => warn!("staging outgoing value failed: {}", err),
            }
        }
    }
}
