//! Peer registry: one session slot per wanted service
//!
//! Owns every `ConnectionSession` exclusively. Discovery events create or
//! feed sessions; a live session is never interrupted by a re-discovery of
//! its service. The registry also drives each session's `tick` once per
//! scheduler pass and collects the resulting effects.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::config::SessionConfig;
use crate::session::{ConnectionSession, SessionEffects, SessionEvent, SessionState};
use crate::types::{AdvertisedIdentity, LinkHandle, PeerAddress, PeerHandle, ServiceId, SessionId};

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// Holds, per wanted service identifier, the most recently discovered peer
/// and its connection session
#[derive(Debug)]
pub struct PeerRegistry {
    targets: Vec<AdvertisedIdentity>,
    sessions: HashMap<ServiceId, ConnectionSession>,
    config: SessionConfig,
    next_id: u64,
}

impl PeerRegistry {
    /// Create a registry tracking the given identities
    pub fn new(targets: Vec<AdvertisedIdentity>, config: SessionConfig) -> Self {
        Self {
            targets,
            sessions: HashMap::new(),
            config,
            next_id: 0,
        }
    }

    /// The identities this registry tracks
    pub fn targets(&self) -> &[AdvertisedIdentity] {
        &self.targets
    }

    /// Session for a wanted service, if one exists
    pub fn session_for(&self, service: ServiceId) -> Option<&ConnectionSession> {
        self.sessions.get(&service)
    }

    /// Session by registry-issued identifier
    pub fn session(&self, id: SessionId) -> Option<&ConnectionSession> {
        self.sessions.values().find(|s| s.id() == id)
    }

    /// Session currently holding the given link
    pub fn session_id_by_link(&self, link: LinkHandle) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.link() == Some(link))
            .map(|s| s.id())
    }

    /// Iterate all sessions
    pub fn sessions(&self) -> impl Iterator<Item = &ConnectionSession> {
        self.sessions.values()
    }

    /// Whether any wanted service still needs discovery to make progress
    pub fn wants_discovery(&self) -> bool {
        self.targets.iter().any(|t| {
            self.sessions
                .get(&t.service)
                .map(|s| s.can_replace())
                .unwrap_or(true)
        })
    }

    /// Route a discovered peer to its session. Creates the session on first
    /// discovery; an existing session is fed (and its peer handle replaced)
    /// only when it is idle or abandoned.
    pub fn on_discovered(
        &mut self,
        peer: PeerHandle,
        now: Instant,
    ) -> Option<(SessionId, SessionEffects)> {
        let target = *self
            .targets
            .iter()
            .find(|t| peer.advertises(t.service))?;

        // Take the slot to decide its fate without holding a map borrow
        match self.sessions.remove(&target.service) {
            Some(session) if !session.can_replace() => {
                debug!(
                    "{}: discovery of {} ignored, session is {}",
                    session.id(),
                    peer.address,
                    session.state().name()
                );
                self.sessions.insert(target.service, session);
                None
            }
            Some(mut session) if session.state() == SessionState::Idle => {
                session.adopt_peer(peer);
                let id = session.id();
                let effects = session.handle(SessionEvent::Discovered, now);
                self.sessions.insert(target.service, session);
                Some((id, effects))
            }
            _ => {
                // No session yet, or the previous one was abandoned
                self.next_id += 1;
                let id = SessionId::new(self.next_id);
                let mut session =
                    ConnectionSession::new(id, peer, target, self.config.clone(), now);
                let effects = session.handle(SessionEvent::Discovered, now);
                self.sessions.insert(target.service, session);
                Some((id, effects))
            }
        }
    }

    /// Feed one event to the session with the given id
    pub fn handle_event(
        &mut self,
        id: SessionId,
        event: SessionEvent,
        now: Instant,
    ) -> SessionEffects {
        match self.sessions.values_mut().find(|s| s.id() == id) {
            Some(session) => session.handle(event, now),
            None => {
                debug!("{}: event for unknown session dropped", id);
                SessionEffects::new()
            }
        }
    }

    /// Drive every session's tick once; returns the collected effects
    pub fn tick(&mut self, now: Instant) -> Vec<(SessionId, SessionEffects)> {
        self.sessions
            .values_mut()
            .map(|s| (s.id(), s.tick(now)))
            .filter(|(_, effects)| !effects.is_empty())
            .collect()
    }

    /// Remove the session for a wanted service, releasing whatever it holds.
    /// The only path that destroys a session.
    pub fn abandon(
        &mut self,
        service: ServiceId,
        now: Instant,
    ) -> Option<(SessionId, PeerAddress, SessionEffects)> {
        let mut session = self.sessions.remove(&service)?;
        let id = session.id();
        let address = session.peer().address;
        let effects = session.handle(SessionEvent::Abandon, now);
        Some((id, address, effects))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
