//! Inbound notification routing
//!
//! Maps characteristic-value events from the transport to the owning
//! session and forwards `(session, payload)` pairs to the registered
//! external consumer. Payloads are opaque bytes with an explicit length;
//! zero-length updates are valid.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{CharacteristicHandle, SessionId};

// ----------------------------------------------------------------------------
// Notification Router
// ----------------------------------------------------------------------------

/// Delivers inbound characteristic-value events to the external consumer
#[derive(Debug)]
pub struct NotificationRouter {
    routes: HashMap<CharacteristicHandle, SessionId>,
    sink: mpsc::UnboundedSender<(SessionId, Vec<u8>)>,
}

impl NotificationRouter {
    /// Create a router that forwards into the given consumer queue
    pub fn new(sink: mpsc::UnboundedSender<(SessionId, Vec<u8>)>) -> Self {
        Self {
            routes: HashMap::new(),
            sink,
        }
    }

    /// Route future events on a characteristic to a session
    pub fn bind(&mut self, characteristic: CharacteristicHandle, session: SessionId) {
        self.routes.insert(characteristic, session);
    }

    /// Drop every route owned by a session (its binding was invalidated)
    pub fn unbind_session(&mut self, session: SessionId) {
        self.routes.retain(|_, owner| *owner != session);
    }

    /// Whether a session currently has a route
    pub fn is_bound(&self, session: SessionId) -> bool {
        self.routes.values().any(|owner| *owner == session)
    }

    /// Forward one value-change event to the consumer
    pub fn on_value_changed(&self, characteristic: CharacteristicHandle, payload: Vec<u8>) {
        let Some(session) = self.routes.get(&characteristic) else {
            debug!("value change on unroutable characteristic {:?}", characteristic);
            return;
        };
        if self.sink.send((*session, payload)).is_err() {
            warn!("notification consumer dropped, discarding update");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
