//! Authentication event publication
//!
//! Publication is best-effort: publishers never block and never fail the
//! operation that raised the event.

use std::sync::Arc;

use tokio::sync::broadcast;
use warden_oauth2::OAuth2Authentication;

/// An authentication outcome worth observing
#[derive(Clone, Debug)]
pub enum AuthenticationEvent {
    /// A session's authentication was replaced
    Success {
        /// The new authentication
        authentication: Arc<OAuth2Authentication>,
    },
    /// A session's authentication could not be refreshed
    Failure {
        /// The name of the principal whose session failed
        principal: String,
        /// Why it failed
        reason: String,
    },
}

/// A receiver of authentication events
pub trait AuthenticationEvents: Send + Sync {
    /// Publishes an event
    fn publish(&self, event: AuthenticationEvent);
}

impl<F> AuthenticationEvents for F
where
    F: Fn(AuthenticationEvent) + Send + Sync,
{
    fn publish(&self, event: AuthenticationEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEvents;

impl AuthenticationEvents for NoEvents {
    fn publish(&self, _event: AuthenticationEvent) {}
}

/// Fans events out over a broadcast channel
///
/// Events published while nobody is subscribed are dropped, and slow
/// subscribers may miss events.
#[derive(Clone, Debug)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<AuthenticationEvent>,
}

impl BroadcastEvents {
    /// A channel retaining up to `capacity` undelivered events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuthenticationEvent> {
        self.sender.subscribe()
    }
}

impl AuthenticationEvents for BroadcastEvents {
    fn publish(&self, event: AuthenticationEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("no subscribers for authentication event");
        }
    }
}
