//! Observable guardian events.
//!
//! These are the only outputs the core pushes to the surrounding application:
//! authorization transitions and user-facing error text. Delivery uses a
//! `tokio::sync::broadcast` channel so any number of observers (settings UI,
//! log forwarder) can subscribe; an event sent with no subscriber is dropped.

use tokio::sync::broadcast;

use crate::error::GuardianError;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardianEvent {
    AuthorizationChanged(bool),
    ErrorOccurred(String),
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<GuardianEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.tx.subscribe()
    }

    pub fn authorization_changed(&self, has_auth: bool) {
        let _ = self.tx.send(GuardianEvent::AuthorizationChanged(has_auth));
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(GuardianEvent::ErrorOccurred(message.into()));
    }

    pub fn report(&self, err: &GuardianError) {
        self.error(err.user_message());
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
