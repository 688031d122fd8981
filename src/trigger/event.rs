//! In-process event ingress for event triggers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// An application event published onto the bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub channel: String,
    pub event_name: String,
    pub payload: Value,
}

/// Fan-out bus connecting event publishers to the trigger dispatcher.
/// Lagging subscribers drop the oldest events rather than block publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn publish(&self, channel: impl Into<String>, event_name: impl Into<String>, payload: Value) {
        let _ = self.tx.send(BusEvent {
            channel: channel.into(),
            event_name: event_name.into(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
