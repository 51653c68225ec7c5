use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel. Receivers that fall behind
/// skip events.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Fire-and-forget fan-out of named events to every connected client
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: &str, payload: Value);
}

/// A single event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event: String,
    pub payload: Value,
}

/// Broadcaster over a `tokio::sync::broadcast` channel
#[derive(Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Arc<BroadcastEvent>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Each connected client calls this once to get its own receiver
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastEvent>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: &str, payload: Value) {
        let message = Arc::new(BroadcastEvent {
            event: event.to_string(),
            payload,
        });

        // send() only fails when nobody is listening
        match self.sender.send(message) {
            Ok(receivers) => log::debug!("Broadcast '{}' to {} clients", event, receivers),
            Err(_) => log::debug!("Broadcast '{}' dropped, no clients connected", event),
        }
    }
}
