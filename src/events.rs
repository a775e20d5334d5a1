//! Observable events: reflection-based test hooks are replaced here by an
//! explicit broadcast channel any caller (or test) can subscribe to, plus
//! `tracing` events for ordinary operational logging.

use tokio::sync::broadcast;

/// One lifecycle/restoration/reconnect notification.
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    /// The endpoint's lifecycle state changed.
    LifecycleChanged { from: &'static str, to: &'static str },
    /// Subscriptions were replayed after a (re)connect.
    SubscriptionsRestored { channels: usize, patterns: usize },
    /// A reconnect attempt was scheduled after a delay.
    ReconnectScheduled { attempt: u32, delay: std::time::Duration },
    /// A reconnect attempt failed.
    ReconnectFailed { attempt: u32, error: String },
    /// Reconnect attempts are exhausted or suspended; the endpoint remains
    /// `DISCONNECTED` until a caller reconnects explicitly.
    ReconnectGaveUp,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Publishes [`EndpointEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EndpointEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { sender }
    }
}

impl EventBus {
    /// Subscribes to future events. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. A `send` error (no subscribers) is not an error
    /// condition for the endpoint and is silently ignored, mirroring the
    /// resilience of `PushManager::try_send_raw`.
    pub fn publish(&self, event: EndpointEvent) {
        tracing::debug!(?event, "endpoint event");
        let _ = self.sender.send(event);
    }
}
