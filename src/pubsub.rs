//! Subscription set: the channels and patterns the client has
//! asked to subscribe to since the endpoint was opened. Survives reconnects
//! and is replayed by the session restorer (C6).

use std::collections::HashSet;
use std::sync::Mutex;

/// A push delivered to pub/sub listeners: `message`/`pmessage` reply data.
#[derive(Clone, Debug, PartialEq)]
pub struct PubSubMessage {
    /// The channel the message was published on.
    pub channel: String,
    /// The pattern that matched, for `pmessage` deliveries.
    pub pattern: Option<String>,
    /// The published payload.
    pub payload: Vec<u8>,
}

/// Tracks the endpoint's current exact-channel and pattern subscriptions.
/// Mutated only on the handler's I/O loop, but kept behind a
/// `Mutex` rather than `RefCell` so it can be read from the restorer task
/// that runs alongside it.
#[derive(Default)]
pub struct SubscriptionSet {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

impl SubscriptionSet {
    /// Records a successful `SUBSCRIBE` to `channel`.
    pub fn add_channel(&self, channel: String) {
        self.inner.lock().unwrap().channels.insert(channel);
    }

    /// Records a successful `PSUBSCRIBE` to `pattern`.
    pub fn add_pattern(&self, pattern: String) {
        self.inner.lock().unwrap().patterns.insert(pattern);
    }

    /// Records a successful `UNSUBSCRIBE` from `channel`.
    pub fn remove_channel(&self, channel: &str) {
        self.inner.lock().unwrap().channels.remove(channel);
    }

    /// Records a successful `PUNSUBSCRIBE` from `pattern`.
    pub fn remove_pattern(&self, pattern: &str) {
        self.inner.lock().unwrap().patterns.remove(pattern);
    }

    /// A snapshot of the currently subscribed channels, for C6 to replay.
    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().unwrap().channels.iter().cloned().collect()
    }

    /// A snapshot of the currently subscribed patterns, for C6 to replay.
    pub fn patterns(&self) -> Vec<String> {
        self.inner.lock().unwrap().patterns.iter().cloned().collect()
    }

    /// True if there is nothing to restore.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.channels.is_empty() && inner.patterns.is_empty()
    }
}
