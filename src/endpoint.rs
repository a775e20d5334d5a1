//! Endpoint / Channel Writer (C3): the thread-safe submission point shared
//! by every producer. Owns the command buffer and the lifecycle state;
//! delegates the live byte channel to whichever command handler task is
//! currently bound to it.

use crate::cmd::Cmd;
use crate::command::Command;
use crate::config::EndpointConfig;
use crate::connection_info::ConnectionInfo;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::events::{EndpointEvent, EventBus};
use crate::handler;
use crate::lifecycle::{LifecycleCell, LifecycleState};
use crate::pubsub::{PubSubMessage, SubscriptionSet};
use crate::resources::ClientResources;
use crate::transport::{DefaultTransport, Transport};
use crate::watchdog::{self, WatchdogControl};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

const PUBSUB_CHANNEL_CAPACITY: usize = 1024;

pub(crate) struct Inner {
    pub(crate) connection_info: ConnectionInfo,
    pub(crate) config: EndpointConfig,
    pub(crate) resources: ClientResources,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: LifecycleCell,
    pub(crate) buffer: Mutex<VecDeque<Command>>,
    pub(crate) auto_flush: AtomicBool,
    pub(crate) flush_notify: Notify,
    pub(crate) subscriptions: SubscriptionSet,
    pub(crate) events: EventBus,
    pub(crate) watchdog: WatchdogControl,
    /// Bumped every time a new command handler task is installed, so a
    /// handler task that is slow to unwind after losing a race (e.g. the
    /// watchdog reconnected before the old task noticed its own EOF) can
    /// tell it is stale and must not clobber newer state.
    pub(crate) generation: AtomicU64,
    pub(crate) pubsub_sender: broadcast::Sender<PubSubMessage>,
}

impl Inner {
    pub(crate) fn write(&self, cmd: Cmd) -> RedisResult<Command> {
        if self.state.is_closed() {
            return Err(RedisError::from((ErrorKind::ClientClosed, "Endpoint is closed")));
        }

        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() >= self.config.request_queue_size {
            return Err(RedisError::from((
                ErrorKind::QueueOverflow,
                "Command buffer is at its configured capacity",
            )));
        }

        let state = self.state.load();
        if state == LifecycleState::Disconnected && !self.config.accepts_while_disconnected() {
            return Err(RedisError::from((
                ErrorKind::Disconnected,
                "Endpoint is disconnected and configured to reject commands",
            )));
        }

        let command = Command::new(cmd);
        buffer.push_back(command.clone());
        let should_flush = self.auto_flush.load(Ordering::Acquire) && state == LifecycleState::Active;
        drop(buffer);

        if should_flush {
            self.flush_notify.notify_one();
        }
        Ok(command)
    }

    pub(crate) fn flush(&self) {
        self.flush_notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.state.store(LifecycleState::Closed);
        let drained: Vec<Command> = self.buffer.lock().unwrap().drain(..).collect();
        for command in drained {
            command.cancel();
        }
        self.flush_notify.notify_waiters();
        self.watchdog.wake();
    }
}

/// One logical client-to-server association. Survives reconnects; the
/// active channel and its command handler are swapped out underneath it
/// transparently.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) inner: Arc<Inner>,
}

impl Endpoint {
    /// Parses `uri` and connects using the default transport (TCP, or TLS
    /// when built with the `tls-rustls` feature, or a Unix domain socket).
    pub async fn connect(uri: &str, config: EndpointConfig, resources: ClientResources) -> RedisResult<Endpoint> {
        Endpoint::connect_with_transport(
            uri,
            config,
            resources,
            Arc::new(DefaultTransport { tcp_nodelay: true }),
        )
        .await
    }

    /// Connects using a caller-supplied transport, e.g. an in-memory pair
    /// for tests.
    pub async fn connect_with_transport(
        uri: &str,
        config: EndpointConfig,
        resources: ClientResources,
        transport: Arc<dyn Transport>,
    ) -> RedisResult<Endpoint> {
        let connection_info = ConnectionInfo::parse(uri)?;
        let (pubsub_sender, _) = broadcast::channel(PUBSUB_CHANNEL_CAPACITY);

        let inner = Arc::new(Inner {
            connection_info,
            config,
            resources: resources.clone(),
            transport,
            state: LifecycleCell::new(LifecycleState::NotConnected),
            buffer: Mutex::new(VecDeque::new()),
            auto_flush: AtomicBool::new(true),
            flush_notify: Notify::new(),
            subscriptions: SubscriptionSet::default(),
            events: EventBus::default(),
            watchdog: WatchdogControl::default(),
            generation: AtomicU64::new(0),
            pubsub_sender,
        });

        inner.state.store(LifecycleState::Registered);
        let stream = inner.transport.connect(&inner.connection_info.addr).await?;
        inner.state.store(LifecycleState::Connected);

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        resources.spawn(handler::run(inner.clone(), stream, generation));
        watchdog::spawn(&inner, resources);

        Ok(Endpoint { inner })
    }

    /// Submits a command. Returns immediately with a [`Command`] whose
    /// future resolves once the server replies (or the command's fate is
    /// otherwise decided by a disconnect, cancellation, or close).
    pub fn write(&self, cmd: Cmd) -> RedisResult<Command> {
        self.inner.write(cmd)
    }

    /// Schedules a flush of the command buffer onto the active channel.
    /// A no-op with `setAutoFlushCommands(true)` (the default), since every
    /// `write` already triggers one.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Enables or disables automatic flushing after every `write`. When
    /// disabled, callers must call [`Endpoint::flush`] explicitly to batch
    /// several writes into one transport-level flush.
    pub fn set_auto_flush_commands(&self, auto_flush: bool) {
        self.inner.auto_flush.store(auto_flush, Ordering::Release);
        if auto_flush {
            self.inner.flush();
        }
    }

    /// Closes the endpoint: transitions to `CLOSED`, cancels every buffered
    /// command immediately, and lets the active command handler wind down -
    /// which cancels whatever was already in flight on its next loop turn,
    /// woken by the same notification that would otherwise carry a flush.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.state.load()
    }

    /// True once the endpoint has completed restoration and is accepting
    /// writes to the wire.
    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// The channel/pattern subscription set, for inspection.
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.inner.subscriptions
    }

    /// Subscribes to lifecycle/restoration/reconnect events.
    pub fn events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribes to pub/sub `message`/`pmessage` deliveries.
    pub fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.inner.pubsub_sender.subscribe()
    }

    /// External watchdog controls, required for deterministic testing of
    /// the reconnect engine.
    pub fn watchdog(&self) -> &WatchdogControl {
        &self.inner.watchdog
    }
}
