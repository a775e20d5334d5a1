//! Connection Watchdog (C5): observes channel loss and schedules reconnect
//! attempts with exponential backoff, grounded on the same
//! `tokio-retry2`-based approach `redis-rs` uses for its own retry
//! strategies.

use crate::command::Command;
use crate::endpoint::Inner;
use crate::error::{ErrorKind, RedisError};
use crate::events::EndpointEvent;
use crate::handler;
use crate::lifecycle::LifecycleState;
use crate::resources::ClientResources;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_retry2::strategy::jitter;

/// External, testable controls over the reconnect engine, plus the signal
/// the command handler uses to wake it on disconnect.
pub struct WatchdogControl {
    listen_on_channel_inactive: AtomicBool,
    reconnect_suspended: AtomicBool,
    notify: Notify,
    attempt: AtomicU32,
}

impl Default for WatchdogControl {
    fn default() -> Self {
        WatchdogControl {
            listen_on_channel_inactive: AtomicBool::new(true),
            reconnect_suspended: AtomicBool::new(false),
            notify: Notify::new(),
            attempt: AtomicU32::new(0),
        }
    }
}

impl WatchdogControl {
    /// Enables or disables automatic reconnect scheduling on channel loss.
    pub fn set_listen_on_channel_inactive(&self, listen: bool) {
        self.listen_on_channel_inactive.store(listen, Ordering::Release);
        if listen {
            self.notify.notify_waiters();
        }
    }

    /// Suspends or resumes reconnect attempts without touching the
    /// listen-on-inactive flag.
    pub fn set_reconnect_suspended(&self, suspended: bool) {
        self.reconnect_suspended.store(suspended, Ordering::Release);
        if !suspended {
            self.attempt.store(0, Ordering::Release);
            self.notify.notify_waiters();
        }
    }

    /// Forces an immediate reconnect attempt, bypassing backoff timing.
    pub fn schedule_reconnect(&self) {
        self.attempt.store(0, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Wakes the watchdog loop without changing any control flag; used by
    /// the command handler to report a fresh disconnect, and by
    /// `Endpoint::close` to let the loop observe `CLOSED` promptly.
    pub(crate) fn wake(&self) {
        self.notify.notify_waiters();
    }
}

/// Spawns the watchdog's background loop on `resources`. Holds only a
/// [`Weak`] reference to the endpoint so a dropped `Endpoint` lets the task
/// exit instead of leaking forever.
pub(crate) fn spawn(inner: &Arc<Inner>, resources: ClientResources) {
    let weak = Arc::downgrade(inner);
    resources.spawn(run(weak, resources.clone()));
}

async fn run(weak: Weak<Inner>, resources: ClientResources) {
    loop {
        let Some(inner) = weak.upgrade() else { return };
        if inner.state.is_closed() {
            return;
        }
        if inner.state.load() != LifecycleState::Disconnected {
            let notified = inner.watchdog.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(inner);
            notified.await;
            continue;
        }
        drop(inner);
        reconnect_loop(&weak, &resources).await;
    }
}

/// Attempts reconnects with backoff until one succeeds, the endpoint
/// closes, or the loss of the `Inner` value tells us to give up.
async fn reconnect_loop(weak: &Weak<Inner>, resources: &ClientResources) {
    loop {
        let Some(inner) = weak.upgrade() else { return };
        if inner.state.is_closed() {
            return;
        }
        if inner.state.load() != LifecycleState::Disconnected {
            return;
        }

        if !inner.config.auto_reconnect
            || !inner.watchdog.listen_on_channel_inactive.load(Ordering::Acquire)
            || inner.watchdog.reconnect_suspended.load(Ordering::Acquire)
        {
            let notified = inner.watchdog.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(inner);
            notified.await;
            continue;
        }

        let attempt = inner.watchdog.attempt.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = jitter(backoff_delay(attempt, inner.config.reconnect_base_delay, inner.config.reconnect_max_delay));
        inner.events.publish(EndpointEvent::ReconnectScheduled { attempt, delay });
        drop(inner);
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else { return };
        if inner.state.is_closed() {
            return;
        }

        match inner.transport.connect(&inner.connection_info.addr).await {
            Ok(stream) => {
                inner.watchdog.attempt.store(0, Ordering::Release);
                inner.state.store(LifecycleState::Connected);
                let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                resources.spawn(handler::run(inner.clone(), stream, generation));
                return;
            }
            Err(err) => {
                inner.events.publish(EndpointEvent::ReconnectFailed {
                    attempt,
                    error: err.to_string(),
                });
                if inner.config.cancel_commands_on_reconnect_failure && attempt == 1 {
                    drain_buffer_with_error(
                        &inner,
                        RedisError::from((
                            ErrorKind::ReconnectFailed,
                            "Reconnect attempt failed and cancelCommandsOnReconnectFailure is set",
                        )),
                    );
                    inner.watchdog.reconnect_suspended.store(true, Ordering::Release);
                    inner.events.publish(EndpointEvent::ReconnectGaveUp);
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).map_or(cap, |d| d.min(cap))
}

fn drain_buffer_with_error(inner: &Inner, err: RedisError) {
    let drained: Vec<Command> = inner.buffer.lock().unwrap().drain(..).collect();
    for command in drained {
        command.complete(Err(err.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_then_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(2);
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_millis(400));
        assert_eq!(backoff_delay(20, base, cap), cap);
    }
}
