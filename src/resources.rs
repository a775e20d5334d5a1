//! Explicit, threaded-in client-wide state: an explicit `ClientResources`
//! value passed into constructors instead of a per-process global
//! executor/shutdown hook.

use crate::connection_info::DEFAULT_TIMEOUT;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::Span;

/// Shared, cloneable state handed to every [`crate::endpoint::Endpoint`]
/// constructed in a process: the executor to schedule background tasks
/// (flush, watchdog, restoration) on, the default per-command timeout,
/// and the parent span those tasks' `tracing` events nest under.
#[derive(Clone)]
pub struct ClientResources {
    handle: Handle,
    default_timeout: Duration,
    span: Span,
}

impl ClientResources {
    /// Builds a `ClientResources` bound to the calling task's current Tokio
    /// runtime, with the default 60-minute command timeout.
    pub fn current() -> ClientResources {
        ClientResources {
            handle: Handle::current(),
            default_timeout: DEFAULT_TIMEOUT,
            span: tracing::info_span!("redis_endpoint"),
        }
    }

    /// Builds a `ClientResources` bound to an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> ClientResources {
        ClientResources {
            handle,
            default_timeout: DEFAULT_TIMEOUT,
            span: tracing::info_span!("redis_endpoint"),
        }
    }

    /// Overrides the default per-command timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> ClientResources {
        self.default_timeout = timeout;
        self
    }

    /// Overrides the parent span background tasks' `tracing` events nest
    /// under, e.g. to tag them with a caller-chosen connection name.
    pub fn with_span(mut self, span: Span) -> ClientResources {
        self.span = span;
        self
    }

    /// The executor background tasks are spawned on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The default per-command timeout, used when a caller does not
    /// specify one to `Command::await_result`.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The parent span for this endpoint's background tasks.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Spawns a future on this resource's executor, detached, nested under
    /// this resource's span.
    pub fn spawn(&self, future: impl std::future::Future<Output = ()> + Send + 'static) {
        use tracing::Instrument;
        self.handle.spawn(future.instrument(self.span.clone()));
    }
}
