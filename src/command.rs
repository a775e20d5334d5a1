//! Command & future (C2): a plain completion cell with listener
//! registration plus an `await(deadline)` bridge.

use crate::cmd::Cmd;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::value::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

type Listener = Box<dyn FnOnce(RedisResult<Value>) + Send + 'static>;

enum State {
    Pending,
    Completed(RedisResult<Value>),
}

struct Shared {
    state: Mutex<State>,
    listeners: Mutex<Vec<Listener>>,
    notify: Notify,
}

/// A command submitted to an [`crate::endpoint::Endpoint`], paired with its
/// completion cell. Cloning a `Command` clones the handle, not the
/// completion state - all clones observe the same eventual result.
#[derive(Clone)]
pub struct Command {
    cmd: Arc<Cmd>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("cmd", &self.cmd.name()).finish()
    }
}

impl Command {
    /// Wraps an encoded command in a fresh, pending completion cell. A
    /// command may be submitted at most once through the normal path;
    /// [`Command::reset_for_retry`] is the explicit exception the retry
    /// engine uses.
    pub fn new(cmd: Cmd) -> Command {
        Command {
            cmd: Arc::new(cmd),
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending),
                listeners: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// The underlying encoded command.
    pub fn cmd(&self) -> &Cmd {
        &self.cmd
    }

    /// Completes the command's future with `result`, firing every
    /// registered listener exactly once, in registration order. Idempotent:
    /// only the first call has any effect, matching "futures complete at
    /// most once".
    pub fn complete(&self, result: RedisResult<Value>) {
        let mut state = self.shared.state.lock().unwrap();
        if matches!(*state, State::Completed(_)) {
            return;
        }
        *state = State::Completed(result.clone());
        drop(state);

        let listeners = std::mem::take(&mut *self.shared.listeners.lock().unwrap());
        for listener in listeners {
            let value = result.clone();
            listener(value);
        }
        self.shared.notify.notify_waiters();
    }

    /// Cancels the command: completes its future with
    /// [`ErrorKind::Cancelled`] if it has not already completed. This is
    /// the whole of cancellation from the command's point of view -
    /// whether the command is physically removed from a buffer or left in
    /// an in-flight queue to have its reply discarded is the owning
    /// queue's decision, not this method's.
    pub fn cancel(&self) {
        self.complete(Err(RedisError::from((
            ErrorKind::Cancelled,
            "Command was cancelled",
        ))));
    }

    /// True once the command has completed (successfully, with a server
    /// error, or by cancellation/disconnect).
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock().unwrap(), State::Completed(_))
    }

    /// True if the command completed specifically via [`Command::cancel`]
    /// or a disconnect-triggered cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.shared.state.lock().unwrap(),
            State::Completed(Err(e)) if e.kind() == ErrorKind::Cancelled
        )
    }

    /// Registers a listener that fires exactly once: on completion if
    /// still pending, or immediately (synchronously, from this call) if
    /// the command has already completed.
    pub fn on_complete(&self, listener: impl FnOnce(RedisResult<Value>) + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        match &*state {
            State::Completed(result) => {
                let result = result.clone();
                drop(state);
                listener(result);
            }
            State::Pending => {
                self.shared.listeners.lock().unwrap().push(Box::new(listener));
            }
        }
        let _ = &mut state;
    }

    /// Waits for completion, honoring a per-call deadline independent of
    /// any endpoint-wide default. A timed-out wait does not affect the
    /// command: `is_done()` may still flip to `true` afterwards and a
    /// later `await_result` will observe it.
    pub async fn await_result(&self, deadline: Duration) -> RedisResult<Value> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let State::Completed(result) = &*self.shared.state.lock().unwrap() {
                return result.clone();
            }

            match tokio::time::timeout(deadline, notified).await {
                Ok(()) => continue,
                Err(_) => {
                    return Err(RedisError::from((
                        ErrorKind::Timeout,
                        "Timed out waiting for command completion",
                    )))
                }
            }
        }
    }

    /// Resets a not-yet-completed command back to its initial state so it
    /// can be re-encoded and rewritten after a reconnect. This crate's
    /// `Value` decoding carries no per-command state (decoding lives
    /// entirely in the shared stream codec), so the only state to reset is
    /// the completion cell itself, and only if it is still pending.
    pub fn reset_for_retry(&self) {
        debug_assert!(!self.is_done(), "retrying an already-completed command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;

    #[tokio::test]
    async fn complete_is_idempotent() {
        let c = Command::new(cmd("PING"));
        c.complete(Ok(Value::Okay));
        c.complete(Ok(Value::Status("second".into())));
        assert_eq!(c.await_result(Duration::from_millis(10)).await, Ok(Value::Okay));
    }

    #[tokio::test]
    async fn await_result_wakes_on_later_completion() {
        let c = Command::new(cmd("GET"));
        let c2 = c.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c2.complete(Ok(Value::Int(7)));
        });
        assert_eq!(
            c.await_result(Duration::from_secs(1)).await,
            Ok(Value::Int(7))
        );
    }

    #[tokio::test]
    async fn timed_out_await_does_not_remove_command() {
        let c = Command::new(cmd("GET"));
        assert_eq!(
            c.await_result(Duration::from_millis(5)).await.unwrap_err().kind(),
            ErrorKind::Timeout
        );
        assert!(!c.is_done());
        c.complete(Ok(Value::Int(1)));
        assert_eq!(c.await_result(Duration::from_millis(5)).await, Ok(Value::Int(1)));
    }

    #[test]
    fn listener_registered_after_completion_fires_immediately() {
        let c = Command::new(cmd("PING"));
        c.complete(Ok(Value::Okay));
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        c.on_complete(move |result| {
            assert_eq!(result, Ok(Value::Okay));
            fired2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn cancel_completes_with_cancelled_error() {
        let c = Command::new(cmd("GET"));
        c.cancel();
        assert!(c.is_cancelled());
        assert!(c.is_done());
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let c = Command::new(cmd("GET"));
        c.complete(Ok(Value::Int(1)));
        c.cancel();
        assert!(!c.is_cancelled());
        assert_eq!(c.await_result(Duration::from_millis(10)).await, Ok(Value::Int(1)));
    }
}
