//! The endpoint lifecycle state machine shared by the channel writer and
//! the command handler.

use std::sync::atomic::{AtomicU8, Ordering};

/// One of the states an endpoint moves through over its lifetime.
/// Transitions are monotonic except `ACTIVE <-> DISCONNECTED`, which may
/// oscillate across reconnects; `CLOSED` is terminal from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// No channel has ever been registered.
    NotConnected = 0,
    /// A channel is bound but the transport connect has not resolved.
    Registered = 1,
    /// The transport is connected; session restoration has not started.
    Connected = 2,
    /// Session restoration (PING/AUTH/SELECT/SUBSCRIBE replay) is running.
    Activating = 3,
    /// Restoration succeeded; the buffer is draining and writes go to the
    /// wire.
    Active = 4,
    /// The channel was lost; submissions buffer or fail fast depending on
    /// configuration while a reconnect may be in progress.
    Disconnected = 5,
    /// The endpoint was closed by the user. Terminal.
    Closed = 6,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> LifecycleState {
        match raw {
            0 => LifecycleState::NotConnected,
            1 => LifecycleState::Registered,
            2 => LifecycleState::Connected,
            3 => LifecycleState::Activating,
            4 => LifecycleState::Active,
            5 => LifecycleState::Disconnected,
            6 => LifecycleState::Closed,
            _ => unreachable!("invalid lifecycle state byte"),
        }
    }
}

/// An atomically-readable lifecycle state cell, safe to share between the
/// producer-facing endpoint and the single-task command handler.
#[derive(Debug)]
pub struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub fn new(initial: LifecycleState) -> LifecycleCell {
        LifecycleCell(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// True if the current state is `CLOSED`.
    pub fn is_closed(&self) -> bool {
        self.load() == LifecycleState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        let cell = LifecycleCell::new(LifecycleState::NotConnected);
        for state in [
            LifecycleState::Registered,
            LifecycleState::Connected,
            LifecycleState::Activating,
            LifecycleState::Active,
            LifecycleState::Disconnected,
            LifecycleState::Closed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
        assert!(cell.is_closed());
    }
}
