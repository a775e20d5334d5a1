//! Endpoint configuration: a plain programmatic builder, not a CLI or
//! persisted config.

use std::time::Duration;

/// What happens to a submission made while the endpoint is `DISCONNECTED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DisconnectedBehavior {
    /// `ACCEPT_COMMANDS` if `autoReconnect` is on, `REJECT_COMMANDS`
    /// otherwise.
    #[default]
    Default,
    /// Buffer submissions regardless of `autoReconnect`.
    AcceptCommands,
    /// Fail submissions fast regardless of `autoReconnect`.
    RejectCommands,
}

/// Delivery guarantee selected for commands that were written to the wire
/// but not yet replied to when the channel is lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Rewrite the command after reconnect; the caller's future resolves
    /// only once the retried command completes.
    AtLeastOnce,
    /// Complete the command's future with a cancellation error instead of
    /// retrying it.
    AtMostOnce,
}

/// Tunable behavior for one [`crate::endpoint::Endpoint`].
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Attempt reconnect on channel loss. Default on.
    pub auto_reconnect: bool,
    /// If the first reconnect attempt after a loss fails, fail every
    /// queued and buffered command and suspend reconnect. Default off
    /// (retry forever).
    pub cancel_commands_on_reconnect_failure: bool,
    /// Stop reconnecting once a protocol-level error is observed. Default
    /// off.
    pub suspend_reconnect_on_protocol_failure: bool,
    /// Issue `PING` as the first command on every new channel and release
    /// the endpoint to users only on success.
    pub ping_before_activate_connection: bool,
    /// Hard upper bound on buffer + in-flight; submissions past the bound
    /// fail fast.
    pub request_queue_size: usize,
    /// What happens to submissions made while disconnected.
    pub disconnected_behavior: DisconnectedBehavior,
    /// Delivery guarantee for commands in flight when the channel is lost.
    /// Derived from `auto_reconnect` by [`EndpointConfig::delivery_guarantee`]
    /// unless overridden.
    pub delivery_guarantee: Option<DeliveryGuarantee>,
    /// Base backoff for the reconnect watchdog.
    pub reconnect_base_delay: Duration,
    /// Backoff cap for the reconnect watchdog. Default 30s.
    pub reconnect_max_delay: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            auto_reconnect: true,
            cancel_commands_on_reconnect_failure: false,
            suspend_reconnect_on_protocol_failure: false,
            ping_before_activate_connection: false,
            request_queue_size: usize::MAX,
            disconnected_behavior: DisconnectedBehavior::Default,
            delivery_guarantee: None,
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

impl EndpointConfig {
    /// Effective delivery guarantee: the explicit override if set,
    /// otherwise at-least-once exactly when `auto_reconnect` is on.
    pub fn delivery_guarantee(&self) -> DeliveryGuarantee {
        self.delivery_guarantee.unwrap_or(if self.auto_reconnect {
            DeliveryGuarantee::AtLeastOnce
        } else {
            DeliveryGuarantee::AtMostOnce
        })
    }

    /// Whether a submission while `DISCONNECTED` should be buffered.
    pub fn accepts_while_disconnected(&self) -> bool {
        match self.disconnected_behavior {
            DisconnectedBehavior::Default => self.auto_reconnect,
            DisconnectedBehavior::AcceptCommands => true,
            DisconnectedBehavior::RejectCommands => false,
        }
    }
}
