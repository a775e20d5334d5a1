//! Command Handler (C4): the protocol state machine bound to one channel
//! from `CONNECTED` through `DISCONNECTED`. Owns the in-flight FIFO,
//! drives the codec, and decides each in-flight command's fate when the
//! channel is lost. Grounded on the write/read split and lifecycle of
//! `redis-rs`'s `MultiplexedConnection`.

use crate::cmd::CommandKind;
use crate::command::Command;
use crate::config::DeliveryGuarantee;
use crate::endpoint::Inner;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::events::EndpointEvent;
use crate::lifecycle::LifecycleState;
use crate::parser::ValueCodec;
use crate::pubsub::PubSubMessage;
use crate::restore;
use crate::transport::BoxedStream;
use crate::value::Value;
use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::codec::Decoder;

/// Runs one channel's worth of protocol state machine to completion. Exits
/// once the channel is lost or the endpoint is closed; the watchdog (C5)
/// is responsible for bringing up a replacement handler.
pub(crate) async fn run(inner: Arc<Inner>, stream: BoxedStream, generation: u64) {
    let framed = ValueCodec::default().framed(stream);
    let (mut sink, mut reply_stream) = framed.split();

    transition(&inner, LifecycleState::Activating);
    if let Err(err) = restore::restore(&inner, &mut sink, &mut reply_stream).await {
        if err.is_fatal() {
            fatal_close(&inner, generation, err);
        } else {
            disconnect(&inner, generation, &mut VecDeque::new(), err).await;
        }
        return;
    }

    transition(&inner, LifecycleState::Active);

    // Restoration complete: drain whatever accumulated in the buffer while
    // it was not yet safe to write, regardless of the auto-flush setting.
    let mut in_flight: VecDeque<Command> = VecDeque::new();
    if let Err(err) = flush_buffer(&inner, &mut sink, &mut in_flight).await {
        disconnect(&inner, generation, &mut in_flight, err).await;
        return;
    }

    loop {
        if inner.state.is_closed() {
            for command in in_flight.drain(..) {
                command.cancel();
            }
            return;
        }

        tokio::select! {
            frame = reply_stream.next() => {
                match frame {
                    Some(Ok(value)) => handle_frame(&inner, value, &mut in_flight),
                    Some(Err(err)) => {
                        disconnect(&inner, generation, &mut in_flight, err).await;
                        return;
                    }
                    None => {
                        let err = RedisError::from((ErrorKind::FatalReceiveError, "Channel closed by peer"));
                        disconnect(&inner, generation, &mut in_flight, err).await;
                        return;
                    }
                }
            }
            // `Notify::notify_one` stores a permit when fired with no
            // waiter yet registered, so a flush requested just before this
            // loop starts listening is not lost.
            _ = inner.flush_notify.notified() => {
                if let Err(err) = flush_buffer(&inner, &mut sink, &mut in_flight).await {
                    disconnect(&inner, generation, &mut in_flight, err).await;
                    return;
                }
            }
        }
    }
}

fn transition(inner: &Arc<Inner>, to: LifecycleState) {
    let from = inner.state.load();
    inner.state.store(to);
    inner.events.publish(EndpointEvent::LifecycleChanged {
        from: state_label(from),
        to: state_label(to),
    });
}

fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::NotConnected => "NOT_CONNECTED",
        LifecycleState::Registered => "REGISTERED",
        LifecycleState::Connected => "CONNECTED",
        LifecycleState::Activating => "ACTIVATING",
        LifecycleState::Active => "ACTIVE",
        LifecycleState::Disconnected => "DISCONNECTED",
        LifecycleState::Closed => "CLOSED",
    }
}

/// Drains the command buffer onto the wire, moving each command into
/// `in_flight` as it is written. Does nothing before `ACTIVE`: all writes
/// are serialized until restoration completes, rather than racing partial
/// activation.
async fn flush_buffer<Tx>(inner: &Arc<Inner>, sink: &mut Tx, in_flight: &mut VecDeque<Command>) -> RedisResult<()>
where
    Tx: Sink<Vec<u8>, Error = RedisError> + Unpin,
{
    if inner.state.load() != LifecycleState::Active {
        return Ok(());
    }

    let mut wrote_any = false;
    loop {
        let next = inner.buffer.lock().unwrap().pop_front();
        let Some(command) = next else { break };
        let bytes = match command.cmd().get_packed_command() {
            Ok(bytes) => bytes,
            Err(err) => {
                // Nothing was written to the wire for this command: fail
                // its own future and move on to the next buffered command
                // rather than desyncing the in-flight queue.
                command.complete(Err(err));
                continue;
            }
        };
        match sink.send(bytes).await {
            Ok(()) => {
                wrote_any = true;
                in_flight.push_back(command);
            }
            Err(err) => {
                // The write did not complete; the server never saw it, so it
                // goes back to the front of the buffer for retry rather than
                // failing the command outright.
                inner.buffer.lock().unwrap().push_front(command);
                return Err(err);
            }
        }
    }

    if wrote_any {
        sink.flush().await?;
    }
    Ok(())
}

fn handle_frame(inner: &Arc<Inner>, value: Value, in_flight: &mut VecDeque<Command>) {
    if is_pubsub_message(&value) {
        dispatch_pubsub_message(inner, value);
        return;
    }

    let Some(command) = in_flight.pop_front() else {
        tracing::warn!("received a reply with no command in flight; discarding");
        return;
    };

    if command.cmd().kind() == CommandKind::SubscriptionChange {
        apply_subscription_change(inner, &value);
    }

    let result = value.extract_error().and_then(|v| command.cmd().decode_output(v));
    command.complete(result);
}

fn is_pubsub_message(value: &Value) -> bool {
    matches!(value, Value::Array(items) if matches!(
        items.first().and_then(value_as_str),
        Some("message") | Some("pmessage")
    ))
}

fn value_as_str(value: &Value) -> Option<&str> {
    match value {
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok(),
        Value::Status(s) => Some(s.as_str()),
        _ => None,
    }
}

fn dispatch_pubsub_message(inner: &Arc<Inner>, value: Value) {
    let Value::Array(mut items) = value else { return };
    let message = match items.len() {
        3 => {
            let payload = take_bytes(items.pop());
            let channel = take_string(items.pop());
            PubSubMessage { channel, pattern: None, payload }
        }
        4 => {
            let payload = take_bytes(items.pop());
            let channel = take_string(items.pop());
            let pattern = take_string(items.pop());
            PubSubMessage { channel, pattern: Some(pattern), payload }
        }
        _ => return,
    };
    let _ = inner.pubsub_sender.send(message);
}

fn take_bytes(value: Option<Value>) -> Vec<u8> {
    match value {
        Some(Value::BulkString(bytes)) => bytes,
        Some(Value::Status(s)) => s.into_bytes(),
        _ => Vec::new(),
    }
}

fn take_string(value: Option<Value>) -> String {
    String::from_utf8_lossy(&take_bytes(value)).into_owned()
}

fn apply_subscription_change(inner: &Arc<Inner>, value: &Value) {
    let Value::Array(items) = value else { return };
    let (Some(kind), Some(name)) = (items.first().and_then(value_as_str), items.get(1).and_then(value_as_str)) else {
        return;
    };
    match kind {
        "subscribe" => inner.subscriptions.add_channel(name.to_owned()),
        "unsubscribe" => inner.subscriptions.remove_channel(name),
        "psubscribe" => inner.subscriptions.add_pattern(name.to_owned()),
        "punsubscribe" => inner.subscriptions.remove_pattern(name),
        _ => {}
    }
}

/// Implements the disconnect algorithm: every in-flight command's fate is
/// decided by the configured delivery guarantee, the buffer keeps whatever
/// was never observed by the server, and the watchdog is woken to attempt
/// a reconnect.
async fn disconnect(inner: &Arc<Inner>, generation: u64, in_flight: &mut VecDeque<Command>, reason: RedisError) {
    if inner.generation.load(Ordering::SeqCst) != generation || inner.state.is_closed() {
        return;
    }

    tracing::debug!(error = %reason, "channel lost");
    transition(inner, LifecycleState::Disconnected);

    let drained: Vec<Command> = in_flight.drain(..).collect();
    match inner.config.delivery_guarantee() {
        DeliveryGuarantee::AtLeastOnce => {
            let mut buffer = inner.buffer.lock().unwrap();
            for command in drained.into_iter().rev() {
                command.reset_for_retry();
                buffer.push_front(command);
            }
        }
        DeliveryGuarantee::AtMostOnce => {
            for command in drained {
                command.complete(Err(RedisError::from((
                    ErrorKind::Cancelled,
                    "Command was cancelled: channel lost",
                ))));
            }
        }
    }

    if reason.kind() == ErrorKind::ResponseError && inner.config.suspend_reconnect_on_protocol_failure {
        inner.watchdog.set_reconnect_suspended(true);
        inner.events.publish(EndpointEvent::ReconnectGaveUp);
    }

    inner.watchdog.wake();
}

fn fatal_close(inner: &Arc<Inner>, generation: u64, reason: RedisError) {
    if inner.generation.load(Ordering::SeqCst) != generation || inner.state.is_closed() {
        return;
    }
    transition(inner, LifecycleState::Closed);
    let drained: Vec<Command> = inner.buffer.lock().unwrap().drain(..).collect();
    for command in drained {
        command.complete(Err(reason.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recognizes_message_and_pmessage_as_pushes() {
        let message = Value::Array(vec![
            Value::BulkString(b"message".to_vec()),
            Value::BulkString(b"channel0".to_vec()),
            Value::BulkString(b"hello".to_vec()),
        ]);
        assert!(is_pubsub_message(&message));

        let pmessage = Value::Array(vec![
            Value::BulkString(b"pmessage".to_vec()),
            Value::BulkString(b"ch*".to_vec()),
            Value::BulkString(b"channel0".to_vec()),
            Value::BulkString(b"hello".to_vec()),
        ]);
        assert!(is_pubsub_message(&pmessage));
    }

    #[tokio::test]
    async fn subscribe_reply_is_not_a_push() {
        let reply = Value::Array(vec![
            Value::BulkString(b"subscribe".to_vec()),
            Value::BulkString(b"channel0".to_vec()),
            Value::Int(1),
        ]);
        assert!(!is_pubsub_message(&reply));
    }

    #[tokio::test]
    async fn dispatches_message_without_pattern() {
        let value = Value::Array(vec![
            Value::BulkString(b"message".to_vec()),
            Value::BulkString(b"channel0".to_vec()),
            Value::BulkString(b"hello".to_vec()),
        ]);
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        let inner = test_inner(tx);
        dispatch_pubsub_message(&inner, value);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.channel, "channel0");
        assert_eq!(received.pattern, None);
        assert_eq!(received.payload, b"hello".to_vec());
    }

    #[tokio::test]
    async fn dispatches_pmessage_with_pattern() {
        let value = Value::Array(vec![
            Value::BulkString(b"pmessage".to_vec()),
            Value::BulkString(b"ch*".to_vec()),
            Value::BulkString(b"channel0".to_vec()),
            Value::BulkString(b"hello".to_vec()),
        ]);
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        let inner = test_inner(tx);
        dispatch_pubsub_message(&inner, value);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.channel, "channel0");
        assert_eq!(received.pattern.as_deref(), Some("ch*"));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_update_the_subscription_set() {
        let (tx, _rx) = tokio::sync::broadcast::channel(8);
        let inner = test_inner(tx);

        apply_subscription_change(
            &inner,
            &Value::Array(vec![
                Value::BulkString(b"subscribe".to_vec()),
                Value::BulkString(b"channel0".to_vec()),
                Value::Int(1),
            ]),
        );
        assert_eq!(inner.subscriptions.channels(), vec!["channel0".to_string()]);

        apply_subscription_change(
            &inner,
            &Value::Array(vec![
                Value::BulkString(b"unsubscribe".to_vec()),
                Value::BulkString(b"channel0".to_vec()),
                Value::Int(0),
            ]),
        );
        assert!(inner.subscriptions.channels().is_empty());
    }

    #[tokio::test]
    async fn a_rejected_output_fails_only_its_own_command_and_does_not_desync() {
        struct ExpectInt;
        impl crate::cmd::OutputDecoder for ExpectInt {
            fn decode(&self, value: Value) -> RedisResult<Value> {
                match value {
                    Value::Int(_) => Ok(value),
                    _ => Err(RedisError::from((ErrorKind::DecodeError, "expected an integer reply"))),
                }
            }
        }

        let (tx, _rx) = tokio::sync::broadcast::channel(8);
        let inner = test_inner(tx);

        let mut incr = crate::cmd::cmd("INCR");
        incr.with_output_decoder(Arc::new(ExpectInt));
        let first = Command::new(incr);
        let second = Command::new(crate::cmd::cmd("GET"));

        let mut in_flight: VecDeque<Command> = VecDeque::new();
        in_flight.push_back(first.clone());
        in_flight.push_back(second.clone());

        // The server replies with a status line where this command's own
        // decoder requires an integer.
        handle_frame(&inner, Value::Status("OK".into()), &mut in_flight);
        let first_result = first.await_result(std::time::Duration::from_secs(1)).await;
        assert_eq!(first_result.unwrap_err().kind(), ErrorKind::DecodeError);

        // The in-flight queue still advances normally for the next reply.
        handle_frame(&inner, Value::BulkString(b"v".to_vec()), &mut in_flight);
        let second_result = second.await_result(std::time::Duration::from_secs(1)).await;
        assert_eq!(second_result, Ok(Value::BulkString(b"v".to_vec())));
        assert!(in_flight.is_empty());
    }

    fn test_inner(pubsub_sender: tokio::sync::broadcast::Sender<PubSubMessage>) -> Arc<Inner> {
        use crate::config::EndpointConfig;
        use crate::connection_info::ConnectionInfo;
        use crate::events::EventBus;
        use crate::lifecycle::{LifecycleCell, LifecycleState};
        use crate::pubsub::SubscriptionSet;
        use crate::resources::ClientResources;
        use crate::transport::DefaultTransport;
        use crate::watchdog::WatchdogControl;
        use std::collections::VecDeque as Deque;
        use std::sync::atomic::{AtomicBool, AtomicU64};
        use std::sync::Mutex;
        use tokio::sync::Notify;

        Arc::new(Inner {
            connection_info: ConnectionInfo::parse("redis://127.0.0.1").unwrap(),
            config: EndpointConfig::default(),
            resources: ClientResources::with_handle(tokio::runtime::Handle::current()),
            transport: Arc::new(DefaultTransport::default()),
            state: LifecycleCell::new(LifecycleState::Active),
            buffer: Mutex::new(Deque::new()),
            auto_flush: AtomicBool::new(true),
            flush_notify: Notify::new(),
            subscriptions: SubscriptionSet::default(),
            events: EventBus::default(),
            watchdog: WatchdogControl::default(),
            generation: AtomicU64::new(1),
            pubsub_sender,
        })
    }
}
