//! Session Restorer (C6): runs between `CONNECTED` and `ACTIVE`, replaying
//! PING, AUTH, SELECT and subscription state on every fresh channel before
//! the endpoint is released to user traffic. Grounded on the sequential,
//! short-circuiting `setup_connection` helper `redis-rs` runs over a new
//! multiplexed connection.

use crate::cmd::cmd;
use crate::endpoint::Inner;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::events::EndpointEvent;
use crate::value::Value;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;

/// Runs the restoration sequence over a freshly connected, not-yet-active
/// channel. Bypasses the command buffer and in-flight queue entirely: each
/// step is sent and awaited in isolation before the next begins.
pub(crate) async fn restore<Tx, Rx>(inner: &Arc<Inner>, sink: &mut Tx, stream: &mut Rx) -> RedisResult<()>
where
    Tx: Sink<Vec<u8>, Error = RedisError> + Unpin,
    Rx: Stream<Item = Result<Value, RedisError>> + Unpin,
{
    if inner.config.ping_before_activate_connection {
        send_one(sink, stream, cmd("PING")).await?.extract_error().map_err(|e| {
            RedisError::from((
                ErrorKind::ResponseError,
                "PING failed during session restoration",
                e.to_string(),
            ))
        })?;
    }

    if let Some(password) = inner.connection_info.password.clone() {
        let mut auth = cmd("AUTH");
        if let Some(username) = &inner.connection_info.username {
            auth.arg(username.clone());
        }
        auth.arg(password);
        let reply = send_one(sink, stream, auth).await?;
        if let Value::ServerError(raw) = reply {
            return Err(RedisError::from((
                ErrorKind::AuthenticationFailed,
                "AUTH was rejected during session restoration",
                raw,
            )));
        }
    }

    if inner.connection_info.db != 0 {
        let mut select = cmd("SELECT");
        select.arg(inner.connection_info.db.to_string());
        send_one(sink, stream, select).await?.extract_error()?;
    }

    let channels = inner.subscriptions.channels();
    let patterns = inner.subscriptions.patterns();
    if !channels.is_empty() || !patterns.is_empty() {
        for channel in &channels {
            let mut subscribe = cmd("SUBSCRIBE");
            subscribe.arg(channel.clone());
            send_one(sink, stream, subscribe).await?.extract_error()?;
        }
        for pattern in &patterns {
            let mut psubscribe = cmd("PSUBSCRIBE");
            psubscribe.arg(pattern.clone());
            send_one(sink, stream, psubscribe).await?.extract_error()?;
        }
        inner.events.publish(EndpointEvent::SubscriptionsRestored {
            channels: channels.len(),
            patterns: patterns.len(),
        });
    }

    Ok(())
}

async fn send_one<Tx, Rx>(sink: &mut Tx, stream: &mut Rx, command: crate::cmd::Cmd) -> RedisResult<Value>
where
    Tx: Sink<Vec<u8>, Error = RedisError> + Unpin,
    Rx: Stream<Item = Result<Value, RedisError>> + Unpin,
{
    sink.send(command.get_packed_command()?).await?;
    sink.flush().await?;
    match stream.next().await {
        Some(result) => result,
        None => Err(RedisError::from((
            ErrorKind::FatalReceiveError,
            "Channel closed during session restoration",
        ))),
    }
}
