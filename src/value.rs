//! The decoded shape of a RESP reply.

use crate::error::{ErrorKind, RedisError, RedisResult};

/// A single decoded RESP reply.
///
/// Covers the RESP2 reply kinds: simple string,
/// integer, bulk string (with explicit null), array (with explicit null,
/// recursive), plus `Okay`/`Nil` as the common-case convenience variants the
/// rest of the crate matches on.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    /// A simple string reply (`+...`), other than the literal `OK`.
    Status(String),
    /// The simple string reply `+OK`.
    Okay,
    /// An integer reply (`:...`).
    Int(i64),
    /// A bulk string reply (`$...`). Binary safe.
    BulkString(Vec<u8>),
    /// An array reply (`*...`), recursively containing further values.
    Array(Vec<Value>),
    /// A null bulk string or null array (`$-1\r\n` / `*-1\r\n`).
    Nil,
    /// A decoded `-ERR ...` reply, carried as data rather than raised
    /// immediately: the handler decides per-command what
    /// to do with it (complete the head command's future with an error,
    /// without disturbing the channel).
    ServerError(String),
}

impl Value {
    /// Turn a decoded `-ERR ...` reply into an `Err`; passes everything
    /// else through unchanged. Called once a command's output reports
    /// itself complete.
    pub fn extract_error(self) -> RedisResult<Value> {
        match self {
            Value::ServerError(raw) => Err(RedisError::server_error(raw)),
            other => Ok(other),
        }
    }

    /// True if the outermost value is [`Value::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// Minimal output-conversion trait, mirroring the `FromRedisValue` pattern
/// at the edge between the core and a command's caller.
/// The core itself never needs more than `Value`/`()`/`String`; anything
/// richer belongs to the out-of-scope facade layer.
pub trait FromValue: Sized {
    /// Convert a fully decoded [`Value`] into `Self`.
    fn from_value(value: Value) -> RedisResult<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> RedisResult<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(_value: Value) -> RedisResult<Self> {
        Ok(())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> RedisResult<Self> {
        match value {
            Value::Status(s) => Ok(s),
            Value::Okay => Ok("OK".to_owned()),
            Value::BulkString(bytes) => String::from_utf8(bytes).map_err(|_| {
                RedisError::from((ErrorKind::DecodeError, "Response was not valid UTF-8"))
            }),
            _ => Err(RedisError::from((
                ErrorKind::DecodeError,
                "Response type not convertible to String",
            ))),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> RedisResult<Self> {
        match value {
            Value::Int(i) => Ok(i),
            Value::BulkString(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    RedisError::from((ErrorKind::DecodeError, "Response was not an integer"))
                }),
            _ => Err(RedisError::from((
                ErrorKind::DecodeError,
                "Response type not convertible to i64",
            ))),
        }
    }
}
