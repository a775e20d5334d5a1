//! Error taxonomy for the core.

use std::fmt;
use std::io;

/// Broad classification of a [`RedisError`]: fail-fast/validation, encode,
/// server, decode, disconnect, reconnect-failed, fatal and plain I/O errors
/// all get their own kind so callers can branch on `.kind()` instead of
/// parsing messages.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A response was received that could not be parsed as valid RESP.
    ResponseError,
    /// The server returned a `-ERR ...` (or other `-`-prefixed) reply.
    ServerError,
    /// A command's argument encoder failed before anything was written.
    EncodeError,
    /// A command's output decoder failed on an otherwise valid reply.
    DecodeError,
    /// The endpoint rejected a submission synchronously (closed, or the
    /// buffer is at `requestQueueSize`).
    QueueOverflow,
    /// The endpoint has been closed via `close()`.
    ClientClosed,
    /// The endpoint rejected a submission because it is `DISCONNECTED` and
    /// `disconnectedBehavior` is `REJECT_COMMANDS`.
    Disconnected,
    /// The channel was lost and the command's fate was cancellation
    /// (at-most-once mode, or `close()` racing an in-flight command).
    Cancelled,
    /// All reconnect attempts were exhausted or reconnection was suspended.
    ReconnectFailed,
    /// AUTH was rejected during session restoration. Fatal: the endpoint
    /// transitions to `CLOSED`.
    AuthenticationFailed,
    /// A lower-level I/O error (connect failure, broken pipe, ...).
    IoError,
    /// A response arrived that required RESP3 but the endpoint is on RESP2,
    /// or some other client-side configuration mismatch.
    InvalidClientConfig,
    /// The connection URI could not be parsed.
    InvalidClientUri,
    /// A send onto the transport failed in a way that guarantees the server
    /// never saw the bytes (so retrying is safe).
    FatalSendError,
    /// A receive failed in a way that leaves it ambiguous whether the
    /// server processed the command (so retrying is unsafe).
    FatalReceiveError,
    /// `await(deadline)` elapsed before the command completed.
    Timeout,
}

#[derive(Clone, PartialEq)]
enum Repr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    ServerError(ErrorKind, String, String),
    // Io errors are flattened to (kind, message) rather than kept as
    // `io::Error` so that `RedisError` can be `Clone` - every completed
    // `Command` needs to hand an owned copy of its result to every
    // registered listener.
    Io(io::ErrorKind, String),
}

/// The error type produced by every fallible operation in this crate.
#[derive(Clone, PartialEq)]
pub struct RedisError {
    repr: Repr,
}

impl RedisError {
    /// The broad category this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            Repr::WithDescription(kind, _) => *kind,
            Repr::WithDescriptionAndDetail(kind, _, _) => *kind,
            Repr::ServerError(kind, _, _) => *kind,
            Repr::Io(_, _) => ErrorKind::IoError,
        }
    }

    /// Extra detail supplied alongside the description, if any. For a
    /// server error this is the raw message the server sent after the
    /// error code (e.g. `WRONGTYPE Operation against a key...`).
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            Repr::WithDescriptionAndDetail(_, _, detail) => Some(detail),
            Repr::ServerError(_, _, raw) => Some(raw),
            _ => None,
        }
    }

    /// The server's error code (`ERR`, `WRONGTYPE`, `NOAUTH`, ...) when this
    /// is a [`ErrorKind::ServerError`].
    pub fn code(&self) -> Option<&str> {
        match &self.repr {
            Repr::ServerError(_, code, _) => Some(code),
            _ => None,
        }
    }

    /// True if this error means the channel is gone and any in-flight
    /// command on it should be treated as lost (disconnect/cancelled,
    /// fatal send/receive, or the underlying I/O error).
    pub fn is_connection_dropped(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Cancelled
                | ErrorKind::FatalSendError
                | ErrorKind::FatalReceiveError
                | ErrorKind::IoError
        )
    }

    /// True for the `AUTH` rejection case, which is fatal rather than
    /// merely a lost channel.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::AuthenticationFailed
    }

    pub(crate) fn server_error(raw: impl Into<String>) -> RedisError {
        let raw = raw.into();
        let mut parts = raw.splitn(2, ' ');
        let first = parts.next().unwrap_or("");
        // A code is only recognized if it looks like a SCREAMING_CASE token;
        // otherwise the whole line is the message (plain `-ERR` with no code
        // happens for some legacy replies).
        let looks_like_code = !first.is_empty()
            && first
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit());
        let (code, detail) = if looks_like_code {
            (first.to_owned(), parts.next().unwrap_or("").to_owned())
        } else {
            (String::new(), raw.clone())
        };
        RedisError {
            repr: Repr::ServerError(ErrorKind::ServerError, code, detail),
        }
    }
}

impl From<(ErrorKind, &'static str)> for RedisError {
    fn from(value: (ErrorKind, &'static str)) -> Self {
        RedisError {
            repr: Repr::WithDescription(value.0, value.1),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for RedisError {
    fn from(value: (ErrorKind, &'static str, String)) -> Self {
        RedisError {
            repr: Repr::WithDescriptionAndDetail(value.0, value.1, value.2),
        }
    }
}

impl From<io::Error> for RedisError {
    fn from(value: io::Error) -> Self {
        RedisError {
            repr: Repr::Io(value.kind(), value.to_string()),
        }
    }
}

impl From<url::ParseError> for RedisError {
    fn from(value: url::ParseError) -> Self {
        RedisError::from((ErrorKind::InvalidClientUri, "Invalid URL", value.to_string()))
    }
}

impl fmt::Debug for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            Repr::WithDescriptionAndDetail(kind, desc, detail) => {
                write!(f, "{kind:?}: {desc} - {detail}")
            }
            Repr::ServerError(_, code, detail) => {
                if code.is_empty() {
                    write!(f, "{detail}")
                } else {
                    write!(f, "{code} {detail}")
                }
            }
            Repr::Io(kind, message) => write!(f, "{kind:?}: {message}"),
        }
    }
}

impl std::error::Error for RedisError {}

/// Convenience alias used throughout the crate.
pub type RedisResult<T> = Result<T, RedisError>;
