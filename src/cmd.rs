//! Command descriptor: argument vector and packed RESP bytes.

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::parser::encode_command;
use crate::value::Value;
use std::sync::Arc;

/// The pluggable key/value codec between a command's raw argument bytes and
/// the wire: every argument passes through one at encode time. The default
/// is UTF-8 - matching the wire's textual conventions - and rejects
/// arguments that are not valid UTF-8 rather than silently passing binary
/// data through.
pub trait ArgEncoder: Send + Sync {
    /// Translates one argument's raw bytes into its wire representation,
    /// or fails if the argument isn't acceptable to this codec.
    fn encode(&self, arg: &[u8]) -> RedisResult<Vec<u8>>;
}

/// The default codec: bytes pass through unchanged once validated as UTF-8.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8ArgEncoder;

impl ArgEncoder for Utf8ArgEncoder {
    fn encode(&self, arg: &[u8]) -> RedisResult<Vec<u8>> {
        std::str::from_utf8(arg).map_err(|_| {
            RedisError::from((ErrorKind::EncodeError, "argument is not valid UTF-8"))
        })?;
        Ok(arg.to_vec())
    }
}

/// Per-command output decoder: the other half of the immutable
/// `(type, argument bytes, output decoder)` triple a command is. Once a
/// full [`Value`] has been decoded off the wire, this converts it into the
/// result this command's future actually completes with. The default
/// passes a successfully-decoded value through unchanged; a command
/// expecting a specific reply shape can install a stricter decoder so a
/// wire-valid-but-unexpected reply fails that command alone, without
/// disturbing the stream or any other in-flight command.
pub trait OutputDecoder: Send + Sync {
    /// Converts an already error-checked `Value` into this command's
    /// final result, or fails with [`ErrorKind::DecodeError`] if the
    /// decoded value isn't the shape this command expects.
    fn decode(&self, value: Value) -> RedisResult<Value>;
}

/// The default output decoder: every successfully decoded value is
/// accepted as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawOutputDecoder;

impl OutputDecoder for RawOutputDecoder {
    fn decode(&self, value: Value) -> RedisResult<Value> {
        Ok(value)
    }
}

/// How the handler should treat a command's reply, used to resolve the
/// pub/sub ambiguity: `SUBSCRIBE`/`UNSUBSCRIBE` and friends consume a reply
/// like any other command, while `message`/`pmessage` pushes arrive out of
/// band.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommandKind {
    /// An ordinary command: its reply is the next frame off the wire.
    Regular,
    /// `SUBSCRIBE` / `PSUBSCRIBE` / `UNSUBSCRIBE` / `PUNSUBSCRIBE`: the
    /// reply is a `subscribe`/`psubscribe`/`unsubscribe`/`punsubscribe`
    /// array, which both completes this command *and* is reported to the
    /// subscription dispatcher.
    SubscriptionChange,
}

/// An encoded Redis command: the argument vector, its packed wire bytes,
/// and whether it is a subscription-changing command.
#[derive(Clone)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
    kind: CommandKind,
    encoder: Arc<dyn ArgEncoder>,
    output: Arc<dyn OutputDecoder>,
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd").field("args", &self.args).field("kind", &self.kind).finish()
    }
}

impl Cmd {
    /// Starts building a new command with the given command name as its
    /// first argument, using the default UTF-8 argument codec.
    pub fn new(name: &str) -> Cmd {
        let kind = match name {
            "SUBSCRIBE" | "PSUBSCRIBE" | "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                CommandKind::SubscriptionChange
            }
            _ => CommandKind::Regular,
        };
        Cmd {
            args: vec![name.as_bytes().to_vec()],
            kind,
            encoder: Arc::new(Utf8ArgEncoder),
            output: Arc::new(RawOutputDecoder),
        }
    }

    /// Appends a single argument.
    pub fn arg(&mut self, arg: impl Into<Vec<u8>>) -> &mut Cmd {
        self.args.push(arg.into());
        self
    }

    /// Overrides the argument codec used at encode time, e.g. to accept
    /// binary-safe values that the default UTF-8 codec would reject.
    pub fn with_encoder(&mut self, encoder: Arc<dyn ArgEncoder>) -> &mut Cmd {
        self.encoder = encoder;
        self
    }

    /// Overrides the output decoder applied to this command's reply.
    pub fn with_output_decoder(&mut self, output: Arc<dyn OutputDecoder>) -> &mut Cmd {
        self.output = output;
        self
    }

    /// Runs this command's output decoder over an already error-checked
    /// decoded value.
    pub fn decode_output(&self, value: Value) -> RedisResult<Value> {
        self.output.decode(value)
    }

    /// The command's classification.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The command name (first argument), for logging and dispatch.
    pub fn name(&self) -> &str {
        std::str::from_utf8(&self.args[0]).unwrap_or("?")
    }

    /// All arguments after the command name, as submitted (e.g. the
    /// channel names for `SUBSCRIBE`).
    pub fn tail_args(&self) -> impl Iterator<Item = &[u8]> {
        self.args[1..].iter().map(|a| a.as_slice())
    }

    /// Encodes the command as a RESP multi-bulk request. Fails without
    /// writing anything if any argument is rejected by this command's
    /// codec; the caller has not yet touched the wire when this returns an
    /// error, so nothing downstream has been desynced.
    pub fn get_packed_command(&self) -> RedisResult<Vec<u8>> {
        let mut encoded_args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            encoded_args.push(self.encoder.encode(arg)?);
        }
        let mut out = Vec::new();
        encode_command(&encoded_args, &mut out);
        Ok(out)
    }
}

/// Shorthand constructor, mirroring free `cmd(name)` function.
pub fn cmd(name: &str) -> Cmd {
    Cmd::new(name)
}
