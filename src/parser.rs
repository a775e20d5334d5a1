//! RESP2 streaming codec.
//!
//! `redis-rs`'s own `ValueCodec` builds on the `combine` parser-combinator
//! crate. Here the same resumable, `tokio_util::codec::Decoder` contract is
//! implemented directly against `bytes::BytesMut`: a single recursive-descent
//! pass that returns `Ok(None)` whenever it runs out of bytes mid-frame,
//! exactly like the `LinesCodec` pattern in `tokio-util` itself. See
//! `DESIGN.md` for why `combine` was dropped.

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::value::Value;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Decodes a RESP2 reply stream, one frame at a time, resuming across
/// partial reads.
#[derive(Debug, Default)]
pub struct ValueCodec {
    _private: (),
}

impl ValueCodec {
    /// Number of bytes of the trailing CRLF.
    const CRLF_LEN: usize = 2;
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Attempts to parse one value out of `buf` without consuming it.
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame.
fn try_parse(buf: &[u8], depth: usize) -> RedisResult<Option<(Value, usize)>> {
    const MAX_RECURSE_DEPTH: usize = 128;
    if depth > MAX_RECURSE_DEPTH {
        return Err(RedisError::from((
            ErrorKind::ResponseError,
            "Nested array reply exceeds maximum depth",
        )));
    }

    let Some(&prefix) = buf.first() else {
        return Ok(None);
    };

    match prefix {
        b'+' | b'-' | b':' => {
            let Some(line_end) = find_crlf(&buf[1..]) else {
                return Ok(None);
            };
            let line_end = line_end + 1;
            let line = &buf[1..line_end];
            let consumed = line_end + ValueCodec::CRLF_LEN;
            let value = match prefix {
                b'+' => {
                    let s = str_from_utf8(line)?;
                    if s == "OK" {
                        Value::Okay
                    } else {
                        Value::Status(s.to_owned())
                    }
                }
                b'-' => Value::ServerError(str_from_utf8(line)?.to_owned()),
                b':' => Value::Int(parse_i64(line)?),
                _ => unreachable!(),
            };
            Ok(Some((value, consumed)))
        }
        b'$' => {
            let Some(line_end) = find_crlf(&buf[1..]) else {
                return Ok(None);
            };
            let line_end = line_end + 1;
            let len = parse_i64(&buf[1..line_end])?;
            let header_len = line_end + ValueCodec::CRLF_LEN;
            if len < 0 {
                return Ok(Some((Value::Nil, header_len)));
            }
            let len = len as usize;
            let total = header_len + len + ValueCodec::CRLF_LEN;
            if buf.len() < total {
                return Ok(None);
            }
            let data = buf[header_len..header_len + len].to_vec();
            Ok(Some((Value::BulkString(data), total)))
        }
        b'*' => {
            let Some(line_end) = find_crlf(&buf[1..]) else {
                return Ok(None);
            };
            let line_end = line_end + 1;
            let count = parse_i64(&buf[1..line_end])?;
            let header_len = line_end + ValueCodec::CRLF_LEN;
            if count < 0 {
                return Ok(Some((Value::Nil, header_len)));
            }
            let count = count as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            let mut offset = header_len;
            for _ in 0..count {
                match try_parse(&buf[offset..], depth + 1)? {
                    Some((value, consumed)) => {
                        items.push(value);
                        offset += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), offset)))
        }
        other => Err(RedisError::from((
            ErrorKind::ResponseError,
            "Invalid RESP type prefix",
            format!("byte {other:#x}"),
        ))),
    }
}

fn str_from_utf8(bytes: &[u8]) -> RedisResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| RedisError::from((ErrorKind::ResponseError, "Reply was not valid UTF-8")))
}

fn parse_i64(bytes: &[u8]) -> RedisResult<i64> {
    str_from_utf8(bytes)?
        .parse()
        .map_err(|_| RedisError::from((ErrorKind::ResponseError, "Reply length/integer was not a valid number")))
}

impl Decoder for ValueCodec {
    type Item = Value;
    type Error = RedisError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, RedisError> {
        match try_parse(src, 0)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Writes one already-collected argument vector as a RESP multi-bulk
/// request. Inline requests are never emitted.
pub fn encode_command(args: &[Vec<u8>], out: &mut Vec<u8>) {
    out.push(b'*');
    itoa_write(out, args.len() as i64);
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        itoa_write(out, arg.len() as i64);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

fn itoa_write(out: &mut Vec<u8>, value: i64) {
    let mut buf = itoa::Buffer::new();
    out.extend_from_slice(buf.format(value).as_bytes());
}

/// `Encoder` adapter so the codec can drive a `Framed<C, ValueCodec>` used
/// as both a `Stream<Item = Value>` and a `Sink<Vec<u8>>` of pre-packed
/// command bytes, mirroring `ValueCodec::default().framed(stream)`.
impl Encoder<Vec<u8>> for ValueCodec {
    type Error = RedisError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), RedisError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
