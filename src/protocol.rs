//! RESP2 wire codec
//!
//! Commands travel to the server as arrays of bulk strings; replies come back
//! as any of the five RESP2 types. The decoder is incremental: it returns
//! `Ok(None)` when the buffer holds only part of a reply, and the caller reads
//! more bytes and tries again without losing position.

use crate::core::error::{GlideError, GlideResult};
use crate::core::value::Value;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encodes values and commands into RESP2 bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a single value into the buffer
    pub fn encode(value: &Value, buf: &mut BytesMut) {
        match value {
            Value::SimpleString(s) => Self::put_line(buf, b'+', s.as_bytes()),
            Value::Error(e) => Self::put_line(buf, b'-', e.as_bytes()),
            Value::Integer(i) => Self::put_line(buf, b':', i.to_string().as_bytes()),
            Value::BulkString(data) => {
                Self::put_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Value::Null => buf.put_slice(b"$-1\r\n"),
            Value::Array(arr) => {
                Self::put_line(buf, b'*', arr.len().to_string().as_bytes());
                for item in arr {
                    Self::encode(item, buf);
                }
            }
        }
    }

    /// Encode a command name and its arguments as a RESP array
    ///
    /// The command name may contain a space (e.g. "SCRIPT LOAD"); each word
    /// becomes its own bulk string, matching how servers tokenize commands.
    #[must_use]
    pub fn encode_command(command: &str, args: &[Value]) -> Bytes {
        let words: Vec<&str> = command.split(' ').collect();
        let mut buf = BytesMut::new();

        Self::put_line(&mut buf, b'*', (words.len() + args.len()).to_string().as_bytes());
        for word in words {
            Self::put_line(&mut buf, b'$', word.len().to_string().as_bytes());
            buf.put_slice(word.as_bytes());
            buf.put_slice(CRLF);
        }
        for arg in args {
            // Arguments always travel as bulk strings on the wire
            match arg {
                Value::BulkString(data) => {
                    Self::put_line(&mut buf, b'$', data.len().to_string().as_bytes());
                    buf.put_slice(data);
                    buf.put_slice(CRLF);
                }
                Value::Integer(i) => {
                    let s = i.to_string();
                    Self::put_line(&mut buf, b'$', s.len().to_string().as_bytes());
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(CRLF);
                }
                Value::SimpleString(s) => {
                    Self::put_line(&mut buf, b'$', s.len().to_string().as_bytes());
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(CRLF);
                }
                other => Self::encode(other, &mut buf),
            }
        }

        buf.freeze()
    }

    fn put_line(buf: &mut BytesMut, marker: u8, payload: &[u8]) {
        buf.put_u8(marker);
        buf.put_slice(payload);
        buf.put_slice(CRLF);
    }
}

/// Incremental RESP2 decoder
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one value from the buffer
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete value.
    /// The cursor position is only meaningful on `Ok(Some(_))`.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Protocol`] on malformed input.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> GlideResult<Option<Value>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let marker = buf.chunk()[0];
        buf.advance(1);

        match marker {
            b'+' => Ok(Self::read_line(buf)?.map(Value::SimpleString)),
            b'-' => Ok(Self::read_line(buf)?.map(Value::Error)),
            b':' => match Self::read_line(buf)? {
                Some(line) => Ok(Some(Value::Integer(Self::parse_int(&line)?))),
                None => Ok(None),
            },
            b'$' => Self::decode_bulk_string(buf),
            b'*' => Self::decode_array(buf),
            other => Err(GlideError::Protocol(format!(
                "Invalid RESP type byte: {}",
                other as char
            ))),
        }
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>) -> GlideResult<Option<Value>> {
        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_int(&line)?,
            None => return Ok(None),
        };
        if len == -1 {
            return Ok(Some(Value::Null));
        }
        if len < 0 {
            return Err(GlideError::Protocol(format!(
                "Invalid bulk string length: {len}"
            )));
        }

        let len = len as usize;
        if buf.remaining() < len + 2 {
            return Ok(None);
        }
        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len + 2);
        Ok(Some(Value::BulkString(data)))
    }

    fn decode_array(buf: &mut Cursor<&[u8]>) -> GlideResult<Option<Value>> {
        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_int(&line)?,
            None => return Ok(None),
        };
        if len == -1 {
            return Ok(Some(Value::Null));
        }
        if len < 0 {
            return Err(GlideError::Protocol(format!("Invalid array length: {len}")));
        }

        let len = len as usize;
        let mut arr = Vec::with_capacity(len);
        for _ in 0..len {
            match Self::decode(buf)? {
                Some(value) => arr.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(Value::Array(arr)))
    }

    fn read_line(buf: &mut Cursor<&[u8]>) -> GlideResult<Option<String>> {
        let start = buf.position() as usize;
        let slice = buf.get_ref();

        for i in start..slice.len().saturating_sub(1) {
            if slice[i] == b'\r' && slice[i + 1] == b'\n' {
                let line = String::from_utf8(slice[start..i].to_vec())
                    .map_err(|e| GlideError::Protocol(format!("Invalid UTF-8: {e}")))?;
                buf.set_position((i + 2) as u64);
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn parse_int(line: &str) -> GlideResult<i64> {
        line.parse::<i64>()
            .map_err(|e| GlideError::Protocol(format!("Invalid integer '{line}': {e}")))
    }
}

/// Try to decode one complete value from the front of `buf`, consuming it
///
/// Convenience wrapper used by connection read loops: on success the decoded
/// bytes are drained from the buffer.
///
/// # Errors
///
/// Returns [`GlideError::Protocol`] on malformed input.
pub fn decode_buffered(buf: &mut BytesMut) -> GlideResult<Option<Value>> {
    let mut cursor = Cursor::new(&buf[..]);
    match RespDecoder::decode(&mut cursor)? {
        Some(value) => {
            let consumed = cursor.position() as usize;
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}
