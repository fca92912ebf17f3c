// Command decoding module
//
// Parses RESP2 commands (arrays of bulk strings) incrementally from a byte
// buffer. A decode pass either yields a complete command, asks for more
// bytes, or reports a protocol error after skipping the offending line so
// the session can continue.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::super::constants::{MAX_BULK_LEN, MAX_COMMAND_ARGS};
use super::super::error::{GatewayError, Result};

/// One decoded client command.
///
/// `is_last` records whether another complete command was already buffered
/// when this one was decoded; the dispatcher only flushes its reply writer
/// on the last command of a pipelined batch.
#[derive(Debug)]
pub struct Command {
    args: Vec<Bytes>,
    last: bool,
}

impl Command {
    /// Argument at `idx`, or an empty slice when out of range. Mirrors the
    /// tolerant accessor the dispatcher relies on: a missing argument parses
    /// like an empty one and fails in the relevant parser.
    pub fn arg(&self, idx: usize) -> &[u8] {
        self.args.get(idx).map_or(&[], |b| &b[..])
    }

    /// Argument at `idx` as a lossy UTF-8 string.
    pub fn arg_str(&self, idx: usize) -> String {
        String::from_utf8_lossy(self.arg(idx)).into_owned()
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Command name: the first argument, uppercased.
    pub fn name(&self) -> String {
        self.arg_str(0).to_ascii_uppercase()
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    #[cfg(test)]
    pub fn from_args(args: Vec<&[u8]>, last: bool) -> Self {
        Self {
            args: args.into_iter().map(Bytes::copy_from_slice).collect(),
            last,
        }
    }
}

enum Parsed {
    /// A full command occupying `consumed` bytes of the buffer.
    Complete { consumed: usize, args: Vec<Bytes> },
    /// More bytes are needed.
    Incomplete,
}

/// Find the CRLF-terminated line starting at `pos`.
///
/// Returns the line contents (without the terminator) and the position just
/// past it, or `None` when the terminator has not arrived yet.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = &buf[pos..];
    let nl = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..nl], pos + nl + 2))
}

fn parse_int(line: &[u8]) -> Option<usize> {
    if line.is_empty() {
        return None;
    }
    let s = std::str::from_utf8(line).ok()?;
    s.parse::<usize>().ok()
}

fn try_parse(buf: &[u8]) -> Result<Parsed> {
    let Some((header, mut pos)) = read_line(buf, 0) else {
        return Ok(Parsed::Incomplete);
    };

    if header.first() != Some(&b'*') {
        return Err(GatewayError::protocol(format!(
            "expected array, got {:?}",
            header.first().map(|b| *b as char)
        )));
    }

    let count = parse_int(&header[1..])
        .ok_or_else(|| GatewayError::protocol("invalid array length"))?;
    if count == 0 {
        return Err(GatewayError::protocol("empty command"));
    }
    if count > MAX_COMMAND_ARGS {
        return Err(GatewayError::protocol(format!(
            "too many arguments: {count}"
        )));
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some((header, body_pos)) = read_line(buf, pos) else {
            return Ok(Parsed::Incomplete);
        };
        if header.first() != Some(&b'$') {
            return Err(GatewayError::protocol("expected bulk string"));
        }
        let len = parse_int(&header[1..])
            .ok_or_else(|| GatewayError::protocol("invalid bulk length"))?;
        if len > MAX_BULK_LEN {
            return Err(GatewayError::protocol(format!(
                "bulk string too large: {len}"
            )));
        }

        if buf.len() < body_pos + len + 2 {
            return Ok(Parsed::Incomplete);
        }
        if &buf[body_pos + len..body_pos + len + 2] != b"\r\n" {
            return Err(GatewayError::protocol("bulk string missing terminator"));
        }

        args.push(Bytes::copy_from_slice(&buf[body_pos..body_pos + len]));
        pos = body_pos + len + 2;
    }

    Ok(Parsed::Complete {
        consumed: pos,
        args,
    })
}

/// Drop buffered bytes through the next CRLF so the parser can re-align
/// after a protocol error. Without a terminator in sight the whole buffer
/// is garbage and is discarded.
fn resync(buf: &mut BytesMut) {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => buf.advance(pos + 2),
        None => buf.clear(),
    }
}

/// Decode one command from the buffer.
///
/// Returns `Ok(None)` when the buffer holds only a prefix of a command. On a
/// protocol error the buffer is resynced past the offending line before the
/// error is returned.
pub fn decode_command(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>> {
    match try_parse(buf) {
        Ok(Parsed::Complete { consumed, args }) => {
            buf.advance(consumed);
            Ok(Some(args))
        }
        Ok(Parsed::Incomplete) => Ok(None),
        Err(e) => {
            resync(buf);
            Err(e)
        }
    }
}

fn has_complete_command(buf: &BytesMut) -> bool {
    matches!(try_parse(buf), Ok(Parsed::Complete { .. }))
}

/// Reads commands from a socket, one at a time, buffering internally.
pub struct CommandReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Read the next command.
    ///
    /// Returns `Ok(None)` on a clean end of stream. An end of stream in the
    /// middle of a command, and any framing violation, is an error; framing
    /// errors leave the buffer resynced so the caller may keep reading.
    pub async fn read_command(&mut self) -> Result<Option<Command>> {
        loop {
            if !self.buf.is_empty() {
                if let Some(args) = decode_command(&mut self.buf)? {
                    let last = !has_complete_command(&self.buf);
                    return Ok(Some(Command { args, last }));
                }
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    // Discard the partial command so a retried read observes
                    // a clean end of stream instead of erroring forever.
                    self.buf.clear();
                    Err(GatewayError::protocol("connection closed mid-command"))
                };
            }
        }
    }
}
