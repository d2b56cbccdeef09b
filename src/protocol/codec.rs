//! Response framing.
//!
//! The generator answers every command with one `\n`-terminated line:
//!
//! ```text
//! :ok\r\n                  acknowledgement of a write
//! :r13=1000000,0.\r\n      value of a read
//! ```
//!
//! Serial reads may split or merge lines arbitrarily, so [`FrameDecoder`]
//! buffers bytes and yields complete frames. A malformed line is reported as a
//! [`FrameError`] and consumed; decoding resumes with the next line.

use crate::error::FrameError;
use crate::protocol::command::{Opcode, COMMAND_TERMINATOR};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Default longest accepted line, terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64;

/// One decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `:ok`, the device accepted a write.
    Ack,
    /// `:rNN=a,b.`, the value of a read.
    Value {
        /// Opcode the value belongs to.
        opcode: Opcode,
        /// Decimal arguments.
        args: Vec<u64>,
    },
}

impl Response {
    /// Opcode of a value frame.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Response::Ack => None,
            Response::Value { opcode, .. } => Some(*opcode),
        }
    }

    /// Arguments of a value frame; empty for an acknowledgement.
    pub fn args(&self) -> &[u64] {
        match self {
            Response::Ack => &[],
            Response::Value { args, .. } => args,
        }
    }

    /// Wire bytes, as the device would send them.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_slice(self.to_string().as_bytes());
        buf.put_slice(COMMAND_TERMINATOR);
        buf.freeze()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => f.write_str(":ok"),
            Response::Value { opcode, args } => {
                write!(f, ":r{opcode}=")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(".")
            }
        }
    }
}

/// Decode a single line (without its `\n`).
pub fn decode_frame(line: &[u8]) -> Result<Response, FrameError> {
    let text = std::str::from_utf8(line).map_err(|_| FrameError::InvalidEncoding)?;
    let text = text.trim();

    let body = text
        .strip_prefix(':')
        .ok_or_else(|| FrameError::MissingPrefix(text.to_string()))?;

    let ack = body.strip_suffix('.').unwrap_or(body);
    if ack.eq_ignore_ascii_case("ok") {
        return Ok(Response::Ack);
    }

    let rest = body
        .strip_prefix('r')
        .ok_or_else(|| FrameError::Unrecognised(text.to_string()))?;

    let (code, payload) = rest
        .split_once('=')
        .ok_or_else(|| FrameError::InvalidOpcode(text.to_string()))?;

    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidOpcode(text.to_string()));
    }
    let opcode = code
        .parse::<u8>()
        .ok()
        .and_then(Opcode::new)
        .ok_or_else(|| FrameError::InvalidOpcode(text.to_string()))?;

    let payload = payload
        .strip_suffix('.')
        .ok_or_else(|| FrameError::MissingTerminator(text.to_string()))?;

    let args = payload
        .split(',')
        .map(|arg| {
            arg.trim()
                .parse::<u64>()
                .map_err(|_| FrameError::InvalidArgument {
                    frame: text.to_string(),
                    arg: arg.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Response::Value { opcode, args })
}

/// Incremental line decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    /// Inside an over-long line that was already reported.
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// Decoder rejecting lines longer than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_frame_len + 2),
            max_frame_len,
            discarding: false,
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Next complete frame, or `None` until more bytes arrive.
    ///
    /// Blank lines are skipped. An `Err` consumes the bad line.
    pub fn next_frame(&mut self) -> Option<Result<Response, FrameError>> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let line = self.buf.split_to(pos + 1);
                    if std::mem::take(&mut self.discarding) {
                        // Tail of a line already reported as too long
                        continue;
                    }

                    let mut line = &line[..pos];
                    if let Some(stripped) = line.strip_suffix(b"\r") {
                        line = stripped;
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if line.len() > self.max_frame_len {
                        return Some(Err(FrameError::TooLong {
                            max: self.max_frame_len,
                        }));
                    }
                    return Some(decode_frame(line));
                }
                None => {
                    // +1 leaves room for a trailing '\r'
                    if self.buf.len() > self.max_frame_len + 1 {
                        let len = self.buf.len();
                        self.buf.advance(len);
                        if !self.discarding {
                            self.discarding = true;
                            return Some(Err(FrameError::TooLong {
                                max: self.max_frame_len,
                            }));
                        }
                    }
                    return None;
                }
            }
        }
    }
}
