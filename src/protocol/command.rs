//! Outbound commands.
//!
//! Every command is a single ASCII line:
//!
//! ```text
//! :w13=1000000,0.\r\n    write, opcode 13, arguments 1000000 and 0
//! :r13=0.\r\n            read, opcode 13
//! ```

use crate::error::ValidationError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Line terminator appended to every command.
pub const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// Read or write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// `w`: change a setting; the device answers `:ok`.
    Write,
    /// `r`: query a setting; the device answers `:rNN=...`.
    Read,
}

impl Access {
    /// Wire letter.
    pub fn letter(self) -> char {
        match self {
            Access::Write => 'w',
            Access::Read => 'r',
        }
    }
}

/// Two digit command number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u8);

impl Opcode {
    /// Output enable for both channels.
    pub const OUTPUTS: Opcode = Opcode(10);

    /// Wrap a raw opcode, rejecting anything that is not two digits.
    pub fn new(code: u8) -> Option<Self> {
        (code <= 99).then_some(Opcode(code))
    }

    /// Opcode from the fixed command table; `code` must be below 100.
    pub(crate) const fn known(code: u8) -> Self {
        Opcode(code)
    }

    /// Raw opcode number.
    pub fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// One outbound instruction. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    access: Access,
    opcode: Opcode,
    args: Vec<u64>,
}

impl Command {
    /// Write command with arguments.
    pub fn write(opcode: Opcode, args: Vec<u64>) -> Self {
        Self {
            access: Access::Write,
            opcode,
            args,
        }
    }

    /// Read command; reads carry the single placeholder argument `0`.
    pub fn read(opcode: Opcode) -> Self {
        Self {
            access: Access::Read,
            opcode,
            args: vec![0],
        }
    }

    /// Read or write.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Command number.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Decimal arguments.
    pub fn args(&self) -> &[u64] {
        &self.args
    }

    /// Wire bytes including the CRLF terminator.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_slice(self.to_string().as_bytes());
        buf.put_slice(COMMAND_TERMINATOR);
        buf.freeze()
    }

    /// Parse a manually typed command line such as `:w11=3.` or `:r13=0.`.
    ///
    /// Surrounding whitespace and a trailing CRLF are ignored.
    pub fn parse(line: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidCommand(line.to_string());
        let text = line.trim();

        let body = text.strip_prefix(':').ok_or_else(invalid)?;
        let body = body.strip_suffix('.').ok_or_else(invalid)?;

        let mut chars = body.chars();
        let access = match chars.next() {
            Some('w') | Some('W') => Access::Write,
            Some('r') | Some('R') => Access::Read,
            _ => return Err(invalid()),
        };

        let (code, payload) = chars.as_str().split_once('=').ok_or_else(invalid)?;
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let opcode = code
            .parse::<u8>()
            .ok()
            .and_then(Opcode::new)
            .ok_or_else(invalid)?;

        let args = payload
            .split(',')
            .map(|a| a.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        Ok(Self {
            access,
            opcode,
            args,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}{}=", self.access.letter(), self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(".")
    }
}
