//! Error types for the PSG9080 driver.
//!
//! `DriverError` is the crate-wide error. It is built with `thiserror` and
//! wraps the two narrower error families that callers may want to match on
//! directly:
//!
//! - [`FrameError`]: a response line could not be decoded. Scoped to the
//!   exchange that received it; the connection stays usable.
//! - [`ValidationError`]: a requested setting is outside what the generator
//!   accepts. Raised before any byte is written.
//!
//! ## Error Categories
//!
//! 1. **Connection-fatal** - `Connection`, `Io`, `Disconnected`
//!    - The serial link is unusable until `reconnect`.
//!    - Every caller queued behind the failure sees `Disconnected`.
//! 2. **Exchange-scoped** - `Frame`, `Timeout`, `UnexpectedResponse`
//!    - Only the caller that issued the command sees the error.
//! 3. **Local** - `Validation`, `Config`, `Configuration`
//!    - No I/O took place.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A response frame that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The line did not start with the `:` frame marker.
    #[error("frame does not start with ':': {0:?}")]
    MissingPrefix(String),

    /// The line started with `:` but is neither an acknowledgement nor a data frame.
    #[error("unrecognised frame: {0:?}")]
    Unrecognised(String),

    /// The opcode is not a two digit decimal number.
    #[error("invalid opcode in frame {0:?}")]
    InvalidOpcode(String),

    /// An argument is not an unsigned decimal integer.
    #[error("invalid argument {arg:?} in frame {frame:?}")]
    InvalidArgument {
        /// Full frame text.
        frame: String,
        /// Offending argument text.
        arg: String,
    },

    /// A data frame is missing its `.` terminator.
    #[error("frame missing '.' terminator: {0:?}")]
    MissingTerminator(String),

    /// The line grew past the configured maximum before a `\n` arrived.
    #[error("frame exceeds {max} bytes")]
    TooLong {
        /// Configured maximum frame length.
        max: usize,
    },

    /// The line contains bytes that are not valid UTF-8.
    #[error("frame is not valid text")]
    InvalidEncoding,

    /// The frame is well formed but its arguments do not fit the opcode.
    #[error("invalid payload for opcode {opcode:02}: {detail}")]
    InvalidPayload {
        /// Opcode of the frame.
        opcode: u8,
        /// What was wrong with the arguments.
        detail: String,
    },
}

/// A requested setting the generator cannot accept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Numeric value outside the device range.
    #[error("{parameter} {value} {unit} out of range [{min}, {max}] {unit}")]
    OutOfRange {
        /// Parameter name.
        parameter: &'static str,
        /// Requested value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
        /// Unit of `value`, `min` and `max`.
        unit: &'static str,
    },

    /// NaN or infinite value.
    #[error("{parameter} must be a finite number")]
    NotFinite {
        /// Parameter name.
        parameter: &'static str,
    },

    /// Channel number other than 1 or 2.
    #[error("invalid channel {0}; the PSG9080 has channels 1 and 2")]
    InvalidChannel(u8),

    /// Waveform index outside the waveform table.
    #[error("invalid waveform {0:?}")]
    InvalidWaveform(String),

    /// Frequency unit outside the unit table.
    #[error("invalid frequency unit {0:?}")]
    InvalidFrequencyUnit(String),

    /// A manual command line that is not a well formed command.
    #[error("invalid command line {0:?}; expected e.g. ':w13=1000000,0.'")]
    InvalidCommand(String),
}

/// Primary error type for the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Configuration sources could not be parsed or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The serial port could not be opened.
    #[error("Cannot open serial port '{port}': {reason}")]
    Connection {
        /// Port identifier.
        port: String,
        /// Underlying cause.
        reason: String,
    },

    /// Read or write on the open link failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link failed earlier (or was closed) and has not been reconnected.
    #[error("Serial link is down: {0}")]
    Disconnected(String),

    /// The response could not be decoded.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// No response arrived within the deadline on any attempt.
    #[error("No response after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Per-attempt deadline.
        timeout: Duration,
    },

    /// A well formed frame that does not answer the command in flight.
    #[error("Unexpected response: expected {expected}, received {received}")]
    UnexpectedResponse {
        /// Description of the expected response.
        expected: String,
        /// The frame actually received.
        received: String,
    },

    /// A requested setting failed local validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl DriverError {
    /// True when the serial link is unusable until reconnected.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Connection { .. } | DriverError::Io(_) | DriverError::Disconnected(_)
        )
    }

    /// True when the failure only affected one exchange and the link is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::Frame(_)
                | DriverError::Timeout { .. }
                | DriverError::UnexpectedResponse { .. }
                | DriverError::Validation(_)
        )
    }
}
