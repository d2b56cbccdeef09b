//! Settings and their wire encoding.
//!
//! | Parameter  | CH1 | CH2 | Arguments                          |
//! |------------|-----|-----|------------------------------------|
//! | Output     | 10  | 10  | `ch1,ch2`, each 0 or 1             |
//! | Waveform   | 11  | 12  | index 0..=21                       |
//! | Frequency  | 13  | 14  | `value * 1000`, unit code          |
//! | Amplitude  | 15  | 16  | `volts * 1000`                     |
//! | Offset     | 17  | 18  | `1000 + volts * 100`               |
//! | Duty cycle | 19  | 20  | `percent * 100`                    |
//! | Phase      | 21  | 22  | `degrees * 100`                    |

use crate::device::limits;
use crate::device::types::{Channel, Frequency, FrequencyUnit, Waveform};
use crate::error::{FrameError, ValidationError};
use crate::protocol::command::{Command, Opcode};
use std::fmt;
use std::str::FromStr;

const OFFSET_ZERO: f64 = 1000.0;

/// A settable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Output enable; one opcode covers both channels.
    Output,
    /// Waveform shape.
    Waveform,
    /// Frequency.
    Frequency,
    /// Amplitude, Vpp.
    Amplitude,
    /// DC offset, V.
    Offset,
    /// Duty cycle, %.
    DutyCycle,
    /// Phase, degrees.
    Phase,
}

impl Parameter {
    /// Per-channel parameters in the order they are applied.
    pub const CHANNEL_PARAMETERS: [Parameter; 6] = [
        Parameter::Waveform,
        Parameter::Frequency,
        Parameter::Amplitude,
        Parameter::Offset,
        Parameter::DutyCycle,
        Parameter::Phase,
    ];

    /// Opcode for `channel`. `Output` ignores the channel.
    pub fn opcode(self, channel: Channel) -> Opcode {
        let base = match self {
            Parameter::Output => return Opcode::OUTPUTS,
            Parameter::Waveform => 11,
            Parameter::Frequency => 13,
            Parameter::Amplitude => 15,
            Parameter::Offset => 17,
            Parameter::DutyCycle => 19,
            Parameter::Phase => 21,
        };
        // Channel index is 0 or 1, so the result stays within 11..=22
        Opcode::known(base + channel.index() as u8)
    }

    /// Parameter and channel addressed by `opcode`.
    pub fn from_opcode(opcode: Opcode) -> Option<(Parameter, Option<Channel>)> {
        let code = opcode.code();
        if code == Opcode::OUTPUTS.code() {
            return Some((Parameter::Output, None));
        }
        if !(11..=22).contains(&code) {
            return None;
        }
        let parameter = Self::CHANNEL_PARAMETERS[usize::from((code - 11) / 2)];
        let channel = if code % 2 == 1 {
            Channel::One
        } else {
            Channel::Two
        };
        Some((parameter, Some(channel)))
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Output => "output",
            Parameter::Waveform => "waveform",
            Parameter::Frequency => "frequency",
            Parameter::Amplitude => "amplitude",
            Parameter::Offset => "offset",
            Parameter::DutyCycle => "duty cycle",
            Parameter::Phase => "phase",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "output" | "outputs" => Ok(Parameter::Output),
            "waveform" | "wave" => Ok(Parameter::Waveform),
            "frequency" | "freq" => Ok(Parameter::Frequency),
            "amplitude" | "amp" => Ok(Parameter::Amplitude),
            "offset" => Ok(Parameter::Offset),
            "duty" | "duty-cycle" | "duty_cycle" => Ok(Parameter::DutyCycle),
            "phase" => Ok(Parameter::Phase),
            _ => Err(ValidationError::InvalidCommand(s.to_string())),
        }
    }
}

/// One requested or confirmed device setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    /// Output enable of both channels.
    Outputs {
        /// CH1 enabled.
        ch1: bool,
        /// CH2 enabled.
        ch2: bool,
    },
    /// Waveform of a channel.
    Waveform(Channel, Waveform),
    /// Frequency of a channel.
    Frequency(Channel, Frequency),
    /// Amplitude of a channel, Vpp.
    Amplitude(Channel, f64),
    /// Offset of a channel, V.
    Offset(Channel, f64),
    /// Duty cycle of a channel, %.
    DutyCycle(Channel, f64),
    /// Phase of a channel, degrees.
    Phase(Channel, f64),
}

fn scaled(value: f64, factor: f64) -> u64 {
    // Validated values are non-negative after scaling; `as` saturates anyway
    (value * factor).round() as u64
}

impl Setting {
    /// Which parameter this sets.
    pub fn parameter(&self) -> Parameter {
        match self {
            Setting::Outputs { .. } => Parameter::Output,
            Setting::Waveform(..) => Parameter::Waveform,
            Setting::Frequency(..) => Parameter::Frequency,
            Setting::Amplitude(..) => Parameter::Amplitude,
            Setting::Offset(..) => Parameter::Offset,
            Setting::DutyCycle(..) => Parameter::DutyCycle,
            Setting::Phase(..) => Parameter::Phase,
        }
    }

    /// Addressed channel; `None` for the shared output opcode.
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            Setting::Outputs { .. } => None,
            Setting::Waveform(ch, _)
            | Setting::Frequency(ch, _)
            | Setting::Amplitude(ch, _)
            | Setting::Offset(ch, _)
            | Setting::DutyCycle(ch, _)
            | Setting::Phase(ch, _) => Some(ch),
        }
    }

    /// Check the value against the device limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Setting::Outputs { .. } | Setting::Waveform(..) => Ok(()),
            Setting::Frequency(_, f) => limits::validate_frequency(f),
            Setting::Amplitude(_, v) => limits::validate_amplitude(*v),
            Setting::Offset(_, v) => limits::validate_offset(*v),
            Setting::DutyCycle(_, v) => limits::validate_duty_cycle(*v),
            Setting::Phase(_, v) => limits::validate_phase(*v),
        }
    }

    /// Write opcode.
    pub fn opcode(&self) -> Opcode {
        self.parameter()
            .opcode(self.channel().unwrap_or(Channel::One))
    }

    /// Wire arguments. Only meaningful for a validated setting.
    pub fn encode_args(&self) -> Vec<u64> {
        match *self {
            Setting::Outputs { ch1, ch2 } => vec![u64::from(ch1), u64::from(ch2)],
            Setting::Waveform(_, w) => vec![u64::from(w.index())],
            Setting::Frequency(_, f) => vec![scaled(f.value, 1000.0), f.unit.code()],
            Setting::Amplitude(_, v) => vec![scaled(v, 1000.0)],
            Setting::Offset(_, v) => vec![(OFFSET_ZERO + (v * 100.0).round()) as u64],
            Setting::DutyCycle(_, v) => vec![scaled(v, 100.0)],
            Setting::Phase(_, v) => vec![scaled(v, 100.0)],
        }
    }

    /// Validate and build the write command.
    pub fn to_command(&self) -> Result<Command, ValidationError> {
        self.validate()?;
        Ok(Command::write(self.opcode(), self.encode_args()))
    }

    /// The setting as the device stores it, at wire resolution.
    pub fn quantized(&self) -> Setting {
        Self::decode(self.opcode(), &self.encode_args()).unwrap_or(*self)
    }

    /// Decode the arguments of a `:rNN=...` frame or a raw `:wNN=...` line.
    pub fn decode(opcode: Opcode, args: &[u64]) -> Result<Setting, FrameError> {
        let invalid = |detail: String| FrameError::InvalidPayload {
            opcode: opcode.code(),
            detail,
        };

        let (parameter, channel) = Parameter::from_opcode(opcode)
            .ok_or_else(|| invalid("opcode is not a known setting".to_string()))?;

        let expected = match parameter {
            Parameter::Output | Parameter::Frequency => 2,
            _ => 1,
        };
        if args.len() != expected {
            return Err(invalid(format!(
                "expected {expected} argument(s), got {}",
                args.len()
            )));
        }

        let flag = |v: u64| match v {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid(format!("output flag {other} is not 0 or 1"))),
        };

        let raw = args[0];
        let setting = match (parameter, channel) {
            (Parameter::Output, _) => Setting::Outputs {
                ch1: flag(args[0])?,
                ch2: flag(args[1])?,
            },
            (_, None) => return Err(invalid("missing channel".to_string())),
            (Parameter::Waveform, Some(ch)) => Setting::Waveform(
                ch,
                Waveform::from_index(raw)
                    .ok_or_else(|| invalid(format!("waveform index {raw} out of range")))?,
            ),
            (Parameter::Frequency, Some(ch)) => {
                let unit = FrequencyUnit::from_code(args[1])
                    .ok_or_else(|| invalid(format!("unit code {} out of range", args[1])))?;
                Setting::Frequency(ch, Frequency::new(raw as f64 / 1000.0, unit))
            }
            (Parameter::Amplitude, Some(ch)) => Setting::Amplitude(ch, raw as f64 / 1000.0),
            (Parameter::Offset, Some(ch)) => Setting::Offset(ch, (raw as f64 - OFFSET_ZERO) / 100.0),
            (Parameter::DutyCycle, Some(ch)) => Setting::DutyCycle(ch, raw as f64 / 100.0),
            (Parameter::Phase, Some(ch)) => Setting::Phase(ch, raw as f64 / 100.0),
        };
        Ok(setting)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |b: bool| if b { "on" } else { "off" };
        match self {
            Setting::Outputs { ch1, ch2 } => {
                write!(f, "outputs CH1 {} CH2 {}", on_off(*ch1), on_off(*ch2))
            }
            Setting::Waveform(ch, w) => write!(f, "{ch} waveform {w}"),
            Setting::Frequency(ch, v) => write!(f, "{ch} frequency {v}"),
            Setting::Amplitude(ch, v) => write!(f, "{ch} amplitude {v:.3} Vpp"),
            Setting::Offset(ch, v) => write!(f, "{ch} offset {v:.2} V"),
            Setting::DutyCycle(ch, v) => write!(f, "{ch} duty cycle {v:.2} %"),
            Setting::Phase(ch, v) => write!(f, "{ch} phase {v:.2}°"),
        }
    }
}
