//! Value types of the PSG9080 front panel.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Channel {
    /// CH1
    One,
    /// CH2
    Two,
}

impl Channel {
    /// Both channels, in panel order.
    pub const ALL: [Channel; 2] = [Channel::One, Channel::Two];

    /// Panel number, 1 or 2.
    pub fn number(self) -> u8 {
        match self {
            Channel::One => 1,
            Channel::Two => 2,
        }
    }

    /// Zero based index.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }

    /// The other channel.
    pub fn other(self) -> Channel {
        match self {
            Channel::One => Channel::Two,
            Channel::Two => Channel::One,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Channel::One),
            2 => Ok(Channel::Two),
            other => Err(ValidationError::InvalidChannel(other)),
        }
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.number()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.number())
    }
}

/// Built-in waveforms, in device index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Waveform {
    Sine,
    Square,
    Pulse,
    Triangle,
    Slope,
    Cmos,
    DcLevel,
    PartialSine,
    HalfWave,
    FullWave,
    PositiveLadder,
    NegativeLadder,
    PositiveTrapezoid,
    NegativeTrapezoid,
    Noise,
    ExponentialRise,
    ExponentialFall,
    LogarithmicRise,
    LogarithmicFall,
    SincPulse,
    MultiTone,
    Lorenz,
}

impl Waveform {
    /// Every waveform; position equals the device index.
    pub const ALL: [Waveform; 22] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Pulse,
        Waveform::Triangle,
        Waveform::Slope,
        Waveform::Cmos,
        Waveform::DcLevel,
        Waveform::PartialSine,
        Waveform::HalfWave,
        Waveform::FullWave,
        Waveform::PositiveLadder,
        Waveform::NegativeLadder,
        Waveform::PositiveTrapezoid,
        Waveform::NegativeTrapezoid,
        Waveform::Noise,
        Waveform::ExponentialRise,
        Waveform::ExponentialFall,
        Waveform::LogarithmicRise,
        Waveform::LogarithmicFall,
        Waveform::SincPulse,
        Waveform::MultiTone,
        Waveform::Lorenz,
    ];

    /// Device index.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Waveform at device index `index`.
    pub fn from_index(index: u64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "Sine",
            Waveform::Square => "Square",
            Waveform::Pulse => "Pulse",
            Waveform::Triangle => "Triangle",
            Waveform::Slope => "Slope",
            Waveform::Cmos => "CMOS",
            Waveform::DcLevel => "DC level",
            Waveform::PartialSine => "Partial sine",
            Waveform::HalfWave => "Half wave",
            Waveform::FullWave => "Full wave",
            Waveform::PositiveLadder => "Positive ladder",
            Waveform::NegativeLadder => "Negative ladder",
            Waveform::PositiveTrapezoid => "Positive trapezoid",
            Waveform::NegativeTrapezoid => "Negative trapezoid",
            Waveform::Noise => "Noise",
            Waveform::ExponentialRise => "Exponential rise",
            Waveform::ExponentialFall => "Exponential fall",
            Waveform::LogarithmicRise => "Logarithmic rise",
            Waveform::LogarithmicFall => "Logarithmic fall",
            Waveform::SincPulse => "Sinc pulse",
            Waveform::MultiTone => "Multi-tone",
            Waveform::Lorenz => "Lorenz",
        }
    }
}

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Accepts a device index (`"3"`) or a name, ignoring case, spaces and dashes
/// (`"dc-level"`, `"HalfWave"`).
impl FromStr for Waveform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.trim().parse::<u64>() {
            return Self::from_index(index)
                .ok_or_else(|| ValidationError::InvalidWaveform(s.to_string()));
        }
        let wanted = normalise(s);
        Self::ALL
            .into_iter()
            .find(|w| normalise(w.name()) == wanted)
            .ok_or_else(|| ValidationError::InvalidWaveform(s.to_string()))
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unit a frequency is expressed in on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrequencyUnit {
    /// Hertz, code 0.
    #[default]
    Hz,
    /// Kilohertz, code 1.
    KHz,
    /// Megahertz, code 2.
    MHz,
    /// Millihertz, code 3.
    MilliHz,
    /// Microhertz, code 4.
    MicroHz,
}

impl FrequencyUnit {
    /// Wire code.
    pub fn code(self) -> u64 {
        match self {
            FrequencyUnit::Hz => 0,
            FrequencyUnit::KHz => 1,
            FrequencyUnit::MHz => 2,
            FrequencyUnit::MilliHz => 3,
            FrequencyUnit::MicroHz => 4,
        }
    }

    /// Unit for wire code `code`.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(FrequencyUnit::Hz),
            1 => Some(FrequencyUnit::KHz),
            2 => Some(FrequencyUnit::MHz),
            3 => Some(FrequencyUnit::MilliHz),
            4 => Some(FrequencyUnit::MicroHz),
            _ => None,
        }
    }

    /// Hertz per unit.
    pub fn scale(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::MilliHz => 1e-3,
            FrequencyUnit::MicroHz => 1e-6,
        }
    }

    /// SI symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "Hz",
            FrequencyUnit::KHz => "kHz",
            FrequencyUnit::MHz => "MHz",
            FrequencyUnit::MilliHz => "mHz",
            FrequencyUnit::MicroHz => "µHz",
        }
    }
}

/// Accepts the SI symbols (case matters for `MHz` vs `mHz`), `uHz`, and the
/// unambiguous spellings `hz`, `khz`, `mega`, `milli`, `micro`.
impl FromStr for FrequencyUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Hz" | "hz" | "HZ" => Ok(FrequencyUnit::Hz),
            "kHz" | "khz" | "KHz" | "KHZ" => Ok(FrequencyUnit::KHz),
            "MHz" | "MHZ" | "mega" => Ok(FrequencyUnit::MHz),
            "mHz" | "milli" => Ok(FrequencyUnit::MilliHz),
            "µHz" | "μHz" | "uHz" | "uhz" | "micro" => Ok(FrequencyUnit::MicroHz),
            other => Err(ValidationError::InvalidFrequencyUnit(other.to_string())),
        }
    }
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A frequency as the device stores it: a value with three decimals in a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    /// Magnitude in `unit`.
    pub value: f64,
    /// Unit of `value`.
    pub unit: FrequencyUnit,
}

impl Frequency {
    /// `value` in `unit`.
    pub fn new(value: f64, unit: FrequencyUnit) -> Self {
        Self { value, unit }
    }

    /// `value` hertz.
    pub fn hz(value: f64) -> Self {
        Self::new(value, FrequencyUnit::Hz)
    }

    /// `value` kilohertz.
    pub fn khz(value: f64) -> Self {
        Self::new(value, FrequencyUnit::KHz)
    }

    /// `value` megahertz.
    pub fn mhz(value: f64) -> Self {
        Self::new(value, FrequencyUnit::MHz)
    }

    /// Value in hertz.
    pub fn as_hz(&self) -> f64 {
        self.value * self.unit.scale()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.value, self.unit)
    }
}
