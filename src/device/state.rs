//! Cached channel configuration.
//!
//! Fields are `None` until the device has confirmed a value, either by
//! acknowledging a write or by answering a read.

use crate::device::setting::{Parameter, Setting};
use crate::device::types::{Channel, Frequency, Waveform};
use std::fmt;

/// Last confirmed configuration of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelState {
    /// Output enabled.
    pub output: Option<bool>,
    /// Waveform.
    pub waveform: Option<Waveform>,
    /// Frequency.
    pub frequency: Option<Frequency>,
    /// Amplitude, Vpp.
    pub amplitude: Option<f64>,
    /// Offset, V.
    pub offset: Option<f64>,
    /// Duty cycle, %.
    pub duty_cycle: Option<f64>,
    /// Phase, degrees.
    pub phase: Option<f64>,
}

impl ChannelState {
    /// True when every field has been confirmed.
    pub fn is_complete(&self) -> bool {
        self.output.is_some()
            && self.waveform.is_some()
            && self.frequency.is_some()
            && self.amplitude.is_some()
            && self.offset.is_some()
            && self.duty_cycle.is_some()
            && self.phase.is_some()
    }
}

fn field<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    value: Option<T>,
    unit: &str,
) -> fmt::Result {
    match value {
        Some(v) => writeln!(f, "  {name:<10} {v}{unit}"),
        None => writeln!(f, "  {name:<10} unknown"),
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        field(f, "output", self.output.map(|on| if on { "on" } else { "off" }), "")?;
        field(f, "waveform", self.waveform, "")?;
        field(f, "frequency", self.frequency, "")?;
        field(f, "amplitude", self.amplitude.map(|v| format!("{v:.3}")), " Vpp")?;
        field(f, "offset", self.offset.map(|v| format!("{v:.2}")), " V")?;
        field(f, "duty", self.duty_cycle.map(|v| format!("{v:.2}")), " %")?;
        field(f, "phase", self.phase.map(|v| format!("{v:.2}")), "°")
    }
}

/// Confirmed state of both channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    channels: [ChannelState; 2],
}

impl DeviceState {
    /// State of `channel`.
    pub fn channel(&self, channel: Channel) -> &ChannelState {
        &self.channels[channel.index()]
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelState {
        &mut self.channels[channel.index()]
    }

    /// Record a confirmed setting.
    pub fn apply(&mut self, setting: &Setting) {
        match *setting {
            Setting::Outputs { ch1, ch2 } => {
                self.channel_mut(Channel::One).output = Some(ch1);
                self.channel_mut(Channel::Two).output = Some(ch2);
            }
            Setting::Waveform(ch, v) => self.channel_mut(ch).waveform = Some(v),
            Setting::Frequency(ch, v) => self.channel_mut(ch).frequency = Some(v),
            Setting::Amplitude(ch, v) => self.channel_mut(ch).amplitude = Some(v),
            Setting::Offset(ch, v) => self.channel_mut(ch).offset = Some(v),
            Setting::DutyCycle(ch, v) => self.channel_mut(ch).duty_cycle = Some(v),
            Setting::Phase(ch, v) => self.channel_mut(ch).phase = Some(v),
        }
    }

    /// Mark a parameter unknown. `Output` clears both channels.
    pub fn forget(&mut self, parameter: Parameter, channel: Channel) {
        if parameter == Parameter::Output {
            for ch in Channel::ALL {
                self.channel_mut(ch).output = None;
            }
            return;
        }
        let state = self.channel_mut(channel);
        match parameter {
            Parameter::Output => {}
            Parameter::Waveform => state.waveform = None,
            Parameter::Frequency => state.frequency = None,
            Parameter::Amplitude => state.amplitude = None,
            Parameter::Offset => state.offset = None,
            Parameter::DutyCycle => state.duty_cycle = None,
            Parameter::Phase => state.phase = None,
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.channels = Default::default();
    }

    /// The cached value of `parameter` as a setting, if confirmed.
    ///
    /// `Output` needs both channels known.
    pub fn current(&self, parameter: Parameter, channel: Channel) -> Option<Setting> {
        let state = self.channel(channel);
        match parameter {
            Parameter::Output => Some(Setting::Outputs {
                ch1: self.channel(Channel::One).output?,
                ch2: self.channel(Channel::Two).output?,
            }),
            Parameter::Waveform => state.waveform.map(|v| Setting::Waveform(channel, v)),
            Parameter::Frequency => state.frequency.map(|v| Setting::Frequency(channel, v)),
            Parameter::Amplitude => state.amplitude.map(|v| Setting::Amplitude(channel, v)),
            Parameter::Offset => state.offset.map(|v| Setting::Offset(channel, v)),
            Parameter::DutyCycle => state.duty_cycle.map(|v| Setting::DutyCycle(channel, v)),
            Parameter::Phase => state.phase.map(|v| Setting::Phase(channel, v)),
        }
    }

    /// True when the cache already holds `setting` at wire resolution.
    pub fn holds(&self, setting: &Setting) -> bool {
        let channel = setting.channel().unwrap_or(Channel::One);
        self.current(setting.parameter(), channel)
            .is_some_and(|cached| cached.encode_args() == setting.encode_args())
    }
}
