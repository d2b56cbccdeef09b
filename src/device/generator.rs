//! PSG9080 device model.
//!
//! [`SignalGenerator`] validates every request, turns it into a command, runs
//! the exchange through the [`ProtocolEngine`] and records the confirmed value
//! in a per-channel cache. Reads of the cache never touch the wire.
//!
//! # Example
//!
//! ```rust,ignore
//! use psg9080::config::GeneratorConfig;
//! use psg9080::device::{Channel, Frequency, SignalGenerator, Waveform};
//!
//! let config = GeneratorConfig::load()?;
//! let generator = SignalGenerator::connect(&config).await?;
//! generator.set_waveform(Channel::One, Waveform::Square).await?;
//! generator.set_frequency(Channel::One, Frequency::khz(10.0)).await?;
//! generator.set_output(Channel::One, true).await?;
//! println!("{}", generator.channel_state(Channel::One).await);
//! ```

use crate::config::{GeneratorConfig, ProtocolConfig, SerialSettings};
use crate::device::setting::{Parameter, Setting};
use crate::device::state::{ChannelState, DeviceState};
use crate::device::types::{Channel, Frequency, Waveform};
use crate::error::{DriverError, DriverResult};
use crate::error_recovery::Recoverable;
use crate::protocol::{Access, Command, EngineSettings, ProtocolEngine, Response};
use crate::serial::{Connection, SerialPortIO};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Settings for [`SignalGenerator::apply`]; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSettings {
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
    /// Output enable, applied last.
    pub output: Option<bool>,
}

impl ChannelSettings {
    /// Per-channel settings in application order, output excluded.
    pub fn settings(&self, channel: Channel) -> Vec<Setting> {
        [
            self.waveform.map(|v| Setting::Waveform(channel, v)),
            self.frequency.map(|v| Setting::Frequency(channel, v)),
            self.amplitude.map(|v| Setting::Amplitude(channel, v)),
            self.offset.map(|v| Setting::Offset(channel, v)),
            self.duty_cycle.map(|v| Setting::DutyCycle(channel, v)),
            self.phase.map(|v| Setting::Phase(channel, v)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// True when nothing is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn mismatch(parameter: Parameter, got: Setting) -> DriverError {
    DriverError::UnexpectedResponse {
        expected: parameter.to_string(),
        received: got.to_string(),
    }
}

/// Driver for one PSG9080.
///
/// Cloning is cheap; clones share the link and the cache.
///
/// Operations that touch the cache hold `update_gate` from the cache check
/// through the exchange to the cache update, so the cache follows the order
/// in which exchanges reached the wire.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    engine: ProtocolEngine,
    state: Arc<RwLock<DeviceState>>,
    update_gate: Arc<Mutex<()>>,
    serial: Option<SerialSettings>,
    skip_redundant_writes: bool,
}

impl SignalGenerator {
    /// Open the configured serial port.
    pub async fn connect(config: &GeneratorConfig) -> DriverResult<Self> {
        config.validate()?;
        let connection = Connection::open(&config.serial).await?;
        let mut generator = Self::from_connection(connection, &config.protocol);
        generator.serial = Some(config.serial.clone());
        info!(port = %config.serial.port, "Connected to PSG9080");
        Ok(generator)
    }

    /// Drive an already open connection.
    pub fn from_connection(connection: Connection, protocol: &ProtocolConfig) -> Self {
        Self {
            engine: ProtocolEngine::new(connection, EngineSettings::from(protocol)),
            state: Arc::new(RwLock::new(DeviceState::default())),
            update_gate: Arc::new(Mutex::new(())),
            serial: None,
            skip_redundant_writes: protocol.skip_redundant_writes,
        }
    }

    /// Drive any byte stream, e.g. one end of `tokio::io::duplex`.
    pub fn from_stream(
        label: impl Into<String>,
        stream: impl SerialPortIO + 'static,
        protocol: &ProtocolConfig,
    ) -> Self {
        Self::from_connection(Connection::from_stream(label, stream), protocol)
    }

    /// The underlying protocol engine.
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// True while the link is up.
    pub async fn is_connected(&self) -> bool {
        self.engine.is_connected().await
    }

    /// Reopen the configured serial port and forget the cached state.
    pub async fn reconnect(&self) -> DriverResult<()> {
        let settings = self.serial.as_ref().ok_or_else(|| {
            DriverError::Configuration(
                "generator was built from a stream; use reconnect_with".to_string(),
            )
        })?;
        let connection = Connection::open(settings).await?;
        self.reconnect_with(connection).await;
        Ok(())
    }

    /// Swap in a new connection and forget the cached state.
    pub async fn reconnect_with(&self, connection: Connection) {
        let _gate = self.update_gate.lock().await;
        self.engine.replace_connection(connection).await;
        self.state.write().await.clear();
    }

    /// Close the link. The cache stays readable.
    pub async fn close(&self) {
        self.engine.close().await;
    }

    /// Validate, write and cache one setting.
    ///
    /// Returns `false` when the write was skipped because the cache already
    /// holds the same value.
    #[instrument(skip(self, setting), fields(setting = %setting), err)]
    pub async fn apply_setting(&self, setting: Setting) -> DriverResult<bool> {
        let command = setting.to_command()?;
        let _gate = self.update_gate.lock().await;
        self.write_gated(&setting, &command).await
    }

    /// Check, write and cache. Caller holds `update_gate`.
    async fn write_gated(&self, setting: &Setting, command: &Command) -> DriverResult<bool> {
        if self.skip_redundant_writes && self.state.read().await.holds(setting) {
            debug!("Value already confirmed, skipping write");
            return Ok(false);
        }

        if let Err(e) = self.engine.send_command(command).await {
            // The device may or may not have applied it
            self.state
                .write()
                .await
                .forget(setting.parameter(), setting.channel().unwrap_or(Channel::One));
            return Err(e);
        }
        self.state.write().await.apply(&setting.quantized());
        Ok(true)
    }

    /// Enable or disable one output.
    ///
    /// The output register covers both channels, so the other channel's
    /// state is written back unchanged. When the cache does not know it, it
    /// is read from the device first.
    pub async fn set_output(&self, channel: Channel, enabled: bool) -> DriverResult<()> {
        let _gate = self.update_gate.lock().await;

        let cached = self.state.read().await.channel(channel.other()).output;
        let other = match cached {
            Some(other) => other,
            None => match self.read_gated(Parameter::Output, Channel::One).await? {
                Setting::Outputs { ch1, ch2 } => match channel {
                    Channel::One => ch2,
                    Channel::Two => ch1,
                },
                other => return Err(mismatch(Parameter::Output, other)),
            },
        };

        let (ch1, ch2) = match channel {
            Channel::One => (enabled, other),
            Channel::Two => (other, enabled),
        };
        let setting = Setting::Outputs { ch1, ch2 };
        let command = setting.to_command()?;
        self.write_gated(&setting, &command).await?;
        Ok(())
    }

    /// Set both outputs at once.
    pub async fn set_outputs(&self, ch1: bool, ch2: bool) -> DriverResult<()> {
        self.apply_setting(Setting::Outputs { ch1, ch2 }).await?;
        Ok(())
    }

    /// Select a waveform.
    pub async fn set_waveform(&self, channel: Channel, waveform: Waveform) -> DriverResult<()> {
        self.apply_setting(Setting::Waveform(channel, waveform))
            .await?;
        Ok(())
    }

    /// Set the frequency.
    pub async fn set_frequency(&self, channel: Channel, frequency: Frequency) -> DriverResult<()> {
        self.apply_setting(Setting::Frequency(channel, frequency))
            .await?;
        Ok(())
    }

    /// Set the amplitude in Vpp.
    pub async fn set_amplitude(&self, channel: Channel, volts: f64) -> DriverResult<()> {
        self.apply_setting(Setting::Amplitude(channel, volts)).await?;
        Ok(())
    }

    /// Set the DC offset in volts.
    pub async fn set_offset(&self, channel: Channel, volts: f64) -> DriverResult<()> {
        self.apply_setting(Setting::Offset(channel, volts)).await?;
        Ok(())
    }

    /// Set the duty cycle in percent.
    pub async fn set_duty_cycle(&self, channel: Channel, percent: f64) -> DriverResult<()> {
        self.apply_setting(Setting::DutyCycle(channel, percent))
            .await?;
        Ok(())
    }

    /// Set the phase in degrees.
    pub async fn set_phase(&self, channel: Channel, degrees: f64) -> DriverResult<()> {
        self.apply_setting(Setting::Phase(channel, degrees)).await?;
        Ok(())
    }

    /// Apply several settings to one channel.
    ///
    /// Everything is validated before the first write. Writes go out as
    /// waveform, frequency, amplitude, offset, duty cycle, phase and finally
    /// output.
    #[instrument(skip(self, settings), fields(channel = %channel), err)]
    pub async fn apply(&self, channel: Channel, settings: &ChannelSettings) -> DriverResult<()> {
        let ordered = settings.settings(channel);
        for setting in &ordered {
            setting.validate()?;
        }
        for setting in ordered {
            self.apply_setting(setting).await?;
        }
        if let Some(enabled) = settings.output {
            self.set_output(channel, enabled).await?;
        }
        Ok(())
    }

    /// Query one parameter and cache the answer.
    #[instrument(skip(self), err)]
    pub async fn read(&self, parameter: Parameter, channel: Channel) -> DriverResult<Setting> {
        let _gate = self.update_gate.lock().await;
        self.read_gated(parameter, channel).await
    }

    /// Query and cache. Caller holds `update_gate`.
    async fn read_gated(&self, parameter: Parameter, channel: Channel) -> DriverResult<Setting> {
        let command = Command::read(parameter.opcode(channel));
        let response = self.engine.send_command(&command).await?;
        let setting = Setting::decode(command.opcode(), response.args())?;
        self.state.write().await.apply(&setting);
        Ok(setting)
    }

    /// Query both output enables.
    pub async fn read_outputs(&self) -> DriverResult<(bool, bool)> {
        match self.read(Parameter::Output, Channel::One).await? {
            Setting::Outputs { ch1, ch2 } => Ok((ch1, ch2)),
            other => Err(mismatch(Parameter::Output, other)),
        }
    }

    /// Query the waveform.
    pub async fn read_waveform(&self, channel: Channel) -> DriverResult<Waveform> {
        match self.read(Parameter::Waveform, channel).await? {
            Setting::Waveform(_, v) => Ok(v),
            other => Err(mismatch(Parameter::Waveform, other)),
        }
    }

    /// Query the frequency.
    pub async fn read_frequency(&self, channel: Channel) -> DriverResult<Frequency> {
        match self.read(Parameter::Frequency, channel).await? {
            Setting::Frequency(_, v) => Ok(v),
            other => Err(mismatch(Parameter::Frequency, other)),
        }
    }

    /// Query the amplitude, Vpp.
    pub async fn read_amplitude(&self, channel: Channel) -> DriverResult<f64> {
        match self.read(Parameter::Amplitude, channel).await? {
            Setting::Amplitude(_, v) => Ok(v),
            other => Err(mismatch(Parameter::Amplitude, other)),
        }
    }

    /// Query the offset, V.
    pub async fn read_offset(&self, channel: Channel) -> DriverResult<f64> {
        match self.read(Parameter::Offset, channel).await? {
            Setting::Offset(_, v) => Ok(v),
            other => Err(mismatch(Parameter::Offset, other)),
        }
    }

    /// Query the duty cycle, %.
    pub async fn read_duty_cycle(&self, channel: Channel) -> DriverResult<f64> {
        match self.read(Parameter::DutyCycle, channel).await? {
            Setting::DutyCycle(_, v) => Ok(v),
            other => Err(mismatch(Parameter::DutyCycle, other)),
        }
    }

    /// Query the phase, degrees.
    pub async fn read_phase(&self, channel: Channel) -> DriverResult<f64> {
        match self.read(Parameter::Phase, channel).await? {
            Setting::Phase(_, v) => Ok(v),
            other => Err(mismatch(Parameter::Phase, other)),
        }
    }

    /// Read every parameter: outputs, then each per-channel parameter for CH1
    /// and CH2. Thirteen exchanges.
    #[instrument(skip(self), err)]
    pub async fn refresh(&self) -> DriverResult<DeviceState> {
        self.read(Parameter::Output, Channel::One).await?;
        for parameter in Parameter::CHANNEL_PARAMETERS {
            for channel in Channel::ALL {
                self.read(parameter, channel).await?;
            }
        }
        Ok(self.state().await)
    }

    /// Cached state of one channel. No I/O.
    pub async fn channel_state(&self, channel: Channel) -> ChannelState {
        *self.state.read().await.channel(channel)
    }

    /// Cached state of both channels. No I/O.
    pub async fn state(&self) -> DeviceState {
        self.state.read().await.clone()
    }

    /// Send a manually typed command line such as `:w11=3.` and return the
    /// first response frame.
    ///
    /// A confirmed write or read updates the cache when its arguments decode;
    /// otherwise the affected parameter is marked unknown.
    #[instrument(skip(self), err)]
    pub async fn send_raw(&self, line: &str) -> DriverResult<Response> {
        let command = Command::parse(line)?;
        let _gate = self.update_gate.lock().await;
        let response = self.engine.send_command(&command).await?;

        let args = match command.access() {
            Access::Write => command.args(),
            Access::Read => response.args(),
        };
        let mut state = self.state.write().await;
        match Setting::decode(command.opcode(), args) {
            Ok(setting) => state.apply(&setting),
            Err(e) => {
                if let Some((parameter, channel)) = Parameter::from_opcode(command.opcode()) {
                    warn!(error = %e, "Raw command left {parameter} unknown");
                    state.forget(parameter, channel.unwrap_or(Channel::One));
                }
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl Recoverable<DriverError> for SignalGenerator {
    async fn recover(&mut self) -> Result<(), DriverError> {
        self.reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;

    /// Acknowledge every line and report it on a channel.
    fn acking_device(device: DuplexStream) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(device);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(line);
                if write.write_all(b":ok\r\n").await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn generator() -> (SignalGenerator, mpsc::UnboundedReceiver<String>) {
        let (host, device) = tokio::io::duplex(256);
        let generator = SignalGenerator::from_stream("duplex", host, &ProtocolConfig::default());
        (generator, acking_device(device))
    }

    #[tokio::test]
    async fn test_set_frequency_writes_and_caches() {
        let (generator, mut lines) = generator();
        generator
            .set_frequency(Channel::One, Frequency::hz(1000.0))
            .await
            .unwrap();

        assert_eq!(lines.recv().await.unwrap(), ":w13=1000000,0.");
        assert_eq!(
            generator.channel_state(Channel::One).await.frequency,
            Some(Frequency::hz(1000.0))
        );
    }

    #[tokio::test]
    async fn test_redundant_write_is_skipped() {
        let (generator, mut lines) = generator();
        assert!(generator
            .apply_setting(Setting::Amplitude(Channel::Two, 2.5))
            .await
            .unwrap());
        assert!(!generator
            .apply_setting(Setting::Amplitude(Channel::Two, 2.5))
            .await
            .unwrap());
        assert!(generator
            .apply_setting(Setting::Amplitude(Channel::Two, 3.0))
            .await
            .unwrap());

        assert_eq!(lines.recv().await.unwrap(), ":w16=2500.");
        assert_eq!(lines.recv().await.unwrap(), ":w16=3000.");
    }

    #[tokio::test]
    async fn test_set_output_keeps_other_channel() {
        let (generator, mut lines) = generator();
        generator.set_outputs(false, true).await.unwrap();
        generator.set_output(Channel::One, true).await.unwrap();
        generator.set_output(Channel::Two, false).await.unwrap();

        assert_eq!(lines.recv().await.unwrap(), ":w10=0,1.");
        assert_eq!(lines.recv().await.unwrap(), ":w10=1,1.");
        assert_eq!(lines.recv().await.unwrap(), ":w10=1,0.");
    }

    #[tokio::test]
    async fn test_apply_validates_everything_first() {
        let (generator, mut lines) = generator();
        let settings = ChannelSettings {
            waveform: Some(Waveform::Square),
            duty_cycle: Some(150.0),
            ..Default::default()
        };
        let err = generator.apply(Channel::One, &settings).await.unwrap_err();
        assert!(matches!(err, DriverError::Validation(_)));
        assert!(lines.try_recv().is_err());
        assert_eq!(generator.channel_state(Channel::One).await, ChannelState::default());
    }

    #[tokio::test]
    async fn test_apply_order() {
        let (generator, mut lines) = generator();
        let settings = ChannelSettings {
            output: Some(true),
            phase: Some(45.0),
            waveform: Some(Waveform::Triangle),
            frequency: Some(Frequency::khz(1.0)),
            ..Default::default()
        };
        generator.set_outputs(false, false).await.unwrap();
        generator.apply(Channel::Two, &settings).await.unwrap();

        let mut sent = Vec::new();
        for _ in 0..5 {
            sent.push(lines.recv().await.unwrap());
        }
        assert_eq!(
            sent,
            [":w10=0,0.", ":w12=3.", ":w14=1000,1.", ":w22=4500.", ":w10=0,1."]
        );
    }

    #[tokio::test]
    async fn test_set_output_never_guesses_the_other_channel() {
        // This device acks everything, so the output query cannot be answered
        let (generator, mut lines) = generator();
        let err = generator.set_output(Channel::One, true).await.unwrap_err();
        assert!(matches!(err, DriverError::UnexpectedResponse { .. }));

        assert_eq!(lines.recv().await.unwrap(), ":r10=0.");
        assert!(lines.try_recv().is_err());
        assert_eq!(generator.channel_state(Channel::One).await.output, None);
    }

    #[tokio::test]
    async fn test_failed_write_forgets_cached_value() {
        let (generator, mut lines) = generator();
        generator.set_phase(Channel::One, 90.0).await.unwrap();
        assert_eq!(lines.recv().await.unwrap(), ":w21=9000.");
        assert_eq!(generator.channel_state(Channel::One).await.phase, Some(90.0));

        generator.close().await;
        let err = generator.set_phase(Channel::One, 45.0).await.unwrap_err();
        assert!(err.is_connection_fatal());
        assert_eq!(generator.channel_state(Channel::One).await.phase, None);
    }

    #[tokio::test]
    async fn test_raw_write_updates_cache() {
        let (generator, _lines) = generator();
        let response = generator.send_raw(":w11=6.").await.unwrap();
        assert_eq!(response, Response::Ack);
        assert_eq!(
            generator.channel_state(Channel::One).await.waveform,
            Some(Waveform::DcLevel)
        );

        let err = generator.send_raw("w11=6").await.unwrap_err();
        assert!(matches!(err, DriverError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reconnect_without_port_is_configuration_error() {
        let (generator, _lines) = generator();
        let err = generator.reconnect().await.unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }
}
