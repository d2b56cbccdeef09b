//! CLI entry point for the PSG9080 driver.
//!
//! # Usage
//!
//! ```bash
//! psg9080 ports
//! psg9080 --port /dev/rfcomm0 status
//! psg9080 set --channel 1 --waveform square --frequency 10 --unit kHz --output on
//! psg9080 raw ':r13=0.'
//! psg9080 --simulate status
//! psg9080 config
//! ```
//!
//! Configuration comes from `psg9080.toml` (or `--config`) and `PSG9080_*`
//! environment variables; `--port` overrides `[serial] port`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use psg9080::config::GeneratorConfig;
use psg9080::device::{Channel, ChannelSettings, Frequency, FrequencyUnit, SignalGenerator, Waveform};
use psg9080::logging;
use psg9080::simulator::{Simulator, SimulatorHandle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "psg9080")]
#[command(about = "Control a PSG9080 signal generator over serial or Bluetooth SPP", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: psg9080.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Talk to an in-process simulator instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Read and print every setting of both channels
    Status,

    /// Change settings of one channel
    Set {
        /// Channel (1 or 2)
        #[arg(long, default_value_t = 1)]
        channel: u8,

        /// Waveform name or index (e.g. "sine", "square", "3")
        #[arg(long)]
        waveform: Option<Waveform>,

        /// Frequency in --unit
        #[arg(long)]
        frequency: Option<f64>,

        /// Frequency unit: Hz, kHz, MHz, mHz, uHz
        #[arg(long, default_value = "Hz")]
        unit: FrequencyUnit,

        /// Amplitude in Vpp
        #[arg(long)]
        amplitude: Option<f64>,

        /// Offset in V
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<f64>,

        /// Duty cycle in %
        #[arg(long)]
        duty: Option<f64>,

        /// Phase in degrees
        #[arg(long)]
        phase: Option<f64>,

        /// Output state
        #[arg(long)]
        output: Option<Switch>,
    },

    /// Send one command line verbatim, e.g. ':w11=1.'
    Raw {
        /// Command line
        line: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load_from(path),
        None => GeneratorConfig::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    config.validate()?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        command => {
            let (generator, _simulator) = open(&config, cli.simulate).await?;
            let result = run(&generator, command).await;
            generator.close().await;
            result
        }
    }
}

async fn open(
    config: &GeneratorConfig,
    simulate: bool,
) -> Result<(SignalGenerator, Option<SimulatorHandle>)> {
    if simulate {
        let (connection, handle) = Simulator::spawn();
        let generator = SignalGenerator::from_connection(connection, &config.protocol);
        return Ok((generator, Some(handle)));
    }
    if config.serial.port.is_empty() {
        bail!("No serial port configured. Use --port, [serial] port or PSG9080_SERIAL__PORT");
    }
    let generator = SignalGenerator::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.serial.port))?;
    Ok((generator, None))
}

async fn run(generator: &SignalGenerator, command: Commands) -> Result<()> {
    match command {
        Commands::Status => {
            let state = generator.refresh().await?;
            for channel in Channel::ALL {
                println!("{channel}");
                print!("{}", state.channel(channel));
            }
        }
        Commands::Set {
            channel,
            waveform,
            frequency,
            unit,
            amplitude,
            offset,
            duty,
            phase,
            output,
        } => {
            let channel = Channel::try_from(channel)?;
            let settings = ChannelSettings {
                waveform,
                frequency: frequency.map(|value| Frequency::new(value, unit)),
                amplitude,
                offset,
                duty_cycle: duty,
                phase,
                output: output.map(|s| matches!(s, Switch::On)),
            };
            if settings.is_empty() {
                bail!("Nothing to set; pass at least one of --waveform, --frequency, --amplitude, --offset, --duty, --phase, --output");
            }
            generator.apply(channel, &settings).await?;
            println!("{channel}");
            print!("{}", generator.channel_state(channel).await);
        }
        Commands::Raw { line } => {
            let response = generator.send_raw(&line).await?;
            println!("{response}");
        }
        Commands::Ports | Commands::Config => {}
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn list_ports() -> Result<()> {
    let ports = psg9080::serial::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.kind);
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn list_ports() -> Result<()> {
    bail!("Serial support not enabled. Rebuild with --features serial")
}
