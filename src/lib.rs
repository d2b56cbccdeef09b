//! # PSG9080 Driver
//!
//! Async driver for the PSG9080 two-channel signal generator. The generator
//! speaks a line based ASCII protocol over a serial byte stream, usually the
//! virtual serial port the operating system creates for its JDY-31 Bluetooth
//! SPP module.
//!
//! ## Crate Structure
//!
//! - **`serial`**: owns the byte stream. Opens ports through `tokio-serial`,
//!   reads with a deadline, drains stale bytes, releases the port on failure.
//! - **`protocol`**: command encoding, the incremental response decoder and the
//!   `ProtocolEngine` that runs one exchange at a time with timeout, retry and
//!   drain handling.
//! - **`device`**: the `SignalGenerator` model. Validates requests, encodes
//!   them per parameter and keeps a cache of confirmed channel settings.
//! - **`simulator`**: an in-process device for tests and `--simulate`.
//! - **`config`**: figment based configuration (defaults, TOML, environment).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `DriverError` and its frame and validation sub-errors.
//! - **`error_recovery`**: retry policy and the `Recoverable` trait.
//!
//! ## Example
//!
//! ```rust,ignore
//! use psg9080::config::ProtocolConfig;
//! use psg9080::device::{Channel, Frequency, SignalGenerator};
//! use psg9080::simulator::Simulator;
//!
//! let (connection, _sim) = Simulator::spawn();
//! let generator = SignalGenerator::from_connection(connection, &ProtocolConfig::default());
//! generator.set_frequency(Channel::One, Frequency::hz(1000.0)).await?;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod protocol;
pub mod serial;
pub mod simulator;

pub use config::GeneratorConfig;
pub use device::{Channel, Frequency, FrequencyUnit, SignalGenerator, Waveform};
pub use error::{DriverError, DriverResult};
