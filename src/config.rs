//! Configuration loading using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. Built-in defaults
//! 2. A TOML file (`psg9080.toml` by default)
//! 3. Environment variables prefixed with `PSG9080_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use psg9080::config::GeneratorConfig;
//!
//! # fn main() -> Result<(), psg9080::error::DriverError> {
//! // PSG9080_SERIAL__PORT=/dev/rfcomm0 overrides [serial] port
//! let config = GeneratorConfig::load()?;
//! config.validate()?;
//! println!("Port: {}", config.serial.port);
//! # Ok(())
//! # }
//! ```

use crate::error::{DriverError, DriverResult};
use crate::error_recovery::RetryPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "psg9080.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PSG9080_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialSettings,
    /// Exchange timing and framing settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port path (e.g., "/dev/rfcomm0", "COM5")
    #[serde(default)]
    pub port: String,
    /// Baud rate; the JDY-31 Bluetooth module defaults to 9600
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Protocol engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Per-attempt response deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after a timed-out attempt (0 = single attempt)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// How long to discard late bytes after a cancelled or timed-out exchange
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
    /// Longest accepted response line in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Skip writes whose value already matches the confirmed channel state
    #[serde(default = "default_skip_redundant_writes")]
    pub skip_redundant_writes: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// Single line, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_drain_window_ms() -> u64 {
    50
}

fn default_max_frame_len() -> usize {
    64
}

fn default_skip_redundant_writes() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl SerialSettings {
    /// Settings for `port` at the default baud rate.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            drain_window_ms: default_drain_window_ms(),
            max_frame_len: default_max_frame_len(),
            skip_redundant_writes: default_skip_redundant_writes(),
        }
    }
}

impl ProtocolConfig {
    /// Per-attempt response deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Drain window applied before the exchange that follows a cancelled one.
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }

    /// Retry policy for timed-out exchanges.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl GeneratorConfig {
    /// Load configuration from `psg9080.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix PSG9080_
    /// Example: PSG9080_PROTOCOL__TIMEOUT_MS=2000
    pub fn load() -> DriverResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// The merged provider stack, exposed for callers that layer more providers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(GeneratorConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DriverResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(DriverError::Configuration(
                "serial.baud_rate must be greater than zero".into(),
            ));
        }

        if self.protocol.timeout_ms == 0 {
            return Err(DriverError::Configuration(
                "protocol.timeout_ms must be greater than zero".into(),
            ));
        }

        // ":r13=80000000000,0." plus CRLF must fit
        if self.protocol.max_frame_len < 24 {
            return Err(DriverError::Configuration(format!(
                "protocol.max_frame_len {} is too small; minimum is 24",
                self.protocol.max_frame_len
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DriverError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}
