//! Log output setup.
//!
//! Installs a `tracing-subscriber` registry with one fmt layer in the format
//! chosen by [`LoggingConfig`]. `RUST_LOG` overrides the configured level.
//! Output goes to stderr so command output on stdout stays clean.
//!
//! # Example
//! ```no_run
//! use psg9080::{config::GeneratorConfig, logging};
//!
//! # fn main() -> Result<(), psg9080::error::DriverError> {
//! let config = GeneratorConfig::load()?;
//! logging::init(&config.logging)?;
//! tracing::info!("Driver started");
//! # Ok(())
//! # }
//! ```

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{DriverError, DriverResult};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

/// Initialise tracing.
///
/// Idempotent: if a global subscriber is already installed (tests, or an
/// embedding application), this returns `Ok(())` and leaves it in place.
pub fn init(config: &LoggingConfig) -> DriverResult<()> {
    let level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_filter(env_filter),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_filter(env_filter),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_filter(env_filter),
            )
            .try_init(),
    };

    result.or_else(already_initialised)
}

fn already_initialised(e: TryInitError) -> DriverResult<()> {
    // Expected in tests and when a host application installed its own subscriber
    if e.to_string().contains("a global default trace dispatcher has already been set") {
        Ok(())
    } else {
        Err(DriverError::Configuration(format!("Failed to initialize tracing: {e}")))
    }
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> DriverResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DriverError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}
