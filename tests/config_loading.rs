//! Configuration loading from TOML files and `PSG9080_*` environment variables.
//!
//! Environment variables are process-wide, so every test here runs `#[serial]`.

use psg9080::config::{GeneratorConfig, LogFormat};
use psg9080::DriverError;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_KEYS: [&str; 3] = [
    "PSG9080_SERIAL__PORT",
    "PSG9080_PROTOCOL__TIMEOUT_MS",
    "PSG9080_LOGGING__LEVEL",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = GeneratorConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, GeneratorConfig::default());
}

#[test]
#[serial]
fn test_file_values_override_defaults() {
    clear_env();
    let file = write_config(
        r#"
        [serial]
        port = "/dev/rfcomm0"
        baud_rate = 115200

        [protocol]
        timeout_ms = 250
        max_retries = 0
        skip_redundant_writes = false

        [logging]
        level = "debug"
        format = "compact"
        "#,
    );

    let config = GeneratorConfig::load_from(file.path()).unwrap();
    assert_eq!(config.serial.port, "/dev/rfcomm0");
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.protocol.timeout(), Duration::from_millis(250));
    assert_eq!(config.protocol.retry_policy().total_attempts(), 1);
    assert!(!config.protocol.skip_redundant_writes);
    // Not in the file
    assert_eq!(config.protocol.drain_window_ms, 50);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config("[serial]\nport = \"COM3\"\n\n[protocol]\ntimeout_ms = 250\n");
    std::env::set_var("PSG9080_SERIAL__PORT", "/dev/rfcomm1");
    std::env::set_var("PSG9080_PROTOCOL__TIMEOUT_MS", "2000");

    let config = GeneratorConfig::load_from(file.path());
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.serial.port, "/dev/rfcomm1");
    assert_eq!(config.protocol.timeout_ms, 2000);
}

#[test]
#[serial]
fn test_invalid_values_are_reported() {
    clear_env();
    let file = write_config("[protocol]\ntimeout_ms = \"soon\"\n");
    let err = GeneratorConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, DriverError::Config(_)));

    std::env::set_var("PSG9080_LOGGING__LEVEL", "chatty");
    let config = GeneratorConfig::load_from(file.path().with_extension("missing"));
    clear_env();

    let err = config.unwrap().validate().unwrap_err();
    assert!(matches!(err, DriverError::Configuration(_)));
    assert!(err.to_string().contains("chatty"));
}

#[test]
#[serial]
fn test_effective_config_round_trips_through_toml() {
    clear_env();
    let mut config = GeneratorConfig::default();
    config.serial.port = "/dev/ttyUSB0".into();
    config.logging.format = LogFormat::Json;

    let rendered = toml::to_string_pretty(&config).unwrap();
    let file = write_config(&rendered);
    assert_eq!(GeneratorConfig::load_from(file.path()).unwrap(), config);
}
