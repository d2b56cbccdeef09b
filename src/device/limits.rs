//! Hard limits of the PSG9080 front end.
//!
//! Every setting is checked against these before a command is built, so an
//! out-of-range request never reaches the wire.

use crate::device::types::Frequency;
use crate::error::ValidationError;

// =============================================================================
// Ranges
// =============================================================================

/// Highest frequency of either channel (80 MHz).
pub const MAX_FREQUENCY_HZ: f64 = 80e6;

/// Highest amplitude, volts peak to peak.
pub const MAX_AMPLITUDE_VPP: f64 = 20.0;

/// Offset range, volts. The wire value is `1000 + offset * 100`.
pub const MIN_OFFSET_V: f64 = -10.0;
/// Upper bound of the offset range, volts.
pub const MAX_OFFSET_V: f64 = 10.0;

/// Highest duty cycle, percent.
pub const MAX_DUTY_PERCENT: f64 = 100.0;

/// Highest phase, degrees.
pub const MAX_PHASE_DEG: f64 = 360.0;

// =============================================================================
// Checks
// =============================================================================

fn finite(parameter: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NotFinite { parameter })
    }
}

fn in_range(
    parameter: &'static str,
    value: f64,
    min: f64,
    max: f64,
    unit: &'static str,
) -> Result<(), ValidationError> {
    let value = finite(parameter, value)?;
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            parameter,
            value,
            min,
            max,
            unit,
        })
    }
}

/// 0 < f <= 80 MHz, and non-zero after rounding to three decimals of its unit.
pub fn validate_frequency(frequency: &Frequency) -> Result<(), ValidationError> {
    let value = finite("frequency", frequency.value)?;
    let scale = frequency.unit.scale();
    let max = MAX_FREQUENCY_HZ / scale;

    // Anything that rounds to zero on the wire is below the resolution
    if (value * 1000.0).round() < 1.0 || frequency.as_hz() > MAX_FREQUENCY_HZ {
        return Err(ValidationError::OutOfRange {
            parameter: "frequency",
            value,
            min: 0.001,
            max,
            unit: frequency.unit.symbol(),
        });
    }
    Ok(())
}

/// 0 to 20 Vpp.
pub fn validate_amplitude(volts: f64) -> Result<(), ValidationError> {
    in_range("amplitude", volts, 0.0, MAX_AMPLITUDE_VPP, "Vpp")
}

/// -10 to +10 V.
pub fn validate_offset(volts: f64) -> Result<(), ValidationError> {
    in_range("offset", volts, MIN_OFFSET_V, MAX_OFFSET_V, "V")
}

/// 0 to 100 %.
pub fn validate_duty_cycle(percent: f64) -> Result<(), ValidationError> {
    in_range("duty cycle", percent, 0.0, MAX_DUTY_PERCENT, "%")
}

/// 0 to 360 degrees.
pub fn validate_phase(degrees: f64) -> Result<(), ValidationError> {
    in_range("phase", degrees, 0.0, MAX_PHASE_DEG, "°")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::FrequencyUnit;

    #[test]
    fn test_frequency_bounds() {
        assert!(validate_frequency(&Frequency::hz(1000.0)).is_ok());
        assert!(validate_frequency(&Frequency::mhz(80.0)).is_ok());
        assert!(validate_frequency(&Frequency::new(1.0, FrequencyUnit::MicroHz)).is_ok());

        assert!(validate_frequency(&Frequency::hz(0.0)).is_err());
        assert!(validate_frequency(&Frequency::hz(-5.0)).is_err());
        assert!(validate_frequency(&Frequency::hz(0.0004)).is_err());
        assert!(validate_frequency(&Frequency::mhz(80.001)).is_err());
        assert!(validate_frequency(&Frequency::khz(80_001.0)).is_err());
    }

    #[test]
    fn test_frequency_rejects_non_finite() {
        assert_eq!(
            validate_frequency(&Frequency::hz(f64::NAN)),
            Err(ValidationError::NotFinite {
                parameter: "frequency"
            })
        );
        assert!(validate_frequency(&Frequency::hz(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_numeric_bounds_are_inclusive() {
        assert!(validate_amplitude(0.0).is_ok());
        assert!(validate_amplitude(20.0).is_ok());
        assert!(validate_amplitude(20.01).is_err());

        assert!(validate_offset(-10.0).is_ok());
        assert!(validate_offset(10.0).is_ok());
        assert!(validate_offset(-10.5).is_err());

        assert!(validate_duty_cycle(100.0).is_ok());
        assert!(validate_duty_cycle(-0.1).is_err());

        assert!(validate_phase(360.0).is_ok());
        assert!(validate_phase(360.5).is_err());
        assert!(validate_phase(f64::NEG_INFINITY).is_err());
    }
}
