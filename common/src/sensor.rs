//! Conversions from raw ADC counts for the MCP9701 thermistor and the
//! mailbox coil. Readings are normalized to a 16-bit scale first so the
//! same thresholds work for 12-bit and 16-bit converters.

use crate::config::SensorConfig;

pub fn normalize_to_u16(raw: u16, adc_bits: u8) -> u16 {
    let bits = u32::from(adc_bits.clamp(1, 16));
    let max_in = (1_u32 << bits) - 1;
    let clamped = u32::from(raw).min(max_in);
    ((clamped * u32::from(u16::MAX) + max_in / 2) / max_in) as u16
}

pub fn average_u16(samples: &[u16]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let total: u32 = samples.iter().map(|&value| u32::from(value)).sum();
    Some(total as f32 / samples.len() as f32)
}

/// MCP9701: 400 mV at 0 °C, 19.53 mV/°C.
pub fn raw16_to_celsius(raw16: f32, config: &SensorConfig) -> f32 {
    let volts = raw16 / f32::from(u16::MAX) * config.vref;
    (volts - config.v_0c) / config.slope_v_per_c
}

pub fn is_motion(raw16: u16, config: &SensorConfig) -> bool {
    raw16 > config.motion_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_twelve_bit_full_scale() {
        assert_eq!(normalize_to_u16(4095, 12), u16::MAX);
        assert_eq!(normalize_to_u16(0, 12), 0);
        assert_eq!(normalize_to_u16(u16::MAX, 16), u16::MAX);
        assert_eq!(normalize_to_u16(5000, 12), u16::MAX);
    }

    #[test]
    fn offset_voltage_reads_zero_celsius() {
        let config = SensorConfig::default();
        let raw16 = 0.4 / config.vref * f32::from(u16::MAX);

        assert!(raw16_to_celsius(raw16, &config).abs() < 0.01);
    }

    #[test]
    fn one_slope_step_is_one_degree() {
        let config = SensorConfig::default();
        let raw16 = (0.4 + 20.0 * config.slope_v_per_c) / config.vref * f32::from(u16::MAX);

        assert!((raw16_to_celsius(raw16, &config) - 20.0).abs() < 0.01);
    }

    #[test]
    fn motion_threshold_is_strict() {
        let config = SensorConfig::default();
        assert!(!is_motion(3_000, &config));
        assert!(is_motion(3_001, &config));
    }

    #[test]
    fn averages_samples() {
        assert_eq!(average_u16(&[]), None);
        assert_eq!(average_u16(&[10, 20, 30, 40]), Some(25.0));
    }
}
