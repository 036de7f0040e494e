//! Gain and monitor volume mixing.
//!
//! Gain follows a power curve so that fine adjustments near 0 dB stay fine
//! and large boosts are damped. Cuts fall off at half the rate of boosts.
//! The monitor volume is a plain linear multiplier on top.

/// Engine volume for unity gain.
pub const UNITY_VOLUME: u32 = 100;

/// Highest engine volume.
pub const MAX_VOLUME: u32 = 200;

const GAIN_CURVE_EXPONENT: f64 = 1.8;
const GAIN_RANGE_DB: f64 = 20.0;

/// Map a decibel gain and a monitor percentage to an engine volume (0 - 200).
pub fn mix(db_gain: f64, monitor_percent: f64) -> u32 {
    let db_gain = if db_gain.is_finite() { db_gain } else { 0.0 };
    let monitor_percent = if monitor_percent.is_finite() {
        monitor_percent
    } else {
        0.0
    };

    let gain_factor = if db_gain >= 0.0 {
        100.0 + (db_gain / GAIN_RANGE_DB).powf(GAIN_CURVE_EXPONENT) * 100.0
    } else {
        100.0 - (db_gain.abs() / GAIN_RANGE_DB).powf(GAIN_CURVE_EXPONENT) * 50.0
    };

    let output = gain_factor / 100.0 * monitor_percent;
    output.clamp(0.0, MAX_VOLUME as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unity() {
        assert_eq!(mix(0.0, 100.0), UNITY_VOLUME);
    }

    #[test]
    fn test_range_ends() {
        assert_eq!(mix(20.0, 100.0), 200);
        assert_eq!(mix(-20.0, 100.0), 50);
        assert_eq!(mix(20.0, 0.0), 0);
    }

    #[test]
    fn test_monitor_is_linear() {
        assert_eq!(mix(0.0, 50.0), 50);
        assert_eq!(mix(0.0, 25.0), 25);
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        assert_eq!(mix(60.0, 100.0), MAX_VOLUME);
        assert_eq!(mix(-200.0, 100.0), 0);
        assert_eq!(mix(f64::NAN, 100.0), UNITY_VOLUME);
        assert_eq!(mix(0.0, f64::INFINITY), 0);
    }

    proptest! {
        /// Raising the gain never lowers the output
        #[test]
        fn mix_is_monotonic_in_gain(
            a in -20.0f64..=20.0,
            b in -20.0f64..=20.0,
            monitor in 0.0f64..=100.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(mix(low, monitor) <= mix(high, monitor));
        }

        /// Output stays on the engine scale
        #[test]
        fn mix_stays_in_engine_range(
            gain in -20.0f64..=20.0,
            monitor in 0.0f64..=100.0,
        ) {
            prop_assert!(mix(gain, monitor) <= MAX_VOLUME);
        }
    }
}
