//! RSSI to distance conversion using the log-distance path-loss model

use crate::core::DEFAULT_PATH_LOSS_EXPONENT;

/// Invert the log-distance path-loss model.
///
/// `reference_rssi` is the signal strength at one meter, so equal readings
/// give exactly 1.0 m. Non-finite exponents propagate as NaN. Extreme
/// readings saturate to infinity or zero instead of overflowing.
pub fn estimate(measured_rssi: i32, reference_rssi: i32, path_loss_exponent: f64) -> f64 {
    let attenuation_db = f64::from(reference_rssi) - f64::from(measured_rssi);
    10f64.powf(attenuation_db / (10.0 * path_loss_exponent))
}

/// Distance estimator bound to one propagation environment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimator {
    pub path_loss_exponent: f64,
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self {
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl DistanceEstimator {
    pub fn new(path_loss_exponent: f64) -> Self {
        Self { path_loss_exponent }
    }

    /// Distance in meters for a discovery RSSI and the beacon's reference RSSI
    pub fn estimate(&self, measured_rssi: i32, reference_rssi: i32) -> f64 {
        estimate(measured_rssi, reference_rssi, self.path_loss_exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_rssi_is_one_meter() {
        assert_eq!(estimate(-59, -59, 2.0), 1.0);
        assert_eq!(DistanceEstimator::new(3.5).estimate(-70, -70), 1.0);
    }

    #[test]
    fn test_weaker_signal_is_farther() {
        // 20 dB of loss at n = 2 is one decade of distance
        let distance = estimate(-80, -60, 2.0);
        assert!((distance - 10.0).abs() < 1e-9);

        let closer = estimate(-50, -60, 2.0);
        assert!(closer < 1.0);
    }

    #[test]
    fn test_exponent_scales_distance() {
        let free_space = estimate(-72, -60, 2.0);
        let indoor = estimate(-72, -60, 3.0);
        assert!(indoor < free_space);
        assert!((indoor - 10f64.powf(0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_exponent_propagates() {
        assert!(estimate(-70, -60, f64::NAN).is_nan());
    }

    #[test]
    fn test_extreme_readings_saturate() {
        assert!(estimate(-60, i32::MAX, 2.0).is_infinite());
        assert_eq!(estimate(-60, i32::MIN, 2.0), 0.0);
        assert!(estimate(i32::MIN, i32::MAX, 2.0).is_infinite());
    }
}
