//! Gyroscope vs. vision cross-check support.
//!
//! The robot's gyroscope yaw is compared against an externally observed
//! orientation twice, with a full clockwise and counter-clockwise turn in
//! between; genuine drift or scale error shows up as inconsistency between
//! the two differences. The estimator itself (a camera watching a check
//! board on the robot) lives outside this crate, behind `YawEstimator`.

use std::f64::consts::PI;
use std::path::Path;

/// External orientation estimator.
///
/// The camera faces the robot, so its yaw readings are sign-inverted with
/// respect to the gyroscope before comparison.
pub trait YawEstimator: Send {
    /// Prepare the estimator with a calibration file and video device.
    fn init(&mut self, calibration: &Path, device_index: u32) -> anyhow::Result<()>;

    /// Latest observed yaw in radians, or `None` while the check board is
    /// not recognized.
    fn sample_yaw(&mut self) -> Option<f64>;
}

/// Normalize an angular difference into (−π, π], for any finite input.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}

/// Whether the two recorded gyro-vs-vision differences agree within the
/// configured tolerance.
pub fn samples_agree(diff_a: f64, diff_b: f64, tolerance: f64) -> bool {
    (diff_a - diff_b).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(angle: f64) -> bool {
        angle > -PI && angle <= PI
    }

    #[test]
    fn test_normalization_stays_in_range() {
        for raw in [
            0.0,
            1.0,
            -1.0,
            PI,
            -PI,
            2.0 * PI,
            -2.0 * PI,
            3.0 * PI,
            -3.0 * PI,
            10.5,
            -123.456,
        ] {
            let normalized = normalize_angle(raw);
            assert!(in_range(normalized), "{raw} -> {normalized}");
        }
    }

    #[test]
    fn test_normalization_values() {
        assert!((normalize_angle(0.0)).abs() < 1e-12);
        assert!((normalize_angle(2.0 * PI)).abs() < 1e-12);
        assert!((normalize_angle(PI) - PI).abs() < 1e-12);
        // −π maps to the closed end of the interval
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(PI + 0.1) - (-PI + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_tolerance() {
        assert!(samples_agree(0.02, -0.02, 0.05));
        assert!(samples_agree(0.1, 0.15, 0.05));
        assert!(!samples_agree(0.1, 0.16, 0.05));
    }
}
