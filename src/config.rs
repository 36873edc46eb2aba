//! Configuration loading for the qualification sequencer.
//!
//! Strongly-typed settings loaded from a TOML file plus environment
//! variables (prefixed with `ROBOT_QC_`), layered over built-in defaults.
//! The defaults reproduce the factory protocol as it ships: 20 Hz tick,
//! two cliff / wheel-drop cycles, one power-plug cycle per source, a 10 s
//! charge window and the 0.05 rad gyroscope tolerance.
//!
//! # Example
//! ```no_run
//! use robot_qc::config::Settings;
//!
//! let settings = Settings::load_from("config/robot_qc.toml")?;
//! settings.validate()?;
//! # Ok::<(), robot_qc::error::QcError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{QcError, QcResult};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application-level settings.
    pub application: ApplicationSettings,
    /// Result persistence settings.
    pub output: OutputSettings,
    /// External orientation estimator (camera) settings.
    pub camera: CameraSettings,
    /// Test protocol parameters.
    pub protocol: ProtocolSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Result persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// CSV file the per-robot verdict rows are appended to.
    pub results_file: PathBuf,
}

/// External orientation estimator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Video input index handed to the estimator.
    pub device_index: u32,
    /// Camera calibration file handed to the estimator.
    pub calibration_file: PathBuf,
}

/// Test protocol parameters.
///
/// Repetition counts are full active/inactive cycles; a device completes at
/// twice its count. Durations accept humantime strings in TOML ("10s").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Scheduler tick rate, in Hz.
    pub tick_hz: f64,
    /// Cliff sensor cycles required per sensor.
    pub cliff_repetitions: u32,
    /// Wheel-drop cycles required per wheel.
    pub wheel_drop_repetitions: u32,
    /// Plug/unplug cycles required per power source.
    pub power_plug_repetitions: u32,
    /// Maximum acceptable motor current reading.
    pub motor_max_current: i64,
    /// Minimum battery voltage rise over the charge window, in tenths of a volt.
    pub min_charge_delta: i64,
    /// Maximum discrepancy between the two gyroscope/vision differences, in radians.
    pub gyro_camera_max_diff: f64,
    /// Analog input minimum threshold, in millivolts.
    pub analog_min_threshold: u16,
    /// Analog input maximum threshold, in millivolts.
    pub analog_max_threshold: u16,
    /// Settle time between charging detection and the first voltage sample.
    #[serde(with = "humantime_serde")]
    pub charge_settle: Duration,
    /// Measurement window between the two voltage samples.
    #[serde(with = "humantime_serde")]
    pub charge_window: Duration,
    /// How long to wait for charging to start before failing the sub-test.
    #[serde(with = "humantime_serde")]
    pub charge_plug_timeout: Duration,
    /// Cadence at which the orientation estimator is polled.
    #[serde(with = "humantime_serde")]
    pub vision_poll_interval: Duration,
    /// Estimator polls per sample before the gyroscope sub-test aborts.
    pub vision_poll_attempts: u32,
    /// How long an analog feedback indicator stays lit after a threshold crossing.
    #[serde(with = "humantime_serde")]
    pub analog_feedback_time: Duration,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_file: PathBuf::from("robot_qc_results.csv"),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            calibration_file: PathBuf::from("camera_calibration.yaml"),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            tick_hz: 20.0,
            cliff_repetitions: 2,
            wheel_drop_repetitions: 2,
            power_plug_repetitions: 1,
            motor_max_current: 24,
            min_charge_delta: 2,
            gyro_camera_max_diff: 0.05,
            analog_min_threshold: 2,
            analog_max_threshold: 4090,
            charge_settle: Duration::from_secs(2),
            charge_window: Duration::from_secs(10),
            charge_plug_timeout: Duration::from_secs(40),
            vision_poll_interval: Duration::from_millis(200),
            vision_poll_attempts: 80,
            analog_feedback_time: Duration::from_secs(1),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            output: OutputSettings::default(),
            camera: CameraSettings::default(),
            protocol: ProtocolSettings::default(),
        }
    }
}

impl Settings {
    /// Load configuration from the default file location and environment.
    pub fn load() -> QcResult<Self> {
        Self::load_from("config/robot_qc.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment variables override file values with the `ROBOT_QC_`
    /// prefix and `__` as the section separator, e.g.
    /// `ROBOT_QC_APPLICATION__LOG_LEVEL=debug`. A missing file leaves the
    /// built-in defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ROBOT_QC_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> QcResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(QcError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.protocol.tick_hz.is_finite() && self.protocol.tick_hz > 0.0) {
            return Err(QcError::Configuration(format!(
                "Invalid tick_hz {}. Must be a positive rate",
                self.protocol.tick_hz
            )));
        }

        if self.protocol.vision_poll_attempts == 0 {
            return Err(QcError::Configuration(
                "vision_poll_attempts must be at least 1".to_string(),
            ));
        }

        for (name, reps) in [
            ("cliff_repetitions", self.protocol.cliff_repetitions),
            ("wheel_drop_repetitions", self.protocol.wheel_drop_repetitions),
            ("power_plug_repetitions", self.protocol.power_plug_repetitions),
        ] {
            if reps == 0 {
                return Err(QcError::Configuration(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        if self.protocol.analog_min_threshold >= self.protocol.analog_max_threshold {
            return Err(QcError::Configuration(format!(
                "analog_min_threshold ({}) must be below analog_max_threshold ({})",
                self.protocol.analog_min_threshold, self.protocol.analog_max_threshold
            )));
        }

        if self.output.results_file.as_os_str().is_empty() {
            return Err(QcError::Configuration(
                "output.results_file must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ProtocolSettings {
    /// Duration of one scheduler tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }

    /// Number of whole ticks covering `duration`, rounded up, at least one.
    pub fn ticks_for(&self, duration: Duration) -> u32 {
        let ticks = (duration.as_secs_f64() * self.tick_hz).ceil() as u32;
        ticks.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.protocol.tick_hz, 20.0);
        assert_eq!(settings.protocol.tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.protocol.power_plug_repetitions, 1);
        assert_eq!(settings.camera.device_index, 0);
    }

    #[test]
    fn test_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot_qc.toml");
        std::fs::write(
            &path,
            r#"
[application]
log_level = "debug"

[protocol]
tick_hz = 10.0
charge_window = "5s"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.protocol.tick_hz, 10.0);
        assert_eq!(settings.protocol.charge_window, Duration::from_secs(5));
        // Untouched sections keep their defaults
        assert_eq!(settings.protocol.motor_max_current, 24);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.protocol.tick_hz = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.protocol.analog_min_threshold = 4095;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_ticks_for_rounds_up() {
        let protocol = ProtocolSettings::default();
        assert_eq!(protocol.ticks_for(Duration::from_secs(1)), 20);
        assert_eq!(protocol.ticks_for(Duration::from_millis(55)), 2);
        assert_eq!(protocol.ticks_for(Duration::ZERO), 1);
    }
}
