// Timeouts, topics, robot parameters
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::base::kinematics::JacobianParams;
use crate::base::limiter::SpeedLimits;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;
pub const MAX_LOOP_HZ: u64 = 1000;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "omni/cmd/base"; // commands
pub const TOPIC_ODOMETRY: &str = "omni/state/odometry"; // dead-reckoning pose
pub const TOPIC_DRIVES: &str = "omni/state/drives"; // drive status + comm status
pub const TOPIC_HEALTH: &str = "omni/state/health"; // health status

// Torso travel accepted from commands (m)
pub const TORSO_MIN_POSITION: f64 = 0.0;
pub const TORSO_MAX_POSITION: f64 = 0.5;

// Default parameter file
pub const DEFAULT_CONFIG_PATH: &str = "config/omni_base.json";

// Bus bring-up: poll the working counter this often before giving up
pub const LINK_WAIT_ATTEMPTS: u32 = 200;
pub const LINK_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Tick period for a loop rate, with the rate clamped to `1..=MAX_LOOP_HZ`
pub fn loop_period(hz: u64) -> Duration {
    Duration::from_secs_f64(1.0 / hz.clamp(1, MAX_LOOP_HZ) as f64)
}

/// Errors raised while loading or validating robot parameters
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {value} (must be finite and > 0)")]
    Invalid { field: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Check a physical parameter once at construction time
pub(crate) fn require_positive(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid { field, value })
    }
}

/// Per-robot parameters. Every field is required; there are no safe defaults
/// for a physical base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseConfig {
    /// Half the wheelbase (m)
    pub half_track_x: f64,
    /// Half the track width (m)
    pub half_track_y: f64,
    /// Encoder ticks per meter of wheel travel, used for commanding
    pub drive_constant: f64,
    /// Encoder ticks per meter of wheel travel, used for odometry
    pub odometry_constant: f64,
    /// Drift-correction multiplier applied to `odometry_constant`
    pub odometry_correction: f64,
    /// Fastest a single wheel may move (m/s)
    pub wheel_speed_limit: f64,
    /// Fastest any point of the body may move (m/s)
    pub cartesian_speed_limit: f64,
    /// Outer radius of the body (m)
    pub body_radius: f64,
}

impl BaseConfig {
    /// Load and validate parameters from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate parameters from a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("half_track_x", self.half_track_x)?;
        require_positive("half_track_y", self.half_track_y)?;
        require_positive("drive_constant", self.drive_constant)?;
        require_positive("odometry_constant", self.odometry_constant)?;
        require_positive("odometry_correction", self.odometry_correction)?;
        require_positive("wheel_speed_limit", self.wheel_speed_limit)?;
        require_positive("cartesian_speed_limit", self.cartesian_speed_limit)?;
        require_positive("body_radius", self.body_radius)?;
        Ok(())
    }

    /// Geometry used for commanding the wheels
    pub fn jacobian(&self) -> Result<JacobianParams> {
        JacobianParams::new(self.half_track_x, self.half_track_y, self.drive_constant)
    }

    pub fn speed_limits(&self) -> Result<SpeedLimits> {
        SpeedLimits::new(
            self.cartesian_speed_limit,
            self.wheel_speed_limit,
            self.body_radius,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Parameters of the reference robot
    pub(crate) fn reference_config() -> BaseConfig {
        BaseConfig {
            half_track_x: 0.39225,
            half_track_y: 0.303495,
            drive_constant: 626594.7934,
            odometry_constant: 626594.7934,
            odometry_correction: 1.0,
            wheel_speed_limit: 1.0,
            cartesian_speed_limit: 0.5,
            body_radius: 0.7,
        }
    }

    #[test]
    fn test_loop_period_never_zero() {
        assert_eq!(loop_period(50), Duration::from_millis(20));
        assert_eq!(loop_period(1000), Duration::from_millis(1));
        assert_eq!(loop_period(2000), Duration::from_millis(1));
        assert_eq!(loop_period(0), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_reference_file_contents() {
        let text = include_str!("../config/omni_base.json");
        let config = BaseConfig::from_json(text).expect("reference config should parse");
        assert_eq!(config, reference_config());
    }

    #[test]
    fn test_missing_field_rejected() {
        let text = r#"{ "half_track_x": 0.4, "half_track_y": 0.3 }"#;
        assert!(matches!(
            BaseConfig::from_json(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_geometry_rejected() {
        let mut config = reference_config();
        config.drive_constant = 0.0;
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "drive_constant"),
            other => panic!("expected invalid drive_constant, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut config = reference_config();
        config.body_radius = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = reference_config();
        config.odometry_correction = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_limit_rejected() {
        let mut config = reference_config();
        config.wheel_speed_limit = -1.0;
        assert!(config.speed_limits().is_err());
        assert!(config.validate().is_err());
    }
}
