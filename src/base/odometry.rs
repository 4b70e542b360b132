// Dead-reckoning odometry from wheel encoder deltas
//
// The engine owns the only copy of the pose and the encoder baseline. Call
// `update` once per cycle with fresh encoder positions; precision depends on
// calling it often, since each step assumes constant motion in between.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{self, ConfigError};

use super::bus::{EncoderSnapshot, WHEEL_COUNT};
use super::kinematics::{JacobianParams, WheelVector, forward};

/// Torso encoder resolution
pub const TORSO_TICKS_PER_METER: f64 = 10_000_000.0;

/// Accumulated planar pose (m, m, rad)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn origin() -> Self {
        Self::default()
    }
}

/// Torso height (m) from its encoder reading
pub fn torso_position(encoders: &EncoderSnapshot) -> f64 {
    encoders.torso as f64 / TORSO_TICKS_PER_METER
}

/// Torso target (m) to actuator ticks, clamped to the i32 range
pub fn torso_ticks(position: f64) -> i32 {
    let ticks = (position * TORSO_TICKS_PER_METER).round();
    ticks.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Odometry integrator
#[derive(Debug, Clone)]
pub struct OdometryEngine {
    params: JacobianParams,
    odometry_constant: f64,
    correction: f64,
    /// `params` rescaled so that wheel ticks map to meters
    displacement: JacobianParams,
    baseline: Option<[i32; WHEEL_COUNT]>,
    pose: Pose2D,
}

impl OdometryEngine {
    /// `odometry_constant` is ticks per meter of wheel travel; `correction`
    /// multiplies it to compensate drift.
    pub fn new(
        params: JacobianParams,
        odometry_constant: f64,
        correction: f64,
    ) -> Result<Self, ConfigError> {
        let odometry_constant = config::require_positive("odometry_constant", odometry_constant)?;
        let correction = config::require_positive("odometry_correction", correction)?;
        Ok(Self {
            params,
            odometry_constant,
            correction,
            displacement: params.with_drive_constant(odometry_constant * correction)?,
            baseline: None,
            pose: Pose2D::origin(),
        })
    }

    /// Replace the drift-correction multiplier
    pub fn set_correction(&mut self, correction: f64) -> Result<(), ConfigError> {
        let correction = config::require_positive("odometry_correction", correction)?;
        self.displacement = self
            .params
            .with_drive_constant(self.odometry_constant * correction)?;
        self.correction = correction;
        debug!("Odometry correction set to {}", correction);
        Ok(())
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }

    /// Current pose (a copy)
    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    pub fn is_initialized(&self) -> bool {
        self.baseline.is_some()
    }

    /// Integrate one encoder reading and return the new pose.
    ///
    /// The first call only records the baseline and returns the origin.
    /// Counter wraparound is not detected.
    pub fn update(&mut self, encoders: &EncoderSnapshot) -> Pose2D {
        let Some(last) = self.baseline.replace(encoders.wheels) else {
            debug!("Odometry baseline recorded: {:?}", encoders.wheels);
            return self.pose;
        };

        let mut delta = [0.0; WHEEL_COUNT];
        for (d, (&now, &before)) in delta.iter_mut().zip(encoders.wheels.iter().zip(&last)) {
            *d = now.wrapping_sub(before) as f64;
        }

        let step = forward(&WheelVector::from_array(delta), &self.displacement);

        // Heading halfway through the step, taken from the raw wheel
        // rotation before the sign flip below
        let angle = self.pose.theta + step.omega / 2.0;
        let (sin, cos) = angle.sin_cos();

        // Drive feedback counts against the command direction, so every
        // component of the step is negated.
        self.pose.x -= step.vx * cos - step.vy * sin;
        self.pose.y -= step.vx * sin + step.vy * cos;
        self.pose.theta -= step.omega;

        self.pose
    }
}
