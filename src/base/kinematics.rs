// Mecanum kinematics for the four-wheel omni base
// Converts body-frame velocities (vx, vy, omega) to wheel velocities and back.
//
// Wheel order is front-left, front-right, rear-left, rear-right, which is
// also the axis order on the bus (axes 0..3).

use serde::{Deserialize, Serialize};

use crate::config::{self, ConfigError};

/// Immutable per-robot geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JacobianParams {
    half_track_x: f64,
    half_track_y: f64,
    drive_constant: f64,
}

impl JacobianParams {
    /// Create validated geometry. All three values must be finite and > 0.
    pub fn new(
        half_track_x: f64,
        half_track_y: f64,
        drive_constant: f64,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            half_track_x: config::require_positive("half_track_x", half_track_x)?,
            half_track_y: config::require_positive("half_track_y", half_track_y)?,
            drive_constant: config::require_positive("drive_constant", drive_constant)?,
        })
    }

    /// Same geometry with a different wheel-speed scale
    pub fn with_drive_constant(self, drive_constant: f64) -> Result<Self, ConfigError> {
        Self::new(self.half_track_x, self.half_track_y, drive_constant)
    }

    pub fn half_track_x(&self) -> f64 {
        self.half_track_x
    }

    pub fn half_track_y(&self) -> f64 {
        self.half_track_y
    }

    pub fn drive_constant(&self) -> f64 {
        self.drive_constant
    }

    /// Lever arm of the rotational term
    pub fn alpha(&self) -> f64 {
        self.half_track_x + self.half_track_y
    }
}

/// Planar velocity (m/s, m/s, rad/s) or, for odometry, a planar displacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyTwist {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl BodyTwist {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Uniformly scale all three components
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.vx * factor, self.vy * factor, self.omega * factor)
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

/// One value per wheel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelVector {
    pub front_left: f64,  // axis 0
    pub front_right: f64, // axis 1
    pub rear_left: f64,   // axis 2
    pub rear_right: f64,  // axis 3
}

impl WheelVector {
    pub fn new(front_left: f64, front_right: f64, rear_left: f64, rear_right: f64) -> Self {
        Self {
            front_left,
            front_right,
            rear_left,
            rear_right,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Returns values as array [front_left, front_right, rear_left, rear_right]
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_left,
            self.rear_right,
        ]
    }
}

/// Wheel velocities (encoder ticks/s) to body twist.
///
/// J = 1/(4 dc) * [  1      1      1      1
///                  -1      1      1     -1
///                  -1/a    1/a   -1/a    1/a ]   with a = half_track_x + half_track_y
pub fn forward(wheels: &WheelVector, params: &JacobianParams) -> BodyTwist {
    let [fl, fr, rl, rr] = wheels.as_array();
    let a = 4.0 * params.drive_constant;
    let b = a * params.alpha();

    BodyTwist {
        vx: (fl + fr + rl + rr) / a,
        vy: (-fl + fr + rl - rr) / a,
        omega: (-fl + fr - rl + rr) / b,
    }
}

/// Body twist to wheel velocities (encoder ticks/s).
///
/// J_inv = dc * [ 1  -1  -a
///                1   1   a
///                1   1  -a
///                1  -1   a ]
///
/// `forward(inverse(t)) == t` holds for every twist. `inverse(forward(w)) == w`
/// holds for every wheel vector a rigid body can produce; the component along
/// [1, 1, -1, -1] (wheels fighting each other) has no body motion and is lost.
pub fn inverse(twist: &BodyTwist, params: &JacobianParams) -> WheelVector {
    let dc = params.drive_constant;
    let rot = params.alpha() * twist.omega;

    WheelVector {
        front_left: dc * (twist.vx - twist.vy - rot),
        front_right: dc * (twist.vx + twist.vy + rot),
        rear_left: dc * (twist.vx + twist.vy - rot),
        rear_right: dc * (twist.vx - twist.vy + rot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn params() -> JacobianParams {
        JacobianParams::new(0.39225, 0.303495, 626594.7934).unwrap()
    }

    fn unit_params() -> JacobianParams {
        params().with_drive_constant(1.0).unwrap()
    }

    fn assert_twist_close(actual: BodyTwist, expected: BodyTwist) {
        assert!(
            (actual.vx - expected.vx).abs() < EPS
                && (actual.vy - expected.vy).abs() < EPS
                && (actual.omega - expected.omega).abs() < EPS,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(JacobianParams::new(0.0, 0.3, 1.0).is_err());
        assert!(JacobianParams::new(0.4, -0.3, 1.0).is_err());
        assert!(JacobianParams::new(0.4, 0.3, 0.0).is_err());
        assert!(JacobianParams::new(0.4, 0.3, f64::NAN).is_err());
    }

    #[test]
    fn test_zero_velocity() {
        let wheels = inverse(&BodyTwist::zero(), &params());
        assert_eq!(wheels, WheelVector::zero());
        assert_eq!(forward(&WheelVector::zero(), &params()), BodyTwist::zero());
    }

    #[test]
    fn test_forward_motion() {
        // All wheels spin the same way with the same speed
        let wheels = inverse(&BodyTwist::new(0.1, 0.0, 0.0), &params());
        let values = wheels.as_array();
        assert!(values.iter().all(|&w| w > 0.0), "got {:?}", values);
        assert!(values.iter().all(|&w| (w - values[0]).abs() < EPS));
    }

    #[test]
    fn test_lateral_motion() {
        // Left is positive: front-left and rear-right run backwards
        let wheels = inverse(&BodyTwist::new(0.0, 0.1, 0.0), &params());
        assert!(wheels.front_left < 0.0);
        assert!(wheels.front_right > 0.0);
        assert!(wheels.rear_left > 0.0);
        assert!(wheels.rear_right < 0.0);
        assert!((wheels.front_left + wheels.front_right).abs() < EPS);
    }

    #[test]
    fn test_rotation_only() {
        let wheels = inverse(&BodyTwist::new(0.0, 0.0, 0.5), &params());
        assert!(wheels.front_left < 0.0 && wheels.rear_left < 0.0);
        assert!(wheels.front_right > 0.0 && wheels.rear_right > 0.0);

        // No net translation
        let twist = forward(&wheels, &params());
        assert!(twist.vx.abs() < EPS && twist.vy.abs() < EPS);
        assert!((twist.omega - 0.5).abs() < EPS);
    }

    #[test]
    fn test_reference_robot_forward_command() {
        let command = BodyTwist::new(0.1, 0.0, 0.0);
        let wheels = inverse(&command, &params());
        assert!((wheels.front_left - 62659.47934).abs() < 1e-6);
        assert_eq!(wheels.front_left, wheels.front_right);
        assert_eq!(wheels.rear_left, wheels.rear_right);
        assert_twist_close(forward(&wheels, &params()), command);
    }

    #[test]
    fn test_forward_of_inverse_is_identity() {
        let twists = [
            BodyTwist::new(0.3, -0.2, 0.7),
            BodyTwist::new(-1.5, 0.0, -0.1),
            BodyTwist::new(0.0, 2.0, 3.0),
            BodyTwist::new(1e-4, -1e-4, 1e-4),
        ];
        for twist in twists {
            assert_twist_close(forward(&inverse(&twist, &params()), &params()), twist);
        }
    }

    #[test]
    fn test_inverse_of_forward_on_rigid_motion() {
        let p = unit_params();
        for w in [
            WheelVector::new(0.1, 0.1, 0.1, 0.1),
            WheelVector::new(-0.1, 0.1, 0.1, -0.1),
            WheelVector::new(-0.1, 0.1, -0.1, 0.1),
            WheelVector::new(0.0, 0.1, 0.1, 0.0),
            WheelVector::new(0.3, -0.05, 0.15, 0.1),
        ] {
            let back = inverse(&forward(&w, &p), &p);
            for (a, b) in back.as_array().iter().zip(w.as_array()) {
                assert!((a - b).abs() < EPS, "expected {:?}, got {:?}", w, back);
            }
        }
    }

    #[test]
    fn test_counter_rotating_wheels_have_no_body_motion() {
        let twist = forward(&WheelVector::new(1.0, 1.0, -1.0, -1.0), &params());
        assert_twist_close(twist, BodyTwist::zero());
    }

    #[test]
    fn test_linearity() {
        let twist = BodyTwist::new(0.2, -0.1, 0.4);
        let single = inverse(&twist, &params()).as_array();
        let triple = inverse(&twist.scaled(3.0), &params()).as_array();
        for (s, t) in single.iter().zip(triple) {
            assert!((3.0 * s - t).abs() < 1e-6);
        }
    }

    #[test]
    fn test_wheel_patterns_to_body() {
        let p = params();
        // (wheels, sign of vx, sign of vy, sign of omega)
        let cases = [
            ([0.1, 0.1, 0.1, 0.1], 1.0, 0.0, 0.0),
            ([-0.1, -0.1, -0.1, -0.1], -1.0, 0.0, 0.0),
            ([-0.1, 0.1, 0.1, -0.1], 0.0, 1.0, 0.0),
            ([0.1, -0.1, -0.1, 0.1], 0.0, -1.0, 0.0),
            ([0.0, 0.1, 0.1, 0.0], 1.0, 1.0, 0.0),
            ([0.1, 0.0, 0.0, 0.1], 1.0, -1.0, 0.0),
            ([-0.1, 0.0, 0.0, -0.1], -1.0, 1.0, 0.0),
            ([0.0, -0.1, -0.1, 0.0], -1.0, -1.0, 0.0),
            ([-0.1, 0.1, -0.1, 0.1], 0.0, 0.0, 1.0),
            ([0.1, -0.1, 0.1, -0.1], 0.0, 0.0, -1.0),
        ];

        let sign = |v: f64| if v.abs() < EPS { 0.0 } else { v.signum() };
        for (wheels, sx, sy, sw) in cases {
            let twist = forward(&WheelVector::from_array(wheels), &p);
            assert_eq!(
                (sign(twist.vx), sign(twist.vy), sign(twist.omega)),
                (sx, sy, sw),
                "wheels {:?} gave {:?}",
                wheels,
                twist
            );
        }
    }
}
