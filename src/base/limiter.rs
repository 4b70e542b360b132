// Velocity limiting for body twist commands
//
// Produces one scale factor in (0, 1] per command. The caller scales the
// whole twist by it before running inverse kinematics, so the direction of
// motion is preserved.

use crate::config::{self, ConfigError};

use super::kinematics::BodyTwist;

/// Speed bounds of the base
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimits {
    /// Any point on the body may move this fast (m/s)
    cartesian: f64,
    /// A single wheel may move this fast (m/s)
    wheel: f64,
    /// Outer radius of the body (m)
    body_radius: f64,
}

impl SpeedLimits {
    pub fn new(cartesian: f64, wheel: f64, body_radius: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            cartesian: config::require_positive("cartesian_speed_limit", cartesian)?,
            wheel: config::require_positive("wheel_speed_limit", wheel)?,
            body_radius: config::require_positive("body_radius", body_radius)?,
        })
    }

    pub fn cartesian(&self) -> f64 {
        self.cartesian
    }

    pub fn wheel(&self) -> f64 {
        self.wheel
    }

    pub fn body_radius(&self) -> f64 {
        self.body_radius
    }
}

/// `limit / demand`, or no correction when nothing is demanded
fn correction(limit: f64, demand: f64) -> f64 {
    if demand > 0.0 { limit / demand } else { 1.0 }
}

/// Scale factor that keeps `twist` inside `limits`.
///
/// - cartesian bound: translation plus the rotational speed at the outer radius
/// - wheel bound: x, y and rotation add up constructively on some wheel
pub fn scale_factor(twist: &BodyTwist, limits: &SpeedLimits) -> f64 {
    let translation = twist.vx.hypot(twist.vy);
    let corr_cart = correction(
        limits.cartesian,
        translation + limits.body_radius * twist.omega.abs(),
    );
    let corr_wheel = correction(
        limits.wheel,
        twist.vx.abs() + twist.vy.abs() + twist.omega.abs(),
    );

    1.0_f64.min(corr_cart).min(corr_wheel)
}

/// Scale `twist` into `limits`, returning the limited twist and the factor applied
pub fn limit(twist: &BodyTwist, limits: &SpeedLimits) -> (BodyTwist, f64) {
    let scale = scale_factor(twist, limits);
    (twist.scaled(scale), scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn limits() -> SpeedLimits {
        SpeedLimits::new(0.5, 1.0, 0.7).unwrap()
    }

    #[test]
    fn test_zero_twist_is_unscaled() {
        let scale = scale_factor(&BodyTwist::zero(), &limits());
        assert_eq!(scale, 1.0);
        assert!(scale.is_finite());
    }

    #[test]
    fn test_within_limits_is_unscaled() {
        assert_eq!(scale_factor(&BodyTwist::new(0.1, 0.05, 0.1), &limits()), 1.0);
    }

    #[test]
    fn test_exactly_at_cartesian_limit() {
        assert_eq!(scale_factor(&BodyTwist::new(0.5, 0.0, 0.0), &limits()), 1.0);
    }

    #[test]
    fn test_multiple_of_cartesian_limit() {
        for k in [1.5, 2.0, 4.0, 10.0] {
            let scale = scale_factor(&BodyTwist::new(0.0, 0.5 * k, 0.0), &limits());
            assert!((scale - 1.0 / k).abs() < EPS, "k={} scale={}", k, scale);
        }
    }

    #[test]
    fn test_rotation_uses_body_radius() {
        // 0.7 m radius at 1 rad/s is 0.7 m/s at the rim
        let scale = scale_factor(&BodyTwist::new(0.0, 0.0, 1.0), &limits());
        assert!((scale - 0.5 / 0.7).abs() < EPS);
    }

    #[test]
    fn test_wheel_limit_dominates() {
        // Generous cartesian bound leaves the wheel bound in charge
        let limits = SpeedLimits::new(10.0, 1.0, 0.1).unwrap();
        let scale = scale_factor(&BodyTwist::new(1.0, 1.0, 0.0), &limits);
        assert!((scale - 0.5).abs() < EPS);
    }

    #[test]
    fn test_scale_always_in_unit_interval() {
        let twists = [
            BodyTwist::new(100.0, -3.0, 0.1),
            BodyTwist::new(-0.01, 0.0, 0.0),
            BodyTwist::new(0.0, 0.0, -50.0),
            BodyTwist::new(1e-9, 1e-9, 1e-9),
            BodyTwist::new(3.0, 4.0, 5.0),
        ];
        for twist in twists {
            let scale = scale_factor(&twist, &limits());
            assert!(scale > 0.0 && scale <= 1.0, "{:?} -> {}", twist, scale);
        }
    }

    #[test]
    fn test_limit_preserves_direction() {
        let twist = BodyTwist::new(2.0, -1.0, 0.5);
        let (limited, scale) = limit(&twist, &limits());
        assert!(scale < 1.0);
        assert!((limited.vx / limited.vy - twist.vx / twist.vy).abs() < EPS);
        assert!((limited.omega - twist.omega * scale).abs() < EPS);
    }
}
