// Drive command assembly
//
// Limits the requested twist, converts it to wheel setpoints and packages it
// with the torso target for the cyclic bus write.

use tracing::{debug, info};

use super::bus::WHEEL_COUNT;
use super::kinematics::{BodyTwist, JacobianParams, inverse};
use super::limiter::{self, SpeedLimits};
use super::odometry::torso_ticks;

/// Torso profile-position parameters sent with every setpoint
pub const TORSO_PROFILE_VELOCITY: u32 = 250_000;
pub const TORSO_PROFILE_ACCELERATION: u32 = 1_000_000;
pub const TORSO_PROFILE_DECELERATION: u32 = 1_000_000;

/// Torso target for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoTarget {
    /// Target height (m)
    pub position: f64,
    /// Differs from the previous cycle's target
    pub changed: bool,
}

/// One-slot memory of the last torso target
#[derive(Debug, Clone, Default)]
pub struct TorsoTracker {
    last: Option<f64>,
}

impl TorsoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `position` as this cycle's target. The first target is always
    /// reported as changed.
    pub fn update(&mut self, position: f64) -> TorsoTarget {
        let changed = self.last != Some(position);
        self.last = Some(position);
        TorsoTarget { position, changed }
    }

    /// Last recorded target, if any
    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

/// Torso part of the cyclic setpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TorsoSetpoint {
    /// Target position in ticks
    pub target_position: i32,
    /// Start a new profile move towards `target_position`
    pub send_new_position: bool,
    pub profile_velocity: u32,
    pub profile_acceleration: u32,
    pub profile_deceleration: u32,
}

/// Setpoints handed to the bus layer each cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSetpoint {
    /// Wheel target velocities in ticks/s, wheel order
    pub target_velocity: [i32; WHEEL_COUNT],
    pub torso: TorsoSetpoint,
}

/// Turns twist + torso commands into device setpoints
#[derive(Debug, Clone)]
pub struct DriveCommandAssembler {
    params: JacobianParams,
    limits: SpeedLimits,
    torso: TorsoTracker,
}

impl DriveCommandAssembler {
    pub fn new(params: JacobianParams, limits: SpeedLimits) -> Self {
        Self {
            params,
            limits,
            torso: TorsoTracker::new(),
        }
    }

    pub fn params(&self) -> &JacobianParams {
        &self.params
    }

    pub fn limits(&self) -> &SpeedLimits {
        &self.limits
    }

    /// Last torso target handed out, if any
    pub fn last_torso_target(&self) -> Option<f64> {
        self.torso.last()
    }

    /// Build the setpoint for one cycle
    pub fn assemble(&mut self, twist: &BodyTwist, torso_position: f64) -> DeviceSetpoint {
        let (limited, scale) = limiter::limit(twist, &self.limits);
        if scale < 1.0 {
            debug!("Twist {:?} limited by factor {:.3}", twist, scale);
        }

        // inverse() already yields ticks/s
        let wheels = inverse(&limited, &self.params);
        let target_velocity = wheels.as_array().map(|v| v.round() as i32);

        let target = self.torso.update(torso_position);
        if target.changed {
            info!("New torso target: {:.4} m", target.position);
        }

        DeviceSetpoint {
            target_velocity,
            torso: TorsoSetpoint {
                target_position: torso_ticks(target.position),
                send_new_position: target.changed,
                profile_velocity: TORSO_PROFILE_VELOCITY,
                profile_acceleration: TORSO_PROFILE_ACCELERATION,
                profile_deceleration: TORSO_PROFILE_DECELERATION,
            },
        }
    }
}
