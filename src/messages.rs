// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::base::{BodyTwist, CommStatus, DriveStatus, OdometryReading};
use crate::config::{TORSO_MAX_POSITION, TORSO_MIN_POSITION};

/// Reasons a received command is refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("{field} is not finite")]
    NonFinite { field: &'static str },

    #[error("Torso target {0} m outside the travel range")]
    TorsoOutOfRange(f64),
}

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseCommand {
    /// Forward velocity (m/s)
    pub x_vel: f64,
    /// Leftward velocity (m/s)
    pub y_vel: f64,
    /// Counter-clockwise rotation (rad/s)
    pub theta_vel: f64,
    /// Torso height target (m); absent keeps the previous target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torso_pos: Option<f64>,
}

impl BaseCommand {
    /// Reject non-finite velocities and torso targets outside the travel range
    pub fn check(&self) -> Result<(), CommandError> {
        for (field, value) in [
            ("x_vel", self.x_vel),
            ("y_vel", self.y_vel),
            ("theta_vel", self.theta_vel),
        ] {
            if !value.is_finite() {
                return Err(CommandError::NonFinite { field });
            }
        }
        match self.torso_pos {
            Some(torso) if !torso.is_finite() => Err(CommandError::NonFinite { field: "torso_pos" }),
            Some(torso) if !(TORSO_MIN_POSITION..=TORSO_MAX_POSITION).contains(&torso) => {
                Err(CommandError::TorsoOutOfRange(torso))
            }
            _ => Ok(()),
        }
    }
}

impl From<&BaseCommand> for BodyTwist {
    fn from(cmd: &BaseCommand) -> Self {
        BodyTwist::new(cmd.x_vel, cmd.y_vel, cmd.theta_vel)
    }
}

/// Pose estimate published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OdometryMessage {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub torso_pos: f64,
}

impl From<&OdometryReading> for OdometryMessage {
    fn from(reading: &OdometryReading) -> Self {
        Self {
            x: reading.pose.x,
            y: reading.pose.y,
            theta: reading.pose.theta,
            torso_pos: reading.torso_position,
        }
    }
}

/// Drive and bus status published by runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrivesMessage {
    pub status: DriveStatus,
    pub comm: CommStatus,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    BusFault,
}
