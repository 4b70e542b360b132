// Drive core for the mecanum omni base with lifting torso
//
// Provides:
// - Mecanum forward/inverse kinematics (body twist <-> wheel velocities)
// - Velocity limiting, command assembly and dead-reckoning odometry
// - CiA 402 drive sequencing over the service bus
// - High-level driver API over a cyclic + service bus

pub mod actuator;
pub mod bus;
pub mod canopen;
pub mod command;
mod driver;
pub mod kinematics;
pub mod limiter;
pub mod odometry;
pub mod sim;

pub use actuator::{ActuatorController, ActuatorError, DriveState, DriveStatus, drive_status};
pub use bus::{AXIS_COUNT, CommStatus, CycleInput, CyclicBus, EncoderSnapshot, WHEEL_COUNT};
pub use canopen::{BusError, ServiceBus};
pub use command::{DeviceSetpoint, DriveCommandAssembler};
pub use driver::{DriveError, LinkWait, OdometryReading, OmniBase};
pub use kinematics::{BodyTwist, JacobianParams, WheelVector, forward, inverse};
pub use limiter::SpeedLimits;
pub use odometry::{OdometryEngine, Pose2D};
pub use sim::SimulatedBus;
