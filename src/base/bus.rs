// Cyclic process-data exchange with the drives
//
// Once per control cycle the bus layer reads encoder positions, status words
// and link health, and writes the assembled setpoint. The real-time transport
// itself is outside this crate.

use serde::{Deserialize, Serialize};

use super::canopen::Result;
use super::command::DeviceSetpoint;

/// Number of wheel drives (axes 0..3)
pub const WHEEL_COUNT: usize = 4;

/// Wheel drives plus the torso drive
pub const AXIS_COUNT: usize = 5;

/// Bus position of the torso drive
pub const TORSO_AXIS: usize = 4;

/// Working counter state at which all slaves exchange process data
pub const WORKING_COUNTER_OPERATIONAL: u8 = 2;

/// Encoder positions read in one cycle, in ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderSnapshot {
    /// front-left, front-right, rear-left, rear-right
    pub wheels: [i32; WHEEL_COUNT],
    pub torso: i32,
}

impl EncoderSnapshot {
    pub fn new(wheels: [i32; WHEEL_COUNT], torso: i32) -> Self {
        Self { wheels, torso }
    }
}

/// Link and health state of the bus, mirrored from the bus layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommStatus {
    pub slave_state: [u8; AXIS_COUNT],
    pub slave_online: [bool; AXIS_COUNT],
    pub slave_operational: [bool; AXIS_COUNT],
    pub master_link: bool,
    pub master_al_states: u8,
    pub master_slaves_responding: u32,
    pub working_counter: u32,
    pub working_counter_state: u8,
}

impl CommStatus {
    /// All slaves answered the last exchange
    pub fn is_operational(&self) -> bool {
        self.working_counter_state >= WORKING_COUNTER_OPERATIONAL
    }
}

/// Everything read from the bus in one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleInput {
    pub encoders: EncoderSnapshot,
    /// Raw status word per axis
    pub status: [u16; AXIS_COUNT],
    pub comm: CommStatus,
}

/// Periodic exchange with the drives
///
/// Setpoints and encoder positions are in wheel order (front left, front
/// right, rear left, rear right) with the kinematic sign convention.
/// Implementations map them onto the physical motor order and polarity.
pub trait CyclicBus {
    fn read_cycle(&mut self) -> Result<CycleInput>;

    fn write_cycle(&mut self, setpoint: &DeviceSetpoint) -> Result<()>;
}
