// In-process bus for running the base without hardware
//
// Integrates commanded wheel velocities into encoder positions, answers
// control words with the matching CiA 402 status words, and records every
// service write so tests can inspect the sequence.

use std::time::Duration;

use tracing::debug;

use super::bus::{
    AXIS_COUNT, CommStatus, CycleInput, CyclicBus, EncoderSnapshot, TORSO_AXIS, WHEEL_COUNT,
    WORKING_COUNTER_OPERATIONAL,
};
use super::canopen::{
    BusError, ControlWord, Object, OperationMode, ParameterWrite, Result,
    STATUSWORD_HOMING_ATTAINED_BIT, ServiceBus,
};
use super::command::DeviceSetpoint;

/// Status words reported for each power state
const STATUS_SWITCH_ON_DISABLED: u16 = 0x40;
const STATUS_READY_TO_SWITCH_ON: u16 = 0x21;
const STATUS_SWITCHED_ON: u16 = 0x33;
const STATUS_OPERATION_ENABLED: u16 = 0x37;
const STATUS_FAULT: u16 = 0x08;

/// The drives count encoder ticks against the commanded velocity sign
const FEEDBACK_POLARITY: f64 = -1.0;

/// Simulated bus master with five drives
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    period: Duration,
    available: bool,
    /// Reads still needed before the working counter is operational
    link_delay: u32,
    positions: [f64; AXIS_COUNT],
    status: [u16; AXIS_COUNT],
    modes: [Option<i32>; AXIS_COUNT],
    estop: bool,
    setpoint: DeviceSetpoint,
    writes: Vec<ParameterWrite>,
    fail_writes: bool,
}

impl SimulatedBus {
    /// Bus advancing `period` per cycle
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            available: true,
            link_delay: 0,
            positions: [0.0; AXIS_COUNT],
            status: [STATUS_SWITCH_ON_DISABLED; AXIS_COUNT],
            modes: [None; AXIS_COUNT],
            estop: false,
            setpoint: DeviceSetpoint::default(),
            writes: Vec::new(),
            fail_writes: false,
        }
    }

    /// Working counter reaches the operational state after `reads` cycles
    pub fn with_link_delay(mut self, reads: u32) -> Self {
        self.link_delay = reads;
        self
    }

    /// Bus master not initialized: service writes are refused
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Reject every service write with an error code
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Latch a fault on one drive
    pub fn inject_fault(&mut self, axis: usize) {
        if let Some(status) = self.status.get_mut(axis) {
            *status = STATUS_FAULT;
        }
    }

    pub fn set_estop(&mut self, pressed: bool) {
        self.estop = pressed;
    }

    /// Every service write received so far
    pub fn writes(&self) -> &[ParameterWrite] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Last setpoint written
    pub fn setpoint(&self) -> &DeviceSetpoint {
        &self.setpoint
    }

    /// Mode of operation last written to `axis`
    pub fn mode(&self, axis: usize) -> Option<i32> {
        self.modes.get(axis).copied().flatten()
    }

    fn apply_control_word(&mut self, axis: usize, word: i32) {
        let current = self.status[axis];
        let faulted = current & 0x4f == STATUS_FAULT;
        let next = match word {
            w if w == ControlWord::FaultReset as i32 => STATUS_SWITCH_ON_DISABLED,
            _ if faulted => current,
            w if w == ControlWord::DisableVoltage as i32 => STATUS_SWITCH_ON_DISABLED,
            w if w == ControlWord::Shutdown as i32 => STATUS_READY_TO_SWITCH_ON,
            w if w == ControlWord::SwitchOn as i32 => STATUS_SWITCHED_ON,
            w if w == ControlWord::EnableOperation as i32 => STATUS_OPERATION_ENABLED,
            w if w == ControlWord::StartHoming as i32 => {
                if self.modes[axis] == Some(OperationMode::Homing as i32) {
                    STATUS_OPERATION_ENABLED | (1 << STATUSWORD_HOMING_ATTAINED_BIT)
                } else {
                    STATUS_OPERATION_ENABLED
                }
            }
            _ => current,
        };
        self.status[axis] = next;
    }

    fn comm_status(&self) -> CommStatus {
        let operational = self.link_delay == 0;
        let responding = if operational { AXIS_COUNT as u32 } else { 0 };
        CommStatus {
            slave_state: [if operational { 8 } else { 1 }; AXIS_COUNT],
            slave_online: [true; AXIS_COUNT],
            slave_operational: [operational; AXIS_COUNT],
            master_link: true,
            master_al_states: if operational { 8 } else { 1 },
            master_slaves_responding: responding,
            working_counter: responding * 3,
            working_counter_state: if operational {
                WORKING_COUNTER_OPERATIONAL
            } else {
                0
            },
        }
    }
}

impl CyclicBus for SimulatedBus {
    fn read_cycle(&mut self) -> Result<CycleInput> {
        let comm = self.comm_status();
        self.link_delay = self.link_delay.saturating_sub(1);

        let dt = self.period.as_secs_f64();
        for axis in 0..WHEEL_COUNT {
            if self.status[axis] == STATUS_OPERATION_ENABLED {
                self.positions[axis] +=
                    FEEDBACK_POLARITY * self.setpoint.target_velocity[axis] as f64 * dt;
            }
        }

        let mut status = self.status;
        if self.estop {
            for s in &mut status {
                *s |= 0x80;
            }
        }

        let wheels: [i32; WHEEL_COUNT] =
            std::array::from_fn(|axis| self.positions[axis].round() as i32);
        Ok(CycleInput {
            encoders: EncoderSnapshot::new(wheels, self.positions[TORSO_AXIS].round() as i32),
            status,
            comm,
        })
    }

    fn write_cycle(&mut self, setpoint: &DeviceSetpoint) -> Result<()> {
        // Torso profile move completes within one cycle
        let torso_enabled = self.status[TORSO_AXIS] & 0x7f == STATUS_OPERATION_ENABLED;
        if setpoint.torso.send_new_position && torso_enabled {
            self.positions[TORSO_AXIS] = setpoint.torso.target_position as f64;
        }
        self.setpoint = *setpoint;
        Ok(())
    }
}

impl ServiceBus for SimulatedBus {
    fn is_available(&self) -> bool {
        self.available
    }

    fn write_parameter(&mut self, write: &ParameterWrite) -> Result<()> {
        let axis = write.axis as usize;
        if self.fail_writes || axis >= AXIS_COUNT {
            return Err(BusError::ServiceWrite {
                axis: write.axis,
                index: write.index,
                subindex: write.subindex,
                code: -1,
            });
        }

        debug!("Simulated write: {:?}", write);
        if write.index == Object::ControlWord as u16 {
            self.apply_control_word(axis, write.value);
        } else if write.index == Object::ModesOfOperation as u16 {
            self.modes[axis] = Some(write.value);
        }
        self.writes.push(*write);
        Ok(())
    }
}
