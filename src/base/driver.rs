// High-level driver for the omni base
//
// Combines command assembly, odometry and actuator sequencing over one bus
// to provide a simple per-cycle API.

use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BaseConfig, ConfigError, LINK_WAIT_ATTEMPTS, LINK_WAIT_INTERVAL};

use super::actuator::{ActuatorController, ActuatorError, DriveStatus, drive_status, homing_reached};
use super::bus::{AXIS_COUNT, CommStatus, CycleInput, CyclicBus, TORSO_AXIS, WHEEL_COUNT};
use super::canopen::{BusError, ServiceBus};
use super::command::{DeviceSetpoint, DriveCommandAssembler};
use super::kinematics::BodyTwist;
use super::odometry::{OdometryEngine, Pose2D, torso_position};

/// Error types for the base driver
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Bus link not operational after {attempts} polls (working counter state {state})")]
    LinkTimeout { attempts: u32, state: u8 },
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// How long to wait for the bus link during initialization
#[derive(Debug, Clone, Copy)]
pub struct LinkWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LinkWait {
    fn default() -> Self {
        Self {
            attempts: LINK_WAIT_ATTEMPTS,
            interval: LINK_WAIT_INTERVAL,
        }
    }
}

/// Result of one odometry cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometryReading {
    pub pose: Pose2D,
    /// Torso height (m)
    pub torso_position: f64,
}

/// High-level driver for the mecanum base and torso
pub struct OmniBase<B: CyclicBus + ServiceBus> {
    bus: B,
    actuators: ActuatorController,
    assembler: DriveCommandAssembler,
    odometry: OdometryEngine,
    last_input: CycleInput,
}

impl<B: CyclicBus + ServiceBus> OmniBase<B> {
    /// Create a driver over `bus`. The configuration is validated here, once.
    pub fn new(bus: B, config: &BaseConfig) -> Result<Self> {
        config.validate()?;
        let params = config.jacobian()?;
        Ok(Self {
            bus,
            actuators: ActuatorController::new(),
            assembler: DriveCommandAssembler::new(params, config.speed_limits()?),
            odometry: OdometryEngine::new(
                params,
                config.odometry_constant,
                config.odometry_correction,
            )?,
            last_input: CycleInput::default(),
        })
    }

    /// Bring the drives up for velocity control
    ///
    /// Powers everything off, waits for the bus link, configures the wheel
    /// and torso modes, resets faults and powers on.
    pub fn initialize(&mut self, wait: LinkWait) -> Result<()> {
        info!("Initializing omni base");
        self.actuators.power_off(&mut self.bus, AXIS_COUNT)?;
        self.wait_for_link(wait)?;

        self.actuators
            .configure_velocity_mode(&mut self.bus, WHEEL_COUNT)?;
        self.actuators
            .configure_torso_position_mode(&mut self.bus)?;
        self.actuators.recover(&mut self.bus)?;
        self.actuators.power_on(&mut self.bus, AXIS_COUNT)?;

        info!("Omni base initialized successfully");
        Ok(())
    }

    fn wait_for_link(&mut self, wait: LinkWait) -> Result<()> {
        let mut state = 0;
        for attempt in 0..wait.attempts {
            let input = self.bus.read_cycle()?;
            self.last_input = input;
            state = input.comm.working_counter_state;
            debug!("Working counter state {} (poll {})", state, attempt + 1);
            if input.comm.is_operational() {
                return Ok(());
            }
            sleep(wait.interval);
        }
        warn!("Bus link did not come up, working counter state {}", state);
        Err(DriveError::LinkTimeout {
            attempts: wait.attempts,
            state,
        })
    }

    /// Send one cycle's body twist and torso target
    pub fn drive(&mut self, twist: &BodyTwist, torso_position: f64) -> Result<DeviceSetpoint> {
        let setpoint = self.assembler.assemble(twist, torso_position);
        self.bus.write_cycle(&setpoint)?;
        Ok(setpoint)
    }

    /// Read one cycle and integrate odometry
    pub fn odometry(&mut self) -> Result<OdometryReading> {
        let input = self.bus.read_cycle()?;
        self.last_input = input;
        Ok(OdometryReading {
            pose: self.odometry.update(&input.encoders),
            torso_position: torso_position(&input.encoders),
        })
    }

    /// Current pose estimate (a copy)
    pub fn pose(&self) -> Pose2D {
        self.odometry.pose()
    }

    /// Replace the odometry drift correction
    pub fn set_odometry_correction(&mut self, drift: f64) -> Result<()> {
        self.odometry.set_correction(drift)?;
        Ok(())
    }

    /// Drive status decoded from the last cycle read
    pub fn status(&self) -> DriveStatus {
        drive_status(&self.last_input.status)
    }

    /// Bus health from the last cycle read
    pub fn comm_status(&self) -> CommStatus {
        self.last_input.comm
    }

    /// Start homing the torso axis
    pub fn home_torso(&mut self) -> Result<()> {
        self.actuators.start_homing(&mut self.bus)?;
        Ok(())
    }

    /// Whether the torso reported homing attained in the last cycle read
    pub fn torso_homed(&self) -> bool {
        homing_reached(self.last_input.status[TORSO_AXIS])
    }

    /// Return the torso to position control once homed
    pub fn finish_torso_homing(&mut self) -> Result<()> {
        self.actuators.finish_homing(&mut self.bus)?;
        Ok(())
    }

    /// Reset drive faults and power everything back on
    pub fn recover(&mut self) -> Result<()> {
        self.actuators.recover(&mut self.bus)?;
        self.actuators.power_on(&mut self.bus, AXIS_COUNT)?;
        Ok(())
    }

    pub fn actuators(&self) -> &ActuatorController {
        &self.actuators
    }

    /// Stop the base and disable all drives
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down omni base");
        self.stop()?;
        self.actuators.power_off(&mut self.bus, AXIS_COUNT)?;
        Ok(())
    }

    /// Command zero velocity, holding the torso at its last target
    pub fn stop(&mut self) -> Result<()> {
        let torso = self
            .assembler
            .last_torso_target()
            .unwrap_or_else(|| torso_position(&self.last_input.encoders));
        self.drive(&BodyTwist::zero(), torso)?;
        Ok(())
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

impl<B: CyclicBus + ServiceBus> Drop for OmniBase<B> {
    fn drop(&mut self) {
        // Try to stop the base when the driver is dropped
        if let Err(e) = self.stop() {
            warn!("Failed to stop base on drop: {}", e);
        }
    }
}
