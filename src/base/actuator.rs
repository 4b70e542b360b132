// Drive power sequencing, status decoding and torso homing
//
// Every operation is a short series of service writes. Writes are issued in
// order and the first failure is returned to the caller; nothing is retried.

use tracing::{debug, info, warn};

use super::bus::{AXIS_COUNT, TORSO_AXIS};
use super::canopen::{
    BusError, ControlWord, DataWidth, Object, OperationMode, ParameterWrite,
    STATUSWORD_HOMING_ATTAINED_BIT, ServiceBus,
};

/// Error types for actuator sequencing
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Axis count {count} out of range (max {max})")]
    AxisCount { count: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Power state of one drive, as last commanded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriveState {
    #[default]
    Off,
    /// Fault reset issued
    Recovered,
    /// Shut down and switched on, not yet enabled
    Ready,
    Enabled,
    /// Torso only: homing procedure running
    Homing,
}

/// One row of the status display table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPattern {
    pub display: char,
    pub mask: u16,
    pub expected: u16,
}

impl StatusPattern {
    const fn new(display: char, expected: u16, mask: u16) -> Self {
        Self {
            display,
            mask,
            expected,
        }
    }

    pub fn matches(&self, status: u16) -> bool {
        status & self.mask == self.expected
    }

    /// Some raw status can produce this pattern
    pub fn is_reachable(&self) -> bool {
        self.expected & !self.mask == 0
    }
}

/// Status word patterns in decode order. Codes '5' and '6' are placeholders
/// that no status word matches.
pub const STATUS_TABLE: [StatusPattern; 10] = [
    StatusPattern::new('0', 0x00, 0x5f), // not ready to switch on
    StatusPattern::new('1', 0x40, 0x4f), // switch on disabled
    StatusPattern::new('2', 0x21, 0x6f), // ready to switch on
    StatusPattern::new('3', 0x33, 0x7f), // switched on
    StatusPattern::new('4', 0x37, 0x7f), // operation enabled
    StatusPattern::new('5', 0xff, 0x00),
    StatusPattern::new('6', 0xff, 0x00),
    StatusPattern::new('7', 0x17, 0x7f), // quick stop active
    StatusPattern::new('E', 0x0f, 0x4f), // fault reaction active
    StatusPattern::new('F', 0x08, 0x4f), // fault
];

/// Shown when no table entry matches
pub const STATUS_UNKNOWN: char = '?';

/// Bit shared by all drives when the emergency stop is pressed
pub const ESTOP_BIT: u16 = 0x80;

/// Display code for a raw status word
pub fn decode_status(status: u16) -> char {
    STATUS_TABLE
        .iter()
        .find(|pattern| pattern.matches(status))
        .map_or(STATUS_UNKNOWN, |pattern| pattern.display)
}

/// Homing attained bit of the status word
pub fn homing_reached(status_word: u16) -> bool {
    status_word & (1 << STATUSWORD_HOMING_ATTAINED_BIT) != 0
}

/// Decoded status of all drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DriveStatus {
    /// Wheel drives 0..3, then the torso
    pub display: [char; AXIS_COUNT],
    pub estop: bool,
}

/// Decode every axis and the aggregate emergency stop
pub fn drive_status(status: &[u16; AXIS_COUNT]) -> DriveStatus {
    let all = status.iter().fold(u16::MAX, |acc, &s| acc & s);
    DriveStatus {
        display: status.map(decode_status),
        estop: all & ESTOP_BIT != 0,
    }
}

/// Per-drive power sequencing over a service bus
#[derive(Debug, Clone, Default)]
pub struct ActuatorController {
    states: [DriveState; AXIS_COUNT],
}

impl ActuatorController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last commanded state of `axis`
    pub fn state(&self, axis: usize) -> Option<DriveState> {
        self.states.get(axis).copied()
    }

    pub fn states(&self) -> [DriveState; AXIS_COUNT] {
        self.states
    }

    fn check_count(count: usize) -> Result<()> {
        if count > AXIS_COUNT {
            return Err(ActuatorError::AxisCount {
                count,
                max: AXIS_COUNT,
            });
        }
        Ok(())
    }

    fn write(bus: &mut impl ServiceBus, write: ParameterWrite) -> Result<()> {
        if !bus.is_available() {
            warn!(
                "Bus unavailable for write to axis {} object 0x{:04X}",
                write.axis, write.index
            );
            return Err(BusError::Unavailable {
                index: write.index,
                value: write.value,
            }
            .into());
        }
        debug!(
            "Write axis {}: 0x{:04X}:{} = {} ({} bits)",
            write.axis,
            write.index,
            write.subindex,
            write.value,
            write.width.bits()
        );
        bus.write_parameter(&write)?;
        Ok(())
    }

    fn control_word(bus: &mut impl ServiceBus, axis: usize, word: ControlWord) -> Result<()> {
        Self::write(bus, ParameterWrite::control_word(axis as u16, word))
    }

    /// Disable drives 0..count
    pub fn power_off(&mut self, bus: &mut impl ServiceBus, count: usize) -> Result<()> {
        Self::check_count(count)?;
        info!("Powering off {} drives", count);
        for axis in 0..count {
            Self::control_word(bus, axis, ControlWord::DisableVoltage)?;
            self.states[axis] = DriveState::Off;
        }
        Ok(())
    }

    /// Reset latched faults on every drive
    pub fn recover(&mut self, bus: &mut impl ServiceBus) -> Result<()> {
        info!("Resetting drive faults");
        for axis in 0..AXIS_COUNT {
            Self::control_word(bus, axis, ControlWord::FaultReset)?;
            self.states[axis] = DriveState::Recovered;
        }
        Ok(())
    }

    /// Run shutdown, switch-on, enable-operation on drives 0..count.
    ///
    /// Each step goes to all drives before the next one starts; the order
    /// within one drive is always the same.
    pub fn power_on(&mut self, bus: &mut impl ServiceBus, count: usize) -> Result<()> {
        Self::check_count(count)?;
        info!("Powering on {} drives", count);
        for word in [ControlWord::Shutdown, ControlWord::SwitchOn] {
            for axis in 0..count {
                Self::control_word(bus, axis, word)?;
            }
        }
        for axis in 0..count {
            self.states[axis] = DriveState::Ready;
        }
        for axis in 0..count {
            Self::control_word(bus, axis, ControlWord::EnableOperation)?;
            self.states[axis] = DriveState::Enabled;
        }
        Ok(())
    }

    /// Put drives 0..count into profile velocity mode
    pub fn configure_velocity_mode(&mut self, bus: &mut impl ServiceBus, count: usize) -> Result<()> {
        Self::check_count(count)?;
        for axis in 0..count {
            Self::write(
                bus,
                ParameterWrite::mode(axis as u16, OperationMode::ProfileVelocity),
            )?;
        }
        Ok(())
    }

    /// Profile parameters and profile position mode for the torso
    pub fn configure_torso_position_mode(&mut self, bus: &mut impl ServiceBus) -> Result<()> {
        let axis = TORSO_AXIS as u16;
        let writes = [
            ParameterWrite::new(axis, Object::ProfileVelocity, 0, 200_000, DataWidth::UInt32),
            ParameterWrite::new(axis, Object::ProfileAcceleration, 0, 10_000_000, DataWidth::UInt32),
            ParameterWrite::new(axis, Object::ProfileDeceleration, 0, 10_000_000, DataWidth::UInt32),
            ParameterWrite::new(axis, Object::QuickStopDeceleration, 0, 10_000_000, DataWidth::UInt32),
            ParameterWrite::new(axis, Object::MotionProfileType, 0, 0, DataWidth::Int16),
            ParameterWrite::mode(axis, OperationMode::ProfilePosition),
        ];
        for write in writes {
            Self::write(bus, write)?;
        }
        Ok(())
    }

    /// Start the torso homing procedure
    pub fn start_homing(&mut self, bus: &mut impl ServiceBus) -> Result<()> {
        let axis = TORSO_AXIS as u16;
        info!("Starting torso homing");
        let writes = [
            ParameterWrite::new(axis, Object::HomingSpeeds, 1, 200_000, DataWidth::UInt32), // search
            ParameterWrite::new(axis, Object::HomingSpeeds, 2, 20_000, DataWidth::UInt32),  // slow
            ParameterWrite::new(axis, Object::HomingAcceleration, 0, 10_000_000, DataWidth::UInt32),
            ParameterWrite::new(axis, Object::HomingMethod, 0, 2, DataWidth::Int8),
            ParameterWrite::new(axis, Object::HomeOffset, 0, 0, DataWidth::Int32),
            ParameterWrite::mode(axis, OperationMode::Homing),
            ParameterWrite::control_word(axis, ControlWord::EnableOperation),
            ParameterWrite::control_word(axis, ControlWord::StartHoming),
        ];
        for write in writes {
            Self::write(bus, write)?;
        }
        self.states[TORSO_AXIS] = DriveState::Homing;
        Ok(())
    }

    /// Switch the torso back to profile position mode after homing
    pub fn finish_homing(&mut self, bus: &mut impl ServiceBus) -> Result<()> {
        Self::write(
            bus,
            ParameterWrite::mode(TORSO_AXIS as u16, OperationMode::ProfilePosition),
        )?;
        self.states[TORSO_AXIS] = DriveState::Enabled;
        info!("Torso homing finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::bus::WHEEL_COUNT;

    /// Records writes; optionally fails on the n-th one
    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<ParameterWrite>,
        unavailable: bool,
        fail_at: Option<usize>,
    }

    impl ServiceBus for RecordingBus {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        fn write_parameter(&mut self, write: &ParameterWrite) -> std::result::Result<(), BusError> {
            if self.fail_at == Some(self.writes.len()) {
                return Err(BusError::ServiceWrite {
                    axis: write.axis,
                    index: write.index,
                    subindex: write.subindex,
                    code: -5,
                });
            }
            self.writes.push(*write);
            Ok(())
        }
    }

    fn control_words(bus: &RecordingBus) -> Vec<(u16, i32)> {
        bus.writes
            .iter()
            .filter(|w| w.index == Object::ControlWord as u16)
            .map(|w| (w.axis, w.value))
            .collect()
    }

    #[test]
    fn test_decode_reachable_table_entries() {
        for pattern in STATUS_TABLE.iter().filter(|p| p.is_reachable()) {
            assert_eq!(
                decode_status(pattern.expected),
                pattern.display,
                "pattern {:?}",
                pattern
            );
        }
        assert_eq!(STATUS_TABLE.iter().filter(|p| p.is_reachable()).count(), 8);
    }

    #[test]
    fn test_placeholder_codes_never_match() {
        for status in 0..=u16::MAX {
            let code = decode_status(status);
            assert!(code != '5' && code != '6', "status 0x{:04X}", status);
        }
    }

    #[test]
    fn test_decode_ignores_unmasked_bits() {
        // Operation enabled with warning and remote bits set
        assert_eq!(decode_status(0x37 | 0x80 | 0x200), '4');
        assert_eq!(decode_status(0x40 | 0x30), '1');
    }

    #[test]
    fn test_decode_unknown() {
        assert_eq!(decode_status(0x7f), STATUS_UNKNOWN);
    }

    #[test]
    fn test_homing_reached() {
        assert!(homing_reached(1 << 12));
        assert!(homing_reached(0x1237));
        assert!(!homing_reached(0));
        assert!(!homing_reached(!(1 << 12)));
        for bit in (0..16).filter(|&b| b != 12) {
            assert!(!homing_reached(1 << bit));
        }
    }

    #[test]
    fn test_drive_status_estop() {
        let status = drive_status(&[0xB7, 0xB7, 0xB7, 0xB7, 0xB7]);
        assert_eq!(status.display, ['4'; 5]);
        assert!(status.estop);

        // One drive without the bit clears the flag
        let status = drive_status(&[0xB7, 0x37, 0xB7, 0xB7, 0x88]);
        assert!(!status.estop);
        assert_eq!(status.display[4], 'F');
    }

    #[test]
    fn test_power_on_order() {
        let mut bus = RecordingBus::default();
        let mut ctrl = ActuatorController::new();
        ctrl.power_on(&mut bus, AXIS_COUNT).unwrap();

        let words = control_words(&bus);
        assert_eq!(words.len(), 15);
        for axis in 0..AXIS_COUNT as u16 {
            let sequence: Vec<i32> = words
                .iter()
                .filter(|(a, _)| *a == axis)
                .map(|&(_, v)| v)
                .collect();
            assert_eq!(sequence, vec![0x06, 0x07, 0x0F]);
        }
        assert_eq!(ctrl.states(), [DriveState::Enabled; AXIS_COUNT]);
    }

    #[test]
    fn test_power_off_and_recover() {
        let mut bus = RecordingBus::default();
        let mut ctrl = ActuatorController::new();
        ctrl.recover(&mut bus).unwrap();
        assert_eq!(ctrl.state(0), Some(DriveState::Recovered));
        ctrl.power_off(&mut bus, 4).unwrap();

        let words = control_words(&bus);
        assert_eq!(&words[..5], &[(0, 0x80), (1, 0x80), (2, 0x80), (3, 0x80), (4, 0x80)]);
        assert_eq!(&words[5..], &[(0, 0x00), (1, 0x00), (2, 0x00), (3, 0x00)]);
        assert_eq!(ctrl.state(0), Some(DriveState::Off));
        assert_eq!(ctrl.state(TORSO_AXIS), Some(DriveState::Recovered));
        assert_eq!(ctrl.state(AXIS_COUNT), None);
    }

    #[test]
    fn test_axis_count_checked() {
        let mut bus = RecordingBus::default();
        let mut ctrl = ActuatorController::new();
        assert!(matches!(
            ctrl.power_on(&mut bus, 6),
            Err(ActuatorError::AxisCount { count: 6, max: 5 })
        ));
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn test_unavailable_bus_refused() {
        let mut bus = RecordingBus {
            unavailable: true,
            ..Default::default()
        };
        let mut ctrl = ActuatorController::new();
        assert!(matches!(
            ctrl.power_off(&mut bus, AXIS_COUNT),
            Err(ActuatorError::Bus(BusError::Unavailable { index: 0x6040, .. }))
        ));
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn test_failure_forwarded_without_retry() {
        let mut bus = RecordingBus {
            fail_at: Some(2),
            ..Default::default()
        };
        let mut ctrl = ActuatorController::new();
        let err = ctrl.power_on(&mut bus, AXIS_COUNT).unwrap_err();
        assert!(matches!(
            err,
            ActuatorError::Bus(BusError::ServiceWrite { axis: 2, code: -5, .. })
        ));
        assert_eq!(bus.writes.len(), 2);
        assert_eq!(ctrl.state(0), Some(DriveState::Off));
    }

    #[test]
    fn test_velocity_mode() {
        let mut bus = RecordingBus::default();
        ActuatorController::new()
            .configure_velocity_mode(&mut bus, WHEEL_COUNT)
            .unwrap();
        assert_eq!(bus.writes.len(), 4);
        for (axis, write) in (0..WHEEL_COUNT).zip(&bus.writes) {
            assert_eq!(write.axis as usize, axis);
            assert_eq!(write.index, 0x6060);
            assert_eq!(write.value, 3);
            assert_eq!(write.width, DataWidth::Int8);
        }
    }

    #[test]
    fn test_torso_position_mode() {
        let mut bus = RecordingBus::default();
        ActuatorController::new()
            .configure_torso_position_mode(&mut bus)
            .unwrap();
        let objects: Vec<(u16, i32)> = bus.writes.iter().map(|w| (w.index, w.value)).collect();
        assert_eq!(
            objects,
            vec![
                (0x6081, 200_000),
                (0x6083, 10_000_000),
                (0x6084, 10_000_000),
                (0x6085, 10_000_000),
                (0x6086, 0),
                (0x6060, 1),
            ]
        );
        assert!(bus.writes.iter().all(|w| w.axis == TORSO_AXIS as u16));
    }

    #[test]
    fn test_homing_sequence() {
        let mut bus = RecordingBus::default();
        let mut ctrl = ActuatorController::new();
        ctrl.start_homing(&mut bus).unwrap();

        let objects: Vec<(u16, u8, i32)> = bus
            .writes
            .iter()
            .map(|w| (w.index, w.subindex, w.value))
            .collect();
        assert_eq!(
            objects,
            vec![
                (0x6099, 1, 200_000),
                (0x6099, 2, 20_000),
                (0x609A, 0, 10_000_000),
                (0x6098, 0, 2),
                (0x607C, 0, 0),
                (0x6060, 0, 6),
                (0x6040, 0, 0x0F),
                (0x6040, 0, 0x1F),
            ]
        );
        assert_eq!(ctrl.state(TORSO_AXIS), Some(DriveState::Homing));

        ctrl.finish_homing(&mut bus).unwrap();
        assert_eq!(bus.writes.last().map(|w| (w.index, w.value)), Some((0x6060, 1)));
        assert_eq!(ctrl.state(TORSO_AXIS), Some(DriveState::Enabled));
    }
}
