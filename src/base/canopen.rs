// CiA 402 drive profile objects and the service-write seam
//
// Drives are configured through addressed parameter writes (SDO style):
// [axis, object index, subindex, value truncated to the object's width].
// The transport that carries them lives outside this crate and is reached
// through the `ServiceBus` trait.

/// Object dictionary indices used by the base
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Object {
    ControlWord = 0x6040,           // u16
    StatusWord = 0x6041,            // u16, read-only
    ModesOfOperation = 0x6060,      // i8
    HomeOffset = 0x607C,            // i32
    ProfileVelocity = 0x6081,       // u32
    ProfileAcceleration = 0x6083,   // u32
    ProfileDeceleration = 0x6084,   // u32
    QuickStopDeceleration = 0x6085, // u32
    MotionProfileType = 0x6086,     // i16
    HomingMethod = 0x6098,          // i8
    HomingSpeeds = 0x6099,          // u32, sub 1 = search, sub 2 = slow
    HomingAcceleration = 0x609A,    // u32
}

/// Control word commands
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    DisableVoltage = 0x00,
    Shutdown = 0x06,
    SwitchOn = 0x07,
    EnableOperation = 0x0F,
    /// Enable operation with the homing start bit (bit 4)
    StartHoming = 0x1F,
    FaultReset = 0x80,
}

/// Modes of operation
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    ProfilePosition = 1,
    ProfileVelocity = 3,
    Homing = 6,
}

/// Status word bit set once homing has completed
pub const STATUSWORD_HOMING_ATTAINED_BIT: u16 = 12;

/// Wire width of an object value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
}

impl DataWidth {
    pub fn bytes(self) -> usize {
        match self {
            DataWidth::Int8 | DataWidth::UInt8 => 1,
            DataWidth::Int16 | DataWidth::UInt16 => 2,
            DataWidth::Int32 | DataWidth::UInt32 => 4,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Error types for bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus master unavailable (object 0x{index:04X}, value 0x{value:X})")]
    Unavailable { index: u16, value: i32 },

    #[error("Service write to axis {axis} object 0x{index:04X}:{subindex} failed with code {code}")]
    ServiceWrite {
        axis: u16,
        index: u16,
        subindex: u8,
        code: i32,
    },

    #[error("Cyclic exchange failed: {0}")]
    Cyclic(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// One addressed parameter write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterWrite {
    pub axis: u16,
    pub index: u16,
    pub subindex: u8,
    pub value: i32,
    pub width: DataWidth,
}

impl ParameterWrite {
    pub fn new(axis: u16, object: Object, subindex: u8, value: i32, width: DataWidth) -> Self {
        Self {
            axis,
            index: object as u16,
            subindex,
            value,
            width,
        }
    }

    pub fn control_word(axis: u16, word: ControlWord) -> Self {
        Self::new(axis, Object::ControlWord, 0, word as i32, DataWidth::UInt16)
    }

    pub fn mode(axis: u16, mode: OperationMode) -> Self {
        Self::new(
            axis,
            Object::ModesOfOperation,
            0,
            mode as i32,
            DataWidth::Int8,
        )
    }

    /// Value as transmitted: little-endian, truncated to the object width
    pub fn payload(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..self.width.bytes()].to_vec()
    }
}

/// Synchronous, addressed parameter writes to a single drive.
///
/// Implementations block until the bus acknowledges or rejects the write and
/// own any timeout policy. Nothing above this trait retries.
pub trait ServiceBus {
    /// Whether the bus master is up and can carry service writes
    fn is_available(&self) -> bool;

    fn write_parameter(&mut self, write: &ParameterWrite) -> Result<()>;
}
