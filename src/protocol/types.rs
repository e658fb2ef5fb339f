//! Device types, opcodes and speed presets of the fan protocol

/// Device role classes used in frame addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Broadcast to all devices (0x00)
    Broadcast = 0x00,
    /// Fans (0x01)
    MainUnit = 0x01,
    /// Remote controls (0x03)
    RemoteControl = 0x03,
    /// CO2 sensors (0x18)
    Co2Sensor = 0x18,
}

impl DeviceType {
    /// Try to convert a byte to a DeviceType
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Broadcast),
            0x01 => Some(Self::MainUnit),
            0x03 => Some(Self::RemoteControl),
            0x18 => Some(Self::Co2Sensor),
            _ => None,
        }
    }
}

/// Command opcodes carried at frame offset 5
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Set speed as a voltage / percentage (0x01)
    SetVoltage = 0x01,

    /// Set speed preset (0x02)
    ///
    /// - Payload: `[1][speed]`
    /// - Reply: [`Opcode::FanSettings`]
    SetSpeed = 0x02,

    /// Set speed preset with timer (0x03)
    ///
    /// - Payload: `[2][speed][timer minutes]`
    /// - Reply: [`Opcode::FanSettings`]
    SetTimer = 0x03,

    /// Remote asks to join the announced network (0x04)
    ///
    /// - Payload: `[4][network id: u32 LE]`
    NetworkJoinRequest = 0x04,

    /// Remote acknowledges a fan settings reply (0x05)
    SetSpeedReply = 0x05,

    /// Main unit announces the network it is opening for pairing (0x06)
    ///
    /// - Payload: `[4][network id: u32 LE]`
    NetworkJoinOpen = 0x06,

    /// Current fan settings, sent by the main unit (0x07)
    ///
    /// - Payload: `[3][speed][voltage][timer]`
    FanSettings = 0x07,

    /// Final join confirmation exchanged with the main unit (0x0B)
    ///
    /// - Payload: `[4][network id: u32 LE]`, echoed back by the main unit
    JoinConfirm = 0x0B,

    /// Link acknowledgement (0x0C)
    ///
    /// Broadcast by a remote on the link network to start pairing, and sent
    /// back by the main unit once it accepts the join request.
    NetworkJoinAck = 0x0C,

    /// Network query (0x0D)
    QueryNetwork = 0x0D,

    /// Ask the main unit for its current settings (0x10)
    ///
    /// - Payload: `[0]`
    /// - Reply: [`Opcode::FanSettings`]
    QueryDevice = 0x10,

    /// Reply to a set voltage command (0x1D)
    SetVoltageReply = 0x1D,
}

impl Opcode {
    /// Try to convert a byte to an Opcode
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::SetVoltage),
            0x02 => Some(Self::SetSpeed),
            0x03 => Some(Self::SetTimer),
            0x04 => Some(Self::NetworkJoinRequest),
            0x05 => Some(Self::SetSpeedReply),
            0x06 => Some(Self::NetworkJoinOpen),
            0x07 => Some(Self::FanSettings),
            0x0B => Some(Self::JoinConfirm),
            0x0C => Some(Self::NetworkJoinAck),
            0x0D => Some(Self::QueryNetwork),
            0x10 => Some(Self::QueryDevice),
            0x1D => Some(Self::SetVoltageReply),
            _ => None,
        }
    }
}

/// Fan speed presets
///
/// | Preset | Nominal output      |
/// |--------|---------------------|
/// | Auto   |   0% or  0.0 volt   |
/// | Low    |  30% or  3.0 volt   |
/// | Medium |  50% or  5.0 volt   |
/// | High   |  90% or  9.0 volt   |
/// | Max    | 100% or 10.0 volt   |
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpeedPreset {
    Auto = 0x00,
    Low = 0x01,
    Medium = 0x02,
    High = 0x03,
    Max = 0x04,
}

impl SpeedPreset {
    /// All presets in ascending order
    pub const ALL: [SpeedPreset; 5] = [
        SpeedPreset::Auto,
        SpeedPreset::Low,
        SpeedPreset::Medium,
        SpeedPreset::High,
        SpeedPreset::Max,
    ];

    /// Try to convert a byte to a SpeedPreset
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Auto),
            0x01 => Some(Self::Low),
            0x02 => Some(Self::Medium),
            0x03 => Some(Self::High),
            0x04 => Some(Self::Max),
            _ => None,
        }
    }

    /// Nominal output of this preset in percent
    pub fn percentage(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Low => 30,
            Self::Medium => 50,
            Self::High => 90,
            Self::Max => 100,
        }
    }

    /// Smallest preset whose nominal output covers `percentage`
    pub fn from_percentage(percentage: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|preset| percentage <= preset.percentage())
            .unwrap_or(Self::Max)
    }
}
