//! Opcode-specific payload encoding
//!
//! The first payload byte is the parameter count, the parameters follow.
//! Unused trailing bytes are zero on transmit and ignored on receive.

use crate::config::protocol::PAYLOAD_SIZE;
use crate::protocol::types::Opcode;

/// Errors that can occur while interpreting a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// Opcode has no payload interpretation here
    UnexpectedOpcode,
    /// Parameter count does not fit the opcode
    InvalidParameterCount,
}

/// Settings reported by the main unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanSettings {
    pub speed: u8,
    pub voltage: u8,
    pub timer: u8,
}

/// Parsed payload of the opcodes this controller exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// No parameters (queries, acknowledgements)
    Empty,
    SetSpeed { speed: u8 },
    SetTimer { speed: u8, timer: u8 },
    FanSettings(FanSettings),
    /// Network id carried by the join frames
    Network { network_id: u32 },
}

impl Payload {
    /// Serialise into the 8 payload bytes of a frame
    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        match *self {
            Payload::Empty => {}
            Payload::SetSpeed { speed } => {
                buf[0] = 1;
                buf[1] = speed;
            }
            Payload::SetTimer { speed, timer } => {
                buf[0] = 2;
                buf[1] = speed;
                buf[2] = timer;
            }
            Payload::FanSettings(settings) => {
                buf[0] = 3;
                buf[1] = settings.speed;
                buf[2] = settings.voltage;
                buf[3] = settings.timer;
            }
            Payload::Network { network_id } => {
                buf[0] = 4;
                buf[1..5].copy_from_slice(&network_id.to_le_bytes());
            }
        }
        buf
    }

    /// Interpret payload bytes according to `opcode`
    pub fn parse(opcode: Opcode, data: &[u8; PAYLOAD_SIZE]) -> Result<Self, PayloadError> {
        let count = data[0] as usize;

        match opcode {
            Opcode::SetSpeed => {
                Self::require(count, 1)?;
                Ok(Payload::SetSpeed { speed: data[1] })
            }
            Opcode::SetTimer => {
                Self::require(count, 2)?;
                Ok(Payload::SetTimer {
                    speed: data[1],
                    timer: data[2],
                })
            }
            Opcode::FanSettings => {
                Self::require(count, 3)?;
                Ok(Payload::FanSettings(FanSettings {
                    speed: data[1],
                    voltage: data[2],
                    timer: data[3],
                }))
            }
            Opcode::NetworkJoinOpen
            | Opcode::NetworkJoinRequest
            | Opcode::NetworkJoinAck
            | Opcode::JoinConfirm => {
                Self::require(count, 4)?;
                Ok(Payload::Network {
                    network_id: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
                })
            }
            Opcode::QueryDevice | Opcode::SetSpeedReply => Ok(Payload::Empty),
            _ => Err(PayloadError::UnexpectedOpcode),
        }
    }

    fn require(count: usize, minimum: usize) -> Result<(), PayloadError> {
        if count < minimum || count >= PAYLOAD_SIZE {
            return Err(PayloadError::InvalidParameterCount);
        }
        Ok(())
    }
}
