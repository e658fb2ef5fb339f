//! Fixed-size RF frame codec
//!
//! # Frame Format
//!
//! Every frame is exactly 16 bytes:
//! ```text
//! [dst_type: u8][dst_id: u8][src_type: u8][src_id: u8][ttl: u8][opcode: u8]
//! [payload: [u8; 8]][crc16: u16 LE]
//! ```
//!
//! The checksum is CRC-16-XMODEM (polynomial 0x1021, init 0x0000) over bytes 0..14.
//! Decoding only checks length and checksum; what the payload means is up to
//! the opcode handler.

use crate::config::protocol::{FRAME_SIZE, PAYLOAD_SIZE};
use crc::{Crc, CRC_16_XMODEM};

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Byte offsets of each field
mod offset {
    pub const DST_TYPE: usize = 0;
    pub const DST_ID: usize = 1;
    pub const SRC_TYPE: usize = 2;
    pub const SRC_ID: usize = 3;
    pub const TTL: usize = 4;
    pub const OPCODE: usize = 5;
    pub const PAYLOAD: usize = 6;
    pub const CHECKSUM: usize = 14;
}

/// Errors that can occur while decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Input was not exactly 16 bytes
    InvalidLength,
    /// Trailer does not match the recomputed checksum
    InvalidChecksum,
}

/// Two-part device address: role class and instance within that class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Address {
    pub device_type: u8,
    pub device_id: u8,
}

impl Address {
    pub const fn new(device_type: u8, device_id: u8) -> Self {
        Self {
            device_type,
            device_id,
        }
    }
}

/// A validated 16-byte frame.
///
/// The only ways to obtain one are [`Frame::encode`] and [`Frame::decode`],
/// so the checksum trailer is always consistent with the header and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    /// Build a frame and append its checksum
    pub fn encode(
        destination: Address,
        source: Address,
        ttl: u8,
        opcode: u8,
        payload: &[u8; PAYLOAD_SIZE],
    ) -> Self {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[offset::DST_TYPE] = destination.device_type;
        bytes[offset::DST_ID] = destination.device_id;
        bytes[offset::SRC_TYPE] = source.device_type;
        bytes[offset::SRC_ID] = source.device_id;
        bytes[offset::TTL] = ttl;
        bytes[offset::OPCODE] = opcode;
        bytes[offset::PAYLOAD..offset::CHECKSUM].copy_from_slice(payload);

        let crc = calculate_crc(&bytes[..offset::CHECKSUM]);
        bytes[offset::CHECKSUM..].copy_from_slice(&crc.to_le_bytes());

        Self { bytes }
    }

    /// Parse raw bytes received from the radio
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let bytes: [u8; FRAME_SIZE] = data.try_into().map_err(|_| FrameError::InvalidLength)?;

        let received_crc =
            u16::from_le_bytes([bytes[offset::CHECKSUM], bytes[offset::CHECKSUM + 1]]);
        if calculate_crc(&bytes[..offset::CHECKSUM]) != received_crc {
            return Err(FrameError::InvalidChecksum);
        }

        Ok(Self { bytes })
    }

    pub fn destination(&self) -> Address {
        Address::new(self.bytes[offset::DST_TYPE], self.bytes[offset::DST_ID])
    }

    pub fn source(&self) -> Address {
        Address::new(self.bytes[offset::SRC_TYPE], self.bytes[offset::SRC_ID])
    }

    pub fn ttl(&self) -> u8 {
        self.bytes[offset::TTL]
    }

    /// Raw opcode byte, see [`crate::protocol::Opcode`]
    pub fn opcode(&self) -> u8 {
        self.bytes[offset::OPCODE]
    }

    pub fn payload(&self) -> [u8; PAYLOAD_SIZE] {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&self.bytes[offset::PAYLOAD..offset::CHECKSUM]);
        payload
    }

    pub fn checksum(&self) -> u16 {
        u16::from_le_bytes([self.bytes[offset::CHECKSUM], self.bytes[offset::CHECKSUM + 1]])
    }

    /// Wire representation, ready for the radio
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }
}

/// Calculate the frame checksum (CRC-16-XMODEM)
pub fn calculate_crc(data: &[u8]) -> u16 {
    CRC.checksum(data)
}
