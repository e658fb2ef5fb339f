//! Persisted network identity
//!
//! The record is an 8-byte little-endian blob:
//! ```text
//! [network_id: u32 LE][my_device_type: u8][my_device_id: u8][main_unit_type: u8][main_unit_id: u8]
//! ```

use crate::config::network;
use crate::protocol::{Address, DeviceType};

/// Size of the persisted record in bytes
pub const RECORD_SIZE: usize = 8;

/// Errors that can occur while persisting the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Backing storage rejected the write
    WriteFailed,
}

/// Addressing established by a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network_id: u32,
    pub my_device_type: u8,
    pub my_device_id: u8,
    pub main_unit_type: u8,
    pub main_unit_id: u8,
}

impl NetworkConfig {
    /// Our own address on the network
    pub fn my_address(&self) -> Address {
        Address::new(self.my_device_type, self.my_device_id)
    }

    /// Address of the paired main unit
    pub fn main_unit(&self) -> Address {
        Address::new(self.main_unit_type, self.main_unit_id)
    }

    /// True when the record describes a usable pairing.
    ///
    /// Rejects the reserved network ids and broadcast/unset device ids, which
    /// is what erased flash or a half-written record looks like.
    pub fn is_valid(&self) -> bool {
        let reserved_network = matches!(
            self.network_id,
            0 | u32::MAX | network::LINK_ID | network::DEFAULT_ID
        );
        let reserved_id = |id: u8| id == 0x00 || id == 0xFF;

        !reserved_network
            && !reserved_id(self.my_device_id)
            && self.main_unit_type == DeviceType::MainUnit as u8
            && self.main_unit_id != 0xFF
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..4].copy_from_slice(&self.network_id.to_le_bytes());
        bytes[4] = self.my_device_type;
        bytes[5] = self.my_device_id;
        bytes[6] = self.main_unit_type;
        bytes[7] = self.main_unit_id;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        Self {
            network_id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            my_device_type: bytes[4],
            my_device_id: bytes[5],
            main_unit_type: bytes[6],
            main_unit_id: bytes[7],
        }
    }
}

/// Load/save of the persisted record
///
/// Implemented by the host on top of its key-value or flash storage.
pub trait ConfigStore {
    /// Stored record, if any was ever saved
    fn load(&mut self) -> Option<NetworkConfig>;

    fn save(&mut self, config: &NetworkConfig) -> Result<(), StoreError>;
}

#[cfg(test)]
pub mod mock {
    //! In-memory store for testing

    use super::*;

    /// Store backed by a single in-memory record
    pub struct MemoryStore {
        record: Option<[u8; RECORD_SIZE]>,
        saves: usize,
        fail_writes: bool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self {
                record: None,
                saves: 0,
                fail_writes: false,
            }
        }

        /// Store pre-populated with a record
        pub fn with_record(config: NetworkConfig) -> Self {
            Self {
                record: Some(config.to_bytes()),
                ..Self::new()
            }
        }

        pub fn set_fail_writes(&mut self, fail: bool) {
            self.fail_writes = fail;
        }

        /// Number of successful saves
        pub fn saves(&self) -> usize {
            self.saves
        }

        pub fn record(&self) -> Option<NetworkConfig> {
            self.record.as_ref().map(NetworkConfig::from_bytes)
        }
    }

    impl Default for MemoryStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ConfigStore for MemoryStore {
        fn load(&mut self) -> Option<NetworkConfig> {
            self.record()
        }

        fn save(&mut self, config: &NetworkConfig) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::WriteFailed);
            }
            self.record = Some(config.to_bytes());
            self.saves += 1;
            Ok(())
        }
    }
}
