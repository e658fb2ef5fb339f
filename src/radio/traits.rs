//! Radio trait for abstraction and testability
//!
//! This trait defines the send/receive primitive the protocol needs from the
//! nRF905 transceiver, allowing the hardware driver to be swapped with a mock
//! for testing. Completions and received frames are delivered by the driver
//! glue calling back into the controller, not through this trait.

use crate::config::protocol::FRAME_SIZE;

/// Errors that can occur during radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Radio not initialised
    NotInitialised,
    /// Transmission could not be started
    TransmitFailed,
    /// SPI communication error
    BusError,
    /// Invalid configuration
    InvalidConfig,
}

/// nRF905 configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// 868 MHz band when true, 433 MHz otherwise
    pub band_868: bool,
    pub channel: u16,
    /// Transmit power in dBm (-10, -2, 6 or 10)
    pub tx_power_dbm: i8,
    /// Hardware CRC width (8 or 16)
    pub crc_bits: u8,
    /// Receive and transmit address (the network id)
    pub address: u32,
    pub address_width: u8,
    pub payload_width: u8,
    pub xtal_frequency_hz: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        use crate::config::radio_defaults;

        Self {
            band_868: radio_defaults::BAND_868,
            channel: radio_defaults::CHANNEL,
            tx_power_dbm: radio_defaults::TX_POWER_DBM,
            crc_bits: radio_defaults::CRC_BITS,
            address: radio_defaults::BOOT_ADDRESS,
            address_width: radio_defaults::ADDRESS_WIDTH,
            payload_width: radio_defaults::PAYLOAD_WIDTH,
            xtal_frequency_hz: radio_defaults::XTAL_FREQUENCY_HZ,
        }
    }
}

/// Abstract radio interface
///
/// Exactly one hardware operation is in flight at a time. `send` only starts
/// a transmission; the driver reports completion later.
pub trait FanRadio {
    /// Apply a full configuration
    fn configure(&mut self, config: &RadioConfig) -> Result<(), RadioError>;

    /// Switch receive and transmit address to the given network id
    fn set_network_address(&mut self, network_id: u32) -> Result<(), RadioError>;

    /// Carrier detect: true while another station is transmitting
    fn airway_busy(&mut self) -> bool;

    /// Begin transmitting one frame
    fn send(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), RadioError>;
}
