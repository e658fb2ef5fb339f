//! Protocol and radio configuration constants for the nRF905 fan link

/// Default nRF905 configuration
pub mod radio_defaults {
    /// 868 MHz band (false selects 433 MHz)
    pub const BAND_868: bool = true;
    pub const CHANNEL: u16 = 118;
    pub const TX_POWER_DBM: i8 = 10;
    /// Hardware CRC width in bits
    pub const CRC_BITS: u8 = 16;
    pub const ADDRESS_WIDTH: u8 = 4;
    pub const PAYLOAD_WIDTH: u8 = 16;
    pub const XTAL_FREQUENCY_HZ: u32 = 16_000_000;
    /// Address the transceiver listens on before any network is selected
    pub const BOOT_ADDRESS: u32 = 0x8981_6EA9;
}

/// Network identities
pub mod network {
    /// Reserved network used while pairing with a main unit
    pub const LINK_ID: u32 = 0xA55A_5AA5;

    /// Factory default network id, never a valid paired network
    pub const DEFAULT_ID: u32 = 0xE7E7_E7E7;
}

/// Protocol constants
pub mod protocol {
    /// Every frame is exactly this many bytes on air
    pub const FRAME_SIZE: usize = 16;

    /// Opcode-dependent payload bytes (offsets 6..14)
    pub const PAYLOAD_SIZE: usize = 8;

    /// Default time-to-live for a frame (0xFA)
    pub const TTL: u8 = 250;

    /// Each transmission is repeated this many times on air
    pub const TX_FRAMES: u8 = 4;

    /// Number of resends when no reply is received
    pub const TX_RETRIES: u8 = 10;

    /// Wait this long for a reply before resending
    pub const REPLY_TIMEOUT_MS: u32 = 1000;

    /// Give up on a transmission if the channel stays busy this long
    pub const AIRWAY_TIMEOUT_MS: u32 = 5000;

    /// Upper bound for a single hardware transmit to report completion
    pub const MAX_TRANSMIT_TIME_MS: u32 = 2000;

    /// Received frames waiting for the next tick
    pub const RX_QUEUE_DEPTH: usize = 4;
}

/// Network discovery
pub mod discovery {
    /// Each handshake step must be answered within this window
    pub const STEP_TIMEOUT_MS: u32 = 10_000;

    /// Handshake restarts before discovery is reported as failed
    pub const MAX_ATTEMPTS: u8 = 3;
}

/// Fan behaviour
pub mod fan {
    /// Status poll interval when no user command is pending
    pub const UPDATE_INTERVAL_MS: u32 = 15_000;

    /// Number of discrete speed presets
    pub const SPEED_COUNT: u8 = 5;
}
