pub mod frame;
pub mod payload;
pub mod types;

pub use frame::{calculate_crc, Address, Frame, FrameError};
pub use payload::{FanSettings, Payload, PayloadError};
pub use types::{DeviceType, Opcode, SpeedPreset};
