#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod fan;
pub mod join;
pub mod protocol;
pub mod radio;
pub mod store;
pub mod transport;

// The driver loop depends on embassy features only available with embedded feature
#[cfg(feature = "embedded")]
pub mod tasks;

pub use fan::{ControlError, ErrorStatus, FanCall, FanController, FanState, FanStatus, FanTraits};
pub use protocol::{Address, Frame, FrameError, SpeedPreset};
pub use store::{ConfigStore, NetworkConfig};
pub use transport::{TransmissionManager, TransportError, TransportState};
