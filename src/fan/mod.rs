//! Fan control
//!
//! [`FanController`] drives the pairing and speed-control protocol on top of
//! the transport. [`FanCall`] and [`FanTraits`] are the boundary a host's
//! generic fan entity talks to.

pub mod controller;
pub mod host;

pub use controller::{
    ControlError, ControlState, ControllerConfig, ErrorStatus, FanController, FanState, FanStatus,
    PendingCommand,
};
pub use host::{FanCall, FanTraits, SpeedLevel};
