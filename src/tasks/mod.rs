//! Embassy tasks module
//!
//! Runs the fan controller on an embassy executor. The radio driver and the
//! host's fan entity talk to it through the channels defined here.

pub mod fan;

pub use fan::{
    fan_task, FanCallReceiver, FanCallSender, FanReport, RadioEvent, RadioEventReceiver,
    RadioEventSender, FAN_CALL_CHANNEL, FAN_REPORT, RADIO_EVENT_CHANNEL,
};
