//! Host fan entity boundary
//!
//! Maps generic fan calls (a preset or a percentage plus an optional timer)
//! onto the controller's speed presets.

use super::controller::{ControlError, FanController};
use crate::config::fan::SPEED_COUNT;
use crate::protocol::SpeedPreset;
use crate::radio::FanRadio;
use crate::store::ConfigStore;

/// Capabilities advertised to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanTraits {
    /// Number of discrete speeds the unit supports
    pub speed_count: u8,
    /// Named presets, lowest first
    pub presets: &'static [SpeedPreset],
}

/// Requested speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedLevel {
    Preset(SpeedPreset),
    /// 0..=100, rounded up to the nearest preset
    Percentage(u8),
}

impl SpeedLevel {
    pub fn preset(self) -> SpeedPreset {
        match self {
            SpeedLevel::Preset(preset) => preset,
            SpeedLevel::Percentage(percent) => SpeedPreset::from_percentage(percent),
        }
    }
}

/// A control request from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanCall {
    pub speed: Option<SpeedLevel>,
    /// Timer in minutes, 0 for none
    pub timer: u8,
}

impl FanCall {
    pub fn preset(preset: SpeedPreset) -> Self {
        Self {
            speed: Some(SpeedLevel::Preset(preset)),
            timer: 0,
        }
    }

    pub fn percentage(percent: u8) -> Self {
        Self {
            speed: Some(SpeedLevel::Percentage(percent)),
            timer: 0,
        }
    }

    pub fn with_timer(self, timer: u8) -> Self {
        Self { timer, ..self }
    }
}

impl<R: FanRadio, S: ConfigStore> FanController<R, S> {
    pub fn traits(&self) -> FanTraits {
        FanTraits {
            speed_count: SPEED_COUNT,
            presets: &SpeedPreset::ALL,
        }
    }

    /// Apply a host call. A call without a speed changes nothing.
    pub fn control(&mut self, call: FanCall) -> Result<(), ControlError> {
        match call.speed {
            Some(level) => self.set_speed(level.preset() as u8, call.timer),
            None => Ok(()),
        }
    }
}
