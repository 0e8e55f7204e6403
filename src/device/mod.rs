//! Hardware-facing seams: the LED ring and the servo arm.
//!
//! Both are blocking, thread-safe clients. Async callers hop onto the blocking pool for
//! anything that can take longer than a bus transaction (recording replay).

pub mod actuator;
pub mod homing;
pub mod light;
pub mod recording;

use std::collections::BTreeMap;

use crate::color::Rgb;
use crate::error::{ActuatorError, DeviceError};

pub use actuator::{RecordingActuator, ServoBus, SimulatedBus};
pub use homing::{go_home, wait_for_settle, SettleConfig, SettleReport};
pub use light::SimulatedLight;

/// Joint name → position, in bus units.
pub type JointPositions = BTreeMap<String, f64>;

pub trait LightClient: Send + Sync {
    fn render_solid(&self, color: Rgb) -> Result<(), DeviceError>;
    fn render_pattern(&self, colors: &[Rgb]) -> Result<(), DeviceError>;
    fn clear(&self) -> Result<(), DeviceError>;
}

pub trait ActuatorClient: Send + Sync {
    fn connect(&self, calibrate: bool) -> Result<(), DeviceError>;
    fn disconnect(&self) -> Result<(), DeviceError>;
    fn joints(&self) -> Vec<String>;
    fn send_positions(&self, positions: &JointPositions) -> Result<(), DeviceError>;
    fn read_positions(&self) -> Result<JointPositions, DeviceError>;
    /// Plays a recorded gesture frame by frame; returns when the last frame is sent.
    fn replay_recording(&self, name: &str, fps: u32) -> Result<(), ActuatorError>;
    fn is_busy(&self) -> bool;
    fn list_recordings(&self) -> Vec<String>;
}
