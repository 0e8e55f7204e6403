//! In-memory device doubles shared by the unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use crate::{
    color::Rgb,
    device::{ActuatorClient, JointPositions, LightClient},
    error::{ActuatorError, DeviceError},
};

#[derive(Default)]
pub struct RecordingLight {
    solids: Mutex<Vec<Rgb>>,
    clears: AtomicUsize,
}

impl RecordingLight {
    pub fn solids(&self) -> Vec<Rgb> {
        self.solids.lock().unwrap().clone()
    }
}

impl LightClient for RecordingLight {
    fn render_solid(&self, color: Rgb) -> Result<(), DeviceError> {
        self.solids.lock().unwrap().push(color);
        Ok(())
    }

    fn render_pattern(&self, colors: &[Rgb]) -> Result<(), DeviceError> {
        if let Some(first) = colors.first() {
            self.solids.lock().unwrap().push(*first);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), DeviceError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Arm that settles instantly and remembers which recordings it played.
#[derive(Default)]
pub struct RecordingArm {
    played: Mutex<Vec<String>>,
}

impl RecordingArm {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

impl ActuatorClient for RecordingArm {
    fn connect(&self, _calibrate: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn joints(&self) -> Vec<String> {
        vec!["base_yaw.pos".into()]
    }

    fn send_positions(&self, _positions: &JointPositions) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read_positions(&self) -> Result<JointPositions, DeviceError> {
        Ok(JointPositions::from([("base_yaw.pos".to_string(), 0.0)]))
    }

    fn replay_recording(&self, name: &str, _fps: u32) -> Result<(), ActuatorError> {
        self.played.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn list_recordings(&self) -> Vec<String> {
        vec!["0_beginning".into(), "0_ending".into(), "30_nod1".into()]
    }
}
