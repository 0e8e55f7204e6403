use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::error::{ActuatorError, DeviceError};

use super::recording::{list_recordings, Recording};
use super::{ActuatorClient, JointPositions};

/// Joint position keys of the five-motor lamp arm.
pub const LAMP_JOINTS: [&str; 5] = [
    "base_yaw.pos",
    "base_pitch.pos",
    "elbow_pitch.pos",
    "wrist_roll.pos",
    "wrist_pitch.pos",
];

/// Low-level servo bus transport.
pub trait ServoBus: Send {
    fn connect(&mut self, calibrate: bool) -> Result<(), DeviceError>;
    fn disconnect(&mut self) -> Result<(), DeviceError>;
    fn motors(&self) -> Vec<String>;
    fn write_positions(&mut self, positions: &JointPositions) -> Result<(), DeviceError>;
    fn read_positions(&mut self) -> Result<JointPositions, DeviceError>;
}

/// Servo bus without hardware: every read moves each joint at most `step` units toward its
/// commanded target, so motion takes a few samples to settle.
pub struct SimulatedBus {
    connected: bool,
    step: f64,
    current: JointPositions,
    target: JointPositions,
}

impl SimulatedBus {
    pub fn new<I, S>(joints: I, step: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current: JointPositions = joints.into_iter().map(|j| (j.into(), 0.0)).collect();
        Self {
            connected: false,
            step,
            target: current.clone(),
            current,
        }
    }

    pub fn lamp() -> Self {
        Self::new(LAMP_JOINTS, 5.0)
    }
}

impl ServoBus for SimulatedBus {
    fn connect(&mut self, calibrate: bool) -> Result<(), DeviceError> {
        info!("Simulated servo bus connected (calibrate={})", calibrate);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = false;
        Ok(())
    }

    fn motors(&self) -> Vec<String> {
        self.current.keys().cloned().collect()
    }

    fn write_positions(&mut self, positions: &JointPositions) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        for (joint, position) in positions {
            if let Some(target) = self.target.get_mut(joint) {
                *target = *position;
            }
        }
        Ok(())
    }

    fn read_positions(&mut self) -> Result<JointPositions, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        for (joint, current) in self.current.iter_mut() {
            let target = self.target.get(joint).copied().unwrap_or(*current);
            let delta = (target - *current).clamp(-self.step, self.step);
            *current += delta;
        }
        Ok(self.current.clone())
    }
}

/// Clears the busy flag when a replay ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Actuator that replays CSV recordings over a [`ServoBus`].
pub struct RecordingActuator<B: ServoBus> {
    bus: Mutex<B>,
    recordings_dir: PathBuf,
    lamp_id: String,
    busy: AtomicBool,
}

impl<B: ServoBus> RecordingActuator<B> {
    pub fn new(bus: B, recordings_dir: PathBuf, lamp_id: impl Into<String>) -> Self {
        Self {
            bus: Mutex::new(bus),
            recordings_dir,
            lamp_id: lamp_id.into(),
            busy: AtomicBool::new(false),
        }
    }

    fn with_bus<T>(
        &self,
        op: impl FnOnce(&mut B) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut bus = self
            .bus
            .lock()
            .map_err(|err| DeviceError::Write(format!("servo bus lock poisoned: {err}")))?;
        op(&mut bus)
    }
}

impl<B: ServoBus> ActuatorClient for RecordingActuator<B> {
    fn connect(&self, calibrate: bool) -> Result<(), DeviceError> {
        self.with_bus(|bus| bus.connect(calibrate))
    }

    fn disconnect(&self) -> Result<(), DeviceError> {
        self.with_bus(|bus| bus.disconnect())
    }

    fn joints(&self) -> Vec<String> {
        self.with_bus(|bus| Ok(bus.motors())).unwrap_or_default()
    }

    fn send_positions(&self, positions: &JointPositions) -> Result<(), DeviceError> {
        self.with_bus(|bus| bus.write_positions(positions))
    }

    fn read_positions(&self) -> Result<JointPositions, DeviceError> {
        self.with_bus(|bus| bus.read_positions())
    }

    fn replay_recording(&self, name: &str, fps: u32) -> Result<(), ActuatorError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ActuatorError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        let recording = Recording::load(&self.recordings_dir, name, &self.lamp_id)?;
        let frame_period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        info!(
            "Playing {} frames from {} at {} fps",
            recording.frames.len(),
            name,
            fps
        );

        for frame in &recording.frames {
            let t0 = Instant::now();
            if let Err(err) = self.send_positions(frame) {
                error!("Error playing recording {}: {}", name, err);
                return Err(err.into());
            }
            if let Some(rest) = frame_period.checked_sub(t0.elapsed()) {
                thread::sleep(rest);
            }
        }

        info!("Finished playing recording: {}", name);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn list_recordings(&self) -> Vec<String> {
        let names = list_recordings(&self.recordings_dir, &self.lamp_id);
        if names.is_empty() {
            warn!(
                "No recordings for lamp {} in {}",
                self.lamp_id,
                self.recordings_dir.display()
            );
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn actuator(dir: &std::path::Path) -> RecordingActuator<SimulatedBus> {
        let actuator = RecordingActuator::new(
            SimulatedBus::new(["base_yaw.pos", "elbow_pitch.pos"], 100.0),
            dir.to_path_buf(),
            "lamp1",
        );
        actuator.connect(true).unwrap();
        actuator
    }

    #[test]
    fn replay_sends_last_frame_and_clears_busy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("wave_lamp1.csv"),
            "timestamp,base_yaw.pos,elbow_pitch.pos\n0,10,5\n1,20,-5\n",
        )
        .unwrap();
        let actuator = actuator(dir.path());

        actuator.replay_recording("wave", 200).unwrap();

        assert!(!actuator.is_busy());
        let positions = actuator.read_positions().unwrap();
        assert_eq!(positions["base_yaw.pos"], 20.0);
        assert_eq!(positions["elbow_pitch.pos"], -5.0);
    }

    #[test]
    fn missing_recording_leaves_actuator_idle() {
        let dir = tempfile::tempdir().unwrap();
        let actuator = actuator(dir.path());

        let err = actuator.replay_recording("ghost", 30).unwrap_err();

        assert!(matches!(err, ActuatorError::RecordingNotFound(_)));
        assert!(!actuator.is_busy());
    }

    #[test]
    fn simulated_bus_moves_in_bounded_steps() {
        let mut bus = SimulatedBus::new(["a"], 2.0);
        bus.connect(false).unwrap();
        bus.write_positions(&JointPositions::from([("a".to_string(), 5.0)]))
            .unwrap();

        let steps: Vec<f64> = (0..4).map(|_| bus.read_positions().unwrap()["a"]).collect();
        assert_eq!(steps, vec![2.0, 4.0, 5.0, 5.0]);
    }

    #[test]
    fn disconnected_bus_rejects_commands() {
        let mut bus = SimulatedBus::lamp();
        assert!(matches!(bus.read_positions(), Err(DeviceError::NotConnected)));
    }
}
