//! Motion-settle detection.
//!
//! After a position command the arm is sampled at a fixed interval. The move counts as finished
//! once every joint has stayed within `threshold` of its previous sample for `stable_reads`
//! consecutive samples, followed by a short grace period.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ActuatorError;

use super::{ActuatorClient, JointPositions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub interval_ms: u64,
    pub threshold: f64,
    pub stable_reads: u32,
    pub grace_ms: u64,
    pub timeout_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            threshold: 0.5,
            stable_reads: 5,
            grace_ms: 1000,
            timeout_ms: 15_000,
        }
    }
}

impl SettleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettleReport {
    pub samples: u32,
    pub read_failures: u32,
    pub elapsed: Duration,
    pub positions: JointPositions,
}

fn is_moving(current: &JointPositions, previous: &JointPositions, threshold: f64) -> bool {
    current.iter().any(|(joint, position)| {
        let before = previous.get(joint).copied().unwrap_or(0.0);
        (position - before).abs() > threshold
    })
}

/// Waits until the arm stops moving. Read failures reset the stable run and are retried until
/// the timeout.
pub async fn wait_for_settle(
    actuator: &dyn ActuatorClient,
    config: &SettleConfig,
    cancel: &CancellationToken,
) -> Result<SettleReport, ActuatorError> {
    let started = Instant::now();

    let mut last: Option<JointPositions> = None;
    let mut stable = 0u32;
    let mut samples = 0u32;
    let mut read_failures = 0u32;

    while stable < config.stable_reads {
        if started.elapsed() >= config.timeout() {
            return Err(ActuatorError::SettleTimeout(config.timeout()));
        }

        match actuator.read_positions() {
            Ok(current) => {
                samples += 1;
                if let Some(previous) = &last {
                    if is_moving(&current, previous, config.threshold) {
                        stable = 0;
                    } else {
                        stable += 1;
                    }
                }
                last = Some(current);
            }
            Err(err) => {
                read_failures += 1;
                warn!("Could not read positions for stability check: {}. Retrying...", err);
                stable = 0;
            }
        }

        if stable >= config.stable_reads {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ActuatorError::Cancelled),
            _ = time::sleep(config.interval()) => {}
        }
    }

    tokio::select! {
        _ = cancel.cancelled() => return Err(ActuatorError::Cancelled),
        _ = time::sleep(config.grace()) => {}
    }

    Ok(SettleReport {
        samples,
        read_failures,
        elapsed: started.elapsed(),
        positions: last.unwrap_or_default(),
    })
}

/// Commands every joint to 0.0 (the calibrated home pose) and waits for the arm to settle.
pub async fn go_home(
    actuator: &dyn ActuatorClient,
    config: &SettleConfig,
    cancel: &CancellationToken,
) -> Result<SettleReport, ActuatorError> {
    info!("Homing robot...");
    let home: JointPositions = actuator
        .joints()
        .into_iter()
        .map(|joint| (joint, 0.0))
        .collect();
    actuator.send_positions(&home)?;

    let report = wait_for_settle(actuator, config, cancel).await?;
    info!(
        "Homing complete after {} samples ({:?})",
        report.samples, report.elapsed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::error::DeviceError;

    /// Replays scripted reads; the last script entry repeats forever.
    struct ScriptedArm {
        reads: Mutex<VecDeque<Option<f64>>>,
        sent: Mutex<Vec<JointPositions>>,
    }

    impl ScriptedArm {
        fn new(reads: &[Option<f64>]) -> Self {
            Self {
                reads: Mutex::new(reads.iter().copied().collect()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl ActuatorClient for ScriptedArm {
        fn connect(&self, _calibrate: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        fn disconnect(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn joints(&self) -> Vec<String> {
            vec!["j".to_string()]
        }
        fn send_positions(&self, positions: &JointPositions) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(positions.clone());
            Ok(())
        }
        fn read_positions(&self) -> Result<JointPositions, DeviceError> {
            let mut reads = self.reads.lock().unwrap();
            let next = if reads.len() > 1 {
                reads.pop_front().unwrap()
            } else {
                reads.front().copied().flatten()
            };
            next.map(|value| JointPositions::from([("j".to_string(), value)]))
                .ok_or_else(|| DeviceError::Read("bus timeout".into()))
        }
        fn replay_recording(&self, _name: &str, _fps: u32) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn is_busy(&self) -> bool {
            false
        }
        fn list_recordings(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settles_after_five_quiet_samples_and_grace() {
        let arm = ScriptedArm::new(&[Some(30.0), Some(20.0), Some(10.0), Some(10.2)]);
        let report = wait_for_settle(&arm, &SettleConfig::default(), &CancellationToken::new())
            .await
            .unwrap();

        // 3 moving samples, then 10.2 → 10.2 ... until 5 stable comparisons
        assert_eq!(report.samples, 8);
        assert_eq!(report.read_failures, 0);
        assert!(report.elapsed >= Duration::from_millis(700 + 1000));
        assert!(report.elapsed < Duration::from_millis(700 + 1000 + 50));
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_resets_the_stable_run() {
        let arm = ScriptedArm::new(&[
            Some(1.0),
            Some(1.0),
            Some(1.0),
            None,
            Some(1.0),
            Some(1.0),
            Some(1.0),
        ]);
        let report = wait_for_settle(&arm, &SettleConfig::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.read_failures, 1);
        // two stable comparisons are lost to the failed read
        assert_eq!(report.samples, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_arm_times_out() {
        let arm = ScriptedArm::new(&[None]);
        let config = SettleConfig {
            timeout_ms: 2_000,
            ..SettleConfig::default()
        };
        let err = wait_for_settle(&arm, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::SettleTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn home_commands_zero_on_every_joint() {
        let arm = ScriptedArm::new(&[Some(0.0)]);
        go_home(&arm, &SettleConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        let sent = arm.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[JointPositions::from([("j".to_string(), 0.0)])]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let arm = ScriptedArm::new(&[Some(1.0), Some(50.0), Some(1.0)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_for_settle(&arm, &SettleConfig::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Cancelled));
    }
}
