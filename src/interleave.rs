use std::{fmt, sync::Arc, time::Duration};

use log::{error, info, warn};
use tokio::{
    sync::Mutex,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::LampConfig,
    device::{go_home, ActuatorClient, SettleConfig},
    error::ActuatorError,
    session::SessionController,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Replay(String),
    Home,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Replay(name) => write!(f, "{name}"),
            ActionKind::Home => write!(f, "go_home"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterleaveConfig {
    pub fps: u32,
    pub busy_poll: Duration,
    pub action_timeout: Duration,
    pub settle: SettleConfig,
}

impl Default for InterleaveConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            busy_poll: Duration::from_millis(100),
            action_timeout: Duration::from_secs(60),
            settle: SettleConfig::default(),
        }
    }
}

impl From<&LampConfig> for InterleaveConfig {
    fn from(config: &LampConfig) -> Self {
        Self {
            fps: config.timing.action_fps,
            busy_poll: config.timing.busy_poll(),
            action_timeout: config.timing.action_timeout(),
            settle: config.homing.settle.clone(),
        }
    }
}

/// Resumes the session if the action future is dropped before it could do so itself.
struct ResumeGuard {
    session: Option<SessionController>,
}

impl ResumeGuard {
    async fn resume(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.resume().await {
                warn!("Could not resume phase light after action: {}", err);
            }
        }
    }
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = session.resume().await {
                    warn!("Could not resume phase light after dropped action: {}", err);
                }
            });
        }
    }
}

/// Pauses the session around each actuator action and resumes it afterwards.
///
/// Only one action touches the arm at a time: `run` waits its turn, `try_run` gives up with
/// [`ActuatorError::Busy`].
#[derive(Clone)]
pub struct ActionInterleaver {
    session: SessionController,
    actuator: Arc<dyn ActuatorClient>,
    gate: Arc<Mutex<()>>,
    config: Arc<InterleaveConfig>,
    cancel: CancellationToken,
}

impl ActionInterleaver {
    pub fn new(
        session: SessionController,
        actuator: Arc<dyn ActuatorClient>,
        config: InterleaveConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            actuator,
            gate: Arc::new(Mutex::new(())),
            config: Arc::new(config),
            cancel,
        }
    }

    pub fn actuator(&self) -> &Arc<dyn ActuatorClient> {
        &self.actuator
    }

    pub async fn run(&self, action: ActionKind) -> Result<(), ActuatorError> {
        let _turn = self.gate.lock().await;
        self.run_exclusive(&action).await
    }

    pub async fn try_run(&self, action: ActionKind) -> Result<(), ActuatorError> {
        let _turn = self.gate.try_lock().map_err(|_| ActuatorError::Busy)?;
        self.run_exclusive(&action).await
    }

    async fn run_exclusive(&self, action: &ActionKind) -> Result<(), ActuatorError> {
        // Only a session this action paused gets resumed.
        let paused = self.session.pause().await.is_ok();
        let guard = ResumeGuard {
            session: paused.then(|| self.session.clone()),
        };
        if paused {
            info!("--- Pausing phase light for action: {} ---", action);
        } else {
            info!("--- Running action outside a session: {} ---", action);
        }

        let result = self.perform(action).await;
        match &result {
            Ok(()) => info!("Action {} complete", action),
            Err(err) => error!("Action {} abandoned: {}", action, err),
        }

        guard.resume().await;
        if paused {
            info!("Phase light resumed");
        }
        result
    }

    async fn perform(&self, action: &ActionKind) -> Result<(), ActuatorError> {
        match action {
            ActionKind::Replay(name) => {
                let actuator = Arc::clone(&self.actuator);
                let name = name.clone();
                let fps = self.config.fps;
                tokio::task::spawn_blocking(move || actuator.replay_recording(&name, fps))
                    .await
                    .map_err(|err| ActuatorError::Worker(err.to_string()))??;
                self.wait_until_idle().await
            }
            ActionKind::Home => {
                go_home(self.actuator.as_ref(), &self.config.settle, &self.cancel).await?;
                Ok(())
            }
        }
    }

    async fn wait_until_idle(&self) -> Result<(), ActuatorError> {
        let started = Instant::now();
        while self.actuator.is_busy() {
            if started.elapsed() >= self.config.action_timeout {
                return Err(ActuatorError::BusyTimeout(self.config.action_timeout));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ActuatorError::Cancelled),
                _ = time::sleep(self.config.busy_poll) => {}
            }
        }
        Ok(())
    }
}
