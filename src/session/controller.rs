use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::{
    sync::{watch, Mutex},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    color::light_color,
    device::LightClient,
    error::SessionError,
    schedule::Schedule,
};

use super::{PhaseClock, SessionOutcome, SessionSnapshot, SessionState};

/// Fine-grained wait tick for pause/stop observation inside a phase.
pub const DEFAULT_PHASE_TICK: Duration = Duration::from_millis(100);

pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    state: SessionState,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    phase_count: usize,
    phase_index: Option<usize>,
    clock: PhaseClock,
    outcome: Option<SessionOutcome>,
    cancel: CancellationToken,
}

/// Runs one lighting schedule at a time against the lamp's LEDs.
///
/// Every transition happens under `inner` and is published on the state watch before the lock
/// is released, so a caller that returned from `pause()`/`stop()` never observes an older state.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    light: Arc<dyn LightClient>,
    on_complete: Arc<Mutex<Option<CompletionCallback>>>,
    tick: Duration,
}

impl SessionController {
    pub fn new(light: Arc<dyn LightClient>) -> Self {
        Self::with_tick(light, DEFAULT_PHASE_TICK)
    }

    pub fn with_tick(light: Arc<dyn LightClient>, tick: Duration) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            state_tx: Arc::new(state_tx),
            light,
            on_complete: Arc::new(Mutex::new(None)),
            tick,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            state: inner.state,
            session_id: inner.session_id.clone(),
            started_at: inner.started_at,
            phase_index: inner.phase_index,
            phase_count: inner.phase_count,
            phase_remaining_ms: inner.clock.remaining().as_millis() as u64,
            outcome: inner.outcome,
        }
    }

    /// Registers the callback fired once when a schedule runs to exhaustion.
    pub async fn set_completion_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_complete.lock().await = Some(Arc::new(callback));
    }

    /// Starts the phase loop on its own task and returns the new session id.
    pub async fn start(&self, schedule: Schedule) -> Result<String, SessionError> {
        if schedule.is_empty() {
            warn!("Rejecting focus session start: no valid schedule");
            return Err(SessionError::EmptySchedule);
        }

        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Idle {
            warn!("Rejecting focus session start while {:?}", inner.state);
            return Err(SessionError::InvalidTransition {
                op: "start",
                state: inner.state,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        *inner = Inner {
            state: SessionState::Running,
            session_id: Some(session_id.clone()),
            started_at: Some(Utc::now()),
            phase_count: schedule.len(),
            cancel: cancel.clone(),
            ..Inner::default()
        };
        self.state_tx.send_replace(SessionState::Running);

        info!(
            "Starting focus session {} with {} phases, {:.2} minutes total",
            session_id,
            schedule.len(),
            schedule.total_seconds() / 60.0
        );

        // the loop's first lock waits until this guard is released
        tokio::spawn(self.clone().run_phases(schedule, cancel));

        Ok(session_id)
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Running => {
                inner.clock.freeze();
                inner.state = SessionState::Paused;
                self.state_tx.send_replace(SessionState::Paused);
                info!(
                    "Focus session paused with {:?} left in phase",
                    inner.clock.remaining()
                );
                Ok(())
            }
            state => Err(SessionError::InvalidTransition { op: "pause", state }),
        }
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Paused => {
                inner.clock.thaw(Instant::now());
                inner.state = SessionState::Running;
                self.state_tx.send_replace(SessionState::Running);
                info!("Focus session resumed");
                Ok(())
            }
            state => Err(SessionError::InvalidTransition {
                op: "resume",
                state,
            }),
        }
    }

    /// Stops the session and waits for the phase loop to wind down.
    ///
    /// Safe to call at any time from any task. Returns `true` only for the call that initiated
    /// the stop.
    pub async fn stop(&self) -> bool {
        self.stop_matching(None).await
    }

    /// Stops only if `session_id` is still the current session.
    pub async fn stop_session(&self, session_id: &str) -> bool {
        self.stop_matching(Some(session_id)).await
    }

    async fn stop_matching(&self, session_id: Option<&str>) -> bool {
        let mut state_rx = self.state_tx.subscribe();
        let initiated = {
            let mut inner = self.inner.lock().await;
            if let Some(expected) = session_id {
                if inner.session_id.as_deref() != Some(expected) {
                    return false;
                }
            }
            match inner.state {
                SessionState::Running | SessionState::Paused => {
                    inner.state = SessionState::Stopping;
                    self.state_tx.send_replace(SessionState::Stopping);
                    inner.cancel.cancel();
                    info!("Focus session stopping");
                    true
                }
                SessionState::Stopping => false,
                SessionState::Idle | SessionState::Stopped => return false,
            }
        };

        let _ = state_rx
            .wait_for(|state| *state == SessionState::Stopped)
            .await;
        initiated
    }

    /// Re-arms a stopped controller for a new `start()`.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Stopped => {
                *inner = Inner::default();
                self.state_tx.send_replace(SessionState::Idle);
                info!("Focus session reset");
                Ok(())
            }
            SessionState::Idle => Ok(()),
            state => Err(SessionError::InvalidTransition { op: "reset", state }),
        }
    }

    async fn run_phases(self, schedule: Schedule, cancel: CancellationToken) {
        let mut state_rx = self.state_tx.subscribe();
        let mut completed = true;
        let count = schedule.len();

        for (index, phase) in schedule.phases().iter().enumerate() {
            if cancel.is_cancelled() {
                completed = false;
                break;
            }

            let color = light_color(phase.color_temperature_kelvin, phase.illuminance_lux, 1.0);
            info!(
                "--- Phase {}/{}: {:.2} minutes at {}K, {} lx -> ({}, {}, {}) ---",
                index + 1,
                count,
                phase.duration_seconds / 60.0,
                phase.color_temperature_kelvin,
                phase.illuminance_lux,
                color.r,
                color.g,
                color.b
            );
            if let Err(err) = self.light.render_solid(color) {
                error!("Failed to render phase {}: {}", index + 1, err);
            }

            {
                let mut inner = self.inner.lock().await;
                let anchor = (inner.state == SessionState::Running).then(Instant::now);
                inner.clock = PhaseClock::start(phase.duration(), anchor);
                inner.phase_index = Some(index);
            }

            if !self.wait_phase(&mut state_rx, &cancel).await {
                completed = false;
                break;
            }
        }

        self.finish(completed).await;
    }

    /// Waits out the current phase's unpaused budget. Returns `false` when stopped.
    async fn wait_phase(
        &self,
        state_rx: &mut watch::Receiver<SessionState>,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            let state = *state_rx.borrow_and_update();
            let remaining = self.inner.lock().await.clock.remaining();

            if cancel.is_cancelled() {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }

            if state == SessionState::Paused {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = time::sleep(remaining.min(self.tick)) => {}
                    _ = state_rx.changed() => {}
                }
            }
        }
    }

    async fn finish(&self, completed: bool) {
        let callback = {
            let mut inner = self.inner.lock().await;
            let aborted = !completed || inner.cancel.is_cancelled();

            if aborted {
                if let Err(err) = self.light.clear() {
                    error!("Failed to clear light after stop: {}", err);
                }
            }

            inner.state = SessionState::Stopped;
            inner.phase_index = None;
            inner.clock = PhaseClock::default();
            inner.outcome = Some(if aborted {
                SessionOutcome::Aborted
            } else {
                SessionOutcome::Completed
            });
            self.state_tx.send_replace(SessionState::Stopped);

            if aborted {
                info!("--- Focus session stopped before completion ---");
                None
            } else {
                info!("--- Focus session completed, all phases done ---");
                self.on_complete.lock().await.clone()
            }
        };

        if let Some(callback) = callback {
            callback();
        }
    }
}
