//! Rating-driven gestures during a focus session.
//!
//! Every poll the monitor reads the newest rating from the vision pipeline, maps it to a
//! recording, and hands that to the [`ActionInterleaver`] without waiting for it. It also owns
//! the session's wall-clock budget: once the configured duration has passed it ends the session
//! even if the light schedule has not finished.

pub mod rating;
pub mod source;

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ActuatorError, SourceError},
    interleave::{ActionInterleaver, ActionKind},
    session::SessionController,
    signals::FocusSignals,
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[monitor]";

use crate::{log_error, log_info, log_warn};

pub use rating::{parse_latest_rating, RatingTable, RepeatPolicy, NO_ACTION_RATING};
pub use source::{FileRatingSource, RatingSource};

/// Per-session bookkeeping, reset whenever a monitor is built for a new session.
#[derive(Debug, Clone)]
pub struct MonitorWindow {
    pub session_start: Instant,
    pub session_duration: Duration,
    pub last_seen_rating: Option<i32>,
    pub poll_interval: Duration,
}

impl MonitorWindow {
    pub fn new(session_duration: Duration, poll_interval: Duration) -> Self {
        Self {
            session_start: Instant::now(),
            session_duration,
            last_seen_rating: None,
            poll_interval,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.session_start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.session_duration.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.session_duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The focus flag was cleared by the gateway or by session completion.
    ActiveCleared,
    /// The session ran for its full duration.
    BudgetExhausted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub repeat_policy: RepeatPolicy,
    pub table: RatingTable,
    /// Recordings present for this lamp. `None` skips the availability check.
    pub available_actions: Option<BTreeSet<String>>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            repeat_policy: RepeatPolicy::default(),
            table: RatingTable::default(),
            available_actions: None,
        }
    }
}

pub struct RatingMonitor {
    session: SessionController,
    interleaver: ActionInterleaver,
    source: Arc<dyn RatingSource>,
    signals: Arc<FocusSignals>,
    options: MonitorOptions,
    window: MonitorWindow,
    session_id: Option<String>,
}

impl RatingMonitor {
    pub fn new(
        session: SessionController,
        interleaver: ActionInterleaver,
        source: Arc<dyn RatingSource>,
        signals: Arc<FocusSignals>,
        options: MonitorOptions,
        session_budget: Duration,
    ) -> Self {
        let window = MonitorWindow::new(session_budget, options.poll_interval);
        Self {
            session,
            interleaver,
            source,
            signals,
            options,
            window,
            session_id: None,
        }
    }

    /// Binds the monitor to one session so it never stops a later one.
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn window(&self) -> &MonitorWindow {
        &self.window
    }

    pub async fn run(mut self, cancel: CancellationToken) -> MonitorExit {
        log_info!(
            "Monitoring ratings every {:?}; session limit {:.1} minutes",
            self.window.poll_interval,
            self.window.session_duration.as_secs_f64() / 60.0
        );

        let mut active_rx = self.signals.subscribe_focus_active();
        let mut ticker = time::interval(self.window.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break MonitorExit::Cancelled,
                changed = active_rx.changed() => {
                    let still_active = changed.is_ok() && *active_rx.borrow_and_update();
                    if !still_active {
                        break self.end_externally(&cancel).await;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Some(exit) = self.poll_once(&cancel).await {
                break exit;
            }
        };

        // a cancelled monitor has been superseded and must not touch the next session's flag
        if exit != MonitorExit::Cancelled && self.signals.set_focus_active(false) {
            log_info!("Cleared focus flag during monitor cleanup");
        }
        log_info!("Monitor finished: {:?}", exit);
        exit
    }

    async fn end_externally(&self, cancel: &CancellationToken) -> MonitorExit {
        if cancel.is_cancelled() {
            return MonitorExit::Cancelled;
        }
        log_info!("Focus session ended by external signal, stopping monitor");
        self.stop_session().await;
        MonitorExit::ActiveCleared
    }

    async fn stop_session(&self) {
        match &self.session_id {
            Some(id) => {
                if !self.session.stop_session(id).await {
                    log_info!("Session {} already ended", id);
                }
            }
            None => {
                self.session.stop().await;
            }
        }
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Option<MonitorExit> {
        if cancel.is_cancelled() {
            return Some(MonitorExit::Cancelled);
        }
        if !self.signals.is_focus_active() {
            return Some(self.end_externally(cancel).await);
        }

        if self.window.is_exhausted() {
            log_info!(
                "Session reached its {:.1} minute limit, stopping",
                self.window.session_duration.as_secs_f64() / 60.0
            );
            self.stop_session().await;
            return Some(MonitorExit::BudgetExhausted);
        }

        match self.read_rating().await {
            Ok(Some(rating)) => self.handle_rating(rating),
            Ok(None) => log_info!("No focus rating available yet"),
            Err(err) => log_warn!("Skipping poll: {}", err),
        }

        log_info!(
            "Session time left: {:.1} minutes",
            self.window.remaining().as_secs_f64() / 60.0
        );
        None
    }

    async fn read_rating(&self) -> Result<Option<i32>, SourceError> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.latest_rating())
            .await
            .map_err(|err| SourceError::Worker(err.to_string()))?
    }

    fn handle_rating(&mut self, rating: i32) {
        let previous = self.window.last_seen_rating.replace(rating);
        let repeated = previous == Some(rating);
        if !repeated {
            log_info!("Focus rating changed: {:?} -> {}", previous, rating);
        }

        if rating == NO_ACTION_RATING {
            return;
        }
        if repeated && self.options.repeat_policy == RepeatPolicy::Debounce {
            return;
        }

        let Some(action) = self.options.table.action_for(rating) else {
            log_warn!("Unknown focus rating {}, no action", rating);
            return;
        };
        if let Some(available) = &self.options.available_actions {
            if !available.contains(action) {
                log_warn!("Recording {} for rating {} is not available", action, rating);
                return;
            }
        }

        log_info!("Dispatching {} for rating {}", action, rating);
        let interleaver = self.interleaver.clone();
        let action = ActionKind::Replay(action.to_string());
        tokio::spawn(async move {
            match interleaver.try_run(action.clone()).await {
                Ok(()) => {}
                Err(ActuatorError::Busy) => {
                    log_info!("Arm busy, dropping {}", action);
                }
                Err(err) => log_error!("Action {} failed: {}", action, err),
            }
        });
    }
}
