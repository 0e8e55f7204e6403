use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    /// A phase loop exists for this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::Paused | SessionState::Stopping
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionOutcome {
    Completed,
    Aborted,
}

/// Countdown for the phase in progress.
///
/// Unpaused time is `consumed_baseline` plus the time since `running_anchor`. Pausing folds
/// the anchor into the baseline and drops it, so the countdown does not advance until
/// [`PhaseClock::thaw`] sets a new anchor.
#[derive(Debug, Clone, Default)]
pub struct PhaseClock {
    budget: Duration,
    consumed_baseline: Duration,
    running_anchor: Option<Instant>,
}

impl PhaseClock {
    /// Starts counting at `anchor`, or frozen when the session is paused at the boundary.
    pub fn start(budget: Duration, anchor: Option<Instant>) -> Self {
        Self {
            budget,
            consumed_baseline: Duration::ZERO,
            running_anchor: anchor,
        }
    }

    pub fn consumed(&self) -> Duration {
        match self.running_anchor {
            Some(anchor) => self.consumed_baseline.saturating_add(anchor.elapsed()),
            None => self.consumed_baseline,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.consumed())
    }

    pub fn is_frozen(&self) -> bool {
        self.running_anchor.is_none()
    }

    pub fn freeze(&mut self) {
        self.consumed_baseline = self.consumed();
        self.running_anchor = None;
    }

    pub fn thaw(&mut self, now: Instant) {
        if self.running_anchor.is_none() {
            self.running_anchor = Some(now);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub phase_index: Option<usize>,
    pub phase_count: usize,
    pub phase_remaining_ms: u64,
    pub outcome: Option<SessionOutcome>,
}
