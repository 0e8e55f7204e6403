//! Focus lighting schedule.
//!
//! A session is split into up to three lighting phases: a cool, bright wake-up phase, a
//! moderate phase whose share grows with convergent work and daytime minutes, and a warm, dim
//! low phase for whatever remains. The split is a closed-form function of the session
//! parameters; there is no state and no randomness.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// 17:00 expressed in minutes since midnight.
const EVENING_CUTOFF_MIN: u32 = 17 * 60;
/// Wake-up sizing in the morning formula starts shrinking after 08:00.
const MORNING_REFERENCE_MIN: u32 = 8 * 60;
/// Sessions longer than this use the bright moderate profile.
const LONG_SESSION_MIN: u32 = 90;

const WAKEUP_LIGHT: (u32, u32) = (5800, 750);
const MODERATE_LONG_LIGHT: (u32, u32) = (3000, 750);
const MODERATE_SHORT_LIGHT: (u32, u32) = (4500, 450);
const LOW_LIGHT: (u32, u32) = (3000, 250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum FocusMode {
    /// Divergent thinking, `-1`.
    Divergent,
    /// Convergent thinking, `1`.
    Convergent,
}

impl FocusMode {
    pub fn factor(self) -> f64 {
        match self {
            FocusMode::Divergent => -1.0,
            FocusMode::Convergent => 1.0,
        }
    }

    /// Gateway encoding: `0` is divergent, `1` convergent.
    pub fn from_pattern(pattern: i64) -> Option<Self> {
        match pattern {
            0 => Some(FocusMode::Divergent),
            1 => Some(FocusMode::Convergent),
            _ => None,
        }
    }
}

impl TryFrom<i32> for FocusMode {
    type Error = ParameterError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(FocusMode::Divergent),
            1 => Ok(FocusMode::Convergent),
            other => Err(ParameterError::FocusMode(other)),
        }
    }
}

impl From<FocusMode> for i32 {
    fn from(mode: FocusMode) -> Self {
        match mode {
            FocusMode::Divergent => -1,
            FocusMode::Convergent => 1,
        }
    }
}

/// Human-factors inputs for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub start_hour: u32,
    pub start_minute: u32,
    pub total_duration_min: u32,
    pub fatigue_level: u8,
    pub focus_mode: FocusMode,
}

impl SessionParameters {
    pub fn new(
        start_hour: u32,
        start_minute: u32,
        total_duration_min: u32,
        fatigue_level: u8,
        focus_mode: FocusMode,
    ) -> Result<Self, ParameterError> {
        let params = Self {
            start_hour,
            start_minute,
            total_duration_min,
            fatigue_level,
            focus_mode,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.start_hour > 23 {
            return Err(ParameterError::StartHour(self.start_hour));
        }
        if self.start_minute > 59 {
            return Err(ParameterError::StartMinute(self.start_minute));
        }
        if self.total_duration_min == 0 {
            return Err(ParameterError::Duration);
        }
        if !(1..=5).contains(&self.fatigue_level) {
            return Err(ParameterError::Fatigue(self.fatigue_level));
        }
        Ok(())
    }

    pub fn session_budget(&self) -> Duration {
        Duration::from_secs(u64::from(self.total_duration_min) * 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub duration_seconds: f64,
    pub color_temperature_kelvin: u32,
    pub illuminance_lux: u32,
}

impl Phase {
    fn new(duration_seconds: f64, (kelvin, lux): (u32, u32)) -> Self {
        Self {
            duration_seconds,
            color_temperature_kelvin: kelvin,
            illuminance_lux: lux,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_seconds.max(0.0))
    }
}

/// Minutes allotted to each phase, already clamped to be non-negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseMinutes {
    pub wakeup: f64,
    pub moderate: f64,
    pub low: f64,
}

impl PhaseMinutes {
    pub fn total(&self) -> f64 {
        self.wakeup + self.moderate + self.low
    }
}

/// Ordered phases; execution order is the vector order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    phases: Vec<Phase>,
}

impl Schedule {
    pub fn from_phases(phases: Vec<Phase>) -> Self {
        Self {
            phases: phases
                .into_iter()
                .filter(|phase| phase.duration_seconds > 0.0)
                .collect(),
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn total_seconds(&self) -> f64 {
        self.phases.iter().map(|phase| phase.duration_seconds).sum()
    }
}

pub fn phase_minutes(params: &SessionParameters) -> PhaseMinutes {
    let c = params.start_hour * 60 + params.start_minute;
    let t = f64::from(params.total_duration_min);
    let fatigue = f64::from(params.fatigue_level);

    let t_before_17 = f64::from(
        c.saturating_add(params.total_duration_min)
            .min(EVENING_CUTOFF_MIN)
            .saturating_sub(c),
    );

    let wakeup = if params.start_hour >= 17 {
        0.0
    } else if params.start_hour >= 12 {
        match params.fatigue_level {
            5 => 0.20 * t,
            4 => 0.15 * t,
            _ => 0.0,
        }
    } else {
        let factor1 = 0.7 + 0.1 * fatigue;
        // may go negative for late mornings; only the final minutes are clamped
        let factor2 = 30.0 - 0.0833 * f64::from(c.saturating_sub(MORNING_REFERENCE_MIN));
        t * (factor1 * factor2) / 100.0
    };

    let daytime_share = if t > 0.0 { t_before_17 / t } else { 0.0 };
    let moderate = t * (0.75 * params.focus_mode.factor() + 0.25 * daytime_share).max(0.0);
    let low = t - wakeup - moderate;

    PhaseMinutes {
        wakeup: wakeup.max(0.0),
        moderate: moderate.max(0.0),
        low: low.max(0.0),
    }
}

/// Computes the lighting schedule. An empty result means "no valid schedule".
pub fn calculate(params: &SessionParameters) -> Schedule {
    let minutes = phase_minutes(params);

    let moderate_light = if params.total_duration_min > LONG_SESSION_MIN {
        MODERATE_LONG_LIGHT
    } else {
        MODERATE_SHORT_LIGHT
    };

    Schedule::from_phases(vec![
        Phase::new(minutes.wakeup * 60.0, WAKEUP_LIGHT),
        Phase::new(minutes.moderate * 60.0, moderate_light),
        Phase::new(minutes.low * 60.0, LOW_LIGHT),
    ])
}
