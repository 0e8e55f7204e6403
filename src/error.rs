use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionState;

/// Fatal startup problems. Nothing is driven until the configuration loads cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Parameters(#[from] ParameterError),
}

/// Session parameters outside their documented ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("start_hour must be 0..=23, got {0}")]
    StartHour(u32),
    #[error("start_minute must be 0..=59, got {0}")]
    StartMinute(u32),
    #[error("total_duration_min must be positive")]
    Duration,
    #[error("fatigue_level must be 1..=5, got {0}")]
    Fatigue(u8),
    #[error("focus_mode must be -1 or 1, got {0}")]
    FocusMode(i32),
}

/// Transient device I/O. Callers log these and carry on.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device not connected")]
    NotConnected,
    #[error("render failed: {0}")]
    Render(String),
    #[error("position read failed: {0}")]
    Read(String),
    #[error("position write failed: {0}")]
    Write(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures that abandon a single actuator action. The session keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("recording not found: {}", .0.display())]
    RecordingNotFound(PathBuf),

    #[error("malformed recording {path}: {source}")]
    Recording {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("recording {path} has a non-numeric value `{value}` in column `{column}`")]
    RecordingValue {
        path: PathBuf,
        column: String,
        value: String,
    },

    #[error("actuator busy with another action")]
    Busy,

    #[error("actuator still busy after {0:?}")]
    BusyTimeout(Duration),

    #[error("joints did not settle within {0:?}")]
    SettleTimeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("actuator worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A session operation that the current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("schedule is empty")]
    EmptySchedule,
    #[error("cannot {op} while {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },
}

/// The rating source could not be read this tick.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rating source {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rating source worker failed: {0}")]
    Worker(String),
}
