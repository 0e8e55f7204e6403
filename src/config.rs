use std::{
    collections::BTreeMap,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Timelike};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    device::SettleConfig,
    error::ConfigError,
    monitor::{RatingTable, RepeatPolicy},
    schedule::{FocusMode, SessionParameters},
};

pub const DEFAULT_CONFIG_PATH: &str = "focus_config.json";
pub const DEFAULT_RATING_MARKER: &str = "专注状态评级:";

pub const CCT_RANGE_K: (u32, u32) = (1000, 6500);
pub const LUX_RANGE: (u32, u32) = (0, 1000);

/// Upper bound for poll intervals and action timeouts, in seconds.
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Session inputs as stored on disk. Start time falls back to the local clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub start_hour: Option<u32>,
    pub start_minute: Option<u32>,
    pub total_duration_min: u32,
    pub fatigue_level: u8,
    pub focus_mode: FocusMode,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start_hour: None,
            start_minute: None,
            total_duration_min: 60,
            fatigue_level: 3,
            focus_mode: FocusMode::Convergent,
        }
    }
}

impl SessionSettings {
    pub fn parameters(&self) -> Result<SessionParameters, ConfigError> {
        let now = Local::now();
        let parameters = SessionParameters::new(
            self.start_hour.unwrap_or_else(|| now.hour()),
            self.start_minute.unwrap_or_else(|| now.minute()),
            self.total_duration_min,
            self.fatigue_level,
            self.focus_mode,
        )?;
        Ok(parameters)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleLight {
    pub cct_k: u32,
    pub lux: u32,
}

impl Default for IdleLight {
    fn default() -> Self {
        Self {
            cct_k: 2700,
            lux: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: f64,
    pub repeat_policy: RepeatPolicy,
    /// Replaces the built-in rating table when present.
    pub rating_table: Option<BTreeMap<i32, String>>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10.0,
            repeat_policy: RepeatPolicy::default(),
            rating_table: None,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn table(&self) -> RatingTable {
        match &self.rating_table {
            Some(entries) => RatingTable::from_entries(entries.clone()),
            None => RatingTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub tcp: Option<SocketAddr>,
    pub stdin: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            tcp: None,
            stdin: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub phase_tick_ms: u64,
    pub action_fps: u32,
    pub busy_poll_ms: u64,
    pub action_timeout_secs: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            phase_tick_ms: 100,
            action_fps: 30,
            busy_poll_ms: 100,
            action_timeout_secs: 60,
        }
    }
}

impl TimingSettings {
    pub fn phase_tick(&self) -> Duration {
        Duration::from_millis(self.phase_tick_ms)
    }

    pub fn busy_poll(&self) -> Duration {
        Duration::from_millis(self.busy_poll_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HomingSettings {
    pub on_start: bool,
    #[serde(flatten)]
    pub settle: SettleConfig,
}

impl Default for HomingSettings {
    fn default() -> Self {
        Self {
            on_start: true,
            settle: SettleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LampConfig {
    pub lamp_id: String,
    pub lamp_port: String,
    pub recordings_dir: PathBuf,
    pub rating_log: PathBuf,
    pub rating_marker: String,
    pub session: SessionSettings,
    pub idle: IdleLight,
    pub monitor: MonitorSettings,
    pub gateway: GatewaySettings,
    pub timing: TimingSettings,
    pub homing: HomingSettings,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            lamp_id: "lelamp".into(),
            lamp_port: "/dev/ttyACM0".into(),
            recordings_dir: PathBuf::from("recordings"),
            rating_log: PathBuf::from("focus_ratings.log"),
            rating_marker: DEFAULT_RATING_MARKER.into(),
            session: SessionSettings::default(),
            idle: IdleLight::default(),
            monitor: MonitorSettings::default(),
            gateway: GatewaySettings::default(),
            timing: TimingSettings::default(),
            homing: HomingSettings::default(),
        }
    }
}

impl LampConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: LampConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lamp_id.trim().is_empty() {
            return Err(invalid("lamp_id", "must not be empty"));
        }
        if self.rating_marker.is_empty() {
            return Err(invalid("rating_marker", "must not be empty"));
        }
        if !in_range(self.idle.cct_k, CCT_RANGE_K) {
            return Err(invalid(
                "idle.cct_k",
                format!("{} outside {}..={}", self.idle.cct_k, CCT_RANGE_K.0, CCT_RANGE_K.1),
            ));
        }
        if !in_range(self.idle.lux, LUX_RANGE) {
            return Err(invalid(
                "idle.lux",
                format!("{} outside {}..={}", self.idle.lux, LUX_RANGE.0, LUX_RANGE.1),
            ));
        }
        let poll = self.monitor.poll_interval_secs;
        if !(poll.is_finite() && poll > 0.0 && poll <= MAX_WAIT_SECS as f64) {
            return Err(invalid(
                "monitor.poll_interval_secs",
                format!("must be in (0, {MAX_WAIT_SECS}]"),
            ));
        }
        if let Some(table) = &self.monitor.rating_table {
            if table.contains_key(&0) {
                return Err(invalid("monitor.rating_table", "rating 0 is reserved"));
            }
        }
        if self.gateway.tcp.is_none() && !self.gateway.stdin {
            return Err(invalid("gateway", "enable at least one command source"));
        }
        if self.timing.phase_tick_ms == 0 || self.timing.busy_poll_ms == 0 {
            return Err(invalid("timing", "tick and busy poll must be non-zero"));
        }
        if self.timing.action_timeout_secs > MAX_WAIT_SECS {
            return Err(invalid(
                "timing.action_timeout_secs",
                format!("must be at most {MAX_WAIT_SECS}"),
            ));
        }
        if self.homing.settle.timeout_ms > MAX_WAIT_SECS * 1000 {
            return Err(invalid(
                "homing.timeout_ms",
                format!("must be at most {}", MAX_WAIT_SECS * 1000),
            ));
        }
        if self.timing.action_fps == 0 {
            return Err(invalid("timing.action_fps", "must be non-zero"));
        }
        if self.homing.settle.stable_reads == 0 || self.homing.settle.interval_ms == 0 {
            return Err(invalid("homing", "interval and stable_reads must be non-zero"));
        }

        let session = &self.session;
        let check = SessionParameters {
            start_hour: session.start_hour.unwrap_or(0),
            start_minute: session.start_minute.unwrap_or(0),
            total_duration_min: session.total_duration_min,
            fatigue_level: session.fatigue_level,
            focus_mode: session.focus_mode,
        };
        check.validate()?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn in_range(value: u32, (low, high): (u32, u32)) -> bool {
    (low..=high).contains(&value)
}

/// Config path from the first CLI argument, then `FOCUSLAMP_CONFIG`, then the default.
pub fn resolve_config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FOCUSLAMP_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// `FOCUSLAMP_DEBUG=1` polls the rating source every second.
pub fn debug_mode() -> bool {
    std::env::var("FOCUSLAMP_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parameter changes carried by one gateway message. Values are raw and clamped on apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterUpdate {
    pub start_hour: Option<i64>,
    pub start_min: Option<i64>,
    pub focus_hour: Option<i64>,
    pub focus_min: Option<i64>,
    pub exhaustion_level: Option<i64>,
    pub focus_pattern: Option<i64>,
    pub cct_k: Option<i64>,
    pub lux: Option<i64>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ParameterUpdate::default()
    }
}

/// Live configuration shared between the gateway and the session start path.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<LampConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf, config: LampConfig) -> Self {
        Self {
            path,
            data: RwLock::new(config),
        }
    }

    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let config = LampConfig::load(&path)?;
        Ok(Self::new(path, config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<LampConfig> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("config lock poisoned"))?;
        Ok(guard.clone())
    }

    pub fn session_parameters(&self) -> Result<SessionParameters> {
        let session = self.snapshot()?.session;
        session
            .parameters()
            .context("Failed to build session parameters from config")
    }

    pub fn idle_light(&self) -> Result<IdleLight> {
        Ok(self.snapshot()?.idle)
    }

    /// Applies `update` with range clamping, persists, and returns the names of the fields that
    /// were applied.
    pub fn apply_update(&self, update: &ParameterUpdate) -> Result<Vec<&'static str>> {
        if update.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("config lock poisoned"))?;
        let applied = apply_clamped(&mut guard, update);
        self.persist(&guard)?;
        info!("Applied parameter update: {}", applied.join(", "));
        Ok(applied)
    }

    fn persist(&self, data: &LampConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}

fn clamp_u32(value: i64, low: u32, high: u32) -> u32 {
    value.clamp(i64::from(low), i64::from(high)) as u32
}

fn apply_clamped(config: &mut LampConfig, update: &ParameterUpdate) -> Vec<&'static str> {
    let mut applied = Vec::new();
    let session = &mut config.session;

    if let Some(hour) = update.start_hour {
        session.start_hour = Some(clamp_u32(hour, 0, 23));
        applied.push("start_hour");
    }
    if let Some(minute) = update.start_min {
        session.start_minute = Some(clamp_u32(minute, 0, 59));
        applied.push("start_min");
    }

    if update.focus_hour.is_some() || update.focus_min.is_some() {
        let current_hours = i64::from(session.total_duration_min / 60);
        let current_minutes = i64::from(session.total_duration_min % 60);
        let hours = update.focus_hour.unwrap_or(current_hours).max(0);
        let minutes = update.focus_min.unwrap_or(current_minutes).clamp(0, 59);
        let total = hours
            .saturating_mul(60)
            .saturating_add(minutes)
            .clamp(1, i64::from(u32::MAX));
        session.total_duration_min = total as u32;
        if update.focus_hour.is_some() {
            applied.push("focus_hour");
        }
        if update.focus_min.is_some() {
            applied.push("focus_min");
        }
    }

    if let Some(level) = update.exhaustion_level {
        session.fatigue_level = level.clamp(1, 5) as u8;
        applied.push("exhaustion_level");
    }
    if let Some(mode) = update.focus_pattern.and_then(FocusMode::from_pattern) {
        session.focus_mode = mode;
        applied.push("focus_pattern");
    }

    if let Some(cct) = update.cct_k {
        config.idle.cct_k = clamp_u32(cct, CCT_RANGE_K.0, CCT_RANGE_K.1);
        applied.push("cct_k");
    }
    if let Some(lux) = update.lux {
        config.idle.lux = clamp_u32(lux, LUX_RANGE.0, LUX_RANGE.1);
        applied.push("lux");
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> ConfigStore {
        let path = dir.path().join("focus_config.json");
        fs::write(&path, serde_json::to_string(&LampConfig::default()).unwrap()).unwrap();
        ConfigStore::open(path).unwrap()
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, r#"{"lamp_id": "desk", "session": {"start_hour": 9}}"#).unwrap();

        let config = LampConfig::load(&path).unwrap();
        assert_eq!(config.lamp_id, "desk");
        assert_eq!(config.session.start_hour, Some(9));
        assert_eq!(config.session.start_minute, None);
        assert_eq!(config.rating_marker, DEFAULT_RATING_MARKER);
        assert_eq!(config.homing.settle.stable_reads, 5);
    }

    #[test]
    fn out_of_range_values_fail_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");

        fs::write(&path, r#"{"idle": {"cct_k": 9000, "lux": 100}}"#).unwrap();
        assert!(matches!(
            LampConfig::load(&path),
            Err(ConfigError::Invalid { field: "idle.cct_k", .. })
        ));

        fs::write(&path, r#"{"session": {"fatigue_level": 7}}"#).unwrap();
        assert!(matches!(
            LampConfig::load(&path),
            Err(ConfigError::Parameters(_))
        ));

        fs::write(&path, r#"{"session": {"focus_mode": 0}}"#).unwrap();
        assert!(matches!(LampConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LampConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn update_clamps_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let applied = store
            .apply_update(&ParameterUpdate {
                start_hour: Some(30),
                start_min: Some(-4),
                exhaustion_level: Some(9),
                focus_pattern: Some(0),
                cct_k: Some(200),
                lux: Some(5000),
                ..ParameterUpdate::default()
            })
            .unwrap();
        assert_eq!(
            applied,
            vec!["start_hour", "start_min", "exhaustion_level", "focus_pattern", "cct_k", "lux"]
        );

        let reloaded = LampConfig::load(store.path()).unwrap();
        assert_eq!(reloaded.session.start_hour, Some(23));
        assert_eq!(reloaded.session.start_minute, Some(0));
        assert_eq!(reloaded.session.fatigue_level, 5);
        assert_eq!(reloaded.session.focus_mode, FocusMode::Divergent);
        assert_eq!(reloaded.idle, IdleLight { cct_k: 1000, lux: 1000 });
    }

    #[test]
    fn duration_merges_hour_and_minute() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store
            .apply_update(&ParameterUpdate {
                focus_hour: Some(2),
                ..ParameterUpdate::default()
            })
            .unwrap();
        assert_eq!(store.snapshot().unwrap().session.total_duration_min, 120);

        store
            .apply_update(&ParameterUpdate {
                focus_min: Some(75),
                ..ParameterUpdate::default()
            })
            .unwrap();
        assert_eq!(store.snapshot().unwrap().session.total_duration_min, 179);
    }

    #[test]
    fn oversized_duration_update_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let applied = store
            .apply_update(&ParameterUpdate {
                focus_hour: Some(i64::MAX),
                focus_min: Some(i64::MAX),
                ..ParameterUpdate::default()
            })
            .unwrap();
        assert_eq!(applied, vec!["focus_hour", "focus_min"]);
        assert_eq!(store.snapshot().unwrap().session.total_duration_min, u32::MAX);
    }

    #[test]
    fn unbounded_waits_fail_validation() {
        let mut config = LampConfig::default();
        config.monitor.poll_interval_secs = 1e300;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = LampConfig::default();
        config.timing.action_timeout_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = LampConfig::default();
        config.homing.settle.timeout_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = LampConfig::default();
        config.monitor.poll_interval_secs = MAX_WAIT_SECS as f64;
        config.timing.action_timeout_secs = MAX_WAIT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_update_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let before = fs::read_to_string(store.path()).unwrap();

        assert!(store.apply_update(&ParameterUpdate::default()).unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }
}
