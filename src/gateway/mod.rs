//! Single consumer for every command source.
//!
//! Sources push [`Envelope`]s into one channel; the gateway handles them strictly in arrival
//! order and answers each through its reply channel.

pub mod message;
pub mod sources;

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{debug_mode, ConfigStore},
    interleave::{ActionInterleaver, ActionKind},
    monitor::{MonitorOptions, RatingMonitor, RatingSource},
    schedule,
    session::SessionController,
    signals::FocusSignals,
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[gateway]";

use crate::{log_error, log_info, log_warn};

pub use message::CommandMessage;
pub use sources::{serve_stdin, serve_tcp};

const DEBUG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A raw message plus the channel its reply goes back on.
#[derive(Debug)]
pub struct Envelope {
    pub message: String,
    pub reply: oneshot::Sender<String>,
}

impl Envelope {
    pub fn new(message: impl Into<String>) -> (Self, oneshot::Receiver<String>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                message: message.into(),
                reply,
            },
            rx,
        )
    }
}

pub struct CommandGateway {
    store: Arc<ConfigStore>,
    signals: Arc<FocusSignals>,
    session: SessionController,
    interleaver: ActionInterleaver,
    source: Arc<dyn RatingSource>,
    monitor_cancel: Option<CancellationToken>,
}

impl CommandGateway {
    pub fn new(
        store: Arc<ConfigStore>,
        signals: Arc<FocusSignals>,
        session: SessionController,
        interleaver: ActionInterleaver,
        source: Arc<dyn RatingSource>,
    ) -> Self {
        Self {
            store,
            signals,
            session,
            interleaver,
            source,
            monitor_cancel: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<Envelope>, cancel: CancellationToken) {
        log_info!("Command gateway ready");
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let reply = self.handle(&envelope.message).await;
            if envelope.reply.send(reply).is_err() {
                log_warn!("Command source went away before the reply");
            }
        }

        self.stop_monitor();
        log_info!("Command gateway shutting down");
    }

    /// Applies one message and returns the reply text.
    pub async fn handle(&mut self, raw: &str) -> String {
        log_info!("Received: {}", raw.trim());

        let Some(message) = CommandMessage::parse(raw) else {
            log_warn!("Unparseable message: {}", raw.trim());
            return format!("invalid message: {}", raw.trim());
        };

        let updated = match self.store.apply_update(&message.parameter_update()) {
            Ok(updated) => updated,
            Err(err) => {
                log_error!("Failed to apply parameter update: {err:#}");
                Vec::new()
            }
        };
        if updated.iter().any(|field| matches!(*field, "cct_k" | "lux")) {
            match self.store.idle_light() {
                Ok(idle) => self.signals.set_idle_light(idle),
                Err(err) => log_error!("Failed to read idle light: {err:#}"),
            }
        }

        if let Some(start_focus) = message.start_focus {
            self.apply_start_focus(start_focus).await;
        }

        if let Some(name) = &message.action {
            self.dispatch(ActionKind::Replay(name.clone()));
        }
        if message.go_home == Some(true) {
            self.dispatch(ActionKind::Home);
        }

        ack(&message, &updated)
    }

    async fn apply_start_focus(&mut self, start_focus: bool) {
        let previous = self.signals.set_focus_active(start_focus);
        if previous == start_focus {
            return;
        }
        log_info!("start_focus changed: {} -> {}", previous, start_focus);

        if start_focus {
            if let Err(err) = self.start_focus_session().await {
                log_error!("Failed to start focus session: {err:#}");
                self.signals.set_focus_active(false);
                self.stop_monitor();
            }
        } else {
            self.stop_monitor();
            self.session.stop().await;
            log_info!("Focus session stopped; idle light only");
        }
    }

    async fn start_focus_session(&mut self) -> Result<()> {
        let params = self.store.session_parameters()?;
        let schedule = schedule::calculate(&params);
        if schedule.is_empty() {
            anyhow::bail!("no valid light schedule for {:?}", params);
        }

        if self.session.state().is_active() {
            self.session.stop().await;
        }
        self.session.reset().await?;

        let signals = Arc::clone(&self.signals);
        self.session
            .set_completion_callback(move || {
                if signals.set_focus_active(false) {
                    log::info!("{} Focus session complete, start_focus cleared", LOG_TAG);
                }
            })
            .await;

        let session_id = self
            .session
            .start(schedule)
            .await
            .context("Session controller rejected the schedule")?;
        log_info!("Focus session {} started with {:?}", session_id, params);

        self.spawn_monitor(session_id, params.session_budget())?;
        Ok(())
    }

    fn spawn_monitor(&mut self, session_id: String, budget: Duration) -> Result<()> {
        self.stop_monitor();

        let config = self.store.snapshot()?;
        let available: BTreeSet<String> = self
            .interleaver
            .actuator()
            .list_recordings()
            .into_iter()
            .collect();
        let options = MonitorOptions {
            poll_interval: if debug_mode() {
                DEBUG_POLL_INTERVAL
            } else {
                config.monitor.poll_interval()
            },
            repeat_policy: config.monitor.repeat_policy,
            table: config.monitor.table(),
            available_actions: Some(available),
        };

        let monitor = RatingMonitor::new(
            self.session.clone(),
            self.interleaver.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.signals),
            options,
            budget,
        )
        .for_session(session_id);
        let cancel = CancellationToken::new();
        self.monitor_cancel = Some(cancel.clone());
        tokio::spawn(monitor.run(cancel));
        Ok(())
    }

    fn stop_monitor(&mut self) {
        if let Some(cancel) = self.monitor_cancel.take() {
            cancel.cancel();
        }
    }

    fn dispatch(&self, action: ActionKind) {
        log_info!("Manual action requested: {}", action);
        let interleaver = self.interleaver.clone();
        tokio::spawn(async move {
            if let Err(err) = interleaver.run(action.clone()).await {
                log_error!("Manual action {} failed: {}", action, err);
            }
        });
    }
}

fn ack(message: &CommandMessage, updated: &[&'static str]) -> String {
    let mut ack = Map::new();
    ack.insert("ack".into(), Value::Bool(true));
    if let Some(start_focus) = message.start_focus {
        ack.insert("start_focus".into(), Value::Bool(start_focus));
    }
    if !updated.is_empty() {
        ack.insert("updated".into(), json!(updated));
    }
    if let Some(action) = &message.action {
        ack.insert("action".into(), Value::String(action.clone()));
    }
    if message.go_home == Some(true) {
        ack.insert("go_home".into(), Value::Bool(true));
    }
    Value::Object(ack).to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tokio::time;

    use super::*;
    use crate::{
        config::{IdleLight, LampConfig},
        interleave::InterleaveConfig,
        monitor::FileRatingSource,
        session::SessionState,
        test_support::{RecordingArm, RecordingLight},
    };

    struct Rig {
        gateway: CommandGateway,
        session: SessionController,
        signals: Arc<FocusSignals>,
        arm: Arc<RecordingArm>,
        store: Arc<ConfigStore>,
        _dir: tempfile::TempDir,
    }

    fn rig(duration_min: u32) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LampConfig::default();
        config.session.start_hour = Some(14);
        config.session.start_minute = Some(0);
        config.session.total_duration_min = duration_min;
        let path = dir.path().join("focus_config.json");
        fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let store = Arc::new(ConfigStore::open(path).unwrap());
        let signals = Arc::new(FocusSignals::new(config.idle));
        let session = SessionController::new(Arc::new(RecordingLight::default()));
        let arm = Arc::new(RecordingArm::default());
        let interleaver = ActionInterleaver::new(
            session.clone(),
            arm.clone(),
            InterleaveConfig::default(),
            CancellationToken::new(),
        );
        let source = Arc::new(FileRatingSource::new(
            dir.path().join("detection_log.txt"),
            "rating:",
        ));
        let gateway = CommandGateway::new(
            store.clone(),
            signals.clone(),
            session.clone(),
            interleaver,
            source,
        );
        Rig {
            gateway,
            session,
            signals,
            arm,
            store,
            _dir: dir,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_focus() {
        let mut rig = rig(60);

        let reply = rig.gateway.handle(r#"{"start_focus": true}"#).await;
        assert_eq!(reply, r#"{"ack":true,"start_focus":true}"#);
        assert_eq!(rig.session.state(), SessionState::Running);
        assert!(rig.signals.is_focus_active());

        time::sleep(Duration::from_secs(5)).await;
        let reply = rig.gateway.handle("false").await;
        assert_eq!(reply, r#"{"ack":true,"start_focus":false}"#);
        assert_eq!(rig.session.state(), SessionState::Stopped);
        assert!(!rig.signals.is_focus_active());

        rig.gateway.handle("true").await;
        assert_eq!(rig.session.state(), SessionState::Running);
        rig.gateway.handle("false").await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_true_does_not_restart() {
        let mut rig = rig(60);
        rig.gateway.handle("true").await;
        let first = rig.session.snapshot().await.session_id;

        rig.gateway.handle("true").await;
        assert_eq!(rig.session.snapshot().await.session_id, first);
        rig.gateway.handle("false").await;
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_clears_the_flag() {
        let mut rig = rig(1);
        rig.gateway.handle(r#"{"start_focus": true}"#).await;

        time::sleep(Duration::from_secs(75)).await;

        assert!(!rig.signals.is_focus_active());
        assert_eq!(rig.session.state(), SessionState::Stopped);
        assert!(rig.session.snapshot().await.outcome.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn parameter_updates_are_acked_and_stored() {
        let mut rig = rig(60);
        let reply = rig
            .gateway
            .handle(r#"{"start_hour": 8, "focus_hour": 1, "focus_min": 30, "cct_k": 9000, "lux": 40}"#)
            .await;

        let ack: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(ack["ack"], json!(true));
        assert_eq!(
            ack["updated"],
            json!(["start_hour", "focus_hour", "focus_min", "cct_k", "lux"])
        );
        assert!(ack.get("start_focus").is_none());

        let config = rig.store.snapshot().unwrap();
        assert_eq!(config.session.start_hour, Some(8));
        assert_eq!(config.session.total_duration_min, 90);
        assert_eq!(
            rig.signals.idle_light(),
            IdleLight {
                cct_k: 6500,
                lux: 40
            }
        );
        assert_eq!(rig.session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_is_rejected() {
        let mut rig = rig(60);
        assert_eq!(
            rig.gateway.handle("lights please").await,
            "invalid message: lights please"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_action_plays_through_the_interleaver() {
        let mut rig = rig(60);
        let reply = rig.gateway.handle(r#"{"action": "excited"}"#).await;
        assert_eq!(reply, r#"{"ack":true,"action":"excited"}"#);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.arm.played(), vec!["excited".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_flow_through_the_channel() {
        let rig = rig(60);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(rig.gateway.run(rx, cancel.clone()));

        let (envelope, reply) = Envelope::new(r#"{"exhaustion_level": 9}"#);
        tx.send(envelope).await.unwrap();
        assert_eq!(
            reply.await.unwrap(),
            r#"{"ack":true,"updated":["exhaustion_level"]}"#
        );
        assert_eq!(rig.store.snapshot().unwrap().session.fatigue_level, 5);

        cancel.cancel();
        task.await.unwrap();
    }
}
