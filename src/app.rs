use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    ambient::run_idle_light,
    config::{ConfigStore, LampConfig},
    device::{ActuatorClient, LightClient},
    gateway::{serve_stdin, serve_tcp, CommandGateway, Envelope},
    interleave::{ActionInterleaver, ActionKind, InterleaveConfig},
    monitor::{FileRatingSource, RatingSource},
    session::SessionController,
    signals::FocusSignals,
};

pub const BEGINNING_ACTION: &str = "0_beginning";
pub const ENDING_ACTION: &str = "0_ending";

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Everything one lamp needs, wired together.
pub struct LampApp {
    config: LampConfig,
    store: Arc<ConfigStore>,
    signals: Arc<FocusSignals>,
    light: Arc<dyn LightClient>,
    actuator: Arc<dyn ActuatorClient>,
    session: SessionController,
    interleaver: ActionInterleaver,
    source: Arc<dyn RatingSource>,
    shutdown: CancellationToken,
    actuator_cancel: CancellationToken,
}

impl LampApp {
    pub fn new(
        store: Arc<ConfigStore>,
        light: Arc<dyn LightClient>,
        actuator: Arc<dyn ActuatorClient>,
    ) -> Result<Self> {
        let config = store.snapshot()?;
        let signals = Arc::new(FocusSignals::new(config.idle));
        let session = SessionController::with_tick(light.clone(), config.timing.phase_tick());
        let actuator_cancel = CancellationToken::new();
        let interleaver = ActionInterleaver::new(
            session.clone(),
            actuator.clone(),
            InterleaveConfig::from(&config),
            actuator_cancel.clone(),
        );
        let source: Arc<dyn RatingSource> = Arc::new(FileRatingSource::new(
            config.rating_log.clone(),
            config.rating_marker.clone(),
        ));

        Ok(Self {
            config,
            store,
            signals,
            light,
            actuator,
            session,
            interleaver,
            source,
            shutdown: CancellationToken::new(),
            actuator_cancel,
        })
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn signals(&self) -> &Arc<FocusSignals> {
        &self.signals
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connects the arm and homes it. Connection failure is fatal, homing failure is not.
    pub async fn connect(&self) -> Result<()> {
        info!(
            "Connecting lamp {} on {}",
            self.config.lamp_id, self.config.lamp_port
        );
        self.actuator
            .connect(true)
            .with_context(|| format!("Failed to connect lamp on {}", self.config.lamp_port))?;

        let available = self.actuator.list_recordings();
        info!("Available actions: {:?}", available);

        if self.config.homing.on_start {
            if let Err(err) = self.interleaver.run(ActionKind::Home).await {
                warn!("Homing failed, continuing from current pose: {}", err);
            }
        }
        Ok(())
    }

    /// Plays `name` if this lamp has a recording for it.
    pub async fn play_if_available(&self, name: &str) {
        if !self.actuator.list_recordings().iter().any(|n| n == name) {
            info!("No {} recording for this lamp, skipping", name);
            return;
        }
        if let Err(err) = self.interleaver.run(ActionKind::Replay(name.into())).await {
            error!("Failed to play {}: {}", name, err);
        }
    }

    fn spawn_sources(&self, tx: mpsc::Sender<Envelope>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(addr) = self.config.gateway.tcp {
            let tx = tx.clone();
            let cancel = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = serve_tcp(addr, tx, cancel).await {
                    error!("TCP command source failed: {err:#}");
                }
            }));
        }

        if self.config.gateway.stdin {
            let cancel = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = serve_stdin(tx, cancel).await {
                    error!("stdin command source failed: {err:#}");
                }
            }));
        }

        handles
    }

    /// Runs until Ctrl-C or until the shutdown token is cancelled, then powers down cleanly.
    pub async fn serve(self) -> Result<()> {
        let idle_task = tokio::spawn(run_idle_light(
            self.light.clone(),
            self.signals.clone(),
            self.session.subscribe(),
            self.shutdown.clone(),
        ));

        self.play_if_available(BEGINNING_ACTION).await;

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let sources = self.spawn_sources(tx);
        let gateway = CommandGateway::new(
            self.store.clone(),
            self.signals.clone(),
            self.session.clone(),
            self.interleaver.clone(),
            self.source.clone(),
        );
        let gateway_task = tokio::spawn(gateway.run(rx, self.shutdown.clone()));
        info!("Lamp {} ready for commands", self.config.lamp_id);

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!("Failed to listen for Ctrl-C: {}", err);
                }
                info!("Shutdown requested");
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown.cancel();
        if let Err(err) = gateway_task.await {
            error!("Gateway task failed: {}", err);
        }
        // stdin reads cannot be interrupted, so sources are not awaited
        drop(sources);
        if let Err(err) = idle_task.await {
            error!("Idle light task failed: {}", err);
        }

        self.power_down().await;
        Ok(())
    }

    async fn power_down(&self) {
        self.signals.set_focus_active(false);
        self.session.stop().await;
        self.play_if_available(ENDING_ACTION).await;
        self.actuator_cancel.cancel();

        if let Err(err) = self.light.clear() {
            error!("Failed to clear light on shutdown: {}", err);
        }
        if let Err(err) = self.actuator.disconnect() {
            error!("Failed to disconnect lamp: {}", err);
        }
        info!("Lamp {} powered down", self.config.lamp_id);
    }
}
