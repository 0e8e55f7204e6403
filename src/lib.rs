pub mod ambient;
pub mod app;
pub mod color;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod interleave;
pub mod monitor;
pub mod schedule;
pub mod session;
pub mod signals;
mod utils;

#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};

use app::LampApp;
use config::{resolve_config_path, ConfigStore};
use device::{RecordingActuator, SimulatedBus, SimulatedLight};

/// LED count of the lamp head.
const LED_COUNT: usize = 40;

/// Time allowed for blocking workers (stdin, replays) once the app has powered down.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("focuslamp starting up...");

    let config_path = resolve_config_path();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("{err:#}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run_lamp(config_path));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    if let Err(err) = result {
        log::error!("focuslamp stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn run_lamp(config_path: PathBuf) -> Result<()> {
    let store = ConfigStore::open(config_path.clone())
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let config = store.snapshot()?;
    log::info!("Loaded config from {}", config_path.display());

    let light = Arc::new(SimulatedLight::new(LED_COUNT));
    let actuator = Arc::new(RecordingActuator::new(
        SimulatedBus::lamp(),
        config.recordings_dir.clone(),
        config.lamp_id.clone(),
    ));

    let app = LampApp::new(Arc::new(store), light, actuator)?;
    app.connect().await?;
    app.serve().await
}
