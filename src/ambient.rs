use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    color::light_color,
    config::IdleLight,
    device::LightClient,
    session::SessionState,
    signals::FocusSignals,
};

/// Idle light is shown at half the brightness its illuminance maps to.
pub const IDLE_DIMMING: f64 = 0.5;

/// Keeps the idle light on the LEDs whenever no session owns them.
///
/// Renders when the idle values change and again each time a session ends, and stays quiet
/// while the phase loop is driving the light.
pub async fn run_idle_light(
    light: Arc<dyn LightClient>,
    signals: Arc<FocusSignals>,
    mut session_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
) {
    let mut idle_rx = signals.subscribe_idle_light();
    let mut shown: Option<IdleLight> = None;

    loop {
        let state = *session_rx.borrow_and_update();
        let idle = *idle_rx.borrow_and_update();

        if state.is_active() {
            shown = None;
        } else if shown != Some(idle) {
            let color = light_color(idle.cct_k, idle.lux, IDLE_DIMMING);
            match light.render_solid(color) {
                Ok(()) => info!(
                    "Idle light: {}K, {} lx -> ({}, {}, {})",
                    idle.cct_k, idle.lux, color.r, color.g, color.b
                ),
                Err(err) => error!("Failed to render idle light: {}", err),
            }
            shown = Some(idle);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = idle_rx.changed() => if changed.is_err() { break },
            changed = session_rx.changed() => if changed.is_err() { break },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        schedule::{Phase, Schedule},
        session::SessionController,
        test_support::RecordingLight,
    };

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn follows_idle_values_and_yields_to_sessions() {
        let light = Arc::new(RecordingLight::default());
        let signals = Arc::new(FocusSignals::new(IdleLight { cct_k: 4500, lux: 300 }));
        let session = SessionController::new(light.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_idle_light(
            light.clone(),
            signals.clone(),
            session.subscribe(),
            cancel.clone(),
        ));

        settle().await;
        assert_eq!(light.solids(), vec![light_color(4500, 300, IDLE_DIMMING)]);

        signals.set_idle_light(IdleLight { cct_k: 2700, lux: 600 });
        settle().await;
        assert_eq!(light.solids().last(), Some(&light_color(2700, 600, IDLE_DIMMING)));

        session
            .start(Schedule::from_phases(vec![Phase {
                duration_seconds: 60.0,
                color_temperature_kelvin: 5800,
                illuminance_lux: 750,
            }]))
            .await
            .unwrap();
        settle().await;
        let during = light.solids().len();
        signals.set_idle_light(IdleLight { cct_k: 3000, lux: 100 });
        settle().await;
        assert_eq!(light.solids().len(), during);

        session.stop().await;
        settle().await;
        assert_eq!(light.solids().last(), Some(&light_color(3000, 100, IDLE_DIMMING)));

        cancel.cancel();
        task.await.unwrap();
    }
}
