use std::sync::Mutex;

use log::{debug, info};

use crate::color::Rgb;
use crate::error::DeviceError;

use super::LightClient;

/// In-memory LED strip. Keeps the last frame so callers can inspect what would be shown.
pub struct SimulatedLight {
    frame: Mutex<Vec<Rgb>>,
}

impl SimulatedLight {
    pub fn new(led_count: usize) -> Self {
        info!("Simulated light with {} LEDs", led_count);
        Self {
            frame: Mutex::new(vec![Rgb::OFF; led_count]),
        }
    }

    pub fn frame(&self) -> Vec<Rgb> {
        self.frame
            .lock()
            .map(|frame| frame.clone())
            .unwrap_or_default()
    }

    fn show(&self, paint: impl FnOnce(&mut [Rgb])) -> Result<(), DeviceError> {
        let mut frame = self
            .frame
            .lock()
            .map_err(|err| DeviceError::Render(err.to_string()))?;
        paint(&mut frame);
        Ok(())
    }
}

impl LightClient for SimulatedLight {
    fn render_solid(&self, color: Rgb) -> Result<(), DeviceError> {
        info!("Setting solid color: ({}, {}, {})", color.r, color.g, color.b);
        self.show(|frame| frame.fill(color))
    }

    fn render_pattern(&self, colors: &[Rgb]) -> Result<(), DeviceError> {
        self.show(|frame| {
            let count = colors.len().min(frame.len());
            frame[..count].copy_from_slice(&colors[..count]);
            debug!("Applied pattern with {} colors", count);
        })
    }

    fn clear(&self) -> Result<(), DeviceError> {
        info!("Clearing all LEDs");
        self.show(|frame| frame.fill(Rgb::OFF))
    }
}
