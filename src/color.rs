//! Color-temperature and illuminance conversions for the LED ring.

use serde::{Deserialize, Serialize};

/// Illuminance that maps to full LED brightness.
pub const MAX_ILLUMINANCE_LUX: f64 = 750.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

fn channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Tanner Helland's black-body approximation.
pub fn kelvin_to_rgb(kelvin: u32) -> Rgb {
    let temp = f64::from(kelvin) / 100.0;

    let (red, green) = if temp <= 66.0 {
        (255.0, 99.470_802_586_1 * temp.ln() - 161.119_568_166_1)
    } else {
        (
            329.698_727_446 * (temp - 60.0).powf(-0.133_204_759_2),
            288.122_169_528_3 * (temp - 60.0).powf(-0.075_514_849_2),
        )
    };

    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.517_731_223_1 * (temp - 10.0).ln() - 305.044_792_730_7
    };

    Rgb::new(channel(red), channel(green), channel(blue))
}

pub fn illuminance_to_brightness(lux: u32) -> f64 {
    (f64::from(lux) / MAX_ILLUMINANCE_LUX).clamp(0.0, 1.0)
}

pub fn apply_brightness(color: Rgb, brightness: f64) -> Rgb {
    let scale = |c: u8| (f64::from(c) * brightness) as u8;
    Rgb::new(scale(color.r), scale(color.g), scale(color.b))
}

/// Renderable color for a target color temperature and illuminance, scaled by `dimming`.
pub fn light_color(kelvin: u32, lux: u32, dimming: f64) -> Rgb {
    apply_brightness(
        kelvin_to_rgb(kelvin),
        illuminance_to_brightness(lux) * dimming,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_light_has_full_red_and_weak_blue() {
        let color = kelvin_to_rgb(3000);
        assert_eq!(color.r, 255);
        assert!(color.b < color.g);
    }

    #[test]
    fn cool_light_has_full_blue() {
        let color = kelvin_to_rgb(6600);
        assert_eq!(color.b, 255);
        assert!(color.r <= 255);
    }

    #[test]
    fn brightness_saturates_at_max_illuminance() {
        assert_eq!(illuminance_to_brightness(0), 0.0);
        assert_eq!(illuminance_to_brightness(375), 0.5);
        assert_eq!(illuminance_to_brightness(2000), 1.0);
    }

    #[test]
    fn dimming_scales_each_channel() {
        let color = apply_brightness(Rgb::new(200, 100, 50), 0.5);
        assert_eq!(color, Rgb::new(100, 50, 25));
        assert_eq!(light_color(4500, 0, 1.0), Rgb::OFF);
    }
}
