//! Imager pixel calibration
//!
//! Pixel `c = floor(n / 2)` of an `n`-pixel axis sits on the imager's x
//! position, so a target at the centre pixel means "beam through the imager".

use serde::{Deserialize, Serialize};

/// Sensor geometry of a position-sensitive imager
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagerCalibration {
    /// Pixel count (along steering axis, across)
    pub pixels: [u32; 2],
    /// Physical sensor size in meters (along steering axis, across)
    pub size_m: [f64; 2],
}

impl ImagerCalibration {
    pub fn new(pixels: [u32; 2], size_m: [f64; 2]) -> Self {
        Self { pixels, size_m }
    }

    /// Meters per pixel along the steering axis
    pub fn mppix(&self) -> f64 {
        self.size_m[0] / f64::from(self.pixels[0])
    }

    /// Centre pixel along each axis
    pub fn center_pixel(&self) -> [f64; 2] {
        [
            f64::from(self.pixels[0] / 2),
            f64::from(self.pixels[1] / 2),
        ]
    }

    /// Physical x reached at pixel `p` for an imager positioned at `imager_x`
    pub fn pixel_to_x(&self, p: f64, imager_x: f64) -> f64 {
        imager_x + (p - self.center_pixel()[0]) * self.mppix()
    }

    /// Pixel hit by a beam at physical `x` for an imager positioned at `imager_x`
    pub fn x_to_pixel(&self, x: f64, imager_x: f64) -> f64 {
        self.center_pixel()[0] + (x - imager_x) / self.mppix()
    }

    /// True if both axes have pixels and a positive, finite size
    pub fn is_valid(&self) -> bool {
        self.pixels.iter().all(|&n| n > 0)
            && self.size_m.iter().all(|s| s.is_finite() && *s > 0.0)
    }
}

impl Default for ImagerCalibration {
    /// 1392 x 1040 sensor over 7.6 x 6.2 mm
    fn default() -> Self {
        Self {
            pixels: [1392, 1040],
            size_m: [0.0076, 0.0062],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_mppix() {
        let calibration = ImagerCalibration::default();
        assert_relative_eq!(calibration.mppix(), 0.0076 / 1392.0, epsilon = 1e-15);
        assert_eq!(calibration.center_pixel(), [696.0, 520.0]);
    }

    #[test]
    fn test_center_pixel_maps_to_imager_x() {
        let calibration = ImagerCalibration::default();
        assert_relative_eq!(calibration.pixel_to_x(696.0, 0.0317324), 0.0317324);
        assert_relative_eq!(calibration.x_to_pixel(0.0317324, 0.0317324), 696.0);
    }

    #[test]
    fn test_odd_pixel_count_floors_centre() {
        let calibration = ImagerCalibration::new([5, 3], [5e-3, 3e-3]);
        assert_eq!(calibration.center_pixel(), [2.0, 1.0]);
    }

    #[test]
    fn test_pixel_conversion_inverts() {
        let calibration = ImagerCalibration::default();
        let x = calibration.pixel_to_x(812.25, 0.01);
        assert_relative_eq!(calibration.x_to_pixel(x, 0.01), 812.25, epsilon = 1e-9);
    }

    #[test]
    fn test_validity() {
        assert!(ImagerCalibration::default().is_valid());
        assert!(!ImagerCalibration::new([0, 10], [1e-3, 1e-3]).is_valid());
        assert!(!ImagerCalibration::new([10, 10], [-1e-3, 1e-3]).is_valid());
    }
}
