//! Device capability traits
//!
//! The alignment core talks to hardware (or the simulated fixture) through a
//! small set of independent capabilities:
//!
//! - [`Readback`] - named readbacks with timestamps (every device)
//! - [`Actuator`] - commanded setpoints plus a "still moving" signal (mirrors)
//! - [`CentroidReadout`] - beam centroid and pixel calibration (imagers)
//!
//! An [`Imager`] is any device that is both a readback and a centroid readout.
//! Notification is a separate capability, see [`crate::events::Subscribable`].

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::calibration::ImagerCalibration;

/// Error type for device operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Readback failed
    #[error("read failed on {device}: {reason}")]
    Read { device: String, reason: String },

    /// Setpoint command was rejected or failed
    #[error("command failed on {device}: {reason}")]
    Command { device: String, reason: String },

    /// The device answered but did not report the requested readback
    #[error("{device} has no readback named '{key}'")]
    MissingReadback { device: String, key: String },

    /// The device kept reporting motion past the settle timeout
    #[error("{device} still moving after {timeout:?}")]
    SettleTimeout { device: String, timeout: Duration },
}

impl DeviceError {
    /// Name of the device that raised the error
    pub fn device(&self) -> &str {
        match self {
            DeviceError::Read { device, .. }
            | DeviceError::Command { device, .. }
            | DeviceError::MissingReadback { device, .. }
            | DeviceError::SettleTimeout { device, .. } => device,
        }
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// A single timestamped readback value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    /// When the value was sampled
    pub timestamp: SystemTime,
}

impl Reading {
    /// Reading sampled now
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: SystemTime::now(),
        }
    }
}

/// Readback name to reading
pub type Readings = BTreeMap<String, Reading>;

/// Value of `key` in `readings` sampled from `device`
///
/// # Errors
/// * `DeviceError::MissingReadback` if `key` is absent
pub fn reading_value(readings: &Readings, device: &str, key: &str) -> DeviceResult<f64> {
    readings
        .get(key)
        .map(|reading| reading.value)
        .ok_or_else(|| DeviceError::MissingReadback {
            device: device.to_string(),
            key: key.to_string(),
        })
}

/// Beam centroid on an imager, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCentroid {
    /// Along the steering axis
    pub x: f64,
    /// Across the steering axis
    pub y: f64,
}

/// Named readbacks
///
/// Conventional keys: `x`, `xp` for a source; `x`, `z`, `alpha` for a
/// mirror; `x`, `z` for an imager.
pub trait Readback: Send {
    /// Device name used in logs and errors
    fn name(&self) -> &str;

    /// Sample every readback the device exposes
    fn read(&mut self) -> DeviceResult<Readings>;

    /// Sample and return a single readback value
    ///
    /// # Errors
    /// * `DeviceError::MissingReadback` if the device does not report `key`
    fn read_value(&mut self, key: &str) -> DeviceResult<f64> {
        let readings = self.read()?;
        reading_value(&readings, self.name(), key)
    }
}

/// A device that accepts setpoints
pub trait Actuator: Readback {
    /// Command one or more named setpoints
    ///
    /// May return before motion completes; poll [`Actuator::is_moving`] to settle.
    fn set(&mut self, values: &[(&str, f64)]) -> DeviceResult<()>;

    /// True while a commanded move is still in progress
    fn is_moving(&mut self) -> DeviceResult<bool>;
}

/// Centroid readout for position-sensitive detectors
pub trait CentroidReadout {
    /// Current beam centroid
    fn centroid(&mut self) -> DeviceResult<PixelCentroid>;

    /// Pixel count and physical size of the sensor
    fn calibration(&self) -> ImagerCalibration;
}

/// Readback plus centroid readout
pub trait Imager: Readback + CentroidReadout {}

impl<T: Readback + CentroidReadout> Imager for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReadback {
        readings: Readings,
    }

    impl Readback for FixedReadback {
        fn name(&self) -> &str {
            "fixed"
        }

        fn read(&mut self) -> DeviceResult<Readings> {
            Ok(self.readings.clone())
        }
    }

    #[test]
    fn test_read_value_present() {
        let mut device = FixedReadback {
            readings: Readings::from([("x".to_string(), Reading::now(1.5))]),
        };
        assert_eq!(device.read_value("x").unwrap(), 1.5);
    }

    #[test]
    fn test_read_value_missing() {
        let mut device = FixedReadback {
            readings: Readings::new(),
        };
        let err = device.read_value("alpha").unwrap_err();
        assert_eq!(
            err,
            DeviceError::MissingReadback {
                device: "fixed".to_string(),
                key: "alpha".to_string(),
            }
        );
        assert_eq!(err.device(), "fixed");
    }

    #[test]
    fn test_reading_value_names_device_and_key() {
        let readings = Readings::from([("z".to_string(), Reading::now(90.51))]);
        assert_eq!(reading_value(&readings, "mirror_1", "z").unwrap(), 90.51);
        assert_eq!(
            reading_value(&readings, "mirror_1", "alpha").unwrap_err(),
            DeviceError::MissingReadback {
                device: "mirror_1".to_string(),
                key: "alpha".to_string(),
            }
        );
    }
}
