//! Simulated relay fixture
//!
//! A source, two flat steering mirrors and two imagers sharing one simulated
//! world. Imager centroids come from the exact transport law, so alignment
//! code that only sees the device traits can be exercised end to end.
//!
//! Readbacks carry optional uniform noise from a seeded RNG. Motion is
//! simulated by having each actuator report "still moving" for a fixed number
//! of polls after every accepted setpoint. Faults can be injected per device
//! through the [`SimHandle`].

mod devices;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use beam_math::{BeamState, MirrorPlacement, RelayGeometry, TransportLaw};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::ImagerCalibration;
use crate::events::CallbackRegistry;
use crate::relay::{Leg, Relay};

pub use devices::{SimImager, SimMirror, SimSource};

/// Errors in a simulated fixture description
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimConfigError {
    #[error("invalid simulation parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Simulated source beam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSourceConfig {
    /// Position at the reference plane (m)
    pub x: f64,
    /// Angle (rad)
    pub xp: f64,
    /// Half-width of uniform readback noise on `x` (m)
    pub noise_x: f64,
    /// Half-width of uniform readback noise on `xp` (rad)
    pub noise_xp: f64,
}

/// Simulated flat steering mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimMirrorConfig {
    pub x: f64,
    pub z: f64,
    /// Starting pitch (rad)
    pub alpha: f64,
    /// Half-width of uniform readback noise on `alpha` (rad)
    pub noise_alpha: f64,
}

/// Simulated position-sensitive imager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimImagerConfig {
    pub x: f64,
    pub z: f64,
    pub calibration: ImagerCalibration,
    /// Half-width of uniform noise on the centroid (pixels)
    pub noise_centroid_px: f64,
    /// Whether the imager starts in the beam path
    pub inserted: bool,
}

/// Full description of the simulated relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimRelayConfig {
    pub source: SimSourceConfig,
    pub mirror_1: SimMirrorConfig,
    pub mirror_2: SimMirrorConfig,
    pub imager_1: SimImagerConfig,
    pub imager_2: SimImagerConfig,
    /// Polls an actuator reports "still moving" after each accepted setpoint
    pub motion_polls: u32,
    /// RNG seed for readback noise
    pub seed: u64,
}

impl Default for SimRelayConfig {
    fn default() -> Self {
        let imager = |z: f64| SimImagerConfig {
            x: 0.0317324,
            z,
            calibration: ImagerCalibration::default(),
            noise_centroid_px: 0.0,
            inserted: true,
        };
        Self {
            source: SimSourceConfig {
                x: 0.0,
                xp: 0.0,
                noise_x: 0.0,
                noise_xp: 0.0,
            },
            mirror_1: SimMirrorConfig {
                x: 0.0,
                z: 90.510,
                alpha: 0.0014,
                noise_alpha: 0.0,
            },
            mirror_2: SimMirrorConfig {
                x: 0.0317324,
                z: 101.843,
                alpha: 0.0014,
                noise_alpha: 0.0,
            },
            imager_1: imager(103.660),
            imager_2: imager(375.000),
            motion_polls: 2,
            seed: 0,
        }
    }
}

fn require_finite(name: &'static str, value: f64) -> Result<(), SimConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimConfigError::InvalidParameter {
            name,
            reason: format!("{value} is not finite"),
        })
    }
}

fn require_noise(name: &'static str, value: f64) -> Result<(), SimConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimConfigError::InvalidParameter {
            name,
            reason: format!("noise amplitude {value} must be finite and non-negative"),
        })
    }
}

impl SimRelayConfig {
    /// Same fixture with both mirrors starting at the given pitches
    pub fn with_alphas(mut self, alpha_1: f64, alpha_2: f64) -> Self {
        self.mirror_1.alpha = alpha_1;
        self.mirror_2.alpha = alpha_2;
        self
    }

    pub fn validate(&self) -> Result<(), SimConfigError> {
        require_finite("source.x", self.source.x)?;
        require_finite("source.xp", self.source.xp)?;
        require_noise("source.noise_x", self.source.noise_x)?;
        require_noise("source.noise_xp", self.source.noise_xp)?;

        for (prefix, mirror) in [("mirror_1", &self.mirror_1), ("mirror_2", &self.mirror_2)] {
            require_finite(prefix, mirror.x)?;
            require_finite(prefix, mirror.z)?;
            require_finite(prefix, mirror.alpha)?;
            require_noise(prefix, mirror.noise_alpha)?;
        }

        for (prefix, imager) in [("imager_1", &self.imager_1), ("imager_2", &self.imager_2)] {
            require_finite(prefix, imager.x)?;
            require_finite(prefix, imager.z)?;
            require_noise(prefix, imager.noise_centroid_px)?;
            if !imager.calibration.is_valid() {
                return Err(SimConfigError::InvalidParameter {
                    name: prefix,
                    reason: format!("invalid calibration {:?}", imager.calibration),
                });
            }
        }
        Ok(())
    }
}

/// The five simulated devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimDevice {
    Source,
    Mirror1,
    Mirror2,
    Imager1,
    Imager2,
}

impl SimDevice {
    pub fn name(self) -> &'static str {
        match self {
            SimDevice::Source => "source",
            SimDevice::Mirror1 => "mirror_1",
            SimDevice::Mirror2 => "mirror_2",
            SimDevice::Imager1 => "imager_1",
            SimDevice::Imager2 => "imager_2",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn mirror(leg: Leg) -> Self {
        match leg {
            Leg::First => SimDevice::Mirror1,
            Leg::Second => SimDevice::Mirror2,
        }
    }

    fn imager(leg: Leg) -> Self {
        match leg {
            Leg::First => SimDevice::Imager1,
            Leg::Second => SimDevice::Imager2,
        }
    }
}

/// One accepted setpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SetRecord {
    pub device: SimDevice,
    pub key: String,
    pub value: f64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_reads: HashSet<SimDevice>,
    fail_sets: HashSet<SimDevice>,
    stuck: HashSet<SimDevice>,
}

/// Shared truth behind every simulated device
#[derive(Debug)]
struct SimWorld {
    config: SimRelayConfig,
    rng: StdRng,
    remaining_motion: [u32; 5],
    faults: Faults,
    set_log: Vec<SetRecord>,
    accesses: usize,
}

impl SimWorld {
    fn new(config: SimRelayConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            remaining_motion: [0; 5],
            faults: Faults::default(),
            set_log: Vec::new(),
            accesses: 0,
        }
    }

    /// Uniform noise in `[-amplitude, amplitude]`
    fn jitter(&mut self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }

    fn mirror(&self, leg: Leg) -> &SimMirrorConfig {
        match leg {
            Leg::First => &self.config.mirror_1,
            Leg::Second => &self.config.mirror_2,
        }
    }

    fn mirror_mut(&mut self, leg: Leg) -> &mut SimMirrorConfig {
        match leg {
            Leg::First => &mut self.config.mirror_1,
            Leg::Second => &mut self.config.mirror_2,
        }
    }

    fn imager(&self, leg: Leg) -> &SimImagerConfig {
        match leg {
            Leg::First => &self.config.imager_1,
            Leg::Second => &self.config.imager_2,
        }
    }

    fn imager_mut(&mut self, leg: Leg) -> &mut SimImagerConfig {
        match leg {
            Leg::First => &mut self.config.imager_1,
            Leg::Second => &mut self.config.imager_2,
        }
    }

    fn geometry(&self) -> RelayGeometry {
        let config = &self.config;
        RelayGeometry::new(
            BeamState::new(config.source.x, config.source.xp),
            MirrorPlacement::new(config.mirror_1.x, config.mirror_1.z),
            MirrorPlacement::new(config.mirror_2.x, config.mirror_2.z),
        )
    }

    /// Noise-free centroid along the steering axis
    fn true_centroid(&self, leg: Leg) -> Result<f64, beam_math::GeometryError> {
        let imager = self.imager(leg);
        let x = self.geometry().propagate(
            self.config.mirror_1.alpha,
            self.config.mirror_2.alpha,
            imager.z,
            TransportLaw::Exact,
        )?;
        Ok(imager.calibration.x_to_pixel(x, imager.x))
    }

    fn start_motion(&mut self, device: SimDevice) {
        self.remaining_motion[device.index()] = self.config.motion_polls;
    }

    fn poll_motion(&mut self, device: SimDevice) -> bool {
        if self.faults.stuck.contains(&device) {
            return true;
        }
        let remaining = &mut self.remaining_motion[device.index()];
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

type SharedWorld = Arc<Mutex<SimWorld>>;

fn lock(world: &SharedWorld) -> MutexGuard<'_, SimWorld> {
    world.lock().unwrap()
}

/// Builder for the simulated relay
pub struct SimRelay;

impl SimRelay {
    /// Build a [`Relay`] over simulated devices, plus a handle for inspection
    /// and fault injection.
    pub fn build(config: SimRelayConfig) -> Result<(Relay, SimHandle), SimConfigError> {
        config.validate()?;
        let world: SharedWorld = Arc::new(Mutex::new(SimWorld::new(config)));
        let handle = SimHandle {
            world: world.clone(),
            imager_events: [
                Arc::new(CallbackRegistry::new()),
                Arc::new(CallbackRegistry::new()),
            ],
        };

        let relay = Relay::new(
            Box::new(SimSource::new(world.clone())),
            Box::new(SimMirror::new(world.clone(), Leg::First)),
            Box::new(SimMirror::new(world, Leg::Second)),
            Box::new(handle.imager(Leg::First)),
            Box::new(handle.imager(Leg::Second)),
        );
        Ok((relay, handle))
    }
}

/// Inspection and fault-injection handle onto a simulated relay
#[derive(Clone)]
pub struct SimHandle {
    world: SharedWorld,
    imager_events: [Arc<CallbackRegistry>; 2],
}

impl SimHandle {
    /// Another device handle onto the given imager (shares its subscribers)
    pub fn imager(&self, leg: Leg) -> SimImager {
        let events = match leg {
            Leg::First => self.imager_events[0].clone(),
            Leg::Second => self.imager_events[1].clone(),
        };
        SimImager::new(self.world.clone(), leg, events)
    }

    /// Number of device calls (reads, centroids, sets, motion polls) so far
    pub fn access_count(&self) -> usize {
        lock(&self.world).accesses
    }

    /// Every accepted setpoint, oldest first
    pub fn set_log(&self) -> Vec<SetRecord> {
        lock(&self.world).set_log.clone()
    }

    /// Mirror pitches without readback noise
    pub fn true_alphas(&self) -> (f64, f64) {
        let world = lock(&self.world);
        (world.config.mirror_1.alpha, world.config.mirror_2.alpha)
    }

    /// Place the mirrors directly, bypassing the actuator interface
    pub fn set_true_alphas(&self, alpha_1: f64, alpha_2: f64) {
        let mut world = lock(&self.world);
        world.config.mirror_1.alpha = alpha_1;
        world.config.mirror_2.alpha = alpha_2;
    }

    /// Noise-free centroids on both imagers, if the beam reaches them
    pub fn true_centroids(&self) -> Option<(f64, f64)> {
        let world = lock(&self.world);
        let c1 = world.true_centroid(Leg::First).ok()?;
        let c2 = world.true_centroid(Leg::Second).ok()?;
        Some((c1, c2))
    }

    /// Current simulated truth
    pub fn config(&self) -> SimRelayConfig {
        lock(&self.world).config.clone()
    }

    /// Make every read from `device` fail
    pub fn fail_reads(&self, device: SimDevice) {
        lock(&self.world).faults.fail_reads.insert(device);
    }

    /// Make every setpoint on `device` fail
    pub fn fail_sets(&self, device: SimDevice) {
        lock(&self.world).faults.fail_sets.insert(device);
    }

    /// Make `device` report motion forever
    pub fn stick(&self, device: SimDevice) {
        lock(&self.world).faults.stuck.insert(device);
    }

    pub fn clear_faults(&self) {
        lock(&self.world).faults = Faults::default();
    }
}

impl std::fmt::Debug for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHandle")
            .field("world", &self.world)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimRelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_noise_rejected() {
        let mut config = SimRelayConfig::default();
        config.imager_2.noise_centroid_px = -1.0;
        assert!(matches!(
            config.validate(),
            Err(SimConfigError::InvalidParameter { name: "imager_2", .. })
        ));
    }

    #[test]
    fn test_zero_pixel_calibration_rejected() {
        let mut config = SimRelayConfig::default();
        config.imager_1.calibration.pixels = [0, 1040];
        assert!(SimRelay::build(config).is_err());
    }

    #[test]
    fn test_jitter_is_reproducible() {
        let mut a = SimWorld::new(SimRelayConfig::default());
        let mut b = SimWorld::new(SimRelayConfig::default());
        for _ in 0..5 {
            let (x, y) = (a.jitter(1e-6), b.jitter(1e-6));
            assert_eq!(x, y);
            assert!(x.abs() <= 1e-6);
        }
        assert_eq!(a.jitter(0.0), 0.0);
    }

    #[test]
    fn test_true_centroids_follow_pitch() {
        let (_relay, handle) = SimRelay::build(SimRelayConfig::default()).unwrap();
        let (c1, c2) = handle.true_centroids().unwrap();
        assert!((c1 - 696.0).abs() < 0.5);
        assert!((c2 - 696.0).abs() < 0.5);

        handle.set_true_alphas(0.0014, 0.00141);
        let (_, moved) = handle.true_centroids().unwrap();
        // 2 * 10 µrad over ~273 m is ~5.5 mm, about a thousand pixels
        assert!(moved - c2 > 900.0);
    }

    #[test]
    fn test_motion_polls_then_settles() {
        let mut world = SimWorld::new(SimRelayConfig::default());
        world.start_motion(SimDevice::Mirror1);
        assert!(world.poll_motion(SimDevice::Mirror1));
        assert!(world.poll_motion(SimDevice::Mirror1));
        assert!(!world.poll_motion(SimDevice::Mirror1));
        assert!(!world.poll_motion(SimDevice::Mirror2));
    }
}
