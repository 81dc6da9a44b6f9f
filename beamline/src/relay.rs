//! The five-device relay bundle
//!
//! A [`Relay`] owns the source, both steering mirrors and both imagers for a
//! session. It turns raw readbacks into geometry snapshots and commits mirror
//! pitches in the fixed order mirror 1 then mirror 2, settling after each.

use std::time::{Duration, Instant};

use beam_math::{BeamState, MirrorPlacement, RelayGeometry};
use tracing::{debug, error, trace, warn};

use crate::calibration::ImagerCalibration;
use crate::device::{reading_value, Actuator, DeviceError, DeviceResult, Imager, Readback};

/// Default time allowed for an actuator to report settled
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default interval between "still moving" polls
pub const DEFAULT_SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for actuators to settle, and how often to ask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SETTLE_TIMEOUT,
            poll_interval: DEFAULT_SETTLE_POLL_INTERVAL,
        }
    }
}

/// Poll `device` until it stops moving or the policy's timeout elapses
pub fn wait_settled(device: &mut dyn Actuator, policy: &SettlePolicy) -> DeviceResult<()> {
    let start = Instant::now();
    let mut polls = 0usize;
    loop {
        if !device.is_moving()? {
            trace!(device = device.name(), polls, "settled");
            return Ok(());
        }
        if start.elapsed() > policy.timeout {
            return Err(DeviceError::SettleTimeout {
                device: device.name().to_string(),
                timeout: policy.timeout,
            });
        }
        polls += 1;
        std::thread::sleep(policy.poll_interval);
    }
}

/// First or second element of the relay (mirror or imager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    First,
    Second,
}

/// Mirror readback at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorReadback {
    pub x: f64,
    pub z: f64,
    /// Pitch (rad)
    pub alpha: f64,
}

impl MirrorReadback {
    pub fn placement(&self) -> MirrorPlacement {
        MirrorPlacement::new(self.x, self.z)
    }
}

/// Imager readback at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagerReadback {
    pub x: f64,
    pub z: f64,
    pub calibration: ImagerCalibration,
}

impl ImagerReadback {
    /// Physical x the beam must reach at this imager to land on pixel `p`
    pub fn goal_x(&self, p: f64) -> f64 {
        self.calibration.pixel_to_x(p, self.x)
    }
}

/// Fresh readback of every device in the relay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaySnapshot {
    pub beam: BeamState,
    pub mirror_1: MirrorReadback,
    pub mirror_2: MirrorReadback,
    pub imager_1: ImagerReadback,
    pub imager_2: ImagerReadback,
}

impl RelaySnapshot {
    /// Beam and mirror placement for the geometry solves
    pub fn geometry(&self) -> RelayGeometry {
        RelayGeometry::new(
            self.beam,
            self.mirror_1.placement(),
            self.mirror_2.placement(),
        )
    }

    /// Mirror pitches as read back
    pub fn alphas(&self) -> (f64, f64) {
        (self.mirror_1.alpha, self.mirror_2.alpha)
    }
}

/// Source, two steering mirrors and two imagers owned by one session
pub struct Relay {
    source: Box<dyn Readback>,
    mirror_1: Box<dyn Actuator>,
    mirror_2: Box<dyn Actuator>,
    imager_1: Box<dyn Imager>,
    imager_2: Box<dyn Imager>,
    settle: SettlePolicy,
}

impl Relay {
    pub fn new(
        source: Box<dyn Readback>,
        mirror_1: Box<dyn Actuator>,
        mirror_2: Box<dyn Actuator>,
        imager_1: Box<dyn Imager>,
        imager_2: Box<dyn Imager>,
    ) -> Self {
        Self {
            source,
            mirror_1,
            mirror_2,
            imager_1,
            imager_2,
            settle: SettlePolicy::default(),
        }
    }

    pub fn with_settle_policy(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn set_settle_policy(&mut self, settle: SettlePolicy) {
        self.settle = settle;
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        self.settle
    }

    /// Source beam position and angle
    pub fn beam(&mut self) -> DeviceResult<BeamState> {
        let readings = self.source.read()?;
        let name = self.source.name();
        Ok(BeamState::new(
            reading_value(&readings, name, "x")?,
            reading_value(&readings, name, "xp")?,
        ))
    }

    pub fn mirror(&mut self, leg: Leg) -> DeviceResult<MirrorReadback> {
        let device = match leg {
            Leg::First => self.mirror_1.as_mut(),
            Leg::Second => self.mirror_2.as_mut(),
        };
        let readings = device.read()?;
        let name = device.name();
        Ok(MirrorReadback {
            x: reading_value(&readings, name, "x")?,
            z: reading_value(&readings, name, "z")?,
            alpha: reading_value(&readings, name, "alpha")?,
        })
    }

    pub fn imager(&mut self, leg: Leg) -> DeviceResult<ImagerReadback> {
        let device = match leg {
            Leg::First => self.imager_1.as_mut(),
            Leg::Second => self.imager_2.as_mut(),
        };
        let readings = device.read()?;
        let name = device.name();
        Ok(ImagerReadback {
            x: reading_value(&readings, name, "x")?,
            z: reading_value(&readings, name, "z")?,
            calibration: device.calibration(),
        })
    }

    /// Read every device once
    pub fn snapshot(&mut self) -> DeviceResult<RelaySnapshot> {
        Ok(RelaySnapshot {
            beam: self.beam()?,
            mirror_1: self.mirror(Leg::First)?,
            mirror_2: self.mirror(Leg::Second)?,
            imager_1: self.imager(Leg::First)?,
            imager_2: self.imager(Leg::Second)?,
        })
    }

    /// Current mirror pitches
    pub fn alphas(&mut self) -> DeviceResult<(f64, f64)> {
        Ok((
            self.mirror(Leg::First)?.alpha,
            self.mirror(Leg::Second)?.alpha,
        ))
    }

    /// Centroid along the steering axis on both imagers (pixels)
    pub fn centroids(&mut self) -> DeviceResult<(f64, f64)> {
        Ok((self.imager_1.centroid()?.x, self.imager_2.centroid()?.x))
    }

    /// Move both mirrors to the given pitches.
    ///
    /// Mirror 1 is commanded and settled first, then mirror 2. Once mirror 1
    /// has accepted its setpoint, any later failure (mirror 1 not settling,
    /// mirror 2 rejecting or not settling) commands mirror 1 back to its
    /// previous setpoint (best effort) and returns the original error.
    pub fn commit_alphas(&mut self, alpha_1: f64, alpha_2: f64) -> DeviceResult<()> {
        let previous_1 = previous_setpoint(self.mirror_1.as_mut())?;
        debug!(alpha_1, alpha_2, "committing mirror pitches");

        self.mirror_1.set(&[("alpha", alpha_1)])?;

        let result = wait_settled(self.mirror_1.as_mut(), &self.settle)
            .and_then(|()| move_and_settle(self.mirror_2.as_mut(), alpha_2, &self.settle));
        if let Err(err) = result {
            warn!(
                error = %err,
                previous = previous_1,
                "mirror commit failed, returning mirror 1 to previous pitch"
            );
            if let Err(rollback) = move_and_settle(self.mirror_1.as_mut(), previous_1, &self.settle)
            {
                error!(error = %rollback, "mirror 1 rollback failed");
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Commanded pitch of a mirror, or its measured pitch if it does not report
/// a setpoint
fn previous_setpoint(mirror: &mut dyn Actuator) -> DeviceResult<f64> {
    let readings = mirror.read()?;
    match readings.get("alpha_setpoint") {
        Some(reading) => Ok(reading.value),
        None => reading_value(&readings, mirror.name(), "alpha"),
    }
}

fn move_and_settle(
    mirror: &mut dyn Actuator,
    alpha: f64,
    settle: &SettlePolicy,
) -> DeviceResult<()> {
    mirror.set(&[("alpha", alpha)])?;
    wait_settled(mirror, settle)
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("source", &self.source.name())
            .field("mirror_1", &self.mirror_1.name())
            .field("mirror_2", &self.mirror_2.name())
            .field("imager_1", &self.imager_1.name())
            .field("imager_2", &self.imager_2.name())
            .field("settle", &self.settle)
            .finish()
    }
}
