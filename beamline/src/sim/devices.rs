//! Simulated device implementations

use std::sync::Arc;

use tracing::trace;

use super::{lock, SetRecord, SharedWorld, SimDevice, SimWorld};
use crate::calibration::ImagerCalibration;
use crate::device::{
    Actuator, CentroidReadout, DeviceError, DeviceResult, PixelCentroid, Reading, Readings,
    Readback,
};
use crate::events::{CallbackRegistry, DeviceCallback, DeviceEvent, Subscribable, SubscriptionId};
use crate::relay::Leg;

fn readings(values: &[(&str, f64)]) -> Readings {
    values
        .iter()
        .map(|(key, value)| (key.to_string(), Reading::now(*value)))
        .collect()
}

/// Count the access and fail it if reads are faulted
fn begin_read(world: &mut SimWorld, device: SimDevice) -> DeviceResult<()> {
    world.accesses += 1;
    if world.faults.fail_reads.contains(&device) {
        return Err(DeviceError::Read {
            device: device.name().to_string(),
            reason: "injected read fault".to_string(),
        });
    }
    Ok(())
}

fn begin_set(world: &mut SimWorld, device: SimDevice) -> DeviceResult<()> {
    world.accesses += 1;
    if world.faults.fail_sets.contains(&device) {
        return Err(DeviceError::Command {
            device: device.name().to_string(),
            reason: "injected command fault".to_string(),
        });
    }
    Ok(())
}

/// Check every requested key before anything moves
fn check_setpoints(device: SimDevice, values: &[(&str, f64)], allowed: &[&str]) -> DeviceResult<()> {
    for (key, value) in values {
        if !allowed.contains(key) {
            return Err(DeviceError::Command {
                device: device.name().to_string(),
                reason: format!("unknown setpoint '{key}'"),
            });
        }
        if !value.is_finite() {
            return Err(DeviceError::Command {
                device: device.name().to_string(),
                reason: format!("setpoint {key}={value} is not finite"),
            });
        }
    }
    Ok(())
}

fn record(world: &mut SimWorld, device: SimDevice, key: &str, value: f64) {
    world.set_log.push(SetRecord {
        device,
        key: key.to_string(),
        value,
    });
}

/// Simulated source: read-only `x`, `xp`
pub struct SimSource {
    world: SharedWorld,
}

impl SimSource {
    pub(super) fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

impl Readback for SimSource {
    fn name(&self) -> &str {
        SimDevice::Source.name()
    }

    fn read(&mut self) -> DeviceResult<Readings> {
        let mut world = lock(&self.world);
        begin_read(&mut world, SimDevice::Source)?;
        let source = world.config.source.clone();
        let x = source.x + world.jitter(source.noise_x);
        let xp = source.xp + world.jitter(source.noise_xp);
        Ok(readings(&[("x", x), ("xp", xp)]))
    }
}

/// Simulated steering mirror: `x`, `z`, `alpha` and `alpha_setpoint`
pub struct SimMirror {
    world: SharedWorld,
    leg: Leg,
}

impl SimMirror {
    pub(super) fn new(world: SharedWorld, leg: Leg) -> Self {
        Self { world, leg }
    }

    fn device(&self) -> SimDevice {
        SimDevice::mirror(self.leg)
    }
}

impl Readback for SimMirror {
    fn name(&self) -> &str {
        self.device().name()
    }

    fn read(&mut self) -> DeviceResult<Readings> {
        let mut world = lock(&self.world);
        begin_read(&mut world, self.device())?;
        let mirror = world.mirror(self.leg).clone();
        let alpha = mirror.alpha + world.jitter(mirror.noise_alpha);
        Ok(readings(&[
            ("x", mirror.x),
            ("z", mirror.z),
            ("alpha", alpha),
            ("alpha_setpoint", mirror.alpha),
        ]))
    }
}

impl Actuator for SimMirror {
    fn set(&mut self, values: &[(&str, f64)]) -> DeviceResult<()> {
        let device = self.device();
        let mut world = lock(&self.world);
        begin_set(&mut world, device)?;
        check_setpoints(device, values, &["x", "z", "alpha"])?;

        for &(key, value) in values {
            let mirror = world.mirror_mut(self.leg);
            match key {
                "x" => mirror.x = value,
                "z" => mirror.z = value,
                _ => mirror.alpha = value,
            }
            record(&mut world, device, key, value);
            trace!(device = device.name(), key, value, "setpoint accepted");
        }
        world.start_motion(device);
        Ok(())
    }

    fn is_moving(&mut self) -> DeviceResult<bool> {
        let mut world = lock(&self.world);
        world.accesses += 1;
        Ok(world.poll_motion(self.device()))
    }
}

/// Simulated imager
///
/// Readbacks `x`, `z` and `inserted`; centroid from the exact transport law.
/// Accepts `x`, `z` and `inserted` setpoints and notifies subscribers of
/// insertion, removal and moves.
pub struct SimImager {
    world: SharedWorld,
    leg: Leg,
    events: Arc<CallbackRegistry>,
}

impl SimImager {
    pub(super) fn new(world: SharedWorld, leg: Leg, events: Arc<CallbackRegistry>) -> Self {
        Self { world, leg, events }
    }

    fn device(&self) -> SimDevice {
        SimDevice::imager(self.leg)
    }

    /// Move the imager into the beam path
    pub fn insert(&mut self) -> DeviceResult<()> {
        self.set(&[("inserted", 1.0)])
    }

    /// Move the imager out of the beam path
    pub fn remove(&mut self) -> DeviceResult<()> {
        self.set(&[("inserted", 0.0)])
    }
}

impl Readback for SimImager {
    fn name(&self) -> &str {
        self.device().name()
    }

    fn read(&mut self) -> DeviceResult<Readings> {
        let mut world = lock(&self.world);
        begin_read(&mut world, self.device())?;
        let imager = world.imager(self.leg);
        Ok(readings(&[
            ("x", imager.x),
            ("z", imager.z),
            ("inserted", if imager.inserted { 1.0 } else { 0.0 }),
        ]))
    }
}

impl CentroidReadout for SimImager {
    fn centroid(&mut self) -> DeviceResult<PixelCentroid> {
        let device = self.device();
        let mut world = lock(&self.world);
        begin_read(&mut world, device)?;

        let imager = world.imager(self.leg).clone();
        if !imager.inserted {
            return Err(DeviceError::Read {
                device: device.name().to_string(),
                reason: "imager is not in the beam path".to_string(),
            });
        }
        let x = world
            .true_centroid(self.leg)
            .map_err(|err| DeviceError::Read {
                device: device.name().to_string(),
                reason: err.to_string(),
            })?;
        let noise = world.jitter(imager.noise_centroid_px);
        Ok(PixelCentroid {
            x: x + noise,
            y: imager.calibration.center_pixel()[1],
        })
    }

    fn calibration(&self) -> ImagerCalibration {
        lock(&self.world).imager(self.leg).calibration
    }
}

impl Actuator for SimImager {
    fn set(&mut self, values: &[(&str, f64)]) -> DeviceResult<()> {
        let device = self.device();
        let mut events = Vec::new();
        {
            let mut world = lock(&self.world);
            begin_set(&mut world, device)?;
            check_setpoints(device, values, &["x", "z", "inserted"])?;

            for &(key, value) in values {
                let imager = world.imager_mut(self.leg);
                let event = match key {
                    "inserted" => {
                        let inserted = value != 0.0;
                        let changed = imager.inserted != inserted;
                        imager.inserted = inserted;
                        match (changed, inserted) {
                            (false, _) => None,
                            (true, true) => Some(DeviceEvent::Inserted {
                                device: device.name().to_string(),
                            }),
                            (true, false) => Some(DeviceEvent::Removed {
                                device: device.name().to_string(),
                            }),
                        }
                    }
                    _ => {
                        if key == "x" {
                            imager.x = value;
                        } else {
                            imager.z = value;
                        }
                        Some(DeviceEvent::Moved {
                            device: device.name().to_string(),
                            key: key.to_string(),
                            value,
                        })
                    }
                };
                record(&mut world, device, key, value);
                events.extend(event);
            }
            world.start_motion(device);
        }

        // Subscribers run without the world lock held
        for event in &events {
            self.events.emit(event);
        }
        Ok(())
    }

    fn is_moving(&mut self) -> DeviceResult<bool> {
        let mut world = lock(&self.world);
        world.accesses += 1;
        Ok(world.poll_motion(self.device()))
    }
}

impl Subscribable for SimImager {
    fn subscribe(&self, callback: DeviceCallback) -> SubscriptionId {
        self.events.register(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.deregister(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimRelay, SimRelayConfig};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    #[test]
    fn test_mirror_set_validates_all_keys_first() {
        let (_relay, handle) = SimRelay::build(SimRelayConfig::default()).unwrap();
        let world = handle.world.clone();
        let mut mirror = SimMirror::new(world, Leg::First);

        let err = mirror.set(&[("alpha", 0.002), ("roll", 0.1)]).unwrap_err();
        assert!(matches!(err, DeviceError::Command { .. }));
        assert_eq!(handle.true_alphas().0, 0.0014);
        assert!(handle.set_log().is_empty());
    }

    #[test]
    fn test_mirror_readback_noise_is_bounded() {
        let mut config = SimRelayConfig::default();
        config.mirror_2.noise_alpha = 1e-7;
        config.seed = 7;
        let (_relay, handle) = SimRelay::build(config).unwrap();
        let mut mirror = SimMirror::new(handle.world.clone(), Leg::Second);

        for _ in 0..20 {
            let readings = mirror.read().unwrap();
            let alpha = readings["alpha"].value;
            assert!((alpha - 0.0014).abs() <= 1e-7);
            assert_eq!(readings["alpha_setpoint"].value, 0.0014);
        }
    }

    #[test]
    fn test_source_read_fault() {
        let (_relay, handle) = SimRelay::build(SimRelayConfig::default()).unwrap();
        handle.fail_reads(SimDevice::Source);
        let mut source = SimSource::new(handle.world.clone());
        assert!(matches!(source.read(), Err(DeviceError::Read { .. })));

        handle.clear_faults();
        let readings = source.read().unwrap();
        assert_eq!(readings["x"].value, 0.0);
    }

    #[test]
    fn test_imager_events_and_retraction() {
        let (_relay, handle) = SimRelay::build(SimRelayConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut imager = handle.imager(Leg::Second);
        let id = imager.subscribe(Arc::new(move |event: &DeviceEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        imager.remove().unwrap();
        assert!(matches!(imager.centroid(), Err(DeviceError::Read { .. })));
        imager.remove().unwrap();
        imager.insert().unwrap();
        assert!(imager.centroid().is_ok());

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                DeviceEvent::Removed {
                    device: "imager_2".to_string()
                },
                DeviceEvent::Inserted {
                    device: "imager_2".to_string()
                },
            ]
        );
        assert!(imager.unsubscribe(id));
    }

    #[test]
    fn test_imager_shift_moves_centroid() {
        let (_relay, handle) = SimRelay::build(SimRelayConfig::default()).unwrap();
        let mut imager = handle.imager(Leg::First);
        let before = imager.centroid().unwrap().x;
        let mppix = imager.calibration().mppix();

        imager.set(&[("x", 0.0317324 + 10.0 * mppix)]).unwrap();
        let after = imager.centroid().unwrap().x;

        assert_relative_eq!(before - after, 10.0, epsilon = 1e-6);
        assert_eq!(imager.read().unwrap()["inserted"].value, 1.0);
    }
}
