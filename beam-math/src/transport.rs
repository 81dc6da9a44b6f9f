//! Two-mirror beam transport
//!
//! Models a source ray reflected by two flat mirrors onto an imager plane.
//! Coordinates: `z` runs along the nominal beamline from the source reference
//! plane, `x` is transverse. Angles are in radians measured from the `z` axis.
//!
//! ```text
//!   source (z=0)        mirror 1 (z1)            mirror 2 (z2)         imager (zi)
//!   x0, xp0  ─────────────►  \  α1  ─────────────►  \  α2  ───────────►  |
//! ```
//!
//! The beam's hit point on each mirror is the intersection of the incoming ray
//! with that mirror's surface line. After mirror 2 the outgoing ray is carried
//! to the imager with a lever arm measured from mirror 2's reference plane.

use thiserror::Error;

use crate::roots::RootError;

/// Below this separation two z positions are treated as coincident (meters)
const COINCIDENT_EPSILON: f64 = 1e-12;

/// Errors raised by the geometry model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Both mirrors sit at the same z; the relay is undefined
    #[error("degenerate geometry: mirror 1 and mirror 2 are both at z={z:.6}")]
    CoincidentMirrors { z: f64 },

    /// The imager sits on mirror 2's reference plane; there is no lever arm
    #[error("degenerate geometry: imager at z={z:.6} coincides with mirror 2")]
    ImagerAtMirror { z: f64 },

    /// The beam runs parallel to a mirror surface and never reflects
    #[error("beam is parallel to mirror {mirror} surface")]
    BeamParallelToMirror { mirror: u8 },

    /// The small-angle quadratic has no real root for this target
    #[error("no real solution: discriminant {discriminant:.3e} < 0")]
    NoRealSolution { discriminant: f64 },

    /// An input or intermediate value was NaN or infinite
    #[error("non-finite geometry input: {0}")]
    NonFinite(&'static str),

    /// The nonlinear root-find failed from its seed
    #[error("nonlinear solve failed from seed {seed:.6e}: {source}")]
    SolverFailure {
        seed: f64,
        #[source]
        source: RootError,
    },
}

impl GeometryError {
    /// True for the degenerate-geometry class (undefined closed form)
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            GeometryError::CoincidentMirrors { .. } | GeometryError::ImagerAtMirror { .. }
        )
    }
}

/// Source beam at the reference plane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamState {
    /// Transverse position (m)
    pub x0: f64,
    /// Angle from the z axis (rad)
    pub xp0: f64,
}

impl BeamState {
    pub fn new(x0: f64, xp0: f64) -> Self {
        Self { x0, xp0 }
    }
}

/// Position of a mirror's pivot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MirrorPlacement {
    /// Transverse offset of the mirror surface at its pivot (m)
    pub x: f64,
    /// Distance of the pivot from the source reference plane (m)
    pub z: f64,
}

impl MirrorPlacement {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }
}

/// Angle law used when carrying rays through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLaw {
    /// `tan(θ) ≈ θ`; yields the closed-form quadratic
    SmallAngle,
    /// True tangent law
    Exact,
}

impl TransportLaw {
    fn slope(self, angle: f64) -> f64 {
        match self {
            TransportLaw::SmallAngle => angle,
            TransportLaw::Exact => angle.tan(),
        }
    }
}

/// Beam and mirror placement for one relay evaluation.
///
/// Built fresh from device readback before every solve; never cached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayGeometry {
    pub beam: BeamState,
    pub mirror_1: MirrorPlacement,
    pub mirror_2: MirrorPlacement,
}

impl RelayGeometry {
    pub fn new(beam: BeamState, mirror_1: MirrorPlacement, mirror_2: MirrorPlacement) -> Self {
        Self {
            beam,
            mirror_1,
            mirror_2,
        }
    }

    /// Check the preconditions for solving against an imager at `imager_z`.
    pub fn check(&self, imager_z: f64) -> Result<(), GeometryError> {
        let values = [
            self.beam.x0,
            self.beam.xp0,
            self.mirror_1.x,
            self.mirror_1.z,
            self.mirror_2.x,
            self.mirror_2.z,
            imager_z,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinite("relay geometry"));
        }
        if (self.mirror_1.z - self.mirror_2.z).abs() < COINCIDENT_EPSILON {
            return Err(GeometryError::CoincidentMirrors {
                z: self.mirror_1.z,
            });
        }
        if (imager_z - self.mirror_2.z).abs() < COINCIDENT_EPSILON {
            return Err(GeometryError::ImagerAtMirror { z: imager_z });
        }
        Ok(())
    }

    /// Transverse beam position at plane `z` for mirror pitches `alpha_1`, `alpha_2`.
    ///
    /// `z` is expected downstream of mirror 2.
    pub fn propagate(
        &self,
        alpha_1: f64,
        alpha_2: f64,
        z: f64,
        law: TransportLaw,
    ) -> Result<f64, GeometryError> {
        let BeamState { x0, xp0 } = self.beam;
        let m1 = self.mirror_1;
        let m2 = self.mirror_2;

        let t0 = law.slope(xp0);
        let t1 = law.slope(alpha_1);
        let t2 = law.slope(alpha_2);
        let u1 = law.slope(2.0 * alpha_1 - xp0);
        let u2 = law.slope(2.0 * alpha_2 - 2.0 * alpha_1 + xp0);

        let denom_1 = t0 - t1;
        if denom_1 == 0.0 {
            return Err(GeometryError::BeamParallelToMirror { mirror: 1 });
        }
        let z_a = (m1.x - t1 * m1.z - x0) / denom_1;
        let x_a = x0 + t0 * z_a;

        let denom_2 = u1 - t2;
        if denom_2 == 0.0 {
            return Err(GeometryError::BeamParallelToMirror { mirror: 2 });
        }
        let z_b = (m2.x - t2 * m2.z - x_a + u1 * z_a) / denom_2;
        let x_b = x_a + u1 * (z_b - z_a);

        let x = x_b + u2 * (z - m2.z);
        if x.is_finite() {
            Ok(x)
        } else {
            Err(GeometryError::NonFinite("propagated position"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nominal() -> RelayGeometry {
        RelayGeometry::new(
            BeamState::new(0.0, 0.0),
            MirrorPlacement::new(0.0, 90.510),
            MirrorPlacement::new(0.0317324, 101.843),
        )
    }

    #[test]
    fn test_nominal_relay_exits_parallel() {
        // Equal pitches cancel: the beam leaves mirror 2 parallel to the axis
        let geometry = nominal();
        let near = geometry
            .propagate(0.0014, 0.0014, 103.660, TransportLaw::SmallAngle)
            .unwrap();
        let far = geometry
            .propagate(0.0014, 0.0014, 375.000, TransportLaw::SmallAngle)
            .unwrap();
        assert_relative_eq!(near, far, epsilon = 1e-15);
        assert_relative_eq!(near, 0.0317324, epsilon = 1e-6);
    }

    #[test]
    fn test_small_angle_matches_exact_law() {
        let geometry = nominal();
        let linear = geometry
            .propagate(0.00141, 0.00139, 375.0, TransportLaw::SmallAngle)
            .unwrap();
        let exact = geometry
            .propagate(0.00141, 0.00139, 375.0, TransportLaw::Exact)
            .unwrap();
        assert!((linear - exact).abs() < 1e-6);
    }

    #[test]
    fn test_mirror_two_lever_arm() {
        // Tilting mirror 2 by δ swings the exit ray by 2δ about mirror 2's plane
        let geometry = nominal();
        let law = TransportLaw::SmallAngle;
        let base = geometry.propagate(0.0014, 0.0014, 375.0, law).unwrap();
        let tilted = geometry.propagate(0.0014, 0.0014 + 1e-6, 375.0, law).unwrap();
        let lever = 375.0 - 101.843;
        assert_relative_eq!((tilted - base) / 1e-6, 2.0 * lever, max_relative = 1e-3);
    }

    #[test]
    fn test_parallel_beam_rejected() {
        let geometry = nominal();
        let result = geometry.propagate(0.0, 0.0014, 375.0, TransportLaw::Exact);
        assert_eq!(
            result,
            Err(GeometryError::BeamParallelToMirror { mirror: 1 })
        );
    }

    #[test]
    fn test_check_coincident_mirrors() {
        let mut geometry = nominal();
        geometry.mirror_2.z = geometry.mirror_1.z;
        let err = geometry.check(375.0).unwrap_err();
        assert!(err.is_degenerate());
        assert!(matches!(err, GeometryError::CoincidentMirrors { .. }));
    }

    #[test]
    fn test_check_imager_at_mirror() {
        let geometry = nominal();
        let err = geometry.check(101.843).unwrap_err();
        assert_eq!(err, GeometryError::ImagerAtMirror { z: 101.843 });
    }

    #[test]
    fn test_check_non_finite() {
        let mut geometry = nominal();
        geometry.beam.x0 = f64::NAN;
        assert!(matches!(
            geometry.check(375.0),
            Err(GeometryError::NonFinite(_))
        ));
    }
}
