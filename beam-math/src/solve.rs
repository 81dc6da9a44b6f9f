//! Mirror pitch solves
//!
//! Given the companion mirror's pitch and a target transverse position at an
//! imager plane, find the pitch of the other mirror that puts the beam on the
//! target. Two interchangeable methods share the transport relation in
//! [`crate::transport`]:
//!
//! - **Closed form**: under the small-angle law the relation reduces to a
//!   quadratic in the unknown angle. The physical root is the one on the
//!   negative square-root branch; the other root reflects the beam back
//!   across the relay and is discarded.
//! - **Nonlinear**: the exact tangent law, solved by bracketed root finding
//!   from a fixed seed.

use crate::roots::{find_root_from_seed, RootOptions};
use crate::transport::{GeometryError, RelayGeometry, TransportLaw};

/// Default seed for the nonlinear solves (rad)
pub const DEFAULT_NONLINEAR_SEED: f64 = 0.0014;

/// Options for the nonlinear solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonlinearOptions {
    /// Fixed initial guess for the root-find (rad)
    pub seed: f64,
    /// Bracket growth and refinement settings
    pub roots: RootOptions,
}

impl Default for NonlinearOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_NONLINEAR_SEED,
            roots: RootOptions::default(),
        }
    }
}

/// How a mirror pitch is solved
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SolveMethod {
    /// Small-angle quadratic, negative square-root branch
    #[default]
    ClosedForm,
    /// Exact law with bracketed root finding
    Nonlinear(NonlinearOptions),
}

/// Negative square-root branch of `a·t² + b·t + c = 0`.
fn negative_branch(a: f64, b: f64, c: f64) -> Result<f64, GeometryError> {
    let discriminant = b * b - 4.0 * a * c;
    if !discriminant.is_finite() {
        return Err(GeometryError::NonFinite("quadratic discriminant"));
    }
    if discriminant < 0.0 {
        return Err(GeometryError::NoRealSolution { discriminant });
    }
    Ok((-b - discriminant.sqrt()) / (2.0 * a))
}

fn check_inputs(
    geometry: &RelayGeometry,
    companion_alpha: f64,
    imager_z: f64,
    goal_x: f64,
) -> Result<(), GeometryError> {
    geometry.check(imager_z)?;
    if !companion_alpha.is_finite() {
        return Err(GeometryError::NonFinite("companion mirror pitch"));
    }
    if !goal_x.is_finite() {
        return Err(GeometryError::NonFinite("goal position"));
    }
    Ok(())
}

/// Closed-form pitch of mirror 1 that puts the beam on `goal_x` at `imager_z`,
/// holding mirror 2 at `alpha_2`.
pub fn closed_form_alpha_1(
    geometry: &RelayGeometry,
    alpha_2: f64,
    imager_z: f64,
    goal_x: f64,
) -> Result<f64, GeometryError> {
    check_inputs(geometry, alpha_2, imager_z, goal_x)?;

    let x0 = geometry.beam.x0;
    let xp0 = geometry.beam.xp0;
    let m1 = geometry.mirror_1;
    let m2 = geometry.mirror_2;

    // Quadratic in the once-reflected ray angle θ1 = 2α1 - xp0
    let lever = imager_z - m2.z;
    let k = goal_x - m2.x + alpha_2 * m2.z;
    let n0 = m2.x - alpha_2 * m2.z - 2.0 * m1.x + xp0 * m1.z + x0;

    let a = -lever;
    let b = alpha_2 * (3.0 * lever + m1.z) - k;
    let c = alpha_2 * (n0 + k) - 2.0 * lever * alpha_2 * alpha_2;

    let theta_1 = negative_branch(a, b, c)?;
    Ok(0.5 * (theta_1 + xp0))
}

/// Closed-form pitch of mirror 2 that puts the beam on `goal_x` at `imager_z`,
/// holding mirror 1 at `alpha_1`.
pub fn closed_form_alpha_2(
    geometry: &RelayGeometry,
    alpha_1: f64,
    imager_z: f64,
    goal_x: f64,
) -> Result<f64, GeometryError> {
    check_inputs(geometry, alpha_1, imager_z, goal_x)?;

    let x0 = geometry.beam.x0;
    let xp0 = geometry.beam.xp0;
    let m1 = geometry.mirror_1;
    let m2 = geometry.mirror_2;

    let lever = imager_z - m2.z;
    let theta_1 = 2.0 * alpha_1 - xp0;
    let k = goal_x - m2.x;
    // Once-reflected ray evaluated at mirror 2's plane, less the mirror offset
    let c0 = m2.x - 2.0 * m1.x + x0 + xp0 * m2.z - 2.0 * alpha_1 * (m2.z - m1.z);

    let a = 2.0 * lever;
    let b = -(3.0 * lever * theta_1 + c0 + k);
    let c = lever * theta_1 * theta_1 + k * theta_1;

    negative_branch(a, b, c)
}

/// Nonlinear pitch of mirror 1 under the exact law.
pub fn nonlinear_alpha_1(
    geometry: &RelayGeometry,
    alpha_2: f64,
    imager_z: f64,
    goal_x: f64,
    options: &NonlinearOptions,
) -> Result<f64, GeometryError> {
    check_inputs(geometry, alpha_2, imager_z, goal_x)?;
    let residual = |alpha_1: f64| {
        geometry
            .propagate(alpha_1, alpha_2, imager_z, TransportLaw::Exact)
            .map_or(f64::NAN, |x| x - goal_x)
    };
    find_root_from_seed(residual, options.seed, &options.roots).map_err(|source| {
        GeometryError::SolverFailure {
            seed: options.seed,
            source,
        }
    })
}

/// Nonlinear pitch of mirror 2 under the exact law.
pub fn nonlinear_alpha_2(
    geometry: &RelayGeometry,
    alpha_1: f64,
    imager_z: f64,
    goal_x: f64,
    options: &NonlinearOptions,
) -> Result<f64, GeometryError> {
    check_inputs(geometry, alpha_1, imager_z, goal_x)?;
    let residual = |alpha_2: f64| {
        geometry
            .propagate(alpha_1, alpha_2, imager_z, TransportLaw::Exact)
            .map_or(f64::NAN, |x| x - goal_x)
    };
    find_root_from_seed(residual, options.seed, &options.roots).map_err(|source| {
        GeometryError::SolverFailure {
            seed: options.seed,
            source,
        }
    })
}

/// Solve mirror 1's pitch with the selected method.
pub fn solve_alpha_1(
    geometry: &RelayGeometry,
    alpha_2: f64,
    imager_z: f64,
    goal_x: f64,
    method: &SolveMethod,
) -> Result<f64, GeometryError> {
    match method {
        SolveMethod::ClosedForm => closed_form_alpha_1(geometry, alpha_2, imager_z, goal_x),
        SolveMethod::Nonlinear(options) => {
            nonlinear_alpha_1(geometry, alpha_2, imager_z, goal_x, options)
        }
    }
}

/// Solve mirror 2's pitch with the selected method.
pub fn solve_alpha_2(
    geometry: &RelayGeometry,
    alpha_1: f64,
    imager_z: f64,
    goal_x: f64,
    method: &SolveMethod,
) -> Result<f64, GeometryError> {
    match method {
        SolveMethod::ClosedForm => closed_form_alpha_2(geometry, alpha_1, imager_z, goal_x),
        SolveMethod::Nonlinear(options) => {
            nonlinear_alpha_2(geometry, alpha_1, imager_z, goal_x, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::RootError;
    use crate::transport::{BeamState, MirrorPlacement};
    use approx::assert_relative_eq;

    const IMAGER_1_Z: f64 = 103.660;
    const IMAGER_2_Z: f64 = 375.000;

    fn nominal() -> RelayGeometry {
        RelayGeometry::new(
            BeamState::new(0.0, 0.0),
            MirrorPlacement::new(0.0, 90.510),
            MirrorPlacement::new(0.0317324, 101.843),
        )
    }

    #[test]
    fn test_closed_form_inverts_small_angle_transport() {
        let geometry = nominal();
        let (alpha_1, alpha_2) = (0.00141, 0.00139);
        let law = TransportLaw::SmallAngle;
        let goal_1 = geometry.propagate(alpha_1, alpha_2, IMAGER_1_Z, law).unwrap();
        let goal_2 = geometry.propagate(alpha_1, alpha_2, IMAGER_2_Z, law).unwrap();

        let solved_1 = closed_form_alpha_1(&geometry, alpha_2, IMAGER_1_Z, goal_1).unwrap();
        let solved_2 = closed_form_alpha_2(&geometry, alpha_1, IMAGER_2_Z, goal_2).unwrap();

        assert_relative_eq!(solved_1, alpha_1, epsilon = 1e-12);
        assert_relative_eq!(solved_2, alpha_2, epsilon = 1e-12);
    }

    #[test]
    fn test_nonlinear_inverts_exact_transport() {
        let geometry = nominal();
        let (alpha_1, alpha_2) = (0.00138, 0.00143);
        let law = TransportLaw::Exact;
        let goal_1 = geometry.propagate(alpha_1, alpha_2, IMAGER_1_Z, law).unwrap();
        let goal_2 = geometry.propagate(alpha_1, alpha_2, IMAGER_2_Z, law).unwrap();
        let options = NonlinearOptions::default();

        let solved_1 = nonlinear_alpha_1(&geometry, alpha_2, IMAGER_1_Z, goal_1, &options).unwrap();
        let solved_2 = nonlinear_alpha_2(&geometry, alpha_1, IMAGER_2_Z, goal_2, &options).unwrap();

        assert_relative_eq!(solved_1, alpha_1, epsilon = 1e-12);
        assert_relative_eq!(solved_2, alpha_2, epsilon = 1e-12);
    }

    #[test]
    fn test_closed_form_and_nonlinear_agree() {
        let geometry = nominal();
        let options = NonlinearOptions::default();
        let mppix = 0.0076 / 1392.0;

        for offset_px in [-300.0, -40.0, 0.0, 25.0, 410.0] {
            let goal = 0.0317324 + offset_px * mppix;
            for companion in [0.00136, 0.0014, 0.00145] {
                let cf_1 = closed_form_alpha_1(&geometry, companion, IMAGER_1_Z, goal).unwrap();
                let nl_1 =
                    nonlinear_alpha_1(&geometry, companion, IMAGER_1_Z, goal, &options).unwrap();
                assert!((cf_1 - nl_1).abs() < 1e-8, "alpha 1: {cf_1} vs {nl_1}");

                let cf_2 = closed_form_alpha_2(&geometry, companion, IMAGER_2_Z, goal).unwrap();
                let nl_2 =
                    nonlinear_alpha_2(&geometry, companion, IMAGER_2_Z, goal, &options).unwrap();
                assert!((cf_2 - nl_2).abs() < 1e-8, "alpha 2: {cf_2} vs {nl_2}");
            }
        }
    }

    #[test]
    fn test_alternating_solves_reach_both_goals() {
        let geometry = nominal();
        let mppix = 0.0076 / 1392.0;
        let goal_1 = 0.0317324 + 120.0 * mppix;
        let goal_2 = 0.0317324 - 200.0 * mppix;

        let (mut alpha_1, mut alpha_2) = (0.00132, 0.00147);
        for _ in 0..60 {
            alpha_1 = closed_form_alpha_1(&geometry, alpha_2, IMAGER_1_Z, goal_1).unwrap();
            alpha_2 = closed_form_alpha_2(&geometry, alpha_1, IMAGER_2_Z, goal_2).unwrap();
        }

        let law = TransportLaw::SmallAngle;
        let x_1 = geometry.propagate(alpha_1, alpha_2, IMAGER_1_Z, law).unwrap();
        let x_2 = geometry.propagate(alpha_1, alpha_2, IMAGER_2_Z, law).unwrap();
        assert_relative_eq!(x_1, goal_1, epsilon = 1e-12);
        assert_relative_eq!(x_2, goal_2, epsilon = 1e-12);
    }

    #[test]
    fn test_coincident_mirrors_degenerate() {
        let mut geometry = nominal();
        geometry.mirror_2.z = geometry.mirror_1.z;
        let result = closed_form_alpha_1(&geometry, 0.0014, IMAGER_1_Z, 0.03);
        assert!(matches!(result, Err(GeometryError::CoincidentMirrors { .. })));
        let result = closed_form_alpha_2(&geometry, 0.0014, IMAGER_2_Z, 0.03);
        assert!(matches!(result, Err(GeometryError::CoincidentMirrors { .. })));
    }

    #[test]
    fn test_nonlinear_failure_is_reported() {
        let geometry = nominal();
        let options = NonlinearOptions {
            seed: DEFAULT_NONLINEAR_SEED,
            roots: RootOptions {
                max_expansions: 3,
                ..RootOptions::default()
            },
        };
        // A goal meters off axis is unreachable within a few microradians of the seed
        let result = nonlinear_alpha_2(&geometry, 0.0014, IMAGER_2_Z, 5.0, &options);
        match result {
            Err(GeometryError::SolverFailure { seed, source }) => {
                assert_eq!(seed, DEFAULT_NONLINEAR_SEED);
                assert!(matches!(source, RootError::NoBracket { .. }));
            }
            other => panic!("expected solver failure, got {other:?}"),
        }
    }

    #[test]
    fn test_solve_dispatch_uses_method() {
        let geometry = nominal();
        let goal = 0.0317324;
        let closed =
            solve_alpha_2(&geometry, 0.0014, IMAGER_2_Z, goal, &SolveMethod::ClosedForm).unwrap();
        let nonlinear = solve_alpha_2(
            &geometry,
            0.0014,
            IMAGER_2_Z,
            goal,
            &SolveMethod::Nonlinear(NonlinearOptions::default()),
        )
        .unwrap();
        assert!((closed - nonlinear).abs() < 1e-8);
        assert_relative_eq!(closed, 0.0014, epsilon = 1e-9);
    }
}
