//! beam-math - Geometry and numerics for two-mirror beam steering
//!
//! This crate provides the pure, side-effect free pieces of the alignment
//! controller:
//!
//! - **Transport** - Carries a source ray through two flat mirrors to an imager plane
//! - **Solve** - Mirror pitch required to hit a target position, closed form or nonlinear
//! - **Roots** - Bracketed root finding (seeded bracket growth + Brent refinement)
//! - **Matrix** - 2x2 inversion with scale-aware singularity checks
//! - **Affine** - Least-squares affine fits between 2D quantities
//!
//! # Example
//!
//! ```
//! use beam_math::{closed_form_alpha_2, BeamState, MirrorPlacement, RelayGeometry};
//!
//! let geometry = RelayGeometry::new(
//!     BeamState::new(0.0, 0.0),
//!     MirrorPlacement::new(0.0, 90.510),
//!     MirrorPlacement::new(0.0317324, 101.843),
//! );
//!
//! // Mirror 2 pitch that keeps the beam on axis at a far imager
//! let alpha_2 = closed_form_alpha_2(&geometry, 0.0014, 375.0, 0.0317324).unwrap();
//! assert!((alpha_2 - 0.0014).abs() < 1e-9);
//! ```

pub mod affine;
pub mod matrix2;
pub mod roots;
pub mod solve;
pub mod transport;

pub use affine::{fit_affine, AffineFit, AffineFitError};
pub use matrix2::{invert_matrix, solve_2x2, SingularMatrixError};
pub use roots::{brent, bracket_from_seed, find_root_from_seed, RootError, RootOptions};
pub use solve::{
    closed_form_alpha_1, closed_form_alpha_2, nonlinear_alpha_1, nonlinear_alpha_2,
    solve_alpha_1, solve_alpha_2, NonlinearOptions, SolveMethod, DEFAULT_NONLINEAR_SEED,
};
pub use transport::{BeamState, GeometryError, MirrorPlacement, RelayGeometry, TransportLaw};
