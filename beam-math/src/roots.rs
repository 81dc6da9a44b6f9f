//! Bracketed scalar root finding
//!
//! Roots are located in two phases: a bracket is grown geometrically around a
//! seed until the function changes sign, then the bracket is refined with
//! Brent's method (inverse quadratic interpolation with a bisection fallback).
//! A sign change across a pole looks like a root to any bracketing method, so
//! the residual at the returned abscissa is checked before it is accepted.

use thiserror::Error;

/// Errors that can occur while locating a root
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RootError {
    /// No sign change was found while growing the bracket around the seed
    #[error("no sign change within ±{half_width:.3e} of seed {seed:.6e}")]
    NoBracket { seed: f64, half_width: f64 },

    /// The function returned NaN or infinity
    #[error("function is not finite at x={x:.6e}")]
    NonFinite { x: f64 },

    /// Brent refinement did not reach the requested tolerance
    #[error("no convergence after {iterations} iterations")]
    MaxIterations { iterations: usize },

    /// The bracket collapsed onto a sign change that is not a root
    #[error("sign change at x={x:.6e} is a discontinuity (residual {residual:.3e})")]
    Discontinuity { x: f64, residual: f64 },

    /// The supplied endpoints do not straddle a sign change
    #[error("invalid bracket [{lo:.6e}, {hi:.6e}]: no sign change")]
    InvalidBracket { lo: f64, hi: f64 },
}

/// Tuning knobs for bracket growth and Brent refinement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootOptions {
    /// First half-width probed on each side of the seed
    pub initial_step: f64,
    /// Multiplier applied to the half-width after every unsuccessful probe
    pub growth: f64,
    /// Maximum number of bracket expansions before giving up
    pub max_expansions: usize,
    /// Absolute tolerance on the root abscissa
    pub xtol: f64,
    /// Maximum |f| accepted at the returned root
    pub ftol: f64,
    /// Maximum number of Brent iterations
    pub max_iterations: usize,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            initial_step: 1e-5,
            growth: 2.0,
            max_expansions: 40,
            xtol: 1e-15,
            ftol: 1e-9,
            max_iterations: 100,
        }
    }
}

fn evaluate<F: FnMut(f64) -> f64>(f: &mut F, x: f64) -> Result<f64, RootError> {
    let value = f(x);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RootError::NonFinite { x })
    }
}

fn opposite_signs(a: f64, b: f64) -> bool {
    (a < 0.0 && b > 0.0) || (a > 0.0 && b < 0.0)
}

/// Grow a bracket outward from `seed` until the function changes sign.
///
/// Probes alternate above and below the seed with half-widths
/// `initial_step * growth^k`. The returned bracket spans only the last probe
/// interval on the side where the sign changed, so it stays as tight as the
/// probe spacing allows.
///
/// # Returns
/// * `Ok((lo, hi))` - Endpoints with opposite function signs (or an exact root at both)
/// * `Err(RootError)` - If no sign change was found or the function was not finite
pub fn bracket_from_seed<F>(
    f: &mut F,
    seed: f64,
    options: &RootOptions,
) -> Result<(f64, f64), RootError>
where
    F: FnMut(f64) -> f64,
{
    let f_seed = evaluate(f, seed)?;
    if f_seed == 0.0 {
        return Ok((seed, seed));
    }

    let (mut last_hi, mut f_last_hi) = (seed, f_seed);
    let (mut last_lo, mut f_last_lo) = (seed, f_seed);
    let mut half_width = options.initial_step;

    for _ in 0..options.max_expansions {
        let hi = seed + half_width;
        let f_hi = evaluate(f, hi)?;
        if f_hi == 0.0 {
            return Ok((hi, hi));
        }
        if opposite_signs(f_last_hi, f_hi) {
            return Ok((last_hi, hi));
        }

        let lo = seed - half_width;
        let f_lo = evaluate(f, lo)?;
        if f_lo == 0.0 {
            return Ok((lo, lo));
        }
        if opposite_signs(f_last_lo, f_lo) {
            return Ok((lo, last_lo));
        }

        last_hi = hi;
        f_last_hi = f_hi;
        last_lo = lo;
        f_last_lo = f_lo;
        half_width *= options.growth;
    }

    Err(RootError::NoBracket {
        seed,
        half_width: half_width / options.growth,
    })
}

/// Refine a root inside `[lo, hi]` with Brent's method.
///
/// The endpoints must bracket a sign change. The root is accepted only if
/// `|f(root)| <= options.ftol`; otherwise the sign change is reported as a
/// discontinuity.
pub fn brent<F>(f: &mut F, lo: f64, hi: f64, options: &RootOptions) -> Result<f64, RootError>
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = (lo, hi);
    let mut fa = evaluate(f, a)?;
    let mut fb = evaluate(f, b)?;

    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if !opposite_signs(fa, fb) {
        return Err(RootError::InvalidBracket { lo, hi });
    }

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for _ in 0..options.max_iterations {
        if !opposite_signs(fb, fc) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * options.xtol;
        let xm = 0.5 * (c - b);

        if xm.abs() <= tol || fb == 0.0 {
            return accept(b, fb, options);
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (secant when a == c)
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();

            let min1 = 3.0 * xm * q - (tol * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(xm) };
        fb = evaluate(f, b)?;
    }

    Err(RootError::MaxIterations {
        iterations: options.max_iterations,
    })
}

fn accept(x: f64, fx: f64, options: &RootOptions) -> Result<f64, RootError> {
    if fx.abs() <= options.ftol {
        Ok(x)
    } else {
        Err(RootError::Discontinuity { x, residual: fx })
    }
}

/// Find a root of `f` starting from a fixed seed.
///
/// Combines [`bracket_from_seed`] and [`brent`].
pub fn find_root_from_seed<F>(mut f: F, seed: f64, options: &RootOptions) -> Result<f64, RootError>
where
    F: FnMut(f64) -> f64,
{
    let (lo, hi) = bracket_from_seed(&mut f, seed, options)?;
    if lo == hi {
        return Ok(lo);
    }
    brent(&mut f, lo, hi, options)
}
