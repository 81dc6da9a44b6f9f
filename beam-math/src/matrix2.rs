//! 2x2 matrix helpers using nalgebra
//!
//! Mirror-angle response matrices mix very different scales (pixels per
//! radian on a near and a far imager), so singularity is judged relative to
//! the matrix's largest entry rather than against an absolute determinant.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// Error when a 2x2 matrix is too close to singular to invert
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular matrix: determinant={determinant:.6e} (scale {scale:.3e})")]
pub struct SingularMatrixError {
    /// The determinant value
    pub determinant: f64,
    /// Largest absolute entry, used to normalise the determinant
    pub scale: f64,
}

/// Relative determinant threshold: |det| / max|a_ij|² below this is singular
const RELATIVE_DETERMINANT_EPSILON: f64 = 1e-12;

/// Invert a 2x2 matrix, rejecting matrices that are singular relative to their scale
///
/// # Returns
/// * `Ok(Matrix2<f64>)` - The inverse matrix
/// * `Err(SingularMatrixError)` - If the matrix is zero or numerically singular
pub fn invert_matrix(matrix: &Matrix2<f64>) -> Result<Matrix2<f64>, SingularMatrixError> {
    let determinant = matrix.determinant();
    let scale = matrix.amax();

    if !determinant.is_finite()
        || scale == 0.0
        || determinant.abs() <= RELATIVE_DETERMINANT_EPSILON * scale * scale
    {
        return Err(SingularMatrixError { determinant, scale });
    }

    matrix
        .try_inverse()
        .ok_or(SingularMatrixError { determinant, scale })
}

/// Solve `matrix * x = rhs` for `x`
pub fn solve_2x2(
    matrix: &Matrix2<f64>,
    rhs: &Vector2<f64>,
) -> Result<Vector2<f64>, SingularMatrixError> {
    Ok(invert_matrix(matrix)? * rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inversion_roundtrip() {
        let matrix = Matrix2::new(2.0, 1.0, 1.0, 3.0);
        let inverse = invert_matrix(&matrix).unwrap();

        let product = matrix * inverse;

        assert_relative_eq!(product, Matrix2::identity(), epsilon = 1e-10);
    }

    #[test]
    fn test_singular_matrix_error() {
        let matrix = Matrix2::new(1.0, 2.0, 2.0, 4.0);

        let err = invert_matrix(&matrix).unwrap_err();

        assert!(err.determinant.abs() < 1e-9);
        assert_relative_eq!(err.scale, 4.0);
    }

    #[test]
    fn test_zero_matrix_is_singular() {
        assert!(invert_matrix(&Matrix2::zeros()).is_err());
    }

    #[test]
    fn test_large_scale_response_matrix() {
        // Pixels-per-radian responses: absolute determinant is huge, columns nearly parallel
        let matrix = Matrix2::new(-4.8e6, 6.6e5, -1.04e8, 1.0e8);
        let inverse = invert_matrix(&matrix).unwrap();
        assert_relative_eq!(matrix * inverse, Matrix2::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_solve_2x2() {
        let matrix = Matrix2::new(3.0, 1.0, 2.0, 4.0);
        let x = solve_2x2(&matrix, &Vector2::new(5.0, 10.0)).unwrap();
        assert_relative_eq!(x, Vector2::new(1.0, 2.0), epsilon = 1e-12);
    }
}
