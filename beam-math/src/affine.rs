//! Least-squares affine fit between 2D quantities
//!
//! Fits `output ≈ matrix * input + offset` over paired samples. Inputs and
//! outputs are centred on their means before the SVD solve so that small
//! excursions around a large operating point (milliradian pitches nudged by
//! microradians) stay well conditioned.

use nalgebra::{DMatrix, Matrix2, Vector2};
use thiserror::Error;

/// Inputs whose smallest/largest singular value ratio falls below this do not
/// span two dimensions well enough to separate the two input axes
const MIN_SINGULAR_RATIO: f64 = 1e-4;

/// Errors from the affine fit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AffineFitError {
    #[error("input and output sample counts differ: {inputs} vs {outputs}")]
    LengthMismatch { inputs: usize, outputs: usize },

    #[error("insufficient samples: got {got}, need {need}")]
    InsufficientSamples { got: usize, need: usize },

    /// Inputs do not span two dimensions
    #[error("degenerate inputs: singular value ratio {ratio:.3e}")]
    DegenerateInputs { ratio: f64 },

    #[error("SVD solve failed: {0}")]
    Svd(&'static str),
}

/// Result of an affine fit
#[derive(Debug, Clone, PartialEq)]
pub struct AffineFit {
    /// Linear part: d(output)/d(input)
    pub matrix: Matrix2<f64>,
    /// Output at input = 0
    pub offset: Vector2<f64>,
    /// RMS of the output residual norms
    pub rms_residual: f64,
    /// Number of samples used
    pub samples: usize,
}

impl AffineFit {
    /// Evaluate the fitted map
    pub fn apply(&self, input: &Vector2<f64>) -> Vector2<f64> {
        self.matrix * input + self.offset
    }
}

fn mean(points: &[Vector2<f64>]) -> Vector2<f64> {
    points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / points.len() as f64
}

/// Fit `outputs[i] ≈ matrix * inputs[i] + offset` in the least-squares sense.
///
/// Needs at least three samples whose inputs are not collinear.
pub fn fit_affine(
    inputs: &[Vector2<f64>],
    outputs: &[Vector2<f64>],
) -> Result<AffineFit, AffineFitError> {
    if inputs.len() != outputs.len() {
        return Err(AffineFitError::LengthMismatch {
            inputs: inputs.len(),
            outputs: outputs.len(),
        });
    }
    let n = inputs.len();
    if n < 3 {
        return Err(AffineFitError::InsufficientSamples { got: n, need: 3 });
    }

    let mean_in = mean(inputs);
    let mean_out = mean(outputs);

    let design = DMatrix::from_fn(n, 2, |row, col| inputs[row][col] - mean_in[col]);
    let targets = DMatrix::from_fn(n, 2, |row, col| outputs[row][col] - mean_out[col]);

    let svd = design.svd(true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    let ratio = if largest > 0.0 { smallest / largest } else { 0.0 };
    if ratio < MIN_SINGULAR_RATIO {
        return Err(AffineFitError::DegenerateInputs { ratio });
    }

    // design * solution ≈ targets, so each output row is input_row * solution
    let solution = svd.solve(&targets, 0.0).map_err(AffineFitError::Svd)?;
    let matrix = Matrix2::new(
        solution[(0, 0)],
        solution[(1, 0)],
        solution[(0, 1)],
        solution[(1, 1)],
    );
    let offset = mean_out - matrix * mean_in;

    let sum_sq: f64 = inputs
        .iter()
        .zip(outputs)
        .map(|(input, output)| (matrix * input + offset - output).norm_squared())
        .sum();

    Ok(AffineFit {
        matrix,
        offset,
        rms_residual: (sum_sq / n as f64).sqrt(),
        samples: n,
    })
}
