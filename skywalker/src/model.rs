//! Model-based alignment strategies
//!
//! A model predicts imager centroids from mirror pitches. Strategies plug in
//! through three traits:
//!
//! - [`ModelBuilder`] fits a model from accumulated [`History`]
//! - [`AlignmentModel`] computes (and optionally commits) one step toward the targets
//! - [`ModelLibrary`] loads a previously saved model by name
//!
//! [`LinearResponseModel`] is the provided strategy: an affine fit
//!
//! ```text
//! centroid = response * alpha + intercept
//! ```
//!
//! stepped as a Newton update anchored on the measured centroids, so a
//! constant offset in the fit does not bias the result.

use std::collections::BTreeMap;

use beam_math::{fit_affine, invert_matrix, solve_2x2, AffineFit, AffineFitError, SingularMatrixError};
use beamline::Relay;
use nalgebra::{Matrix2, Vector2};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::SkywalkerResult;
use crate::history::History;
use crate::request::Targets;

/// Errors from model building, loading and stepping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Not enough history to fit a model
    #[error("insufficient history: {got} samples, need {need}")]
    InsufficientData { got: usize, need: usize },

    /// History does not move both mirrors independently
    #[error("history does not excite both mirrors: {0}")]
    DegenerateHistory(AffineFitError),

    /// Fitted response cannot be inverted
    #[error("response matrix is singular: {0}")]
    SingularResponse(#[from] SingularMatrixError),

    /// No saved model under that name
    #[error("no saved model named '{0}'")]
    UnknownModel(String),
}

impl ModelError {
    /// True when more (or more varied) history would fix the problem
    pub fn needs_more_data(&self) -> bool {
        matches!(
            self,
            ModelError::InsufficientData { .. } | ModelError::DegenerateHistory(_)
        )
    }
}

/// A fitted model that can step the relay toward target centroids
pub trait AlignmentModel: Send {
    /// Name used in logs and by [`ModelLibrary`]
    fn name(&self) -> &str;

    /// Compute mirror pitches that put the beam on `targets`.
    ///
    /// Reads the relay as needed. When `commit` is true the pitches are
    /// written to both mirrors before returning.
    fn step(&mut self, relay: &mut Relay, targets: Targets, commit: bool)
        -> SkywalkerResult<(f64, f64)>;
}

/// Fits a model from history
pub trait ModelBuilder: Send {
    fn build(&self, history: &History) -> Result<Box<dyn AlignmentModel>, ModelError>;
}

/// Source of previously saved models
pub trait ModelLibrary: Send {
    fn load(&self, name: &str) -> Result<Box<dyn AlignmentModel>, ModelError>;
}

/// Affine centroid response to mirror pitch
///
/// The response matrix is validated as invertible on construction, so
/// stepping never meets a singular matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearResponseModel {
    name: String,
    /// d(centroid)/d(alpha) in pixels/rad, row-major [m00, m01, m10, m11]
    response: [f64; 4],
    /// Centroids at zero pitch (pixels)
    intercept: [f64; 2],
    /// RMS fit residual (pixels)
    rms_residual_px: f64,
    samples: usize,
}

impl LinearResponseModel {
    /// # Errors
    /// Returns `SingularResponse` if `response` cannot be inverted
    pub fn new(
        name: impl Into<String>,
        response: Matrix2<f64>,
        intercept: Vector2<f64>,
    ) -> Result<Self, ModelError> {
        invert_matrix(&response)?;
        Ok(Self {
            name: name.into(),
            response: [
                response[(0, 0)],
                response[(0, 1)],
                response[(1, 0)],
                response[(1, 1)],
            ],
            intercept: [intercept.x, intercept.y],
            rms_residual_px: 0.0,
            samples: 0,
        })
    }

    pub fn from_fit(name: impl Into<String>, fit: &AffineFit) -> Result<Self, ModelError> {
        let mut model = Self::new(name, fit.matrix, fit.offset)?;
        model.rms_residual_px = fit.rms_residual;
        model.samples = fit.samples;
        Ok(model)
    }

    pub fn response_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.response[0],
            self.response[1],
            self.response[2],
            self.response[3],
        )
    }

    pub fn intercept(&self) -> Vector2<f64> {
        Vector2::new(self.intercept[0], self.intercept[1])
    }

    pub fn rms_residual_px(&self) -> f64 {
        self.rms_residual_px
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Predicted centroids at the given pitches
    pub fn predict(&self, alphas: (f64, f64)) -> (f64, f64) {
        let c = self.response_matrix() * Vector2::new(alphas.0, alphas.1) + self.intercept();
        (c.x, c.y)
    }

    /// Pitches that move the measured centroids onto the targets
    pub fn correct(
        &self,
        alphas: (f64, f64),
        measured: (f64, f64),
        targets: Targets,
    ) -> Result<(f64, f64), ModelError> {
        let error = targets.as_vector() - Vector2::new(measured.0, measured.1);
        let delta = solve_2x2(&self.response_matrix(), &error)?;
        Ok((alphas.0 + delta.x, alphas.1 + delta.y))
    }
}

impl AlignmentModel for LinearResponseModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &mut self,
        relay: &mut Relay,
        targets: Targets,
        commit: bool,
    ) -> SkywalkerResult<(f64, f64)> {
        let alphas = relay.alphas()?;
        let measured = relay.centroids()?;
        let next = self.correct(alphas, measured, targets)?;
        debug!(
            model = %self.name,
            alpha_1 = next.0,
            alpha_2 = next.1,
            measured_1 = measured.0,
            measured_2 = measured.1,
            "model step"
        );
        if commit {
            relay.commit_alphas(next.0, next.1)?;
        }
        Ok(next)
    }
}

/// Builds [`LinearResponseModel`]s by least squares over history
#[derive(Debug, Clone)]
pub struct LinearModelBuilder {
    min_samples: usize,
    name: String,
}

impl LinearModelBuilder {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(3),
            name: "linear".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fit the concrete model
    pub fn fit(&self, history: &History) -> Result<LinearResponseModel, ModelError> {
        if history.len() < self.min_samples {
            return Err(ModelError::InsufficientData {
                got: history.len(),
                need: self.min_samples,
            });
        }
        let inputs: Vec<_> = history.iter().map(|s| s.alphas()).collect();
        let outputs: Vec<_> = history.iter().map(|s| s.centroids()).collect();

        let fit = fit_affine(&inputs, &outputs).map_err(|err| match err {
            AffineFitError::InsufficientSamples { got, need } => {
                ModelError::InsufficientData { got, need }
            }
            other => ModelError::DegenerateHistory(other),
        })?;

        let model = LinearResponseModel::from_fit(self.name.clone(), &fit)?;
        info!(
            model = %self.name,
            samples = fit.samples,
            rms_residual_px = fit.rms_residual,
            "built linear response model"
        );
        Ok(model)
    }
}

impl ModelBuilder for LinearModelBuilder {
    fn build(&self, history: &History) -> Result<Box<dyn AlignmentModel>, ModelError> {
        Ok(Box::new(self.fit(history)?))
    }
}

/// In-memory library of named linear models
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, LinearResponseModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a model under its own name, replacing any previous one
    pub fn insert(&mut self, model: LinearResponseModel) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelLibrary for ModelRegistry {
    fn load(&self, name: &str) -> Result<Box<dyn AlignmentModel>, ModelError> {
        self.models
            .get(name)
            .cloned()
            .map(|model| Box::new(model) as Box<dyn AlignmentModel>)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }
}
