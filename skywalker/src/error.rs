//! Error types for the alignment controller

use beam_math::GeometryError;
use beamline::DeviceError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ModelError;

/// Errors surfaced by walks and walker operations
#[derive(Error, Debug)]
pub enum SkywalkerError {
    /// Geometry solve failed (degenerate geometry, no real root, solver failure)
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Device read or command failed
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Request or configuration rejected before any device I/O
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Model building, loading or stepping failed
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Model mode with no fitted model and no model to load
    #[error("no model available: fit one with build mode or request a saved model")]
    NoModel,

    /// Iterative walk exhausted its budget
    #[error("not converged after {iterations} iterations: {distance:.3} px from target")]
    NotConverged { iterations: usize, distance: f64 },
}

/// Result type for controller operations
pub type SkywalkerResult<T> = Result<T, SkywalkerError>;
