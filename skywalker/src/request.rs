//! Alignment requests, convergence state and walk outcomes

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Alignment strategy selected per walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkMode {
    /// Geometric refinement, commit, measure, repeat
    Iter,
    /// One committed step of an available or loaded model
    Model,
    /// Build a model from history, then one committed step
    Build,
    /// Model, then build, then iterate, falling through on failure
    Auto,
}

impl FromStr for WalkMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iter" => Ok(WalkMode::Iter),
            "model" => Ok(WalkMode::Model),
            "build" => Ok(WalkMode::Build),
            "auto" => Ok(WalkMode::Auto),
            _ => Err(ConfigError::UnsupportedMode(s.to_string())),
        }
    }
}

impl fmt::Display for WalkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalkMode::Iter => "iter",
            WalkMode::Model => "model",
            WalkMode::Build => "build",
            WalkMode::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Target centroid pixels on imager 1 and imager 2
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub p1: f64,
    pub p2: f64,
}

impl Targets {
    pub fn new(p1: f64, p2: f64) -> Self {
        Self { p1, p2 }
    }

    pub fn as_pair(&self) -> (f64, f64) {
        (self.p1, self.p2)
    }

    pub fn as_vector(&self) -> Vector2<f64> {
        Vector2::new(self.p1, self.p2)
    }
}

/// Euclidean distance between two pixel pairs
pub fn distance(p: (f64, f64), q: (f64, f64)) -> f64 {
    (Vector2::new(p.0, p.1) - Vector2::new(q.0, q.1)).norm()
}

/// One alignment request, created per walk
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRequest {
    pub targets: Targets,
    pub mode: WalkMode,
    /// Iteration budget for iterative walks; the configured cap when `None`
    pub max_n: Option<usize>,
    /// Named model to load before stepping
    pub load_model: Option<String>,
}

impl AlignmentRequest {
    pub fn new(p1: f64, p2: f64, mode: WalkMode) -> Self {
        Self {
            targets: Targets::new(p1, p2),
            mode,
            max_n: None,
            load_model: None,
        }
    }

    pub fn with_max_n(mut self, max_n: usize) -> Self {
        self.max_n = Some(max_n);
        self
    }

    pub fn with_load_model(mut self, name: impl Into<String>) -> Self {
        self.load_model = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.targets.p1.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "p1",
                reason: format!("{} is not finite", self.targets.p1),
            });
        }
        if !self.targets.p2.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "p2",
                reason: format!("{} is not finite", self.targets.p2),
            });
        }
        if self.max_n == Some(0) && self.mode != WalkMode::Model && self.mode != WalkMode::Build {
            return Err(ConfigError::InvalidParameter {
                name: "max_n",
                reason: "an iterative walk needs at least one iteration".to_string(),
            });
        }
        if let Some(name) = &self.load_model {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidParameter {
                    name: "load_model",
                    reason: "model name is empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Measured centroids against the targets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceState {
    pub centroids: (f64, f64),
    pub targets: Targets,
    /// Euclidean pixel distance between centroids and targets
    pub distance: f64,
}

impl ConvergenceState {
    pub fn measure(centroids: (f64, f64), targets: Targets) -> Self {
        Self {
            centroids,
            targets,
            distance: distance(centroids, targets.as_pair()),
        }
    }

    pub fn is_converged(&self, tolerance_px: f64) -> bool {
        self.distance <= tolerance_px
    }
}

/// Result of a walk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkOutcome {
    /// Strategy that produced the final state
    pub mode: WalkMode,
    /// Committed moves across all strategies tried
    pub iterations: usize,
    /// Final commanded mirror pitches (rad)
    pub alphas: (f64, f64),
    pub state: ConvergenceState,
    pub converged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        assert_eq!(distance((0.0, 0.0), (3.0, 4.0)), 5.0);
        assert_eq!(distance((1.0, 1.0), (1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("iter".parse::<WalkMode>().unwrap(), WalkMode::Iter);
        assert_eq!("AUTO".parse::<WalkMode>().unwrap(), WalkMode::Auto);
        let err = "teleport".parse::<WalkMode>().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedMode(ref m) if m == "teleport"));
    }

    #[test]
    fn test_mode_display_round_trip() {
        for mode in [WalkMode::Iter, WalkMode::Model, WalkMode::Build, WalkMode::Auto] {
            assert_eq!(mode.to_string().parse::<WalkMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(AlignmentRequest::new(696.0, 696.0, WalkMode::Iter)
            .validate()
            .is_ok());
        assert!(AlignmentRequest::new(f64::NAN, 696.0, WalkMode::Iter)
            .validate()
            .is_err());
        assert!(AlignmentRequest::new(696.0, 696.0, WalkMode::Iter)
            .with_max_n(0)
            .validate()
            .is_err());
        assert!(AlignmentRequest::new(696.0, 696.0, WalkMode::Model)
            .with_load_model(" ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_convergence_uses_tolerance() {
        let state = ConvergenceState::measure((696.3, 695.6), Targets::new(696.0, 696.0));
        assert!(state.is_converged(1.0));
        assert!(!state.is_converged(0.1));
        assert!((state.distance - 0.5).abs() < 1e-12);
    }
}
