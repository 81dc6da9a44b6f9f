//! Controller configuration
//!
//! Every recognised option lives in one of these structs with its default.
//! Configs round-trip through JSON; missing fields take their defaults.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use beam_math::{NonlinearOptions, RootOptions, SolveMethod, DEFAULT_NONLINEAR_SEED};
use beamline::SettlePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors, all reported before any device I/O
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Mode string not recognised
    #[error("unsupported mode '{0}'")]
    UnsupportedMode(String),

    /// Parameter missing or out of range
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{value} must be finite and > 0")))
    }
}

/// Which mirror-pitch solve the walker uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    /// Small-angle quadratic
    #[default]
    ClosedForm,
    /// Exact law with bracketed root finding
    Nonlinear,
}

impl FromStr for SolveMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "closed_form" | "closed-form" | "closed" => Ok(SolveMode::ClosedForm),
            "nonlinear" => Ok(SolveMode::Nonlinear),
            _ => Err(ConfigError::UnsupportedMode(s.to_string())),
        }
    }
}

impl fmt::Display for SolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveMode::ClosedForm => write!(f, "closed_form"),
            SolveMode::Nonlinear => write!(f, "nonlinear"),
        }
    }
}

/// Bracket growth and Brent refinement settings for the nonlinear solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootFinderConfig {
    /// First bracket half-width around the seed (rad)
    pub initial_step: f64,
    /// Bracket growth factor per expansion
    pub growth: f64,
    pub max_expansions: usize,
    /// Absolute tolerance on the root (rad)
    pub xtol: f64,
    /// Largest residual accepted at the root (m)
    pub ftol: f64,
    pub max_iterations: usize,
}

impl Default for RootFinderConfig {
    fn default() -> Self {
        let defaults = RootOptions::default();
        Self {
            initial_step: defaults.initial_step,
            growth: defaults.growth,
            max_expansions: defaults.max_expansions,
            xtol: defaults.xtol,
            ftol: defaults.ftol,
            max_iterations: defaults.max_iterations,
        }
    }
}

impl From<&RootFinderConfig> for RootOptions {
    fn from(config: &RootFinderConfig) -> Self {
        RootOptions {
            initial_step: config.initial_step,
            growth: config.growth,
            max_expansions: config.max_expansions,
            xtol: config.xtol,
            ftol: config.ftol,
            max_iterations: config.max_iterations,
        }
    }
}

/// Settings for the iterative walker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Refinements performed by `align`
    pub max_n: usize,
    pub solve_mode: SolveMode,
    /// Initial guess for the nonlinear solve (rad)
    pub nonlinear_seed: f64,
    pub root_finder: RootFinderConfig,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_n: 200,
            solve_mode: SolveMode::ClosedForm,
            nonlinear_seed: DEFAULT_NONLINEAR_SEED,
            root_finder: RootFinderConfig::default(),
        }
    }
}

impl WalkerConfig {
    /// Solve method handed to the geometry model
    pub fn solve_method(&self) -> SolveMethod {
        match self.solve_mode {
            SolveMode::ClosedForm => SolveMethod::ClosedForm,
            SolveMode::Nonlinear => SolveMethod::Nonlinear(NonlinearOptions {
                seed: self.nonlinear_seed,
                roots: RootOptions::from(&self.root_finder),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.nonlinear_seed.is_finite() {
            return Err(invalid("walker.nonlinear_seed", "must be finite"));
        }
        let roots = &self.root_finder;
        require_positive("walker.root_finder.initial_step", roots.initial_step)?;
        require_positive("walker.root_finder.xtol", roots.xtol)?;
        require_positive("walker.root_finder.ftol", roots.ftol)?;
        if !(roots.growth.is_finite() && roots.growth > 1.0) {
            return Err(invalid(
                "walker.root_finder.growth",
                format!("{} must be > 1", roots.growth),
            ));
        }
        if roots.max_expansions == 0 {
            return Err(invalid("walker.root_finder.max_expansions", "must be >= 1"));
        }
        if roots.max_iterations == 0 {
            return Err(invalid("walker.root_finder.max_iterations", "must be >= 1"));
        }
        Ok(())
    }
}

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkywalkerConfig {
    pub walker: WalkerConfig,
    /// Centroid distance from the targets counted as converged (pixels)
    pub tolerance_px: f64,
    /// Iteration cap for iterative walks without a per-request budget
    pub max_walk_iterations: usize,
    /// Time allowed for each actuator to settle (ms)
    pub settle_timeout_ms: u64,
    /// Interval between "still moving" polls (ms)
    pub settle_poll_ms: u64,
    /// History samples required before a model is built
    pub min_build_samples: usize,
    /// History samples retained; oldest are evicted
    pub history_capacity: usize,
}

impl Default for SkywalkerConfig {
    fn default() -> Self {
        Self {
            walker: WalkerConfig::default(),
            tolerance_px: 1.0,
            max_walk_iterations: 50,
            settle_timeout_ms: 5000,
            settle_poll_ms: 10,
            min_build_samples: 6,
            history_capacity: 256,
        }
    }
}

impl SkywalkerConfig {
    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            timeout: Duration::from_millis(self.settle_timeout_ms),
            poll_interval: Duration::from_millis(self.settle_poll_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.walker.validate()?;
        require_positive("tolerance_px", self.tolerance_px)?;
        if self.max_walk_iterations == 0 {
            return Err(invalid("max_walk_iterations", "must be >= 1"));
        }
        if self.settle_poll_ms == 0 {
            return Err(invalid("settle_poll_ms", "must be >= 1"));
        }
        if self.settle_timeout_ms < self.settle_poll_ms {
            return Err(invalid(
                "settle_timeout_ms",
                format!(
                    "{} ms is shorter than the {} ms poll interval",
                    self.settle_timeout_ms, self.settle_poll_ms
                ),
            ));
        }
        if self.min_build_samples < 3 {
            return Err(invalid(
                "min_build_samples",
                "an affine response fit needs at least 3 samples",
            ));
        }
        if self.history_capacity < self.min_build_samples {
            return Err(invalid(
                "history_capacity",
                format!(
                    "{} cannot hold min_build_samples={}",
                    self.history_capacity, self.min_build_samples
                ),
            ));
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_config() {
        let config = SkywalkerConfig::default();

        assert_abs_diff_eq!(config.tolerance_px, 1.0, epsilon = f64::EPSILON);
        assert_eq!(config.settle_timeout_ms, 5000);
        assert_eq!(config.settle_poll_ms, 10);
        assert_eq!(config.walker.max_n, 200);
        assert_eq!(config.walker.solve_mode, SolveMode::ClosedForm);
        assert_abs_diff_eq!(config.walker.nonlinear_seed, 0.0014, epsilon = f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = SkywalkerConfig::default();
        config.tolerance_px = 0.25;
        config.walker.solve_mode = SolveMode::Nonlinear;
        config.walker.root_finder.max_expansions = 12;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skywalker.json");
        config.save_to_file(&path).unwrap();
        let loaded = SkywalkerConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: SkywalkerConfig =
            serde_json::from_str(r#"{"tolerance_px": 2.5, "walker": {"solve_mode": "nonlinear"}}"#)
                .unwrap();
        assert_abs_diff_eq!(config.tolerance_px, 2.5, epsilon = f64::EPSILON);
        assert_eq!(config.walker.solve_mode, SolveMode::Nonlinear);
        assert_eq!(config.walker.max_n, 200);
        assert_eq!(config.max_walk_iterations, 50);
    }

    #[test]
    fn test_invalid_file_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"tolerance_px": -1.0}"#).unwrap();

        let err = SkywalkerConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidParameter {
                name: "tolerance_px",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SkywalkerConfig::load_from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SkywalkerConfig::load_from_file("/nonexistent/skywalker.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = SkywalkerConfig::default();
        config.settle_timeout_ms = 5;
        assert!(config.validate().is_err());

        let mut config = SkywalkerConfig::default();
        config.min_build_samples = 2;
        assert!(config.validate().is_err());

        let mut config = SkywalkerConfig::default();
        config.history_capacity = 4;
        assert!(config.validate().is_err());

        let mut config = SkywalkerConfig::default();
        config.walker.root_finder.growth = 1.0;
        assert!(config.validate().is_err());

        let mut config = SkywalkerConfig::default();
        config.max_walk_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_solve_mode_parsing() {
        assert_eq!("nonlinear".parse::<SolveMode>().unwrap(), SolveMode::Nonlinear);
        assert_eq!("Closed-Form".parse::<SolveMode>().unwrap(), SolveMode::ClosedForm);
        assert!(matches!(
            "symbolic".parse::<SolveMode>(),
            Err(ConfigError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_solve_method_mapping() {
        let mut walker = WalkerConfig::default();
        assert_eq!(walker.solve_method(), SolveMethod::ClosedForm);

        walker.solve_mode = SolveMode::Nonlinear;
        walker.nonlinear_seed = 0.0015;
        match walker.solve_method() {
            SolveMethod::Nonlinear(options) => {
                assert_eq!(options.seed, 0.0015);
                assert_eq!(options.roots, RootOptions::default());
            }
            other => panic!("unexpected method {other:?}"),
        }
    }
}
