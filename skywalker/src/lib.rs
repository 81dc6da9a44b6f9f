//! skywalker - Two-mirror beam alignment controller
//!
//! Steers a two-mirror relay so the beam lands on target pixels at two
//! downstream imagers. [`Skywalker`] dispatches each [`AlignmentRequest`] to
//! one of four strategies:
//!
//! - **iter** - [`IterWalker`] refinement, commit, measure, repeat until within tolerance
//! - **model** - one committed step of an available or named saved model
//! - **build** - fit a model from history, then one committed step
//! - **auto** - model, then build, then iter, falling through on failure
//!
//! Each call re-enters at the requested mode; only the fitted model and the
//! sample history persist between calls.
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use beamline::{SimRelay, SimRelayConfig};
//! use skywalker::{AlignmentRequest, Skywalker, SkywalkerConfig, WalkMode};
//!
//! let (relay, _sim) = SimRelay::build(SimRelayConfig::default().with_alphas(0.00141, 0.00139))?;
//! let config = SkywalkerConfig {
//!     settle_poll_ms: 1,
//!     ..SkywalkerConfig::default()
//! };
//! let mut skywalker = Skywalker::new(relay, config)?;
//!
//! let outcome = skywalker.walk(&AlignmentRequest::new(696.0, 696.0, WalkMode::Iter))?;
//! assert!(outcome.converged);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod iter_walker;
pub mod model;
pub mod request;

use beamline::Relay;
use tracing::{debug, info, warn};

pub use config::{ConfigError, RootFinderConfig, SkywalkerConfig, SolveMode, WalkerConfig};
pub use error::{SkywalkerError, SkywalkerResult};
pub use history::{History, HistorySample};
pub use iter_walker::IterWalker;
pub use model::{
    AlignmentModel, LinearModelBuilder, LinearResponseModel, ModelBuilder, ModelError,
    ModelLibrary, ModelRegistry,
};
pub use request::{
    distance, AlignmentRequest, ConvergenceState, Targets, WalkMode, WalkOutcome,
};

/// Mode dispatcher owning one relay session
pub struct Skywalker {
    relay: Relay,
    config: SkywalkerConfig,
    model: Option<Box<dyn AlignmentModel>>,
    builder: Box<dyn ModelBuilder>,
    library: Box<dyn ModelLibrary>,
    history: History,
}

impl Skywalker {
    /// Validate `config` and take ownership of the relay.
    ///
    /// The relay's settle policy is replaced by the configured one.
    pub fn new(mut relay: Relay, config: SkywalkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        relay.set_settle_policy(config.settle_policy());
        Ok(Self {
            relay,
            model: None,
            builder: Box::new(LinearModelBuilder::new(config.min_build_samples)),
            library: Box::new(ModelRegistry::new()),
            history: History::new(config.history_capacity),
            config,
        })
    }

    pub fn with_builder(mut self, builder: Box<dyn ModelBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_library(mut self, library: Box<dyn ModelLibrary>) -> Self {
        self.library = library;
        self
    }

    /// Replace the library consulted for named models
    pub fn set_library(&mut self, library: Box<dyn ModelLibrary>) {
        self.library = library;
    }

    /// Install a fitted model for model mode
    pub fn set_model(&mut self, model: Box<dyn AlignmentModel>) {
        self.model = Some(model);
    }

    pub fn clear_model(&mut self) {
        self.model = None;
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|model| model.name())
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &SkywalkerConfig {
        &self.config
    }

    pub fn relay_mut(&mut self) -> &mut Relay {
        &mut self.relay
    }

    pub fn into_relay(self) -> Relay {
        self.relay
    }

    /// Iterative walker over this session's relay
    pub fn walker(&mut self, targets: Targets) -> IterWalker<'_> {
        IterWalker::new(&mut self.relay, &self.config.walker, targets)
    }

    /// Run one alignment request.
    ///
    /// The request is validated, and model mode checked for a usable model,
    /// before any device is touched.
    pub fn walk(&mut self, request: &AlignmentRequest) -> SkywalkerResult<WalkOutcome> {
        request.validate()?;
        if request.mode == WalkMode::Model && self.model.is_none() && request.load_model.is_none()
        {
            return Err(SkywalkerError::NoModel);
        }

        info!(
            mode = %request.mode,
            p1 = request.targets.p1,
            p2 = request.targets.p2,
            "walk start"
        );
        let outcome = match request.mode {
            WalkMode::Iter => self.walk_iter(request),
            WalkMode::Model => self.walk_model(request),
            WalkMode::Build => self.walk_build(request.targets),
            WalkMode::Auto => self.walk_auto(request),
        }?;
        info!(
            mode = %outcome.mode,
            iterations = outcome.iterations,
            distance = outcome.state.distance,
            converged = outcome.converged,
            "walk finished"
        );
        Ok(outcome)
    }

    /// Commit a pitch pair, settle, and record the measured centroids
    pub fn sample_at(&mut self, alpha_1: f64, alpha_2: f64) -> SkywalkerResult<HistorySample> {
        self.relay.commit_alphas(alpha_1, alpha_2)?;
        self.record((alpha_1, alpha_2))
    }

    /// Record a 3x3 grid of samples spaced `step` rad around `center`, then
    /// return the mirrors to `center`.
    pub fn survey(&mut self, center: (f64, f64), step: f64) -> SkywalkerResult<usize> {
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "survey step",
                reason: format!("{step} must be finite and > 0"),
            }
            .into());
        }
        let mut recorded = 0;
        for i in -1..=1 {
            for j in -1..=1 {
                let alpha_1 = center.0 + f64::from(i) * step;
                let alpha_2 = center.1 + f64::from(j) * step;
                self.sample_at(alpha_1, alpha_2)?;
                recorded += 1;
            }
        }
        self.relay.commit_alphas(center.0, center.1)?;
        info!(recorded, step, "survey complete");
        Ok(recorded)
    }

    fn record(&mut self, alphas: (f64, f64)) -> SkywalkerResult<HistorySample> {
        let centroids = self.relay.centroids()?;
        let sample = HistorySample::new(alphas, centroids);
        self.history.push(sample);
        Ok(sample)
    }

    fn measure(&mut self, targets: Targets) -> SkywalkerResult<ConvergenceState> {
        Ok(ConvergenceState::measure(self.relay.centroids()?, targets))
    }

    fn outcome(
        &self,
        mode: WalkMode,
        iterations: usize,
        alphas: (f64, f64),
        state: ConvergenceState,
    ) -> WalkOutcome {
        WalkOutcome {
            mode,
            iterations,
            alphas,
            state,
            converged: state.is_converged(self.config.tolerance_px),
        }
    }

    fn walk_iter(&mut self, request: &AlignmentRequest) -> SkywalkerResult<WalkOutcome> {
        let targets = request.targets;
        let budget = request.max_n.unwrap_or(self.config.max_walk_iterations);

        let mut state = self.measure(targets)?;
        if state.is_converged(self.config.tolerance_px) {
            let alphas = self.relay.alphas()?;
            return Ok(self.outcome(WalkMode::Iter, 0, alphas, state));
        }

        for iteration in 1..=budget {
            let alphas = self.walker(targets).step()?;
            self.relay.commit_alphas(alphas.0, alphas.1)?;
            let sample = self.record(alphas)?;
            state = ConvergenceState::measure((sample.centroid_1, sample.centroid_2), targets);
            debug!(
                iteration,
                alpha_1 = alphas.0,
                alpha_2 = alphas.1,
                distance = state.distance,
                "iter step"
            );
            if state.is_converged(self.config.tolerance_px) {
                return Ok(self.outcome(WalkMode::Iter, iteration, alphas, state));
            }
        }

        Err(SkywalkerError::NotConverged {
            iterations: budget,
            distance: state.distance,
        })
    }

    fn model_step(&mut self, mode: WalkMode, targets: Targets) -> SkywalkerResult<WalkOutcome> {
        let model = self.model.as_mut().ok_or(SkywalkerError::NoModel)?;
        let alphas = model.step(&mut self.relay, targets, true)?;
        let sample = self.record(alphas)?;
        let state = ConvergenceState::measure((sample.centroid_1, sample.centroid_2), targets);
        Ok(self.outcome(mode, 1, alphas, state))
    }

    fn load_requested(&mut self, request: &AlignmentRequest) -> SkywalkerResult<()> {
        if let Some(name) = &request.load_model {
            let model = self.library.load(name)?;
            info!(model = %name, "loaded saved model");
            self.model = Some(model);
        }
        Ok(())
    }

    fn walk_model(&mut self, request: &AlignmentRequest) -> SkywalkerResult<WalkOutcome> {
        self.load_requested(request)?;
        self.model_step(WalkMode::Model, request.targets)
    }

    fn walk_build(&mut self, targets: Targets) -> SkywalkerResult<WalkOutcome> {
        let model = self.builder.build(&self.history)?;
        info!(model = model.name(), samples = self.history.len(), "model built from history");
        self.model = Some(model);
        self.model_step(WalkMode::Build, targets)
    }

    /// Model step, then build from history, then a bounded iterative walk.
    ///
    /// Model failures and unconverged model steps fall through to the next
    /// stage. Device and geometry errors abort the walk.
    fn walk_auto(&mut self, request: &AlignmentRequest) -> SkywalkerResult<WalkOutcome> {
        let targets = request.targets;
        let mut iterations = 0;

        if self.model.is_some() || request.load_model.is_some() {
            let attempt = self
                .load_requested(request)
                .and_then(|()| self.model_step(WalkMode::Model, targets));
            match attempt {
                Ok(outcome) if outcome.converged => return Ok(outcome),
                Ok(outcome) => {
                    iterations += outcome.iterations;
                    warn!(
                        distance = outcome.state.distance,
                        "model step did not converge, building from history"
                    );
                }
                Err(SkywalkerError::Model(err)) => {
                    warn!(error = %err, "model unavailable, building from history");
                }
                Err(err) => return Err(err),
            }
        }

        if self.history.len() >= self.config.min_build_samples {
            match self.walk_build(targets) {
                Ok(mut outcome) if outcome.converged => {
                    outcome.iterations += iterations;
                    return Ok(outcome);
                }
                Ok(outcome) => {
                    iterations += outcome.iterations;
                    warn!(
                        distance = outcome.state.distance,
                        "built model did not converge, falling back to iterative walk"
                    );
                }
                Err(SkywalkerError::Model(err)) => {
                    warn!(error = %err, "model build failed, falling back to iterative walk");
                }
                Err(err) => return Err(err),
            }
        } else {
            warn!(
                samples = self.history.len(),
                need = self.config.min_build_samples,
                "insufficient history for a model, falling back to iterative walk"
            );
        }

        let mut outcome = self.walk_iter(request)?;
        outcome.iterations += iterations;
        Ok(outcome)
    }
}

impl std::fmt::Debug for Skywalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skywalker")
            .field("relay", &self.relay)
            .field("config", &self.config)
            .field("model", &self.model_name())
            .field("history", &self.history.len())
            .finish()
    }
}
