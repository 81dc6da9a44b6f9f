//! Iterative two-mirror walker
//!
//! Each refinement re-reads the relay, derives goal positions from the target
//! pixels, then solves mirror 1 against mirror 2's pitch and mirror 2 against
//! the freshly solved mirror 1. The two pitches are coupled, so repeated
//! refinements converge on the pair that satisfies both imagers at once.

use beam_math::{solve_alpha_1, solve_alpha_2, SolveMethod};
use beamline::{Relay, RelaySnapshot};
use tracing::{debug, trace};

use crate::config::WalkerConfig;
use crate::error::SkywalkerResult;
use crate::request::{self, Targets};

/// Stateful geometric walker borrowing a relay for one session
pub struct IterWalker<'r> {
    relay: &'r mut Relay,
    targets: Targets,
    max_n: usize,
    method: SolveMethod,
    estimate: Option<(f64, f64)>,
}

impl<'r> IterWalker<'r> {
    pub fn new(relay: &'r mut Relay, config: &WalkerConfig, targets: Targets) -> Self {
        Self {
            relay,
            targets,
            max_n: config.max_n,
            method: config.solve_method(),
            estimate: None,
        }
    }

    pub fn with_max_n(mut self, max_n: usize) -> Self {
        self.max_n = max_n;
        self
    }

    pub fn targets(&self) -> Targets {
        self.targets
    }

    pub fn max_n(&self) -> usize {
        self.max_n
    }

    /// Latest pitch pair computed by `step` or `align`
    pub fn estimate(&self) -> Option<(f64, f64)> {
        self.estimate
    }

    /// One refinement from the mirrors' current readback. Never moves anything.
    pub fn step(&mut self) -> SkywalkerResult<(f64, f64)> {
        let snapshot = self.relay.snapshot()?;
        let pair = self.solve(&snapshot, snapshot.mirror_2.alpha)?;
        self.estimate = Some(pair);
        Ok(pair)
    }

    /// Run exactly `max_n` refinements on the internal estimate.
    ///
    /// The estimate is seeded from the mirrors' readback. No convergence check
    /// is made between refinements. With `commit`, the final pair is written
    /// to both mirrors once the loop completes; nothing is written on error.
    pub fn align(
        &mut self,
        p1: Option<f64>,
        p2: Option<f64>,
        commit: bool,
    ) -> SkywalkerResult<(f64, f64)> {
        if let Some(p1) = p1 {
            self.targets.p1 = p1;
        }
        if let Some(p2) = p2 {
            self.targets.p2 = p2;
        }

        let mut pair = self.relay.alphas()?;
        debug!(
            p1 = self.targets.p1,
            p2 = self.targets.p2,
            max_n = self.max_n,
            alpha_1 = pair.0,
            alpha_2 = pair.1,
            commit,
            "align start"
        );

        for _ in 0..self.max_n {
            let snapshot = self.relay.snapshot()?;
            pair = self.solve(&snapshot, pair.1)?;
        }
        self.estimate = Some(pair);

        if commit {
            self.relay.commit_alphas(pair.0, pair.1)?;
        }
        debug!(alpha_1 = pair.0, alpha_2 = pair.1, "align finished");
        Ok(pair)
    }

    /// Euclidean distance between two pixel pairs
    pub fn distance(p: (f64, f64), q: (f64, f64)) -> f64 {
        request::distance(p, q)
    }

    fn solve(&self, snapshot: &RelaySnapshot, alpha_2: f64) -> SkywalkerResult<(f64, f64)> {
        let geometry = snapshot.geometry();
        let goal_1 = snapshot.imager_1.goal_x(self.targets.p1);
        let goal_2 = snapshot.imager_2.goal_x(self.targets.p2);

        let alpha_1 = solve_alpha_1(&geometry, alpha_2, snapshot.imager_1.z, goal_1, &self.method)?;
        let alpha_2 = solve_alpha_2(&geometry, alpha_1, snapshot.imager_2.z, goal_2, &self.method)?;
        trace!(alpha_1, alpha_2, goal_1, goal_2, "refinement");
        Ok((alpha_1, alpha_2))
    }
}
