//! Common utilities for skywalker integration tests
#![allow(dead_code)]

use beamline::{Relay, SimHandle, SimRelay, SimRelayConfig};
use skywalker::{Skywalker, SkywalkerConfig};

/// Centre pixel of the default simulated imagers
pub const CENTER: f64 = 696.0;

/// Pitch pair slightly off the aligned relay
pub const PERTURBED: (f64, f64) = (0.00141, 0.00139);

/// Install a test-writer subscriber so walk logs show up with `--nocapture`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Controller config with millisecond settle polling
pub fn fast_config() -> SkywalkerConfig {
    SkywalkerConfig {
        settle_poll_ms: 1,
        settle_timeout_ms: 200,
        ..SkywalkerConfig::default()
    }
}

/// Simulated relay starting at the given mirror pitches
pub fn sim_relay(alphas: (f64, f64)) -> (Relay, SimHandle) {
    sim_relay_with(SimRelayConfig::default().with_alphas(alphas.0, alphas.1))
}

pub fn sim_relay_with(config: SimRelayConfig) -> (Relay, SimHandle) {
    SimRelay::build(config).expect("valid simulation config")
}

/// Dispatcher over a simulated relay starting at the given pitches
pub fn sim_skywalker(alphas: (f64, f64)) -> (Skywalker, SimHandle) {
    let (relay, handle) = sim_relay(alphas);
    let skywalker = Skywalker::new(relay, fast_config()).expect("valid controller config");
    (skywalker, handle)
}

/// Distance of the noise-free simulated centroids from the image centre
pub fn true_distance_from_center(handle: &SimHandle) -> f64 {
    let (c1, c2) = handle.true_centroids().expect("beam reaches both imagers");
    skywalker::distance((c1, c2), (CENTER, CENTER))
}
