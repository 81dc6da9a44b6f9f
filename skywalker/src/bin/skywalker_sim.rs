//! Two-mirror alignment against the simulated relay.
//!
//! Builds the simulated fixture, optionally surveys a grid of mirror pitches
//! to seed the model history (optionally registering a model fitted from it
//! under a name that `--load-model` can request), then runs one walk in the
//! requested mode.
//! Exits non-zero if the walk fails or ends outside tolerance.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use beamline::{SimRelay, SimRelayConfig};
use clap::Parser;
use skywalker::{
    AlignmentRequest, LinearModelBuilder, ModelRegistry, Skywalker, SkywalkerConfig, SolveMode,
    WalkMode,
};
use tracing::info;

/// Simulated two-mirror beam alignment
#[derive(Parser, Debug)]
#[command(name = "skywalker_sim")]
#[command(about = "Align a simulated two-mirror relay onto target pixels")]
#[command(version)]
struct Args {
    /// Alignment mode: iter, model, build or auto
    #[arg(short, long, default_value = "iter")]
    mode: String,

    /// Target centroid on imager 1 (pixels, default image centre)
    #[arg(long)]
    p1: Option<f64>,

    /// Target centroid on imager 2 (pixels, default image centre)
    #[arg(long)]
    p2: Option<f64>,

    /// Iteration budget for iterative walks
    #[arg(short = 'n', long)]
    max_n: Option<usize>,

    /// Convergence tolerance (pixels)
    #[arg(short, long)]
    tolerance: Option<f64>,

    /// Mirror pitch solve: closed_form or nonlinear
    #[arg(long)]
    solve: Option<String>,

    /// JSON controller configuration; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective controller configuration to this file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Starting pitch of mirror 1 (rad)
    #[arg(long, default_value = "0.00141")]
    alpha1: f64,

    /// Starting pitch of mirror 2 (rad)
    #[arg(long, default_value = "0.00139")]
    alpha2: f64,

    /// Uniform readback noise on mirror pitch (rad)
    #[arg(long, default_value = "0")]
    noise_alpha: f64,

    /// Uniform noise on imager centroids (pixels)
    #[arg(long, default_value = "0")]
    noise_centroid: f64,

    /// Seed for simulated noise
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Survey a 3x3 grid with this pitch spacing (rad) before walking
    #[arg(long)]
    survey_step: Option<f64>,

    /// Fit the surveyed history and register it under this name
    #[arg(long, requires = "survey_step")]
    register_model: Option<String>,

    /// Load a registered model by name for model or auto mode
    #[arg(long)]
    load_model: Option<String>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

fn controller_config(args: &Args) -> Result<SkywalkerConfig> {
    let mut config = match &args.config {
        Some(path) => SkywalkerConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SkywalkerConfig::default(),
    };
    if let Some(tolerance) = args.tolerance {
        config.tolerance_px = tolerance;
    }
    if let Some(solve) = &args.solve {
        config.walker.solve_mode = solve.parse::<SolveMode>()?;
    }
    config.validate()?;
    Ok(config)
}

fn sim_config(args: &Args) -> SimRelayConfig {
    let mut sim = SimRelayConfig::default().with_alphas(args.alpha1, args.alpha2);
    sim.mirror_1.noise_alpha = args.noise_alpha;
    sim.mirror_2.noise_alpha = args.noise_alpha;
    sim.imager_1.noise_centroid_px = args.noise_centroid;
    sim.imager_2.noise_centroid_px = args.noise_centroid;
    sim.seed = args.seed;
    sim
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Mode and config problems are reported before the fixture is touched
    let mode: WalkMode = args.mode.parse()?;
    let config = controller_config(&args)?;
    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("saving {}", path.display()))?;
    }

    let sim = sim_config(&args);
    let center_1 = sim.imager_1.calibration.center_pixel()[0];
    let center_2 = sim.imager_2.calibration.center_pixel()[0];
    let (relay, handle) = SimRelay::build(sim)?;

    let mut request = AlignmentRequest::new(
        args.p1.unwrap_or(center_1),
        args.p2.unwrap_or(center_2),
        mode,
    );
    if let Some(max_n) = args.max_n {
        request = request.with_max_n(max_n);
    }
    if let Some(name) = &args.load_model {
        request = request.with_load_model(name.as_str());
    }
    request.validate()?;

    let min_build_samples = config.min_build_samples;
    let mut skywalker = Skywalker::new(relay, config)?;
    if let Some(step) = args.survey_step {
        let center = skywalker.relay_mut().alphas()?;
        skywalker.survey(center, step)?;
    }
    if let Some(name) = &args.register_model {
        let model = LinearModelBuilder::new(min_build_samples)
            .with_name(name.as_str())
            .fit(skywalker.history())
            .with_context(|| format!("fitting model '{name}' from the survey"))?;
        let mut library = ModelRegistry::new();
        library.insert(model);
        skywalker.set_library(Box::new(library));
        info!(model = %name, "registered surveyed model");
    }

    let outcome = skywalker.walk(&request)?;
    info!(true_alphas = ?handle.true_alphas(), "final mirror state");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "mode={} iterations={} alpha1={:.9} alpha2={:.9} centroids=({:.3}, {:.3}) distance={:.3}px",
            outcome.mode,
            outcome.iterations,
            outcome.alphas.0,
            outcome.alphas.1,
            outcome.state.centroids.0,
            outcome.state.centroids.1,
            outcome.state.distance,
        );
    }

    if !outcome.converged {
        bail!(
            "{} walk ended {:.3} px from target (tolerance {} px)",
            outcome.mode,
            outcome.state.distance,
            skywalker.config().tolerance_px
        );
    }
    Ok(())
}
