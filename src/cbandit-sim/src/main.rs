//! cbandit-sim — safe policy switching on a synthetic multiclass problem.
//!
//! A uniform-random safe policy logs feedback while a candidate linear policy
//! learns from it; the candidate takes over once its lower-confidence bound
//! on value beats the safe one.

use std::sync::Arc;

use cbandit_core::config::{AppConfig, EstimatorKind};
use cbandit_core::types::{Contexts, Labels};
use cbandit_rl_engine::{
    Bandify, EpsilonGreedy, Explore, LinUcbPolicy, Observer, Policy, SafePolicy, ThompsonPolicy,
};
use clap::{Parser, ValueEnum};
use ndarray::{Array2, Axis};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "cbandit-sim")]
#[command(about = "Safe contextual-bandit policy switching on synthetic data")]
#[command(version)]
struct Cli {
    /// Candidate policy trained from the logged feedback
    #[arg(long, value_enum, default_value_t = Candidate::LinUcb)]
    candidate: Candidate,

    /// Number of bandify steps (overrides config)
    #[arg(long, env = "CBANDIT__SIMULATION__STEPS")]
    steps: Option<usize>,

    /// Rows per step (overrides config)
    #[arg(long, env = "CBANDIT__SIMULATION__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Number of classes, i.e. actions (overrides config)
    #[arg(long, env = "CBANDIT__SIMULATION__ARMS")]
    arms: Option<usize>,

    /// Context dimensionality (overrides config)
    #[arg(long, env = "CBANDIT__SIMULATION__DIMS")]
    dims: Option<usize>,

    /// Random seed (overrides config)
    #[arg(long, env = "CBANDIT__SIMULATION__SEED")]
    seed: Option<u64>,

    /// Use the empirical-Bernstein estimator instead of the configured one
    #[arg(long, default_value_t = false)]
    bernstein: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Candidate {
    LinUcb,
    Thompson,
}

/// Linear ground truth: the label of a context is its highest-scoring class.
struct Problem {
    weights: Array2<f64>,
}

impl Problem {
    fn new(arms: usize, dims: usize, rng: &mut StdRng) -> Self {
        let weights = Array2::from_shape_fn((arms, dims), |_| rng.sample::<f64, _>(StandardNormal));
        Self { weights }
    }

    fn sample(&self, rows: usize, rng: &mut StdRng) -> (Contexts, Labels) {
        let x = Array2::from_shape_fn((rows, self.weights.ncols()), |_| {
            rng.sample::<f64, _>(StandardNormal)
        });
        let labels = x
            .dot(&self.weights.t())
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 {
                            (i, v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect();
        (x, labels)
    }
}

fn run<N>(learner: N, config: &AppConfig, rng: &mut StdRng) -> anyhow::Result<()>
where
    N: Policy<Context = Contexts> + Observer<Contexts> + Send + 'static,
{
    let sim = &config.simulation;
    let problem = Problem::new(sim.arms, sim.dims, rng);

    let learner = Arc::new(Mutex::new(learner));
    let safe = Explore::new(LinUcbPolicy::from_config(sim.arms, sim.dims, &config.ridge));
    let candidate = EpsilonGreedy::new(learner.clone(), config.exploration.epsilon)?;
    let policy = SafePolicy::from_config(safe, candidate, &config.estimator)?.with_metrics(
        |report| match serde_json::to_string(report) {
            Ok(json) => debug!(report = %json, "estimator report"),
            Err(e) => debug!(error = %e, "failed to encode estimator report"),
        },
    );

    let mut bandify = Bandify::new(policy);
    bandify.update_policy(learner.clone());
    bandify.update_policy(bandify.policy());

    let mut total_reward = 0.0;
    let mut switched_at = None;
    for step in 0..sim.steps {
        let (x, labels) = problem.sample(sim.batch_size, rng);
        let feedback = bandify.step(&x, &labels, rng)?;
        total_reward += feedback.rewards.sum();

        if switched_at.is_none() && bandify.policy().lock().using_new() {
            switched_at = Some(step);
            info!(step, "candidate policy took over");
        }
    }

    let (x, labels) = problem.sample(1_000, rng);
    let greedy = Policy::max(&learner, &x)?;
    let accuracy = greedy
        .iter()
        .zip(labels.iter())
        .filter(|(a, l)| a == l)
        .count() as f64
        / labels.len() as f64;

    let report = bandify.policy().lock().report();
    let rows = (sim.steps * sim.batch_size).max(1) as f64;
    info!(
        steps = sim.steps,
        mean_reward = total_reward / rows,
        held_out_accuracy = accuracy,
        switched_at = ?switched_at,
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cbandit_sim=info,cbandit_rl_engine=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(steps) = cli.steps {
        config.simulation.steps = steps;
    }
    if let Some(batch_size) = cli.batch_size {
        config.simulation.batch_size = batch_size;
    }
    if let Some(arms) = cli.arms {
        config.simulation.arms = arms;
    }
    if let Some(dims) = cli.dims {
        config.simulation.dims = dims;
    }
    if let Some(seed) = cli.seed {
        config.simulation.seed = seed;
    }
    if cli.bernstein {
        config.estimator.kind = EstimatorKind::EmpiricalBernstein;
    }

    info!(
        candidate = ?cli.candidate,
        arms = config.simulation.arms,
        dims = config.simulation.dims,
        batch_size = config.simulation.batch_size,
        steps = config.simulation.steps,
        estimator = ?config.estimator.kind,
        "Configuration loaded"
    );

    let mut rng = StdRng::seed_from_u64(config.simulation.seed);
    let (arms, dims) = (config.simulation.arms, config.simulation.dims);
    match cli.candidate {
        Candidate::LinUcb => {
            let learner = LinUcbPolicy::from_config(arms, dims, &config.ridge);
            run(learner, &config, &mut rng)
        }
        Candidate::Thompson => {
            let learner = ThompsonPolicy::from_config(arms, dims, &config.ridge);
            run(learner, &config, &mut rng)
        }
    }
}
