//! Safe policy switching: act with a trusted policy until a candidate's
//! lower-confidence bound on value overtakes it, then keep the candidate.

use cbandit_core::config::EstimatorConfig;
use cbandit_core::types::{Actions, Scalars};
use cbandit_core::BanditResult;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::estimator::{ChernoffHoeffding, EmpiricalBernstein, Estimator, PerformanceEstimator};
use crate::policy::{Observer, Policy};

const DEFAULT_MIN_SAMPLES: u64 = 100;
const DEFAULT_DELTA: f64 = 0.95;

/// Snapshot of both estimators, emitted after every observed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeReport {
    pub safe_lb: f64,
    pub new_lb: f64,
    pub safe_b: f64,
    pub new_b: f64,
    pub safe_bc: f64,
    pub new_bc: f64,
    pub new_n: u64,
    pub using_new: bool,
}

type MetricsHook = Box<dyn Fn(&SafeReport) + Send>;

/// Routes every policy call to `safe` until `new` has seen more than
/// `min_samples` rows and its lower bound exceeds the safe one. The switch is
/// one-way.
pub struct SafePolicy<S, N, E> {
    safe: S,
    new: N,
    safe_estimator: E,
    new_estimator: E,
    stick: bool,
    min_samples: u64,
    delta: f64,
    metrics: Option<MetricsHook>,
}

impl<S, N, E> SafePolicy<S, N, E>
where
    S: Policy,
    N: Policy<Context = S::Context>,
    E: PerformanceEstimator,
{
    pub fn new(safe: S, new: N, safe_estimator: E, new_estimator: E) -> Self {
        Self {
            safe,
            new,
            safe_estimator,
            new_estimator,
            stick: false,
            min_samples: DEFAULT_MIN_SAMPLES,
            delta: DEFAULT_DELTA,
            metrics: None,
        }
    }

    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    /// Registers a callback that receives a [`SafeReport`] after each batch.
    pub fn with_metrics<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SafeReport) + Send + 'static,
    {
        self.metrics = Some(Box::new(hook));
        self
    }

    pub fn using_new(&self) -> bool {
        self.stick
    }

    pub fn safe_policy(&self) -> &S {
        &self.safe
    }

    pub fn new_policy(&self) -> &N {
        &self.new
    }

    pub fn safe_estimator(&self) -> &E {
        &self.safe_estimator
    }

    pub fn new_estimator(&self) -> &E {
        &self.new_estimator
    }

    /// Feeds the batch to both estimators, whichever policy is active, then
    /// latches onto the new policy once it is proven better.
    pub fn update_bounds(
        &mut self,
        x: &S::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.safe_estimator
            .update_bounds(&self.safe, x, actions, log_propensities, rewards)?;
        self.new_estimator
            .update_bounds(&self.new, x, actions, log_propensities, rewards)?;

        if !self.stick && self.new_estimator.n() > self.min_samples {
            let new_lb = self.new_estimator.lower_bound(self.delta);
            let safe_lb = self.safe_estimator.lower_bound(self.delta);
            if new_lb > safe_lb {
                self.stick = true;
                info!(
                    new_lb,
                    safe_lb,
                    samples = self.new_estimator.n(),
                    "switched to new policy"
                );
            }
        }
        Ok(())
    }

    pub fn report(&self) -> SafeReport {
        SafeReport {
            safe_lb: self.safe_estimator.lower_bound(self.delta),
            new_lb: self.new_estimator.lower_bound(self.delta),
            safe_b: self.safe_estimator.b(),
            new_b: self.new_estimator.b(),
            safe_bc: self.safe_estimator.estimate(),
            new_bc: self.new_estimator.estimate(),
            new_n: self.new_estimator.n(),
            using_new: self.stick,
        }
    }
}

impl<S, N> SafePolicy<S, N, ChernoffHoeffding>
where
    S: Policy,
    N: Policy<Context = S::Context>,
{
    pub fn chernoff_hoeffding(
        safe: S,
        new: N,
        decay: f64,
        clip: Option<f64>,
    ) -> BanditResult<Self> {
        Ok(Self::new(
            safe,
            new,
            ChernoffHoeffding::with_clip(decay, clip)?,
            ChernoffHoeffding::with_clip(decay, clip)?,
        ))
    }
}

impl<S, N> SafePolicy<S, N, EmpiricalBernstein>
where
    S: Policy,
    N: Policy<Context = S::Context>,
{
    pub fn empirical_bernstein(
        safe: S,
        new: N,
        decay: f64,
        clip: Option<f64>,
    ) -> BanditResult<Self> {
        Ok(Self::new(
            safe,
            new,
            EmpiricalBernstein::with_clip(decay, clip)?,
            EmpiricalBernstein::with_clip(decay, clip)?,
        ))
    }
}

impl<S, N> SafePolicy<S, N, Estimator>
where
    S: Policy,
    N: Policy<Context = S::Context>,
{
    pub fn from_config(safe: S, new: N, config: &EstimatorConfig) -> BanditResult<Self> {
        Ok(Self::new(
            safe,
            new,
            Estimator::from_config(config)?,
            Estimator::from_config(config)?,
        )
        .with_min_samples(config.min_samples)
        .with_delta(config.delta))
    }
}

impl<S, N, E> Policy for SafePolicy<S, N, E>
where
    S: Policy,
    N: Policy<Context = S::Context>,
    E: PerformanceEstimator,
{
    type Context = S::Context;

    fn draw<R: Rng + ?Sized>(&self, x: &S::Context, rng: &mut R) -> BanditResult<Actions> {
        if self.stick {
            self.new.draw(x, rng)
        } else {
            self.safe.draw(x, rng)
        }
    }

    fn max(&self, x: &S::Context) -> BanditResult<Actions> {
        if self.stick {
            self.new.max(x)
        } else {
            self.safe.max(x)
        }
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &S::Context, rng: &mut R) -> BanditResult<Actions> {
        if self.stick {
            self.new.uniform(x, rng)
        } else {
            self.safe.uniform(x, rng)
        }
    }

    fn nr_actions(&self, x: &S::Context) -> BanditResult<Scalars> {
        if self.stick {
            self.new.nr_actions(x)
        } else {
            self.safe.nr_actions(x)
        }
    }

    fn propensity(&self, x: &S::Context, action: &Actions) -> BanditResult<Scalars> {
        if self.stick {
            self.new.propensity(x, action)
        } else {
            self.safe.propensity(x, action)
        }
    }

    fn log_propensity(&self, x: &S::Context, action: &Actions) -> BanditResult<Scalars> {
        if self.stick {
            self.new.log_propensity(x, action)
        } else {
            self.safe.log_propensity(x, action)
        }
    }
}

impl<S, N, E> Observer<S::Context> for SafePolicy<S, N, E>
where
    S: Policy,
    N: Policy<Context = S::Context>,
    E: PerformanceEstimator,
{
    fn observe(
        &mut self,
        x: &S::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.update_bounds(x, actions, log_propensities, rewards)?;
        if let Some(hook) = &self.metrics {
            hook(&self.report());
        }
        Ok(())
    }
}
