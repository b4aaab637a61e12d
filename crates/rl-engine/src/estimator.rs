//! Sequential off-policy value estimators with high-confidence lower bounds.
//!
//! Both estimators consume feedback logged under some behaviour policy and
//! reweight each reward by `π(a|x) / p_log(a|x)` to estimate the value of the
//! policy under evaluation. Weights are formed in log space.

use cbandit_core::config::{EstimatorConfig, EstimatorKind};
use cbandit_core::types::{Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};

use crate::policy::Policy;

pub trait PerformanceEstimator {
    /// Folds a feedback batch, logged with `log_propensities`, into the
    /// running statistics of `policy`.
    fn update_bounds<P: Policy>(
        &mut self,
        policy: &P,
        x: &P::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()>;

    /// Value the policy exceeds with confidence `delta`.
    fn lower_bound(&self, delta: f64) -> f64;

    /// Bias-corrected moving estimate of the policy's value.
    fn estimate(&self) -> f64;

    /// Number of rows observed so far.
    fn n(&self) -> u64;

    /// Largest importance-weighted reward seen so far, at least 1.
    fn b(&self) -> f64;
}

/// Exponential moving mean shared by both estimators.
#[derive(Debug, Clone)]
struct MovingMean {
    decay: f64,
    mean: f64,
    b: f64,
    n: u64,
}

impl MovingMean {
    fn new(decay: f64) -> BanditResult<Self> {
        if !(0.0..1.0).contains(&decay) {
            return Err(BanditError::Usage(format!(
                "decay must lie in [0, 1), got {decay}"
            )));
        }
        Ok(Self {
            decay,
            mean: 0.0,
            b: 1.0,
            n: 0,
        })
    }

    fn bias_corrected(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.mean / (1.0 - self.decay.powf(self.n as f64))
    }

    fn track_max(&mut self, values: &Scalars) {
        self.b = values.iter().fold(self.b, |b, &v| b.max(v));
    }
}

/// `exp(log π(a|x) − log_p)` times the reward, with the log-weight capped
/// at `clip` when set.
fn weighted_rewards<P: Policy>(
    policy: &P,
    x: &P::Context,
    actions: &Actions,
    log_propensities: &Scalars,
    rewards: &Scalars,
    clip: Option<f64>,
) -> BanditResult<Scalars> {
    BanditError::check_dims(actions.len(), log_propensities.len())?;
    BanditError::check_dims(actions.len(), rewards.len())?;
    let log_pi = policy.log_propensity(x, actions)?;
    BanditError::check_dims(actions.len(), log_pi.len())?;

    let mut log_w = log_pi - log_propensities;
    if let Some(clip) = clip {
        log_w.mapv_inplace(|w| w.min(clip));
    }
    Ok(log_w.mapv(f64::exp) * rewards)
}

/// Chernoff-Hoeffding bound on an exponential moving IPS estimate.
#[derive(Debug, Clone)]
pub struct ChernoffHoeffding {
    stats: MovingMean,
    clip: Option<f64>,
}

impl ChernoffHoeffding {
    pub fn new(decay: f64) -> BanditResult<Self> {
        Ok(Self {
            stats: MovingMean::new(decay)?,
            clip: None,
        })
    }

    /// Caps the log-importance-weight at `clip`.
    pub fn with_clip(decay: f64, clip: Option<f64>) -> BanditResult<Self> {
        Ok(Self {
            stats: MovingMean::new(decay)?,
            clip,
        })
    }
}

impl PerformanceEstimator for ChernoffHoeffding {
    fn update_bounds<P: Policy>(
        &mut self,
        policy: &P,
        x: &P::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        let values = weighted_rewards(policy, x, actions, log_propensities, rewards, self.clip)?;
        self.stats.track_max(&values);

        // Closed form of m sequential smoothing steps: row i is weighted by
        // decay^(m-1-i) and the previous mean by decay^m.
        let decay = self.stats.decay;
        let m = values.len();
        let folded = values
            .iter()
            .enumerate()
            .map(|(i, v)| decay.powi((m - 1 - i) as i32) * v)
            .sum::<f64>();
        self.stats.mean = decay.powi(m as i32) * self.stats.mean + (1.0 - decay) * folded;
        self.stats.n += m as u64;
        Ok(())
    }

    fn lower_bound(&self, delta: f64) -> f64 {
        if self.stats.n == 0 {
            return f64::NEG_INFINITY;
        }
        let n2 = (2 * self.stats.n).max(1) as f64;
        let spread = self.stats.b * ((1.0 / delta).ln() / n2).sqrt();
        if spread.is_nan() {
            return f64::NEG_INFINITY;
        }
        self.stats.bias_corrected() - spread
    }

    fn estimate(&self) -> f64 {
        self.stats.bias_corrected()
    }

    fn n(&self) -> u64 {
        self.stats.n
    }

    fn b(&self) -> f64 {
        self.stats.b
    }
}

/// Maurer & Pontil empirical-Bernstein bound, which also tracks an
/// exponential moving variance of the weighted rewards.
///
/// [`PerformanceEstimator::lower_bound`] needs at least two observations and
/// returns `-inf` before that.
#[derive(Debug, Clone)]
pub struct EmpiricalBernstein {
    stats: MovingMean,
    variance: f64,
    clip: Option<f64>,
}

impl EmpiricalBernstein {
    pub fn new(decay: f64) -> BanditResult<Self> {
        Self::with_clip(decay, None)
    }

    /// Caps the log-importance-weight at `clip`.
    pub fn with_clip(decay: f64, clip: Option<f64>) -> BanditResult<Self> {
        Ok(Self {
            stats: MovingMean::new(decay)?,
            variance: 0.0,
            clip,
        })
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl PerformanceEstimator for EmpiricalBernstein {
    fn update_bounds<P: Policy>(
        &mut self,
        policy: &P,
        x: &P::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        let values = weighted_rewards(policy, x, actions, log_propensities, rewards, self.clip)?;
        self.stats.track_max(&values);

        let decay = self.stats.decay;
        for &v in values.iter() {
            let diff = v - self.stats.mean;
            self.stats.mean = decay * self.stats.mean + (1.0 - decay) * v;
            self.variance = decay * (self.variance + (1.0 - decay) * diff * diff);
            self.stats.n += 1;
        }
        Ok(())
    }

    fn lower_bound(&self, delta: f64) -> f64 {
        if self.stats.n <= 1 {
            return f64::NEG_INFINITY;
        }
        let n = self.stats.n as f64;
        let log_term = (2.0 / delta).ln();
        let range = 7.0 * self.stats.b * log_term / (3.0 * (n - 1.0));
        let deviation = (log_term / (n - 1.0) * self.variance).sqrt() / n;
        self.stats.bias_corrected() - range - deviation
    }

    fn estimate(&self) -> f64 {
        self.stats.bias_corrected()
    }

    fn n(&self) -> u64 {
        self.stats.n
    }

    fn b(&self) -> f64 {
        self.stats.b
    }
}

/// Either estimator, chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum Estimator {
    ChernoffHoeffding(ChernoffHoeffding),
    EmpiricalBernstein(EmpiricalBernstein),
}

impl Estimator {
    pub fn from_config(config: &EstimatorConfig) -> BanditResult<Self> {
        Ok(match config.kind {
            EstimatorKind::ChernoffHoeffding => Estimator::ChernoffHoeffding(
                ChernoffHoeffding::with_clip(config.decay, config.clip)?,
            ),
            EstimatorKind::EmpiricalBernstein => Estimator::EmpiricalBernstein(
                EmpiricalBernstein::with_clip(config.decay, config.clip)?,
            ),
        })
    }
}

impl PerformanceEstimator for Estimator {
    fn update_bounds<P: Policy>(
        &mut self,
        policy: &P,
        x: &P::Context,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        match self {
            Estimator::ChernoffHoeffding(e) => {
                e.update_bounds(policy, x, actions, log_propensities, rewards)
            }
            Estimator::EmpiricalBernstein(e) => {
                e.update_bounds(policy, x, actions, log_propensities, rewards)
            }
        }
    }

    fn lower_bound(&self, delta: f64) -> f64 {
        match self {
            Estimator::ChernoffHoeffding(e) => e.lower_bound(delta),
            Estimator::EmpiricalBernstein(e) => e.lower_bound(delta),
        }
    }

    fn estimate(&self) -> f64 {
        match self {
            Estimator::ChernoffHoeffding(e) => e.estimate(),
            Estimator::EmpiricalBernstein(e) => e.estimate(),
        }
    }

    fn n(&self) -> u64 {
        match self {
            Estimator::ChernoffHoeffding(e) => e.n(),
            Estimator::EmpiricalBernstein(e) => e.n(),
        }
    }

    fn b(&self) -> f64 {
        match self {
            Estimator::ChernoffHoeffding(e) => e.b(),
            Estimator::EmpiricalBernstein(e) => e.b(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::SoftmaxPolicy;
    use crate::predictor::LinearPredictor;
    use cbandit_core::types::Contexts;
    use ndarray::{array, Array1, Array2};

    /// Two actions, uniform regardless of the context.
    fn coin() -> SoftmaxPolicy<LinearPredictor> {
        SoftmaxPolicy::new(LinearPredictor::new(Array2::zeros((2, 1))))
    }

    fn batch(rewards: Array1<f64>) -> (Contexts, Actions, Scalars, Scalars) {
        let n = rewards.len();
        (
            Array2::ones((n, 1)),
            Array1::zeros(n),
            Array1::from_elem(n, 0.5f64.ln()),
            rewards,
        )
    }

    #[test]
    fn test_ch_matches_sequential_smoothing() {
        let policy = coin();
        let mut estimator = ChernoffHoeffding::new(0.5).unwrap();
        let (x, a, lp, r) = batch(array![1.0, 0.0, 1.0, 1.0]);
        estimator.update_bounds(&policy, &x, &a, &lp, &r).unwrap();

        let mut mean = 0.0;
        for v in [1.0, 0.0, 1.0, 1.0] {
            mean = 0.5 * mean + 0.5 * v;
        }
        let expected = mean / (1.0 - 0.5f64.powi(4));
        assert_eq!(estimator.n(), 4);
        assert!((estimator.estimate() - expected).abs() < 1e-12);

        let mut split = ChernoffHoeffding::new(0.5).unwrap();
        let (x, a, lp, r) = batch(array![1.0, 0.0]);
        split.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
        let (x, a, lp, r) = batch(array![1.0, 1.0]);
        split.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
        assert!((split.estimate() - expected).abs() < 1e-12);

        let bound = expected - ((1.0f64 / 0.95).ln() / 8.0).sqrt();
        assert!((estimator.lower_bound(0.95) - bound).abs() < 1e-12);
    }

    #[test]
    fn test_ch_without_data_is_unbounded_below() {
        let estimator = ChernoffHoeffding::new(0.99).unwrap();
        assert_eq!(estimator.lower_bound(0.95), f64::NEG_INFINITY);
        assert_eq!(estimator.b(), 1.0);
        assert_eq!(estimator.estimate(), 0.0);
    }

    #[test]
    fn test_ch_b_is_non_decreasing() {
        let policy = coin();
        let mut estimator = ChernoffHoeffding::new(0.9).unwrap();
        let mut previous = estimator.b();
        for (step, scale) in [3.0f64, 0.5, 4.0, 1.0, 0.0].iter().enumerate() {
            let (x, a, _, r) = batch(array![1.0, 0.0, 1.0]);
            // Logging probabilities shrink so weights grow, then shrink again.
            let lp = Array1::from_elem(3, (0.5 / scale.max(0.1)).ln());
            estimator.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
            assert!(estimator.b() >= previous, "step {step}");
            previous = estimator.b();
        }
        assert!((estimator.b() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_ch_clip_caps_importance_weight() {
        let policy = coin();
        let mut estimator = ChernoffHoeffding::with_clip(0.9, Some(2f64.ln())).unwrap();
        let (x, a, _, r) = batch(array![1.0]);
        estimator
            .update_bounds(&policy, &x, &a, &array![0.01f64.ln()], &r)
            .unwrap();
        assert!((estimator.b() - 2.0).abs() < 1e-12);
        assert!((estimator.estimate() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ch_rejects_mismatched_batch() {
        let policy = coin();
        let mut estimator = ChernoffHoeffding::new(0.9).unwrap();
        let (x, a, lp, _) = batch(array![1.0, 0.0]);
        assert!(estimator
            .update_bounds(&policy, &x, &a, &lp, &array![1.0])
            .is_err());
        assert!(ChernoffHoeffding::new(1.0).is_err());
    }

    #[test]
    fn test_mpeb_variance_recursion() {
        let policy = coin();
        let mut estimator = EmpiricalBernstein::new(0.5).unwrap();
        let (x, a, lp, r) = batch(array![1.0, 0.0]);
        estimator.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
        assert!((estimator.variance() - 0.1875).abs() < 1e-12);
        assert!((estimator.estimate() - 0.25 / 0.75).abs() < 1e-12);

        let log_term = (2.0f64 / 0.95).ln();
        let expected = 0.25 / 0.75 - 7.0 * log_term / 3.0 - (log_term * 0.1875).sqrt() / 2.0;
        assert!((estimator.lower_bound(0.95) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_mpeb_bound_tightens_on_constant_rewards() {
        let policy = coin();
        let mut estimator = EmpiricalBernstein::new(0.99).unwrap();
        assert_eq!(estimator.lower_bound(0.95), f64::NEG_INFINITY);

        let mut previous = f64::NEG_INFINITY;
        for _ in 0..10 {
            let (x, a, lp, r) = batch(Array1::from_elem(50, 0.5));
            estimator.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
            assert!((estimator.estimate() - 0.5).abs() < 1e-9);
            let bound = estimator.lower_bound(0.95);
            assert!(bound > previous && bound < 0.5);
            previous = bound;
        }
        assert_eq!(estimator.n(), 500);
    }

    #[test]
    fn test_estimator_from_config() {
        let mut config = EstimatorConfig::default();
        assert!(matches!(
            Estimator::from_config(&config).unwrap(),
            Estimator::ChernoffHoeffding(_)
        ));
        config.kind = EstimatorKind::EmpiricalBernstein;
        let estimator = Estimator::from_config(&config).unwrap();
        assert!(matches!(estimator, Estimator::EmpiricalBernstein(_)));
        assert_eq!(estimator.n(), 0);
    }

    #[test]
    fn test_clip_from_config_reaches_both_estimators() {
        let policy = coin();
        let (x, a, _, r) = batch(array![1.0]);
        let lp = array![0.01f64.ln()];
        let mut config = EstimatorConfig {
            clip: Some(2f64.ln()),
            ..EstimatorConfig::default()
        };
        for kind in [EstimatorKind::ChernoffHoeffding, EstimatorKind::EmpiricalBernstein] {
            config.kind = kind;
            let mut estimator = Estimator::from_config(&config).unwrap();
            estimator.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
            assert!((estimator.b() - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mpeb_clip_caps_importance_weight() {
        let policy = coin();
        let (x, a, _, r) = batch(array![1.0]);
        let lp = array![0.01f64.ln()];

        let mut clipped = EmpiricalBernstein::with_clip(0.9, Some(2f64.ln())).unwrap();
        clipped.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
        assert!((clipped.b() - 2.0).abs() < 1e-12);
        assert!((clipped.estimate() - 2.0).abs() < 1e-12);

        let mut raw = EmpiricalBernstein::new(0.9).unwrap();
        raw.update_bounds(&policy, &x, &a, &lp, &r).unwrap();
        assert!((raw.b() - 50.0).abs() < 1e-9);
    }
}
