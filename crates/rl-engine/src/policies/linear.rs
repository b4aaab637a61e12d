//! Finite-arm linear policies backed by one ridge regression per arm.

use std::collections::BTreeMap;
use std::f64::consts::SQRT_2;

use cbandit_core::config::RidgeConfig;
use cbandit_core::types::{Actions, Contexts, Scalars};
use cbandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use tracing::debug;

use crate::policy::{argmax_rows, select_per_row, uniform_actions, Observer, Policy};
use crate::ridge::RidgeRegression;

/// Per-arm regressors shared by the linear UCB and Thompson policies.
#[derive(Debug)]
pub struct LinearArms {
    k: usize,
    d: usize,
    regressors: Vec<RidgeRegression>,
}

impl LinearArms {
    pub fn new(k: usize, d: usize, alpha: f64, regularization: f64) -> Self {
        Self {
            k,
            d,
            regressors: (0..k)
                .map(|_| RidgeRegression::new(d, alpha, regularization))
                .collect(),
        }
    }

    pub fn from_config(k: usize, d: usize, config: &RidgeConfig) -> Self {
        let regressors = (0..k)
            .map(|_| match config.window {
                Some(window) => {
                    RidgeRegression::with_window(d, config.alpha, config.regularization, window)
                }
                None => RidgeRegression::new(d, config.alpha, config.regularization),
            })
            .collect();
        Self { k, d, regressors }
    }

    pub fn nr_arms(&self) -> usize {
        self.k
    }

    pub fn dims(&self) -> usize {
        self.d
    }

    pub fn regressor(&self, arm: usize) -> Option<&RidgeRegression> {
        self.regressors.get(arm)
    }

    /// Routes every row to the regressor of the arm that was played.
    pub fn update(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        BanditError::check_dims(x.nrows(), actions.len())?;
        BanditError::check_dims(x.nrows(), rewards.len())?;

        let mut rows_per_arm: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &arm) in actions.iter().enumerate() {
            if arm >= self.k {
                return Err(BanditError::ActionOutOfRange {
                    action: arm,
                    nr_actions: self.k,
                });
            }
            rows_per_arm.entry(arm).or_default().push(row);
        }

        for (arm, rows) in rows_per_arm {
            let arm_x = x.select(Axis(0), &rows);
            let arm_r = rewards.select(Axis(0), &rows);
            self.regressors[arm].update(arm_x.view(), arm_r.view())?;
            debug!(arm, rows = rows.len(), "arm regressor updated");
        }
        Ok(())
    }

    /// Per-arm point predictions, shape `(batch, k)`.
    fn predictions(&self, x: &Contexts) -> BanditResult<Array2<f64>> {
        self.scores(x, |ridge| ridge.predict(x.view()))
    }

    fn scores<F>(&self, x: &Contexts, mut score: F) -> BanditResult<Array2<f64>>
    where
        F: FnMut(&RidgeRegression) -> BanditResult<Array1<f64>>,
    {
        BanditError::check_dims(self.d, x.ncols())?;
        let mut out = Array2::zeros((x.nrows(), self.k));
        for (arm, ridge) in self.regressors.iter().enumerate() {
            out.column_mut(arm).assign(&score(ridge)?);
        }
        Ok(out)
    }

    fn max(&self, x: &Contexts) -> BanditResult<Actions> {
        Ok(argmax_rows(&self.predictions(x)?))
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> Actions {
        uniform_actions(x.nrows(), self.k, rng)
    }

    fn nr_actions(&self, x: &Contexts) -> Scalars {
        Array1::from_elem(x.nrows(), self.k as f64)
    }
}

/// Linear policy that plays the arm with the highest upper confidence bound.
///
/// UCB is deterministic given the regressor state, so its propensity is 1
/// for the selected arm and 0 for every other arm.
#[derive(Debug)]
pub struct LinUcbPolicy {
    arms: LinearArms,
}

impl LinUcbPolicy {
    pub fn new(k: usize, d: usize, alpha: f64, regularization: f64) -> Self {
        Self {
            arms: LinearArms::new(k, d, alpha, regularization),
        }
    }

    pub fn from_config(k: usize, d: usize, config: &RidgeConfig) -> Self {
        Self {
            arms: LinearArms::from_config(k, d, config),
        }
    }

    pub fn arms(&self) -> &LinearArms {
        &self.arms
    }

    pub fn update(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.arms.update(x, actions, rewards)
    }

    fn select(&self, x: &Contexts) -> BanditResult<Actions> {
        let ucbs = self.arms.scores(x, |ridge| ridge.ucb(x.view()))?;
        Ok(argmax_rows(&ucbs))
    }
}

impl Policy for LinUcbPolicy {
    type Context = Contexts;

    fn draw<R: Rng + ?Sized>(&self, x: &Contexts, _rng: &mut R) -> BanditResult<Actions> {
        self.select(x)
    }

    fn max(&self, x: &Contexts) -> BanditResult<Actions> {
        self.arms.max(x)
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> BanditResult<Actions> {
        Ok(self.arms.uniform(x, rng))
    }

    fn nr_actions(&self, x: &Contexts) -> BanditResult<Scalars> {
        Ok(self.arms.nr_actions(x))
    }

    fn propensity(&self, x: &Contexts, action: &Actions) -> BanditResult<Scalars> {
        BanditError::check_dims(x.nrows(), action.len())?;
        let selected = self.select(x)?;
        Ok(selected
            .iter()
            .zip(action.iter())
            .map(|(s, a)| if s == a { 1.0 } else { 0.0 })
            .collect())
    }
}

impl Observer<Contexts> for LinUcbPolicy {
    fn observe(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        _log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.update(x, actions, rewards)
    }
}

/// Linear policy that plays the arm with the highest Thompson sample.
#[derive(Debug)]
pub struct ThompsonPolicy {
    arms: LinearArms,
}

impl ThompsonPolicy {
    pub fn new(k: usize, d: usize, alpha: f64, regularization: f64) -> Self {
        Self {
            arms: LinearArms::new(k, d, alpha, regularization),
        }
    }

    pub fn from_config(k: usize, d: usize, config: &RidgeConfig) -> Self {
        Self {
            arms: LinearArms::from_config(k, d, config),
        }
    }

    pub fn arms(&self) -> &LinearArms {
        &self.arms
    }

    pub fn update(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.arms.update(x, actions, rewards)
    }

    /// Closed-form probability that each arm's sample is the largest,
    /// shape `(batch, k)`.
    ///
    /// For every ordered pair `(i, j)`, `i ≠ j`, the chance that arm `i` beats
    /// arm `j` is `½ (1 + erf((mᵢ − mⱼ) / (√2 (sᵢ + sⱼ))))`; the
    /// per-arm probability is the product over all opponents. The pairwise
    /// events are not independent, so each row is renormalized to sum to one.
    /// A row whose products all underflow to zero (many near-tied arms) is
    /// left at zero, and its log-propensities are `-inf`.
    pub fn argmax_probabilities(&self, x: &Contexts) -> BanditResult<Array2<f64>> {
        let k = self.arms.nr_arms();
        let mut means = Array2::zeros((x.nrows(), k));
        let mut stds = Array2::zeros((x.nrows(), k));
        for arm in 0..k {
            let (m, s) = self.arms.regressors[arm].thompson_distribution(x.view())?;
            means.column_mut(arm).assign(&m);
            stds.column_mut(arm).assign(&s);
        }

        let mut probabilities = Array2::ones((x.nrows(), k));
        for row in 0..x.nrows() {
            for i in 0..k {
                for j in (0..k).filter(|&j| j != i) {
                    let diff = means[[row, i]] - means[[row, j]];
                    let spread = stds[[row, i]] + stds[[row, j]];
                    probabilities[[row, i]] *= pairwise_win(diff, spread);
                }
            }
            let mut row = probabilities.row_mut(row);
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        Ok(probabilities)
    }
}

/// `P(Zᵢ > Zⱼ)` for a mean difference `diff` and summed deviation `spread`.
fn pairwise_win(diff: f64, spread: f64) -> f64 {
    if spread > 0.0 {
        0.5 * (1.0 + libm::erf(diff / (SQRT_2 * spread)))
    } else if diff > 0.0 {
        1.0
    } else if diff < 0.0 {
        0.0
    } else {
        0.5
    }
}

impl Policy for ThompsonPolicy {
    type Context = Contexts;

    fn draw<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> BanditResult<Actions> {
        let samples = self.arms.scores(x, |ridge| ridge.thompson(x.view(), &mut *rng))?;
        Ok(argmax_rows(&samples))
    }

    fn max(&self, x: &Contexts) -> BanditResult<Actions> {
        self.arms.max(x)
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> BanditResult<Actions> {
        Ok(self.arms.uniform(x, rng))
    }

    fn nr_actions(&self, x: &Contexts) -> BanditResult<Scalars> {
        Ok(self.arms.nr_actions(x))
    }

    fn propensity(&self, x: &Contexts, action: &Actions) -> BanditResult<Scalars> {
        select_per_row(&self.argmax_probabilities(x)?, action)
    }
}

impl Observer<Contexts> for ThompsonPolicy {
    fn observe(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        _log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.update(x, actions, rewards)
    }
}
