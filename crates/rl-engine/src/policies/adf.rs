//! Action-dependent-features (ADF) policy: every candidate action is a
//! feature vector and a single shared regressor scores all of them.

use cbandit_core::config::RidgeConfig;
use cbandit_core::types::{ActionFeatures, Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};
use ndarray::{s, Array1, Array2};
use rand::Rng;

use crate::policy::{argmax_rows, uniform_actions, Observer, Policy};
use crate::ridge::RidgeRegression;

/// UCB over a `(batch, actions_per_row, d)` batch of action features.
///
/// Like per-arm UCB the choice is deterministic, so propensities are 0 or 1.
#[derive(Debug)]
pub struct AdfUcbPolicy {
    regressor: RidgeRegression,
}

impl AdfUcbPolicy {
    pub fn new(d: usize, alpha: f64, regularization: f64) -> Self {
        Self {
            regressor: RidgeRegression::new(d, alpha, regularization),
        }
    }

    pub fn from_config(d: usize, config: &RidgeConfig) -> Self {
        let regressor = match config.window {
            Some(window) => {
                RidgeRegression::with_window(d, config.alpha, config.regularization, window)
            }
            None => RidgeRegression::new(d, config.alpha, config.regularization),
        };
        Self { regressor }
    }

    pub fn regressor(&self) -> &RidgeRegression {
        &self.regressor
    }

    /// Updates the shared regressor with the feature vector of each played action.
    pub fn update(
        &mut self,
        x: &ActionFeatures,
        actions: &Actions,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        let (batch, nr_actions, d) = x.dim();
        BanditError::check_dims(batch, actions.len())?;
        BanditError::check_dims(self.regressor.dims(), d)?;

        let mut played = Array2::zeros((batch, d));
        for (row, &action) in actions.iter().enumerate() {
            if action >= nr_actions {
                return Err(BanditError::ActionOutOfRange { action, nr_actions });
            }
            played.row_mut(row).assign(&x.slice(s![row, action, ..]));
        }
        self.regressor.update(played.view(), rewards.view())
    }

    fn select(&self, x: &ActionFeatures) -> BanditResult<Actions> {
        let ucbs = self.scores(x, |ridge, flat| ridge.ucb(flat.view()))?;
        Ok(argmax_rows(&ucbs))
    }

    /// Scores every candidate with `score` on the flattened batch and folds
    /// the result back to `(batch, actions_per_row)`.
    fn scores<F>(&self, x: &ActionFeatures, score: F) -> BanditResult<Array2<f64>>
    where
        F: FnOnce(&RidgeRegression, &Array2<f64>) -> BanditResult<Array1<f64>>,
    {
        let (batch, nr_actions, d) = x.dim();
        BanditError::check_dims(self.regressor.dims(), d)?;
        let flat = Array2::from_shape_vec((batch * nr_actions, d), x.iter().copied().collect())
            .map_err(anyhow::Error::from)?;
        let out = score(&self.regressor, &flat)?;
        let folded = Array2::from_shape_vec((batch, nr_actions), out.to_vec())
            .map_err(anyhow::Error::from)?;
        Ok(folded)
    }
}

impl Policy for AdfUcbPolicy {
    type Context = ActionFeatures;

    fn draw<R: Rng + ?Sized>(&self, x: &ActionFeatures, _rng: &mut R) -> BanditResult<Actions> {
        self.select(x)
    }

    fn max(&self, x: &ActionFeatures) -> BanditResult<Actions> {
        let predictions = self.scores(x, |ridge, flat| ridge.predict(flat.view()))?;
        Ok(argmax_rows(&predictions))
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &ActionFeatures, rng: &mut R) -> BanditResult<Actions> {
        let (batch, nr_actions, _) = x.dim();
        Ok(uniform_actions(batch, nr_actions, rng))
    }

    fn nr_actions(&self, x: &ActionFeatures) -> BanditResult<Scalars> {
        let (batch, nr_actions, _) = x.dim();
        Ok(Array1::from_elem(batch, nr_actions as f64))
    }

    fn propensity(&self, x: &ActionFeatures, action: &Actions) -> BanditResult<Scalars> {
        BanditError::check_dims(x.dim().0, action.len())?;
        let selected = self.select(x)?;
        Ok(selected
            .iter()
            .zip(action.iter())
            .map(|(s, a)| if s == a { 1.0 } else { 0.0 })
            .collect())
    }
}

impl Observer<ActionFeatures> for AdfUcbPolicy {
    fn observe(
        &mut self,
        x: &ActionFeatures,
        actions: &Actions,
        _log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.update(x, actions, rewards)
    }
}
