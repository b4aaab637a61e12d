//! Boltzmann exploration over the scores of a [`Predictor`].

use cbandit_core::types::{Actions, Contexts, Scalars};
use cbandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2, Axis};
use rand::distributions::Open01;
use rand::Rng;

use crate::policy::{argmax_rows, argmin_rows, select_per_row, Policy};
use crate::predictor::{Predictor, Trainable};

/// Draws actions with probability `softmax(scores / tau)`.
#[derive(Debug, Clone)]
pub struct SoftmaxPolicy<P> {
    predictor: P,
    tau: f64,
}

impl<P: Predictor> SoftmaxPolicy<P> {
    pub fn new(predictor: P) -> Self {
        Self {
            predictor,
            tau: 1.0,
        }
    }

    pub fn with_temperature(predictor: P, tau: f64) -> BanditResult<Self> {
        if tau.is_nan() || tau <= 0.0 {
            return Err(BanditError::Usage(format!(
                "softmax temperature must be positive, got {tau}"
            )));
        }
        Ok(Self { predictor, tau })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }

    fn log_probabilities(&self, x: &Contexts) -> BanditResult<Array2<f64>> {
        let scores = self.predictor.score(x)?;
        Ok(log_softmax(scores / self.tau))
    }
}

impl<P: Trainable> SoftmaxPolicy<P> {
    /// Steps the predictor given `log_propensity_gradient`, the gradient of
    /// an externally computed loss with respect to `log π(a|x)` of each
    /// row's logged action. The chain rule through the log-softmax and the
    /// temperature is applied here.
    pub fn step(
        &mut self,
        x: &Contexts,
        actions: &Actions,
        log_propensity_gradient: &Scalars,
        learning_rate: f64,
    ) -> BanditResult<()> {
        BanditError::check_dims(x.nrows(), actions.len())?;
        BanditError::check_dims(x.nrows(), log_propensity_gradient.len())?;
        let probabilities = self.log_probabilities(x)?.mapv(f64::exp);
        let nr_actions = probabilities.ncols();

        // d log π(a|x) / d score_j = (1[j = a] − π_j) / tau
        let mut score_gradient = probabilities;
        for ((mut row, &action), &g) in score_gradient
            .axis_iter_mut(Axis(0))
            .zip(actions.iter())
            .zip(log_propensity_gradient.iter())
        {
            if action >= nr_actions {
                return Err(BanditError::ActionOutOfRange { action, nr_actions });
            }
            row.mapv_inplace(|p| -p * g / self.tau);
            row[action] += g / self.tau;
        }
        self.predictor.step(x, &score_gradient, learning_rate)
    }
}

impl<P: Predictor> Policy for SoftmaxPolicy<P> {
    type Context = Contexts;

    fn draw<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> BanditResult<Actions> {
        Ok(gumbel_sample(&self.log_probabilities(x)?, rng))
    }

    fn max(&self, x: &Contexts) -> BanditResult<Actions> {
        Ok(argmax_rows(&self.predictor.score(x)?))
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &Contexts, rng: &mut R) -> BanditResult<Actions> {
        let scores = self.predictor.score(x)?;
        let flat = log_softmax(Array2::ones(scores.raw_dim()));
        Ok(gumbel_sample(&flat, rng))
    }

    fn nr_actions(&self, x: &Contexts) -> BanditResult<Scalars> {
        let scores = self.predictor.score(x)?;
        Ok(Array1::from_elem(scores.nrows(), scores.ncols() as f64))
    }

    fn propensity(&self, x: &Contexts, action: &Actions) -> BanditResult<Scalars> {
        Ok(self.log_propensity(x, action)?.mapv(f64::exp))
    }

    fn log_propensity(&self, x: &Contexts, action: &Actions) -> BanditResult<Scalars> {
        select_per_row(&self.log_probabilities(x)?, action)
    }
}

/// Row-wise `log softmax`, shifted by the row maximum for stability.
fn log_softmax(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let top = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let norm = row.mapv(|v| (v - top).exp()).sum().ln() + top;
        row.mapv_inplace(|v| v - norm);
    }
    scores
}

/// Gumbel-max sampling: `argmin(ln(-ln u) - log p)` with `u ~ U(0, 1)`.
fn gumbel_sample<R: Rng + ?Sized>(log_p: &Array2<f64>, rng: &mut R) -> Actions {
    let perturbed = log_p.mapv(|lp| {
        let u: f64 = rng.sample(Open01);
        (-u.ln()).ln() - lp
    });
    argmin_rows(&perturbed)
}
