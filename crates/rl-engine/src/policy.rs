//! The policy capability interface shared by every exploration strategy,
//! plus the observer interface through which policies and estimators receive
//! bandit feedback.

use std::sync::Arc;

use cbandit_core::types::{Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rand::Rng;

/// A contextual-bandit policy.
///
/// `Context` is the batch type the policy acts on; rows index the batch.
/// Stochastic operations take the random number generator explicitly so
/// results are reproducible under a fixed seed.
pub trait Policy {
    type Context;

    /// Draws one action per row from the policy's exploration distribution.
    fn draw<R: Rng + ?Sized>(&self, x: &Self::Context, rng: &mut R) -> BanditResult<Actions>;

    /// The action the policy currently considers best, per row.
    fn max(&self, x: &Self::Context) -> BanditResult<Actions>;

    /// An action chosen uniformly at random among the valid ones, per row.
    fn uniform<R: Rng + ?Sized>(&self, x: &Self::Context, rng: &mut R) -> BanditResult<Actions>;

    /// Number of actions available in each row.
    fn nr_actions(&self, x: &Self::Context) -> BanditResult<Scalars>;

    fn log_nr_actions(&self, x: &Self::Context) -> BanditResult<Scalars> {
        Ok(self.nr_actions(x)?.mapv(f64::ln))
    }

    /// Probability that [`Policy::draw`] returns `action` for each row.
    fn propensity(&self, x: &Self::Context, action: &Actions) -> BanditResult<Scalars>;

    fn log_propensity(&self, x: &Self::Context, action: &Actions) -> BanditResult<Scalars> {
        Ok(self.propensity(x, action)?.mapv(f64::ln))
    }
}

/// A shared policy acts through its mutex, so one instance can be both the
/// acting policy of a wrapper and a registered update hook.
impl<P: Policy> Policy for Arc<Mutex<P>> {
    type Context = P::Context;

    fn draw<R: Rng + ?Sized>(&self, x: &P::Context, rng: &mut R) -> BanditResult<Actions> {
        self.lock().draw(x, rng)
    }

    fn max(&self, x: &P::Context) -> BanditResult<Actions> {
        self.lock().max(x)
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &P::Context, rng: &mut R) -> BanditResult<Actions> {
        self.lock().uniform(x, rng)
    }

    fn nr_actions(&self, x: &P::Context) -> BanditResult<Scalars> {
        self.lock().nr_actions(x)
    }

    fn log_nr_actions(&self, x: &P::Context) -> BanditResult<Scalars> {
        self.lock().log_nr_actions(x)
    }

    fn propensity(&self, x: &P::Context, action: &Actions) -> BanditResult<Scalars> {
        self.lock().propensity(x, action)
    }

    fn log_propensity(&self, x: &P::Context, action: &Actions) -> BanditResult<Scalars> {
        self.lock().log_propensity(x, action)
    }
}

/// Receives `(contexts, actions, log_propensities, rewards)` feedback batches.
pub trait Observer<C> {
    fn observe(
        &mut self,
        x: &C,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()>;
}

/// Shared observers are serialized through their mutex.
impl<C, T: Observer<C>> Observer<C> for Arc<Mutex<T>> {
    fn observe(
        &mut self,
        x: &C,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.lock().observe(x, actions, log_propensities, rewards)
    }
}

/// Index of the first maximum in each row.
pub(crate) fn argmax_rows(scores: &Array2<f64>) -> Actions {
    scores
        .rows()
        .into_iter()
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
        .collect()
}

/// Index of the first minimum in each row.
pub(crate) fn argmin_rows(scores: &Array2<f64>) -> Actions {
    argmax_rows(&scores.mapv(|v| -v))
}

/// Picks `values[i, actions[i]]` for every row `i`.
pub(crate) fn select_per_row(values: &Array2<f64>, actions: &Actions) -> BanditResult<Scalars> {
    BanditError::check_dims(values.nrows(), actions.len())?;
    let nr_actions = values.ncols();
    actions
        .iter()
        .enumerate()
        .map(|(i, &a)| {
            values
                .get((i, a))
                .copied()
                .ok_or(BanditError::ActionOutOfRange {
                    action: a,
                    nr_actions,
                })
        })
        .collect::<BanditResult<Vec<_>>>()
        .map(Array1::from)
}

/// Uniformly random action per row among `nr_actions` choices.
pub(crate) fn uniform_actions<R: Rng + ?Sized>(
    rows: usize,
    nr_actions: usize,
    rng: &mut R,
) -> Actions {
    (0..rows).map(|_| rng.gen_range(0..nr_actions.max(1))).collect()
}
