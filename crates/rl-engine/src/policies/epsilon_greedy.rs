//! Epsilon-greedy wrapper around any [`Policy`].

use cbandit_core::types::{Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};
use rand::Rng;

use crate::policy::{Observer, Policy};

/// Plays the wrapped policy's `max` action with probability `1 - epsilon`
/// and a uniformly random action otherwise.
#[derive(Debug, Clone)]
pub struct EpsilonGreedy<P> {
    policy: P,
    epsilon: f64,
}

impl<P: Policy> EpsilonGreedy<P> {
    pub fn new(policy: P, epsilon: f64) -> BanditResult<Self> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(BanditError::Usage(format!(
                "epsilon must lie in [0, 1], got {epsilon}"
            )));
        }
        Ok(Self { policy, epsilon })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn inner(&self) -> &P {
        &self.policy
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    fn is_max(&self, x: &P::Context, action: &Actions) -> BanditResult<Vec<bool>> {
        let best = self.policy.max(x)?;
        BanditError::check_dims(best.len(), action.len())?;
        Ok(best.iter().zip(action.iter()).map(|(b, a)| b == a).collect())
    }
}

impl<P: Policy> Policy for EpsilonGreedy<P> {
    type Context = P::Context;

    fn draw<R: Rng + ?Sized>(&self, x: &P::Context, rng: &mut R) -> BanditResult<Actions> {
        let mut actions = self.policy.max(x)?;
        let random = self.policy.uniform(x, rng)?;
        BanditError::check_dims(actions.len(), random.len())?;
        for (action, &alternative) in actions.iter_mut().zip(random.iter()) {
            if rng.gen::<f64>() < self.epsilon {
                *action = alternative;
            }
        }
        Ok(actions)
    }

    fn max(&self, x: &P::Context) -> BanditResult<Actions> {
        self.policy.max(x)
    }

    fn uniform<R: Rng + ?Sized>(&self, x: &P::Context, rng: &mut R) -> BanditResult<Actions> {
        self.policy.uniform(x, rng)
    }

    fn nr_actions(&self, x: &P::Context) -> BanditResult<Scalars> {
        self.policy.nr_actions(x)
    }

    fn log_nr_actions(&self, x: &P::Context) -> BanditResult<Scalars> {
        self.policy.log_nr_actions(x)
    }

    fn propensity(&self, x: &P::Context, action: &Actions) -> BanditResult<Scalars> {
        let is_max = self.is_max(x, action)?;
        let nr_actions = self.policy.nr_actions(x)?;
        BanditError::check_dims(is_max.len(), nr_actions.len())?;
        Ok(is_max
            .iter()
            .zip(nr_actions.iter())
            .map(|(&hit, &n)| {
                // A row without actions only ever yields its max.
                if n <= 0.0 {
                    return 1.0;
                }
                let greedy = if hit { 1.0 - self.epsilon } else { 0.0 };
                greedy + self.epsilon / n
            })
            .collect())
    }

    fn log_propensity(&self, x: &P::Context, action: &Actions) -> BanditResult<Scalars> {
        let is_max = self.is_max(x, action)?;
        let nr_actions = self.policy.nr_actions(x)?;
        let log_nr_actions = self.policy.log_nr_actions(x)?;
        BanditError::check_dims(is_max.len(), nr_actions.len())?;
        BanditError::check_dims(is_max.len(), log_nr_actions.len())?;

        Ok(is_max
            .iter()
            .zip(nr_actions.iter().zip(log_nr_actions.iter()))
            .map(|(&hit, (&n, &log_n))| {
                if n <= 0.0 {
                    0.0
                } else if hit {
                    (1.0 - self.epsilon + self.epsilon / n).ln()
                } else {
                    self.epsilon.ln() - log_n
                }
            })
            .collect())
    }
}

impl<C, P: Observer<C>> Observer<C> for EpsilonGreedy<P> {
    fn observe(
        &mut self,
        x: &C,
        actions: &Actions,
        log_propensities: &Scalars,
        rewards: &Scalars,
    ) -> BanditResult<()> {
        self.policy.observe(x, actions, log_propensities, rewards)
    }
}
