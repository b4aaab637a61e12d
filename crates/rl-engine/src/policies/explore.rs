//! Explore-only wrapper: every draw is uniformly random.

use cbandit_core::types::{Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};
use rand::Rng;

use crate::policy::{Observer, Policy};

/// Explore-only: always plays uniformly at random.
#[derive(Debug, Clone)]
pub struct Explore<P> {
    policy: P,
}

impl<P: Policy> Explore<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn inner(&self) -> &P {
        &self.policy
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.policy
    }
}

impl<P: Policy> Policy for Explore<P> {
    type Context = P::Context;

    fn draw<R: Rng + ?Sized>(&self, x: &P::Context, rng: &mut R) -> BanditResult<Actions> {
        self.policy.uniform(x, rng)
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

    /// `1 / nr_actions` per row; a row without actions gets `1`.
    fn propensity(&self, x: &P::Context, action: &Actions) -> BanditResult<Scalars> {
        let nr_actions = self.policy.nr_actions(x)?;
        BanditError::check_dims(nr_actions.len(), action.len())?;
        Ok(nr_actions.mapv(|n| if n <= 0.0 { 1.0 } else { 1.0 / n }))
    }
}

impl<C, P: Observer<C>> Observer<C> for Explore<P> {
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
