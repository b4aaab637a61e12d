//! Turns labelled batches into simulated bandit feedback.
//!
//! Each step draws one action per row from the acting policy, scores its
//! log-propensity, rewards it against the ground-truth label and fans the
//! resulting feedback out to every registered observer.

use std::sync::Arc;

use cbandit_core::types::{Actions, Labels, Scalars};
use cbandit_core::{BanditError, BanditResult};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::policy::{Observer, Policy};

/// Converts played actions and ground truth into rewards.
pub trait Reward {
    fn reward(&self, actions: &Actions, labels: &Labels) -> BanditResult<Scalars>;
}

/// `1.0` when the action equals the label, `0.0` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiClassReward;

impl Reward for MultiClassReward {
    fn reward(&self, actions: &Actions, labels: &Labels) -> BanditResult<Scalars> {
        BanditError::check_dims(actions.len(), labels.len())?;
        Ok(actions
            .iter()
            .zip(labels.iter())
            .map(|(a, l)| if a == l { 1.0 } else { 0.0 })
            .collect())
    }
}

/// Feedback produced by one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub actions: Actions,
    pub log_propensities: Scalars,
    pub rewards: Scalars,
}

type Hook<C> = Box<dyn Observer<C> + Send>;

pub struct Bandify<P: Policy, R = MultiClassReward> {
    policy: Arc<Mutex<P>>,
    reward: R,
    hooks: Vec<Hook<P::Context>>,
}

impl<P: Policy> Bandify<P, MultiClassReward> {
    pub fn new(policy: P) -> Self {
        Self::shared(Arc::new(Mutex::new(policy)))
    }

    pub fn shared(policy: Arc<Mutex<P>>) -> Self {
        Self {
            policy,
            reward: MultiClassReward,
            hooks: Vec::new(),
        }
    }
}

impl<P: Policy, R: Reward> Bandify<P, R> {
    pub fn with_reward(policy: Arc<Mutex<P>>, reward: R) -> Self {
        Self {
            policy,
            reward,
            hooks: Vec::new(),
        }
    }

    /// Handle to the acting policy, e.g. to register it as its own hook.
    pub fn policy(&self) -> Arc<Mutex<P>> {
        self.policy.clone()
    }

    /// Registers an observer that receives every step's feedback, in
    /// registration order.
    pub fn update_policy<O>(&mut self, hook: O)
    where
        O: Observer<P::Context> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn nr_hooks(&self) -> usize {
        self.hooks.len()
    }

    pub fn step<G: Rng + ?Sized>(
        &mut self,
        x: &P::Context,
        labels: &Labels,
        rng: &mut G,
    ) -> BanditResult<Feedback> {
        let (actions, log_propensities) = {
            let policy = self.policy.lock();
            let actions = policy.draw(x, rng)?;
            let log_propensities = policy.log_propensity(x, &actions)?;
            (actions, log_propensities)
        };
        if labels.len() != actions.len() {
            return Err(BanditError::Usage(format!(
                "expected {} labels for the batch, got {}",
                actions.len(),
                labels.len()
            )));
        }
        let rewards = self.reward.reward(&actions, labels)?;

        for hook in self.hooks.iter_mut() {
            hook.observe(x, &actions, &log_propensities, &rewards)?;
        }

        debug!(
            batch = actions.len(),
            mean_reward = rewards.mean().unwrap_or(0.0),
            hooks = self.hooks.len(),
            "bandify step"
        );
        Ok(Feedback {
            actions,
            log_propensities,
            rewards,
        })
    }
}
