//! Counterfactual training losses computed from logged bandit feedback.
//!
//! The losses are evaluated against the policy being optimized. Their
//! gradients are stepped through [`crate::policies::SoftmaxPolicy::step`].

use std::fmt;
use std::str::FromStr;

use cbandit_core::types::{Actions, Scalars};
use cbandit_core::{BanditError, BanditResult};
use serde::{Deserialize, Serialize};

use crate::policy::Policy;

/// How per-example losses are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduce {
    #[default]
    Mean,
    No,
}

impl FromStr for Reduce {
    type Err = BanditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Reduce::Mean),
            "no" => Ok(Reduce::No),
            other => Err(BanditError::InvalidReduce(other.to_string())),
        }
    }
}

impl fmt::Display for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduce::Mean => write!(f, "mean"),
            Reduce::No => write!(f, "no"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Loss {
    Mean(f64),
    PerExample(Scalars),
}

impl Loss {
    fn reduce(per_example: Scalars, reduce: Reduce) -> Self {
        match reduce {
            Reduce::Mean => Loss::Mean(per_example.mean().unwrap_or(0.0)),
            Reduce::No => Loss::PerExample(per_example),
        }
    }

    /// The scalar objective; per-example losses are averaged.
    pub fn value(&self) -> f64 {
        match self {
            Loss::Mean(v) => *v,
            Loss::PerExample(values) => values.mean().unwrap_or(0.0),
        }
    }
}

/// λ-translated inverse-propensity-scored loss,
/// `exp(log π(a|x) − log_p) · ((1 − r) − λ)`.
///
/// `clip` floors the logged log-propensities before they are subtracted.
#[allow(clippy::too_many_arguments)]
pub fn ips_loss<P: Policy>(
    x: &P::Context,
    actions: &Actions,
    log_propensities: &Scalars,
    rewards: &Scalars,
    policy: &P,
    lagrange: f64,
    clip: Option<f64>,
    reduce: Reduce,
) -> BanditResult<Loss> {
    BanditError::check_dims(actions.len(), log_propensities.len())?;
    BanditError::check_dims(actions.len(), rewards.len())?;
    let log_pi = policy.log_propensity(x, actions)?;

    let logged = match clip {
        Some(clip) => log_propensities.mapv(|lp| lp.max(clip)),
        None => log_propensities.clone(),
    };
    let translated = rewards.mapv(|r| (1.0 - r) - lagrange);
    let per_example = (log_pi - logged).mapv(f64::exp) * translated;
    Ok(Loss::reduce(per_example, reduce))
}

/// REINFORCE-style loss `−log π(a|x) · r`.
pub fn policy_gradient_loss<P: Policy>(
    x: &P::Context,
    actions: &Actions,
    rewards: &Scalars,
    policy: &P,
    reduce: Reduce,
) -> BanditResult<Loss> {
    BanditError::check_dims(actions.len(), rewards.len())?;
    let log_pi = policy.log_propensity(x, actions)?;
    Ok(Loss::reduce(-log_pi * rewards, reduce))
}
