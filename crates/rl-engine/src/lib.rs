//! Contextual-bandit engine: incremental ridge regression, exploration
//! policies with exact propensities, off-policy value estimators, safe
//! policy switching and the bandify feedback loop.

pub mod bandify;
pub mod estimator;
pub mod loss;
pub mod policies;
pub mod policy;
pub mod predictor;
pub mod ridge;

pub use bandify::{Bandify, Feedback, MultiClassReward, Reward};
pub use estimator::{ChernoffHoeffding, EmpiricalBernstein, Estimator, PerformanceEstimator};
pub use loss::{ips_loss, policy_gradient_loss, Loss, Reduce};
pub use policies::{
    AdfUcbPolicy, EpsilonGreedy, Explore, LinUcbPolicy, SafePolicy, SafeReport, SoftmaxPolicy,
    ThompsonPolicy,
};
pub use policy::{Observer, Policy};
pub use predictor::{LinearPredictor, Predictor, Trainable};
pub use ridge::RidgeRegression;
