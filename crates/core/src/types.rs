//! Batch type aliases shared by every policy and estimator.
//!
//! Rows always index the mini-batch. Context batches are `(batch, d)` for
//! per-arm policies and `(batch, actions_per_row, d)` for policies whose
//! actions are themselves feature vectors.

use ndarray::{Array1, Array2, Array3};

/// Context batch of shape `(batch, d)`.
pub type Contexts = Array2<f64>;

/// Action-dependent-feature batch of shape `(batch, actions_per_row, d)`.
pub type ActionFeatures = Array3<f64>;

/// One action index per row.
pub type Actions = Array1<usize>;

/// One scalar per row: propensities, log-propensities or rewards.
pub type Scalars = Array1<f64>;

/// Supervised labels used to simulate bandit feedback.
pub type Labels = Array1<usize>;
