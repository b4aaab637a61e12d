//! Scoring functions consumed by score-based policies.

use cbandit_core::types::Contexts;
use cbandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2, Axis};

/// Maps a `(batch, d)` context batch to a `(batch, nr_actions)` score matrix.
pub trait Predictor {
    fn score(&self, x: &Contexts) -> BanditResult<Array2<f64>>;
}

/// A predictor whose parameters an external optimizer can step.
pub trait Trainable: Predictor {
    /// One gradient-descent step, given the loss gradient with respect to
    /// the `(batch, nr_actions)` scores of `x`.
    fn step(
        &mut self,
        x: &Contexts,
        score_gradient: &Array2<f64>,
        learning_rate: f64,
    ) -> BanditResult<()>;
}

impl<F> Predictor for F
where
    F: Fn(&Contexts) -> BanditResult<Array2<f64>>,
{
    fn score(&self, x: &Contexts) -> BanditResult<Array2<f64>> {
        self(x)
    }
}

/// Affine scores `x Wᵀ + bias` with `W` of shape `(nr_actions, d)`.
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl LinearPredictor {
    pub fn new(weights: Array2<f64>) -> Self {
        let bias = Array1::zeros(weights.nrows());
        Self { weights, bias }
    }

    pub fn with_bias(weights: Array2<f64>, bias: Array1<f64>) -> BanditResult<Self> {
        BanditError::check_dims(weights.nrows(), bias.len())?;
        Ok(Self { weights, bias })
    }

    pub fn nr_actions(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }
}

impl Predictor for LinearPredictor {
    fn score(&self, x: &Contexts) -> BanditResult<Array2<f64>> {
        BanditError::check_dims(self.weights.ncols(), x.ncols())?;
        Ok(x.dot(&self.weights.t()) + &self.bias)
    }
}

impl Trainable for LinearPredictor {
    fn step(
        &mut self,
        x: &Contexts,
        score_gradient: &Array2<f64>,
        learning_rate: f64,
    ) -> BanditResult<()> {
        BanditError::check_dims(self.weights.ncols(), x.ncols())?;
        BanditError::check_dims(x.nrows(), score_gradient.nrows())?;
        BanditError::check_dims(self.weights.nrows(), score_gradient.ncols())?;

        let weight_gradient = score_gradient.t().dot(x);
        self.weights.scaled_add(-learning_rate, &weight_gradient);
        self.bias
            .scaled_add(-learning_rate, &score_gradient.sum_axis(Axis(0)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_scores() {
        let predictor =
            LinearPredictor::with_bias(array![[1.0, 0.0], [0.0, 2.0], [1.0, 1.0]], array![0.0, 0.0, 0.5])
                .unwrap();
        let scores = predictor.score(&array![[1.0, 2.0], [0.0, -1.0]]).unwrap();
        assert_eq!(scores, array![[1.0, 4.0, 3.5], [0.0, -2.0, -0.5]]);
        assert!(predictor.score(&array![[1.0, 2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_step_descends_squared_error() {
        let mut predictor = LinearPredictor::new(Array2::zeros((2, 2)));
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        let target = array![[1.0, -1.0], [2.0, 0.0]];
        let error = |p: &LinearPredictor| (p.score(&x).unwrap() - &target).mapv(|e| e * e).sum();

        let mut previous = error(&predictor);
        for _ in 0..20 {
            let gradient = (predictor.score(&x).unwrap() - &target) * 2.0;
            predictor.step(&x, &gradient, 0.1).unwrap();
            let current = error(&predictor);
            assert!(current < previous);
            previous = current;
        }
        assert!(previous < 1e-2);
        assert!(predictor
            .step(&x, &Array2::zeros((2, 3)), 0.1)
            .is_err());
    }

    #[test]
    fn test_closure_predictor() {
        let predictor = |x: &Contexts| Ok(x.clone());
        let x = array![[0.5, 1.5]];
        assert_eq!(predictor.score(&x).unwrap(), x);
    }
}
