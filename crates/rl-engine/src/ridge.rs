//! Incremental ridge regression with UCB and Thompson sampling read-outs.
//!
//! The estimator keeps the normal-equation statistics `A = λI + Σ xxᵀ` and
//! `b = Σ r x` together with `A⁻¹` and `θ = A⁻¹ b`. Single-row updates use the
//! Sherman-Morrison rank-1 formula, larger batches re-invert `A` directly.
//! The Cholesky factor of `A⁻¹` needed for Thompson sampling is cached and
//! recomputed lazily after every change to `A⁻¹`.

use std::collections::VecDeque;
use std::sync::OnceLock;

use cbandit_core::{BanditError, BanditResult};
use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, warn};

/// Denominators below this make the rank-1 update unreliable.
const RANK_ONE_EPS: f64 = 1e-12;

/// Jitter added to `A⁻¹` when its Cholesky factorization fails.
const CHOLESKY_JITTER: f64 = 1e-10;

#[derive(Debug, Clone)]
struct Observation {
    x: DVector<f64>,
    r: f64,
}

#[derive(Debug, Clone)]
struct Window {
    capacity: usize,
    history: VecDeque<Observation>,
}

#[derive(Debug)]
pub struct RidgeRegression {
    d: usize,
    alpha: f64,
    regularization: f64,
    a: DMatrix<f64>,
    a_inv: DMatrix<f64>,
    b: DVector<f64>,
    theta: DVector<f64>,
    /// Lower Cholesky factor of `a_inv`; empty while stale.
    cholesky: OnceLock<DMatrix<f64>>,
    window: Option<Window>,
}

impl RidgeRegression {
    /// Creates an estimator for `d`-dimensional features.
    ///
    /// `alpha` scales the UCB exploration bonus and `regularization` is the
    /// ridge penalty λ.
    pub fn new(d: usize, alpha: f64, regularization: f64) -> Self {
        Self {
            d,
            alpha,
            regularization,
            a: DMatrix::identity(d, d) * regularization,
            a_inv: DMatrix::identity(d, d) / regularization,
            b: DVector::zeros(d),
            theta: DVector::zeros(d),
            cholesky: OnceLock::new(),
            window: None,
        }
    }

    /// Creates an estimator that only remembers the `window` most recent rows.
    pub fn with_window(d: usize, alpha: f64, regularization: f64, window: usize) -> Self {
        let mut ridge = Self::new(d, alpha, regularization);
        ridge.window = Some(Window {
            capacity: window.max(1),
            history: VecDeque::with_capacity(window.max(1) + 1),
        });
        ridge
    }

    pub fn dims(&self) -> usize {
        self.d
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn regularization(&self) -> f64 {
        self.regularization
    }

    pub fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    pub fn a_inv(&self) -> &DMatrix<f64> {
        &self.a_inv
    }

    /// Adds a batch of rows `x` (n×d) with targets `r` (n).
    pub fn update(&mut self, x: ArrayView2<f64>, r: ArrayView1<f64>) -> BanditResult<()> {
        let rows = self.observations(x, r)?;
        if rows.is_empty() {
            return Ok(());
        }
        self.accumulate(&rows, 1.0)?;

        let mut evicted = Vec::new();
        if let Some(window) = self.window.as_mut() {
            window.history.extend(rows.iter().cloned());
            while window.history.len() > window.capacity {
                if let Some(oldest) = window.history.pop_front() {
                    evicted.push(oldest);
                }
            }
        }
        if !evicted.is_empty() {
            self.accumulate(&evicted, -1.0)?;
        }

        debug!(
            rows = rows.len(),
            evicted = evicted.len(),
            "ridge regression updated"
        );
        Ok(())
    }

    /// Subtracts a batch of rows that was previously added with [`update`].
    ///
    /// Unavailable on windowed estimators, whose history drives eviction.
    ///
    /// [`update`]: RidgeRegression::update
    pub fn remove(&mut self, x: ArrayView2<f64>, r: ArrayView1<f64>) -> BanditResult<()> {
        if self.window.is_some() {
            return Err(BanditError::Usage(
                "rows cannot be removed explicitly from a windowed ridge regression".to_string(),
            ));
        }
        let rows = self.observations(x, r)?;
        if rows.is_empty() {
            return Ok(());
        }
        self.accumulate(&rows, -1.0)
    }

    /// Point prediction `θᵀx` per row.
    pub fn predict(&self, x: ArrayView2<f64>) -> BanditResult<Array1<f64>> {
        let x = self.design(x)?;
        Ok(Array1::from_iter((&x * &self.theta).iter().copied()))
    }

    /// Prediction plus `alpha · sqrt(xᵀ A⁻¹ x)` per row.
    pub fn ucb(&self, x: ArrayView2<f64>) -> BanditResult<Array1<f64>> {
        let (mean, std) = self.thompson_distribution(x)?;
        Ok(mean + std * self.alpha)
    }

    /// Predictions under one parameter vector sampled from the ridge posterior.
    pub fn thompson<R: Rng + ?Sized>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> BanditResult<Array1<f64>> {
        let x = self.design(x)?;
        let l = self.cholesky()?;
        let u = DVector::from_fn(self.d, |_, _| rng.sample::<f64, _>(StandardNormal));
        let sampled_theta = &self.theta + l * u;
        Ok(Array1::from_iter((&x * sampled_theta).iter().copied()))
    }

    /// Mean and standard deviation of the Thompson sampled prediction per row.
    pub fn thompson_distribution(
        &self,
        x: ArrayView2<f64>,
    ) -> BanditResult<(Array1<f64>, Array1<f64>)> {
        let x = self.design(x)?;
        let mean = Array1::from_iter((&x * &self.theta).iter().copied());
        let projected = &x * &self.a_inv;
        let std = Array1::from_iter((0..x.nrows()).map(|i| {
            projected
                .row(i)
                .dot(&x.row(i))
                .max(0.0)
                .sqrt()
        }));
        Ok((mean, std))
    }

    fn cholesky(&self) -> BanditResult<&DMatrix<f64>> {
        if let Some(l) = self.cholesky.get() {
            return Ok(l);
        }
        let l = match Cholesky::new(self.a_inv.clone()) {
            Some(chol) => chol.l(),
            None => {
                warn!(d = self.d, "A inverse not positive definite, adding jitter");
                let regularized = &self.a_inv + DMatrix::identity(self.d, self.d) * CHOLESKY_JITTER;
                Cholesky::new(regularized)
                    .map(|chol| chol.l())
                    .ok_or_else(|| {
                        BanditError::Numerical(
                            "Cholesky factorization of A inverse failed".to_string(),
                        )
                    })?
            }
        };
        Ok(self.cholesky.get_or_init(|| l))
    }

    /// Folds `rows` into the statistics. Nothing is committed when the
    /// re-inversion fails.
    fn accumulate(&mut self, rows: &[Observation], sign: f64) -> BanditResult<()> {
        let mut a = self.a.clone();
        let mut b = self.b.clone();
        for row in rows {
            a.ger(sign, &row.x, &row.x, 1.0);
            b.axpy(sign * row.r, &row.x, 1.0);
        }

        let rank_one = match rows {
            [single] => self.sherman_morrison(&single.x, sign),
            _ => None,
        };
        let a_inv = match rank_one {
            Some(a_inv) => a_inv,
            None => invert(&a)?,
        };

        self.theta = &a_inv * &b;
        self.a = a;
        self.b = b;
        self.a_inv = a_inv;
        self.cholesky = OnceLock::new();
        Ok(())
    }

    /// `(A ± xxᵀ)⁻¹` from the current inverse, or `None` when the update is
    /// numerically degenerate and a full inversion is needed.
    fn sherman_morrison(&self, x: &DVector<f64>, sign: f64) -> Option<DMatrix<f64>> {
        let u = &self.a_inv * x;
        let denominator = 1.0 + sign * x.dot(&u);
        if denominator.abs() < RANK_ONE_EPS {
            return None;
        }
        let mut a_inv = self.a_inv.clone();
        a_inv.ger(-sign / denominator, &u, &u, 1.0);
        Some(a_inv)
    }

    fn observations(
        &self,
        x: ArrayView2<f64>,
        r: ArrayView1<f64>,
    ) -> BanditResult<Vec<Observation>> {
        BanditError::check_dims(self.d, x.ncols())?;
        BanditError::check_dims(x.nrows(), r.len())?;
        Ok(x
            .rows()
            .into_iter()
            .zip(r.iter())
            .map(|(row, &r)| Observation {
                x: DVector::from_iterator(self.d, row.iter().copied()),
                r,
            })
            .collect())
    }

    fn design(&self, x: ArrayView2<f64>) -> BanditResult<DMatrix<f64>> {
        BanditError::check_dims(self.d, x.ncols())?;
        Ok(DMatrix::from_row_iterator(
            x.nrows(),
            x.ncols(),
            x.iter().copied(),
        ))
    }
}

fn invert(a: &DMatrix<f64>) -> BanditResult<DMatrix<f64>> {
    match Cholesky::new(a.clone()) {
        Some(chol) => Ok(chol.inverse()),
        None => a
            .clone()
            .try_inverse()
            .ok_or_else(|| BanditError::Numerical("design matrix is singular".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Axis};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 2.0, 3.0, -3.0, -2.0, -1.0],
            [2.0, 3.0, 1.0, -1.0, -3.0, -2.0],
            [-1.0, -2.0, -1.0, 1.0, 3.0, 1.0]
        ];
        let y = array![1.0, 1.0, -1.0];
        (x, y)
    }

    fn assert_close(actual: &Array1<f64>, expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "expected {expected:?}, got {actual}");
        }
    }

    #[test]
    fn test_predict_without_observations_is_zero() {
        let (x, _) = sample_data();
        let ridge = RidgeRegression::new(6, 1.0, 1.0);
        assert_close(&ridge.predict(x.view()).unwrap(), &[0.0, 0.0, 0.0], 1e-12);
    }

    #[test]
    fn test_predict_after_batch_updates() {
        let (x, y) = sample_data();
        let mut ridge = RidgeRegression::new(6, 1.0, 1.0);

        ridge.update(x.view(), y.view()).unwrap();
        assert_close(
            &ridge.predict(x.view()).unwrap(),
            &[0.99656357, 1.03780069, -0.90378007],
            1e-6,
        );

        for _ in 0..100 {
            ridge.update(x.view(), y.view()).unwrap();
        }
        let prediction = ridge.predict(x.view()).unwrap();
        assert_close(&prediction, &[1.00009220, 1.00112439, -0.99793222], 1e-6);
        assert_close(&prediction, y.as_slice().unwrap(), 1e-2);
    }

    #[test]
    fn test_sherman_morrison_matches_batch_update() {
        let (x, y) = sample_data();
        let mut batched = RidgeRegression::new(6, 1.0, 1.0);
        let mut incremental = RidgeRegression::new(6, 1.0, 1.0);

        for _ in 0..20 {
            batched.update(x.view(), y.view()).unwrap();
            for i in 0..x.nrows() {
                incremental
                    .update(
                        x.slice(ndarray::s![i..i + 1, ..]),
                        y.slice(ndarray::s![i..i + 1]),
                    )
                    .unwrap();
            }
        }

        let expected = batched.predict(x.view()).unwrap();
        assert_close(
            &incremental.predict(x.view()).unwrap(),
            expected.as_slice().unwrap(),
            1e-8,
        );
        let expected = batched.ucb(x.view()).unwrap();
        assert_close(
            &incremental.ucb(x.view()).unwrap(),
            expected.as_slice().unwrap(),
            1e-8,
        );
    }

    #[test]
    fn test_ucb() {
        let (x, y) = sample_data();
        let mut ridge = RidgeRegression::new(6, 1.0, 1.0);
        assert_close(
            &ridge.ucb(x.view()).unwrap(),
            &[5.29150262, 5.29150262, 4.12310563],
            1e-6,
        );

        ridge.update(x.view(), y.view()).unwrap();
        assert_close(
            &ridge.ucb(x.view()).unwrap(),
            &[1.94904270, 1.91711626, -0.13497236],
            1e-6,
        );
    }

    #[test]
    fn test_thompson_is_fresh_per_call() {
        let (x, y) = sample_data();
        let mut ridge = RidgeRegression::new(6, 1.0, 1.0);
        ridge.update(x.view(), y.view()).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let first = ridge.thompson(x.view(), &mut rng).unwrap();
        let second = ridge.thompson(x.view(), &mut rng).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_thompson_matches_distribution() {
        let (x, y) = sample_data();
        let mut ridge = RidgeRegression::new(6, 1.0, 1.0);
        ridge.update(x.view(), y.view()).unwrap();
        let (means, stds) = ridge.thompson_distribution(x.view()).unwrap();

        let nr_samples = 20_000;
        let mut rng = StdRng::seed_from_u64(42);
        let mut samples = Array2::<f64>::zeros((nr_samples, x.nrows()));
        for mut row in samples.rows_mut() {
            row.assign(&ridge.thompson(x.view(), &mut rng).unwrap());
        }

        let sample_means = samples.mean_axis(Axis(0)).unwrap();
        let sample_stds = samples.std_axis(Axis(0), 0.0);
        for i in 0..x.nrows() {
            let tol = 2e-2 + 1e-2 * means[i].abs();
            assert!((sample_means[i] - means[i]).abs() < tol);
            let tol = 2e-2 + 1e-2 * stds[i];
            assert!((sample_stds[i] - stds[i]).abs() < tol);
        }
    }

    #[test]
    fn test_remove_restores_prior() {
        let (x, y) = sample_data();
        let mut ridge = RidgeRegression::new(6, 1.0, 1.0);
        ridge.update(x.view(), y.view()).unwrap();
        ridge.remove(x.view(), y.view()).unwrap();
        assert_close(&ridge.predict(x.view()).unwrap(), &[0.0, 0.0, 0.0], 1e-9);

        // Rank-1 downdate path
        ridge
            .update(x.slice(ndarray::s![0..1, ..]), y.slice(ndarray::s![0..1]))
            .unwrap();
        ridge
            .remove(x.slice(ndarray::s![0..1, ..]), y.slice(ndarray::s![0..1]))
            .unwrap();
        assert_close(
            &ridge.ucb(x.view()).unwrap(),
            &[5.29150262, 5.29150262, 4.12310563],
            1e-6,
        );
    }

    #[test]
    fn test_window_forgets_oldest_rows() {
        let (x, y) = sample_data();
        let mut windowed = RidgeRegression::with_window(6, 1.0, 1.0, 2);
        windowed.update(x.view(), y.view()).unwrap();

        let mut recent = RidgeRegression::new(6, 1.0, 1.0);
        recent
            .update(x.slice(ndarray::s![1..3, ..]), y.slice(ndarray::s![1..3]))
            .unwrap();

        let expected = recent.predict(x.view()).unwrap();
        assert_close(
            &windowed.predict(x.view()).unwrap(),
            expected.as_slice().unwrap(),
            1e-8,
        );
        assert!(windowed.remove(x.view(), y.view()).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut ridge = RidgeRegression::new(4, 1.0, 1.0);
        let (x, y) = sample_data();
        assert!(matches!(
            ridge.predict(x.view()),
            Err(BanditError::DimensionMismatch { expected: 4, got: 6 })
        ));
        assert!(ridge.update(x.view(), y.view()).is_err());
    }

    #[test]
    fn test_failed_inversion_leaves_state_untouched() {
        let mut ridge = RidgeRegression::new(2, 1.0, 1.0);
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        let removed = ridge.remove(x.view(), array![1.0, 1.0].view());
        assert!(matches!(removed, Err(BanditError::Numerical(_))));
        assert_eq!(ridge.a_inv(), &DMatrix::<f64>::identity(2, 2));
        assert!(ridge.theta().iter().all(|&t| t == 0.0));

        ridge
            .update(array![[1.0, 0.0]].view(), array![1.0].view())
            .unwrap();
        assert_close(
            &Array1::from_iter(ridge.theta().iter().copied()),
            &[0.5, 0.0],
            1e-12,
        );
    }
}
