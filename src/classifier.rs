//! L2-regularized logistic regression, fitted with the SAGA stochastic average gradient solver.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use qu::ick_use::*;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Fraction of records held out for evaluation.
    pub test_size: f64,
    /// Seed of the train/test shuffle.
    pub random_state: u64,
    /// Maximum number of passes over the training data.
    pub max_iter: usize,
    /// Inverse regularization strength.
    pub c: f64,
    /// Stop when the largest weight change in a pass, relative to the largest weight, is below
    /// this.
    pub tol: f64,
    /// Seed of the solver's sample order. Drawn from the OS when absent.
    pub seed: Option<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
            max_iter: 1000,
            c: 1.0,
            tol: 1e-4,
            seed: None,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result {
        ensure!(
            self.test_size > 0. && self.test_size < 1.,
            "test_size must be between 0 and 1 (found {})",
            self.test_size
        );
        ensure!(self.c > 0., "c must be positive (found {})", self.c);
        ensure!(self.max_iter > 0, "max_iter must be positive");
        ensure!(self.tol >= 0., "tol must not be negative");
        Ok(())
    }
}

/// A fitted binary logistic regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    coefficients: Array1<f64>,
    intercept: f64,
    n_iter: usize,
    converged: bool,
}

impl LogisticRegression {
    /// Fit to `x` (one record per row) and binary labels `y`.
    ///
    /// Minimizes `C * sum(log loss) + |w|² / 2`. The intercept is not penalized.
    pub fn fit(x: ArrayView2<'_, f32>, y: &[u8], config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;
        let (n_samples, n_features) = x.dim();
        ensure!(
            n_samples == y.len(),
            "{} records but {} labels",
            n_samples,
            y.len()
        );
        ensure!(n_samples > 0, "cannot fit with zero samples");
        ensure!(
            y.iter().all(|&l| l <= 1),
            "labels must be 0 or 1 for binary classification"
        );
        let positives = y.iter().filter(|&&l| l == 1).count();
        ensure!(
            positives > 0 && positives < n_samples,
            "training data needs both classes, but all {} labels are {}",
            n_samples,
            y[0]
        );

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let alpha = 1. / (config.c * n_samples as f64);
        let max_squared_sum = x
            .outer_iter()
            .map(|row| row.iter().map(|&v| (v as f64).powi(2)).sum::<f64>())
            .fold(0., f64::max);
        let lipschitz = 0.25 * (max_squared_sum + 1.) + alpha;
        let step = 1. / (2. * lipschitz + f64::min(2. * n_samples as f64 * alpha, lipschitz));
        event!(
            Level::DEBUG,
            "SAGA on {} x {}: alpha = {:e}, step = {:e}",
            n_samples,
            n_features,
            alpha,
            step
        );

        let mut weights = Array1::<f64>::zeros(n_features);
        let mut intercept = 0.;
        let mut sum_gradient = Array1::<f64>::zeros(n_features);
        let mut intercept_sum_gradient = 0.;
        let mut gradient_memory = vec![0.; n_samples];
        let mut seen = vec![false; n_samples];
        let mut n_seen = 0usize;

        let mut n_iter = 0;
        let mut converged = false;
        while n_iter < config.max_iter {
            n_iter += 1;
            let previous = weights.clone();
            let previous_intercept = intercept;

            for _ in 0..n_samples {
                let i = rng.gen_range(0..n_samples);
                let row = x.row(i);
                if !seen[i] {
                    seen[i] = true;
                    n_seen += 1;
                }
                let p = decision(&weights, intercept, row);
                // d/dp of the log loss
                let gradient = sigmoid(p) - y[i] as f64;
                let correction = gradient - gradient_memory[i];
                gradient_memory[i] = gradient;
                let seen_frac = n_seen as f64;
                let saga = 1. - 1. / seen_frac;

                for (j, w) in weights.iter_mut().enumerate() {
                    let xj = row[j] as f64;
                    sum_gradient[j] += correction * xj;
                    *w -= step * (sum_gradient[j] / seen_frac + saga * correction * xj + alpha * *w);
                }
                intercept_sum_gradient += correction;
                intercept -= step * (intercept_sum_gradient / seen_frac + saga * correction);
            }
            ensure!(
                intercept.is_finite() && weights.iter().all(|w| w.is_finite()),
                "solver diverged after {} passes",
                n_iter
            );

            let max_change = weights
                .iter()
                .zip(previous.iter())
                .map(|(a, b)| (a - b).abs())
                .fold((intercept - previous_intercept).abs(), f64::max);
            let max_weight = weights.iter().map(|w| w.abs()).fold(intercept.abs(), f64::max);
            if max_change == 0. || (max_weight > 0. && max_change / max_weight <= config.tol) {
                converged = true;
                break;
            }
        }
        if converged {
            event!(Level::INFO, "convergence after {} epochs", n_iter);
        } else {
            event!(
                Level::WARN,
                "max_iter ({}) was reached which means the coefficients did not converge",
                config.max_iter
            );
        }

        Ok(Self {
            coefficients: weights,
            intercept,
            n_iter,
            converged,
        })
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Passes over the training data used by the solver.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn decision_function(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        ensure!(
            x.ncols() == self.coefficients.len(),
            "model has {} features but the input has {}",
            self.coefficients.len(),
            x.ncols()
        );
        Ok(x.outer_iter()
            .map(|row| decision(&self.coefficients, self.intercept, row))
            .collect())
    }

    /// Probability of the positive class for each row.
    pub fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        Ok(self.decision_function(x)?.mapv(sigmoid))
    }

    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Vec<u8>> {
        Ok(self
            .decision_function(x)?
            .iter()
            .map(|&d| (d > 0.) as u8)
            .collect())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        crate::save(self, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        crate::load(path)
    }
}

fn decision(weights: &Array1<f64>, intercept: f64, row: ArrayView1<'_, f32>) -> f64 {
    weights
        .iter()
        .zip(row.iter())
        .map(|(w, &x)| w * x as f64)
        .sum::<f64>()
        + intercept
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

/// A shuffled train/test partition of the records.
#[derive(Debug, Clone)]
pub struct Split {
    pub x_train: Array2<f32>,
    pub x_test: Array2<f32>,
    pub y_train: Vec<u8>,
    pub y_test: Vec<u8>,
    /// Row of each training record in the unsplit data.
    pub train_idx: Vec<usize>,
    pub test_idx: Vec<usize>,
}

/// Shuffle the rows with a seeded generator and hold out `ceil(test_size * n)` of them.
pub fn train_test_split(
    x: ArrayView2<'_, f32>,
    y: &[u8],
    test_size: f64,
    random_state: u64,
) -> Result<Split> {
    let n = x.nrows();
    ensure!(n == y.len(), "{} records but {} labels", n, y.len());
    ensure!(
        test_size > 0. && test_size < 1.,
        "test_size must be between 0 and 1 (found {})",
        test_size
    );
    let n_test = (test_size * n as f64).ceil() as usize;
    ensure!(
        n_test < n,
        "with {} records and test_size = {} the training set would be empty",
        n,
        test_size
    );

    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(random_state));
    let test_idx = idx[..n_test].to_vec();
    let train_idx = idx[n_test..].to_vec();

    Ok(Split {
        x_train: x.select(Axis(0), &train_idx),
        x_test: x.select(Axis(0), &test_idx),
        y_train: train_idx.iter().map(|&i| y[i]).collect(),
        y_test: test_idx.iter().map(|&i| y[i]).collect(),
        train_idx,
        test_idx,
    })
}
