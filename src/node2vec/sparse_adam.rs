use ndarray::Array2;
use std::collections::BTreeMap;

/// Adam for embedding tables where each step only touches a few rows.
///
/// Moment estimates are only updated for rows with a gradient, but bias correction uses a single
/// step count shared by the whole table.
#[derive(Debug, Clone)]
pub struct SparseAdam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    m: Array2<f32>,
    v: Array2<f32>,
    t: i32,
}

impl SparseAdam {
    /// Default: β₁=0.9, β₂=0.999, ε=1e-8
    pub fn new(rows: usize, cols: usize, lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Array2::zeros((rows, cols)),
            v: Array2::zeros((rows, cols)),
            t: 0,
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update. `grads` maps a row index to the summed gradient for that row.
    pub fn step(&mut self, params: &mut Array2<f32>, grads: &BTreeMap<usize, Vec<f32>>) {
        self.t += 1;
        let bias_correction1 = 1. - self.beta1.powi(self.t);
        let bias_correction2 = 1. - self.beta2.powi(self.t);
        let step_size = self.lr * bias_correction2.sqrt() / bias_correction1;

        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);
        for (&row, grad) in grads {
            let mut m = self.m.row_mut(row);
            let mut v = self.v.row_mut(row);
            let mut p = params.row_mut(row);
            for (i, &g) in grad.iter().enumerate() {
                m[i] = beta1 * m[i] + (1. - beta1) * g;
                v[i] = beta2 * v[i] + (1. - beta2) * g * g;
                p[i] -= step_size * m[i] / (v[i].sqrt() + eps);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_step_moves_by_lr() {
        let mut params = Array2::from_elem((3, 2), 1.0f32);
        let mut adam = SparseAdam::new(3, 2, 0.1);
        let mut grads = BTreeMap::new();
        grads.insert(1, vec![2.0, -0.5]);
        adam.step(&mut params, &grads);
        assert_eq!(adam.steps(), 1);

        // untouched rows don't move
        assert_eq!(params.row(0).to_vec(), vec![1.0, 1.0]);
        assert_eq!(params.row(2).to_vec(), vec![1.0, 1.0]);
        // the first bias corrected step is lr * sign(grad)
        assert!((params[(1, 0)] - 0.9).abs() < 1e-4);
        assert!((params[(1, 1)] - 1.1).abs() < 1e-4);
    }

    #[test]
    fn step_count_is_shared() {
        let mut params = Array2::zeros((2, 1));
        let mut adam = SparseAdam::new(2, 1, 0.01);
        let mut grads = BTreeMap::new();
        grads.insert(0, vec![1.0]);
        adam.step(&mut params, &grads);
        adam.step(&mut params, &grads);
        let mut grads = BTreeMap::new();
        grads.insert(1, vec![1.0]);
        adam.step(&mut params, &grads);
        assert_eq!(adam.steps(), 3);
        // row 1 sees its first gradient at t = 3, so its moments are still biased towards 0.
        assert!(params[(1, 0)] < 0.);
        assert!(params[(1, 0)] > -0.01);
    }
}
