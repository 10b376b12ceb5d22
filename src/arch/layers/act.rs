use ndarray::{Array2, ArrayD, Axis};

use super::to_rank2;
use crate::error::{MlErr, Result};

/// Rectified linear activation, applied elementwise at any rank.
pub struct Relu {
    mask: ArrayD<f32>,
}

impl Relu {
    pub fn new() -> Self {
        Self {
            mask: ArrayD::zeros(ndarray::IxDyn(&[0])),
        }
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        self.mask = x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        Ok(x.mapv(|v| v.max(0.0)))
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if d.shape() != self.mask.shape() {
            return Err(MlErr::SizeMismatch {
                what: "relu delta",
                got: d.len(),
                expected: self.mask.len(),
            });
        }
        Ok(d * &self.mask)
    }
}

impl Default for Relu {
    fn default() -> Self {
        Self::new()
    }
}

/// Row-wise softmax over `(batch, classes)` logits, numerically stabilized
/// by subtracting the row maximum.
pub struct Softmax {
    y: Array2<f32>,
}

impl Softmax {
    pub fn new() -> Self {
        Self {
            y: Array2::zeros((0, 0)),
        }
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank2("softmax input", x)?;
        let mut y = x;
        for mut row in y.axis_iter_mut(Axis(0)) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        self.y = y.clone();
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank2("softmax delta", d)?;
        if d.dim() != self.y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "softmax delta",
                got: d.len(),
                expected: self.y.len(),
            });
        }

        let mut dz = Array2::<f32>::zeros(d.dim());
        for ((d_row, y_row), mut dz_row) in d
            .axis_iter(Axis(0))
            .zip(self.y.axis_iter(Axis(0)))
            .zip(dz.axis_iter_mut(Axis(0)))
        {
            let dot: f32 = d_row.iter().zip(y_row.iter()).map(|(a, b)| a * b).sum();
            for ((dz_v, &d_v), &y_v) in dz_row.iter_mut().zip(d_row.iter()).zip(y_row.iter()) {
                *dz_v = y_v * (d_v - dot);
            }
        }
        Ok(dz.into_dyn())
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn relu_zeroes_negatives_and_gates_gradients() {
        let mut relu = Relu::new();
        let x = Array4::from_shape_vec((1, 1, 2, 2), vec![-1., 2., 0., 3.]).unwrap();
        let y = relu.forward(x.into_dyn(), true).unwrap();
        assert_eq!(
            y.iter().copied().collect::<Vec<_>>(),
            vec![0., 2., 0., 3.]
        );

        let d = ArrayD::from_elem(y.raw_dim(), 1.0);
        let dx = relu.backward(d).unwrap();
        assert_eq!(
            dx.iter().copied().collect::<Vec<_>>(),
            vec![0., 1., 0., 1.]
        );
    }

    #[test]
    fn softmax_rows_are_distributions() {
        let mut softmax = Softmax::new();
        let x = Array2::from_shape_vec((2, 3), vec![1., 2., 3., 1000., 1000., 1000.]).unwrap();
        let y = softmax.forward(x.into_dyn(), true).unwrap();
        for row in 0..2 {
            let sum: f32 = (0..3).map(|c| y[[row, c]]).sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        // Large logits must not overflow.
        assert!((y[[1, 0]] - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn softmax_backward_matches_the_jacobian() {
        // With d = -y_true / p (cross-entropy upstream), the delta through
        // softmax collapses to p - y_true.
        let mut softmax = Softmax::new();
        let x = Array2::from_shape_vec((1, 3), vec![0.2, 1.1, -0.4]).unwrap();
        let p = softmax.forward(x.into_dyn(), true).unwrap();

        let y_true = [0.0f32, 1.0, 0.0];
        let d = Array2::from_shape_vec(
            (1, 3),
            (0..3).map(|c| -y_true[c] / p[[0, c]]).collect(),
        )
        .unwrap();
        let dz = softmax.backward(d.into_dyn()).unwrap();
        for c in 0..3 {
            assert!((dz[[0, c]] - (p[[0, c]] - y_true[c])).abs() < 1e-5);
        }
    }
}
