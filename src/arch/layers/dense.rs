use ndarray::{linalg, Array2, ArrayD, Axis, Ix1, Ix2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use super::to_rank2;
use crate::error::{MlErr, Result};
use crate::optimization::ParamTensor;

/// Fully connected layer over `(batch, features)` inputs.
pub struct Dense {
    dim: (usize, usize),

    weights: ArrayD<f32>,
    bias: ArrayD<f32>,
    grad_w: ArrayD<f32>,
    grad_b: ArrayD<f32>,

    // Forward metadata
    x: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` with Glorot-uniform weights and zero bias.
    ///
    /// # Arguments
    /// * `dim` - `(input features, output features)`.
    /// * `rng` - A random number generator for the initialization.
    pub fn new<R: Rng + ?Sized>(dim: (usize, usize), rng: &mut R) -> Self {
        assert!(dim.0 > 0 && dim.1 > 0, "dense dimensions must be > 0");

        let limit = (6.0 / (dim.0 + dim.1) as f32).sqrt();
        let uniform = Uniform::new(-limit, limit);
        let weights = Array2::random_using(dim, uniform, rng).into_dyn();

        Self {
            dim,
            grad_w: ArrayD::zeros(weights.raw_dim()),
            weights,
            bias: ArrayD::zeros(ndarray::IxDyn(&[dim.1])),
            grad_b: ArrayD::zeros(ndarray::IxDyn(&[dim.1])),
            x: Array2::zeros((0, 0)),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank2("dense input", x)?;
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let w = self.weights.view().into_dimensionality::<Ix2>().unwrap();
        let b = self.bias.view().into_dimensionality::<Ix1>().unwrap();

        let mut z = Array2::<f32>::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = x;
        Ok(z.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank2("dense delta", d)?;
        if d.dim() != (self.x.nrows(), self.dim.1) {
            return Err(MlErr::SizeMismatch {
                what: "dense delta features",
                got: d.ncols(),
                expected: self.dim.1,
            });
        }

        let mut gw = self.grad_w.view_mut().into_dimensionality::<Ix2>().unwrap();
        let mut gb = self.grad_b.view_mut().into_dimensionality::<Ix1>().unwrap();
        let x_t = self.x.t();
        linalg::general_mat_mul(1.0, &x_t, &d, 0.0, &mut gw);
        gb.assign(&d.sum_axis(Axis(0)));

        let w = self.weights.view().into_dimensionality::<Ix2>().unwrap();
        let w_t = w.t();
        let mut dx = Array2::<f32>::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w_t, 0.0, &mut dx);

        Ok(dx.into_dyn())
    }

    pub fn params_mut(&mut self) -> Vec<ParamTensor<'_>> {
        vec![
            ParamTensor {
                value: &mut self.weights,
                grad: &self.grad_w,
            },
            ParamTensor {
                value: &mut self.bias,
                grad: &self.grad_b,
            },
        ]
    }

    pub fn state_tensors(&self) -> Vec<&ArrayD<f32>> {
        vec![&self.weights, &self.bias]
    }

    pub fn state_tensors_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        vec![&mut self.weights, &mut self.bias]
    }

    pub fn scale_grads(&mut self, factor: f32) {
        self.grad_w.mapv_inplace(|g| g * factor);
        self.grad_b.mapv_inplace(|g| g * factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn forward_is_an_affine_map() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = Dense::new((2, 2), &mut rng);
        dense
            .weights
            .assign(&ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 2]), vec![1., 2., 3., 4.]).unwrap());
        dense
            .bias
            .assign(&ArrayD::from_shape_vec(ndarray::IxDyn(&[2]), vec![0.5, -0.5]).unwrap());

        let x = Array2::from_shape_vec((1, 2), vec![1., 1.]).unwrap();
        let y = dense.forward(x.into_dyn(), true).unwrap();
        assert!((y[[0, 0]] - 4.5).abs() < 1e-6);
        assert!((y[[0, 1]] - 5.5).abs() < 1e-6);
    }

    #[test]
    fn backward_produces_matching_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dense = Dense::new((3, 2), &mut rng);
        let x = Array2::<f32>::ones((4, 3));
        let _ = dense.forward(x.into_dyn(), true).unwrap();

        let d = Array2::<f32>::ones((4, 2));
        let dx = dense.backward(d.into_dyn()).unwrap();
        assert_eq!(dx.shape(), &[4, 3]);
        assert_eq!(dense.grad_w.shape(), &[3, 2]);
        // Each grad_b entry is the column sum of the delta.
        assert!((dense.grad_b[[0]] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut dense = Dense::new((3, 2), &mut rng);
        let x = Array2::<f32>::ones((4, 5));
        assert!(dense.forward(x.into_dyn(), true).is_err());
    }
}
