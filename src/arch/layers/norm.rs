use ndarray::{s, Array1, Array4, ArrayD, Zip};

use super::to_rank4;
use crate::error::{MlErr, Result};
use crate::optimization::ParamTensor;

/// Batch normalization over the channel axis of `(batch, height, width,
/// channels)` tensors.
///
/// Training mode normalizes with batch statistics and maintains running
/// estimates; inference mode uses the running estimates.
pub struct BatchNorm2d {
    channels: usize,
    momentum: f32,
    eps: f32,

    gamma: ArrayD<f32>,
    beta: ArrayD<f32>,
    grad_gamma: ArrayD<f32>,
    grad_beta: ArrayD<f32>,
    running_mean: ArrayD<f32>,
    running_var: ArrayD<f32>,

    // Forward metadata
    x_hat: Array4<f32>,
    inv_std: Array1<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        assert!(channels > 0, "channels must be > 0");
        Self {
            channels,
            momentum: 0.99,
            eps: 1e-3,
            gamma: ArrayD::ones(ndarray::IxDyn(&[channels])),
            beta: ArrayD::zeros(ndarray::IxDyn(&[channels])),
            grad_gamma: ArrayD::zeros(ndarray::IxDyn(&[channels])),
            grad_beta: ArrayD::zeros(ndarray::IxDyn(&[channels])),
            running_mean: ArrayD::zeros(ndarray::IxDyn(&[channels])),
            running_var: ArrayD::ones(ndarray::IxDyn(&[channels])),
            x_hat: Array4::zeros((0, 0, 0, 0)),
            inv_std: Array1::zeros(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn param_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    pub fn forward(&mut self, x: ArrayD<f32>, train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank4("batch_norm2d input", x)?;
        let (n, h, w, c) = x.dim();
        if c != self.channels {
            return Err(MlErr::SizeMismatch {
                what: "batch_norm2d channels",
                got: c,
                expected: self.channels,
            });
        }
        let m = (n * h * w) as f32;
        if m == 0.0 {
            return Err(MlErr::InvalidInput("batch_norm2d received an empty batch"));
        }

        let mut y = Array4::<f32>::zeros((n, h, w, c));

        if train {
            self.x_hat = Array4::zeros((n, h, w, c));
            self.inv_std = Array1::zeros(c);

            for ch in 0..c {
                let xc = x.slice(s![.., .., .., ch]);
                let mean = xc.sum() / m;
                let var = xc.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / m;
                let inv_std = 1.0 / (var + self.eps).sqrt();
                self.inv_std[ch] = inv_std;

                self.running_mean[[ch]] =
                    self.momentum * self.running_mean[[ch]] + (1.0 - self.momentum) * mean;
                self.running_var[[ch]] =
                    self.momentum * self.running_var[[ch]] + (1.0 - self.momentum) * var;

                let gamma = self.gamma[[ch]];
                let beta = self.beta[[ch]];
                Zip::from(self.x_hat.slice_mut(s![.., .., .., ch]))
                    .and(y.slice_mut(s![.., .., .., ch]))
                    .and(xc)
                    .for_each(|x_hat, y_v, &x_v| {
                        *x_hat = (x_v - mean) * inv_std;
                        *y_v = gamma * *x_hat + beta;
                    });
            }
        } else {
            for ch in 0..c {
                let mean = self.running_mean[[ch]];
                let inv_std = 1.0 / (self.running_var[[ch]] + self.eps).sqrt();
                let gamma = self.gamma[[ch]];
                let beta = self.beta[[ch]];
                Zip::from(y.slice_mut(s![.., .., .., ch]))
                    .and(x.slice(s![.., .., .., ch]))
                    .for_each(|y_v, &x_v| {
                        *y_v = gamma * (x_v - mean) * inv_std + beta;
                    });
            }
        }

        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank4("batch_norm2d delta", d)?;
        if d.dim() != self.x_hat.dim() {
            return Err(MlErr::InvalidInput(
                "batch_norm2d backward called without a matching training forward pass",
            ));
        }

        let (n, h, w, c) = d.dim();
        let m = (n * h * w) as f32;
        let mut dx = Array4::<f32>::zeros((n, h, w, c));

        for ch in 0..c {
            let dch = d.slice(s![.., .., .., ch]);
            let x_hat = self.x_hat.slice(s![.., .., .., ch]);

            let sum_d = dch.sum();
            let sum_d_xhat: f32 = dch.iter().zip(x_hat.iter()).map(|(a, b)| a * b).sum();

            self.grad_gamma[[ch]] = sum_d_xhat;
            self.grad_beta[[ch]] = sum_d;

            let coef = self.gamma[[ch]] * self.inv_std[ch] / m;
            Zip::from(dx.slice_mut(s![.., .., .., ch]))
                .and(dch)
                .and(x_hat)
                .for_each(|dx_v, &d_v, &xh_v| {
                    *dx_v = coef * (m * d_v - sum_d - xh_v * sum_d_xhat);
                });
        }

        Ok(dx.into_dyn())
    }

    pub fn params_mut(&mut self) -> Vec<ParamTensor<'_>> {
        vec![
            ParamTensor {
                value: &mut self.gamma,
                grad: &self.grad_gamma,
            },
            ParamTensor {
                value: &mut self.beta,
                grad: &self.grad_beta,
            },
        ]
    }

    pub fn state_tensors(&self) -> Vec<&ArrayD<f32>> {
        vec![
            &self.gamma,
            &self.beta,
            &self.running_mean,
            &self.running_var,
        ]
    }

    pub fn state_tensors_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        vec![
            &mut self.gamma,
            &mut self.beta,
            &mut self.running_mean,
            &mut self.running_var,
        ]
    }

    pub fn scale_grads(&mut self, factor: f32) {
        self.grad_gamma.mapv_inplace(|g| g * factor);
        self.grad_beta.mapv_inplace(|g| g * factor);
    }
}
