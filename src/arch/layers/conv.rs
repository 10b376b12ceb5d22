use ndarray::{linalg, s, Array2, Array4, ArrayD, Ix1, Ix2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::to_rank4;
use crate::error::{MlErr, Result};
use crate::optimization::ParamTensor;

/// Spatial padding mode for convolutions (stride is fixed at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// No padding; the output shrinks by `kernel - 1`.
    Valid,
    /// Zero padding of `(kernel - 1) / 2`, preserving the spatial size for
    /// odd kernels.
    Same,
}

impl Padding {
    fn amount(self, kernel: usize) -> usize {
        match self {
            Padding::Valid => 0,
            Padding::Same => (kernel - 1) / 2,
        }
    }
}

/// 2D convolution over `(batch, height, width, channels)` inputs.
///
/// The kernel is kept as a `(kh * kw * in, out)` matrix so both passes reduce
/// to matrix products over gathered patch rows.
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    padding: Padding,

    weights: ArrayD<f32>,
    bias: ArrayD<f32>,
    grad_w: ArrayD<f32>,
    grad_b: ArrayD<f32>,

    // Forward metadata
    patches: Vec<Array2<f32>>,
    input_hw: (usize, usize),
    output_hw: (usize, usize),
}

impl Conv2d {
    /// Creates a new `Conv2d` with He-normal weights and zero bias.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        padding: Padding,
        rng: &mut R,
    ) -> Self {
        assert!(in_channels > 0 && out_channels > 0, "channels must be > 0");
        assert!(kernel.0 > 0 && kernel.1 > 0, "kernel must be > 0");

        let fan_in = kernel.0 * kernel.1 * in_channels;
        let std = (2.0 / fan_in as f32).sqrt();
        let normal = Normal::new(0.0, std).unwrap();
        let weights = Array2::random_using((fan_in, out_channels), normal, rng).into_dyn();

        Self {
            in_channels,
            out_channels,
            kernel,
            padding,
            grad_w: ArrayD::zeros(weights.raw_dim()),
            weights,
            bias: ArrayD::zeros(ndarray::IxDyn(&[out_channels])),
            grad_b: ArrayD::zeros(ndarray::IxDyn(&[out_channels])),
            patches: Vec::new(),
            input_hw: (0, 0),
            output_hw: (0, 0),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel;
        let (ph, pw) = (self.padding.amount(kh), self.padding.amount(kw));
        if h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(MlErr::InvalidInput("convolution kernel larger than input"));
        }
        Ok((h + 2 * ph - kh + 1, w + 2 * pw - kw + 1))
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank4("conv2d input", x)?;
        let (n, h, w, cin) = x.dim();
        if cin != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input channels",
                got: cin,
                expected: self.in_channels,
            });
        }
        let (oh, ow) = self.output_hw(h, w)?;
        let (kh, kw) = self.kernel;
        let (ph, pw) = (self.padding.amount(kh), self.padding.amount(kw));
        let cols = kh * kw * cin;
        let cout = self.out_channels;

        let w2 = self.weights.view().into_dimensionality::<Ix2>().unwrap();
        let x_ref = &x;

        let per_sample: Vec<(Array2<f32>, Array2<f32>)> = (0..n)
            .into_par_iter()
            .map(move |sample| {
                let xs = x_ref.slice(s![sample, .., .., ..]);
                let mut patches = Array2::<f32>::zeros((oh * ow, cols));
                for or in 0..oh {
                    for oc in 0..ow {
                        let row = or * ow + oc;
                        let mut col = 0;
                        for dr in 0..kh {
                            for dc in 0..kw {
                                let ir = (or + dr).wrapping_sub(ph);
                                let ic = (oc + dc).wrapping_sub(pw);
                                if ir < h && ic < w {
                                    for ch in 0..cin {
                                        patches[[row, col + ch]] = xs[[ir, ic, ch]];
                                    }
                                }
                                col += cin;
                            }
                        }
                    }
                }
                let mut out = Array2::<f32>::zeros((oh * ow, cout));
                linalg::general_mat_mul(1.0, &patches, &w2, 0.0, &mut out);
                (patches, out)
            })
            .collect();

        let mut y = Array4::<f32>::zeros((n, oh, ow, cout));
        self.patches = Vec::with_capacity(n);
        for (sample, (patches, out)) in per_sample.into_iter().enumerate() {
            let out3 = out.into_shape_with_order((oh, ow, cout)).unwrap();
            y.slice_mut(s![sample, .., .., ..]).assign(&out3);
            self.patches.push(patches);
        }
        let bias = self.bias.view().into_dimensionality::<Ix1>().unwrap();
        y += &bias;

        self.input_hw = (h, w);
        self.output_hw = (oh, ow);
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank4("conv2d delta", d)?;
        let (n, oh, ow, cout) = d.dim();
        if cout != self.out_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d delta channels",
                got: cout,
                expected: self.out_channels,
            });
        }
        if (oh, ow) != self.output_hw || self.patches.len() != n {
            return Err(MlErr::InvalidInput(
                "conv2d backward called without a matching forward pass",
            ));
        }

        let (h, w) = self.input_hw;
        let (kh, kw) = self.kernel;
        let (ph, pw) = (self.padding.amount(kh), self.padding.amount(kw));
        let cin = self.in_channels;
        let cols = kh * kw * cin;

        self.grad_w.fill(0.0);
        self.grad_b.fill(0.0);
        let mut gw = self.grad_w.view_mut().into_dimensionality::<Ix2>().unwrap();
        let mut gb = self.grad_b.view_mut().into_dimensionality::<Ix1>().unwrap();
        let w2 = self.weights.view().into_dimensionality::<Ix2>().unwrap();

        let mut dx = Array4::<f32>::zeros((n, h, w, cin));
        for sample in 0..n {
            let d2 = d
                .slice(s![sample, .., .., ..])
                .to_shape((oh * ow, cout))
                .unwrap();
            let patches = &self.patches[sample];

            let patches_t = patches.t();
            linalg::general_mat_mul(1.0, &patches_t, &d2, 1.0, &mut gw);
            gb += &d2.sum_axis(Axis(0));

            let mut dpatch = Array2::<f32>::zeros((oh * ow, cols));
            let w2_t = w2.t();
            linalg::general_mat_mul(1.0, &d2, &w2_t, 0.0, &mut dpatch);

            let mut dxs = dx.slice_mut(s![sample, .., .., ..]);
            for or in 0..oh {
                for oc in 0..ow {
                    let row = or * ow + oc;
                    let mut col = 0;
                    for dr in 0..kh {
                        for dc in 0..kw {
                            let ir = (or + dr).wrapping_sub(ph);
                            let ic = (oc + dc).wrapping_sub(pw);
                            if ir < h && ic < w {
                                for ch in 0..cin {
                                    dxs[[ir, ic, ch]] += dpatch[[row, col + ch]];
                                }
                            }
                            col += cin;
                        }
                    }
                }
            }
        }

        self.patches.clear();
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

    fn input_3x3() -> Array4<f32> {
        Array4::from_shape_vec(
            (1, 3, 3, 1),
            vec![1., 2., 3., 4., 5., 6., 7., 8., 9.],
        )
        .unwrap()
    }

    #[test]
    fn valid_padding_sums_the_window() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(1, 1, (3, 3), Padding::Valid, &mut rng);
        conv.weights.fill(1.0);
        conv.bias.fill(0.5);

        let y = conv.forward(input_3x3().into_dyn(), true).unwrap();
        assert_eq!(y.shape(), &[1, 1, 1, 1]);
        assert!((y[[0, 0, 0, 0]] - 45.5).abs() < 1e-5);
    }

    #[test]
    fn same_padding_preserves_spatial_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(1, 2, (3, 3), Padding::Same, &mut rng);
        conv.weights.fill(1.0);
        conv.bias.fill(0.0);

        let y = conv.forward(input_3x3().into_dyn(), true).unwrap();
        assert_eq!(y.shape(), &[1, 3, 3, 2]);
        // Center output sees the full 3x3 window.
        assert!((y[[0, 1, 1, 0]] - 45.0).abs() < 1e-5);
        // Corner output sees only the 2x2 in-bounds part.
        assert!((y[[0, 0, 0, 0]] - (1. + 2. + 4. + 5.)).abs() < 1e-5);
    }

    #[test]
    fn backward_matches_numerical_gradient() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut conv = Conv2d::new(1, 2, (2, 2), Padding::Valid, &mut rng);
        let x = Array4::from_shape_fn((1, 4, 4, 1), |(_, r, c, _)| {
            (r as f32 * 0.3 + c as f32 * 0.7).sin()
        });

        // d(sum of outputs)/dx via backward with a ones delta.
        let y = conv.forward(x.clone().into_dyn(), true).unwrap();
        let d = ArrayD::from_elem(y.raw_dim(), 1.0);
        let dx = conv.backward(d).unwrap();

        let eps = 1e-2;
        for r in 0..4 {
            for c in 0..4 {
                let mut xp = x.clone();
                xp[[0, r, c, 0]] += eps;
                let mut xm = x.clone();
                xm[[0, r, c, 0]] -= eps;
                let yp = conv.forward(xp.into_dyn(), true).unwrap().sum();
                let ym = conv.forward(xm.into_dyn(), true).unwrap().sum();
                let numeric = (yp - ym) / (2.0 * eps);
                assert!(
                    (dx[[0, r, c, 0]] - numeric).abs() < 1e-2,
                    "gradient mismatch at ({r}, {c}): {} vs {numeric}",
                    dx[[0, r, c, 0]]
                );
            }
        }
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(3, 4, (3, 3), Padding::Same, &mut rng);
        let x = Array4::<f32>::zeros((1, 5, 5, 2));
        assert!(conv.forward(x.into_dyn(), true).is_err());
    }
}
