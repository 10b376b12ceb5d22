use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::{clip, LossFn, EPSILON};

/// Focal loss for one-hot targets.
///
/// Per class, `-y_c * ln(p_c) * alpha * (1 - p_c)^gamma`; a sample's loss is
/// the mean of those terms over its C classes. Since the targets are one-hot
/// this reduces to the focal-weighted negative log-likelihood of the true
/// class divided by C, a fixed rescale that leaves per-sample ranking
/// untouched. Well-classified samples are down-weighted by the
/// `(1 - p_c)^gamma` factor so training concentrates on hard examples.
#[derive(Debug, Clone, Copy)]
pub struct FocalLoss {
    alpha: f32,
    gamma: f32,
}

impl FocalLoss {
    /// Creates a new `FocalLoss`.
    ///
    /// # Arguments
    /// * `alpha` - Scalar weighting factor.
    /// * `gamma` - Focusing exponent; `0` recovers scaled cross-entropy.
    pub fn new(alpha: f32, gamma: f32) -> Self {
        Self { alpha, gamma }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new(0.25, 2.0)
    }
}

impl LossFn for FocalLoss {
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32> {
        let Self { alpha, gamma } = *self;
        let per_class = ndarray::Zip::from(&y_pred).and(&y).map_collect(|&p, &t| {
            let p = clip(p);
            let weight = alpha * (1.0 - p).powf(gamma);
            -t * p.ln() * weight
        });
        per_class
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(y_pred.nrows()))
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let Self { alpha, gamma } = *self;
        let batch = y_pred.nrows().max(1) as f32;
        let classes = y_pred.ncols().max(1) as f32;
        let norm = batch * classes;

        ndarray::Zip::from(&y_pred).and(&y).map_collect(|&p, &t| {
            // Clipping flattens the loss outside the open interval, so the
            // gradient there is zero.
            if p <= EPSILON || p >= 1.0 - EPSILON {
                return 0.0;
            }
            let q = 1.0 - p;
            let d = t * alpha * (gamma * q.powf(gamma - 1.0) * p.ln() - q.powf(gamma) / p);
            d / norm
        })
    }
}
