use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::{clip, LossFn, EPSILON};

/// Categorical cross-entropy over one-hot targets: per sample, the sum of
/// `-y_c * ln(p_c)` over classes, with clipped probabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct CategoricalCrossEntropy;

impl CategoricalCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for CategoricalCrossEntropy {
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32> {
        let per_class = ndarray::Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&p, &t| -t * clip(p).ln());
        per_class.sum_axis(Axis(1))
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let batch = y_pred.nrows().max(1) as f32;
        ndarray::Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&p, &t| {
                if p <= EPSILON || p >= 1.0 - EPSILON {
                    0.0
                } else {
                    -t / (p * batch)
                }
            })
    }
}
