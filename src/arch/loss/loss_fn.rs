use ndarray::{Array1, Array2, ArrayView2};

/// A differentiable measure of the difference between predicted class
/// probabilities and one-hot targets.
pub trait LossFn {
    /// Per-sample losses for a `(batch, classes)` prediction/target pair.
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32>;

    /// The batch loss: the mean of the per-sample losses.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        self.sample_losses(y_pred, y).mean().unwrap_or_default()
    }

    /// The gradient of [`LossFn::loss`] with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
