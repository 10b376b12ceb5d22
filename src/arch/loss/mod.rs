mod cross_entropy;
mod focal;
mod loss_fn;

pub use cross_entropy::CategoricalCrossEntropy;
pub use focal::FocalLoss;
pub use loss_fn::LossFn;

/// Predicted probabilities are clamped to `[EPSILON, 1 - EPSILON]` before
/// any logarithm so endpoint inputs stay finite.
pub(crate) const EPSILON: f32 = 1e-7;

pub(crate) fn clip(p: f32) -> f32 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}
