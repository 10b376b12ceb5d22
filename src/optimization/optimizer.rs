use ndarray::ArrayD;

use crate::error::Result;

/// A parameter tensor paired with its freshly computed gradient.
pub struct ParamTensor<'a> {
    pub value: &'a mut ArrayD<f32>,
    pub grad: &'a ArrayD<f32>,
}

/// Dictates how parameters move given their gradients.
///
/// `step` is called once per batch with every trainable tensor of the model,
/// always in the same order, so implementations may keep per-slot state.
pub trait Optimizer {
    fn step(&mut self, params: &mut [ParamTensor<'_>]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    /// Used by plateau-driven schedules to shrink the step size mid-run.
    fn set_learning_rate(&mut self, learning_rate: f32);
}
