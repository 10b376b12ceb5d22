use ndarray::{Array2, Array4, ArrayD, ArrayView4};

use super::layers::{to_rank2, Layer};
use crate::error::{MlErr, Result};
use crate::optimization::ParamTensor;

/// A sequential model: information flows forward through the layer stack
/// when computing an output and backward when computing deltas.
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The amount of trainable parameters in the model.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - An image batch.
    /// * `train` - Whether batch-dependent layers (dropout, batch norm)
    ///   should run in training mode.
    ///
    /// # Returns
    /// The `(batch, classes)` output of the final layer.
    pub fn forward(&mut self, x: Array4<f32>, train: bool) -> Result<Array2<f32>> {
        let mut t = x.into_dyn();
        for layer in &mut self.layers {
            t = layer.forward(t, train)?;
        }
        to_rank2("model output", t)
    }

    /// Propagates the loss delta back through every layer, accumulating
    /// parameter gradients along the way.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<()> {
        let mut t = d.into_dyn();
        for layer in self.layers.iter_mut().rev() {
            t = layer.backward(t)?;
        }
        Ok(())
    }

    /// Inference-mode forward pass over a borrowed batch.
    pub fn predict(&mut self, x: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        self.forward(x.to_owned(), false)
    }

    /// Every trainable tensor paired with its gradient, in layer order.
    pub fn params_mut(&mut self) -> Vec<ParamTensor<'_>> {
        self.layers
            .iter_mut()
            .flat_map(Layer::params_mut)
            .collect()
    }

    /// Multiplies all accumulated gradients by `factor`.
    pub fn scale_grads(&mut self, factor: f32) {
        for layer in &mut self.layers {
            layer.scale_grads(factor);
        }
    }

    /// Clones every state tensor (parameters and running estimates).
    pub fn snapshot(&self) -> Vec<ArrayD<f32>> {
        self.layers
            .iter()
            .flat_map(Layer::state_tensors)
            .cloned()
            .collect()
    }

    /// Restores a snapshot taken from a model with the same architecture.
    pub fn restore(&mut self, snapshot: &[ArrayD<f32>]) -> Result<()> {
        let mut tensors: Vec<&mut ArrayD<f32>> = self
            .layers
            .iter_mut()
            .flat_map(Layer::state_tensors_mut)
            .collect();
        if tensors.len() != snapshot.len() {
            return Err(MlErr::SizeMismatch {
                what: "snapshot tensors",
                got: snapshot.len(),
                expected: tensors.len(),
            });
        }
        for (tensor, saved) in tensors.iter_mut().zip(snapshot) {
            if tensor.shape() != saved.shape() {
                return Err(MlErr::SizeMismatch {
                    what: "snapshot tensor shape",
                    got: saved.len(),
                    expected: tensor.len(),
                });
            }
            tensor.assign(saved);
        }
        Ok(())
    }

    pub(crate) fn state_tensors(&self) -> Vec<&ArrayD<f32>> {
        self.layers.iter().flat_map(Layer::state_tensors).collect()
    }

    pub(crate) fn state_tensors_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        self.layers
            .iter_mut()
            .flat_map(Layer::state_tensors_mut)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::Padding;
    use rand::{rngs::StdRng, SeedableRng};

    fn tiny_cnn(rng: &mut StdRng) -> Sequential {
        Sequential::new([
            Layer::conv2d(1, 2, (3, 3), Padding::Same, rng),
            Layer::relu(),
            Layer::max_pool2d((2, 2)),
            Layer::flatten(),
            Layer::dense((2 * 2 * 2, 3), rng),
            Layer::softmax(),
        ])
    }

    #[test]
    fn forward_produces_class_distributions() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = tiny_cnn(&mut rng);
        let x = Array4::from_shape_fn((4, 4, 4, 1), |(n, r, c, _)| {
            (n + r + c) as f32 * 0.1
        });
        let y = model.forward(x, true).unwrap();
        assert_eq!(y.dim(), (4, 3));
        for row in 0..4 {
            let sum: f32 = (0..3).map(|c| y[[row, c]]).sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn param_count_adds_up() {
        let mut rng = StdRng::seed_from_u64(6);
        let model = tiny_cnn(&mut rng);
        // conv: 3*3*1*2 + 2, dense: 8*3 + 3
        assert_eq!(model.param_count(), 20 + 27);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = tiny_cnn(&mut rng);
        let saved = model.snapshot();

        // Disturb the parameters, then restore.
        for param in model.params_mut() {
            param.value.mapv_inplace(|v| v + 1.0);
        }
        model.restore(&saved).unwrap();

        let roundtrip = model.snapshot();
        for (a, b) in saved.iter().zip(&roundtrip) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn restore_rejects_foreign_snapshots() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut model = tiny_cnn(&mut rng);
        assert!(model.restore(&[]).is_err());
    }
}
