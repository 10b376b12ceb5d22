use ndarray::{ArrayD, IxDyn};

use crate::error::{MlErr, Result};

/// Collapses every axis after the batch axis into a single feature axis.
pub struct Flatten {
    input_shape: Vec<usize>,
}

impl Flatten {
    pub fn new() -> Self {
        Self {
            input_shape: Vec::new(),
        }
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        if x.ndim() < 2 {
            return Err(MlErr::RankMismatch {
                what: "flatten input",
                got: x.ndim(),
                expected: 2,
            });
        }
        self.input_shape = x.shape().to_vec();
        let n = self.input_shape[0];
        let features: usize = self.input_shape[1..].iter().product();

        let x = if x.is_standard_layout() {
            x
        } else {
            x.as_standard_layout().into_owned()
        };
        x.into_shape_with_order(IxDyn(&[n, features]))
            .map_err(|_| MlErr::InvalidInput("flatten input is not reshapeable"))
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.input_shape.is_empty() {
            return Err(MlErr::InvalidInput(
                "flatten backward called without a matching forward pass",
            ));
        }
        let d = if d.is_standard_layout() {
            d
        } else {
            d.as_standard_layout().into_owned()
        };
        d.into_shape_with_order(IxDyn(&self.input_shape))
            .map_err(|_| MlErr::InvalidInput("flatten delta does not match the cached shape"))
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn flattens_and_restores_shape() {
        let mut flatten = Flatten::new();
        let x = Array4::from_shape_fn((2, 3, 4, 5), |(n, r, c, ch)| {
            (n * 1000 + r * 100 + c * 10 + ch) as f32
        });
        let y = flatten.forward(x.clone().into_dyn(), true).unwrap();
        assert_eq!(y.shape(), &[2, 60]);
        assert_eq!(y[[0, 0]], x[[0, 0, 0, 0]]);
        assert_eq!(y[[1, 59]], x[[1, 2, 3, 4]]);

        let dx = flatten.backward(y).unwrap();
        assert_eq!(dx.shape(), &[2, 3, 4, 5]);
    }
}
