use super::{Optimizer, ParamTensor};
use crate::error::{MlErr, Result};

/// Per-slot first and second moment estimates.
struct Moments {
    v: Box<[f32]>,
    s: Box<[f32]>,
}

/// Adam optimizer with bias correction.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    slots: Vec<Moments>,
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(1e-3)
    }
}

impl Adam {
    /// Creates a new `Adam` with the usual `beta1 = 0.9`, `beta2 = 0.999`,
    /// `epsilon = 1e-8`.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    /// Creates a new `Adam`.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            slots: Vec::new(),
        }
    }

    fn update_slot(
        &mut self,
        index: usize,
        param: &mut ParamTensor<'_>,
        weight_decay: f32,
    ) -> Result<()> {
        let len = param.value.len();
        if param.grad.len() != len {
            return Err(MlErr::SizeMismatch {
                what: "parameter gradient",
                got: param.grad.len(),
                expected: len,
            });
        }
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        if self.slots.len() == index {
            self.slots.push(Moments {
                v: vec![0.; len].into_boxed_slice(),
                s: vec![0.; len].into_boxed_slice(),
            });
        }
        let slot = &mut self.slots[index];
        if slot.v.len() != len {
            return Err(MlErr::SizeMismatch {
                what: "optimizer state",
                got: slot.v.len(),
                expected: len,
            });
        }

        param
            .value
            .iter_mut()
            .zip(param.grad.iter())
            .zip(slot.v.iter_mut())
            .zip(slot.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps) + lr * weight_decay * *p;
            });

        Ok(())
    }

    fn run(&mut self, params: &mut [ParamTensor<'_>], weight_decay: f32) -> Result<()> {
        self.beta1_t *= self.beta1;
        self.beta2_t *= self.beta2;
        for (index, param) in params.iter_mut().enumerate() {
            self.update_slot(index, param, weight_decay)?;
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [ParamTensor<'_>]) -> Result<()> {
        self.run(params, 0.0)
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

/// Adam with decoupled weight decay.
pub struct AdamW {
    inner: Adam,
    weight_decay: f32,
}

impl AdamW {
    /// Creates a new `AdamW`.
    ///
    /// # Arguments
    /// * `learning_rate` - Base step size.
    /// * `weight_decay` - Decoupled decay coefficient applied directly to the
    ///   parameters at each step.
    pub fn new(learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            inner: Adam::new(learning_rate),
            weight_decay,
        }
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [ParamTensor<'_>]) -> Result<()> {
        self.inner.run(params, self.weight_decay)
    }

    fn learning_rate(&self) -> f32 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.inner.set_learning_rate(learning_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn tensor(values: &[f32]) -> ArrayD<f32> {
        ArrayD::from_shape_vec(ndarray::IxDyn(&[values.len()]), values.to_vec()).unwrap()
    }

    #[test]
    fn first_step_moves_by_about_the_learning_rate() {
        let mut value = tensor(&[1.0]);
        let grad = tensor(&[1.0]);
        let mut opt = Adam::new(0.01);
        let mut params = [ParamTensor {
            value: &mut value,
            grad: &grad,
        }];
        opt.step(&mut params).unwrap();
        // With bias correction the very first Adam step is ~lr in magnitude.
        assert!((value[[0]] - (1.0 - 0.01)).abs() < 1e-3);
    }

    #[test]
    fn weight_decay_shrinks_parameters() {
        let mut plain = tensor(&[1.0]);
        let mut decayed = tensor(&[1.0]);
        let grad = tensor(&[0.5]);

        let mut adam = Adam::new(0.01);
        adam.step(&mut [ParamTensor {
            value: &mut plain,
            grad: &grad,
        }])
        .unwrap();

        let mut adamw = AdamW::new(0.01, 0.1);
        adamw
            .step(&mut [ParamTensor {
                value: &mut decayed,
                grad: &grad,
            }])
            .unwrap();

        assert!(decayed[[0]] < plain[[0]]);
    }

    #[test]
    fn mismatched_gradient_is_rejected() {
        let mut value = tensor(&[1.0, 2.0]);
        let grad = tensor(&[1.0]);
        let mut opt = Adam::new(0.01);
        let err = opt
            .step(&mut [ParamTensor {
                value: &mut value,
                grad: &grad,
            }])
            .unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { .. }));
    }

    #[test]
    fn learning_rate_can_be_rescheduled() {
        let mut opt = Adam::new(0.01);
        opt.set_learning_rate(0.005);
        assert_eq!(opt.learning_rate(), 0.005);
    }
}
