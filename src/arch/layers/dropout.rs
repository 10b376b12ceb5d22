use ndarray::ArrayD;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Bernoulli, Distribution};

use crate::error::{MlErr, Result};

/// Inverted dropout: surviving activations are scaled by `1 / keep` during
/// training so inference is a plain identity.
pub struct Dropout {
    rate: f32,
    rng: StdRng,
    mask: ArrayD<f32>,
    active: bool,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Arguments
    /// * `rate` - Fraction of activations to zero, in `[0, 1)`.
    /// * `seed` - Seed for the mask generator, so runs are reproducible.
    ///
    /// # Panics
    /// Panics if `rate` is outside `[0, 1)`.
    pub fn new(rate: f32, seed: u64) -> Self {
        assert!((0.0..1.0).contains(&rate), "dropout rate must be in [0, 1)");
        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: ArrayD::zeros(ndarray::IxDyn(&[0])),
            active: false,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&mut self, x: ArrayD<f32>, train: bool) -> Result<ArrayD<f32>> {
        if !train || self.rate == 0.0 {
            self.active = false;
            return Ok(x);
        }

        let keep = 1.0 - self.rate;
        let bernoulli = Bernoulli::new(keep as f64).unwrap();
        let rng = &mut self.rng;
        self.mask = x.mapv(|_| {
            if bernoulli.sample(rng) {
                1.0 / keep
            } else {
                0.0
            }
        });
        self.active = true;
        Ok(x * &self.mask)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if !self.active {
            return Ok(d);
        }
        if d.shape() != self.mask.shape() {
            return Err(MlErr::SizeMismatch {
                what: "dropout delta",
                got: d.len(),
                expected: self.mask.len(),
            });
        }
        Ok(d * &self.mask)
    }
}
