use ndarray::{s, Array4, ArrayD, Axis};

use super::{to_rank2, to_rank4};
use crate::error::{MlErr, Result};

/// Non-overlapping max pooling; the stride equals the pool size and partial
/// windows at the border are dropped.
pub struct MaxPool2d {
    size: (usize, usize),

    // Forward metadata: per output element, the linear `r * w + c` offset of
    // the winning input pixel.
    switches: Array4<usize>,
    input_hw: (usize, usize),
}

impl MaxPool2d {
    pub fn new(size: (usize, usize)) -> Self {
        assert!(size.0 > 0 && size.1 > 0, "pool size must be > 0");
        Self {
            size,
            switches: Array4::zeros((0, 0, 0, 0)),
            input_hw: (0, 0),
        }
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank4("max_pool2d input", x)?;
        let (n, h, w, c) = x.dim();
        let (sh, sw) = self.size;
        let (oh, ow) = (h / sh, w / sw);
        if oh == 0 || ow == 0 {
            return Err(MlErr::InvalidInput("pool window larger than input"));
        }

        let mut y = Array4::<f32>::zeros((n, oh, ow, c));
        let mut switches = Array4::<usize>::zeros((n, oh, ow, c));
        for sample in 0..n {
            for or in 0..oh {
                for oc in 0..ow {
                    for ch in 0..c {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_at = 0;
                        for dr in 0..sh {
                            for dc in 0..sw {
                                let (r, col) = (or * sh + dr, oc * sw + dc);
                                let v = x[[sample, r, col, ch]];
                                if v > best {
                                    best = v;
                                    best_at = r * w + col;
                                }
                            }
                        }
                        y[[sample, or, oc, ch]] = best;
                        switches[[sample, or, oc, ch]] = best_at;
                    }
                }
            }
        }

        self.switches = switches;
        self.input_hw = (h, w);
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank4("max_pool2d delta", d)?;
        if d.dim() != self.switches.dim() {
            return Err(MlErr::InvalidInput(
                "max_pool2d backward called without a matching forward pass",
            ));
        }

        let (n, oh, ow, c) = d.dim();
        let (h, w) = self.input_hw;
        let mut dx = Array4::<f32>::zeros((n, h, w, c));
        for sample in 0..n {
            for or in 0..oh {
                for oc in 0..ow {
                    for ch in 0..c {
                        let at = self.switches[[sample, or, oc, ch]];
                        dx[[sample, at / w, at % w, ch]] += d[[sample, or, oc, ch]];
                    }
                }
            }
        }
        Ok(dx.into_dyn())
    }
}

/// Collapses `(batch, height, width, channels)` to `(batch, channels)` by
/// averaging each channel plane.
pub struct GlobalAvgPool {
    input_hw: (usize, usize),
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self { input_hw: (0, 0) }
    }

    pub fn forward(&mut self, x: ArrayD<f32>, _train: bool) -> Result<ArrayD<f32>> {
        let x = to_rank4("global_avg_pool input", x)?;
        let (_, h, w, _) = x.dim();
        if h == 0 || w == 0 {
            return Err(MlErr::InvalidInput("empty spatial dimensions"));
        }
        self.input_hw = (h, w);

        let y = x
            .mean_axis(Axis(1))
            .and_then(|a| a.mean_axis(Axis(1)))
            .ok_or(MlErr::InvalidInput("empty spatial dimensions"))?;
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = to_rank2("global_avg_pool delta", d)?;
        let (n, c) = d.dim();
        let (h, w) = self.input_hw;
        if h == 0 || w == 0 {
            return Err(MlErr::InvalidInput(
                "global_avg_pool backward called without a matching forward pass",
            ));
        }

        let share = 1.0 / (h * w) as f32;
        let mut dx = Array4::<f32>::zeros((n, h, w, c));
        for sample in 0..n {
            for ch in 0..c {
                let v = d[[sample, ch]] * share;
                dx.slice_mut(s![sample, .., .., ch]).fill(v);
            }
        }
        Ok(dx.into_dyn())
    }
}

impl Default for GlobalAvgPool {
    fn default() -> Self {
        Self::new()
    }
}
