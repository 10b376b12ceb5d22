use ndarray::ArrayD;

use crate::arch::Sequential;

/// Halving-style learning-rate reduction when the validation loss stops
/// improving.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f32,
    patience: usize,
    min_lr: f32,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    /// Creates a new schedule.
    ///
    /// # Arguments
    /// * `factor` - Multiplier applied to the learning rate on a plateau,
    ///   in `(0, 1)`.
    /// * `patience` - Number of non-improving epochs tolerated before
    ///   reducing.
    ///
    /// # Panics
    /// Panics if `factor` is outside `(0, 1)` or `patience` is zero.
    pub fn new(factor: f32, patience: usize) -> Self {
        assert!(factor > 0.0 && factor < 1.0, "factor must be in (0, 1)");
        assert!(patience > 0, "patience must be > 0");
        Self {
            factor,
            patience,
            min_lr: 0.0,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Sets a floor below which the learning rate is never reduced.
    pub fn with_min_lr(mut self, min_lr: f32) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Feeds one epoch's validation loss. Returns the reduced learning rate
    /// when a plateau was detected.
    pub fn observe(&mut self, val_loss: f32, current_lr: f32) -> Option<f32> {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;
        let next = (current_lr * self.factor).max(self.min_lr);
        (next < current_lr).then_some(next)
    }
}

/// Stops training after the validation loss fails to improve for `patience`
/// epochs, optionally keeping the best weights seen so far.
pub struct EarlyStopping {
    patience: usize,
    restore_best: bool,
    best: f32,
    wait: usize,
    best_state: Option<Vec<ArrayD<f32>>>,
}

impl EarlyStopping {
    /// Creates a new `EarlyStopping`.
    ///
    /// # Panics
    /// Panics if `patience` is zero.
    pub fn new(patience: usize) -> Self {
        assert!(patience > 0, "patience must be > 0");
        Self {
            patience,
            restore_best: false,
            best: f32::INFINITY,
            wait: 0,
            best_state: None,
        }
    }

    /// Keep a snapshot of the best-scoring weights and hand it back when
    /// training stops.
    pub fn with_restore_best(mut self) -> Self {
        self.restore_best = true;
        self
    }

    /// Feeds one epoch's validation loss. Returns `true` when training
    /// should stop.
    pub fn observe(&mut self, val_loss: f32, model: &Sequential) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            if self.restore_best {
                self.best_state = Some(model.snapshot());
            }
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best_loss(&self) -> f32 {
        self.best
    }

    /// The snapshot taken at the best epoch, if weight restoration was
    /// requested and at least one improvement was seen.
    pub fn take_best(&mut self) -> Option<Vec<ArrayD<f32>>> {
        self.best_state.take()
    }
}
