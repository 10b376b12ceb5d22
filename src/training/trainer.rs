use ndarray::Axis;
use rand::Rng;

use super::{EarlyStopping, History, ReduceLrOnPlateau};
use crate::arch::loss::LossFn;
use crate::arch::Sequential;
use crate::data::ImageDataset;
use crate::error::{MlErr, Result};
use crate::optimization::Optimizer;
use crate::precision;
use crate::report::argmax_rows;

/// Fixed per-class loss multipliers used to rebalance underrepresented
/// classes. The table is hand-authored configuration, never derived from
/// class frequencies.
#[derive(Debug, Clone)]
pub struct ClassWeights {
    weights: Vec<f32>,
}

impl ClassWeights {
    /// Creates a weight table; entry `i` multiplies the loss of samples
    /// whose true class is `i`.
    ///
    /// # Panics
    /// Panics if `weights` is empty or contains a non-positive entry.
    pub fn new(weights: Vec<f32>) -> Self {
        assert!(!weights.is_empty(), "class weights must not be empty");
        assert!(
            weights.iter().all(|&w| w > 0.0),
            "class weights must be positive"
        );
        Self { weights }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weight(&self, class: usize) -> f32 {
        self.weights[class]
    }
}

/// Epoch-loop configuration for a single `fit` call.
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub class_weights: Option<ClassWeights>,
    pub reduce_lr: Option<ReduceLrOnPlateau>,
    pub early_stopping: Option<EarlyStopping>,
}

impl FitConfig {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            class_weights: None,
            reduce_lr: None,
            early_stopping: None,
        }
    }
}

/// Drives the epoch loop. Contains the relevant components needed for
/// training a model, including the model itself.
pub struct Trainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    model: Sequential,
    optimizer: O,
    loss_fn: L,
    rng: R,
}

impl<O, L, R> Trainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `optimizer` - Dictates how to update the weights on each gradient.
    /// * `loss_fn` - Measures the difference between predictions and targets.
    /// * `rng` - Drives the per-epoch shuffles.
    pub fn new(model: Sequential, optimizer: O, loss_fn: L, rng: R) -> Self {
        Self {
            model,
            optimizer,
            loss_fn,
            rng,
        }
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Sequential {
        &mut self.model
    }

    pub fn into_model(self) -> Sequential {
        self.model
    }

    /// Runs the full training loop: per epoch, shuffle and iterate batches
    /// (forward, loss, backward, optimizer step), then score the validation
    /// set in inference mode, record history and consult the schedules.
    ///
    /// # Returns
    /// The per-epoch metric history.
    pub fn fit(
        &mut self,
        train: &mut ImageDataset,
        val: &ImageDataset,
        mut config: FitConfig,
    ) -> Result<History> {
        if let Some(weights) = &config.class_weights {
            if weights.len() != train.num_classes() {
                return Err(MlErr::SizeMismatch {
                    what: "class weight table",
                    got: weights.len(),
                    expected: train.num_classes(),
                });
            }
        }

        let loss_scale = precision::global_policy().loss_scale();
        let mut history = History::new();

        for epoch in 0..config.epochs {
            train.shuffle(&mut self.rng);

            let mut epoch_loss = 0.0;
            let mut num_batches = 0usize;
            let mut correct = 0usize;
            let mut seen = 0usize;

            for (x, y) in train.batches(config.batch_size) {
                let y_pred = self.model.forward(x.to_owned(), true)?;

                let sample_losses = self.loss_fn.sample_losses(y_pred.view(), y);
                let true_classes = argmax_rows(y);
                let batch = y.nrows();

                let batch_loss = match &config.class_weights {
                    Some(weights) => {
                        let total: f32 = sample_losses
                            .iter()
                            .zip(&true_classes)
                            .map(|(&l, &c)| weights.weight(c) * l)
                            .sum();
                        total / batch as f32
                    }
                    None => sample_losses.mean().unwrap_or_default(),
                };
                epoch_loss += batch_loss;
                num_batches += 1;

                let predicted = argmax_rows(y_pred.view());
                correct += predicted
                    .iter()
                    .zip(&true_classes)
                    .filter(|(p, t)| p == t)
                    .count();
                seen += batch;

                let mut delta = self.loss_fn.loss_prime(y_pred.view(), y);
                if let Some(weights) = &config.class_weights {
                    for (mut row, &class) in
                        delta.axis_iter_mut(Axis(0)).zip(&true_classes)
                    {
                        row *= weights.weight(class);
                    }
                }
                if loss_scale != 1.0 {
                    delta *= loss_scale;
                }

                self.model.backward(delta)?;
                if loss_scale != 1.0 {
                    self.model.scale_grads(1.0 / loss_scale);
                }

                let mut params = self.model.params_mut();
                self.optimizer.step(&mut params)?;
            }

            if num_batches == 0 {
                return Err(MlErr::InvalidInput("training dataset produced no batches"));
            }

            let train_loss = epoch_loss / num_batches as f32;
            let train_acc = correct as f32 / seen as f32;
            let (val_loss, val_acc) =
                evaluate(&mut self.model, val, &self.loss_fn, config.batch_size)?;
            let lr = self.optimizer.learning_rate();
            history.push(train_loss, train_acc, val_loss, val_acc, lr);

            log::info!(
                "epoch {}/{}: loss {train_loss:.4} acc {train_acc:.4} \
                 val_loss {val_loss:.4} val_acc {val_acc:.4} lr {lr:.6}",
                epoch + 1,
                config.epochs
            );

            if let Some(schedule) = config.reduce_lr.as_mut() {
                if let Some(next) = schedule.observe(val_loss, lr) {
                    log::info!("validation loss plateaued: reducing learning rate to {next:.6}");
                    self.optimizer.set_learning_rate(next);
                }
            }

            if let Some(stopper) = config.early_stopping.as_mut() {
                if stopper.observe(val_loss, &self.model) {
                    log::info!("early stopping after epoch {}", epoch + 1);
                    if let Some(best) = stopper.take_best() {
                        self.model.restore(&best)?;
                        log::info!(
                            "restored best weights (val_loss {:.4})",
                            stopper.best_loss()
                        );
                    }
                    break;
                }
            }
        }

        Ok(history)
    }
}

/// Scores a dataset in inference mode.
///
/// # Returns
/// `(mean batch loss, accuracy)`.
pub fn evaluate<L: LossFn>(
    model: &mut Sequential,
    data: &ImageDataset,
    loss_fn: &L,
    batch_size: usize,
) -> Result<(f32, f32)> {
    let mut total_loss = 0.0;
    let mut num_batches = 0usize;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for (x, y) in data.batches(batch_size) {
        let y_pred = model.forward(x.to_owned(), false)?;
        total_loss += loss_fn.loss(y_pred.view(), y);
        num_batches += 1;

        let predicted = argmax_rows(y_pred.view());
        let truth = argmax_rows(y);
        correct += predicted
            .iter()
            .zip(&truth)
            .filter(|(p, t)| p == t)
            .count();
        seen += y.nrows();
    }

    if num_batches == 0 {
        return Err(MlErr::InvalidInput("cannot evaluate an empty dataset"));
    }
    Ok((
        total_loss / num_batches as f32,
        correct as f32 / seen as f32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::loss::CategoricalCrossEntropy;
    use crate::arch::{Layer, Padding};
    use crate::data::ImageDataset;
    use crate::optimization::Adam;
    use ndarray::Array4;
    use rand::{rngs::StdRng, SeedableRng};

    /// Two classes separated by overall brightness.
    fn brightness_dataset(n: usize) -> ImageDataset {
        let mut images = Array4::zeros((n, 6, 6, 3));
        let mut classes = Vec::with_capacity(n);
        for i in 0..n {
            let bright = i % 2 == 0;
            let base = if bright { 0.9 } else { 0.1 };
            let jitter = (i as f32 * 0.37).sin() * 0.05;
            images
                .index_axis_mut(ndarray::Axis(0), i)
                .fill(base + jitter);
            classes.push(if bright { 0 } else { 1 });
        }
        let labels = ImageDataset::one_hot(&classes, 2);
        ImageDataset::new(images, labels, vec!["bright".into(), "dark".into()])
    }

    fn small_model(rng: &mut StdRng) -> Sequential {
        Sequential::new([
            Layer::conv2d(3, 4, (3, 3), Padding::Valid, rng),
            Layer::relu(),
            Layer::global_avg_pool(),
            Layer::dense((4, 2), rng),
            Layer::softmax(),
        ])
    }

    #[test]
    fn loss_falls_on_separable_data() {
        let mut rng = StdRng::seed_from_u64(11);
        let model = small_model(&mut rng);
        let mut train = brightness_dataset(16);
        let val = brightness_dataset(8);

        let mut trainer = Trainer::new(
            model,
            Adam::new(0.02),
            CategoricalCrossEntropy,
            StdRng::seed_from_u64(12),
        );
        let history = trainer
            .fit(&mut train, &val, FitConfig::new(25, 8))
            .unwrap();

        assert_eq!(history.len(), 25);
        let first = history.loss[0];
        let last = *history.loss.last().unwrap();
        assert!(
            last < first,
            "loss should fall on separable data: {first} -> {last}"
        );
        assert!(history.learning_rate.iter().all(|&lr| lr == 0.02));
    }

    #[test]
    fn class_weight_table_must_match_class_count() {
        let mut rng = StdRng::seed_from_u64(13);
        let model = small_model(&mut rng);
        let mut train = brightness_dataset(8);
        let val = brightness_dataset(4);

        let mut config = FitConfig::new(1, 4);
        config.class_weights = Some(ClassWeights::new(vec![1.0, 1.0, 1.0]));

        let mut trainer = Trainer::new(
            model,
            Adam::new(0.01),
            CategoricalCrossEntropy,
            StdRng::seed_from_u64(14),
        );
        let err = trainer.fit(&mut train, &val, config).unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { .. }));
    }

    #[test]
    fn early_stopping_cuts_the_run_short() {
        let mut rng = StdRng::seed_from_u64(15);
        // A frozen learning rate of zero cannot improve, so validation loss
        // plateaus immediately.
        let model = small_model(&mut rng);
        let mut train = brightness_dataset(8);
        let val = brightness_dataset(4);

        let mut config = FitConfig::new(20, 4);
        config.early_stopping = Some(EarlyStopping::new(2).with_restore_best());

        let mut trainer = Trainer::new(
            model,
            Adam::new(0.0),
            CategoricalCrossEntropy,
            StdRng::seed_from_u64(16),
        );
        let history = trainer.fit(&mut train, &val, config).unwrap();
        assert!(history.len() < 20);
    }

    #[test]
    fn evaluate_reports_loss_and_accuracy() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut model = small_model(&mut rng);
        let data = brightness_dataset(8);
        let (loss, acc) = evaluate(&mut model, &data, &CategoricalCrossEntropy, 4).unwrap();
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&acc));
    }
}
