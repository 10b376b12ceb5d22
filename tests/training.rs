//! End-to-end training on synthetic data: the full pipeline from dataset
//! assembly through fitting, scheduling, persistence and reporting.

use ndarray::Array4;
use rand::{rngs::StdRng, SeedableRng};

use mri_classifier::arch::loss::FocalLoss;
use mri_classifier::optimization::AdamW;
use mri_classifier::report::{argmax_rows, ConfusionMatrix};
use mri_classifier::training::{evaluate, EarlyStopping, ReduceLrOnPlateau};
use mri_classifier::{
    persist, train_val_split, ClassWeights, FitConfig, ImageDataset, Layer, Padding, Sequential,
    Trainer,
};

const SIDE: usize = 8;

/// Two classes told apart by which quadrant is bright.
fn quadrant_dataset(n: usize) -> ImageDataset {
    let mut images = Array4::zeros((n, SIDE, SIDE, 3));
    let mut classes = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 2;
        let jitter = 0.05 * ((i * 31 % 17) as f32 / 17.0);
        for r in 0..SIDE {
            for c in 0..SIDE {
                let bright = if class == 0 {
                    r < SIDE / 2 && c < SIDE / 2
                } else {
                    r >= SIDE / 2 && c >= SIDE / 2
                };
                let value = if bright { 0.9 } else { 0.1 } + jitter;
                for ch in 0..3 {
                    images[[i, r, c, ch]] = value;
                }
            }
        }
        classes.push(class);
    }
    let labels = ImageDataset::one_hot(&classes, 2);
    ImageDataset::new(images, labels, vec!["top_left".into(), "bottom_right".into()])
}

fn quadrant_model(rng: &mut StdRng) -> Sequential {
    Sequential::new([
        Layer::conv2d(3, 4, (3, 3), Padding::Same, rng),
        Layer::relu(),
        Layer::batch_norm2d(4),
        Layer::max_pool2d((2, 2)),
        Layer::global_avg_pool(),
        Layer::dense((4, 2), rng),
        Layer::softmax(),
    ])
}

#[test]
fn full_pipeline_learns_and_roundtrips() {
    let mut rng = StdRng::seed_from_u64(100);
    let dataset = quadrant_dataset(40);
    let (mut train_set, val_set) = train_val_split(dataset, 0.2, &mut rng);
    assert_eq!(train_set.len() + val_set.len(), 40);

    let model = quadrant_model(&mut rng);
    let mut trainer = Trainer::new(
        model,
        AdamW::new(0.02, 1e-4),
        FocalLoss::default(),
        StdRng::seed_from_u64(101),
    );

    let mut config = FitConfig::new(30, 8);
    config.class_weights = Some(ClassWeights::new(vec![1.2, 1.0]));
    config.reduce_lr = Some(ReduceLrOnPlateau::new(0.5, 3));
    config.early_stopping = Some(EarlyStopping::new(8).with_restore_best());

    let history = trainer.fit(&mut train_set, &val_set, config).unwrap();

    assert!(!history.is_empty());
    assert_eq!(history.loss.len(), history.val_loss.len());
    assert_eq!(history.loss.len(), history.learning_rate.len());
    let first = history.loss[0];
    let last = *history.loss.last().unwrap();
    assert!(
        last < first,
        "training loss should fall on separable data: {first} -> {last}"
    );

    // Save, reload, and check the reloaded model scores the same.
    let path = std::env::temp_dir().join(format!(
        "mri_e2e_model_{}.bin",
        std::process::id()
    ));
    persist::save(trainer.model(), &path).unwrap();
    let mut restored = persist::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    let loss_fn = FocalLoss::default();
    let (orig_loss, orig_acc) =
        evaluate(trainer.model_mut(), &val_set, &loss_fn, 8).unwrap();
    let (restored_loss, restored_acc) =
        evaluate(&mut restored, &val_set, &loss_fn, 8).unwrap();
    assert!((orig_loss - restored_loss).abs() < 1e-5);
    assert!((orig_acc - restored_acc).abs() < 1e-6);
}

#[test]
fn reporting_pipeline_produces_consistent_counts() {
    let mut rng = StdRng::seed_from_u64(200);
    let dataset = quadrant_dataset(20);
    let (mut train_set, val_set) = train_val_split(dataset, 0.25, &mut rng);

    let model = quadrant_model(&mut rng);
    let mut trainer = Trainer::new(
        model,
        AdamW::new(0.02, 0.0),
        FocalLoss::default(),
        StdRng::seed_from_u64(201),
    );
    let _ = trainer
        .fit(&mut train_set, &val_set, FitConfig::new(10, 5))
        .unwrap();

    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    for (x, y) in val_set.batches(5) {
        let probs = trainer.model_mut().predict(x).unwrap();
        y_pred.extend(argmax_rows(probs.view()));
        y_true.extend(argmax_rows(y));
    }

    let matrix = ConfusionMatrix::from_labels(&y_true, &y_pred, val_set.num_classes());
    assert_eq!(matrix.total(), val_set.len());
    let report = matrix.classification_report(val_set.class_names());
    assert!(report.contains("top_left"));
    assert!(report.contains("accuracy"));

    // The matrix diagonal agrees with the accuracy evaluate() reports.
    let loss_fn = FocalLoss::default();
    let (_, acc) = evaluate(trainer.model_mut(), &val_set, &loss_fn, 5).unwrap();
    assert!((matrix.accuracy() - acc).abs() < 1e-6);
}
