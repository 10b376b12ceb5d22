//! Baseline brain-MRI classifier: three valid-padding conv blocks trained
//! with categorical cross-entropy and Adam.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};

use mri_classifier::arch::loss::CategoricalCrossEntropy;
use mri_classifier::optimization::Adam;
use mri_classifier::report::{argmax_rows, plot_confusion, plot_history, ConfusionMatrix};
use mri_classifier::training::evaluate;
use mri_classifier::{
    load_directory, persist, train_val_split, FitConfig, Layer, Padding, Sequential, Trainer,
};

const IMG_HEIGHT: usize = 256;
const IMG_WIDTH: usize = 256;
const BATCH_SIZE: usize = 32;
const VALIDATION_SPLIT: f32 = 0.2;
const LEARNING_RATE: f32 = 1e-3;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the baseline brain-MRI classifier")]
struct Args {
    /// Directory whose subdirectories are class-named folders of MRI scans
    #[arg(long)]
    data_dir: PathBuf,

    /// Directory for the saved model, plots and history
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Number of training epochs
    #[arg(long, default_value_t = 10)]
    epochs: usize,

    /// Seed for weight initialization, splitting and shuffling
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn conv_output(size: usize, kernel: usize) -> usize {
    size - kernel + 1
}

fn pool_output(size: usize, pool: usize) -> usize {
    size / pool
}

fn build_model(num_classes: usize, seed: u64, rng: &mut StdRng) -> Sequential {
    let mut h = IMG_HEIGHT;
    let mut w = IMG_WIDTH;
    for _ in 0..3 {
        h = pool_output(conv_output(h, 3), 2);
        w = pool_output(conv_output(w, 3), 2);
    }
    let flat = h * w * 128;

    Sequential::new([
        Layer::conv2d(3, 32, (3, 3), Padding::Valid, rng),
        Layer::relu(),
        Layer::max_pool2d((2, 2)),
        Layer::conv2d(32, 64, (3, 3), Padding::Valid, rng),
        Layer::relu(),
        Layer::max_pool2d((2, 2)),
        Layer::conv2d(64, 128, (3, 3), Padding::Valid, rng),
        Layer::relu(),
        Layer::max_pool2d((2, 2)),
        Layer::flatten(),
        Layer::dense((flat, 128), rng),
        Layer::relu(),
        Layer::dropout(0.5, seed),
        Layer::dense((128, num_classes), rng),
        Layer::softmax(),
    ])
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let dataset = load_directory(&args.data_dir, (IMG_HEIGHT, IMG_WIDTH))
        .context("loading the image directory")?;
    let class_names = dataset.class_names().to_vec();
    let (mut train_set, val_set) = train_val_split(dataset, VALIDATION_SPLIT, &mut rng);
    log::info!(
        "training on {} images, validating on {}",
        train_set.len(),
        val_set.len()
    );

    let model = build_model(train_set.num_classes(), args.seed, &mut rng);
    log::info!("model has {} parameters", model.param_count());

    let mut trainer = Trainer::new(
        model,
        Adam::new(LEARNING_RATE),
        CategoricalCrossEntropy::new(),
        StdRng::seed_from_u64(args.seed.wrapping_add(1)),
    );
    let history = trainer.fit(
        &mut train_set,
        &val_set,
        FitConfig::new(args.epochs, BATCH_SIZE),
    )?;

    fs::create_dir_all(&args.out_dir)?;
    persist::save(trainer.model(), &args.out_dir.join("mri_classifier.bin"))
        .context("saving the trained model")?;
    history.save_json(&args.out_dir.join("training_history.json"))?;
    plot_history(&history, &args.out_dir.join("training_curves.png"), false)?;

    let (val_loss, val_acc) = evaluate(
        trainer.model_mut(),
        &val_set,
        &CategoricalCrossEntropy::new(),
        BATCH_SIZE,
    )?;
    log::info!("final validation: loss {val_loss:.4} acc {val_acc:.4}");

    let mut y_true = Vec::with_capacity(val_set.len());
    let mut y_pred = Vec::with_capacity(val_set.len());
    for (x, y) in val_set.batches(BATCH_SIZE) {
        let probs = trainer.model_mut().predict(x)?;
        y_pred.extend(argmax_rows(probs.view()));
        y_true.extend(argmax_rows(y));
    }
    let matrix = ConfusionMatrix::from_labels(&y_true, &y_pred, val_set.num_classes());
    plot_confusion(
        &matrix,
        &class_names,
        &args.out_dir.join("confusion_matrix.png"),
    )?;

    println!("Overall Accuracy: {:.4}%\n", matrix.accuracy() * 100.0);
    println!("Classification Report:");
    println!("{}", matrix.classification_report(&class_names));

    Ok(())
}
