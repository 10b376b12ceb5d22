use ndarray::Axis;
use rand::Rng;

use super::ImageDataset;

/// Splits a dataset into disjoint training and validation subsets.
///
/// Samples are shuffled first so the split is not biased by directory
/// enumeration order; `val_fraction` of them (rounded) go to validation.
///
/// # Panics
/// Panics if `val_fraction` is outside `[0, 1)`.
pub fn train_val_split<R: Rng + ?Sized>(
    dataset: ImageDataset,
    val_fraction: f32,
    rng: &mut R,
) -> (ImageDataset, ImageDataset) {
    assert!(
        (0.0..1.0).contains(&val_fraction),
        "val_fraction must be in [0, 1)"
    );

    let mut dataset = dataset;
    dataset.shuffle(rng);

    let n = dataset.len();
    let n_val = ((n as f32) * val_fraction).round() as usize;
    let n_train = n - n_val;

    let (images, labels, class_names) = dataset.into_parts();
    let (train_x, val_x) = images.view().split_at(Axis(0), n_train);
    let (train_y, val_y) = labels.view().split_at(Axis(0), n_train);

    let train = ImageDataset::new(train_x.to_owned(), train_y.to_owned(), class_names.clone());
    let val = ImageDataset::new(val_x.to_owned(), val_y.to_owned(), class_names);
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rand::{rngs::StdRng, SeedableRng};

    fn tagged_dataset(n: usize) -> ImageDataset {
        let mut images = Array4::zeros((n, 2, 2, 1));
        for i in 0..n {
            images[[i, 0, 0, 0]] = i as f32;
        }
        let classes: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let labels = ImageDataset::one_hot(&classes, 2);
        ImageDataset::new(images, labels, vec!["a".into(), "b".into()])
    }

    #[test]
    fn split_sizes_follow_fraction() {
        let mut rng = StdRng::seed_from_u64(1);
        let (train, val) = train_val_split(tagged_dataset(10), 0.2, &mut rng);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(train.num_classes(), 2);
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let mut rng = StdRng::seed_from_u64(2);
        let (train, val) = train_val_split(tagged_dataset(12), 0.25, &mut rng);
        let mut seen: Vec<usize> = train
            .images()
            .outer_iter()
            .chain(val.images().outer_iter())
            .map(|img| img[[0, 0, 0]] as usize)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }
}
