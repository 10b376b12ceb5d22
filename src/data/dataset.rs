use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis};
use rand::{seq::SliceRandom, Rng};

/// An in-memory labeled image collection.
///
/// Images are `(n, height, width, channels)` with pixel values already
/// rescaled to `[0, 1]`; labels are one-hot rows over the class list. The
/// class ordering is whatever the loader produced (alphabetical by
/// subdirectory name) and is carried along so reports can name classes.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Array4<f32>,
    labels: Array2<f32>,
    class_names: Vec<String>,
}

impl ImageDataset {
    /// Creates a dataset from owned tensors.
    ///
    /// # Panics
    /// - if the image and label counts differ
    /// - if the one-hot width differs from the class-name count
    pub fn new(images: Array4<f32>, labels: Array2<f32>, class_names: Vec<String>) -> Self {
        assert_eq!(
            images.dim().0,
            labels.dim().0,
            "images and labels must have the same sample count"
        );
        assert_eq!(
            labels.dim().1,
            class_names.len(),
            "one-hot width must equal the class count"
        );
        Self {
            images,
            labels,
            class_names,
        }
    }

    /// Builds a one-hot label matrix from class indices.
    ///
    /// # Panics
    /// Panics if any index is out of range.
    pub fn one_hot(classes: &[usize], num_classes: usize) -> Array2<f32> {
        let mut labels = Array2::zeros((classes.len(), num_classes));
        for (row, &class) in classes.iter().enumerate() {
            assert!(class < num_classes, "class index {class} out of range");
            labels[[row, class]] = 1.0;
        }
        labels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.dim().0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    #[inline]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    #[inline]
    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    #[inline]
    pub fn labels(&self) -> ArrayView2<'_, f32> {
        self.labels.view()
    }

    /// Number of samples per class, in class order.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes()];
        for row in self.labels.axis_iter(Axis(0)) {
            let class = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (i, &v)| {
                    if v > acc.1 {
                        (i, v)
                    } else {
                        acc
                    }
                })
                .0;
            counts[class] += 1;
        }
        counts
    }

    /// Reorders samples with a random permutation, keeping image/label rows
    /// paired.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.images = self.images.select(Axis(0), &order);
        self.labels = self.labels.select(Axis(0), &order);
    }

    /// Iterates `(images, labels)` batch views in order. The final batch may
    /// be short.
    ///
    /// # Panics
    /// Panics if `batch_size` is zero.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView4<'_, f32>, ArrayView2<'_, f32>)> {
        assert!(batch_size > 0, "batch_size must be > 0");
        self.images
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.labels.axis_chunks_iter(Axis(0), batch_size))
    }

    pub(crate) fn into_parts(self) -> (Array4<f32>, Array2<f32>, Vec<String>) {
        (self.images, self.labels, self.class_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn tagged_dataset(n: usize) -> ImageDataset {
        // Encode the sample id into the first pixel so shuffles can be
        // checked for pairing.
        let mut images = Array4::zeros((n, 2, 2, 1));
        let mut classes = Vec::with_capacity(n);
        for i in 0..n {
            images[[i, 0, 0, 0]] = i as f32;
            classes.push(i % 2);
        }
        let labels = ImageDataset::one_hot(&classes, 2);
        ImageDataset::new(images, labels, vec!["a".into(), "b".into()])
    }

    #[test]
    fn one_hot_basic() {
        let labels = ImageDataset::one_hot(&[1, 0, 3], 4);
        assert_eq!(labels.dim(), (3, 4));
        assert_eq!(labels[[0, 1]], 1.0);
        assert_eq!(labels[[1, 0]], 1.0);
        assert_eq!(labels[[2, 3]], 1.0);
        assert_eq!(labels.sum(), 3.0);
    }

    #[test]
    fn shuffle_keeps_rows_paired() {
        let mut ds = tagged_dataset(10);
        let mut rng = StdRng::seed_from_u64(7);
        ds.shuffle(&mut rng);
        for i in 0..ds.len() {
            let id = ds.images()[[i, 0, 0, 0]] as usize;
            assert_eq!(ds.labels()[[i, id % 2]], 1.0);
        }
    }

    #[test]
    fn batches_cover_all_samples() {
        let ds = tagged_dataset(10);
        let sizes: Vec<usize> = ds.batches(4).map(|(x, y)| {
            assert_eq!(x.dim().0, y.dim().0);
            x.dim().0
        }).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn class_counts_follow_labels() {
        let ds = tagged_dataset(9);
        assert_eq!(ds.class_counts(), vec![5, 4]);
    }
}
