use std::fmt::Write as _;

use ndarray::{Array2, ArrayView2};

/// Class-by-class prediction counts: rows are true classes, columns are
/// predicted classes.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    counts: Array2<usize>,
}

impl ConfusionMatrix {
    /// Builds a confusion matrix from paired label sequences.
    ///
    /// # Panics
    /// Panics if the sequences differ in length or contain an out-of-range
    /// class index.
    pub fn from_labels(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Self {
        assert_eq!(
            y_true.len(),
            y_pred.len(),
            "label sequences must have the same length"
        );
        let mut counts = Array2::zeros((num_classes, num_classes));
        for (&t, &p) in y_true.iter().zip(y_pred) {
            assert!(t < num_classes && p < num_classes, "class index out of range");
            counts[[t, p]] += 1;
        }
        Self { counts }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn counts(&self) -> ArrayView2<'_, usize> {
        self.counts.view()
    }

    pub fn count(&self, true_class: usize, predicted_class: usize) -> usize {
        self.counts[[true_class, predicted_class]]
    }

    pub fn total(&self) -> usize {
        self.counts.sum()
    }

    /// Number of samples whose true class is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.counts.row(class).sum()
    }

    pub fn accuracy(&self) -> f32 {
        let correct: usize = (0..self.num_classes()).map(|c| self.counts[[c, c]]).sum();
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            correct as f32 / total as f32
        }
    }

    pub fn precision(&self, class: usize) -> f32 {
        let predicted: usize = self.counts.column(class).sum();
        if predicted == 0 {
            0.0
        } else {
            self.counts[[class, class]] as f32 / predicted as f32
        }
    }

    pub fn recall(&self, class: usize) -> f32 {
        let support = self.support(class);
        if support == 0 {
            0.0
        } else {
            self.counts[[class, class]] as f32 / support as f32
        }
    }

    pub fn f1(&self, class: usize) -> f32 {
        let p = self.precision(class);
        let r = self.recall(class);
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Renders a per-class precision/recall/F1 table with macro and
    /// support-weighted averages, four decimal places throughout.
    ///
    /// # Panics
    /// Panics if `class_names` does not match the class count.
    pub fn classification_report(&self, class_names: &[String]) -> String {
        assert_eq!(
            class_names.len(),
            self.num_classes(),
            "one name per class is required"
        );

        let name_width = class_names
            .iter()
            .map(|n| n.len())
            .chain(["weighted avg".len()].into_iter())
            .max()
            .unwrap_or(12);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>10}  {:>10}  {:>10}  {:>8}",
            "", "precision", "recall", "f1-score", "support"
        );
        let _ = writeln!(out);

        let total = self.total();
        let mut macro_p = 0.0;
        let mut macro_r = 0.0;
        let mut macro_f = 0.0;
        let mut weighted_p = 0.0;
        let mut weighted_r = 0.0;
        let mut weighted_f = 0.0;

        for (class, name) in class_names.iter().enumerate() {
            let p = self.precision(class);
            let r = self.recall(class);
            let f = self.f1(class);
            let support = self.support(class);
            let _ = writeln!(
                out,
                "{name:>name_width$}  {p:>10.4}  {r:>10.4}  {f:>10.4}  {support:>8}"
            );

            let share = if total == 0 {
                0.0
            } else {
                support as f32 / total as f32
            };
            macro_p += p;
            macro_r += r;
            macro_f += f;
            weighted_p += p * share;
            weighted_r += r * share;
            weighted_f += f * share;
        }

        let n = self.num_classes().max(1) as f32;
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>10}  {:>10}  {:>10.4}  {:>8}",
            "accuracy",
            "",
            "",
            self.accuracy(),
            total
        );
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>10.4}  {:>10.4}  {:>10.4}  {:>8}",
            "macro avg",
            macro_p / n,
            macro_r / n,
            macro_f / n,
            total
        );
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>10.4}  {:>10.4}  {:>10.4}  {:>8}",
            "weighted avg", weighted_p, weighted_r, weighted_f, total
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> ConfusionMatrix {
        // true:      0  0  0  1  1  2
        // predicted: 0  0  1  1  1  0
        ConfusionMatrix::from_labels(&[0, 0, 0, 1, 1, 2], &[0, 0, 1, 1, 1, 0], 3)
    }

    #[test]
    fn counts_land_in_the_right_cells() {
        let cm = sample_matrix();
        assert_eq!(cm.count(0, 0), 2);
        assert_eq!(cm.count(0, 1), 1);
        assert_eq!(cm.count(1, 1), 2);
        assert_eq!(cm.count(2, 0), 1);
        assert_eq!(cm.total(), 6);
    }

    #[test]
    fn metrics_match_hand_computation() {
        let cm = sample_matrix();
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-6);
        // Class 0: 2 of 3 predicted-0 are right; 2 of 3 true-0 recovered.
        assert!((cm.precision(0) - 2.0 / 3.0).abs() < 1e-6);
        assert!((cm.recall(0) - 2.0 / 3.0).abs() < 1e-6);
        // Class 2 is never predicted.
        assert_eq!(cm.precision(2), 0.0);
        assert_eq!(cm.f1(2), 0.0);
    }

    #[test]
    fn report_formats_four_decimals() {
        let cm = sample_matrix();
        let names = vec!["glioma".to_string(), "healthy".into(), "meningioma".into()];
        let report = cm.classification_report(&names);
        assert!(report.contains("precision"));
        assert!(report.contains("glioma"));
        assert!(report.contains("0.6667"));
        assert!(report.contains("weighted avg"));
    }
}
