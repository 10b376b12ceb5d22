mod confusion;
mod plots;

pub use confusion::ConfusionMatrix;
pub use plots::{plot_confusion, plot_history};

use ndarray::{ArrayView2, Axis};

/// Index of the largest value in each row; ties go to the first maximum.
pub fn argmax_rows(a: ArrayView2<f32>) -> Vec<usize> {
    a.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (i, &v)| {
                    if v > acc.1 {
                        (i, v)
                    } else {
                        acc
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn argmax_takes_the_first_maximum() {
        let a = arr2(&[[0.1, 0.8, 0.1], [0.5, 0.2, 0.5]]);
        assert_eq!(argmax_rows(a.view()), vec![1, 0]);
    }
}
