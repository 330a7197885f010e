//! Classification metrics over validation batches.

use crate::common::*;

/// Counts of (target class, predicted class) pairs.
///
/// Rows are indexed by the target class and columns by the predicted class.
/// Both are taken as the arg-max of their vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

/// Per-class precision, recall and F1 score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
}

impl ClassMetrics {
    pub fn mean_precision(&self) -> f64 {
        mean(&self.precision)
    }

    pub fn mean_recall(&self) -> f64 {
        mean(&self.recall)
    }

    pub fn mean_f1(&self) -> f64 {
        mean(&self.f1)
    }
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: Array2::zeros((num_classes, num_classes)),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
    }

    /// Add a batch of predictions and targets of shape (samples, classes).
    pub fn update(&mut self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> Result<()> {
        let num_classes = self.num_classes();
        ensure!(
            predictions.dim() == targets.dim(),
            "prediction shape {:?} does not match target shape {:?}",
            predictions.dim(),
            targets.dim()
        );
        ensure!(
            targets.ncols() == num_classes,
            "expect {} classes, but get {}",
            num_classes,
            targets.ncols()
        );

        predictions
            .outer_iter()
            .zip(targets.outer_iter())
            .for_each(|(prediction, target)| {
                if let (Some(predicted), Some(expected)) = (argmax(prediction), argmax(target)) {
                    self.counts[[expected, predicted]] += 1;
                }
            });
        Ok(())
    }

    /// The percentage of each target class assigned to each predicted class.
    pub fn normalized(&self) -> Array2<f64> {
        let mut output = self.counts.mapv(|count| count as f64);
        output.outer_iter_mut().for_each(|mut row| {
            let sum = row.sum();
            if sum > 0.0 {
                row.mapv_inplace(|count| (count / sum * 1000.0).round() / 10.0);
            }
        });
        output
    }

    pub fn metrics(&self) -> ClassMetrics {
        let predicted = self.counts.sum_axis(Axis(0));
        let expected = self.counts.sum_axis(Axis(1));

        let num_classes = self.num_classes();
        let mut metrics = ClassMetrics {
            precision: Vec::with_capacity(num_classes),
            recall: Vec::with_capacity(num_classes),
            f1: Vec::with_capacity(num_classes),
        };

        for class in 0..num_classes {
            let tp = self.counts[[class, class]] as f64;
            let precision = ratio(tp, predicted[class] as f64);
            let recall = ratio(tp, expected[class] as f64);
            metrics.precision.push(precision);
            metrics.recall.push(recall);
            metrics.f1.push(ratio(2.0 * precision * recall, precision + recall));
        }

        metrics
    }
}

/// The index of the largest value, ignoring NaNs.
pub(crate) fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (index, &value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
