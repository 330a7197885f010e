//! Batch level augmentations that blend samples together.

use crate::{common::*, utils::blend};
use ndarray::ArrayView2;

/// The smallest batch that cross-sample mixing is applied to.
pub const MIN_BATCH_MIXING_SIZE: usize = 3;

/// The mean number of active labels per row.
pub fn mean_targets_per_image(targets: ArrayView2<f32>) -> f64 {
    let num_rows = targets.nrows();
    if num_rows == 0 {
        return 0.0;
    }
    let num_active = targets.iter().filter(|&&value| value >= 0.5).count();
    num_active as f64 / num_rows as f64
}

/// Same-class mixing options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SameClassMixingInit {
    /// The maximum number of classes blended per batch.
    #[serde(default = "default_max_combinations")]
    pub max_combinations: usize,
}

impl Default for SameClassMixingInit {
    fn default() -> Self {
        Self {
            max_combinations: default_max_combinations(),
        }
    }
}

impl SameClassMixingInit {
    pub fn build(self) -> Result<SameClassMixer> {
        let Self { max_combinations } = self;
        ensure!(max_combinations > 0, "max_combinations must be positive");
        Ok(SameClassMixer { max_combinations })
    }
}

fn default_max_combinations() -> usize {
    5
}

/// Blends the first two samples of randomly chosen classes that occur more
/// than once in a batch. The targets are kept as is.
#[derive(Debug, Clone)]
pub struct SameClassMixer {
    max_combinations: usize,
}

impl SameClassMixer {
    pub fn max_combinations(&self) -> usize {
        self.max_combinations
    }

    /// Returns the indices of the classes that were blended.
    pub fn forward<R>(&self, images: &mut Array4<f32>, targets: &Array2<f32>, rng: &mut R) -> Vec<usize>
    where
        R: Rng,
    {
        debug_assert_eq!(images.len_of(Axis(0)), targets.nrows());

        let mut candidates: Vec<usize> = targets
            .axis_iter(Axis(1))
            .enumerate()
            .filter(|(_, column)| column.iter().filter(|&&value| value >= 0.5).count() > 1)
            .map(|(class, _)| class)
            .collect();
        let mut mixed = vec![];
        let mut num_combinations = 0;

        while !candidates.is_empty() && num_combinations < self.max_combinations {
            let class = candidates.swap_remove(rng.gen_range(0..candidates.len()));
            num_combinations += 1;

            let members: Vec<usize> = targets
                .column(class)
                .iter()
                .positions(|&value| value >= 0.5)
                .take(2)
                .collect();
            let (first, second) = match members.as_slice() {
                &[first, second] => (first, second),
                _ => continue,
            };

            let blended = blend(
                images.index_axis(Axis(0), first),
                images.index_axis(Axis(0), second),
                1.0,
            );
            match blended {
                Some(blended) => {
                    images.index_axis_mut(Axis(0), first).assign(&blended);
                    mixed.push(class);
                }
                None => debug!("degenerate same-class blend of class {} is skipped", class),
            }
        }

        mixed
    }
}

/// Cross-sample mixing options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchMixingInit {
    /// Mix until the mean number of labels per image reaches this value.
    pub mean_targets_per_image: R64,
    /// The maximum number of blend attempts per batch.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl BatchMixingInit {
    pub fn new(mean_targets_per_image: f64) -> Self {
        Self {
            mean_targets_per_image: r64(mean_targets_per_image),
            max_iterations: default_max_iterations(),
        }
    }

    pub fn build(self) -> Result<BatchMixer> {
        let Self {
            mean_targets_per_image,
            max_iterations,
        } = self;
        ensure!(
            mean_targets_per_image >= 1.0,
            "mean_targets_per_image must be at least 1, but get {}",
            mean_targets_per_image
        );
        ensure!(max_iterations > 0, "max_iterations must be positive");
        Ok(BatchMixer {
            mean_targets_per_image: mean_targets_per_image.raw(),
            max_iterations,
        })
    }
}

fn default_max_iterations() -> usize {
    1000
}

/// The outcome of [BatchMixer::forward].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchMixingOutput {
    /// The number of blend attempts, including skipped ones.
    pub iterations: usize,
    /// The mean number of labels per image after mixing.
    pub mean_targets: f64,
}

/// Blends random pairs of samples and merges their targets, turning the
/// batch into a multi-label one.
#[derive(Debug, Clone)]
pub struct BatchMixer {
    mean_targets_per_image: f64,
    max_iterations: usize,
}

impl BatchMixer {
    pub fn mean_targets_per_image(&self) -> f64 {
        self.mean_targets_per_image
    }

    /// Mix until the target mean is reached, the iteration cap is hit or
    /// every row already carries all labels of the batch.
    pub fn forward<R>(
        &self,
        images: &mut Array4<f32>,
        targets: &mut Array2<f32>,
        rng: &mut R,
    ) -> BatchMixingOutput
    where
        R: Rng,
    {
        let num_samples = targets.nrows();
        debug_assert_eq!(images.len_of(Axis(0)), num_samples);

        let mut iterations = 0;

        if num_samples >= 2 {
            while iterations < self.max_iterations
                && mean_targets_per_image(targets.view()) < self.mean_targets_per_image
                && !is_saturated(targets.view())
            {
                iterations += 1;

                let lhs = rng.gen_range(0..num_samples);
                let rhs = {
                    let index = rng.gen_range(0..(num_samples - 1));
                    if index >= lhs {
                        index + 1
                    } else {
                        index
                    }
                };

                let blended = blend(
                    images.index_axis(Axis(0), lhs),
                    images.index_axis(Axis(0), rhs),
                    1.0,
                );
                let blended = match blended {
                    Some(blended) => blended,
                    None => continue,
                };
                images.index_axis_mut(Axis(0), lhs).assign(&blended);

                let rhs_target = targets.row(rhs).to_owned();
                targets
                    .row_mut(lhs)
                    .zip_mut_with(&rhs_target, |lhs, &rhs| *lhs = lhs.max(rhs));
            }
        }

        BatchMixingOutput {
            iterations,
            mean_targets: mean_targets_per_image(targets.view()),
        }
    }
}

/// Check if every row already equals the union of all rows.
fn is_saturated(targets: ArrayView2<f32>) -> bool {
    let union = targets.fold_axis(Axis(0), 0f32, |&acc, &value| acc.max(value));
    targets
        .outer_iter()
        .all(|row| row.iter().zip(union.iter()).all(|(&lhs, &rhs)| (lhs >= 0.5) == (rhs >= 0.5)))
}
