use crate::{common::*, config::LearningRateSchedule};

/// Computes the learning rate of each epoch.
#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: f64,
    },
    StepWise {
        steps: Vec<(usize, f64)>,
    },
    Interpolated {
        /// The key points, extended to the last epoch.
        keys: Vec<(f64, f64)>,
    },
}

impl LrScheduler {
    /// Create a scheduler for a training that ends at `epochs`.
    pub fn new(config: &LearningRateSchedule, epochs: usize) -> Result<Self> {
        let scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure!(lr > 0.0, "the lr must be positive");
                Self::Constant { lr: lr.raw() }
            }
            LearningRateSchedule::StepWise { ref steps } => {
                check_steps(steps)?;
                Self::StepWise {
                    steps: steps
                        .iter()
                        .map(|&(epoch, lr)| (epoch, lr.raw()))
                        .collect(),
                }
            }
            LearningRateSchedule::Interpolated { ref steps } => {
                check_steps(steps)?;
                let mut keys: Vec<_> = steps
                    .iter()
                    .map(|&(epoch, lr)| (epoch as f64, lr.raw()))
                    .collect();

                // hold the last rate until the end
                if let Some(&(last_epoch, last_lr)) = keys.last() {
                    if (epochs as f64) > last_epoch {
                        keys.push((epochs as f64, last_lr));
                    }
                }
                Self::Interpolated { keys }
            }
        };

        Ok(scheduler)
    }

    pub fn lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::StepWise { steps } => {
                let index = match steps.binary_search_by_key(&epoch, |(key, _lr)| *key) {
                    Ok(index) => index,
                    Err(index) => index.saturating_sub(1),
                };
                steps[index].1
            }
            Self::Interpolated { keys } => {
                // the rate of an epoch is taken at the end of the previous one
                let first = keys[0].0;
                let x = (epoch.saturating_sub(1) as f64).max(first);
                interpolate(keys, x)
            }
        }
    }
}

fn check_steps(steps: &[(usize, R64)]) -> Result<()> {
    ensure!(!steps.is_empty(), "the steps must not be empty");
    steps.iter().fold(Ok(None), |result, (curr_epoch, lr)| {
        let prev_epoch = result?;
        if let Some(prev_epoch) = prev_epoch {
            ensure!(curr_epoch > prev_epoch, "the steps must be monotonic");
        }
        ensure!(lr.raw() > 0.0, "lr must be positive");
        Ok(Some(curr_epoch))
    })?;
    Ok(())
}

fn interpolate(keys: &[(f64, f64)], x: f64) -> f64 {
    let last = keys[keys.len() - 1];
    if x >= last.0 {
        return last.1;
    }

    keys.iter()
        .tuple_windows()
        .find(|((_, _), (x1, _))| x < *x1)
        .map(|(&(x0, y0), &(x1, y1))| y0 + (y1 - y0) * (x - x0) / (x1 - x0))
        .unwrap_or(keys[0].1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn steps(pairs: &[(usize, f64)]) -> Vec<(usize, R64)> {
        pairs.iter().map(|&(epoch, lr)| (epoch, r64(lr))).collect()
    }

    #[test]
    fn step_wise_holds_latest_key() -> Result<()> {
        let schedule = LearningRateSchedule::StepWise {
            steps: steps(&[(1, 0.01), (35, 0.0001), (55, 0.00001)]),
        };
        let scheduler = LrScheduler::new(&schedule, 55)?;
        assert_eq!(scheduler.lr(1), 0.01);
        assert_eq!(scheduler.lr(34), 0.01);
        assert_eq!(scheduler.lr(35), 0.0001);
        assert_eq!(scheduler.lr(60), 0.00001);
        Ok(())
    }

    #[test]
    fn interpolated_descends_linearly() -> Result<()> {
        let schedule = LearningRateSchedule::Interpolated {
            steps: steps(&[(1, 0.01), (35, 0.0001)]),
        };
        let scheduler = LrScheduler::new(&schedule, 55)?;

        assert_abs_diff_eq!(scheduler.lr(1), 0.01);
        assert_abs_diff_eq!(scheduler.lr(2), 0.01);
        assert_abs_diff_eq!(scheduler.lr(18), 0.01 + (0.0001 - 0.01) * 16.0 / 34.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr(36), 0.0001);
        assert_abs_diff_eq!(scheduler.lr(55), 0.0001);
        Ok(())
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        let unordered = LearningRateSchedule::StepWise {
            steps: steps(&[(10, 0.01), (5, 0.001)]),
        };
        assert!(LrScheduler::new(&unordered, 20).is_err());

        let empty = LearningRateSchedule::Interpolated { steps: vec![] };
        assert!(LrScheduler::new(&empty, 20).is_err());

        let zero = LearningRateSchedule::Constant { lr: r64(0.0) };
        assert!(LrScheduler::new(&zero, 20).is_err());
    }
}
