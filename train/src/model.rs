//! A baseline linear classifier over pooled image features.

use crate::{
    common::*,
    config::ModelConfig,
    driver::{Evaluation, TrainingModel},
    metrics::argmax,
};
use rand_distr::Normal;

const LOG_EPSILON: f32 = 1e-7;

/// The persisted parameters of [LinearProbe].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearProbeCheckpoint {
    pub image_shape: (usize, usize, usize),
    pub pool_size: (usize, usize),
    pub num_classes: usize,
    pub multi_label: bool,
    /// Row-major (class, feature) weights.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Average-pools each channel into a small grid and applies a linear layer.
///
/// Single-label training uses softmax cross-entropy and multi-label training
/// uses sigmoid binary cross-entropy. Parameters are updated with plain SGD
/// and L2 weight decay.
#[derive(Debug, Clone)]
pub struct LinearProbe {
    image_shape: (usize, usize, usize),
    pool_size: (usize, usize),
    multi_label: bool,
    weight_decay: f32,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearProbe {
    pub fn new(
        config: &ModelConfig,
        image_shape: (usize, usize, usize),
        num_classes: usize,
        multi_label: bool,
        weight_decay: R64,
    ) -> Result<Self> {
        let ModelConfig {
            pool_size,
            init_std,
            seed,
        } = *config;
        let (channels, height, width) = image_shape;
        let (pool_h, pool_w) = pool_size;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(
            pool_h > 0 && pool_w > 0 && pool_h <= height && pool_w <= width,
            "pool_size {:?} does not fit image size {}x{}",
            pool_size,
            height,
            width
        );
        ensure!(init_std >= 0.0, "init_std must be non-negative");
        ensure!(weight_decay >= 0.0, "weight_decay must be non-negative");

        let num_features = channels * pool_h * pool_w;
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, init_std.raw() as f32)?;
        let weights = Array2::from_shape_fn((num_classes, num_features), |_| normal.sample(&mut rng));

        Ok(Self {
            image_shape,
            pool_size,
            multi_label,
            weight_decay: weight_decay.raw() as f32,
            weights,
            bias: Array1::zeros(num_classes),
        })
    }

    pub fn load(path: impl AsRef<Path>, weight_decay: R64) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read checkpoint '{}'", path.display()))?;
        let LinearProbeCheckpoint {
            image_shape,
            pool_size,
            num_classes,
            multi_label,
            weights,
            bias,
        } = serde_json::from_str(&text)?;

        let (channels, _, _) = image_shape;
        let num_features = channels * pool_size.0 * pool_size.1;
        let weights = Array2::from_shape_vec((num_classes, num_features), weights)?;
        let bias = Array1::from_vec(bias);
        ensure!(bias.len() == num_classes, "bias size mismatch in checkpoint");

        Ok(Self {
            image_shape,
            pool_size,
            multi_label,
            weight_decay: weight_decay.raw() as f32,
            weights,
            bias,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.bias.len()
    }

    pub fn is_multi_label(&self) -> bool {
        self.multi_label
    }

    /// Average pooling into `(channels * pool_h * pool_w)` features per image.
    fn features(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let (num_images, channels, height, width) = images.dim();
        ensure!(
            (channels, height, width) == self.image_shape,
            "expect image shape {:?}, but get {:?}",
            self.image_shape,
            (channels, height, width)
        );
        let (pool_h, pool_w) = self.pool_size;

        let mut features = Array2::zeros((num_images, channels * pool_h * pool_w));
        for (mut row, image) in features.outer_iter_mut().zip(images.outer_iter()) {
            for c in 0..channels {
                for py in 0..pool_h {
                    for px in 0..pool_w {
                        let (y0, y1) = (py * height / pool_h, (py + 1) * height / pool_h);
                        let (x0, x1) = (px * width / pool_w, (px + 1) * width / pool_w);
                        let cell = image.slice(ndarray::s![c, y0..y1, x0..x1]);
                        row[(c * pool_h + py) * pool_w + px] = cell.mean().unwrap_or(0.0);
                    }
                }
            }
        }
        Ok(features)
    }

    fn logits(&self, features: &Array2<f32>) -> Array2<f32> {
        features.dot(&self.weights.t()) + &self.bias
    }

    fn probabilities(&self, logits: &Array2<f32>) -> Array2<f32> {
        if self.multi_label {
            logits.mapv(|logit| 1.0 / (1.0 + (-logit).exp()))
        } else {
            let mut output = logits.clone();
            output.outer_iter_mut().for_each(|mut row| {
                let max = row.fold(f32::NEG_INFINITY, |max, &value| max.max(value));
                row.mapv_inplace(|value| (value - max).exp());
                let sum = row.sum();
                row.mapv_inplace(|value| value / sum);
            });
            output
        }
    }

    /// The data loss and its gradient with respect to the logits.
    fn loss_and_grad(&self, probs: &Array2<f32>, targets: &Array2<f32>) -> (f64, Array2<f32>) {
        let num_images = probs.nrows().max(1) as f32;

        if self.multi_label {
            let num_entries = probs.len().max(1) as f32;
            let loss = Zip::from(probs)
                .and(targets)
                .fold(0.0, |acc, &p, &t| {
                    acc - (t * (p + LOG_EPSILON).ln() + (1.0 - t) * (1.0 - p + LOG_EPSILON).ln())
                })
                / num_entries;
            let grad = (probs - targets) / num_entries;
            (loss as f64, grad)
        } else {
            let loss = Zip::from(probs)
                .and(targets)
                .fold(0.0, |acc, &p, &t| acc - t * (p + LOG_EPSILON).ln())
                / num_images;
            let target_sums = targets.sum_axis(Axis(1)).insert_axis(Axis(1));
            let grad = (probs * &target_sums - targets) / num_images;
            (loss as f64, grad)
        }
    }

    fn l2_penalty(&self) -> f64 {
        (self.weight_decay * self.weights.mapv(|w| w * w).sum()) as f64
    }

    fn accuracy(&self, probs: &Array2<f32>, targets: &Array2<f32>) -> f64 {
        let num_images = probs.nrows();
        if num_images == 0 {
            return 0.0;
        }

        if self.multi_label {
            let num_hits = Zip::from(probs)
                .and(targets)
                .fold(0usize, |acc, &p, &t| acc + ((p >= 0.5) == (t >= 0.5)) as usize);
            num_hits as f64 / probs.len() as f64
        } else {
            let num_hits = probs
                .outer_iter()
                .zip(targets.outer_iter())
                .filter(|(p, t)| argmax(p.view()) == argmax(t.view()))
                .count();
            num_hits as f64 / num_images as f64
        }
    }

    fn checkpoint(&self) -> LinearProbeCheckpoint {
        LinearProbeCheckpoint {
            image_shape: self.image_shape,
            pool_size: self.pool_size,
            num_classes: self.num_classes(),
            multi_label: self.multi_label,
            weights: self.weights.iter().cloned().collect(),
            bias: self.bias.to_vec(),
        }
    }
}

impl TrainingModel for LinearProbe {
    fn train_step(&mut self, images: &Array4<f32>, targets: &Array2<f32>, lr: f64) -> Result<f64> {
        ensure!(
            targets.ncols() == self.num_classes(),
            "expect {} classes, but get {}",
            self.num_classes(),
            targets.ncols()
        );
        let features = self.features(images)?;
        let probs = self.probabilities(&self.logits(&features));
        let (loss, grad_logits) = self.loss_and_grad(&probs, targets);
        let loss = loss + self.l2_penalty();

        let lr = lr as f32;
        let grad_weights = grad_logits.t().dot(&features) + &(&self.weights * (2.0 * self.weight_decay));
        let grad_bias = grad_logits.sum_axis(Axis(0));
        self.weights.scaled_add(-lr, &grad_weights);
        self.bias.scaled_add(-lr, &grad_bias);

        Ok(loss)
    }

    fn evaluate(&mut self, images: &Array4<f32>, targets: &Array2<f32>) -> Result<Evaluation> {
        ensure!(
            targets.ncols() == self.num_classes(),
            "expect {} classes, but get {}",
            self.num_classes(),
            targets.ncols()
        );
        let features = self.features(images)?;
        let probs = self.probabilities(&self.logits(&features));
        let (loss, _) = self.loss_and_grad(&probs, targets);
        let accuracy = self.accuracy(&probs, targets);

        Ok(Evaluation {
            predictions: probs,
            loss: loss + self.l2_penalty(),
            accuracy,
        })
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string(&self.checkpoint())?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_batch() -> (Array4<f32>, Array2<f32>) {
        // class 0 is bright on the left half, class 1 on the right half
        let images = Array4::from_shape_fn((4, 1, 4, 8), |(n, _, _, x)| {
            let left = x < 4;
            if (n % 2 == 0) == left {
                1.0
            } else {
                0.0
            }
        });
        let targets = Array2::from_shape_fn((4, 2), |(n, c)| if n % 2 == c { 1.0 } else { 0.0 });
        (images, targets)
    }

    fn config() -> ModelConfig {
        ModelConfig {
            pool_size: (2, 2),
            ..Default::default()
        }
    }

    #[test]
    fn training_reduces_loss() -> Result<()> {
        for multi_label in [false, true] {
            let (images, targets) = toy_batch();
            let mut model = LinearProbe::new(&config(), (1, 4, 8), 2, multi_label, r64(1e-4))?;

            let first = model.train_step(&images, &targets, 0.5)?;
            for _ in 0..50 {
                model.train_step(&images, &targets, 0.5)?;
            }
            let evaluation = model.evaluate(&images, &targets)?;

            assert!(evaluation.loss < first);
            assert_eq!(evaluation.accuracy, 1.0);
            assert_eq!(evaluation.predictions.dim(), (4, 2));
        }
        Ok(())
    }

    #[test]
    fn checkpoint_restores_predictions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ckpt").join("model.json");
        let (images, targets) = toy_batch();

        let mut model = LinearProbe::new(&config(), (1, 4, 8), 2, false, r64(0.0))?;
        model.train_step(&images, &targets, 0.1)?;
        model.save_checkpoint(&path)?;

        let mut restored = LinearProbe::load(&path, r64(0.0))?;
        let expect = model.evaluate(&images, &targets)?;
        let actual = restored.evaluate(&images, &targets)?;
        let max_diff = Zip::from(&expect.predictions)
            .and(&actual.predictions)
            .fold(0f32, |max, &lhs, &rhs| max.max((lhs - rhs).abs()));
        assert!(max_diff < 1e-6);
        assert!(!restored.is_multi_label());
        Ok(())
    }

    #[test]
    fn mismatched_inputs_are_rejected() -> Result<()> {
        let mut model = LinearProbe::new(&config(), (1, 4, 8), 2, false, r64(0.0))?;
        let images = Array4::zeros((2, 1, 4, 4));
        let targets = Array2::zeros((2, 2));
        assert!(model.train_step(&images, &targets, 0.1).is_err());

        let images = Array4::zeros((2, 1, 4, 8));
        let targets = Array2::zeros((2, 3));
        assert!(model.evaluate(&images, &targets).is_err());

        assert!(LinearProbe::new(&config(), (1, 1, 8), 2, false, r64(0.0)).is_err());
        Ok(())
    }
}
