//! The per-image augmentation pipeline.

use super::{
    FlipAxis, GaussianNoise, ImageStore, MeanShift, NoiseSampleBlend, RandomBrightness,
    RandomCrop, RandomFlip, RandomRoll,
};
use crate::common::*;

/// An operator parameter together with its activation probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gated<T> {
    pub prob: R64,
    pub value: T,
}

impl<T> Gated<T> {
    pub fn new(prob: f64, value: T) -> Self {
        Self {
            prob: r64(prob),
            value,
        }
    }

    fn check_prob(&self, name: &str) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.prob.raw()),
            "the probability of '{}' must be in range [0, 1], but get {}",
            name,
            self.prob
        );
        Ok(())
    }
}

/// The augmentation operator table. Absent operators are never applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AugmentationInit {
    /// The maximum crop margin as a fraction of each side.
    #[serde(default)]
    pub crop: Option<Gated<R64>>,
    #[serde(default)]
    pub flip: Option<Gated<FlipAxis>>,
    /// The maximum `(horizontal, vertical)` wrap-around shift as fractions of width and height.
    #[serde(default)]
    pub roll: Option<Gated<(R64, R64)>>,
    /// The scale of the added image mean.
    #[serde(default)]
    pub mean: Option<Gated<R64>>,
    /// The variance ceiling of the Gaussian noise.
    #[serde(default)]
    pub noise: Option<Gated<R64>>,
    /// The weight of the blended noise image.
    #[serde(default)]
    pub noise_samples: Option<Gated<R64>>,
    /// The `(min, max)` brightness factors.
    #[serde(default)]
    pub brightness: Option<Gated<(R64, R64)>>,
}

impl AugmentationInit {
    pub fn build(self, noise_pool: NoisePool) -> Result<Augmentation> {
        let Self {
            crop,
            flip,
            roll,
            mean,
            noise,
            noise_samples,
            brightness,
        } = self;

        macro_rules! check {
            ($($op:ident),*) => {
                $(
                    if let Some(op) = &$op {
                        op.check_prob(stringify!($op))?;
                    }
                )*
            };
        }
        check!(crop, flip, roll, mean, noise, noise_samples, brightness);

        let crop = crop
            .map(|Gated { prob, value }| -> Result<_> {
                Ok((prob.raw(), RandomCrop::new(value)?))
            })
            .transpose()?;
        let flip = flip.map(|Gated { prob, value }| (prob.raw(), RandomFlip::new(value)));
        let roll = roll
            .map(|Gated { prob, value: (horizontal, vertical) }| -> Result<_> {
                Ok((prob.raw(), RandomRoll::new(horizontal, vertical)?))
            })
            .transpose()?;
        let mean = mean.map(|Gated { prob, value }| (prob.raw(), MeanShift::new(value)));
        let noise = noise
            .map(|Gated { prob, value }| -> Result<_> {
                Ok((prob.raw(), GaussianNoise::new(value)?))
            })
            .transpose()?;
        let brightness = brightness
            .map(|Gated { prob, value: (min, max) }| -> Result<_> {
                Ok((prob.raw(), RandomBrightness::new(min, max)?))
            })
            .transpose()?;

        let noise_samples = match noise_samples {
            Some(_) if noise_pool.is_empty() => {
                warn!("noise_samples augmentation is disabled because the noise pool is empty");
                None
            }
            Some(Gated { prob, value }) => Some((prob.raw(), NoiseSampleBlend::new(value))),
            None => None,
        };

        Ok(Augmentation {
            crop,
            flip,
            roll,
            mean,
            noise,
            noise_samples,
            brightness,
            noise_pool,
        })
    }
}

/// The images available to the noise sample blending operator.
#[derive(Debug, Clone)]
pub struct NoisePool {
    store: Arc<ImageStore>,
    paths: Vec<PathBuf>,
}

impl NoisePool {
    pub fn new(store: Arc<ImageStore>, paths: Vec<PathBuf>) -> Self {
        Self { store, paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load a random noise image. Noise images are always cached.
    pub fn sample<R>(&self, rng: &mut R) -> Option<Result<Array3<f32>>>
    where
        R: Rng,
    {
        let path = self.paths.choose(rng)?;
        Some(self.store.load_with_cache(path, true))
    }
}

/// Applies the configured operators in the order crop, flip, roll, mean,
/// noise, noise samples and brightness, each with its own coin flip.
#[derive(Debug, Clone)]
pub struct Augmentation {
    crop: Option<(f64, RandomCrop)>,
    flip: Option<(f64, RandomFlip)>,
    roll: Option<(f64, RandomRoll)>,
    mean: Option<(f64, MeanShift)>,
    noise: Option<(f64, GaussianNoise)>,
    noise_samples: Option<(f64, NoiseSampleBlend)>,
    brightness: Option<(f64, RandomBrightness)>,
    noise_pool: NoisePool,
}

impl Augmentation {
    /// Check if no operator is enabled.
    pub fn is_identity(&self) -> bool {
        self.crop.is_none()
            && self.flip.is_none()
            && self.roll.is_none()
            && self.mean.is_none()
            && self.noise.is_none()
            && self.noise_samples.is_none()
            && self.brightness.is_none()
    }

    pub fn forward<R>(&self, image: Array3<f32>, rng: &mut R) -> Array3<f32>
    where
        R: Rng,
    {
        let mut image = image;

        if let Some((prob, op)) = &self.crop {
            if rng.gen_bool(*prob) {
                image = op.forward(&image, rng);
            }
        }

        if let Some((prob, op)) = &self.flip {
            if rng.gen_bool(*prob) {
                image = op.forward(&image);
            }
        }

        if let Some((prob, op)) = &self.roll {
            if rng.gen_bool(*prob) {
                image = op.forward(&image, rng);
            }
        }

        if let Some((prob, op)) = &self.mean {
            if rng.gen_bool(*prob) {
                image = op.forward(&image);
            }
        }

        if let Some((prob, op)) = &self.noise {
            if rng.gen_bool(*prob) {
                image = op.forward(&image, rng);
            }
        }

        if let Some((prob, op)) = &self.noise_samples {
            if rng.gen_bool(*prob) {
                match self.noise_pool.sample(rng) {
                    Some(Ok(noise)) => match op.forward(&image, &noise) {
                        Some(blended) => image = blended,
                        None => debug!("degenerate noise sample blend is skipped"),
                    },
                    Some(Err(err)) => warn!("unable to load noise sample: {:#}", err),
                    None => {}
                }
            }
        }

        if let Some((prob, op)) = &self.brightness {
            if rng.gen_bool(*prob) {
                image = op.forward(&image, rng);
            }
        }

        image
    }
}
