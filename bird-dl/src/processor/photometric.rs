//! Intensity transformations: mean shift, additive noise, noise sample blending and brightness.

use crate::{
    common::*,
    utils::{blend, clip_unit},
};

/// Adds a scaled copy of the image's own mean intensity.
#[derive(Debug, Clone)]
pub struct MeanShift {
    scale: f32,
}

impl MeanShift {
    pub fn new(scale: R64) -> Self {
        Self {
            scale: scale.raw() as f32,
        }
    }

    pub fn forward(&self, image: &Array3<f32>) -> Array3<f32> {
        let mean = image.mean().unwrap_or(0.0);
        let mut output = image + mean * self.scale;
        clip_unit(&mut output);
        output
    }
}

/// Adds zero-mean Gaussian noise with a random standard deviation.
#[derive(Debug, Clone)]
pub struct GaussianNoise {
    max_std: f64,
}

impl GaussianNoise {
    /// The standard deviation is drawn from `[0, sqrt(max_variance)]` on every call.
    pub fn new(max_variance: R64) -> Result<Self> {
        ensure!(
            max_variance >= 0.0,
            "noise variance must be non-negative, but get {}",
            max_variance
        );
        Ok(Self {
            max_std: max_variance.raw().sqrt(),
        })
    }

    pub fn forward<R>(&self, image: &Array3<f32>, rng: &mut R) -> Array3<f32>
    where
        R: Rng,
    {
        let std = rng.gen_range(0.0..=self.max_std);
        if std == 0.0 {
            return image.clone();
        }

        // std is finite and positive here
        let normal = match Normal::new(0.0, std) {
            Ok(normal) => normal,
            Err(_) => return image.clone(),
        };
        let mut output = image.mapv(|value| value + normal.sample(rng) as f32);
        clip_unit(&mut output);
        output
    }
}

/// Blends a weighted noise image into the input and stretches the sum to [0, 1].
#[derive(Debug, Clone)]
pub struct NoiseSampleBlend {
    weight: f32,
}

impl NoiseSampleBlend {
    pub fn new(weight: R64) -> Self {
        Self {
            weight: weight.raw() as f32,
        }
    }

    /// Returns `None` if the shapes differ or the blended image is constant.
    pub fn forward(&self, image: &Array3<f32>, noise: &Array3<f32>) -> Option<Array3<f32>> {
        blend(image.view(), noise.view(), self.weight)
    }
}

/// Multiplies the image by a random factor.
#[derive(Debug, Clone)]
pub struct RandomBrightness {
    min_factor: f64,
    max_factor: f64,
}

impl RandomBrightness {
    pub fn new(min_factor: R64, max_factor: R64) -> Result<Self> {
        ensure!(
            min_factor >= 0.0 && min_factor <= max_factor,
            "brightness range [{}, {}] is invalid",
            min_factor,
            max_factor
        );
        Ok(Self {
            min_factor: min_factor.raw(),
            max_factor: max_factor.raw(),
        })
    }

    pub fn forward<R>(&self, image: &Array3<f32>, rng: &mut R) -> Array3<f32>
    where
        R: Rng,
    {
        let factor = rng.gen_range(self.min_factor..=self.max_factor) as f32;
        let mut output = image * factor;
        clip_unit(&mut output);
        output
    }
}
