//! Random crop, flip and wrap-around shift.

use crate::common::*;
use ndarray::ArrayView2;

/// The mirroring axis of [RandomFlip].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlipAxis {
    /// Mirror left and right.
    Horizontal,
    /// Mirror top and bottom.
    Vertical,
}

/// Crops random symmetric margins and scales the rest back to the original size.
#[derive(Debug, Clone)]
pub struct RandomCrop {
    max_fraction: f64,
}

impl RandomCrop {
    pub fn new(max_fraction: R64) -> Result<Self> {
        ensure!(
            (0.0..0.5).contains(&max_fraction.raw()),
            "crop fraction must be in range [0, 0.5), but get {}",
            max_fraction
        );
        Ok(Self {
            max_fraction: max_fraction.raw(),
        })
    }

    pub fn forward<R>(&self, image: &Array3<f32>, rng: &mut R) -> Array3<f32>
    where
        R: Rng,
    {
        let (channels, height, width) = image.dim();
        let margin_h = sample_margin(height, self.max_fraction, rng);
        let margin_w = sample_margin(width, self.max_fraction, rng);

        if margin_h == 0 && margin_w == 0 {
            return image.clone();
        }

        let cropped = image.slice(s![
            ..,
            margin_h..(height - margin_h),
            margin_w..(width - margin_w)
        ]);

        let mut output = Array3::zeros((channels, height, width));
        output
            .outer_iter_mut()
            .zip(cropped.outer_iter())
            .for_each(|(mut dst, src)| dst.assign(&resize_plane(src, height, width)));
        output
    }
}

/// Draw a margin in `1..=len * fraction`, leaving at least one pixel.
fn sample_margin<R>(len: usize, fraction: f64, rng: &mut R) -> usize
where
    R: Rng,
{
    let max = ((len as f64 * fraction) as usize).max(1).min(len.saturating_sub(1) / 2);
    if max == 0 {
        0
    } else {
        rng.gen_range(1..=max)
    }
}

/// Bilinear resize of a single channel.
fn resize_plane(plane: ArrayView2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = plane.dim();
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(src_w as u32, src_h as u32, |x, y| {
            Luma([plane[[y as usize, x as usize]]])
        });
    let resized = image::imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);
    Array2::from_shape_fn((height, width), |(y, x)| {
        resized.get_pixel(x as u32, y as u32)[0]
    })
}

/// Mirrors the image along a fixed axis.
#[derive(Debug, Clone)]
pub struct RandomFlip {
    axis: FlipAxis,
}

impl RandomFlip {
    pub fn new(axis: FlipAxis) -> Self {
        Self { axis }
    }

    pub fn forward(&self, image: &Array3<f32>) -> Array3<f32> {
        match self.axis {
            FlipAxis::Horizontal => image.slice(s![.., .., ..;-1]).to_owned(),
            FlipAxis::Vertical => image.slice(s![.., ..;-1, ..]).to_owned(),
        }
    }
}

/// Circularly shifts rows and columns by random offsets.
#[derive(Debug, Clone)]
pub struct RandomRoll {
    max_horizontal: f64,
    max_vertical: f64,
}

impl RandomRoll {
    /// The shift bounds are fractions of the image width and height.
    pub fn new(max_horizontal: R64, max_vertical: R64) -> Result<Self> {
        ensure!(
            max_horizontal >= 0.0 && max_vertical >= 0.0,
            "roll fractions must be non-negative"
        );
        Ok(Self {
            max_horizontal: max_horizontal.raw(),
            max_vertical: max_vertical.raw(),
        })
    }

    pub fn forward<R>(&self, image: &Array3<f32>, rng: &mut R) -> Array3<f32>
    where
        R: Rng,
    {
        let (_, height, width) = image.dim();
        let shift_y = (height as f64 * rng.gen_range(-self.max_vertical..=self.max_vertical)) as isize;
        let shift_x =
            (width as f64 * rng.gen_range(-self.max_horizontal..=self.max_horizontal)) as isize;
        roll(image, shift_y, shift_x)
    }
}

/// Shift an image with wrap-around, so that `output[y] = input[y - shift_y]`.
pub fn roll(image: &Array3<f32>, shift_y: isize, shift_x: isize) -> Array3<f32> {
    let (channels, height, width) = image.dim();
    if height == 0 || width == 0 {
        return image.clone();
    }
    let shift_y = shift_y.rem_euclid(height as isize) as usize;
    let shift_x = shift_x.rem_euclid(width as isize) as usize;

    Array3::from_shape_fn((channels, height, width), |(c, y, x)| {
        image[[c, (y + height - shift_y) % height, (x + width - shift_x) % width]]
    })
}
