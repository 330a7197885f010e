#![allow(dead_code)]

use anyhow::Result;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Write a grayscale image with a pattern derived from `seed`.
pub fn write_gray_image(path: &Path, width: u32, height: u32, seed: u32) -> Result<()> {
    let image = GrayImage::from_fn(width, height, |x, y| {
        Luma([((x * 7 + y * 13 + seed * 31) % 256) as u8])
    });
    image.save(path)?;
    Ok(())
}

/// Write a color image with a pattern derived from `seed`.
pub fn write_rgb_image(path: &Path, width: u32, height: u32, seed: u32) -> Result<()> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 5 + seed) % 256) as u8,
            ((y * 11 + seed) % 256) as u8,
            ((x + y + seed * 3) % 256) as u8,
        ])
    });
    image.save(path)?;
    Ok(())
}

/// Write a grayscale image with the same value everywhere.
pub fn write_constant_image(path: &Path, width: u32, height: u32, value: u8) -> Result<()> {
    GrayImage::from_pixel(width, height, Luma([value])).save(path)?;
    Ok(())
}

/// Create one subdirectory per class holding the given number of images.
pub fn make_dataset(root: &Path, classes: &[(&str, usize)]) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for (class_index, &(class, count)) in classes.iter().enumerate() {
        let dir = root.join(class);
        fs::create_dir_all(&dir)?;
        for index in 0..count {
            let path = dir.join(format!("{:04}.png", index));
            write_gray_image(&path, 16, 12, (class_index * 100 + index) as u32)?;
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Create a flat directory of noise images.
pub fn make_noise_dir(dir: &Path, count: usize) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    (0..count)
        .map(|index| {
            let path = dir.join(format!("noise_{:03}.png", index));
            write_gray_image(&path, 16, 12, 1000 + index as u32)?;
            Ok(path)
        })
        .collect()
}
