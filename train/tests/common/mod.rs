#![allow(dead_code)]

use anyhow::Result;
use bird_dl::{
    dataset::{DatasetPartition, PartitionInit},
    processor::{ImageSize, ImageStore, ImageStoreInit},
    stream::{BatchAssembler, BatchAssemblerInit},
};
use image::{GrayImage, Luma};
use std::{fs, num::NonZeroUsize, path::Path, sync::Arc};

pub const IMAGE_WIDTH: usize = 16;
pub const IMAGE_HEIGHT: usize = 8;

/// Create one subdirectory per class. Each class is bright in its own column band.
pub fn make_dataset(root: &Path, classes: &[(&str, usize)]) -> Result<()> {
    let num_classes = classes.len() as u32;
    for (class_index, &(class, count)) in classes.iter().enumerate() {
        let dir = root.join(class);
        fs::create_dir_all(&dir)?;
        let band = IMAGE_WIDTH as u32 / num_classes;

        for index in 0..count {
            let image = GrayImage::from_fn(IMAGE_WIDTH as u32, IMAGE_HEIGHT as u32, |x, y| {
                let inside = x / band == class_index as u32;
                let base = if inside { 200 } else { 20 };
                Luma([(base + (x + y + index as u32) % 16) as u8])
            });
            image.save(dir.join(format!("{:04}.png", index)))?;
        }
    }
    Ok(())
}

pub fn image_store() -> Result<Arc<ImageStore>> {
    let store = ImageStoreInit {
        image_size: ImageSize {
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        },
        image_channels: 1,
        use_cache: true,
    }
    .build()?;
    Ok(Arc::new(store))
}

/// Partition a fixture dataset and build an assembler without augmentation.
pub fn prepare(
    root: &Path,
    val_split: f64,
    batch_size: usize,
) -> Result<(DatasetPartition, Arc<BatchAssembler>)> {
    let partition = PartitionInit::new(root, val_split).build()?.partition()?;
    let assembler = BatchAssemblerInit {
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        same_class_mixing: None,
        batch_mixing: None,
    }
    .build(partition.classes.clone(), image_store()?, None)?;
    Ok((partition, Arc::new(assembler)))
}
