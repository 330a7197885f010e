mod common;

use anyhow::Result;
use bird_dl::{
    processor::{
        AugmentationInit, BatchMixingInit, FlipAxis, Gated, ImageSize, ImageStore, ImageStoreInit,
        NoisePool, SameClassMixingInit,
    },
    stream::{BatchAssemblerInit, BatchOptions},
};
use indexmap::IndexSet;
use ndarray::Axis;
use noisy_float::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

fn new_store() -> Result<Arc<ImageStore>> {
    let store = ImageStoreInit {
        image_size: ImageSize {
            width: 16,
            height: 12,
        },
        image_channels: 1,
        use_cache: true,
    }
    .build()?;
    Ok(Arc::new(store))
}

fn classes(names: &[&str]) -> IndexSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn assembler_init(batch_size: usize) -> BatchAssemblerInit {
    BatchAssemblerInit {
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        same_class_mixing: None,
        batch_mixing: None,
    }
}

#[test]
fn identity_augmentation_is_dropped() -> Result<()> {
    let store = new_store()?;
    let pool = NoisePool::new(store.clone(), vec![]);

    let identity = AugmentationInit::default().build(pool.clone())?;
    assert!(identity.is_identity());
    let assembler = assembler_init(4).build(classes(&["a"]), store.clone(), Some(identity))?;
    assert!(!assembler.has_augmentation());

    // noise blending without noise images is disabled as well
    let without_noise = AugmentationInit {
        noise_samples: Some(Gated::new(1.0, r64(0.5))),
        ..Default::default()
    }
    .build(pool.clone())?;
    assert!(without_noise.is_identity());

    let flip = AugmentationInit {
        flip: Some(Gated::new(0.5, FlipAxis::Vertical)),
        ..Default::default()
    }
    .build(pool)?;
    assert!(!flip.is_identity());
    let assembler = assembler_init(4).build(classes(&["a"]), store, Some(flip))?;
    assert!(assembler.has_augmentation());
    Ok(())
}

#[test]
fn batches_carry_one_hot_targets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = common::make_dataset(dir.path(), &[("a", 2), ("b", 2)])?;
    let store = new_store()?;
    let assembler = assembler_init(4).build(classes(&["b", "a"]), store.clone(), None)?;

    let mut rng = StdRng::seed_from_u64(1);
    let batch = assembler.next_batch(&paths, BatchOptions::validation(false), &mut rng);

    assert_eq!(batch.len(), 4);
    assert_eq!(batch.images.dim(), (4, 1, 12, 16));
    assert_eq!(batch.targets.dim(), (4, 2));
    assert_eq!(batch.targets.row(0).to_vec(), [0.0, 1.0]);
    assert_eq!(batch.targets.row(3).to_vec(), [1.0, 0.0]);
    assert_eq!(batch.mean_targets_per_image(), 1.0);

    for (index, path) in paths.iter().enumerate() {
        assert_eq!(batch.images.index_axis(Axis(0), index), store.load(path)?);
    }
    Ok(())
}

#[test]
fn failed_samples_shrink_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut paths = common::make_dataset(dir.path(), &[("a", 2), ("zz", 1)])?;
    let broken = dir.path().join("a").join("broken.png");
    std::fs::write(&broken, b"garbage")?;
    paths.push(broken);

    let assembler = assembler_init(4).build(classes(&["a"]), new_store()?, None)?;
    let mut rng = StdRng::seed_from_u64(1);
    let batch = assembler.next_batch(&paths, BatchOptions::training(false), &mut rng);

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.images.len_of(Axis(0)), 2);

    let empty = assembler.next_batch(&paths[2..], BatchOptions::training(false), &mut rng);
    assert!(empty.is_empty());
    assert_eq!(empty.targets.dim(), (0, 1));
    Ok(())
}

#[test]
fn epoch_batches_are_reproducible() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = common::make_dataset(dir.path(), &[("a", 5), ("b", 5)])?;
    let noise = common::make_noise_dir(&dir.path().join("noise"), 2)?;
    let store = new_store()?;

    let augmentation = AugmentationInit {
        roll: Some(Gated::new(1.0, (r64(0.25), r64(0.25)))),
        noise: Some(Gated::new(0.5, r64(0.01))),
        noise_samples: Some(Gated::new(0.5, r64(0.5))),
        ..Default::default()
    }
    .build(NoisePool::new(store.clone(), noise))?;
    let assembler = Arc::new(assembler_init(4).build(
        classes(&["a", "b"]),
        store,
        Some(augmentation),
    )?);

    let first: Vec<_> = assembler
        .epoch_batches(paths.clone(), BatchOptions::training(false), 42)
        .collect();
    let second: Vec<_> = assembler
        .epoch_batches(paths.clone(), BatchOptions::training(false), 42)
        .collect();

    assert_eq!(first.iter().map(|batch| batch.len()).collect::<Vec<_>>(), [4, 4, 2]);
    assert_eq!(first, second);
    assert!(first
        .iter()
        .flat_map(|batch| batch.images.iter())
        .all(|&v| (0.0..=1.0).contains(&v)));
    Ok(())
}

#[test]
fn label_mixing_raises_labels_per_image() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let layout: Vec<_> = names.iter().map(|&name| (name, 1)).collect();
    let paths = common::make_dataset(dir.path(), &layout)?;

    let assembler = BatchAssemblerInit {
        batch_mixing: Some(BatchMixingInit::new(2.0)),
        ..assembler_init(8)
    }
    .build(classes(&names), new_store()?, None)?;
    assert!(assembler.has_batch_mixing());

    let mut rng = StdRng::seed_from_u64(9);
    let mixed = assembler.next_batch(&paths, BatchOptions::training(true), &mut rng);
    assert!(mixed.mean_targets_per_image() >= 2.0);
    assert!(mixed.targets.iter().all(|&v| v == 0.0 || v == 1.0));

    // each sample keeps its own label
    for (index, row) in mixed.targets.outer_iter().enumerate() {
        assert_eq!(row[index], 1.0);
    }

    let plain = assembler.next_batch(&paths, BatchOptions::validation(false), &mut rng);
    assert_eq!(plain.mean_targets_per_image(), 1.0);

    // batches below half of the batch size are not mixed
    let small = assembler.next_batch(&paths[..3], BatchOptions::training(true), &mut rng);
    assert_eq!(small.mean_targets_per_image(), 1.0);
    Ok(())
}

#[test]
fn same_class_mixing_requires_augmentation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = common::make_dataset(dir.path(), &[("a", 3)])?;
    let store = new_store()?;
    let assembler = BatchAssemblerInit {
        same_class_mixing: Some(SameClassMixingInit::default()),
        ..assembler_init(3)
    }
    .build(classes(&["a"]), store.clone(), None)?;
    let original = store.load(&paths[0])?;

    let mut rng = StdRng::seed_from_u64(3);
    let plain = assembler.next_batch(&paths, BatchOptions::validation(false), &mut rng);
    assert_eq!(plain.images.index_axis(Axis(0), 0), original);

    let mixed = assembler.next_batch(&paths, BatchOptions::training(false), &mut rng);
    assert_ne!(mixed.images.index_axis(Axis(0), 0), original);
    assert_eq!(mixed.images.index_axis(Axis(0), 1), store.load(&paths[1])?);
    assert_eq!(mixed.targets, plain.targets);
    Ok(())
}

#[test]
fn constant_noise_blend_keeps_the_image() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let class_dir = dir.path().join("a");
    std::fs::create_dir_all(&class_dir)?;
    let sample: PathBuf = class_dir.join("bright.png");
    common::write_constant_image(&sample, 16, 12, 255)?;

    let noise_dir = dir.path().join("noise");
    std::fs::create_dir_all(&noise_dir)?;
    let noise = noise_dir.join("flat.png");
    common::write_constant_image(&noise, 16, 12, 255)?;

    let store = new_store()?;
    let augmentation = AugmentationInit {
        noise_samples: Some(Gated::new(1.0, r64(1.0))),
        ..Default::default()
    }
    .build(NoisePool::new(store.clone(), vec![noise]))?;
    let assembler = assembler_init(1).build(classes(&["a"]), store, Some(augmentation))?;

    let mut rng = StdRng::seed_from_u64(0);
    let batch = assembler.next_batch(&[sample], BatchOptions::training(false), &mut rng);
    assert_eq!(batch.len(), 1);
    assert!(batch.images.iter().all(|&v| v == 1.0));
    Ok(())
}

#[test]
fn empty_catalog_is_rejected() -> Result<()> {
    assert!(assembler_init(4)
        .build(IndexSet::new(), new_store()?, None)
        .is_err());
    Ok(())
}
