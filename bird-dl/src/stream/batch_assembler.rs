use crate::{
    common::*,
    dataset::class_name_of,
    processor::{
        mean_targets_per_image, Augmentation, BatchMixer, BatchMixingInit, ImageStore,
        SameClassMixer, SameClassMixingInit, MIN_BATCH_MIXING_SIZE,
    },
};

/// A stack of images with their aligned target vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Images in (sample, channel, height, width) order.
    pub images: Array4<f32>,
    /// Target vectors in (sample, class) order.
    pub targets: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mean_targets_per_image(&self) -> f64 {
        mean_targets_per_image(self.targets.view())
    }
}

/// Per-split switches of batch assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchOptions {
    /// Apply the per-image augmentation and same-class mixing.
    pub augment: bool,
    /// Apply cross-sample label mixing.
    pub label_mixing: bool,
}

impl BatchOptions {
    pub fn training(label_mixing: bool) -> Self {
        Self {
            augment: true,
            label_mixing,
        }
    }

    pub fn validation(label_mixing: bool) -> Self {
        Self {
            augment: false,
            label_mixing,
        }
    }
}

/// Batch assembler options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchAssemblerInit {
    pub batch_size: NonZeroUsize,
    #[serde(default)]
    pub same_class_mixing: Option<SameClassMixingInit>,
    #[serde(default)]
    pub batch_mixing: Option<BatchMixingInit>,
}

impl BatchAssemblerInit {
    pub fn build(
        self,
        classes: IndexSet<String>,
        store: Arc<ImageStore>,
        augmentation: Option<Augmentation>,
    ) -> Result<BatchAssembler> {
        let Self {
            batch_size,
            same_class_mixing,
            batch_mixing,
        } = self;

        ensure!(!classes.is_empty(), "the class catalog must not be empty");

        let augmentation = augmentation.filter(|augmentation| !augmentation.is_identity());
        let same_class_mixer = same_class_mixing.map(|init| init.build()).transpose()?;
        let batch_mixer = batch_mixing.map(|init| init.build()).transpose()?;

        Ok(BatchAssembler {
            batch_size: batch_size.get(),
            classes,
            store,
            augmentation,
            same_class_mixer,
            batch_mixer,
        })
    }
}

/// Loads chunks of sample paths into batches.
#[derive(Debug)]
pub struct BatchAssembler {
    batch_size: usize,
    classes: IndexSet<String>,
    store: Arc<ImageStore>,
    augmentation: Option<Augmentation>,
    same_class_mixer: Option<SameClassMixer>,
    batch_mixer: Option<BatchMixer>,
}

impl BatchAssembler {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Check if any per-image augmentation operator is enabled.
    pub fn has_augmentation(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Check if cross-sample label mixing is configured.
    pub fn has_batch_mixing(&self) -> bool {
        self.batch_mixer.is_some()
    }

    /// The number of batches covering `num_samples` samples.
    pub fn num_batches(&self, num_samples: usize) -> usize {
        (num_samples + self.batch_size - 1) / self.batch_size
    }

    /// Build a batch from a chunk of at most `batch_size` paths.
    ///
    /// Samples that cannot be loaded or whose class is unknown are logged
    /// and left out, so the batch may be smaller than the chunk.
    pub fn next_batch<R>(&self, chunk: &[PathBuf], options: BatchOptions, rng: &mut R) -> Batch
    where
        R: Rng,
    {
        debug_assert!(chunk.len() <= self.batch_size);

        let samples: Vec<(Array3<f32>, usize)> = chunk
            .iter()
            .filter_map(|path| match self.load_sample(path, options.augment, rng) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    warn!("sample '{}' is skipped: {:#}", path.display(), err);
                    None
                }
            })
            .collect();

        let (channels, height, width) = self.store.shape();
        let num_samples = samples.len();
        let mut images = Array4::zeros((num_samples, channels, height, width));
        let mut targets = Array2::zeros((num_samples, self.classes.len()));

        samples
            .into_iter()
            .enumerate()
            .for_each(|(index, (image, class))| {
                images.index_axis_mut(Axis(0), index).assign(&image);
                targets[[index, class]] = 1.0;
            });

        if let Some(mixer) = &self.same_class_mixer {
            if options.augment && num_samples > 2 {
                let mixed = mixer.forward(&mut images, &targets, rng);
                if !mixed.is_empty() {
                    debug!("same-class mixing blended classes {:?}", mixed);
                }
            }
        }

        if let Some(mixer) = &self.batch_mixer {
            let min_size = (self.batch_size / 2).max(MIN_BATCH_MIXING_SIZE);
            if options.label_mixing && num_samples >= min_size {
                let output = mixer.forward(&mut images, &mut targets, rng);
                if output.mean_targets < mixer.mean_targets_per_image() {
                    debug!(
                        "batch mixing stopped after {} iterations at {:.3} labels per image",
                        output.iterations, output.mean_targets
                    );
                }
            }
        }

        Batch { images, targets }
    }

    /// Iterate over the batches of one pass through `split`.
    ///
    /// The random state is derived from `seed` only, so the same inputs
    /// produce the same batches.
    pub fn epoch_batches(
        self: &Arc<Self>,
        split: Vec<PathBuf>,
        options: BatchOptions,
        seed: u64,
    ) -> impl Iterator<Item = Batch> + Send + 'static {
        let assembler = self.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        let num_batches = self.num_batches(split.len());

        (0..num_batches).map(move |index| {
            let start = index * assembler.batch_size;
            let end = (start + assembler.batch_size).min(split.len());
            assembler.next_batch(&split[start..end], options, &mut rng)
        })
    }

    fn load_sample<R>(&self, path: &Path, augment: bool, rng: &mut R) -> Result<(Array3<f32>, usize)>
    where
        R: Rng,
    {
        let label = class_name_of(path)
            .ok_or_else(|| format_err!("unable to derive a class label from the path"))?;
        let class = self
            .classes
            .get_index_of(label)
            .ok_or_else(|| format_err!("the class '{}' is not in the catalog", label))?;

        let image = self.store.load(path)?;
        let image = match (&self.augmentation, augment) {
            (Some(augmentation), true) => augmentation.forward(image, rng),
            _ => image,
        };

        Ok((image, class))
    }
}
