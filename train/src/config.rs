//! Training program configuration format.

use crate::common::*;
use bird_dl::processor::ImageSize;

pub use preprocessor::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: PartitionInit,
    pub preprocessor: PreprocessorConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

/// Data logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The parent directory of run directories.
    pub dir: PathBuf,
    /// The name prepended to the run directory.
    #[serde(default)]
    pub run_name: Option<String>,
}

mod preprocessor {
    use super::*;

    /// Image loading, augmentation and batching options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PreprocessorConfig {
        pub image_size: ImageSize,
        /// 1 for grayscale and 3 for color images.
        pub image_channels: usize,
        /// Keep decoded images in memory. The cache is never evicted.
        #[serde(default)]
        pub use_cache: bool,
        #[serde(default)]
        pub augmentation: AugmentationInit,
        #[serde(default)]
        pub same_class_mixing: Option<SameClassMixingInit>,
        /// Enables multi-label training.
        #[serde(default)]
        pub batch_mixing: Option<BatchMixingInit>,
        /// The number of batches prepared ahead of the model.
        #[serde(default = "default_prefetch_batches")]
        pub prefetch_batches: usize,
    }

    impl PreprocessorConfig {
        pub fn image_store_init(&self) -> ImageStoreInit {
            ImageStoreInit {
                image_size: self.image_size,
                image_channels: self.image_channels,
                use_cache: self.use_cache,
            }
        }

        pub fn batch_assembler_init(&self, batch_size: NonZeroUsize) -> BatchAssemblerInit {
            BatchAssemblerInit {
                batch_size,
                same_class_mixing: self.same_class_mixing.clone(),
                batch_mixing: self.batch_mixing.clone(),
            }
        }

        pub fn multi_label(&self) -> bool {
            self.batch_mixing.is_some()
        }
    }

    fn default_prefetch_batches() -> usize {
        DEFAULT_PREFETCH
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        /// The batch size.
        pub batch_size: NonZeroUsize,
        /// The last epoch, inclusive.
        pub epochs: usize,
        /// The first epoch.
        #[serde(default = "default_epoch_start")]
        pub epoch_start: usize,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        /// Reshuffle the training split every epoch.
        #[serde(default = "default_true")]
        pub randomize_train_set: bool,
        /// Apply label mixing to validation batches.
        #[serde(default)]
        pub val_has_multi_label: bool,
        /// The L2 regularization factor.
        #[serde(default = "default_weight_decay")]
        pub weight_decay: R64,
        /// When to save a snapshot checkpoint.
        #[serde(default)]
        pub snapshot_epochs: SnapshotEpochs,
        /// Save a checkpoint when the training is interrupted.
        #[serde(default = "default_true")]
        pub save_after_interrupt: bool,
        /// The baseline model options.
        #[serde(default)]
        pub model: ModelConfig,
    }

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Switch to the learning rate of a key epoch once it is reached.
        StepWise { steps: Vec<(usize, R64)> },
        /// Interpolate linearly between the key epochs.
        Interpolated { steps: Vec<(usize, R64)> },
    }

    /// The epochs to save snapshots at.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum SnapshotEpochs {
        Disabled,
        Every,
        Epochs { epochs: Vec<usize> },
    }

    impl Default for SnapshotEpochs {
        fn default() -> Self {
            Self::Disabled
        }
    }

    impl SnapshotEpochs {
        pub fn contains(&self, epoch: usize) -> bool {
            match self {
                Self::Disabled => false,
                Self::Every => true,
                Self::Epochs { epochs } => epochs.contains(&epoch),
            }
        }
    }

    /// The baseline linear model options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// The pooled feature grid as `(height, width)`.
        #[serde(default = "default_pool_size")]
        pub pool_size: (usize, usize),
        /// The standard deviation of initial weights.
        #[serde(default = "default_init_std")]
        pub init_std: R64,
        /// The random seed of weight initialization.
        #[serde(default)]
        pub seed: u64,
    }

    impl Default for ModelConfig {
        fn default() -> Self {
            Self {
                pool_size: default_pool_size(),
                init_std: default_init_std(),
                seed: 0,
            }
        }
    }

    fn default_epoch_start() -> usize {
        1
    }

    fn default_true() -> bool {
        true
    }

    fn default_weight_decay() -> R64 {
        r64(1e-4)
    }

    fn default_pool_size() -> (usize, usize) {
        (8, 16)
    }

    fn default_init_std() -> R64 {
        r64(0.01)
    }
}
