//! The dataset partitioning algorithm.

use super::utils::{list_files, list_subdirs, load_classes_file};
use crate::common::*;

/// Dataset partitioning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInit {
    /// The directory whose subdirectories are the classes.
    pub dataset_dir: PathBuf,
    /// The flat directory of noise images.
    #[serde(default)]
    pub noise_dir: Option<PathBuf>,
    /// Optional list of whitelisted classes.
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
    /// Optional file of whitelisted classes, one per line.
    #[serde(default)]
    pub classes_file: Option<PathBuf>,
    /// Order classes alphabetically if set, otherwise shuffle them with the seed.
    #[serde(default = "default_sort_classes")]
    pub sort_classes: bool,
    /// Keep at most this many classes.
    #[serde(default)]
    pub max_classes: Option<usize>,
    /// Keep the classes within `[start, end)` of the ordered class list.
    #[serde(default)]
    pub class_range: Option<(Option<usize>, Option<usize>)>,
    /// Truncate each class to this many samples.
    #[serde(default)]
    pub max_samples_per_class: Option<usize>,
    /// Duplicate random samples until each class has this many samples.
    #[serde(default)]
    pub min_samples_per_class: Option<usize>,
    /// Only admit classes whose sample count lies in `[lo, hi)`.
    #[serde(default)]
    pub sample_range: Option<(usize, usize)>,
    /// Keep at most this many samples after shuffling.
    #[serde(default)]
    pub max_samples: Option<usize>,
    /// Keep at most this many validation samples.
    #[serde(default)]
    pub max_validation_samples: Option<usize>,
    /// The fraction of samples for validation.
    pub val_split: R64,
    /// The random seed of shuffling and upsampling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl PartitionInit {
    pub fn new(dataset_dir: impl Into<PathBuf>, val_split: f64) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            noise_dir: None,
            class_names: None,
            classes_file: None,
            sort_classes: true,
            max_classes: None,
            class_range: None,
            max_samples_per_class: None,
            min_samples_per_class: None,
            sample_range: None,
            max_samples: None,
            max_validation_samples: None,
            val_split: r64(val_split),
            seed: default_seed(),
        }
    }

    pub fn build(self) -> Result<DatasetPartitioner> {
        let Self {
            dataset_dir,
            noise_dir,
            class_names,
            classes_file,
            sort_classes,
            max_classes,
            class_range,
            max_samples_per_class,
            min_samples_per_class,
            sample_range,
            max_samples,
            max_validation_samples,
            val_split,
            seed,
        } = self;

        ensure!(
            (0.0..1.0).contains(&val_split.raw()),
            "val_split must be in range [0, 1), but get {}",
            val_split
        );
        if let (Some(min), Some(max)) = (min_samples_per_class, max_samples_per_class) {
            ensure!(
                min <= max,
                "min_samples_per_class ({}) must not exceed max_samples_per_class ({})",
                min,
                max
            );
        }
        if let Some((lo, hi)) = sample_range {
            ensure!(lo < hi, "sample_range [{}, {}) is empty", lo, hi);
        }
        if let Some((Some(start), Some(end))) = class_range {
            ensure!(start <= end, "class_range [{}, {}) is reversed", start, end);
        }
        if let Some(max_samples_per_class) = max_samples_per_class {
            ensure!(
                max_samples_per_class > 0,
                "max_samples_per_class must be positive"
            );
        }

        let whitelist = {
            let mut whitelist: IndexSet<String> = class_names.into_iter().flatten().collect();
            if let Some(classes_file) = &classes_file {
                whitelist.extend(load_classes_file(classes_file)?);
            }
            (!whitelist.is_empty()).then(|| whitelist)
        };

        Ok(DatasetPartitioner {
            dataset_dir,
            noise_dir,
            whitelist,
            sort_classes,
            max_classes,
            class_range,
            max_samples_per_class,
            min_samples_per_class: min_samples_per_class.unwrap_or(0),
            sample_range,
            max_samples,
            max_validation_samples,
            val_split: val_split.raw(),
            seed,
        })
    }
}

fn default_sort_classes() -> bool {
    true
}

fn default_seed() -> u64 {
    1337
}

/// The partition of a dataset into training, validation and noise pools.
#[derive(Debug, Clone)]
pub struct DatasetPartition {
    /// The ordered class labels. The class index is the position in the set.
    pub classes: IndexSet<String>,
    pub train: Vec<PathBuf>,
    pub validation: Vec<PathBuf>,
    pub noise: Vec<PathBuf>,
    /// The number of samples per class after truncation and upsampling.
    pub sample_counts: IndexMap<String, usize>,
}

impl DatasetPartition {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Print the class and split statistics.
    pub fn report(&self) {
        let counts = self
            .sample_counts
            .iter()
            .sorted_by_key(|(_, count)| **count)
            .map(|(class, count)| format!("{}: {}", class, count))
            .join(", ");

        info!("classes: {}", self.classes.len());
        info!("class labels: [{}]", counts);
        info!("training images: {}", self.train.len());
        info!("validation images: {}", self.validation.len());
        info!("noise samples: {}", self.noise.len());
    }
}

/// Discovers class directories and splits their samples reproducibly.
#[derive(Debug, Clone)]
pub struct DatasetPartitioner {
    dataset_dir: PathBuf,
    noise_dir: Option<PathBuf>,
    whitelist: Option<IndexSet<String>>,
    sort_classes: bool,
    max_classes: Option<usize>,
    class_range: Option<(Option<usize>, Option<usize>)>,
    max_samples_per_class: Option<usize>,
    min_samples_per_class: usize,
    sample_range: Option<(usize, usize)>,
    max_samples: Option<usize>,
    max_validation_samples: Option<usize>,
    val_split: f64,
    seed: u64,
}

impl DatasetPartitioner {
    pub fn partition(&self) -> Result<DatasetPartition> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        let candidates = self.candidate_classes(&mut rng)?;

        // list samples per class
        let mut classes = IndexSet::new();
        let mut sample_counts = IndexMap::new();
        let mut samples = vec![];

        for class in candidates {
            let mut class_samples = list_files(self.dataset_dir.join(&class))?;
            if let Some(max) = self.max_samples_per_class {
                class_samples.truncate(max);
            }
            let num_raw = class_samples.len();

            if let Some((lo, hi)) = self.sample_range {
                if !(lo..hi).contains(&num_raw) {
                    debug!(
                        "class '{}' has {} samples, out of range [{}, {})",
                        class, num_raw, lo, hi
                    );
                    continue;
                }
            }
            if num_raw == 0 {
                warn!("class '{}' has no samples, skipped", class);
                continue;
            }

            // correct class imbalance by duplicating random samples
            let num_missing = self.min_samples_per_class.saturating_sub(num_raw);
            let duplicates: Vec<_> = (0..num_missing)
                .map(|_| class_samples[rng.gen_range(0..num_raw)].clone())
                .collect();
            class_samples.extend(duplicates);

            sample_counts.insert(class.clone(), class_samples.len());
            samples.extend(class_samples);
            classes.insert(class);
        }

        ensure!(
            !classes.is_empty(),
            "no admissible classes found in '{}'",
            self.dataset_dir.display()
        );

        // shuffle and split off the validation suffix
        samples.shuffle(&mut rng);
        if let Some(max) = self.max_samples {
            samples.truncate(max);
        }

        let num_validation = (samples.len() as f64 * self.val_split).floor() as usize;
        let mut validation = samples.split_off(samples.len() - num_validation);
        let train = samples;
        if let Some(max) = self.max_validation_samples {
            validation.truncate(max);
        }

        // noise pool
        let noise = match &self.noise_dir {
            Some(dir) => {
                let mut noise = list_files(dir)?;
                if noise.is_empty() {
                    warn!("noise directory '{}' is empty", dir.display());
                }
                noise.shuffle(&mut rng);
                noise
            }
            None => vec![],
        };

        Ok(DatasetPartition {
            classes,
            train,
            validation,
            noise,
            sample_counts,
        })
    }

    /// The ordered list of class directories before sample counting.
    fn candidate_classes(&self, rng: &mut StdRng) -> Result<Vec<String>> {
        let mut classes: Vec<_> = list_subdirs(&self.dataset_dir)?
            .into_iter()
            .filter(|name| match &self.whitelist {
                Some(whitelist) => whitelist.contains(name),
                None => true,
            })
            .collect();

        if let Some(whitelist) = &self.whitelist {
            whitelist
                .iter()
                .filter(|name| !classes.contains(name))
                .for_each(|name| warn!("whitelisted class '{}' is not found", name));
        }

        if !self.sort_classes {
            classes.shuffle(rng);
        }
        if let Some(max) = self.max_classes {
            classes.truncate(max);
        }

        if let Some((start, end)) = self.class_range {
            let len = classes.len();
            let end = end.unwrap_or(len).min(len);
            let start = start.unwrap_or(0).min(end);
            classes = classes.drain(start..end).collect();
        }

        Ok(classes)
    }
}
