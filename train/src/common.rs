//! Common imports from external crates.

pub use anyhow::{ensure, Context, Error, Result};
pub use bird_dl::{
    dataset::{DatasetPartition, PartitionInit},
    processor::{
        AugmentationInit, BatchMixingInit, ImageStoreInit, NoisePool, SameClassMixingInit,
    },
    stream::{BatchAssembler, BatchAssemblerInit, BatchOptions, OverlappedProducer, DEFAULT_PREFETCH},
};
pub use chrono::{DateTime, Local};
pub use derivative::Derivative;
pub use futures::future::FutureExt;
pub use indexmap::IndexSet;
pub use itertools::Itertools;
pub use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView2, Axis, Zip};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Cow,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
pub use tokio::sync::broadcast;
pub use tracing::{debug, error, info, warn};

pub type Fallible<T> = Result<T, Error>;
