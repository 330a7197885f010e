pub use anyhow::{bail, ensure, format_err, Context as _, Result};
pub use dashmap::DashMap;
pub use derivative::Derivative;
pub use futures::stream::{self, Stream};
pub use image::{imageops::FilterType, DynamicImage, ImageBuffer, Luma};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::Itertools as _;
pub use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use rand_distr::Normal;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
pub use tracing::{debug, info, warn};
